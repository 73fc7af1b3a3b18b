//! The 7-bit variable-length integers used throughout a Topaz container.
//!
//! Magnitude bytes carry seven bits each, most significant group first,
//! with the high bit set on every byte except the last. A negative number
//! is a leading `0xFF` followed by the magnitude.

use crate::reader::Reader;
use crate::{Error, Result};

/// Decode one signed number at the reader's position.
pub(crate) fn read_number(reader: &mut Reader) -> Result<i32> {
    let start = reader.position();
    let mut byte = reader.read_u8()?;
    let negative = byte == 0xFF;
    if negative {
        byte = reader.read_u8()?;
    }
    let mut value = (byte & 0x7F) as i64;
    while byte >= 0x80 {
        byte = reader.read_u8()?;
        value = (value << 7) | (byte & 0x7F) as i64;
        if value > u32::MAX as i64 {
            return Err(Error::BadVarint(start));
        }
    }
    if negative {
        if value > 1 << 31 {
            return Err(Error::BadVarint(start));
        }
        Ok((-value) as i32)
    } else {
        if value > i32::MAX as i64 {
            return Err(Error::BadVarint(start));
        }
        Ok(value as i32)
    }
}

/// Decode one number that must be a non-negative size or offset.
pub(crate) fn read_size(reader: &mut Reader) -> Result<usize> {
    let start = reader.position();
    let value = read_number(reader)?;
    if value < 0 {
        return Err(Error::BadVarint(start));
    }
    Ok(value as usize)
}

/// Encode one signed number, the exact inverse of [`read_number`].
pub(crate) fn encode_number(value: i32) -> Vec<u8> {
    let mut groups = [0u8; 5];
    let mut magnitude = value.unsigned_abs();
    let mut count = 0;
    loop {
        groups[count] = (magnitude & 0x7F) as u8;
        count += 1;
        magnitude >>= 7;
        if magnitude == 0 {
            break;
        }
    }
    let mut out = Vec::with_capacity(count + 1);
    if value < 0 {
        out.push(0xFF);
    }
    for i in (0..count).rev() {
        let mut byte = groups[i];
        if i > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out
}

/// Decode a length-prefixed string. Tags and metadata are ASCII in
/// practice; anything that is not valid UTF-8 is rejected.
pub(crate) fn read_string(reader: &mut Reader) -> Result<String> {
    let len = read_size(reader)?;
    let bytes = reader.take(len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::BadHeader("string record is not valid UTF-8".into()))
}

/// Append an encoded number to an output buffer.
pub(crate) fn push_number(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&encode_number(value));
}

/// Append a length-prefixed string to an output buffer.
pub(crate) fn push_string(out: &mut Vec<u8>, s: &str) {
    push_number(out, s.len() as i32);
    out.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode(bytes: &[u8]) -> Result<i32> {
        read_number(&mut Reader::new(bytes))
    }

    #[test]
    fn fixed_vectors() {
        assert_eq!(encode_number(1), [0x01]);
        assert_eq!(encode_number(127), [0x7F]);
        assert_eq!(encode_number(128), [0x81, 0x00]);
        assert_eq!(encode_number(16384), [0x81, 0x80, 0x00]);
        assert_eq!(encode_number(-1), [0xFF, 0x01]);
        assert_eq!(decode(&[0x01]).unwrap(), 1);
        assert_eq!(decode(&[0x7F]).unwrap(), 127);
        assert_eq!(decode(&[0x81, 0x00]).unwrap(), 128);
        assert_eq!(decode(&[0x81, 0x80, 0x00]).unwrap(), 16384);
        assert_eq!(decode(&[0xFF, 0x01]).unwrap(), -1);
    }

    #[test]
    fn zero_and_extremes() {
        assert_eq!(encode_number(0), [0x00]);
        assert_eq!(decode(&encode_number(0)).unwrap(), 0);
        assert_eq!(decode(&encode_number(i32::MAX)).unwrap(), i32::MAX);
        assert_eq!(decode(&encode_number(i32::MIN)).unwrap(), i32::MIN);
    }

    #[test]
    fn truncated_input_is_an_error() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0xFF]).is_err());
        assert!(decode(&[0x81]).is_err());
    }

    #[test]
    fn oversized_magnitude_is_rejected() {
        // six full groups exceed 32 bits
        assert!(matches!(
            decode(&[0xFF, 0xBF, 0xFF, 0xFF, 0xFF, 0x7F]),
            Err(Error::BadVarint(_))
        ));
    }

    #[test]
    fn strings_round_trip() {
        let mut buf = Vec::new();
        push_string(&mut buf, "metadata");
        let mut reader = Reader::new(&buf);
        assert_eq!(read_string(&mut reader).unwrap(), "metadata");
    }

    proptest! {
        #[test]
        fn round_trip(value in any::<i32>()) {
            let encoded = encode_number(value);
            prop_assert_eq!(decode(&encoded).unwrap(), value);
        }

        #[test]
        fn sizes_reject_negatives(value in i32::MIN..0) {
            let encoded = encode_number(value);
            prop_assert!(read_size(&mut Reader::new(&encoded)).is_err());
        }
    }
}
