use std::fmt;

use crate::reader::Reader;
use crate::Result;

pub(crate) const PALMDOC_HEADER_LEN: usize = 16;
/// Byte offset of the encryption type field within record 0.
pub(crate) const ENCRYPTION_TYPE_OFFSET: usize = 12;

/// Encryption schemes seen in the PalmDOC header.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Encryption {
    No,
    OldMobipocket,
    Mobipocket,
}

impl From<u16> for Encryption {
    fn from(n: u16) -> Encryption {
        match n {
            2 => Encryption::Mobipocket,
            1 => Encryption::OldMobipocket,
            _ => Encryption::No,
        }
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encryption::No => f.write_str("no encryption"),
            Encryption::OldMobipocket => f.write_str("old Mobipocket encryption"),
            Encryption::Mobipocket => f.write_str("Mobipocket encryption"),
        }
    }
}

#[derive(Debug, PartialEq, Default)]
/// PalmDOC header at the head of record 0.
pub struct PalmDocHeader {
    pub compression: u16,
    pub text_length: u32,
    pub record_count: u16,
    pub record_size: u16,
    pub encryption_type: u16,
}

impl PalmDocHeader {
    /// Parse a PalmDOC header. The reader must be at the start of record 0.
    pub(crate) fn parse(reader: &mut Reader) -> Result<PalmDocHeader> {
        Ok(PalmDocHeader {
            compression: reader.read_u16_be()?,
            text_length: {
                reader.read_u16_be()?;
                reader.read_u32_be()?
            },
            record_count: reader.read_u16_be()?,
            record_size: reader.read_u16_be()?,
            encryption_type: {
                let e = reader.read_u16_be()?;
                reader.read_u16_be()?;
                e
            },
        })
    }

    pub(crate) fn encryption(&self) -> Encryption {
        Encryption::from(self.encryption_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let raw = [
            0x00, 0x02, // compression
            0x00, 0x00, // reserved
            0x00, 0x11, 0x92, 0x65, // text length
            0x01, 0x1A, // record count
            0x10, 0x00, // record size
            0x00, 0x02, // encryption type
            0x00, 0x00, // reserved
        ];
        let header = PalmDocHeader::parse(&mut Reader::new(&raw)).unwrap();
        assert_eq!(
            header,
            PalmDocHeader {
                compression: 2,
                text_length: 1_151_589,
                record_count: 282,
                record_size: 4096,
                encryption_type: 2,
            }
        );
        assert_eq!(header.encryption(), Encryption::Mobipocket);
    }

    #[test]
    fn encryption_types() {
        let mut header = PalmDocHeader::default();
        assert_eq!(header.encryption(), Encryption::No);
        header.encryption_type = 1;
        assert_eq!(header.encryption(), Encryption::OldMobipocket);
        header.encryption_type = 2;
        assert_eq!(header.encryption(), Encryption::Mobipocket);
    }
}
