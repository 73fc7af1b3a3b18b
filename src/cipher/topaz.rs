/// The Topaz stream cipher: two 32-bit words of state, keyed byte by byte
/// and clocked with the plaintext, so decryption regains sync from its own
/// output.
#[derive(Debug, Clone)]
pub struct TopazCipher {
    v0: u32,
    v1: u32,
}

const SEED: u32 = 0xCAFF_E19E;
const MIX: u32 = 0x0F90_2007;

impl TopazCipher {
    /// Key the cipher with every byte of `key`. The book key and PIDs are
    /// both 8 bytes, but any length keys the state the same way.
    pub fn new(key: &[u8]) -> TopazCipher {
        let mut cipher = TopazCipher { v0: SEED, v1: 0 };
        for &k in key {
            cipher.clock(k);
        }
        cipher
    }

    fn clock(&mut self, plain: u8) {
        self.v1 = self.v0;
        self.v0 = (self.v0 >> 2)
            .wrapping_mul(self.v0 >> 7)
            ^ (plain as u32)
                .wrapping_mul(plain as u32)
                .wrapping_mul(MIX);
    }

    #[inline]
    fn keystream(&self) -> u8 {
        ((self.v0 >> 3) ^ (self.v1 << 3)) as u8
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for b in data {
            let m = *b ^ self.keystream();
            self.clock(m);
            *b = m;
        }
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        for b in data {
            let m = *b;
            *b = m ^ self.keystream();
            self.clock(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TopazCipher;
    use proptest::prelude::*;

    #[test]
    fn keystream_vector() {
        let mut data = [0u8; 8];
        TopazCipher::new(b"ABCDEFGH").encrypt(&mut data);
        assert_eq!(data, [0x0A, 0x7F, 0x84, 0xB2, 0xCF, 0xEF, 0x44, 0x3D]);
    }

    #[test]
    fn dkey_record_round_trip() {
        let mut record = *b"PID\x08ABCDEFGH\x08KEYSECRTpid";
        TopazCipher::new(b"ABCDEFGH").encrypt(&mut record);
        assert_eq!(
            record[..8],
            [0x5A, 0xD6, 0x5E, 0x04, 0x3E, 0xAA, 0x2C, 0x6C]
        );
        TopazCipher::new(b"ABCDEFGH").decrypt(&mut record);
        assert_eq!(&record, b"PID\x08ABCDEFGH\x08KEYSECRTpid");
    }

    #[test]
    fn same_key_and_message_give_the_same_stream() {
        let mut a = *b"deterministic";
        let mut b = a;
        TopazCipher::new(b"KEYSECRT").encrypt(&mut a);
        TopazCipher::new(b"KEYSECRT").encrypt(&mut b);
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn round_trip(key in prop::collection::vec(any::<u8>(), 1..16),
                      mut data in prop::collection::vec(any::<u8>(), 0..256)) {
            let original = data.clone();
            TopazCipher::new(&key).encrypt(&mut data);
            TopazCipher::new(&key).decrypt(&mut data);
            prop_assert_eq!(data, original);
        }
    }
}
