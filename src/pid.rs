//! Book PID derivation.
//!
//! The PID that seeds a book key is a SHA-1 over four pieces of material:
//! a device identifier built from the credential store's random-number
//! record, the volume serial and the user name; the account token record;
//! and the per-book key pointers carried by the container itself.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, info, warn};
use md5::{Digest, Md5};
use sha1_smol::Sha1;

use crate::credentials::{CredentialStore, Unprotect};
use crate::fingerprint;
use crate::mazama::{self, Alphabet};
use crate::platform::DeviceIdentity;
use crate::Result;

/// Derives candidate PIDs for a book from the credential store and the
/// device identity.
pub struct PidResolver<'a> {
    store: &'a CredentialStore,
    unprotect: &'a dyn Unprotect,
    identity: DeviceIdentity,
}

impl<'a> PidResolver<'a> {
    pub fn new(
        store: &'a CredentialStore,
        unprotect: &'a dyn Unprotect,
        identity: DeviceIdentity,
    ) -> PidResolver<'a> {
        PidResolver {
            store,
            unprotect,
            identity,
        }
    }

    /// The 8-character book PID for the key material carried by a
    /// container: `keys` is the raw key-pointer record, `keys_value` the
    /// concatenation of the token records it references.
    pub fn book_pid(&self, keys: &[u8], keys_value: &[u8]) -> Result<String> {
        debug!(
            "deriving PID for user {:?} on volume {}",
            self.identity.username, self.identity.volume_serial
        );
        let vsn = mazama::encode(&md5(self.identity.volume_serial.as_bytes()), Alphabet::Base32);
        let username = mazama::encode(&md5(self.identity.username.as_bytes()), Alphabet::Base32);
        let mrn_key = mazama::encode(&md5(b"MazamaRandomNumber"), Alphabet::Base64);
        let kat_key = mazama::encode(&md5(b"kindle.account.tokens"), Alphabet::Base64);

        let mut device_id = self.store.decrypt(&mrn_key, self.unprotect)?;
        device_id.extend_from_slice(vsn.as_bytes());
        device_id.extend_from_slice(username.as_bytes());
        let final_device_id = mazama::encode(&sha1(&device_id), Alphabet::Base32);
        info!(
            "device PID: {}",
            fingerprint::device_fingerprint(&final_device_id.as_bytes()[..4])
        );

        let account_tokens = self.store.decrypt(&kat_key, self.unprotect)?;

        let mut sha = Sha1::new();
        sha.update(final_device_id.as_bytes());
        sha.update(&account_tokens);
        sha.update(keys);
        sha.update(keys_value);

        let mut pid = STANDARD.encode(sha.digest().bytes());
        pid.truncate(8);
        Ok(pid)
    }

    /// Candidate list for a key search: the derived PID first, then the
    /// caller-supplied extras in order. Failing to derive a PID is only an
    /// error when there is no extra to fall back to.
    pub fn candidates(
        &self,
        keys: &[u8],
        keys_value: &[u8],
        extra: &[String],
    ) -> Result<Vec<String>> {
        let mut pids = Vec::with_capacity(extra.len() + 1);
        match self.book_pid(keys, keys_value) {
            Ok(pid) => {
                info!("book PID: {}", pid);
                pids.push(pid);
            }
            Err(err) if extra.is_empty() => return Err(err),
            Err(err) => warn!("could not derive a PID on this machine: {}", err),
        }
        pids.extend(extra.iter().cloned());
        Ok(pids)
    }
}

fn md5(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md5::digest(data));
    out
}

fn sha1(data: &[u8]) -> [u8; 20] {
    let mut sha = Sha1::new();
    sha.update(data);
    sha.digest().bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct Identity;

    impl Unprotect for Identity {
        fn unprotect(&self, blob: &[u8]) -> Result<Vec<u8>> {
            Ok(blob.to_vec())
        }
    }

    fn fixture_store() -> CredentialStore {
        // Values are sealed with the identity unprotector, so they are just
        // the mazama32 encoding of the plaintext blobs.
        let mrn_plain: Vec<u8> = b"x9YzAb0Cd1Ef2Gh3Jk4Mn5Pr6St7Uv8W"
            .iter()
            .chain(b"x9YzAb0Cd1Ef2Gh3Jk4Mn5Pr6St7Uv8W".iter())
            .cloned()
            .collect();
        let kat_plain = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdef";
        let mrn_key = mazama::encode(&md5(b"MazamaRandomNumber"), Alphabet::Base64);
        let kat_key = mazama::encode(&md5(b"kindle.account.tokens"), Alphabet::Base64);
        let file = format!(
            "{}:{}{{{}:{}",
            mrn_key,
            mazama::encode(&mrn_plain, Alphabet::Base32),
            kat_key,
            mazama::encode(kat_plain, Alphabet::Base32),
        );
        CredentialStore::from_bytes(file.as_bytes())
    }

    #[test]
    fn hash_primitives_match_reference_vectors() {
        assert_eq!(
            md5(b"abc"),
            [
                0x90, 0x01, 0x50, 0x98, 0x3C, 0xD2, 0x4F, 0xB0, 0xD6, 0x96, 0x3F, 0x7D, 0x28,
                0xE1, 0x7F, 0x72
            ]
        );
        assert_eq!(
            sha1(b"abc"),
            [
                0xA9, 0x99, 0x3E, 0x36, 0x47, 0x06, 0x81, 0x6A, 0xBA, 0x3E, 0x25, 0x71, 0x78,
                0x50, 0xC2, 0x6C, 0x9C, 0xD0, 0xD8, 0x9D
            ]
        );
    }

    #[test]
    fn derives_the_fixture_pid() {
        let store = fixture_store();
        let resolver =
            PidResolver::new(&store, &Identity, DeviceIdentity::new("1234567890", "alice"));
        let pid = resolver.book_pid(b"X", b"token").unwrap();
        assert_eq!(pid, "Ifz4I9QY");
        assert_eq!(fingerprint::pid_checksum(&pid), "I1");
        assert!(fingerprint::verify_pid_checksum(&format!("{}I1", pid)));
    }

    #[test]
    fn missing_store_is_fatal_without_extras() {
        let store = CredentialStore::from_bytes(b"");
        let resolver =
            PidResolver::new(&store, &Identity, DeviceIdentity::new("1234567890", "alice"));
        assert!(matches!(
            resolver.candidates(b"X", b"token", &[]),
            Err(Error::MissingCredential(_))
        ));
    }

    #[test]
    fn extras_cover_for_a_missing_store() {
        let store = CredentialStore::from_bytes(b"");
        let resolver =
            PidResolver::new(&store, &Identity, DeviceIdentity::new("1234567890", "alice"));
        let pids = resolver
            .candidates(b"X", b"token", &["ABCDEFGH".to_string()])
            .unwrap();
        assert_eq!(pids, ["ABCDEFGH"]);
    }

    #[test]
    fn derived_pid_comes_before_extras() {
        let store = fixture_store();
        let resolver =
            PidResolver::new(&store, &Identity, DeviceIdentity::new("1234567890", "alice"));
        let pids = resolver
            .candidates(b"X", b"token", &["ABCDEFGH".to_string()])
            .unwrap();
        assert_eq!(pids, ["Ifz4I9QY", "ABCDEFGH"]);
    }
}
