//! The `kindle.info` credentials store.
//!
//! The file is a run of `key:value` records separated by `{` bytes. Keys
//! are the mazama64 encoding of the MD5 of a semantic name; values are the
//! mazama64 encoding of a blob sealed to the installing user with the OS
//! data-protection service. The store keeps values sealed and decrypts on
//! demand through an [`Unprotect`] implementation.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use log::{info, warn};

use crate::{mazama, Error, Result};

/// Semantic names of the known credential keys, by their encoded form.
const KNOWN_KEYS: &[(&str, &str)] = &[
    ("AbaZZ6z4a7ZxzLzkZcaqauZMZjZ_Ztz6", "kindle.account.tokens"),
    ("AsAWa4ZJAQaCZ7A3zrZSaZavZMarZFAw", "kindle.cookie.item"),
    ("ZHatAla4a-zTzWA-AvaeAvZQzKZ-agAz", "eulaVersionAccepted"),
    ("ZiajZga7Z9zjZRz7AfZ-zRzUANZNZJzP", "login_date"),
    ("ZkzeAUA-Z2ZYA2Z_ayA_ahZEATaEAOaG", "kindle.token.item"),
    ("aVzrzRAFZ7aIzmASZOzVzIAGAKawzwaU", "login"),
    ("avalzbzkAcAPAQA5ApZgaOZPzQZzaiaO", "MazamaRandomNumber"),
    ("zgACzqAjZ2zzAmAJa6ZFaZALaYAlZrz-", "kindle.key.item"),
    ("zga-aIANZPzbzfZ1zHZWZcA4afZMZcA_", "kindle.name.info"),
    ("zlZ9afz1AfAVZjacaqa-ZHa1aIa_ajz7", "kindle.device.info"),
];

/// Translate an encoded credential key to its semantic name.
pub fn translate_key(key: &str) -> Option<&'static str> {
    KNOWN_KEYS
        .iter()
        .find(|(encoded, _)| *encoded == key)
        .map(|(_, name)| *name)
}

/// User-bound decryption of a sealed credential value.
///
/// On Windows this is the DPAPI `CryptUnprotectData` call that ties the
/// store to the installing user and machine; tests and foreign platforms
/// substitute their own implementation.
pub trait Unprotect {
    fn unprotect(&self, blob: &[u8]) -> Result<Vec<u8>>;
}

/// Sealed `key -> value` records of a `kindle.info` file, in file order.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: IndexMap<String, String>,
}

impl CredentialStore {
    pub fn load(path: &Path) -> Result<CredentialStore> {
        let data = fs::read(path).map_err(|err| {
            Error::MissingCredential(format!("cannot read {}: {}", path.display(), err))
        })?;
        Ok(CredentialStore::from_bytes(&data))
    }

    /// Records are separated by `{`; anything of two bytes or fewer, or
    /// without a `:`, is discarded.
    pub fn from_bytes(data: &[u8]) -> CredentialStore {
        let mut entries = IndexMap::new();
        for record in data.split(|&b| b == b'{') {
            if record.len() <= 2 {
                continue;
            }
            let colon = match record.iter().position(|&b| b == b':') {
                Some(i) => i,
                None => continue,
            };
            let key = String::from_utf8_lossy(&record[..colon]).into_owned();
            let value = String::from_utf8_lossy(&record[colon + 1..]).into_owned();
            entries.insert(key, value);
        }
        CredentialStore { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unseal the value stored under `key`.
    pub fn decrypt(&self, key: &str, unprotect: &dyn Unprotect) -> Result<Vec<u8>> {
        let value = self.get(key).ok_or_else(|| {
            let name = translate_key(key).unwrap_or(key);
            Error::MissingCredential(format!("no {:?} record in the credentials file", name))
        })?;
        let blob = mazama::decode(value).ok_or_else(|| {
            Error::Unprotect(format!("value of {:?} is not valid mazama text", key))
        })?;
        unprotect.unprotect(&blob)
    }

    /// Dump every record to the log, decrypted where possible. Entries that
    /// fail to unseal are reported and skipped.
    pub fn dump(&self, unprotect: &dyn Unprotect) {
        info!("credentials file holds {} records", self.len());
        for (key, _) in &self.entries {
            let name = translate_key(key).unwrap_or("?");
            match self.decrypt(key, unprotect) {
                Ok(plain) => {
                    info!("{} ({}): {}", key, name, String::from_utf8_lossy(&plain))
                }
                Err(err) => warn!("{} ({}): {}", key, name, err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity;

    impl Unprotect for Identity {
        fn unprotect(&self, blob: &[u8]) -> Result<Vec<u8>> {
            Ok(blob.to_vec())
        }
    }

    #[test]
    fn parses_brace_separated_records() {
        let store =
            CredentialStore::from_bytes(b"alpha:one{beta:two{x{{ab:{gamma:three");
        assert_eq!(store.len(), 4);
        assert_eq!(store.get("alpha"), Some("one"));
        assert_eq!(store.get("beta"), Some("two"));
        assert_eq!(store.get("ab"), Some(""));
        assert_eq!(store.get("gamma"), Some("three"));
        // records of two bytes or fewer are discarded
        assert_eq!(store.get("x"), None);
    }

    #[test]
    fn later_records_overwrite_in_place() {
        let store = CredentialStore::from_bytes(b"key:old{other:kept{key:new");
        assert_eq!(store.get("key"), Some("new"));
        let order: Vec<&str> = store.entries.keys().map(String::as_str).collect();
        assert_eq!(order, ["key", "other"]);
    }

    #[test]
    fn decrypt_requires_the_record() {
        let store = CredentialStore::from_bytes(b"");
        match store.decrypt("avalzbzkAcAPAQA5ApZgaOZPzQZzaiaO", &Identity) {
            Err(Error::MissingCredential(msg)) => {
                assert!(msg.contains("MazamaRandomNumber"))
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn decrypt_unseals_mazama_values() {
        // "6n" is the mazama32 encoding of a single zero byte.
        let store = CredentialStore::from_bytes(b"somekey:6n6n");
        let plain = store.decrypt("somekey", &Identity).unwrap();
        assert_eq!(plain, [0, 0]);
    }

    #[test]
    fn translates_known_keys() {
        assert_eq!(
            translate_key("avalzbzkAcAPAQA5ApZgaOZPzQZzaiaO"),
            Some("MazamaRandomNumber")
        );
        assert_eq!(translate_key("nope"), None);
    }
}
