//! DRM removal for Mobipocket/PRC and Topaz/TPZ e-books bought with the
//! Kindle for PC reader, written in Rust.
//!
//! The per-device PID is derived from the reader's `kindle.info`
//! credentials file together with the current user and system volume; the
//! PID then unlocks the per-book key material embedded in the container
//! itself. Containers are rewritten record for record with the content in
//! cleartext and the DRM structures scrubbed.
//!
//! ## Example
//! ```no_run
//! use unkindle::{CredentialStore, DeviceIdentity, PidResolver};
//! use unkindle::platform::NativeUnprotect;
//!
//! fn main() -> unkindle::Result<()> {
//!     let store = CredentialStore::load("kindle.info".as_ref())?;
//!     let identity = DeviceIdentity::current()?;
//!     let resolver = PidResolver::new(&store, &NativeUnprotect, identity);
//!
//!     let data = std::fs::read("book.azw")?;
//!     let mut out = Vec::new();
//!     unkindle::strip(&data, &mut out, &resolver, &[], false)?;
//!     std::fs::write("book-clear.azw", &out)?;
//!     Ok(())
//! }
//! ```

pub mod cipher;
pub mod credentials;
pub(crate) mod error;
pub mod fingerprint;
pub mod mazama;
pub mod mobi;
pub mod pid;
pub mod platform;
pub(crate) mod reader;
pub mod topaz;
pub(crate) mod writer;

pub use crate::credentials::{CredentialStore, Unprotect};
pub use crate::error::{Error, Result};
pub use crate::pid::PidResolver;
pub use crate::platform::DeviceIdentity;

use std::io;

/// Container families the tool understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Mobi,
    Topaz,
}

impl FileKind {
    /// Classify a file image by its leading bytes: a Palm database typed
    /// `BOOK`/`MOBI`, or the `TPZ0` magic.
    pub fn sniff(data: &[u8]) -> Result<FileKind> {
        if data.len() >= 68 && &data[60..64] == b"BOOK" && &data[64..68] == b"MOBI" {
            Ok(FileKind::Mobi)
        } else if data.len() >= 4 && &data[..4] == b"TPZ0" {
            Ok(FileKind::Topaz)
        } else {
            Err(Error::UnknownFormat)
        }
    }
}

/// Strip DRM from a container image, routing it to the matching engine.
/// `extra_pids` are tried after the PID derived from this machine;
/// `explode` additionally decompresses Topaz payload records.
pub fn strip<W: io::Write>(
    data: &[u8],
    out: W,
    resolver: &PidResolver,
    extra_pids: &[String],
    explode: bool,
) -> Result<()> {
    match FileKind::sniff(data)? {
        FileKind::Mobi => mobi::strip(data, out, resolver, extra_pids),
        FileKind::Topaz => topaz::strip(data, out, resolver, extra_pids, explode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_mobi() {
        let mut data = vec![0u8; 80];
        data[60..64].copy_from_slice(b"BOOK");
        data[64..68].copy_from_slice(b"MOBI");
        assert_eq!(FileKind::sniff(&data).unwrap(), FileKind::Mobi);
    }

    #[test]
    fn sniffs_topaz() {
        assert_eq!(FileKind::sniff(b"TPZ0\x00\x64").unwrap(), FileKind::Topaz);
    }

    #[test]
    fn rejects_unknown_input() {
        assert!(matches!(
            FileKind::sniff(b"PK\x03\x04"),
            Err(Error::UnknownFormat)
        ));
        assert!(matches!(FileKind::sniff(b""), Err(Error::UnknownFormat)));
    }
}
