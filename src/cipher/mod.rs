//! The two stream ciphers behind Kindle DRM: PC1 keys and decrypts
//! Mobipocket records, the two-word Topaz cipher covers Topaz payloads.
//!
//! Both are small value types that are keyed once and then stepped over a
//! message; state always starts from the same point, so a fresh cipher is
//! created per message.

mod pc1;
mod topaz;

pub use self::pc1::Pc1;
pub use self::topaz::TopazCipher;
