//! OS-bound inputs to PID derivation: the current user name, the system
//! volume serial number, and native user-bound decryption of sealed
//! credential values.

#[cfg(not(windows))]
use crate::credentials::Unprotect;
use crate::{Error, Result};

/// The serial used when the system volume cannot be queried.
const FALLBACK_VOLUME_SERIAL: &str = "9999999999";

/// The machine- and account-specific inputs to PID derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Decimal-formatted serial number of the system volume.
    pub volume_serial: String,
    /// Name of the OS user that installed the reader application.
    pub username: String,
}

impl DeviceIdentity {
    pub fn new(volume_serial: impl Into<String>, username: impl Into<String>) -> DeviceIdentity {
        DeviceIdentity {
            volume_serial: volume_serial.into(),
            username: username.into(),
        }
    }

    /// Identity of the running session. The volume serial falls back to a
    /// fixed placeholder when the query fails; a missing user name is an
    /// error because no meaningful PID can be derived without it.
    pub fn current() -> Result<DeviceIdentity> {
        let username = current_username().ok_or_else(|| {
            Error::MissingCredential("cannot determine the current user name".into())
        })?;
        let volume_serial =
            volume_serial().unwrap_or_else(|| FALLBACK_VOLUME_SERIAL.to_string());
        Ok(DeviceIdentity::new(volume_serial, username))
    }
}

/// User-bound decryption as provided by the operating system. Only Windows
/// has the DPAPI service the reader application seals its values with;
/// elsewhere every call fails and the caller falls back to supplied PIDs.
#[derive(Debug, Default)]
pub struct NativeUnprotect;

#[cfg(not(windows))]
impl Unprotect for NativeUnprotect {
    fn unprotect(&self, _blob: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Unprotect(
            "user-bound decryption is only available on Windows".into(),
        ))
    }
}

#[cfg(not(windows))]
fn current_username() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.is_empty())
}

#[cfg(not(windows))]
fn volume_serial() -> Option<String> {
    None
}

#[cfg(windows)]
mod windows {
    use std::ffi::c_void;
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;

    use super::NativeUnprotect;
    use crate::credentials::Unprotect;
    use crate::{Error, Result};

    use windows_sys::Win32::Foundation::LocalFree;
    use windows_sys::Win32::Security::Cryptography::{CryptUnprotectData, CRYPT_INTEGER_BLOB};
    use windows_sys::Win32::Storage::FileSystem::GetVolumeInformationW;
    use windows_sys::Win32::System::WindowsProgramming::GetUserNameW;

    const CRYPTPROTECT_UI_FORBIDDEN: u32 = 0x1;

    fn wide(s: &OsStr) -> Vec<u16> {
        s.encode_wide().chain(std::iter::once(0)).collect()
    }

    impl Unprotect for NativeUnprotect {
        fn unprotect(&self, blob: &[u8]) -> Result<Vec<u8>> {
            let input = CRYPT_INTEGER_BLOB {
                cbData: blob.len() as u32,
                pbData: blob.as_ptr() as *mut u8,
            };
            let mut output = CRYPT_INTEGER_BLOB {
                cbData: 0,
                pbData: ptr::null_mut(),
            };
            let ok = unsafe {
                CryptUnprotectData(
                    &input,
                    ptr::null_mut(),
                    ptr::null(),
                    ptr::null_mut(),
                    ptr::null(),
                    CRYPTPROTECT_UI_FORBIDDEN,
                    &mut output,
                )
            };
            if ok == 0 {
                return Err(Error::Unprotect(
                    "CryptUnprotectData refused the value (wrong user or machine?)".into(),
                ));
            }
            let plain = unsafe {
                std::slice::from_raw_parts(output.pbData, output.cbData as usize).to_vec()
            };
            unsafe {
                LocalFree(output.pbData as *mut c_void);
            }
            Ok(plain)
        }
    }

    pub(super) fn current_username() -> Option<String> {
        let mut buf = [0u16; 256];
        let mut len = buf.len() as u32;
        let ok = unsafe { GetUserNameW(buf.as_mut_ptr(), &mut len) };
        if ok == 0 || len == 0 {
            return None;
        }
        // len includes the terminating NUL
        Some(String::from_utf16_lossy(&buf[..len as usize - 1]))
    }

    pub(super) fn volume_serial() -> Option<String> {
        let drive = std::env::var_os("SystemDrive")
            .map(|mut d| {
                d.push("\\");
                d
            })
            .unwrap_or_else(|| "c:\\".into());
        let root = wide(&drive);
        let mut serial = 0u32;
        let ok = unsafe {
            GetVolumeInformationW(
                root.as_ptr(),
                ptr::null_mut(),
                0,
                &mut serial,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                0,
            )
        };
        if ok == 0 {
            return None;
        }
        Some(serial.to_string())
    }
}

#[cfg(windows)]
use self::windows::{current_username, volume_serial};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_identity() {
        let id = DeviceIdentity::new("1234567890", "alice");
        assert_eq!(id.volume_serial, "1234567890");
        assert_eq!(id.username, "alice");
    }

    #[cfg(not(windows))]
    #[test]
    fn native_unprotect_is_unavailable_off_windows() {
        assert!(matches!(
            NativeUnprotect.unprotect(b"blob"),
            Err(Error::Unprotect(_))
        ));
    }
}
