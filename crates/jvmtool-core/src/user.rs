//! OS account resolution.
//!
//! Uses the reentrant `getpwnam_r`/`getpwuid_r` calls so lookups are safe
//! from any thread.

use std::ffi::{CStr, CString};
use std::io;
use std::mem::MaybeUninit;
use std::ptr;

use tracing::debug;

use crate::error::{UserError, UserResult};

/// Initial size of the buffer handed to `getpw*_r`.
const INITIAL_BUFFER_SIZE: usize = 1024;

/// Upper bound for the buffer; entries larger than this are treated as errors.
const MAX_BUFFER_SIZE: usize = 1 << 20;

/// Resolves the user to operate as.
///
/// - `None` resolves to the effective user of this process.
/// - `Some(name)` is returned unchanged if the account exists, otherwise
///   `UserError::UnknownUser`.
pub fn resolve_user(name: Option<&str>) -> UserResult<String> {
    match name {
        None | Some("") => current_user(),
        Some(name) => {
            if user_exists(name)? {
                Ok(name.to_string())
            } else {
                Err(UserError::UnknownUser {
                    name: name.to_string(),
                })
            }
        }
    }
}

/// Returns the name of the effective user of this process.
pub fn current_user() -> UserResult<String> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let uid = unsafe { libc::geteuid() };
    let label = uid.to_string();
    let found = with_passwd_buffer(&label, |pwd, buf, result| {
        // SAFETY: all pointers come from live, correctly sized allocations.
        unsafe { libc::getpwuid_r(uid, pwd, buf.as_mut_ptr(), buf.len(), result) }
    })?;
    found.ok_or(UserError::NoCurrentUser { uid })
}

/// Returns whether an account named `name` exists.
pub fn user_exists(name: &str) -> UserResult<bool> {
    let c_name = CString::new(name).map_err(|_| UserError::InvalidName {
        name: name.to_string(),
    })?;
    let found = with_passwd_buffer(name, |pwd, buf, result| {
        // SAFETY: c_name outlives the call; other pointers are live allocations.
        unsafe { libc::getpwnam_r(c_name.as_ptr(), pwd, buf.as_mut_ptr(), buf.len(), result) }
    })?;
    debug!(user = name, exists = found.is_some(), "Looked up user");
    Ok(found.is_some())
}

/// Runs a `getpw*_r` call, growing the scratch buffer on `ERANGE`.
///
/// Returns the account name on success, `None` when no entry exists.
fn with_passwd_buffer<F>(label: &str, mut call: F) -> UserResult<Option<String>>
where
    F: FnMut(*mut libc::passwd, &mut [libc::c_char], *mut *mut libc::passwd) -> libc::c_int,
{
    let mut size = INITIAL_BUFFER_SIZE;
    loop {
        let mut buf: Vec<libc::c_char> = vec![0; size];
        let mut pwd = MaybeUninit::<libc::passwd>::zeroed();
        let mut result: *mut libc::passwd = ptr::null_mut();

        let rc = call(pwd.as_mut_ptr(), buf.as_mut_slice(), ptr::addr_of_mut!(result));

        if rc == libc::ERANGE && size < MAX_BUFFER_SIZE {
            size *= 2;
            continue;
        }

        // Several libcs report "no such entry" through an errno instead of a
        // null result.
        if rc == libc::ENOENT || rc == libc::ESRCH || rc == libc::EBADF || rc == libc::EPERM {
            return Ok(None);
        }

        if rc != 0 {
            return Err(UserError::Lookup {
                name: label.to_string(),
                source: io::Error::from_raw_os_error(rc),
            });
        }

        if result.is_null() {
            return Ok(None);
        }

        // SAFETY: a non-null result points at `pwd`, whose string fields
        // point into `buf`, both still alive here.
        let name = unsafe {
            let entry = &*result;
            if entry.pw_name.is_null() {
                return Ok(None);
            }
            CStr::from_ptr(entry.pw_name).to_string_lossy().into_owned()
        };
        return Ok(Some(name));
    }
}
