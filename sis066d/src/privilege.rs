//! Privilege drop after listener binding: bind to
//! privileged ports as root, then drop to an unprivileged `uid:gid` before
//! accepting any connection. Follows the "wrap one raw libc syscall, check
//! its return code" idiom used throughout this codebase for direct
//! `libc` calls.

use sis066_core::error::{Result, Sis066Error};

/// Parse and apply a `<uid>:<gid>` directive. Group is dropped before user,
/// since `setuid` on a non-root-owned process can no longer change group.
pub fn drop_privileges(uid_gid: &str) -> Result<()> {
    let (uid_s, gid_s) = uid_gid
        .split_once(':')
        .ok_or_else(|| Sis066Error::Config(format!("--uid-gid {uid_gid:?} must be <uid>:<gid>")))?;
    let uid: libc::uid_t = uid_s
        .parse()
        .map_err(|_| Sis066Error::Config(format!("invalid uid {uid_s:?}")))?;
    let gid: libc::gid_t = gid_s
        .parse()
        .map_err(|_| Sis066Error::Config(format!("invalid gid {gid_s:?}")))?;

    // Safety: setgid/setuid take plain integers and the only failure mode is
    // a nonzero return, checked immediately below.
    let gid_ret = unsafe { libc::setgid(gid) };
    if gid_ret != 0 {
        return Err(Sis066Error::Fatal(format!(
            "setgid({gid}) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    let uid_ret = unsafe { libc::setuid(uid) };
    if uid_ret != 0 {
        return Err(Sis066Error::Fatal(format!(
            "setuid({uid}) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    tracing::info!(uid, gid, "dropped privileges");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_directive_is_rejected_before_any_syscall() {
        assert!(matches!(drop_privileges("not-a-uid-gid-pair"), Err(Sis066Error::Config(_))));
    }

    #[test]
    fn non_numeric_uid_is_rejected() {
        assert!(matches!(drop_privileges("nobody:65534"), Err(Sis066Error::Config(_))));
    }
}
