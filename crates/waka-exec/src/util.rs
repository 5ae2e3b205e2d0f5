use std::process::ExitStatus;

use waka_model::ExecStatus;

/// Map a finished child to the status clients see.
///
/// A normal exit keeps its code. Death by signal `N` becomes `128 + N`, the
/// shell convention.
pub(crate) fn exit_status(status: ExitStatus) -> ExecStatus {
    if let Some(code) = status.code() {
        return ExecStatus::new(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExecStatus::new(128 + sig);
        }
    }

    ExecStatus::FAILURE
}

/// Send `sig` to every process in group `pgid`.
#[cfg(unix)]
pub(crate) fn signal_group(pgid: u32, sig: libc::c_int) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;

    let rc = unsafe { libc::kill(-pgid, sig) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Strip one trailing `\n` or `\r\n` and decode lossily.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
