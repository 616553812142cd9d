use rama::telemetry::tracing;

pub use libc::rlim_t;

/// Raise the soft `RLIMIT_NOFILE` limit of this process towards `target`.
///
/// Every live worker may hold a connection open, so a large pool can run
/// out of file descriptors well before it runs out of anything else.
/// The soft limit is never raised above the hard limit, nor lowered.
pub fn raise_nofile(target: rlim_t) -> std::io::Result<()> {
    use std::{io, mem};

    // SAFETY: `lim` is a plain C struct that getrlimit fully initialises
    // before we read it, and setrlimit only reads from it.
    unsafe {
        let mut lim: libc::rlimit = mem::zeroed();
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) != 0 {
            return Err(io::Error::last_os_error());
        }

        let soft = target.min(lim.rlim_max);
        if lim.rlim_cur >= soft {
            tracing::debug!(
                current = lim.rlim_cur,
                requested = soft,
                "nofile limit already sufficient",
            );
            return Ok(());
        }

        let previous = lim.rlim_cur;
        lim.rlim_cur = soft;
        if libc::setrlimit(libc::RLIMIT_NOFILE, &lim) != 0 {
            return Err(io::Error::last_os_error());
        }

        tracing::info!(previous, current = soft, "raised nofile soft limit");
    }

    Ok(())
}
