use std::{io, time::Duration};

/// Converts a timeout to whole milliseconds for `poll(2)` and `epoll_wait`.
///
/// Rounds up, so a sub-millisecond timeout still waits instead of degrading
/// into a busy loop. Saturates at `c_int::MAX`.
pub(crate) fn timeout_to_millis(timeout: Duration) -> libc::c_int {
  let nanos = timeout.as_nanos();
  let millis = nanos.div_ceil(1_000_000);
  millis.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(bsd)]
pub(crate) fn duration_to_timespec(duration: Duration) -> libc::timespec {
  libc::timespec {
    tv_sec: duration.as_secs() as libc::time_t,
    tv_nsec: duration.subsec_nanos() as libc::c_long,
  }
}

/// Whether a deregistration failed only because the kernel already forgot
/// the handle.
///
/// Closing a socket drops its epoll/kqueue registration, so deleting it later
/// reports `ENOENT` (or `EBADF` once the descriptor is gone).
pub(crate) fn is_not_found_error(err: &io::Error) -> bool {
  matches!(err.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF))
}
