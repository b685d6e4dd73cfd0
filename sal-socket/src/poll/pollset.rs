use std::{io, time::Duration};

use tracing::trace;

use super::{ReadinessPoll, util};
use crate::connection::ConnectionId;

/// `poll(2)` over each window. Keeps no kernel state between calls.
pub struct PollSet {
  fds: Vec<libc::pollfd>,
  capacity: usize,
}

impl PollSet {
  pub fn new(capacity: usize) -> Self {
    Self { fds: Vec::with_capacity(capacity), capacity }
  }
}

impl ReadinessPoll for PollSet {
  fn capacity(&self) -> usize {
    self.capacity
  }

  fn poll_readable(
    &mut self,
    window: &[ConnectionId],
    ready: &mut Vec<ConnectionId>,
    timeout: Duration,
  ) -> io::Result<()> {
    ready.clear();
    if window.is_empty() {
      return Ok(());
    }
    debug_assert!(window.len() <= self.capacity);

    self.fds.clear();
    self.fds.extend(window.iter().map(|id| libc::pollfd {
      fd: id.raw_fd(),
      events: libc::POLLIN,
      revents: 0,
    }));

    let n = match syscall!(poll(
      self.fds.as_mut_ptr(),
      self.fds.len() as libc::nfds_t,
      util::timeout_to_millis(timeout),
    )) {
      Ok(n) => n,
      Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
      Err(err) => return Err(err),
    };

    if n == 0 {
      return Ok(());
    }

    for (pollfd, id) in self.fds.iter().zip(window) {
      if pollfd.revents & libc::POLLNVAL != 0 {
        trace!(%id, "skipping invalid handle");
        continue;
      }
      if pollfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
        ready.push(*id);
      }
    }

    Ok(())
  }
}
