use std::{
  collections::{HashMap, HashSet},
  io,
  os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
  ptr,
  time::Duration,
};

use tracing::trace;

use super::{ReadinessPoll, util};
use crate::connection::ConnectionId;

const INTEREST: u32 = (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;

/// Level-triggered epoll instance whose interest set follows the window.
///
/// Each call diffs the window against what is registered: handles that left
/// the window are deleted, new ones are added, and a handle whose connection
/// changed (descriptor reuse) is re-armed.
pub struct Epoll {
  epoll_fd: OwnedFd,
  events: Vec<libc::epoll_event>,
  watched: HashMap<RawFd, ConnectionId>,
  wanted: HashMap<RawFd, ConnectionId>,
  hits: HashSet<RawFd>,
  capacity: usize,
}

impl Epoll {
  pub fn new(capacity: usize) -> io::Result<Self> {
    let epoll_fd = unsafe {
      let fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
      OwnedFd::from_raw_fd(fd)
    };

    Ok(Self {
      epoll_fd,
      events: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
      watched: HashMap::with_capacity(capacity),
      wanted: HashMap::with_capacity(capacity),
      hits: HashSet::with_capacity(capacity),
      capacity,
    })
  }

  fn ctl(&self, op: libc::c_int, fd: RawFd) -> io::Result<()> {
    let mut event = libc::epoll_event { events: INTEREST, u64: fd as u64 };
    let event_ptr = if op == libc::EPOLL_CTL_DEL { ptr::null_mut() } else { &mut event as *mut _ };
    syscall!(epoll_ctl(self.epoll_fd.as_raw_fd(), op, fd, event_ptr))?;
    Ok(())
  }

  fn arm(&self, fd: RawFd, known: bool) -> io::Result<()> {
    let (first, fallback, retry_on) = if known {
      (libc::EPOLL_CTL_MOD, libc::EPOLL_CTL_ADD, libc::ENOENT)
    } else {
      (libc::EPOLL_CTL_ADD, libc::EPOLL_CTL_MOD, libc::EEXIST)
    };

    match self.ctl(first, fd) {
      Err(err) if err.raw_os_error() == Some(retry_on) => self.ctl(fallback, fd),
      other => other,
    }
  }

  fn sync(&mut self, window: &[ConnectionId]) {
    self.wanted.clear();
    self.wanted.extend(window.iter().map(|id| (id.raw_fd(), *id)));

    let stale: Vec<RawFd> =
      self.watched.keys().filter(|fd| !self.wanted.contains_key(fd)).copied().collect();
    for fd in stale {
      self.watched.remove(&fd);
      if let Err(err) = self.ctl(libc::EPOLL_CTL_DEL, fd)
        && !util::is_not_found_error(&err)
      {
        trace!(fd, %err, "epoll delete failed");
      }
    }

    for id in window {
      let fd = id.raw_fd();
      let known = match self.watched.get(&fd) {
        Some(current) if current == id => continue,
        Some(_) => true,
        None => false,
      };

      match self.arm(fd, known) {
        Ok(()) => {
          self.watched.insert(fd, *id);
        }
        Err(err) => {
          self.watched.remove(&fd);
          trace!(%id, %err, "skipping handle epoll rejected");
        }
      }
    }
  }
}

impl ReadinessPoll for Epoll {
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
    self.sync(window);
    if window.is_empty() {
      return Ok(());
    }

    let n = match syscall!(epoll_wait(
      self.epoll_fd.as_raw_fd(),
      self.events.as_mut_ptr(),
      self.events.len() as libc::c_int,
      util::timeout_to_millis(timeout),
    )) {
      Ok(n) => n as usize,
      Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
      Err(err) => return Err(err),
    };

    self.hits.clear();
    self.hits.extend(self.events[..n].iter().map(|event| event.u64 as RawFd));

    ready.extend(window.iter().filter(|id| self.hits.contains(&id.raw_fd())));
    Ok(())
  }
}
