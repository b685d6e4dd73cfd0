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

/// kqueue with one `EVFILT_READ` filter per window member.
///
/// Filters are level-triggered (no `EV_CLEAR`), so pending data keeps being
/// reported until it is read.
pub struct Kqueue {
  kq_fd: OwnedFd,
  events: Vec<libc::kevent>,
  watched: HashMap<RawFd, ConnectionId>,
  wanted: HashMap<RawFd, ConnectionId>,
  hits: HashSet<RawFd>,
  capacity: usize,
}

// SAFETY: `udata` pointers in the event buffer are never set or dereferenced.
unsafe impl Send for Kqueue {}

fn read_filter(fd: RawFd, flags: u16) -> libc::kevent {
  // Zeroed first, the field set differs between BSDs.
  let mut kev: libc::kevent = unsafe { std::mem::zeroed() };
  kev.ident = fd as libc::uintptr_t;
  kev.filter = libc::EVFILT_READ;
  kev.flags = flags as _;
  kev
}

impl Kqueue {
  pub fn new(capacity: usize) -> io::Result<Self> {
    let kq_fd = unsafe { OwnedFd::from_raw_fd(syscall!(kqueue())?) };
    syscall!(fcntl(kq_fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;

    Ok(Self {
      kq_fd,
      events: vec![unsafe { std::mem::zeroed() }; capacity.max(1)],
      watched: HashMap::with_capacity(capacity),
      wanted: HashMap::with_capacity(capacity),
      hits: HashSet::with_capacity(capacity),
      capacity,
    })
  }

  fn change(&self, fd: RawFd, flags: u16) -> io::Result<()> {
    let kev = read_filter(fd, flags);
    syscall!(kevent(
      self.kq_fd.as_raw_fd(),
      &kev as *const libc::kevent,
      1,
      ptr::null_mut(),
      0,
      ptr::null(),
    ))?;
    Ok(())
  }

  fn sync(&mut self, window: &[ConnectionId]) {
    self.wanted.clear();
    self.wanted.extend(window.iter().map(|id| (id.raw_fd(), *id)));

    let stale: Vec<RawFd> =
      self.watched.keys().filter(|fd| !self.wanted.contains_key(fd)).copied().collect();
    for fd in stale {
      self.watched.remove(&fd);
      if let Err(err) = self.change(fd, libc::EV_DELETE as u16)
        && !util::is_not_found_error(&err)
      {
        trace!(fd, %err, "kqueue delete failed");
      }
    }

    for id in window {
      let fd = id.raw_fd();
      if self.watched.get(&fd) == Some(id) {
        continue;
      }

      // EV_ADD on an existing filter updates it in place.
      match self.change(fd, (libc::EV_ADD | libc::EV_ENABLE) as u16) {
        Ok(()) => {
          self.watched.insert(fd, *id);
        }
        Err(err) => {
          self.watched.remove(&fd);
          trace!(%id, %err, "skipping handle kqueue rejected");
        }
      }
    }
  }
}

impl ReadinessPoll for Kqueue {
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

    let timeout = util::duration_to_timespec(timeout);
    let n = match syscall!(kevent(
      self.kq_fd.as_raw_fd(),
      ptr::null(),
      0,
      self.events.as_mut_ptr(),
      self.events.len() as libc::c_int,
      &timeout as *const libc::timespec,
    )) {
      Ok(n) => n as usize,
      Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
      Err(err) => return Err(err),
    };

    self.hits.clear();
    self.hits.extend(
      self.events[..n]
        .iter()
        .filter(|kev| kev.filter == libc::EVFILT_READ)
        .map(|kev| kev.ident as RawFd),
    );

    ready.extend(window.iter().filter(|id| self.hits.contains(&id.raw_fd())));
    Ok(())
  }
}
