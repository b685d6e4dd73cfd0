//! Readiness polling over a bounded window of connections.
//!
//! The worker never hands a backend the whole registry. Each cycle it picks a
//! window of at most [`ReadinessPoll::capacity`] connections and asks which of
//! them have something to read. Backends that keep kernel-side state (epoll,
//! kqueue) synchronise that state with the window they're given, so the same
//! trait covers both stateless `poll(2)` and the registration-based APIs.
//!
//! | Backend  | Platforms         | Notes                              |
//! |----------|-------------------|------------------------------------|
//! | `Poll`   | all unix          | default, stateless `poll(2)`       |
//! | `Epoll`  | Linux             | level-triggered, `EPOLLRDHUP`      |
//! | `Kqueue` | macOS, iOS, BSDs  | `EVFILT_READ`, diffed per window   |

mod pollset;
mod util;

#[cfg(linux)]
mod epoll;
#[cfg(bsd)]
mod kqueue;

#[cfg(test)]
pub(crate) mod tests;

use std::{fmt, io, time::Duration};

use crate::connection::ConnectionId;

#[cfg(linux)]
pub use epoll::Epoll;
#[cfg(bsd)]
pub use kqueue::Kqueue;
pub use pollset::PollSet;

/// A readiness primitive that can check a bounded set of connections.
///
/// Readable means a read would not block: data is pending, the peer closed
/// its end, or the socket has an error to report.
pub trait ReadinessPoll: Send {
  /// Largest window this backend accepts in one call.
  fn capacity(&self) -> usize;

  /// Waits up to `timeout` for any member of `window` to become readable.
  ///
  /// `ready` is cleared and then filled with the readable members, in window
  /// order. An empty window returns immediately. Members whose handle is no
  /// longer valid are skipped rather than failing the whole call.
  fn poll_readable(
    &mut self,
    window: &[ConnectionId],
    ready: &mut Vec<ConnectionId>,
    timeout: Duration,
  ) -> io::Result<()>;
}

impl<P: ReadinessPoll + ?Sized> ReadinessPoll for Box<P> {
  fn capacity(&self) -> usize {
    (**self).capacity()
  }

  fn poll_readable(
    &mut self,
    window: &[ConnectionId],
    ready: &mut Vec<ConnectionId>,
    timeout: Duration,
  ) -> io::Result<()> {
    (**self).poll_readable(window, ready, timeout)
  }
}

/// Which readiness primitive a notifier's worker uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
  /// `poll(2)` over each window.
  #[default]
  Poll,
  /// A level-triggered epoll instance.
  #[cfg(linux)]
  Epoll,
  /// A kqueue with `EVFILT_READ` filters.
  #[cfg(bsd)]
  Kqueue,
}

impl Backend {
  /// Opens the backend, sized for windows of up to `capacity` connections.
  pub fn open(self, capacity: usize) -> io::Result<Box<dyn ReadinessPoll>> {
    Ok(match self {
      Self::Poll => Box::new(PollSet::new(capacity)),
      #[cfg(linux)]
      Self::Epoll => Box::new(Epoll::new(capacity)?),
      #[cfg(bsd)]
      Self::Kqueue => Box::new(Kqueue::new(capacity)?),
    })
  }
}

impl fmt::Display for Backend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Poll => "poll",
      #[cfg(linux)]
      Self::Epoll => "epoll",
      #[cfg(bsd)]
      Self::Kqueue => "kqueue",
    })
  }
}
