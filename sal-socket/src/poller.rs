use std::{
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, warn};

use crate::{
  config::Config,
  connection::ConnectionId,
  dispatch::{self, Outcome, ScratchBuffer},
  poll::ReadinessPoll,
  registry::Registry,
};

/// Snapshot of a notifier's worker activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
  /// Poll cycles completed since the notifier was built.
  pub cycles: u64,
  /// Callbacks invoked, including ones that panicked.
  pub dispatches: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
  cycles: AtomicU64,
  dispatches: AtomicU64,
}

impl Counters {
  pub(crate) fn snapshot(&self) -> Stats {
    Stats {
      cycles: self.cycles.load(Ordering::Relaxed),
      dispatches: self.dispatches.load(Ordering::Relaxed),
    }
  }
}

/// The worker side of a notifier: windows the registry, polls, dispatches.
pub(crate) struct PollLoop<P> {
  registry: Arc<Registry>,
  poller: P,
  window: Vec<ConnectionId>,
  ready: Vec<ConnectionId>,
  scratch: ScratchBuffer,
  capacity: usize,
  poll_timeout: Duration,
  counters: Arc<Counters>,
}

impl<P: ReadinessPoll> PollLoop<P> {
  pub(crate) fn new(
    registry: Arc<Registry>,
    poller: P,
    config: &Config,
    counters: Arc<Counters>,
  ) -> Self {
    let capacity = config.window().min(poller.capacity()).max(1);
    Self {
      registry,
      poller,
      window: Vec::with_capacity(capacity),
      ready: Vec::with_capacity(capacity),
      scratch: ScratchBuffer::new(config.buffer_size()),
      capacity,
      poll_timeout: config.poll_timeout(),
      counters,
    }
  }

  /// Takes the next window from the registry, wrapping around once the
  /// cursor has passed the last entry.
  fn fill_window(&mut self) {
    self.window.clear();
    self.window.extend(self.registry.iter().take(self.capacity).map(|conn| conn.id()));

    if self.registry.is_exhausted() {
      self.registry.reset_cursor();
    }
  }

  /// One poll cycle. Returns the number of callbacks invoked.
  pub(crate) fn run_once(&mut self) -> usize {
    self.fill_window();
    self.counters.cycles.fetch_add(1, Ordering::Relaxed);

    if self.window.is_empty() {
      return 0;
    }

    if let Err(err) = self.poller.poll_readable(&self.window, &mut self.ready, self.poll_timeout) {
      warn!(%err, window = self.window.len(), "readiness check failed");
      self.ready.clear();
      return 0;
    }

    let mut dispatched = 0;
    for id in &self.ready {
      // Unregistered between the scan and now.
      let Some(conn) = self.registry.get(*id) else {
        continue;
      };

      if dispatch::dispatch(&conn, &mut self.scratch) != Outcome::Skipped {
        dispatched += 1;
      }
    }

    self.counters.dispatches.fetch_add(dispatched as u64, Ordering::Relaxed);
    dispatched
  }

  /// Cycles until a stop message arrives or every sender is gone.
  pub(crate) fn run(mut self, stop: Receiver<()>, idle: Duration) {
    debug!(window = self.capacity, buffer = self.scratch.len(), "notification worker started");

    loop {
      match stop.try_recv() {
        Err(TryRecvError::Empty) => {}
        Ok(()) | Err(TryRecvError::Disconnected) => break,
      }

      self.run_once();

      match stop.recv_timeout(idle) {
        Err(RecvTimeoutError::Timeout) => {}
        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
      }
    }

    debug!(stats = ?self.counters.snapshot(), "notification worker stopped");
  }
}
