use std::{
  fmt,
  sync::Arc,
  thread::{self, JoinHandle},
};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::{
  Connection, Error,
  config::{Builder, Config},
  poller::{Counters, PollLoop, Stats},
  registry::Registry,
  sync::Mutex,
};

/// Delivers inbound data to per-connection callbacks from a background thread.
///
/// The worker is started lazily by the first
/// [`set_read_callback`](Self::set_read_callback) and stopped by
/// [`shutdown`](Self::shutdown) or on drop. After a shutdown the notifier can
/// be used again; the next registration starts a fresh worker.
///
/// ```no_run
/// use sal_socket::{Connection, Notifier};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let notifier = Notifier::new();
/// let conn = Connection::connect("localhost", 7000)?;
///
/// notifier.set_read_callback(&conn, |data: &[u8]| {
///   if data.is_empty() {
///     println!("peer went away");
///   } else {
///     println!("got {} bytes", data.len());
///   }
/// })?;
///
/// conn.write(b"hello")?;
/// # Ok(())
/// # }
/// ```
pub struct Notifier {
  config: Config,
  state: Mutex<Option<Running>>,
  /// A worker stopped from its own thread, joined by the next `shutdown` or
  /// `set_read_callback` made elsewhere.
  detached: Mutex<Option<JoinHandle<()>>>,
  counters: Arc<Counters>,
}

struct Running {
  registry: Arc<Registry>,
  stop: Sender<()>,
  worker: JoinHandle<()>,
}

impl Notifier {
  /// A notifier with default settings.
  pub fn new() -> Self {
    Self::with_config(Config::default())
  }

  pub fn builder() -> Builder {
    Builder::new()
  }

  pub(crate) fn with_config(config: Config) -> Self {
    Self { config, state: Mutex::new(None), detached: Mutex::new(None), counters: Arc::default() }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Registers `callback` to receive data arriving on `conn`.
  ///
  /// Replaces any callback the connection already had, with this notifier or
  /// another one. The callback runs on the worker thread with at most
  /// `buffer_size` bytes per call; an empty slice means the read returned
  /// nothing (usually the peer closed the connection).
  ///
  /// Callbacks may set or unset callbacks, their own included.
  pub fn set_read_callback<F>(&self, conn: &Connection, callback: F) -> Result<(), Error>
  where
    F: FnMut(&[u8]) + Send + 'static,
  {
    if !conn.is_connected() {
      return Err(Error::NotConnected);
    }

    // Joined without holding `state`: the old worker may still be inside a
    // callback that calls back into this notifier.
    self.reap_detached();

    let mut state = self.state.lock();
    let registry = match &*state {
      Some(running) => running.registry.clone(),
      None => {
        let running = self.start()?;
        let registry = running.registry.clone();
        *state = Some(running);
        registry
      }
    };

    if conn.inner.attach(&registry, Box::new(callback)) {
      debug!(id = %conn.id(), "read callback registered");
    }
    Ok(())
  }

  /// Stops delivering data for `conn`. Returns whether a callback was
  /// registered with this notifier.
  ///
  /// A dispatch already running on the worker completes; no further one
  /// starts afterwards.
  pub fn unset_read_callback(&self, conn: &Connection) -> bool {
    let state = self.state.lock();
    let Some(running) = &*state else {
      return false;
    };

    let removed = conn.inner.detach_from(&running.registry);
    if removed {
      debug!(id = %conn.id(), "read callback unregistered");
    }
    removed
  }

  /// Stops the worker and clears every remaining registration.
  ///
  /// Waits for the worker to exit, which takes at most one poll timeout plus
  /// one idle interval. From inside a callback the worker is only signalled;
  /// its handle is joined by the next call made from another thread. A
  /// registration made from that same callback starts the new worker before
  /// the old one has returned from its last cycle.
  ///
  /// Does nothing if the worker isn't running.
  pub fn shutdown(&self) {
    self.reap_detached();

    let Some(running) = self.state.lock().take() else {
      return;
    };

    let _ = running.stop.send(());
    if running.worker.thread().id() == thread::current().id() {
      debug!("shutdown requested from the worker thread, not joining");
      *self.detached.lock() = Some(running.worker);
    } else if running.worker.join().is_err() {
      warn!("notification worker panicked");
    }

    let leftovers = running.registry.drain();
    for conn in &leftovers {
      conn.detach_from(&running.registry);
    }
    debug!(cleared = leftovers.len(), "notifier shut down");
  }

  pub fn is_running(&self) -> bool {
    self.state.lock().is_some()
  }

  /// Connections that currently have a callback with this notifier.
  pub fn registered(&self) -> usize {
    self.state.lock().as_ref().map_or(0, |running| running.registry.len())
  }

  pub fn stats(&self) -> Stats {
    self.counters.snapshot()
  }

  /// Joins a worker left behind by a shutdown on its own thread, unless that
  /// is the calling thread.
  fn reap_detached(&self) {
    let worker = {
      let mut detached = self.detached.lock();
      match detached.take() {
        Some(worker) if worker.thread().id() == thread::current().id() => {
          *detached = Some(worker);
          return;
        }
        worker => worker,
      }
    };

    if worker.is_some_and(|worker| worker.join().is_err()) {
      warn!("notification worker panicked");
    }
  }

  fn start(&self) -> Result<Running, Error> {
    let poller = self.config.backend.open(self.config.window).map_err(Error::Backend)?;
    let registry = Arc::new(Registry::new());
    let (stop, stop_rx) = crossbeam_channel::bounded(1);

    let poll_loop = PollLoop::new(registry.clone(), poller, &self.config, self.counters.clone());
    let idle = self.config.idle_interval;
    let worker = thread::Builder::new()
      .name(self.config.thread_name.clone())
      .spawn(move || poll_loop.run(stop_rx, idle))
      .map_err(Error::Spawn)?;

    debug!(backend = %self.config.backend, "notification worker spawned");
    Ok(Running { registry, stop, worker })
  }
}

impl Default for Notifier {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for Notifier {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl fmt::Debug for Notifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Notifier")
      .field("config", &self.config)
      .field("running", &self.is_running())
      .field("registered", &self.registered())
      .finish()
  }
}
