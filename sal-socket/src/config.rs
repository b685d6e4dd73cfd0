use std::time::Duration;

use crate::{Error, Notifier, poll::Backend};

/// Connections checked per poll cycle.
pub const DEFAULT_WINDOW: usize = 1024;
/// Bytes read per dispatch.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
/// Longest a single readiness check may block.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_micros(250);
/// Pause between poll cycles.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(25);
pub const DEFAULT_THREAD_NAME: &str = "sal-notifier";

/// Resolved settings of a [`Notifier`].
#[derive(Debug, Clone)]
pub struct Config {
  pub(crate) window: usize,
  pub(crate) buffer_size: usize,
  pub(crate) poll_timeout: Duration,
  pub(crate) idle_interval: Duration,
  pub(crate) backend: Backend,
  pub(crate) thread_name: String,
}

impl Config {
  pub fn window(&self) -> usize {
    self.window
  }

  pub fn buffer_size(&self) -> usize {
    self.buffer_size
  }

  pub fn poll_timeout(&self) -> Duration {
    self.poll_timeout
  }

  pub fn idle_interval(&self) -> Duration {
    self.idle_interval
  }

  pub fn backend(&self) -> Backend {
    self.backend
  }

  pub fn thread_name(&self) -> &str {
    &self.thread_name
  }

  fn validate(&self) -> Result<(), Error> {
    if self.window == 0 {
      return Err(Error::Config("window must be > 0"));
    }
    if self.buffer_size == 0 {
      return Err(Error::Config("buffer_size must be > 0"));
    }
    if self.poll_timeout >= Duration::from_secs(1) {
      return Err(Error::Config("poll_timeout must be under one second"));
    }
    Ok(())
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      window: DEFAULT_WINDOW,
      buffer_size: DEFAULT_BUFFER_SIZE,
      poll_timeout: DEFAULT_POLL_TIMEOUT,
      idle_interval: DEFAULT_IDLE_INTERVAL,
      backend: Backend::default(),
      thread_name: DEFAULT_THREAD_NAME.to_owned(),
    }
  }
}

/// Builds a [`Notifier`] with non-default settings.
///
/// ```
/// use std::time::Duration;
///
/// let notifier = sal_socket::Notifier::builder()
///   .window(64)
///   .idle_interval(Duration::from_millis(5))
///   .build()
///   .unwrap();
/// assert_eq!(notifier.config().window(), 64);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
  config: Config,
}

impl Builder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Upper bound on connections per readiness check. The backend's own
  /// capacity may lower it further.
  pub fn window(mut self, window: usize) -> Self {
    self.config.window = window;
    self
  }

  /// Size of the buffer handed to read callbacks.
  pub fn buffer_size(mut self, size: usize) -> Self {
    self.config.buffer_size = size;
    self
  }

  pub fn poll_timeout(mut self, timeout: Duration) -> Self {
    self.config.poll_timeout = timeout;
    self
  }

  /// Also bounds how long a shutdown waits for the worker to notice.
  pub fn idle_interval(mut self, interval: Duration) -> Self {
    self.config.idle_interval = interval;
    self
  }

  pub fn backend(mut self, backend: Backend) -> Self {
    self.config.backend = backend;
    self
  }

  pub fn thread_name(mut self, name: impl Into<String>) -> Self {
    self.config.thread_name = name.into();
    self
  }

  pub fn build(self) -> Result<Notifier, Error> {
    self.config.validate()?;
    Ok(Notifier::with_config(self.config))
  }
}
