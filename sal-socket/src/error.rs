use std::{fmt, io};

/// Errors returned by [`Notifier`](crate::Notifier) operations.
///
/// Failures of the connection primitives themselves (connect, accept, write,
/// ...) are plain [`io::Error`]s and never wrapped in this type.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
  /// The connection was closed before a callback could be registered.
  NotConnected,
  /// The notification worker thread couldn't be spawned.
  Spawn(io::Error),
  /// The readiness backend couldn't be created.
  Backend(io::Error),
  /// A [`Builder`](crate::Builder) setting is out of range.
  Config(&'static str),
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Spawn(err) | Self::Backend(err) => Some(err),
      Self::NotConnected | Self::Config(_) => None,
    }
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NotConnected => f.write_str("connection is closed"),
      Self::Spawn(err) => write!(f, "failed to spawn notification worker: {err}"),
      Self::Backend(err) => write!(f, "failed to open readiness backend: {err}"),
      Self::Config(reason) => write!(f, "invalid notifier configuration: {reason}"),
    }
  }
}

impl From<Error> for io::Error {
  fn from(err: Error) -> Self {
    match err {
      Error::NotConnected => io::Error::from(io::ErrorKind::NotConnected),
      Error::Spawn(err) | Error::Backend(err) => err,
      Error::Config(reason) => io::Error::new(io::ErrorKind::InvalidInput, reason),
    }
  }
}
