use std::panic::{self, AssertUnwindSafe};

use tracing::{error, trace};

use crate::connection::ConnectionInner;

/// Read buffer reused across dispatches on the worker thread.
pub(crate) struct ScratchBuffer {
  buf: Box<[u8]>,
}

impl ScratchBuffer {
  pub(crate) fn new(size: usize) -> Self {
    Self { buf: vec![0; size].into_boxed_slice() }
  }

  pub(crate) fn len(&self) -> usize {
    self.buf.len()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
  /// The callback ran with this many bytes.
  Delivered(usize),
  /// No callback was installed by the time the connection was reached.
  Skipped,
  /// The callback panicked and was unregistered.
  Panicked,
}

/// Reads what is available on `conn` and hands it to its callback.
///
/// The callback is taken out of the connection for the call, so it can
/// register, replace or unset callbacks (its own included) without
/// deadlocking. It is put back only if nothing changed the registration
/// meanwhile.
///
/// A zero-length slice means the read produced nothing: the peer closed, an
/// error occurred, or a readiness report turned out to be spurious.
pub(crate) fn dispatch(conn: &ConnectionInner, scratch: &mut ScratchBuffer) -> Outcome {
  let Some((mut callback, generation)) = conn.take_callback() else {
    return Outcome::Skipped;
  };

  let n = conn.recv_available(&mut scratch.buf);
  trace!(id = %conn.id(), bytes = n, "dispatching read callback");

  let data = &scratch.buf[..n];
  match panic::catch_unwind(AssertUnwindSafe(|| callback(data))) {
    Ok(()) => {
      conn.restore_callback(callback, generation);
      Outcome::Delivered(n)
    }
    Err(_) => {
      error!(id = %conn.id(), "read callback panicked, unregistering it");
      conn.detach_generation(generation);
      Outcome::Panicked
    }
  }
}
