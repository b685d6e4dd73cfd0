//! Behaviour every [`ReadinessPoll`] backend must share.
//!
//! Each function takes a fresh backend; `backend_tests!` instantiates the
//! whole suite as individual `#[test]`s for one backend.

use std::{
  io,
  time::{Duration, Instant},
};

use super::ReadinessPoll;
use crate::Connection;

const SHORT: Duration = Duration::from_millis(10);
const LONG: Duration = Duration::from_millis(500);

pub fn test_no_data_not_ready<P: ReadinessPoll>(mut poller: P) -> io::Result<()> {
  let (a, _peer) = Connection::pair()?;
  let mut ready = Vec::new();

  poller.poll_readable(&[a.id()], &mut ready, SHORT)?;
  assert!(ready.is_empty(), "nothing was written, got {ready:?}");
  Ok(())
}

pub fn test_data_makes_ready<P: ReadinessPoll>(mut poller: P) -> io::Result<()> {
  let (a, peer) = Connection::pair()?;
  peer.write(b"hello")?;

  let mut ready = Vec::new();
  poller.poll_readable(&[a.id()], &mut ready, LONG)?;
  assert_eq!(ready, vec![a.id()]);
  Ok(())
}

pub fn test_peer_close_makes_ready<P: ReadinessPoll>(mut poller: P) -> io::Result<()> {
  let (a, peer) = Connection::pair()?;
  drop(peer);

  let mut ready = Vec::new();
  poller.poll_readable(&[a.id()], &mut ready, LONG)?;
  assert_eq!(ready, vec![a.id()]);
  Ok(())
}

pub fn test_only_ready_members_reported<P: ReadinessPoll>(mut poller: P) -> io::Result<()> {
  let pairs = (0..4).map(|_| Connection::pair()).collect::<io::Result<Vec<_>>>()?;
  pairs[1].1.write(b"x")?;
  pairs[3].1.write(b"y")?;

  let window: Vec<_> = pairs.iter().map(|(a, _)| a.id()).collect();
  let mut ready = Vec::new();
  poller.poll_readable(&window, &mut ready, LONG)?;
  assert_eq!(ready, vec![window[1], window[3]]);
  Ok(())
}

pub fn test_level_triggered<P: ReadinessPoll>(mut poller: P) -> io::Result<()> {
  let (a, peer) = Connection::pair()?;
  peer.write(b"unread")?;

  let mut ready = Vec::new();
  for _ in 0..3 {
    poller.poll_readable(&[a.id()], &mut ready, LONG)?;
    assert_eq!(ready, vec![a.id()], "pending data must keep being reported");
  }

  let mut buf = [0u8; 16];
  assert_eq!(a.read(&mut buf), 6);
  poller.poll_readable(&[a.id()], &mut ready, SHORT)?;
  assert!(ready.is_empty());
  Ok(())
}

pub fn test_members_outside_window_ignored<P: ReadinessPoll>(mut poller: P) -> io::Result<()> {
  let (a, peer_a) = Connection::pair()?;
  let (b, _peer_b) = Connection::pair()?;
  let mut ready = Vec::new();

  poller.poll_readable(&[a.id(), b.id()], &mut ready, SHORT)?;
  assert!(ready.is_empty());

  peer_a.write(b"late")?;
  poller.poll_readable(&[b.id()], &mut ready, SHORT)?;
  assert!(ready.is_empty(), "a left the window, got {ready:?}");

  poller.poll_readable(&[b.id(), a.id()], &mut ready, LONG)?;
  assert_eq!(ready, vec![a.id()]);
  Ok(())
}

pub fn test_replaced_connection_is_tracked<P: ReadinessPoll>(mut poller: P) -> io::Result<()> {
  let (a, peer_a) = Connection::pair()?;
  let mut ready = Vec::new();
  poller.poll_readable(&[a.id()], &mut ready, SHORT)?;
  drop(a);
  drop(peer_a);

  // Likely reuses the descriptor numbers just released.
  let (b, peer_b) = Connection::pair()?;
  peer_b.write(b"fresh")?;
  poller.poll_readable(&[b.id()], &mut ready, LONG)?;
  assert_eq!(ready, vec![b.id()]);
  Ok(())
}

pub fn test_closed_member_skipped<P: ReadinessPoll>(mut poller: P) -> io::Result<()> {
  let (a, _peer_a) = Connection::pair()?;
  let (b, peer_b) = Connection::pair()?;
  let stale = a.id();
  a.close();
  peer_b.write(b"ok")?;

  let mut ready = Vec::new();
  poller.poll_readable(&[stale, b.id()], &mut ready, LONG)?;
  // The stale descriptor may already be reused by another test's socket, so
  // only the live member is checked.
  assert!(ready.contains(&b.id()));
  Ok(())
}

pub fn test_empty_window<P: ReadinessPoll>(mut poller: P) -> io::Result<()> {
  let mut ready = Vec::new();
  let started = Instant::now();
  poller.poll_readable(&[], &mut ready, Duration::from_secs(5))?;
  assert!(ready.is_empty());
  assert!(started.elapsed() < Duration::from_secs(1));
  Ok(())
}

/// Instantiates the shared backend suite.
///
/// Usage: `backend_tests!(PollSet::new(64));`
#[macro_export]
macro_rules! backend_tests {
  (@each $poller:expr; $($name:ident),* $(,)?) => {
    $(
      #[test]
      fn $name() {
        let poller = $poller;
        $crate::poll::tests::$name(poller)
          .expect(concat!(stringify!($name), ": backend returned an error"));
      }
    )*
  };
  ($poller:expr) => {
    $crate::backend_tests!(@each $poller;
      test_no_data_not_ready,
      test_data_makes_ready,
      test_peer_close_makes_ready,
      test_only_ready_members_reported,
      test_level_triggered,
      test_members_outside_window_ignored,
      test_replaced_connection_is_tracked,
      test_closed_member_skipped,
      test_empty_window,
    );
  };
}
