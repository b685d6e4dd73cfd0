mod common;

use std::{
  sync::{Arc, Mutex, mpsc},
  thread,
  time::{Duration, Instant},
};

use common::{RECV_TIMEOUT, fast_notifier, forwarding, recv_exactly, tcp_pair};
use sal_socket::{Backend, Connection, Notifier};

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + RECV_TIMEOUT;
  while Instant::now() < deadline {
    if cond() {
      return true;
    }
    thread::sleep(Duration::from_millis(1));
  }
  cond()
}

fn ping_with(notifier: Notifier) {
  let (client, server) = tcp_pair();
  let (tx, rx) = mpsc::channel();
  notifier.set_read_callback(&server, forwarding(tx)).unwrap();

  client.write(b"ping").unwrap();
  assert_eq!(recv_exactly(&rx, 4), b"ping");
}

#[test]
fn test_ping_default_backend() {
  ping_with(fast_notifier());
}

#[test]
fn test_ping_poll_backend() {
  ping_with(
    Notifier::builder().backend(Backend::Poll).idle_interval(Duration::from_millis(1)).build().unwrap(),
  );
}

#[cfg(target_os = "linux")]
#[test]
fn test_ping_epoll_backend() {
  ping_with(
    Notifier::builder().backend(Backend::Epoll).idle_interval(Duration::from_millis(1)).build().unwrap(),
  );
}

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
#[test]
fn test_ping_kqueue_backend() {
  ping_with(
    Notifier::builder().backend(Backend::Kqueue).idle_interval(Duration::from_millis(1)).build().unwrap(),
  );
}

#[test]
fn test_payload_larger_than_buffer() {
  let notifier = Notifier::builder()
    .buffer_size(64)
    .idle_interval(Duration::from_millis(1))
    .build()
    .unwrap();
  let (client, server) = tcp_pair();
  let (tx, rx) = mpsc::channel();
  notifier.set_read_callback(&server, forwarding(tx)).unwrap();

  let payload: Vec<u8> = (0..10_000).map(|_| fastrand::u8(..)).collect();
  client.write(&payload).unwrap();

  let received = recv_exactly(&rx, payload.len());
  assert_eq!(received, payload);
}

#[test]
fn test_unset_stops_delivery() {
  let notifier = fast_notifier();
  let (client, server) = tcp_pair();
  let (tx, rx) = mpsc::channel();
  notifier.set_read_callback(&server, forwarding(tx)).unwrap();

  client.write(b"first").unwrap();
  assert_eq!(recv_exactly(&rx, 5), b"first");

  assert!(notifier.unset_read_callback(&server));
  assert!(!server.has_read_callback());
  assert_eq!(notifier.registered(), 0);

  client.write(b"second").unwrap();
  assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

  // Data left for synchronous reads.
  let mut buf = [0u8; 16];
  assert_eq!(server.read(&mut buf), 6);
  assert_eq!(&buf[..6], b"second");
}

#[test]
fn test_set_replaces_previous_callback() {
  let notifier = fast_notifier();
  let (client, server) = tcp_pair();
  let (old_tx, old_rx) = mpsc::channel();
  let (new_tx, new_rx) = mpsc::channel();

  notifier.set_read_callback(&server, forwarding(old_tx)).unwrap();
  notifier.set_read_callback(&server, forwarding(new_tx)).unwrap();
  assert_eq!(notifier.registered(), 1);

  client.write(b"hello").unwrap();
  assert_eq!(recv_exactly(&new_rx, 5), b"hello");
  assert!(old_rx.try_recv().is_err());
}

#[test]
fn test_unset_and_shutdown_are_idempotent() {
  let notifier = fast_notifier();
  let (_client, server) = tcp_pair();

  assert!(!notifier.unset_read_callback(&server));
  notifier.shutdown();
  notifier.shutdown();

  notifier.set_read_callback(&server, |_: &[u8]| {}).unwrap();
  assert!(notifier.unset_read_callback(&server));
  assert!(!notifier.unset_read_callback(&server));

  notifier.shutdown();
  notifier.shutdown();
  assert!(!notifier.is_running());
}

#[test]
fn test_close_unregisters() {
  let notifier = fast_notifier();
  let (client, server) = tcp_pair();
  let (tx, rx) = mpsc::channel();
  notifier.set_read_callback(&server, forwarding(tx)).unwrap();

  server.close();
  assert!(!server.has_read_callback());
  assert_eq!(notifier.registered(), 0);

  let _ = client.write(b"ignored");
  assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_drop_unregisters() {
  let notifier = fast_notifier();
  let (_client, server) = tcp_pair();
  notifier.set_read_callback(&server, |_: &[u8]| {}).unwrap();
  assert_eq!(notifier.registered(), 1);

  drop(server);
  assert_eq!(notifier.registered(), 0);
}

#[test]
fn test_peer_close_delivers_empty_slice() {
  let notifier = fast_notifier();
  let (client, server) = tcp_pair();
  let (tx, rx) = mpsc::channel();
  notifier.set_read_callback(&server, forwarding(tx)).unwrap();

  drop(client);
  let chunk = rx.recv_timeout(RECV_TIMEOUT).unwrap();
  assert!(chunk.is_empty());
}

#[test]
fn test_callback_unsets_itself() {
  let notifier = Arc::new(fast_notifier());
  let (client, server) = tcp_pair();
  let server = Arc::new(server);
  let (tx, rx) = mpsc::channel();

  let weak_notifier = Arc::downgrade(&notifier);
  let weak_server = Arc::downgrade(&server);
  notifier
    .set_read_callback(&server, move |data: &[u8]| {
      if let (Some(notifier), Some(server)) = (weak_notifier.upgrade(), weak_server.upgrade()) {
        let _ = tx.send((data.to_vec(), notifier.unset_read_callback(&server)));
      }
    })
    .unwrap();

  client.write(b"once").unwrap();
  let (data, unset) = rx.recv_timeout(RECV_TIMEOUT).unwrap();
  assert_eq!(data, b"once");
  assert!(unset);

  client.write(b"twice").unwrap();
  assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
  assert_eq!(notifier.registered(), 0);
}

#[test]
fn test_callback_registers_other_connection() {
  let notifier = Arc::new(fast_notifier());
  let (client_a, server_a) = tcp_pair();
  let (client_b, server_b) = tcp_pair();
  let server_b = Arc::new(server_b);
  let (tx, rx) = mpsc::channel();

  let weak_notifier = Arc::downgrade(&notifier);
  let weak_b = Arc::downgrade(&server_b);
  let forward = tx.clone();
  notifier
    .set_read_callback(&server_a, move |_: &[u8]| {
      if let (Some(notifier), Some(b)) = (weak_notifier.upgrade(), weak_b.upgrade()) {
        notifier.set_read_callback(&b, forwarding(forward.clone())).unwrap();
      }
    })
    .unwrap();

  client_a.write(b"go").unwrap();
  assert!(wait_until(|| server_b.has_read_callback()));

  client_b.write(b"b-data").unwrap();
  assert_eq!(recv_exactly(&rx, 6), b"b-data");
  drop(tx);
}

#[test]
fn test_panicking_callback_is_unregistered() {
  let notifier = fast_notifier();
  let (bad_client, bad_server) = tcp_pair();
  let (good_client, good_server) = tcp_pair();
  let (tx, rx) = mpsc::channel();

  notifier.set_read_callback(&bad_server, |_: &[u8]| panic!("callback failure")).unwrap();
  notifier.set_read_callback(&good_server, forwarding(tx)).unwrap();

  bad_client.write(b"boom").unwrap();
  assert!(wait_until(|| !bad_server.has_read_callback()));
  assert!(notifier.is_running());

  good_client.write(b"still here").unwrap();
  assert_eq!(recv_exactly(&rx, 10), b"still here");
}

#[test]
fn test_callbacks_never_overlap() {
  let notifier = fast_notifier();
  let active = Arc::new(Mutex::new(0usize));
  let overlaps = Arc::new(Mutex::new(0usize));
  let (tx, rx) = mpsc::channel();

  let pairs: Vec<_> = (0..8).map(|_| tcp_pair()).collect();
  for (_, server) in &pairs {
    let active = active.clone();
    let overlaps = overlaps.clone();
    let tx = tx.clone();
    notifier
      .set_read_callback(server, move |data: &[u8]| {
        {
          let mut active = active.lock().unwrap();
          *active += 1;
          if *active > 1 {
            *overlaps.lock().unwrap() += 1;
          }
        }
        thread::sleep(Duration::from_micros(200));
        *active.lock().unwrap() -= 1;
        let _ = tx.send(data.len());
      })
      .unwrap();
  }

  for (client, _) in &pairs {
    client.write(b"tick").unwrap();
  }

  let mut total = 0;
  while total < 8 * 4 {
    total += rx.recv_timeout(RECV_TIMEOUT).unwrap();
  }
  assert_eq!(*overlaps.lock().unwrap(), 0);
}

#[test]
fn test_shutdown_clears_registrations() {
  let notifier = fast_notifier();
  let pairs: Vec<_> = (0..4).map(|_| tcp_pair()).collect();
  for (_, server) in &pairs {
    notifier.set_read_callback(server, |_: &[u8]| {}).unwrap();
  }
  assert_eq!(notifier.registered(), 4);

  let started = Instant::now();
  notifier.shutdown();
  assert!(started.elapsed() < Duration::from_secs(1));
  assert!(!notifier.is_running());
  assert!(pairs.iter().all(|(_, server)| !server.has_read_callback()));
}

#[test]
fn test_stats_track_dispatches() {
  let notifier = fast_notifier();
  let (client, server) = tcp_pair();
  let (tx, rx) = mpsc::channel();
  notifier.set_read_callback(&server, forwarding(tx)).unwrap();

  client.write(b"count me").unwrap();
  recv_exactly(&rx, 8);

  let stats = notifier.stats();
  assert!(stats.cycles >= 1);
  assert!(stats.dispatches >= 1);
}

#[test]
fn test_move_between_notifiers() {
  let first = fast_notifier();
  let second = fast_notifier();
  let (client, server) = tcp_pair();
  let (first_tx, first_rx) = mpsc::channel();
  let (second_tx, second_rx) = mpsc::channel();

  first.set_read_callback(&server, forwarding(first_tx)).unwrap();
  second.set_read_callback(&server, forwarding(second_tx)).unwrap();
  assert_eq!(first.registered(), 0);
  assert_eq!(second.registered(), 1);

  client.write(b"moved").unwrap();
  assert_eq!(recv_exactly(&second_rx, 5), b"moved");
  assert!(first_rx.try_recv().is_err());
}

/// Runs `f` on its own thread, failing if it hangs.
fn finishes_in_time(f: impl FnOnce() + Send + 'static) {
  let (tx, rx) = mpsc::channel();
  let handle = thread::spawn(move || {
    f();
    let _ = tx.send(());
  });

  if let Err(mpsc::RecvTimeoutError::Timeout) = rx.recv_timeout(RECV_TIMEOUT) {
    panic!("did not finish within {RECV_TIMEOUT:?}");
  }
  handle.join().unwrap();
}

/// An echo server whose callback holds the only remaining handle to its
/// connection once the caller lets go of theirs.
fn echo_owning_connection(notifier: &Notifier) -> Connection {
  let (client, server) = tcp_pair();
  let server = Arc::new(server);
  let echo = server.clone();
  notifier
    .set_read_callback(&server, move |data: &[u8]| {
      let _ = echo.write(data);
    })
    .unwrap();

  client.write(b"ping").unwrap();
  let mut buf = [0u8; 4];
  let mut got = 0;
  while got < buf.len() {
    let n = client.read(&mut buf[got..]);
    assert!(n > 0, "echo stopped after {got} bytes");
    got += n;
  }
  assert_eq!(&buf, b"ping");
  client
}

#[test]
fn test_shutdown_releases_callback_owning_its_connection() {
  finishes_in_time(|| {
    let notifier = fast_notifier();
    let client = echo_owning_connection(&notifier);

    notifier.shutdown();
    assert_eq!(notifier.registered(), 0);
    // The server side went away with its callback.
    assert_eq!(client.read(&mut [0u8; 4]), 0);
  });
}

#[test]
fn test_notifier_drop_releases_callback_owning_its_connection() {
  finishes_in_time(|| {
    let notifier = fast_notifier();
    let client = echo_owning_connection(&notifier);

    drop(notifier);
    assert_eq!(client.read(&mut [0u8; 4]), 0);
  });
}
