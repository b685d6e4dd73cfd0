#![allow(dead_code)]

use std::{net::SocketAddr, sync::mpsc, time::Duration};

use sal_socket::{Connection, Notifier};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected loopback TCP pair: (client, server side).
pub fn tcp_pair() -> (Connection, Connection) {
  let listener = Connection::listen_on("127.0.0.1:0".parse::<SocketAddr>().unwrap()).unwrap();
  let addr = listener.local_addr().unwrap();

  let client = Connection::connect_addr(addr).unwrap();
  let (server, peer) = listener.accept().unwrap();
  assert_eq!(peer, client.local_addr().unwrap());
  (client, server)
}

/// A notifier that cycles every millisecond.
pub fn fast_notifier() -> Notifier {
  Notifier::builder().idle_interval(Duration::from_millis(1)).build().unwrap()
}

/// Collects callback payloads into a channel.
pub fn forwarding(tx: mpsc::Sender<Vec<u8>>) -> impl FnMut(&[u8]) + Send + 'static {
  move |data: &[u8]| {
    let _ = tx.send(data.to_vec());
  }
}

/// Receives payloads until `expected` bytes have arrived.
pub fn recv_exactly(rx: &mpsc::Receiver<Vec<u8>>, expected: usize) -> Vec<u8> {
  let mut out = Vec::with_capacity(expected);
  while out.len() < expected {
    let chunk = rx.recv_timeout(RECV_TIMEOUT).expect("timed out waiting for data");
    assert!(!chunk.is_empty(), "connection closed after {} of {expected} bytes", out.len());
    out.extend_from_slice(&chunk);
  }
  out
}
