#![cfg_attr(docsrs, feature(doc_cfg))]

//! # sal-socket - blocking TCP with read callbacks
//!
//! Plain blocking TCP connections, plus a [`Notifier`] that watches any number
//! of them from one background thread and hands inbound data to a callback
//! per connection.
//!
//! The worker never polls the whole set at once. Each cycle it takes a
//! bounded window of registered connections, asks the readiness backend which
//! of them can be read, reads at most one buffer from each and invokes the
//! callbacks. The next cycle continues where the previous window ended, so
//! every connection gets its turn no matter how many are registered.
//!
//! ## Platform support
//!
//! | Platform      | Backends              |
//! |---------------|-----------------------|
//! | Linux         | `poll(2)`, epoll      |
//! | macOS, BSDs   | `poll(2)`, kqueue     |
//! | Other Unix    | `poll(2)`             |
//! | Windows       | Not supported         |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sal_socket::{Connection, Notifier};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let listener = Connection::listen(7000)?;
//!   let notifier = Notifier::new();
//!   let mut clients = Vec::new();
//!
//!   loop {
//!     let (conn, peer) = listener.accept()?;
//!     println!("accepted {peer}");
//!
//!     notifier.set_read_callback(&conn, move |data: &[u8]| {
//!       println!("{peer}: {:?}", String::from_utf8_lossy(data));
//!     })?;
//!
//!     // The notifier only holds a weak reference.
//!     clients.push(conn);
//!   }
//! }
//! ```
//!
//! ## Callbacks
//!
//! Callbacks run on the notifier's worker thread, one at a time. They receive
//! a slice borrowed from the worker's read buffer, so anything kept past the
//! call has to be copied out. An empty slice means the read returned nothing,
//! usually because the peer closed the connection.
//!
//! ## Errors
//!
//! Connection operations return [`std::io::Result`]. [`Connection::read`]
//! follows the blocking-socket convention of returning 0 for both end of
//! stream and failure; the OS error is kept in [`Connection::last_error`].
//! Notifier operations return [`Error`].

#[cfg(not(unix))]
compile_error!("sal-socket only supports unix platforms");

#[macro_use]
mod macros;

mod config;
mod connection;
mod dispatch;
mod error;
mod notifier;
pub mod poll;
mod poller;
mod registry;
mod sync;

pub use config::{
  Builder, Config, DEFAULT_BUFFER_SIZE, DEFAULT_IDLE_INTERVAL, DEFAULT_POLL_TIMEOUT,
  DEFAULT_THREAD_NAME, DEFAULT_WINDOW,
};
pub use connection::{Connection, ConnectionId};
pub use error::Error;
pub use notifier::Notifier;
pub use poll::Backend;
pub use poller::Stats;
