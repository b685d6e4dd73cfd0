use std::{
  fmt,
  io::{self, Read, Write},
  net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
  os::fd::{AsRawFd, RawFd},
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering},
  },
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::{
  registry::Registry,
  sync::{Mutex, RwLock},
};

#[cfg(linux)]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(linux))]
const SEND_FLAGS: libc::c_int = 0;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Typed identity of a [`Connection`].
///
/// Wraps the platform handle together with a process-unique serial, so two
/// connections that happen to reuse the same file descriptor never compare
/// equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
  serial: u64,
  raw: RawFd,
}

impl ConnectionId {
  fn next(raw: RawFd) -> Self {
    Self { serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed), raw }
  }

  /// The platform handle this id was created for.
  pub fn raw_fd(&self) -> RawFd {
    self.raw
  }

  pub fn serial(&self) -> u64 {
    self.serial
  }
}

impl fmt::Display for ConnectionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "conn#{}(fd={})", self.serial, self.raw)
  }
}

pub(crate) type ReadCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Registration state of a connection.
///
/// `registry` is `Some` exactly while a callback is logically registered.
/// `callback` can be `None` during that time when the worker has taken it out
/// to invoke it.
struct CallbackSlot {
  callback: Option<ReadCallback>,
  registry: Option<Arc<Registry>>,
  generation: u64,
}

impl CallbackSlot {
  fn bump(&mut self) {
    self.generation = self.generation.wrapping_add(1);
  }
}

pub(crate) struct ConnectionInner {
  id: ConnectionId,
  socket: RwLock<Option<Socket>>,
  connected: AtomicBool,
  last_error: AtomicI32,
  slot: Mutex<CallbackSlot>,
}

impl ConnectionInner {
  pub(crate) fn id(&self) -> ConnectionId {
    self.id
  }

  fn record(&self, err: &io::Error) {
    self.last_error.store(err.raw_os_error().unwrap_or(libc::EIO), Ordering::Relaxed);
  }

  /// Installs `callback`, appending the connection to `registry` if it had no
  /// callback there before. Returns whether it was appended.
  ///
  /// Lock order is slot then registry, everywhere.
  pub(crate) fn attach(self: &Arc<Self>, registry: &Arc<Registry>, callback: ReadCallback) -> bool {
    let mut slot = self.slot.lock();

    let appended = match &slot.registry {
      Some(current) if Arc::ptr_eq(current, registry) => false,
      Some(previous) => {
        previous.remove(self.id);
        registry.append(self)
      }
      None => registry.append(self),
    };

    let replaced = slot.callback.replace(callback);
    slot.registry = Some(registry.clone());
    slot.bump();
    drop(slot);

    // The replaced callback may own the last handle to this connection.
    drop(replaced);
    appended
  }

  /// Clears the callback and removes the connection from its registry.
  pub(crate) fn detach(&self) -> bool {
    let cleared = {
      let mut slot = self.slot.lock();
      self.clear(&mut slot)
    };
    cleared.is_some()
  }

  /// Like [`detach`](Self::detach), but only if registered with `registry`.
  pub(crate) fn detach_from(&self, registry: &Arc<Registry>) -> bool {
    let cleared = {
      let mut slot = self.slot.lock();
      if !matches!(&slot.registry, Some(current) if Arc::ptr_eq(current, registry)) {
        return false;
      }
      self.clear(&mut slot)
    };
    cleared.is_some()
  }

  /// Detaches only if nothing re-registered since `generation` was observed.
  pub(crate) fn detach_generation(&self, generation: u64) -> bool {
    let cleared = {
      let mut slot = self.slot.lock();
      if slot.generation != generation {
        return false;
      }
      self.clear(&mut slot)
    };
    cleared.is_some()
  }

  /// Unregisters and hands back the callback, if one was registered.
  ///
  /// The callback must outlive the slot guard. It may own the last
  /// `Connection` handle, whose drop re-enters `detach`.
  #[must_use]
  fn clear(&self, slot: &mut CallbackSlot) -> Option<Option<ReadCallback>> {
    let registry = slot.registry.take()?;

    let callback = slot.callback.take();
    slot.bump();
    registry.remove(self.id);
    Some(callback)
  }

  /// Takes the callback out of its slot for the duration of one dispatch.
  pub(crate) fn take_callback(&self) -> Option<(ReadCallback, u64)> {
    let mut slot = self.slot.lock();
    let generation = slot.generation;
    slot.callback.take().map(|callback| (callback, generation))
  }

  /// Puts a dispatched callback back, unless it was replaced or unset while
  /// it ran.
  pub(crate) fn restore_callback(&self, callback: ReadCallback, generation: u64) -> bool {
    let mut slot = self.slot.lock();
    if slot.generation != generation || slot.registry.is_none() || slot.callback.is_some() {
      return false;
    }

    slot.callback = Some(callback);
    true
  }

  pub(crate) fn has_callback(&self) -> bool {
    self.slot.lock().registry.is_some()
  }

  /// Reads whatever is available without blocking. Errors, `WouldBlock` and
  /// orderly shutdown all come back as 0.
  pub(crate) fn recv_available(&self, buf: &mut [u8]) -> usize {
    let guard = self.socket.read();
    let Some(socket) = &*guard else {
      return 0;
    };

    loop {
      match syscall!(recv(
        socket.as_raw_fd(),
        buf.as_mut_ptr().cast::<libc::c_void>(),
        buf.len(),
        libc::MSG_DONTWAIT,
      )) {
        Ok(n) => return n as usize,
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => {
          self.record(&err);
          return 0;
        }
      }
    }
  }

  fn close(&self) {
    self.detach();

    if !self.connected.swap(false, Ordering::AcqRel) {
      return;
    }

    {
      // Wakes any thread blocked in read() or accept() so the write lock below
      // can be taken.
      let guard = self.socket.read();
      if let Some(socket) = &*guard {
        let _ = socket.shutdown(Shutdown::Both);
      }
    }

    drop(self.socket.write().take());
    debug!(id = %self.id, "connection closed");
  }
}

/// One established (or listening) TCP stream endpoint.
///
/// A `Connection` owns its socket. Notifiers only keep weak references to it,
/// so dropping the connection closes it and unregisters any read callback.
///
/// All methods take `&self`; a connection can be shared between threads, for
/// example reading synchronously on one thread while writing on another.
pub struct Connection {
  pub(crate) inner: Arc<ConnectionInner>,
}

impl Connection {
  /// Adopts an already configured socket.
  pub fn from_socket(socket: Socket) -> Self {
    #[cfg(apple)]
    let _ = socket.set_nosigpipe(true);

    let id = ConnectionId::next(socket.as_raw_fd());
    Self {
      inner: Arc::new(ConnectionInner {
        id,
        socket: RwLock::new(Some(socket)),
        connected: AtomicBool::new(true),
        last_error: AtomicI32::new(0),
        slot: Mutex::new(CallbackSlot { callback: None, registry: None, generation: 0 }),
      }),
    }
  }

  /// Opens a TCP connection to `host`, trying every resolved address in
  /// order and returning the first that connects.
  ///
  /// # Examples
  ///
  /// ```rust,no_run
  /// use sal_socket::Connection;
  ///
  /// fn example() -> std::io::Result<()> {
  ///     let conn = Connection::connect("localhost", 8080)?;
  ///     conn.write(b"hello")?;
  ///     Ok(())
  /// }
  /// ```
  pub fn connect(host: &str, port: u16) -> io::Result<Self> {
    let mut last_err = None;

    for addr in (host, port).to_socket_addrs()? {
      match Self::connect_addr(addr) {
        Ok(conn) => return Ok(conn),
        Err(err) => {
          debug!(%addr, error = %err, "connect attempt failed");
          last_err = Some(err);
        }
      }
    }

    Err(last_err.unwrap_or_else(|| {
      io::Error::new(io::ErrorKind::InvalidInput, "could not resolve to any address")
    }))
  }

  /// Opens a TCP connection to one address.
  pub fn connect_addr(addr: SocketAddr) -> io::Result<Self> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect(&SockAddr::from(addr))?;
    Ok(Self::from_socket(socket))
  }

  /// Listens on `port` on all interfaces.
  ///
  /// Binds a dual-stack IPv6 socket, falling back to IPv4 only when IPv6 is
  /// unavailable. Pass `0` to let the OS pick a port, then read it back with
  /// [`local_addr`](Self::local_addr).
  pub fn listen(port: u16) -> io::Result<Self> {
    match Self::listen_dual_stack(port) {
      Ok(conn) => Ok(conn),
      Err(err) => {
        debug!(port, error = %err, "dual-stack listen failed, falling back to IPv4");
        Self::listen_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
      }
    }
  }

  fn listen_dual_stack(port: u16) -> io::Result<Self> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(false)?;
    Self::bind_and_listen(socket, SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))
  }

  /// Listens on a specific local address.
  pub fn listen_on(addr: SocketAddr) -> io::Result<Self> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    Self::bind_and_listen(socket, addr)
  }

  fn bind_and_listen(socket: Socket, addr: SocketAddr) -> io::Result<Self> {
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(libc::SOMAXCONN)?;
    Ok(Self::from_socket(socket))
  }

  /// Creates a connected pair of Unix-domain stream connections.
  pub fn pair() -> io::Result<(Self, Self)> {
    let (a, b) = Socket::pair(Domain::UNIX, Type::STREAM, None)?;
    Ok((Self::from_socket(a), Self::from_socket(b)))
  }

  /// Blocks until a client connects to this listening connection.
  pub fn accept(&self) -> io::Result<(Self, SocketAddr)> {
    let guard = self.inner.socket.read();
    let Some(socket) = &*guard else {
      return Err(io::Error::from(io::ErrorKind::NotConnected));
    };

    let (peer, addr) = socket.accept().inspect_err(|err| self.inner.record(err))?;
    let addr = addr.as_socket().ok_or_else(|| {
      io::Error::new(io::ErrorKind::InvalidData, "peer address is not an IP address")
    })?;

    Ok((Self::from_socket(peer), addr))
  }

  /// Reads up to `buf.len()` bytes, blocking until some are available.
  ///
  /// Returns 0 both on orderly shutdown and on error; the error, if any, is
  /// kept in [`last_error`](Self::last_error).
  pub fn read(&self, buf: &mut [u8]) -> usize {
    let guard = self.inner.socket.read();
    let Some(socket) = &*guard else {
      return 0;
    };

    loop {
      match (&*socket).read(buf) {
        Ok(n) => return n,
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => {
          self.inner.record(&err);
          return 0;
        }
      }
    }
  }

  /// Writes all of `buf`.
  ///
  /// Nothing is buffered or retried beyond short writes; a failure is
  /// returned as-is and also kept in [`last_error`](Self::last_error).
  pub fn write(&self, mut buf: &[u8]) -> io::Result<()> {
    let guard = self.inner.socket.read();
    let Some(socket) = &*guard else {
      return Err(io::Error::from(io::ErrorKind::NotConnected));
    };

    while !buf.is_empty() {
      match socket.send_with_flags(buf, SEND_FLAGS) {
        Ok(0) => {
          let err = io::Error::from(io::ErrorKind::WriteZero);
          self.inner.record(&err);
          return Err(err);
        }
        Ok(n) => buf = &buf[n..],
        Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
        Err(err) => {
          self.inner.record(&err);
          return Err(err);
        }
      }
    }

    Ok(())
  }

  /// Unregisters any read callback, shuts the socket down in both directions
  /// and releases it. Calling it again does nothing.
  pub fn close(&self) {
    self.inner.close();
  }

  pub fn id(&self) -> ConnectionId {
    self.inner.id
  }

  pub fn is_connected(&self) -> bool {
    self.inner.connected.load(Ordering::Acquire)
  }

  /// Whether a read callback is currently registered.
  pub fn has_read_callback(&self) -> bool {
    self.inner.has_callback()
  }

  /// The last OS error observed by a read, write or accept on this
  /// connection.
  pub fn last_error(&self) -> Option<io::Error> {
    match self.inner.last_error.load(Ordering::Relaxed) {
      0 => None,
      code => Some(io::Error::from_raw_os_error(code)),
    }
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.with_socket(|socket| socket.local_addr())
  }

  pub fn peer_addr(&self) -> io::Result<SocketAddr> {
    self.with_socket(|socket| socket.peer_addr())
  }

  fn with_socket<F>(&self, f: F) -> io::Result<SocketAddr>
  where
    F: FnOnce(&Socket) -> io::Result<SockAddr>,
  {
    let guard = self.inner.socket.read();
    let Some(socket) = &*guard else {
      return Err(io::Error::from(io::ErrorKind::NotConnected));
    };

    f(socket)?
      .as_socket()
      .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "not an IP socket address"))
  }
}

impl AsRawFd for Connection {
  fn as_raw_fd(&self) -> RawFd {
    self.inner.id.raw_fd()
  }
}

impl From<Socket> for Connection {
  fn from(socket: Socket) -> Self {
    Self::from_socket(socket)
  }
}

impl From<TcpStream> for Connection {
  fn from(stream: TcpStream) -> Self {
    Self::from_socket(Socket::from(stream))
  }
}

impl fmt::Debug for Connection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Connection")
      .field("id", &self.inner.id)
      .field("connected", &self.is_connected())
      .finish()
  }
}

impl Drop for Connection {
  fn drop(&mut self) {
    self.inner.close();
  }
}
