/// Calls a libc function, turning its `-1` error return into
/// `io::Error::last_os_error()`. Any other return value is passed through.
macro_rules! syscall {
  ($fn:ident ( $($arg:expr),* $(,)? )) => {{
    #[allow(unused_unsafe)]
    let res = unsafe { libc::$fn($($arg),*) };
    match res {
      -1 => Err(std::io::Error::last_os_error()),
      res => Ok(res),
    }
  }};
}
