fn main() {
  cfg_aliases::cfg_aliases! {
      linux: { target_os = "linux" },
      apple: { target_vendor = "apple" },
      bsd: { any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "openbsd"
      ) }
  }
}
