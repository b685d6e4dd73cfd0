//! Synchronization primitives that wrap both `parking_lot` and `std::sync`.
//!
//! This module provides a unified API for the locks shared between caller
//! threads and the notification worker:
//! - Uses `parking_lot` when the `parking_lot` feature is enabled
//! - Falls back to `std::sync` when the feature is disabled
//! - Removes poisoning, so a panicking read callback can't wedge the registry

#[cfg(feature = "parking_lot")]
pub use parking_lot::{
  Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

#[cfg(not(feature = "parking_lot"))]
pub use self::std_sync::*;

#[cfg(not(feature = "parking_lot"))]
mod std_sync {
  use std::sync as std_sync;

  /// A mutual exclusion primitive that wraps `std::sync::Mutex`.
  ///
  /// Unlike `std::sync::Mutex`, this does not support poisoning.
  pub struct Mutex<T: ?Sized> {
    inner: std_sync::Mutex<T>,
  }

  impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    #[inline]
    pub const fn new(value: T) -> Self {
      Self { inner: std_sync::Mutex::new(value) }
    }
  }

  impl<T: ?Sized> Mutex<T> {
    /// Acquires a mutex, blocking the current thread until it is able to do so.
    ///
    /// This function does not propagate poisoning, so it will always succeed.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
      MutexGuard { inner: self.inner.lock().unwrap_or_else(|e| e.into_inner()) }
    }
  }

  /// An RAII implementation of a "scoped lock" of a mutex.
  pub struct MutexGuard<'a, T: ?Sized> {
    inner: std_sync::MutexGuard<'a, T>,
  }

  impl<T: ?Sized> std::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
      &self.inner
    }
  }

  impl<T: ?Sized> std::ops::DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
      &mut self.inner
    }
  }

  /// A reader-writer lock that wraps `std::sync::RwLock`, without poisoning.
  pub struct RwLock<T: ?Sized> {
    inner: std_sync::RwLock<T>,
  }

  impl<T> RwLock<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
      Self { inner: std_sync::RwLock::new(value) }
    }
  }

  impl<T: ?Sized> RwLock<T> {
    /// Locks with shared read access, blocking while a writer holds the lock.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
      RwLockReadGuard {
        inner: self.inner.read().unwrap_or_else(|e| e.into_inner()),
      }
    }

    /// Locks with exclusive write access, blocking until all readers are gone.
    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
      RwLockWriteGuard {
        inner: self.inner.write().unwrap_or_else(|e| e.into_inner()),
      }
    }
  }

  pub struct RwLockReadGuard<'a, T: ?Sized> {
    inner: std_sync::RwLockReadGuard<'a, T>,
  }

  impl<T: ?Sized> std::ops::Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
      &self.inner
    }
  }

  pub struct RwLockWriteGuard<'a, T: ?Sized> {
    inner: std_sync::RwLockWriteGuard<'a, T>,
  }

  impl<T: ?Sized> std::ops::Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
      &self.inner
    }
  }

  impl<T: ?Sized> std::ops::DerefMut for RwLockWriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
      &mut self.inner
    }
  }
}
