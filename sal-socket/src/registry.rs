//! Set of connections with a registered read callback.
//!
//! The registry never owns a connection: entries are [`Weak`] references, and
//! a connection dropped without being unregistered is pruned the next time a
//! scan reaches it.
//!
//! Iteration is resumable. The cursor lives in the registry rather than in
//! the iterator, so the poller can take a window of entries, poll them, and
//! carry on from the same position on its next pass.

use std::{
  collections::HashMap,
  sync::{Arc, Weak},
};

use crate::{
  connection::{ConnectionId, ConnectionInner},
  sync::Mutex,
};

pub(crate) struct Registry {
  state: Mutex<State>,
}

struct State {
  order: Vec<ConnectionId>,
  entries: HashMap<ConnectionId, Weak<ConnectionInner>>,
  cursor: usize,
}

impl State {
  fn remove(&mut self, id: ConnectionId) -> bool {
    if self.entries.remove(&id).is_none() {
      return false;
    }

    if let Some(pos) = self.order.iter().position(|entry| *entry == id) {
      self.order.remove(pos);
      // Keep the cursor on the same next entry.
      if pos < self.cursor {
        self.cursor -= 1;
      }
    }

    debug_assert_eq!(self.order.len(), self.entries.len());
    true
  }
}

impl Registry {
  pub(crate) fn new() -> Self {
    Self { state: Mutex::new(State { order: Vec::new(), entries: HashMap::new(), cursor: 0 }) }
  }

  /// Appends a non-owning reference. Returns `false` if already present.
  pub(crate) fn append(&self, conn: &Arc<ConnectionInner>) -> bool {
    let mut state = self.state.lock();
    let id = conn.id();
    if state.entries.contains_key(&id) {
      return false;
    }

    state.entries.insert(id, Arc::downgrade(conn));
    state.order.push(id);
    true
  }

  /// Removes `id` if present.
  pub(crate) fn remove(&self, id: ConnectionId) -> bool {
    self.state.lock().remove(id)
  }

  /// Looks up a connection that is still registered and alive.
  pub(crate) fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionInner>> {
    self.state.lock().entries.get(&id).and_then(Weak::upgrade)
  }

  #[cfg(test)]
  pub(crate) fn contains(&self, id: ConnectionId) -> bool {
    self.state.lock().entries.contains_key(&id)
  }

  pub(crate) fn len(&self) -> usize {
    self.state.lock().order.len()
  }

  #[cfg(test)]
  pub(crate) fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Resumes iteration at the cursor.
  pub(crate) fn iter(&self) -> Iter<'_> {
    Iter { registry: self }
  }

  /// Rewinds the cursor to the first entry.
  pub(crate) fn reset_cursor(&self) {
    self.state.lock().cursor = 0;
  }

  /// Whether the cursor has moved past the last entry.
  pub(crate) fn is_exhausted(&self) -> bool {
    let state = self.state.lock();
    state.cursor >= state.order.len()
  }

  /// Empties the registry, returning the connections that were still alive.
  pub(crate) fn drain(&self) -> Vec<Arc<ConnectionInner>> {
    let mut state = self.state.lock();
    state.cursor = 0;
    state.order.clear();
    state.entries.drain().filter_map(|(_, weak)| weak.upgrade()).collect()
  }

  #[cfg(test)]
  fn snapshot(&self) -> (Vec<ConnectionId>, usize) {
    let state = self.state.lock();
    (state.order.clone(), state.cursor)
  }
}

/// Lazy iterator over live registry entries, starting at the shared cursor.
///
/// Each step takes the registry lock on its own, so appends and removals from
/// other threads interleave freely with a scan. Entries appended behind the
/// cursor are picked up on the next pass.
pub(crate) struct Iter<'a> {
  registry: &'a Registry,
}

impl Iterator for Iter<'_> {
  type Item = Arc<ConnectionInner>;

  fn next(&mut self) -> Option<Self::Item> {
    let mut state = self.registry.state.lock();

    loop {
      let id = *state.order.get(state.cursor)?;
      match state.entries.get(&id).and_then(Weak::upgrade) {
        Some(conn) => {
          state.cursor += 1;
          return Some(conn);
        }
        // Dropped without unregistering, cursor already points at the next one.
        None => {
          state.remove(id);
        }
      }
    }
  }
}
