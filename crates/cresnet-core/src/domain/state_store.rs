//! Last-known value of every signal the processor has published.
//!
//! The store keeps one sparse map per [`SignalClass`].  Ids arrive in any
//! order and with large gaps, so a `HashMap` is used rather than a vector
//! indexed by id.  An id that has never been observed is absent; the store
//! never invents a default value for it.
//!
//! # Thread safety
//!
//! The session task writes and the client facade reads, possibly from
//! different threads.  All maps sit behind one `std::sync::RwLock`; message
//! volumes are small and no lock is held across an `.await`.  A poisoned lock
//! is recovered rather than propagated, since every write leaves the maps in
//! a consistent state.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::signal::{SignalClass, SignalValue};

#[derive(Debug, Default)]
struct Maps {
    digital: HashMap<u32, bool>,
    analog: HashMap<u32, i32>,
    serial: HashMap<u32, String>,
}

/// Thread-safe sparse mapping from `(class, id)` to the last value received.
#[derive(Debug, Default)]
pub struct StateStore {
    maps: RwLock<Maps>,
}

impl StateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` for `(value.class(), id)`, replacing any previous value.
    ///
    /// Returns `true` when the stored value changed, including the first time
    /// the signal is observed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cresnet_core::{SignalValue, StateStore};
    ///
    /// let store = StateStore::new();
    /// assert!(store.set(5, SignalValue::Digital(true)));
    /// assert!(!store.set(5, SignalValue::Digital(true)));
    /// ```
    pub fn set(&self, id: u32, value: SignalValue) -> bool {
        let mut maps = self.write();
        match value {
            SignalValue::Digital(b) => maps.digital.insert(id, b) != Some(b),
            SignalValue::Analog(n) => maps.analog.insert(id, n) != Some(n),
            SignalValue::Serial(s) => match maps.serial.get(&id) {
                Some(existing) if *existing == s => false,
                _ => {
                    maps.serial.insert(id, s);
                    true
                }
            },
        }
    }

    /// Returns the last value for `(class, id)`, or `None` if it has never
    /// been observed.
    pub fn get(&self, class: SignalClass, id: u32) -> Option<SignalValue> {
        let maps = self.read();
        match class {
            SignalClass::Digital => maps.digital.get(&id).copied().map(SignalValue::Digital),
            SignalClass::Analog => maps.analog.get(&id).copied().map(SignalValue::Analog),
            SignalClass::Serial => maps.serial.get(&id).cloned().map(SignalValue::Serial),
        }
    }

    /// Every known signal, ordered by class (digital, analog, serial) then id.
    pub fn snapshot(&self) -> Vec<(SignalClass, u32, SignalValue)> {
        let maps = self.read();
        let mut out: Vec<(SignalClass, u32, SignalValue)> = Vec::with_capacity(
            maps.digital.len() + maps.analog.len() + maps.serial.len(),
        );
        out.extend(
            maps.digital
                .iter()
                .map(|(id, b)| (SignalClass::Digital, *id, SignalValue::Digital(*b))),
        );
        out.extend(
            maps.analog
                .iter()
                .map(|(id, n)| (SignalClass::Analog, *id, SignalValue::Analog(*n))),
        );
        out.extend(
            maps.serial
                .iter()
                .map(|(id, s)| (SignalClass::Serial, *id, SignalValue::Serial(s.clone()))),
        );
        out.sort_by_key(|(class, id, _)| (*class, *id));
        out
    }

    /// Total number of known signals across all classes.
    pub fn len(&self) -> usize {
        let maps = self.read();
        maps.digital.len() + maps.analog.len() + maps.serial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Maps> {
        self.maps.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Maps> {
        self.maps.write().unwrap_or_else(PoisonError::into_inner)
    }
}
