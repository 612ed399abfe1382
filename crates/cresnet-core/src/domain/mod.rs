//! Domain entities for the Cresnet client.
//!
//! Pure data types with no I/O: what a signal is, what values it can carry,
//! and the store that tracks the processor's published state.  Code in the
//! client crate depends on these types, never the other way round.

/// Signal classes and typed values.
pub mod signal;

/// Sparse last-known-value store keyed by `(class, id)`.
pub mod state_store;
