//! Low-level primitives for the checkpoint scheduler.

/// Concurrency primitives and synchronization.
///
/// Fan-in completion tracking and the checkpoint runner pool.
pub mod concurrency;
