#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **orderflow-coordination** – Distributed lock wrapper (§4.4), scheduled
//! leader lock (§4.10), and fencing conditional-writer glue (§4.3) for the
//! orderflow control plane.
//!
//! None of these primitives are the correctness mechanism on their own.
//! The lock is advisory — it only reduces contention; the fencing counter
//! in `orderflow-store-core` is what actually guarantees linearizability
//! of guarded writes even if two callers briefly believe they both hold
//! the same lease.

mod fencing;
mod lock;

pub use fencing::{guarded_write, FencingGlueError};
pub use lock::{DistributedLock, LeaderLockError, LockGuard, ScheduledLeaderLock};
