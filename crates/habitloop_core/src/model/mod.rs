//! Domain model for obligations and their period lifecycle.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep recurrence arithmetic pure and free of persistence concerns.
//!
//! # Invariants
//! - Every record is identified by a stable UUID.
//! - Periods and entries are never deleted by the core, only finalized or
//!   appended.

pub mod entry;
pub mod obligation;
pub mod period;
pub mod recurrence;
