//! Period lifecycle use-case services.
//!
//! # Responsibility
//! - Orchestrate store calls into the lifecycle, completion and streak
//!   operations.
//! - Keep hosts (CLI, HTTP handlers, sweep triggers) decoupled from storage.
//!
//! # Invariants
//! - Services only mutate periods through conditional writes.
//! - A lost conditional write is retried at most `MAX_CONFLICT_RETRIES`
//!   times, then surfaced as `EngineError::ConcurrentModification`.

pub mod completion_service;
pub mod lifecycle_service;
pub mod streak_service;

/// Reload-and-recheck attempts after a lost conditional write.
pub const MAX_CONFLICT_RETRIES: u32 = 1;
