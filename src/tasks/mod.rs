//! Background Tasks Module
//!
//! Contains the deferred tasks the cache schedules.
//!
//! # Tasks
//! - TTL Expiry: clears a key's entries once its lifetime has elapsed

mod expiry;

pub(crate) use expiry::{expiry_runtime, spawn_expiry_task};
