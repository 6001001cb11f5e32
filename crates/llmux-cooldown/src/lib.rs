//! Process-wide cooldown authority.
//!
//! Answers "is this (provider, client-type) usable right now?" and records
//! failures that drive future unavailability. State lives in memory under one
//! RW lock; every mutation writes through to a [`CooldownStore`] and is
//! broadcast to subscribers fire-and-forget.

mod engine;
mod policy;

pub use engine::{
    ALL_CLIENT_TYPES, CooldownChange, CooldownEngine, CooldownInfo, CooldownStore, FailureEntry,
    NullStore, StoreError,
};
pub use policy::{CooldownReason, Policy, default_policies};
