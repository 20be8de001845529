//! Credential routing strategy (spec §4.1): sticky-session routing,
//! power-of-two-choices weighted selection, cooldowns, and refresh-ahead.
//!
//! Depends on `gw-credential` for the candidate pool and OAuth refresh but
//! owns none of that state itself — cooldowns and sticky mappings are
//! routing-local concerns the credential store never sees.

mod cooldown;
mod pick_log;
mod sticky;
mod strategy;

pub use cooldown::{cooldown_duration, CooldownEntry};
pub use pick_log::{PickLogEntry, PickLogRing};
pub use sticky::derive_sticky_key;
pub use strategy::{CooldownInfo, RoutingStrategy};
