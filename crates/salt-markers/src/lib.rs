//! Skip predicates for gating integration tests.
//!
//! A predicate returns `None` when the test should run and `Some(reason)`
//! when it should be skipped, with `reason` being the human-readable skip
//! message. Predicates never fail: a missing capability is reported as a
//! skip reason, not an error.
//!
//! The companion macros (`skip_if_binaries_missing!`,
//! `skip_unless_on_darwin!`, ...) early-return from the surrounding test
//! body after printing the reason, giving marker-like ergonomics inside
//! plain `#[test]` functions.

pub mod binaries;
pub mod platform;
pub mod skips;

pub use binaries::*;
pub use platform::*;
pub use skips::*;
