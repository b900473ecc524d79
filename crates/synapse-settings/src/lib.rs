//! # synapse-settings
//!
//! Configuration management with layered sources for Synapse context sharing.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`SyncSettings::default()`]
//! 2. **JSON file** — deep-merged over defaults
//! 3. **Environment variables** — `SYNAPSE_*` overrides (highest priority)
//!
//! Out-of-range values are clamped with a warning rather than rejected, so
//! hosts get corrected behavior instead of a confusing startup error.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path};
pub use types::*;
