//! # palaver-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PalaverSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults (optional)
//! 3. **Environment variables**: `OPENAI_*`, `VECTOR_SEARCH_*`, `PORT`, ... (highest priority)
//!
//! After loading, [`PalaverSettings::validate`] checks that the upstream
//! provider is configured and downgrades an incomplete vector search setup
//! to disabled.

#![deny(unsafe_code)]

pub mod cors;
pub mod errors;
pub mod loader;
pub mod types;

pub use cors::parse_cors_origins;
pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
