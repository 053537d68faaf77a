//! # flux-settings
//!
//! Layered configuration for the Flux relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`FluxSettings::default()`]
//! 2. **Settings file**: `~/.flux/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `FLUX_*` and `AMQP_URL` overrides
//!
//! The merged result is validated before it is returned.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path, validate,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_ends_in_flux_dir() {
        let path = settings_path();
        assert!(path.ends_with(".flux/settings.json"), "got: {}", path.display());
    }
}
