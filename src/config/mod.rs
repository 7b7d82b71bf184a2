//! Ambient settings distinct from the per-run runner configuration.

pub mod settings;

pub use settings::Settings;
