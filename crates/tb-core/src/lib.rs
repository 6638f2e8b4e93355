//! Shared configuration for the termbridge services.
//!
//! The [`config`] module owns the TOML-backed [`config::Config`] model, its
//! environment overrides, and semantic validation.

pub mod config;
