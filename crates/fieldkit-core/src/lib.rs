//! FieldKit Core Library
//!
//! This crate provides shared types, errors, and configuration for the
//! FieldKit offline layer.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ClientConfig, FieldKitConfig, LoggingConfig, NotificationConfig, WorkerConfig,
};
pub use error::{FieldKitError, FieldKitResult};
pub use types::{BannerSuppression, PolicyKind, Surface};
