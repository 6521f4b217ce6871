//! Kite Kernel
//!
//! Domain types shared by the plugin execution engine and its collaborators:
//! the host call taxonomy, event envelopes, module manifests, the coded
//! [`HostError`](error::HostError) taxonomy and the traits the engine consumes
//! (key/value store, platform client, metrics, logs, usage).

// error module
pub mod error;
pub use error::{HostError, HostErrorKind, KernelError, KernelResult};

// call module
pub mod call;
pub use call::{Call, CallConfig, CallEnvelope, CallResponse, ResponseShape};

// event module
pub mod event;
pub use event::{Event, EventResponse, EventType, GuestError};

// manifest module
pub mod manifest;
pub use manifest::{
    ConfigField, ConfigFieldType, ConfigSchema, ConfigValues, DiscordCommand, Manifest,
};

// host environment and collaborator traits
pub mod env;
pub use env::*;

// config loader
#[cfg(feature = "config")]
pub mod config;
