//! Kite Testing
//!
//! In-memory collaborators and guest module fixtures for exercising the
//! engine without a chat platform or a persistence layer.

pub mod guests;
pub mod mocks;

pub use mocks::{
    MockPlatformClient, RecordedCall, RecordingLogSink, RecordingMetricsSink, StaticUsage,
};
