//! Test support: a Docker PostgreSQL container and a scripted transport.

pub mod container;
pub mod recording;

pub use container::PostgresContainer;
pub use recording::{raw_field, Call, RecordingTransport};
