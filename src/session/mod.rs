//! Publish settings and identifiers
//!
//! Value types a caller supplies when starting a session, and the generators
//! for the ids a session gets when the caller leaves them out.

pub mod ids;
pub mod quality;

pub use ids::{generate_room_id, generate_stream_id};
pub use quality::{PublishSettings, QualitySettings};
