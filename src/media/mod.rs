//! Media handles, tracks and frames
//!
//! The minimal media model the bridges need: how many live tracks of each
//! kind a stream has, a way to stop them, and a frame fan-out for synthetic
//! capture. Encoding and transport belong to the collaborators.

pub mod frame;
pub mod synthetic;
pub mod track;

pub use frame::MediaFrame;
pub use synthetic::{canvas_size, spawn_draw_loop, DEFAULT_FRAME_RATE};
pub use track::{MediaHandle, MediaTrack, TrackKind};
