// SPDX-License-Identifier: GPL-3.0-only

//! Video recording: encoder sidecar and its GStreamer backend
//!
//! The sidecar owns the recording state machine and runs on its own thread;
//! the renderer only forwards textures to it. [`GstEncoderBackend`] draws
//! those textures through the frame program, reads them back and encodes
//! them into an MP4 file.

pub mod muxer;
pub mod recorder;
pub mod sidecar;

pub use recorder::GstEncoderBackend;
pub use sidecar::{
    EncoderBackend, EncoderSession, EncoderSidecar, ForwardedFrame, RecordingConfig,
    RecordingState, RecordingSummary,
};
