// SPDX-License-Identifier: GPL-3.0-only

//! Camera recorder: filtered preview, recording and review
//!
//! Frames travel from a camera into a shared GPU texture, through a filter
//! program to the display and, while recording, into a hardware video
//! encoder running on its own thread. Finished files are probed, thumbnailed
//! and played back through the same renderer.
//!
//! # Architecture
//!
//! - [`backends`]: camera discovery, capture parameter negotiation, torch
//! - [`gpu`]: shared texture namespace and the frame surface
//! - [`renderer`]: draw cycle on a dedicated render thread
//! - [`shaders`]: the WGSL frame program used by renderer and encoder
//! - [`filters`]: filter catalog
//! - [`pipelines`]: encoder sidecar and its GStreamer backend
//! - [`media`]: encoder selection, file inspection, playback decoding
//! - [`storage`]: per-recording directories and thumbnails
//! - [`playback`]: review playback into the frame surface
//! - [`session`]: command sequencing for the host
//! - [`config`]: persisted user settings
//!
//! ```text
//! camera ──► FrameSurface ──► Renderer ──► display
//!                 ▲              │
//!     playback ───┘              └──► EncoderSidecar ──► <key>.mp4
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod filters;
pub mod flash;
pub mod gpu;
pub mod media;
pub mod pipelines;
pub mod playback;
pub mod renderer;
pub mod session;
pub mod shaders;
pub mod storage;

pub use config::Config;
pub use constants::BitratePreset;
pub use errors::{CoreError, CoreResult, ErrorKind};
pub use session::{RecordOutcome, RecordedVideo, SessionController, SessionListener};
