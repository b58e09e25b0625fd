// SPDX-License-Identifier: GPL-3.0-only

//! Encoder selection and configuration
//!
//! Hardware encoders are preferred; software encoders keep recording
//! working on machines without VA-API, NVENC or QSV.

pub mod video;

pub use video::{EncoderSpec, SelectedVideoEncoder, VideoCodec, select_video_encoder};
