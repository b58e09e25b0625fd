// SPDX-License-Identifier: GPL-3.0-only

//! Media plumbing around the container files the recorder produces
//!
//! - [`encoders`]: H.264/HEVC encoder selection, hardware first
//! - [`inspect`]: width, height, duration and single frames from a finished file
//! - [`decoder`]: real-time looped decoding for review playback

pub mod decoder;
pub mod encoders;
pub mod inspect;

pub use decoder::{DecodedFrame, DecoderFactory, GstDecoderFactory, MediaDecoder};
pub use inspect::{GstMediaInspector, MediaInfo, MediaInspector};
