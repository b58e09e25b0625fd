// SPDX-License-Identifier: GPL-3.0-only

//! Video encoder selection with hardware acceleration priority
//!
//! Recordings always land in an MP4 container, so only H.264 and HEVC
//! encoders are considered. Hardware encoders are tried first, then software
//! fallbacks.

use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, info, warn};

/// Video codecs usable in the MP4 container, in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// H.264 (best playback compatibility)
    H264,
    /// HEVC/H.265 (better compression)
    HEVC,
}

impl VideoCodec {
    pub fn parser_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264parse",
            VideoCodec::HEVC => "h265parse",
        }
    }
}

/// Static description of an encoder element we know how to configure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSpec {
    /// GStreamer element name
    pub element_name: &'static str,
    pub codec: VideoCodec,
    pub is_hardware: bool,
}

const fn spec(element_name: &'static str, codec: VideoCodec, is_hardware: bool) -> EncoderSpec {
    EncoderSpec {
        element_name,
        codec,
        is_hardware,
    }
}

/// Candidates in priority order
///
/// Hardware H.264 leads because recordings are meant to be shared and
/// played back directly; HEVC hardware still beats any software encoder.
pub const ENCODER_CANDIDATES: &[EncoderSpec] = &[
    spec("vah264enc", VideoCodec::H264, true),
    spec("vaapih264enc", VideoCodec::H264, true),
    spec("nvh264enc", VideoCodec::H264, true),
    spec("qsvh264enc", VideoCodec::H264, true),
    spec("v4l2h264enc", VideoCodec::H264, true),
    spec("vah265enc", VideoCodec::HEVC, true),
    spec("vaapih265enc", VideoCodec::HEVC, true),
    spec("nvh265enc", VideoCodec::HEVC, true),
    spec("x264enc", VideoCodec::H264, false),
    spec("openh264enc", VideoCodec::H264, false),
    spec("x265enc", VideoCodec::HEVC, false),
];

/// First candidate accepted by `is_available`
pub fn pick_encoder(is_available: impl Fn(&str) -> bool) -> Option<EncoderSpec> {
    ENCODER_CANDIDATES
        .iter()
        .copied()
        .find(|candidate| is_available(candidate.element_name))
}

/// Selected video encoder with its parser
pub struct SelectedVideoEncoder {
    pub encoder: gst::Element,
    pub parser: Option<gst::Element>,
    pub spec: EncoderSpec,
}

/// Select and configure the best available encoder for `bitrate_kbps`
pub fn select_video_encoder(bitrate_kbps: u32) -> Result<SelectedVideoEncoder, String> {
    gst::init().map_err(|e| format!("Failed to initialize GStreamer: {}", e))?;

    let spec = pick_encoder(|name| gst::ElementFactory::find(name).is_some()).ok_or_else(|| {
        "No video encoder available. Please install gstreamer1-plugins-ugly (x264enc) or gstreamer1-plugin-openh264".to_string()
    })?;

    let encoder = gst::ElementFactory::make(spec.element_name)
        .build()
        .map_err(|e| format!("Failed to create encoder {}: {}", spec.element_name, e))?;

    info!(
        encoder = spec.element_name,
        codec = ?spec.codec,
        hardware = spec.is_hardware,
        bitrate_kbps,
        "Selected video encoder"
    );
    configure_video_encoder(&encoder, spec.element_name, bitrate_kbps);

    let parser = match gst::ElementFactory::make(spec.codec.parser_name()).build() {
        Ok(parser) => Some(parser),
        Err(e) => {
            warn!("Failed to create parser {}: {}", spec.codec.parser_name(), e);
            None
        }
    };

    Ok(SelectedVideoEncoder {
        encoder,
        parser,
        spec,
    })
}

/// Apply bitrate and latency settings per encoder family
fn configure_video_encoder(encoder: &gst::Element, encoder_name: &str, bitrate: u32) {
    match encoder_name {
        "x264enc" | "x265enc" => {
            let _ = encoder.set_property_from_str("speed-preset", "veryfast");
            let _ = encoder.set_property_from_str("tune", "zerolatency");
            let _ = encoder.set_property("bitrate", bitrate);
            debug!("Configured {}: bitrate={} kbps", encoder_name, bitrate);
        }

        // Old VA-API plugin uses an integer rate-control enum
        "vaapih264enc" | "vaapih265enc" => {
            let _ = encoder.set_property("rate-control", 2); // CBR
            let _ = encoder.set_property("bitrate", bitrate);
            debug!("Configured VA-API encoder: bitrate={} kbps", bitrate);
        }

        "vah264enc" | "vah265enc" => {
            let _ = encoder.set_property_from_str("rate-control", "cbr");
            let _ = encoder.set_property("bitrate", bitrate);
            debug!("Configured VA encoder: bitrate={} kbps", bitrate);
        }

        "nvh264enc" | "nvh265enc" => {
            let _ = encoder.set_property("bitrate", bitrate);
            let _ = encoder.set_property_from_str("rc-mode", "cbr");
            let _ = encoder.set_property_from_str("preset", "low-latency-hq");
            debug!("Configured NVIDIA encoder: bitrate={} kbps", bitrate);
        }

        "qsvh264enc" => {
            let _ = encoder.set_property("bitrate", bitrate);
            debug!("Configured Intel QSV encoder: bitrate={} kbps", bitrate);
        }

        "openh264enc" => {
            let _ = encoder.set_property_from_str("rate-control", "bitrate");
            let _ = encoder.set_property("bitrate", bitrate * 1000); // Bits per second
            let _ = encoder.set_property_from_str("usage-type", "camera");
            debug!("Configured openh264enc: bitrate={} bps", bitrate * 1000);
        }

        "v4l2h264enc" => {
            debug!("Using V4L2 encoder with default configuration");
        }

        _ => {
            debug!("Unknown encoder type, using default configuration");
        }
    }
}
