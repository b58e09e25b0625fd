// SPDX-License-Identifier: GPL-3.0-only

//! MP4 muxing and file output

use gstreamer as gst;
use gstreamer::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Muxer configuration
pub struct MuxerConfig {
    pub muxer: gst::Element,
    pub filesink: gst::Element,
    pub output_path: PathBuf,
}

/// Create an MP4 muxer writing to `output_path`
///
/// The muxer is configured non-streamable so the moov atom carries the
/// final duration, which the asset manager reads back when probing.
pub fn create_muxer(output_path: &Path) -> Result<MuxerConfig, String> {
    info!(path = %output_path.display(), "Creating muxer");

    let muxer = gst::ElementFactory::make("mp4mux")
        .build()
        .map_err(|e| format!("Failed to create mp4mux: {}", e))?;

    if muxer.has_property("streamable") {
        muxer.set_property("streamable", false);
        debug!("Configured mp4mux with streamable=false for seekable output");
    }

    let location = output_path
        .to_str()
        .ok_or_else(|| format!("Output path is not valid UTF-8: {}", output_path.display()))?;
    let filesink = gst::ElementFactory::make("filesink")
        .property("location", location)
        .build()
        .map_err(|e| format!("Failed to create filesink: {}", e))?;

    Ok(MuxerConfig {
        muxer,
        filesink,
        output_path: output_path.to_path_buf(),
    })
}

/// Link the encoded stream (parser or encoder) to the muxer
pub fn link_video_to_muxer(encoded: &gst::Element, muxer: &gst::Element) -> Result<(), String> {
    encoded
        .link(muxer)
        .map_err(|_| "Failed to link video encoder to muxer".to_string())?;

    debug!("Video encoder linked to muxer");
    Ok(())
}

pub fn link_muxer_to_sink(muxer: &gst::Element, filesink: &gst::Element) -> Result<(), String> {
    muxer
        .link(filesink)
        .map_err(|_| "Failed to link muxer to filesink".to_string())?;

    debug!("Muxer linked to filesink");
    Ok(())
}
