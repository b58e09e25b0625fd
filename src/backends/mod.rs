// SPDX-License-Identifier: GPL-3.0-only

//! Hardware backends
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              Session Controller              │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────┴───────────────────────┐
//! │            Capture Source Adapter            │
//! │  ┌───────────────────┐  ┌─────────────────┐  │
//! │  │  CameraBackend    │  │  Flash / V4L2   │  │
//! │  │  (GStreamer)      │  │  controls       │  │
//! │  └───────────────────┘  └─────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

pub mod camera;
