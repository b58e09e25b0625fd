// SPDX-License-Identifier: GPL-3.0-only

//! Processing pipelines
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │   Renderer   │ ──▶ │  Encoder Sidecar  │ ──▶ │   MP4 File   │
//! │ (shared tex) │     │  - own GPU ctx    │     │              │
//! │              │     │  - HW encoding    │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```

pub mod video;
