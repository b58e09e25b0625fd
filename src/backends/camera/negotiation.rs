// SPDX-License-Identifier: GPL-3.0-only

//! Capture format negotiation
//!
//! Picks the output size and frame rate for a sensor from what it reports,
//! given the size the display would like to receive.

use super::types::{
    CameraCapabilities, CaptureParameters, FocusMode, FrameSize, NegotiatedFormat,
    WhiteBalanceMode,
};
use tracing::debug;

/// Choose the capture size closest to `preferred` without going under it
///
/// Sizes covering `preferred` in both axes win, smallest area first. When
/// none does, the largest of the remaining sizes is used. Ties keep device
/// order. Returns `None` only for an empty list.
pub fn choose_optimal_size(sizes: &[FrameSize], preferred: FrameSize) -> Option<FrameSize> {
    let (big_enough, too_small): (Vec<FrameSize>, Vec<FrameSize>) =
        sizes.iter().partition(|size| size.covers(preferred));

    let chosen = if !big_enough.is_empty() {
        big_enough
            .iter()
            .copied()
            .reduce(|best, size| if size.area() < best.area() { size } else { best })
    } else {
        too_small
            .iter()
            .copied()
            .reduce(|best, size| if size.area() > best.area() { size } else { best })
    };

    let chosen = chosen.or_else(|| sizes.first().copied());
    debug!(?preferred, ?chosen, candidates = sizes.len(), "Chose capture size");
    chosen
}

/// Choose the frame rate for a sensor given the preview ceiling
///
/// The ceiling itself when supported, else the fastest rate under it, else
/// the slowest rate on offer.
pub fn choose_frame_rate(rates: &[u32], ceiling: u32) -> Option<u32> {
    if rates.contains(&ceiling) {
        return Some(ceiling);
    }
    rates
        .iter()
        .copied()
        .filter(|&rate| rate <= ceiling)
        .max()
        .or_else(|| rates.iter().copied().min())
}

/// Build the parameter set for a negotiated format
///
/// Focus, white balance and stabilization are only requested when the
/// sensor advertises them.
pub fn capture_parameters(
    capabilities: &CameraCapabilities,
    format: NegotiatedFormat,
) -> CaptureParameters {
    let focus = if capabilities
        .focus_modes
        .contains(&FocusMode::ContinuousVideo)
    {
        Some(FocusMode::ContinuousVideo)
    } else {
        None
    };
    let white_balance = if capabilities
        .white_balance_modes
        .contains(&WhiteBalanceMode::Auto)
    {
        Some(WhiteBalanceMode::Auto)
    } else {
        None
    };

    CaptureParameters {
        size: format.size,
        frame_rate: format.frame_rate,
        focus,
        white_balance,
        stabilization: capabilities.stabilization,
        torch: false,
        recording_hint: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: [FrameSize; 4] = [
        FrameSize::new(176, 144),
        FrameSize::new(320, 240),
        FrameSize::new(640, 480),
        FrameSize::new(1280, 720),
    ];

    #[test]
    fn exact_match_is_chosen() {
        assert_eq!(
            choose_optimal_size(&TABLE, FrameSize::new(640, 480)),
            Some(FrameSize::new(640, 480))
        );
    }

    #[test]
    fn smallest_covering_size_is_chosen() {
        assert_eq!(
            choose_optimal_size(&TABLE, FrameSize::new(700, 500)),
            Some(FrameSize::new(1280, 720))
        );
    }

    #[test]
    fn largest_size_when_nothing_covers() {
        assert_eq!(
            choose_optimal_size(&TABLE, FrameSize::new(4000, 3000)),
            Some(FrameSize::new(1280, 720))
        );
    }

    #[test]
    fn one_axis_too_small_does_not_cover() {
        let sizes = [FrameSize::new(1920, 400), FrameSize::new(800, 600)];
        // 1920x400 is too short, so the larger-area fallback picks among both
        assert_eq!(
            choose_optimal_size(&sizes, FrameSize::new(1000, 500)),
            Some(FrameSize::new(1920, 400))
        );
    }

    #[test]
    fn ties_keep_device_order() {
        let sizes = [FrameSize::new(800, 600), FrameSize::new(600, 800)];
        assert_eq!(
            choose_optimal_size(&sizes, FrameSize::new(100, 100)),
            Some(FrameSize::new(800, 600))
        );
    }

    #[test]
    fn result_is_always_a_member() {
        for preferred in [
            FrameSize::new(1, 1),
            FrameSize::new(176, 144),
            FrameSize::new(321, 241),
            FrameSize::new(1280, 721),
            FrameSize::new(0, 0),
        ] {
            let chosen = choose_optimal_size(&TABLE, preferred).unwrap();
            assert!(TABLE.contains(&chosen), "{:?} -> {:?}", preferred, chosen);
        }
    }

    #[test]
    fn empty_list_has_no_choice() {
        assert_eq!(choose_optimal_size(&[], FrameSize::new(640, 480)), None);
    }

    #[test]
    fn frame_rate_prefers_ceiling() {
        assert_eq!(choose_frame_rate(&[15, 30, 60], 30), Some(30));
    }

    #[test]
    fn frame_rate_falls_back_below_ceiling() {
        assert_eq!(choose_frame_rate(&[10, 24, 60], 30), Some(24));
    }

    #[test]
    fn frame_rate_uses_slowest_when_all_exceed_ceiling() {
        assert_eq!(choose_frame_rate(&[120, 60], 30), Some(60));
        assert_eq!(choose_frame_rate(&[], 30), None);
    }

    #[test]
    fn parameters_only_request_supported_features() {
        let format = NegotiatedFormat {
            size: FrameSize::new(640, 480),
            frame_rate: 30,
        };
        let bare = capture_parameters(&CameraCapabilities::default(), format);
        assert_eq!(bare.focus, None);
        assert_eq!(bare.white_balance, None);
        assert!(!bare.stabilization);

        let full = CameraCapabilities {
            focus_modes: vec![FocusMode::Auto, FocusMode::ContinuousVideo],
            white_balance_modes: vec![WhiteBalanceMode::Auto],
            stabilization: true,
            ..CameraCapabilities::default()
        };
        let params = capture_parameters(&full, format);
        assert_eq!(params.focus, Some(FocusMode::ContinuousVideo));
        assert_eq!(params.white_balance, Some(WhiteBalanceMode::Auto));
        assert!(params.stabilization);
    }
}
