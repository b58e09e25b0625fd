// SPDX-License-Identifier: GPL-3.0-only

//! Filter catalog
//!
//! Maps the closed set of user-facing filter selectors onto immutable program
//! descriptors. Descriptors are `'static`, so the renderer and the encoder can
//! hold references to them from any thread without synchronization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shader program family used to draw a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Straight texture sample
    PassThrough,
    /// Luminance only
    Monochrome,
    /// 3×3 convolution with optional color bias
    Kernel,
}

impl ProgramKind {
    /// Mode value consumed by the fragment shader
    pub fn shader_mode(self) -> u32 {
        match self {
            ProgramKind::PassThrough => 0,
            ProgramKind::Monochrome => 1,
            ProgramKind::Kernel => 2,
        }
    }
}

/// Immutable description of how a frame is drawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterDescriptor {
    pub selector: FilterSelector,
    pub program: ProgramKind,
    /// Row-major 3×3 kernel; only meaningful for [`ProgramKind::Kernel`]
    pub kernel: Option<[f32; 9]>,
    /// Added to every output channel after convolution
    pub color_bias: f32,
}

impl FilterDescriptor {
    pub fn is_pass_through(&self) -> bool {
        self.program == ProgramKind::PassThrough
    }
}

/// User-facing filter choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterSelector {
    /// No filter applied
    #[default]
    None,
    /// Same program as `None`, kept as a distinct user choice
    Normal,
    BlackWhite,
    Blur,
    Sharpen,
    EdgeDetect,
    Emboss,
}

impl FilterSelector {
    /// All selectors in menu order
    pub const ALL: [FilterSelector; 7] = [
        FilterSelector::None,
        FilterSelector::Normal,
        FilterSelector::BlackWhite,
        FilterSelector::Blur,
        FilterSelector::Sharpen,
        FilterSelector::EdgeDetect,
        FilterSelector::Emboss,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            FilterSelector::None => "none",
            FilterSelector::Normal => "normal",
            FilterSelector::BlackWhite => "black-white",
            FilterSelector::Blur => "blur",
            FilterSelector::Sharpen => "sharpen",
            FilterSelector::EdgeDetect => "edge-detect",
            FilterSelector::Emboss => "emboss",
        }
    }

    /// Stable index used for atomic storage
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Inverse of [`FilterSelector::index`]; out-of-range values are rejected
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl fmt::Display for FilterSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for FilterSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if let Ok(index) = lowered.parse::<u8>() {
            return Self::from_index(index).ok_or_else(|| format!("Unknown filter index: {}", s));
        }
        Self::ALL
            .into_iter()
            .find(|selector| {
                selector.display_name() == lowered
                    || selector.display_name().replace('-', "_") == lowered
            })
            .ok_or_else(|| format!("Unknown filter: {}", s))
    }
}

static NONE: FilterDescriptor = FilterDescriptor {
    selector: FilterSelector::None,
    program: ProgramKind::PassThrough,
    kernel: None,
    color_bias: 0.0,
};

static NORMAL: FilterDescriptor = FilterDescriptor {
    selector: FilterSelector::Normal,
    program: ProgramKind::PassThrough,
    kernel: None,
    color_bias: 0.0,
};

static BLACK_WHITE: FilterDescriptor = FilterDescriptor {
    selector: FilterSelector::BlackWhite,
    program: ProgramKind::Monochrome,
    kernel: None,
    color_bias: 0.0,
};

static BLUR: FilterDescriptor = FilterDescriptor {
    selector: FilterSelector::Blur,
    program: ProgramKind::Kernel,
    kernel: Some([
        1.0 / 16.0,
        2.0 / 16.0,
        1.0 / 16.0,
        2.0 / 16.0,
        4.0 / 16.0,
        2.0 / 16.0,
        1.0 / 16.0,
        2.0 / 16.0,
        1.0 / 16.0,
    ]),
    color_bias: 0.0,
};

static SHARPEN: FilterDescriptor = FilterDescriptor {
    selector: FilterSelector::Sharpen,
    program: ProgramKind::Kernel,
    kernel: Some([0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0]),
    color_bias: 0.0,
};

static EDGE_DETECT: FilterDescriptor = FilterDescriptor {
    selector: FilterSelector::EdgeDetect,
    program: ProgramKind::Kernel,
    kernel: Some([-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0]),
    color_bias: 0.0,
};

static EMBOSS: FilterDescriptor = FilterDescriptor {
    selector: FilterSelector::Emboss,
    program: ProgramKind::Kernel,
    kernel: Some([2.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0]),
    color_bias: 0.5,
};

/// Look up the descriptor for a selector
pub fn resolve(selector: FilterSelector) -> &'static FilterDescriptor {
    match selector {
        FilterSelector::None => &NONE,
        FilterSelector::Normal => &NORMAL,
        FilterSelector::BlackWhite => &BLACK_WHITE,
        FilterSelector::Blur => &BLUR,
        FilterSelector::Sharpen => &SHARPEN,
        FilterSelector::EdgeDetect => &EDGE_DETECT,
        FilterSelector::Emboss => &EMBOSS,
    }
}

/// Descriptor forced while a finished recording is played back
pub fn pass_through() -> &'static FilterDescriptor {
    &NONE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_selector_resolves_to_itself() {
        for selector in FilterSelector::ALL {
            assert_eq!(resolve(selector).selector, selector);
        }
    }

    #[test]
    fn kernel_programs_carry_a_kernel() {
        for selector in FilterSelector::ALL {
            let descriptor = resolve(selector);
            assert_eq!(
                descriptor.kernel.is_some(),
                descriptor.program == ProgramKind::Kernel,
                "{} kernel/program mismatch",
                selector
            );
        }
    }

    #[test]
    fn blur_kernel_is_normalized() {
        let sum: f32 = resolve(FilterSelector::Blur).kernel.unwrap().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn only_emboss_has_color_bias() {
        for selector in FilterSelector::ALL {
            let expected = if selector == FilterSelector::Emboss { 0.5 } else { 0.0 };
            assert_eq!(resolve(selector).color_bias, expected);
        }
    }

    #[test]
    fn none_and_normal_share_the_pass_through_program() {
        assert!(resolve(FilterSelector::None).is_pass_through());
        assert!(resolve(FilterSelector::Normal).is_pass_through());
        assert_eq!(
            resolve(FilterSelector::BlackWhite).program,
            ProgramKind::Monochrome
        );
    }

    #[test]
    fn parse_accepts_names_and_indices() {
        assert_eq!("emboss".parse::<FilterSelector>(), Ok(FilterSelector::Emboss));
        assert_eq!("edge_detect".parse::<FilterSelector>(), Ok(FilterSelector::EdgeDetect));
        assert_eq!("3".parse::<FilterSelector>(), Ok(FilterSelector::Blur));
    }

    #[test]
    fn parse_rejects_unknown_values() {
        assert!("7".parse::<FilterSelector>().is_err());
        assert!("sepia".parse::<FilterSelector>().is_err());
    }
}
