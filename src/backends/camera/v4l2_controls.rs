// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 sensor controls via direct ioctl
//!
//! Only the controls the capture adapter negotiates are covered: continuous
//! autofocus, automatic white balance and image stabilization.

use super::types::{CaptureParameters, FocusMode, WhiteBalanceMode};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

// ===== V4L2 Control IDs =====
const V4L2_CTRL_CLASS_USER: u32 = 0x00980000;
const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;

const V4L2_CID_BASE: u32 = V4L2_CTRL_CLASS_USER | 0x900;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

/// Auto white balance (boolean)
pub const V4L2_CID_AUTO_WHITE_BALANCE: u32 = V4L2_CID_BASE + 12;
/// Continuous autofocus (boolean)
pub const V4L2_CID_FOCUS_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 12;
/// Image stabilization (boolean)
pub const V4L2_CID_IMAGE_STABILIZATION: u32 = V4L2_CID_CAMERA_CLASS_BASE + 22;

const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;

// (dir << 30) | (size << 16) | ('V' << 8) | nr
/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// Whether `device_path` exposes an enabled control
pub fn has_control(device_path: &str, control_id: u32) -> bool {
    let Ok(file) = File::open(device_path) else {
        return false;
    };

    let mut qctrl = V4l2Queryctrl {
        id: control_id,
        ctrl_type: 0,
        name: [0; 32],
        minimum: 0,
        maximum: 0,
        step: 0,
        default_value: 0,
        flags: 0,
        reserved: [0; 2],
    };
    // SAFETY: qctrl is a valid v4l2_queryctrl for the lifetime of the call
    let result = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            VIDIOC_QUERYCTRL,
            &mut qctrl as *mut V4l2Queryctrl,
        )
    };

    result >= 0 && qctrl.flags & V4L2_CTRL_FLAG_DISABLED == 0
}

/// Set a control value
pub fn set_control(device_path: &str, control_id: u32, value: i32) -> Result<(), String> {
    let file = File::open(device_path).map_err(|e| format!("Failed to open device: {}", e))?;

    let mut ctrl = V4l2Control {
        id: control_id,
        value,
    };
    // SAFETY: ctrl is a valid v4l2_control for the lifetime of the call
    let result = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            VIDIOC_S_CTRL,
            &mut ctrl as *mut V4l2Control,
        )
    };

    if result < 0 {
        let errno = std::io::Error::last_os_error();
        warn!(device_path, control_id, value, ?errno, "Failed to set V4L2 control");
        return Err(format!("Failed to set control {:#x}: {}", control_id, errno));
    }
    Ok(())
}

/// Sensor features reachable through a V4L2 node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorControls {
    pub focus_modes: Vec<FocusMode>,
    pub white_balance_modes: Vec<WhiteBalanceMode>,
    pub stabilization: bool,
}

impl SensorControls {
    /// Probe a device node; anything but `/dev/video*` reports no controls
    pub fn probe(device_path: &str) -> Self {
        if !device_path.starts_with("/dev/video") {
            return Self::default();
        }

        let mut controls = Self::default();
        if has_control(device_path, V4L2_CID_FOCUS_AUTO) {
            controls.focus_modes = vec![FocusMode::ContinuousVideo, FocusMode::Fixed];
        }
        if has_control(device_path, V4L2_CID_AUTO_WHITE_BALANCE) {
            controls.white_balance_modes = vec![WhiteBalanceMode::Auto, WhiteBalanceMode::Manual];
        }
        controls.stabilization = has_control(device_path, V4L2_CID_IMAGE_STABILIZATION);
        debug!(device_path, ?controls, "Probed sensor controls");
        controls
    }

    /// Write focus, white balance and stabilization for `params`
    ///
    /// Controls the device lacks are skipped; the first failure is returned
    /// after every control has been attempted.
    pub fn apply(&self, device_path: &str, params: &CaptureParameters) -> Result<(), String> {
        let mut first_error = None;
        let mut record = |result: Result<(), String>| {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        };

        if let Some(focus) = params.focus
            && !self.focus_modes.is_empty()
        {
            let auto = i32::from(focus == FocusMode::ContinuousVideo);
            record(set_control(device_path, V4L2_CID_FOCUS_AUTO, auto));
        }
        if let Some(white_balance) = params.white_balance
            && !self.white_balance_modes.is_empty()
        {
            let auto = i32::from(white_balance == WhiteBalanceMode::Auto);
            record(set_control(device_path, V4L2_CID_AUTO_WHITE_BALANCE, auto));
        }
        if self.stabilization {
            record(set_control(
                device_path,
                V4L2_CID_IMAGE_STABILIZATION,
                i32::from(params.stabilization),
            ));
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_ids_match_videodev2() {
        assert_eq!(V4L2_CID_AUTO_WHITE_BALANCE, 0x0098090c);
        assert_eq!(V4L2_CID_FOCUS_AUTO, 0x009a090c);
        assert_eq!(V4L2_CID_IMAGE_STABILIZATION, 0x009a0916);
    }

    #[test]
    fn non_v4l2_nodes_report_no_controls() {
        assert_eq!(SensorControls::probe("pipewire-42"), SensorControls::default());
        assert_eq!(SensorControls::probe(""), SensorControls::default());
    }

    #[test]
    fn missing_device_has_no_controls() {
        assert!(!has_control("/dev/video-does-not-exist", V4L2_CID_FOCUS_AUTO));
    }
}
