//! Camera devices as seen by a scan session.

use std::sync::Arc;

use bevy::prelude::*;

use crate::{
    error::Result,
    frame::FrameSnapshot,
    options::{CaptureFormat, FacingPreference, ScannerOptions},
    orientation::Rotation,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Reflect)]
pub enum Facing {
    Front,
    Rear,
    /// Plugged-in cameras with no notion of front or back.
    External,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
pub enum LensKind {
    Wide,
    UltraWide,
    Telephoto,
    #[default]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Reflect)]
pub struct DeviceInfo {
    pub name: String,
    pub facing: Facing,
    pub lens: LensKind,
}

impl DeviceInfo {
    /// Classifies a device from the strings its driver reports.
    pub fn classify(name: impl Into<String>, description: &str) -> Self {
        let name = name.into();
        let haystack = format!("{name} {description}").to_lowercase();

        let facing = if haystack.contains("front") || haystack.contains("facetime") {
            Facing::Front
        } else if haystack.contains("back") || haystack.contains("rear") {
            Facing::Rear
        } else {
            Facing::External
        };

        let lens = if haystack.contains("ultra wide") || haystack.contains("ultrawide") {
            LensKind::UltraWide
        } else if haystack.contains("telephoto") {
            LensKind::Telephoto
        } else if haystack.contains("wide") {
            LensKind::Wide
        } else {
            LensKind::Unknown
        };

        Self { name, facing, lens }
    }
}

/// What a session asks of the device it opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub format: CaptureFormat,
}

impl From<&ScannerOptions> for CaptureRequest {
    fn from(options: &ScannerOptions) -> Self {
        Self {
            width: options.width,
            height: options.height,
            frame_rate: options.frame_rate,
            format: options.capture_format,
        }
    }
}

/// Enumerates and opens cameras.
pub trait CameraBackend: Send + Sync + 'static {
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    fn open(&mut self, device: &DeviceInfo, request: &CaptureRequest)
    -> Result<Box<dyn CaptureDevice>>;
}

/// An opened camera.
pub trait CaptureDevice: Send + Sync + 'static {
    fn info(&self) -> &DeviceInfo;

    fn play(&mut self) -> Result<()>;

    /// Stops capturing and releases the device. Calling it again does
    /// nothing.
    fn stop(&mut self);

    /// The newest frame captured since the last call, if any.
    fn latest_frame(&mut self) -> Option<Arc<FrameSnapshot>>;

    /// How far the picture must be turned to appear upright.
    fn rotation(&self) -> Rotation {
        Rotation::Deg0
    }

    fn vertically_mirrored(&self) -> bool {
        false
    }
}

/// Picks the device a session should open.
///
/// An exact name always wins. Otherwise the first device facing the
/// preferred way is used, with a plain wide lens ahead of ultra-wide or
/// telephoto ones, and failing that the first device at all.
pub fn select_device<'a>(
    devices: &'a [DeviceInfo],
    options: &ScannerOptions,
) -> Option<&'a DeviceInfo> {
    if let Some(name) = &options.device_name {
        return devices.iter().find(|device| &device.name == name);
    }

    let wanted = match options.facing {
        FacingPreference::Rear => Some(Facing::Rear),
        FacingPreference::Front => Some(Facing::Front),
        FacingPreference::Any => None,
    };

    let facing_matches =
        |device: &&DeviceInfo| wanted.is_none_or(|facing| device.facing == facing);

    devices
        .iter()
        .filter(facing_matches)
        .find(|device| device.lens == LensKind::Wide)
        .or_else(|| {
            devices
                .iter()
                .filter(facing_matches)
                .find(|device| device.lens == LensKind::Unknown)
        })
        .or_else(|| devices.iter().find(facing_matches))
        .or_else(|| devices.first())
}
