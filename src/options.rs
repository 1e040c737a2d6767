use std::time::Duration;

use bevy::prelude::*;

use crate::{
    decode::{BarcodeFormat, DecodeHints},
    error::{Result, ScanError},
    preview::PreviewPresets,
};

/// Wire format requested from the capture device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect)]
pub enum CaptureFormat {
    #[default]
    Mjpeg,
    Yuyv,
    Nv12,
}

/// Which camera to pick when no device name is given.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect)]
pub enum FacingPreference {
    #[default]
    Rear,
    Front,
    Any,
}

/// Everything needed to start a scan session.
#[derive(Clone, Debug)]
pub struct ScannerOptions {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub capture_format: CaptureFormat,
    pub barcode_format: BarcodeFormat,
    /// Wait between two failed decode attempts.
    pub scan_interval: Duration,
    pub auto_rotate: bool,
    pub try_inverted: bool,
    /// Open exactly this device instead of applying `facing`.
    pub device_name: Option<String>,
    pub facing: FacingPreference,
    pub presets: PreviewPresets,
    pub is_srgb: bool,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 30,
            capture_format: CaptureFormat::Mjpeg,
            barcode_format: BarcodeFormat::QrCode,
            scan_interval: Duration::from_millis(250),
            auto_rotate: true,
            try_inverted: true,
            device_name: None,
            facing: FacingPreference::Rear,
            presets: PreviewPresets::default(),
            is_srgb: true,
        }
    }
}

impl ScannerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ScanError::InvalidOptions(
                "requested width and height must be positive",
            ));
        }
        if self.frame_rate == 0 {
            return Err(ScanError::InvalidOptions(
                "requested frame rate must be positive",
            ));
        }
        if self.scan_interval.is_zero() {
            return Err(ScanError::InvalidOptions("scan interval must be positive"));
        }
        Ok(())
    }

    pub fn decode_hints(&self) -> DecodeHints {
        DecodeHints {
            format: self.barcode_format,
            auto_rotate: self.auto_rotate,
            try_inverted: self.try_inverted,
        }
    }
}
