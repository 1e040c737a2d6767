//! Live camera preview and barcode scanning for Bevy UI.
//!
//! Add [`WebcamScannerPlugin`], start a session through the [`Scanner`]
//! system parameter, bind one or more `ImageNode`s to it and request scans.
//! Finished scans arrive as [`ScanFinished`] messages.

#[cfg(target_arch = "wasm32")]
mod browser;
mod decode;
mod device;
mod error;
mod frame;
#[cfg(not(target_arch = "wasm32"))]
mod native;
mod options;
mod orientation;
mod permission;
mod preview;
mod scan_loop;
mod session;

use bevy::prelude::*;

#[cfg(target_arch = "wasm32")]
pub use browser::{BrowserBackend, frame_input};
pub use decode::{BarcodeFormat, BarcodeReader, DecodeHints, DecodedBarcode, QrReader, ScanResult};
pub use device::{
    CameraBackend, CaptureDevice, CaptureRequest, DeviceInfo, Facing, LensKind, select_device,
};
pub use error::{Result, ScanError};
pub use frame::{FrameSnapshot, LumaFrame};
#[cfg(not(target_arch = "wasm32"))]
pub use native::{NativeBackend, NativeCamera};
pub use options::{CaptureFormat, FacingPreference, ScannerOptions};
pub use orientation::{
    DisplayRegion, FrameView, PixelRegion, PlatformFlags, RegionError, Rotation, UvRect,
    fit_uv_rect,
};
pub use permission::{Authorization, HostPermission, PermissionGate};
pub use preview::{PreviewPreset, PreviewPresets, PreviewTarget};
pub use scan_loop::{CancelToken, DecodeMode, ScanLoop, ScanOutcome, ScanRequest};
pub use session::{ScanFinished, ScanTicket, Scanner, ScannerHost, SessionId, TicketId};

/// Systems that move frames, drive scans and refresh previews, in that
/// order.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScannerSystems;

/// Adds camera sessions, preview binding and scanning to an app.
///
/// The plugin inserts a [`ScannerHost`] for the platform camera unless one
/// was inserted before it.
#[derive(Default)]
pub struct WebcamScannerPlugin {
    /// Where decode attempts run. `None` picks [`DecodeMode::for_platform`].
    pub decode_mode: Option<DecodeMode>,
}

impl WebcamScannerPlugin {
    fn decode_mode(&self) -> DecodeMode {
        self.decode_mode.unwrap_or_else(DecodeMode::for_platform)
    }
}

impl Plugin for WebcamScannerPlugin {
    fn build(&self, app: &mut App) {
        app.init_asset::<PreviewPreset>();
        app.add_message::<ScanFinished>();

        // A host inserted before the plugin (custom backend or reader) wins.
        if !app.world().contains_resource::<ScannerHost>() {
            app.insert_resource(ScannerHost::new(
                platform_backend(),
                HostPermission,
                QrReader,
                self.decode_mode(),
            ));
        }

        app.register_type::<PreviewTarget>();
        app.register_type::<ScanOutcome>();
        app.register_type::<FrameView>();

        app.add_systems(
            Update,
            (
                preview::upload_frames,
                session::drive_scans,
                preview::refresh_preview_targets,
            )
                .chain()
                .in_set(ScannerSystems),
        );
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn platform_backend() -> NativeBackend {
    NativeBackend
}

#[cfg(target_arch = "wasm32")]
fn platform_backend() -> BrowserBackend {
    BrowserBackend
}
