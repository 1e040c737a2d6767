//! Browser cameras. The page owns the `getUserMedia` stream and pushes
//! frames in through [`frame_input`].

use std::{cell::RefCell, sync::Arc};

use wasm_bindgen::prelude::*;

use crate::{
    device::{CameraBackend, CaptureDevice, CaptureRequest, DeviceInfo, Facing, LensKind},
    error::{Result, ScanError},
    frame::FrameSnapshot,
};

const BROWSER_DEVICE: &str = "browser";

thread_local! {
    static PENDING_FRAME: RefCell<Option<FrameSnapshot>> = const { RefCell::new(None) };
}

fn take_pending_frame() -> Option<FrameSnapshot> {
    PENDING_FRAME.with(|cell| cell.borrow_mut().take())
}

/// Hands one RGBA frame from JavaScript to the active session. Frames
/// that were not consumed yet are replaced.
#[wasm_bindgen]
pub fn frame_input(pixel_data: &[u8], width: u32, height: u32) {
    let Some(frame) = FrameSnapshot::new(width, height, pixel_data.to_vec()) else {
        bevy::log::warn!(
            "ignoring frame of {} bytes for {}x{} rgba",
            pixel_data.len(),
            width,
            height
        );
        return;
    };
    PENDING_FRAME.with(|cell| {
        *cell.borrow_mut() = Some(frame);
    });
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BrowserBackend;

impl CameraBackend for BrowserBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            name: BROWSER_DEVICE.to_string(),
            facing: Facing::External,
            lens: LensKind::Unknown,
        }])
    }

    fn open(
        &mut self,
        device: &DeviceInfo,
        _request: &CaptureRequest,
    ) -> Result<Box<dyn CaptureDevice>> {
        if device.name != BROWSER_DEVICE {
            return Err(ScanError::NoDevice);
        }
        Ok(Box::new(BrowserCamera {
            info: device.clone(),
            playing: false,
        }))
    }
}

struct BrowserCamera {
    info: DeviceInfo,
    playing: bool,
}

impl CaptureDevice for BrowserCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn play(&mut self) -> Result<()> {
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.playing = false;
        take_pending_frame();
    }

    fn latest_frame(&mut self) -> Option<Arc<FrameSnapshot>> {
        if !self.playing {
            return None;
        }
        take_pending_frame().map(Arc::new)
    }
}
