//! Desktop cameras through `nokhwa`, captured on a worker thread.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use bevy::prelude::*;
use flume::{Receiver, Sender};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    },
};

use crate::{
    device::{CameraBackend, CaptureDevice, CaptureRequest, DeviceInfo},
    error::{Result, ScanError},
    frame::{FrameSnapshot, rgb_to_rgba},
    options::CaptureFormat,
};

/// Cameras reported by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeBackend;

impl NativeBackend {
    fn query() -> Result<Vec<nokhwa::utils::CameraInfo>> {
        nokhwa::query(ApiBackend::Auto).map_err(|err| ScanError::Camera(err.to_string()))
    }
}

impl CameraBackend for NativeBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(Self::query()?
            .iter()
            .map(|info| DeviceInfo::classify(info.human_name(), &info.description()))
            .collect())
    }

    fn open(
        &mut self,
        device: &DeviceInfo,
        request: &CaptureRequest,
    ) -> Result<Box<dyn CaptureDevice>> {
        let index = Self::query()?
            .into_iter()
            .find(|info| info.human_name() == device.name)
            .map(|info| info.index().clone())
            .ok_or(ScanError::NoDevice)?;

        Ok(Box::new(NativeCamera::new(
            device.clone(),
            index,
            *request,
        )))
    }
}

struct FramePayload {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

struct FrameWorker {
    handle: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl FrameWorker {
    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.join()
        {
            warn!("capture worker exited with error: {:?}", err);
        }
    }
}

impl Drop for FrameWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A `nokhwa` camera streaming into a bounded channel.
pub struct NativeCamera {
    info: DeviceInfo,
    index: CameraIndex,
    request: CaptureRequest,
    receiver: Option<Receiver<FramePayload>>,
    worker: Option<FrameWorker>,
}

impl NativeCamera {
    fn new(info: DeviceInfo, index: CameraIndex, request: CaptureRequest) -> Self {
        Self {
            info,
            index,
            request,
            receiver: None,
            worker: None,
        }
    }
}

fn frame_format(format: CaptureFormat) -> FrameFormat {
    match format {
        CaptureFormat::Mjpeg => FrameFormat::MJPEG,
        CaptureFormat::Yuyv => FrameFormat::YUYV,
        CaptureFormat::Nv12 => FrameFormat::NV12,
    }
}

impl CaptureDevice for NativeCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn play(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let format = CameraFormat::new(
            Resolution::new(self.request.width, self.request.height),
            frame_format(self.request.format),
            self.request.frame_rate,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));
        let mut camera = Camera::new(self.index.clone(), requested)
            .map_err(|err| ScanError::Camera(format!("failed to create camera: {err}")))?;
        camera
            .open_stream()
            .map_err(|err| ScanError::Camera(format!("failed to open camera stream: {err}")))?;

        let resolution = camera.resolution();
        info!(
            "camera `{}` streaming {}x{} at {} fps",
            self.info.name,
            resolution.width_x,
            resolution.height_y,
            camera.frame_rate()
        );

        let (sender, receiver) = flume::bounded(2);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("bevy_webcam_scanner_capture".to_string())
            .spawn(move || capture_frames(camera, sender, worker_stop))
            .map_err(|err| ScanError::Camera(format!("failed to spawn capture worker: {err}")))?;

        self.receiver = Some(receiver);
        self.worker = Some(FrameWorker {
            handle: Some(handle),
            stop,
        });
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the receiver unblocks a worker waiting on a full channel.
        self.receiver = None;
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
            info!("camera `{}` stopped", self.info.name);
        }
    }

    fn latest_frame(&mut self) -> Option<Arc<FrameSnapshot>> {
        let receiver = self.receiver.as_ref()?;
        let mut latest = None;
        while let Ok(frame) = receiver.try_recv() {
            latest = Some(frame);
        }
        let frame = latest?;
        let (width, height) = (frame.width, frame.height);
        match FrameSnapshot::new(width, height, frame.pixels) {
            Some(snapshot) => Some(Arc::new(snapshot)),
            None => {
                warn!("dropping malformed {width}x{height} frame from `{}`", self.info.name);
                None
            }
        }
    }
}

fn capture_frames(mut camera: Camera, sender: Sender<FramePayload>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match camera.frame() {
            Ok(frame) => match frame.decode_image::<RgbFormat>() {
                Ok(image) => {
                    let (width, height) = image.dimensions();
                    let pixels = rgb_to_rgba(&image.into_raw());
                    if sender
                        .send(FramePayload {
                            pixels,
                            width,
                            height,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => error!("failed to decode camera frame: {err}"),
            },
            Err(err) => {
                error!("failed to get camera frame: {err}");
                thread::sleep(Duration::from_millis(16));
            }
        }
    }

    if let Err(err) = camera.stop_stream() {
        warn!("failed to stop camera stream: {err}");
    }
}
