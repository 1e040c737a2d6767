//! Poll-until-decoded loop, advanced one engine frame at a time.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bevy::{
    prelude::*,
    tasks::{AsyncComputeTaskPool, Task, block_on, futures_lite::future},
};

use crate::{
    decode::{BarcodeReader, DecodeHints, DecodedBarcode, ScanResult},
    frame::FrameSnapshot,
    orientation::{DisplayRegion, FrameView, PixelRegion},
};

/// Cooperative cancellation flag. A child token also reports cancellation
/// once its parent is cancelled.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(self.flag.clone()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.load(Ordering::Acquire))
    }
}

/// Where decode attempts run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Reflect)]
pub enum DecodeMode {
    /// On the async compute pool, polled once per frame.
    Background,
    /// On the calling system, finishing within the same tick.
    Inline,
}

impl DecodeMode {
    /// Background decoding where threads exist, inline on the web.
    pub fn for_platform() -> Self {
        if cfg!(target_arch = "wasm32") {
            DecodeMode::Inline
        } else {
            DecodeMode::Background
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScanRequest {
    /// Part of the preview to decode. `None` decodes the whole frame.
    pub region: Option<DisplayRegion>,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Eq, Reflect)]
pub enum ScanOutcome {
    Decoded(ScanResult),
    Cancelled,
    TimedOut,
}

enum Phase {
    Waiting { until: Duration },
    Decoding(Task<Option<DecodedBarcode>>),
    Finished,
}

pub struct ScanLoop {
    request: ScanRequest,
    hints: DecodeHints,
    interval: Duration,
    mode: DecodeMode,
    cancel: CancelToken,
    deadline: Option<Duration>,
    phase: Phase,
    attempts: u32,
}

impl ScanLoop {
    /// A loop whose first attempt happens on the first tick at or after
    /// `started`.
    pub fn new(
        request: ScanRequest,
        hints: DecodeHints,
        interval: Duration,
        mode: DecodeMode,
        cancel: CancelToken,
        started: Duration,
    ) -> Self {
        Self {
            deadline: request.timeout.map(|timeout| started + timeout),
            request,
            hints,
            interval,
            mode,
            cancel,
            phase: Phase::Waiting { until: started },
            attempts: 0,
        }
    }

    /// Decode attempts started so far. Skipped attempts are not counted.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished)
    }

    /// Advances the loop. Returns the outcome once, when the loop finishes.
    pub fn tick(
        &mut self,
        now: Duration,
        frame: Option<&Arc<FrameSnapshot>>,
        view: &FrameView,
        reader: &Arc<dyn BarcodeReader>,
    ) -> Option<ScanOutcome> {
        if let Some(outcome) = self.interruption(now) {
            // Dropping a running task cancels it.
            self.phase = Phase::Finished;
            return Some(outcome);
        }

        match &mut self.phase {
            Phase::Finished => None,
            Phase::Decoding(task) => {
                let result = block_on(future::poll_once(task))?;
                self.finish_attempt(now, result)
            }
            Phase::Waiting { until } => {
                if now < *until {
                    return None;
                }
                let frame = frame?;
                let region = match self.crop(view) {
                    Ok(region) => region,
                    Err(()) => {
                        self.phase = Phase::Waiting {
                            until: now + self.interval,
                        };
                        return None;
                    }
                };

                if self.cancel.is_cancelled() {
                    self.phase = Phase::Finished;
                    return Some(ScanOutcome::Cancelled);
                }
                self.attempts += 1;

                match self.mode {
                    DecodeMode::Inline => {
                        let result = decode_frame(frame, region, &self.hints, reader.as_ref());
                        self.finish_attempt(now, result)
                    }
                    DecodeMode::Background => {
                        let frame = frame.clone();
                        let reader = reader.clone();
                        let hints = self.hints;
                        let task = AsyncComputeTaskPool::get().spawn(async move {
                            decode_frame(&frame, region, &hints, reader.as_ref())
                        });
                        self.phase = Phase::Decoding(task);
                        None
                    }
                }
            }
        }
    }

    fn interruption(&self, now: Duration) -> Option<ScanOutcome> {
        if self.is_finished() {
            return None;
        }
        if self.cancel.is_cancelled() {
            return Some(ScanOutcome::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            return Some(ScanOutcome::TimedOut);
        }
        None
    }

    fn crop(&self, view: &FrameView) -> Result<Option<PixelRegion>, ()> {
        let Some(region) = &self.request.region else {
            return Ok(None);
        };
        view.map_region(region).map(Some).map_err(|err| {
            debug!("skipping scan attempt: {err}");
        })
    }

    fn finish_attempt(
        &mut self,
        now: Duration,
        result: Option<DecodedBarcode>,
    ) -> Option<ScanOutcome> {
        if self.cancel.is_cancelled() {
            self.phase = Phase::Finished;
            return Some(ScanOutcome::Cancelled);
        }
        match result {
            Some(barcode) => {
                self.phase = Phase::Finished;
                Some(ScanOutcome::Decoded(Some(barcode).into()))
            }
            None => {
                self.phase = Phase::Waiting {
                    until: now + self.interval,
                };
                None
            }
        }
    }
}

fn decode_frame(
    frame: &FrameSnapshot,
    region: Option<PixelRegion>,
    hints: &DecodeHints,
    reader: &dyn BarcodeReader,
) -> Option<DecodedBarcode> {
    reader.decode(&frame.luma(region), hints)
}
