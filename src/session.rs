//! The single active scan session and the handles callers hold onto.

use std::{sync::Arc, time::Duration};

use bevy::{ecs::system::SystemParam, prelude::*};

use crate::{
    decode::BarcodeReader,
    device::{CameraBackend, CaptureDevice, CaptureRequest, Facing, select_device},
    error::{Result, ScanError},
    frame::FrameSnapshot,
    options::ScannerOptions,
    orientation::{FrameView, PlatformFlags},
    permission::{PermissionGate, ensure_authorized},
    preview::{PreviewPreset, blank_texture},
    scan_loop::{CancelToken, DecodeMode, ScanLoop, ScanOutcome, ScanRequest},
};

/// Handle to a started session. It stays valid until the session is
/// disposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Reflect)]
pub struct SessionId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Reflect)]
pub struct TicketId {
    pub session: SessionId,
    index: u64,
}

/// A pending scan. Its outcome arrives as a [`ScanFinished`] message with
/// the same [`TicketId`].
#[derive(Clone, Debug)]
pub struct ScanTicket {
    id: TicketId,
    cancel: CancelToken,
}

impl ScanTicket {
    pub fn id(&self) -> TicketId {
        self.id
    }

    /// Stops the scan. The outcome will be [`ScanOutcome::Cancelled`]
    /// unless it already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[derive(Message, Clone, Debug, PartialEq, Eq)]
pub struct ScanFinished {
    pub ticket: TicketId,
    pub outcome: ScanOutcome,
}

pub(crate) struct PendingScan {
    ticket: TicketId,
    scan: ScanLoop,
}

pub(crate) struct ActiveSession {
    pub(crate) id: SessionId,
    pub(crate) options: ScannerOptions,
    pub(crate) device: Box<dyn CaptureDevice>,
    pub(crate) texture: Handle<Image>,
    pub(crate) frame: Option<Arc<FrameSnapshot>>,
    pub(crate) view: FrameView,
    pub(crate) upright: PreviewPreset,
    pub(crate) quarter_turn: PreviewPreset,
    pub(crate) targets: Vec<Entity>,
    pub(crate) scans: Vec<PendingScan>,
    pub(crate) cancel: CancelToken,
    pub(crate) next_ticket: u64,
}

/// Owns the camera backend and at most one active session.
#[derive(Resource)]
pub struct ScannerHost {
    backend: Box<dyn CameraBackend>,
    permissions: Box<dyn PermissionGate>,
    reader: Arc<dyn BarcodeReader>,
    decode_mode: DecodeMode,
    next_session: u64,
    pub(crate) active: Option<ActiveSession>,
    /// Preview nodes to reset on the next refresh.
    pub(crate) detached: Vec<Entity>,
    /// Outcomes of scans that ended with their session.
    pub(crate) orphaned: Vec<ScanFinished>,
}

impl ScannerHost {
    pub fn new(
        backend: impl CameraBackend,
        permissions: impl PermissionGate,
        reader: impl BarcodeReader,
        decode_mode: DecodeMode,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            permissions: Box::new(permissions),
            reader: Arc::new(reader),
            decode_mode,
            next_session: 0,
            active: None,
            detached: Vec::new(),
            orphaned: Vec::new(),
        }
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.active.as_ref().map(|session| session.id)
    }

    /// Opens a camera and starts a session.
    ///
    /// Configuration problems are reported before anything is opened. While
    /// another session is active the request fails and that session is left
    /// alone.
    pub fn start(
        &mut self,
        options: ScannerOptions,
        presets: &Assets<PreviewPreset>,
        images: &mut Assets<Image>,
    ) -> Result<SessionId> {
        options.validate()?;
        if !self.reader.supports(options.barcode_format) {
            return Err(ScanError::UnsupportedFormat(options.barcode_format));
        }
        if let Some(active) = &self.active {
            warn!("rejecting new scan session: {:?} is still active", active.id);
            return Err(ScanError::SessionActive);
        }

        let upright = presets
            .get(&options.presets.upright)
            .cloned()
            .ok_or(ScanError::MissingPreset("upright"))?;
        let quarter_turn = presets
            .get(&options.presets.quarter_turn)
            .cloned()
            .ok_or(ScanError::MissingPreset("quarter_turn"))?;

        if !ensure_authorized(self.permissions.as_mut()) {
            return Err(ScanError::PermissionDenied);
        }

        let devices = self.backend.devices()?;
        let device = select_device(&devices, &options)
            .ok_or(ScanError::NoDevice)?
            .clone();
        let mut camera = self.backend.open(&device, &CaptureRequest::from(&options))?;
        if let Err(err) = camera.play() {
            camera.stop();
            return Err(err);
        }

        let texture = images.add(blank_texture(
            options.width,
            options.height,
            options.is_srgb,
        ));
        let id = SessionId(self.next_session);
        self.next_session += 1;
        info!(
            "scan session {:?} started on `{}` ({:?} {:?})",
            id, device.name, device.facing, device.lens
        );

        let view = FrameView {
            size: UVec2::new(options.width, options.height),
            rotation: camera.rotation(),
            front_facing: device.facing == Facing::Front,
            flags: PlatformFlags::current(camera.vertically_mirrored()),
        };
        self.active = Some(ActiveSession {
            id,
            options,
            device: camera,
            texture,
            frame: None,
            view,
            upright,
            quarter_turn,
            targets: Vec::new(),
            scans: Vec::new(),
            cancel: CancelToken::new(),
            next_ticket: 0,
        });
        Ok(id)
    }

    fn session(&self, id: SessionId) -> Result<&ActiveSession> {
        self.active
            .as_ref()
            .filter(|session| session.id == id)
            .ok_or(ScanError::Disposed)
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut ActiveSession> {
        self.active
            .as_mut()
            .filter(|session| session.id == id)
            .ok_or(ScanError::Disposed)
    }

    /// Starts polling the session's frames for a barcode.
    pub fn request_scan(
        &mut self,
        id: SessionId,
        request: ScanRequest,
        now: Duration,
    ) -> Result<ScanTicket> {
        let decode_mode = self.decode_mode;
        let session = self.session_mut(id)?;

        let ticket = ScanTicket {
            id: TicketId {
                session: id,
                index: session.next_ticket,
            },
            cancel: session.cancel.child(),
        };
        session.next_ticket += 1;

        let scan = ScanLoop::new(
            request,
            session.options.decode_hints(),
            session.options.scan_interval,
            decode_mode,
            ticket.cancel.clone(),
            now,
        );
        session.scans.push(PendingScan {
            ticket: ticket.id,
            scan,
        });
        Ok(ticket)
    }

    /// Shows the camera feed in `entity`'s `ImageNode`.
    pub fn bind_preview(&mut self, id: SessionId, entity: Entity) -> Result<()> {
        let session = self.session_mut(id)?;
        if !session.targets.contains(&entity) {
            session.targets.push(entity);
        }
        self.detached.retain(|&detached| detached != entity);
        Ok(())
    }

    pub fn unbind_preview(&mut self, id: SessionId, entity: Entity) -> Result<()> {
        let session = self.session_mut(id)?;
        let before = session.targets.len();
        session.targets.retain(|&target| target != entity);
        if session.targets.len() != before {
            self.detached.push(entity);
        }
        Ok(())
    }

    pub fn preview_texture(&self, id: SessionId) -> Result<Handle<Image>> {
        Ok(self.session(id)?.texture.clone())
    }

    pub fn frame_view(&self, id: SessionId) -> Result<FrameView> {
        Ok(self.session(id)?.view)
    }

    pub fn bound_previews(&self, id: SessionId) -> Result<&[Entity]> {
        Ok(&self.session(id)?.targets)
    }

    pub fn pending_scans(&self, id: SessionId) -> Result<usize> {
        Ok(self.session(id)?.scans.len())
    }

    /// Ends the session: cancels its scans, releases the camera, detaches
    /// every preview and frees the texture. Disposing an already disposed
    /// session does nothing.
    pub fn dispose(&mut self, id: SessionId, images: &mut Assets<Image>) -> Result<()> {
        let Some(mut session) = self.active.take_if(|session| session.id == id) else {
            return Ok(());
        };

        session.cancel.cancel();
        session.device.stop();
        self.detached.append(&mut session.targets);
        self.orphaned
            .extend(session.scans.drain(..).map(|pending| ScanFinished {
                ticket: pending.ticket,
                outcome: ScanOutcome::Cancelled,
            }));
        images.remove(&session.texture);
        info!("scan session {:?} disposed", id);
        Ok(())
    }
}

/// Ticks every pending scan and reports the ones that finished.
pub(crate) fn drive_scans(
    mut host: ResMut<ScannerHost>,
    time: Res<Time>,
    mut finished: MessageWriter<ScanFinished>,
) {
    let host = &mut *host;
    for message in host.orphaned.drain(..) {
        finished.write(message);
    }

    let Some(session) = host.active.as_mut() else {
        return;
    };
    let now = time.elapsed();
    let reader = &host.reader;
    let frame = session.frame.as_ref();
    let view = session.view;

    session.scans.retain_mut(|pending| {
        match pending.scan.tick(now, frame, &view, reader) {
            Some(outcome) => {
                debug!(
                    "scan {:?} finished after {} attempts",
                    pending.ticket,
                    pending.scan.attempts()
                );
                finished.write(ScanFinished {
                    ticket: pending.ticket,
                    outcome,
                });
                false
            }
            None => true,
        }
    });
}

/// Scanner operations for use inside systems.
#[derive(SystemParam)]
pub struct Scanner<'w> {
    host: ResMut<'w, ScannerHost>,
    presets: Res<'w, Assets<PreviewPreset>>,
    images: ResMut<'w, Assets<Image>>,
    time: Res<'w, Time>,
}

impl Scanner<'_> {
    pub fn start(&mut self, options: ScannerOptions) -> Result<SessionId> {
        self.host.start(options, &self.presets, &mut self.images)
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.host.active_session()
    }

    pub fn request_scan(&mut self, id: SessionId, request: ScanRequest) -> Result<ScanTicket> {
        let now = self.time.elapsed();
        self.host.request_scan(id, request, now)
    }

    pub fn bind_preview(&mut self, id: SessionId, entity: Entity) -> Result<()> {
        self.host.bind_preview(id, entity)
    }

    pub fn unbind_preview(&mut self, id: SessionId, entity: Entity) -> Result<()> {
        self.host.unbind_preview(id, entity)
    }

    pub fn preview_texture(&self, id: SessionId) -> Result<Handle<Image>> {
        self.host.preview_texture(id)
    }

    pub fn frame_view(&self, id: SessionId) -> Result<FrameView> {
        self.host.frame_view(id)
    }

    pub fn dispose(&mut self, id: SessionId) -> Result<()> {
        self.host.dispose(id, &mut self.images)
    }
}
