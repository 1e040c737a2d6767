use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bevy::{
    ecs::system::RunSystemOnce,
    prelude::*,
    time::TimeUpdateStrategy,
    ui::{ComputedNode, UiTransform},
};
use bevy_webcam_scanner::{
    Authorization, BarcodeFormat, BarcodeReader, CameraBackend, CaptureDevice, CaptureRequest,
    DecodeHints, DecodeMode, DecodedBarcode, DeviceInfo, DisplayRegion, Facing, FacingPreference,
    FrameSnapshot, LensKind, LumaFrame, PermissionGate, PreviewPreset, PreviewPresets,
    PreviewTarget, Result, Rotation, ScanError, ScanFinished, ScanOutcome, ScanRequest, ScanTicket,
    Scanner, ScannerHost, ScannerOptions, ScannerSystems, SessionId, WebcamScannerPlugin,
};

const STEP: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Rig {
    frames: Mutex<VecDeque<FrameSnapshot>>,
    rotation: Mutex<Rotation>,
    opened: AtomicUsize,
    stopped: AtomicUsize,
}

impl Rig {
    fn push_frame(&self, marked: bool) {
        let value = if marked { 0 } else { 255 };
        let frame = FrameSnapshot::new(4, 4, [value, value, value, 255].repeat(16)).unwrap();
        self.frames.lock().unwrap().push_back(frame);
    }

    fn push_blank(&self, width: u32, height: u32) {
        let pixels = (width * height) as usize;
        let frame = FrameSnapshot::new(width, height, [255u8; 4].repeat(pixels)).unwrap();
        self.frames.lock().unwrap().push_back(frame);
    }
}

struct FakeBackend(Arc<Rig>);

impl CameraBackend for FakeBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![
            DeviceInfo {
                name: "front".into(),
                facing: Facing::Front,
                lens: LensKind::Wide,
            },
            DeviceInfo {
                name: "rear".into(),
                facing: Facing::Rear,
                lens: LensKind::Wide,
            },
        ])
    }

    fn open(
        &mut self,
        device: &DeviceInfo,
        _request: &CaptureRequest,
    ) -> Result<Box<dyn CaptureDevice>> {
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCamera {
            rig: self.0.clone(),
            info: device.clone(),
            playing: false,
        }))
    }
}

struct FakeCamera {
    rig: Arc<Rig>,
    info: DeviceInfo,
    playing: bool,
}

impl CaptureDevice for FakeCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn play(&mut self) -> Result<()> {
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.playing {
            self.playing = false;
            self.rig.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn latest_frame(&mut self) -> Option<Arc<FrameSnapshot>> {
        if !self.playing {
            return None;
        }
        self.rig.frames.lock().unwrap().pop_front().map(Arc::new)
    }

    fn rotation(&self) -> Rotation {
        *self.rig.rotation.lock().unwrap()
    }
}

struct FakeGate(Authorization);

impl PermissionGate for FakeGate {
    fn status(&self) -> Authorization {
        self.0
    }

    fn request(&mut self) -> Authorization {
        self.0
    }
}

/// Reports a symbol in any frame whose top-left pixel is black.
struct MarkerReader;

impl BarcodeReader for MarkerReader {
    fn supports(&self, _format: BarcodeFormat) -> bool {
        true
    }

    fn decode(&self, frame: &LumaFrame, hints: &DecodeHints) -> Option<DecodedBarcode> {
        (frame.get(0, 0) == 0).then(|| DecodedBarcode {
            format: hints.format,
            text: "marker".into(),
        })
    }
}

#[derive(Resource, Default)]
struct Collected(Vec<ScanFinished>);

fn collect(mut finished: MessageReader<ScanFinished>, mut collected: ResMut<Collected>) {
    collected.0.extend(finished.read().cloned());
}

fn test_app(authorization: Authorization) -> (App, Arc<Rig>) {
    let rig = Arc::new(Rig::default());
    let mut app = App::new();
    app.add_plugins((MinimalPlugins, AssetPlugin::default()));
    app.init_asset::<Image>();
    app.insert_resource(TimeUpdateStrategy::ManualDuration(STEP));
    app.insert_resource(ScannerHost::new(
        FakeBackend(rig.clone()),
        FakeGate(authorization),
        MarkerReader,
        DecodeMode::Inline,
    ));
    app.add_plugins(WebcamScannerPlugin {
        decode_mode: Some(DecodeMode::Inline),
    });
    app.init_resource::<Collected>();
    app.add_systems(Update, collect.after(ScannerSystems));
    (app, rig)
}

fn options(app: &mut App) -> ScannerOptions {
    let mut assets = app.world_mut().resource_mut::<Assets<PreviewPreset>>();
    ScannerOptions {
        presets: PreviewPresets::standard(&mut assets),
        scan_interval: STEP,
        ..default()
    }
}

fn start(app: &mut App, options: ScannerOptions) -> Result<SessionId> {
    app.world_mut()
        .run_system_once(move |mut scanner: Scanner| scanner.start(options.clone()))
        .expect("start system runs")
}

fn request(app: &mut App, session: SessionId, request: ScanRequest) -> Result<ScanTicket> {
    app.world_mut()
        .run_system_once(move |mut scanner: Scanner| scanner.request_scan(session, request))
        .expect("request system runs")
}

fn dispose(app: &mut App, session: SessionId) -> Result<()> {
    app.world_mut()
        .run_system_once(move |mut scanner: Scanner| scanner.dispose(session))
        .expect("dispose system runs")
}

fn host(app: &App) -> &ScannerHost {
    app.world().resource::<ScannerHost>()
}

fn host_mut(app: &mut App) -> Mut<'_, ScannerHost> {
    app.world_mut().resource_mut::<ScannerHost>()
}

fn collected(app: &App) -> &[ScanFinished] {
    &app.world().resource::<Collected>().0
}

#[test]
fn second_session_is_rejected_without_touching_the_first() {
    let (mut app, rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);

    let first = start(&mut app, options.clone()).unwrap();
    let texture = host(&app).preview_texture(first).unwrap();

    assert_eq!(start(&mut app, options), Err(ScanError::SessionActive));
    assert_eq!(host(&app).active_session(), Some(first));
    assert_eq!(host(&app).preview_texture(first).unwrap(), texture);
    assert_eq!(rig.opened.load(Ordering::SeqCst), 1);
    assert_eq!(rig.stopped.load(Ordering::SeqCst), 0);
}

#[test]
fn dispose_twice_releases_once() {
    let (mut app, rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);
    let session = start(&mut app, options).unwrap();
    let texture = host(&app).preview_texture(session).unwrap();

    assert_eq!(dispose(&mut app, session), Ok(()));
    assert_eq!(dispose(&mut app, session), Ok(()));

    assert_eq!(rig.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(host(&app).active_session(), None);
    assert!(app.world().resource::<Assets<Image>>().get(&texture).is_none());
}

#[test]
fn disposed_session_rejects_every_operation() {
    let (mut app, _rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);
    let session = start(&mut app, options.clone()).unwrap();
    dispose(&mut app, session).unwrap();

    assert!(matches!(
        request(&mut app, session, ScanRequest::default()),
        Err(ScanError::Disposed)
    ));
    let entity = app.world_mut().spawn(ImageNode::default()).id();
    assert_eq!(
        host_mut(&mut app).bind_preview(session, entity),
        Err(ScanError::Disposed)
    );
    assert_eq!(host(&app).preview_texture(session), Err(ScanError::Disposed));
    assert_eq!(host(&app).frame_view(session), Err(ScanError::Disposed));

    // A fresh session works and the stale handle stays dead.
    let next = start(&mut app, options).unwrap();
    assert_ne!(next, session);
    assert_eq!(host(&app).pending_scans(session), Err(ScanError::Disposed));
    assert_eq!(host(&app).pending_scans(next), Ok(0));
}

#[test]
fn denied_permission_opens_nothing() {
    let (mut app, rig) = test_app(Authorization::Denied);
    let options = options(&mut app);
    assert_eq!(start(&mut app, options), Err(ScanError::PermissionDenied));
    assert_eq!(rig.opened.load(Ordering::SeqCst), 0);
    assert_eq!(host(&app).active_session(), None);
}

#[test]
fn configuration_errors_come_first() {
    let (mut app, rig) = test_app(Authorization::Denied);

    let missing_presets = ScannerOptions::default();
    assert!(matches!(
        start(&mut app, missing_presets),
        Err(ScanError::MissingPreset(_))
    ));

    let zero_width = ScannerOptions {
        width: 0,
        ..options(&mut app)
    };
    assert!(matches!(
        start(&mut app, zero_width),
        Err(ScanError::InvalidOptions(_))
    ));
    assert_eq!(rig.opened.load(Ordering::SeqCst), 0);
}

#[test]
fn scan_reports_first_marked_frame() {
    let (mut app, rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);
    let session = start(&mut app, options).unwrap();
    rig.push_frame(false);
    rig.push_frame(false);
    rig.push_frame(true);

    let ticket = request(&mut app, session, ScanRequest::default()).unwrap();
    for _ in 0..20 {
        app.update();
        if !collected(&app).is_empty() {
            break;
        }
    }

    let finished = collected(&app);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].ticket, ticket.id());
    match &finished[0].outcome {
        ScanOutcome::Decoded(result) => {
            assert!(result.found);
            assert_eq!(result.text.as_deref(), Some("marker"));
        }
        other => panic!("expected a decoded result, got {other:?}"),
    }
    assert_eq!(host(&app).pending_scans(session), Ok(0));
}

#[test]
fn cancelled_ticket_reports_cancellation() {
    let (mut app, rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);
    let session = start(&mut app, options).unwrap();

    let ticket = request(&mut app, session, ScanRequest::default()).unwrap();
    ticket.cancel();
    rig.push_frame(true);
    app.update();

    assert_eq!(
        collected(&app),
        &[ScanFinished {
            ticket: ticket.id(),
            outcome: ScanOutcome::Cancelled,
        }]
    );
}

#[test]
fn timeout_is_distinct_from_cancellation() {
    let (mut app, rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);
    let session = start(&mut app, options).unwrap();
    for _ in 0..10 {
        rig.push_frame(false);
    }

    let ticket = request(
        &mut app,
        session,
        ScanRequest {
            region: None,
            timeout: Some(STEP * 3),
        },
    )
    .unwrap();
    for _ in 0..10 {
        app.update();
    }

    assert_eq!(
        collected(&app),
        &[ScanFinished {
            ticket: ticket.id(),
            outcome: ScanOutcome::TimedOut,
        }]
    );
}

#[test]
fn disposing_cancels_pending_scans() {
    let (mut app, _rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);
    let session = start(&mut app, options).unwrap();
    let ticket = request(&mut app, session, ScanRequest::default()).unwrap();

    dispose(&mut app, session).unwrap();
    app.update();

    assert_eq!(
        collected(&app),
        &[ScanFinished {
            ticket: ticket.id(),
            outcome: ScanOutcome::Cancelled,
        }]
    );
}

#[test]
fn out_of_bounds_region_keeps_scanning() {
    let (mut app, rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);
    let session = start(&mut app, options).unwrap();
    for _ in 0..5 {
        rig.push_frame(true);
    }

    let outside = DisplayRegion::new(Rect::new(0.5, 0.5, 2.0, 2.0), Vec2::ONE);
    request(
        &mut app,
        session,
        ScanRequest {
            region: Some(outside),
            timeout: None,
        },
    )
    .unwrap();
    for _ in 0..5 {
        app.update();
    }

    assert!(collected(&app).is_empty());
    assert_eq!(host(&app).pending_scans(session), Ok(1));
}

#[test]
fn bound_preview_shows_feed_until_unbound() {
    let (mut app, rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);
    let session = start(&mut app, options).unwrap();
    let texture = host(&app).preview_texture(session).unwrap();

    let entity = app.world_mut().spawn(ImageNode::default()).id();
    host_mut(&mut app).bind_preview(session, entity).unwrap();
    rig.push_frame(false);
    app.update();

    let node = app.world().get::<ImageNode>(entity).unwrap();
    assert_eq!(node.image, texture);
    assert_eq!(node.rect, Some(Rect::new(0.0, 0.0, 4.0, 4.0)));
    assert!(!node.flip_x);
    assert!(app.world().get::<PreviewTarget>(entity).is_some());

    host_mut(&mut app).unbind_preview(session, entity).unwrap();
    app.update();

    let node = app.world().get::<ImageNode>(entity).unwrap();
    assert_eq!(node.image, Handle::default());
    assert_eq!(node.rect, None);
    assert!(app.world().get::<PreviewTarget>(entity).is_none());
    assert!(host(&app).bound_previews(session).unwrap().is_empty());
}

#[test]
fn front_camera_preview_is_mirrored() {
    let (mut app, rig) = test_app(Authorization::Authorized);
    let options = ScannerOptions {
        facing: FacingPreference::Front,
        ..options(&mut app)
    };
    let session = start(&mut app, options).unwrap();

    let entity = app.world_mut().spawn(ImageNode::default()).id();
    host_mut(&mut app).bind_preview(session, entity).unwrap();
    rig.push_frame(false);
    app.update();

    let node = app.world().get::<ImageNode>(entity).unwrap();
    assert_eq!(node.flip_x, !cfg!(target_os = "ios"));
    assert!(host(&app).frame_view(session).unwrap().front_facing);
}

#[test]
fn despawned_preview_is_forgotten() {
    let (mut app, _rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);
    let session = start(&mut app, options).unwrap();

    let entity = app.world_mut().spawn(ImageNode::default()).id();
    host_mut(&mut app).bind_preview(session, entity).unwrap();
    app.update();
    app.world_mut().despawn(entity);
    app.update();

    assert!(host(&app).bound_previews(session).unwrap().is_empty());
}

#[test]
fn disposing_detaches_previews() {
    let (mut app, rig) = test_app(Authorization::Authorized);
    let options = options(&mut app);
    let session = start(&mut app, options).unwrap();

    let entity = app.world_mut().spawn(ImageNode::default()).id();
    host_mut(&mut app).bind_preview(session, entity).unwrap();
    rig.push_frame(false);
    app.update();

    dispose(&mut app, session).unwrap();
    app.update();

    let node = app.world().get::<ImageNode>(entity).unwrap();
    assert_eq!(node.image, Handle::default());
    assert!(app.world().get::<PreviewTarget>(entity).is_none());
}

#[test]
fn quarter_turned_preview_keeps_its_aspect() {
    let (mut app, rig) = test_app(Authorization::Authorized);
    *rig.rotation.lock().unwrap() = Rotation::Deg90;
    let sideways_tint = Color::srgb(1.0, 0.0, 0.0);
    let options = {
        let mut assets = app.world_mut().resource_mut::<Assets<PreviewPreset>>();
        let presets = PreviewPresets {
            upright: assets.add(PreviewPreset::upright()),
            quarter_turn: assets.add(PreviewPreset {
                tint: sideways_tint,
                rotate_node: true,
            }),
        };
        ScannerOptions {
            width: 16,
            height: 9,
            presets,
            ..options(&mut app)
        }
    };
    let session = start(&mut app, options).unwrap();

    let node_size = Vec2::new(90.0, 160.0);
    let entity = app
        .world_mut()
        .spawn((
            ImageNode::default(),
            ComputedNode {
                size: node_size,
                ..default()
            },
        ))
        .id();
    host_mut(&mut app).bind_preview(session, entity).unwrap();
    rig.push_blank(16, 9);
    app.update();

    let node = app.world().get::<ImageNode>(entity).unwrap();
    assert_eq!(node.color, sideways_tint);
    let rect = node.rect.unwrap();
    assert_eq!(rect, Rect::new(0.0, 0.0, 16.0, 9.0));

    let transform = app.world().get::<UiTransform>(entity).unwrap();
    assert_eq!(transform.rotation, Rot2::degrees(90.0));
    let drawn = node_size * transform.scale;
    assert!((drawn.x / drawn.y - rect.width() / rect.height()).abs() < 1e-3);
    // Turned by a quarter, the drawn box lands on the node's layout box.
    assert!((Vec2::new(drawn.y, drawn.x) - node_size).abs().max_element() < 1e-3);

    // Back upright the transform is undone.
    *rig.rotation.lock().unwrap() = Rotation::Deg0;
    rig.push_blank(16, 9);
    app.update();

    let transform = app.world().get::<UiTransform>(entity).unwrap();
    assert_eq!(transform.rotation, Rot2::IDENTITY);
    assert_eq!(transform.scale, Vec2::ONE);
    let node = app.world().get::<ImageNode>(entity).unwrap();
    assert_eq!(node.color, Color::WHITE);
    let rect = node.rect.unwrap();
    assert!((rect.width() / rect.height() - node_size.x / node_size.y).abs() < 1e-3);
}
