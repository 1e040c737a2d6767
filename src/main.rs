use bevy::{app::AppExit, prelude::*};

use bevy_webcam_scanner::{
    DisplayRegion, PreviewPreset, PreviewPresets, ScanFinished, ScanOutcome, ScanRequest,
    ScanTicket, Scanner, ScannerOptions, SessionId, WebcamScannerPlugin,
};

const SCAN_AREA: f32 = 0.6;

fn main() {
    let mut app = App::new();

    app.add_plugins((
        DefaultPlugins.set(WindowPlugin {
            primary_window: Window {
                title: "bevy_webcam_scanner".to_string(),
                ..default()
            }
            .into(),
            ..default()
        }),
        WebcamScannerPlugin::default(),
    ));

    app.init_resource::<ScanState>();
    app.add_systems(Startup, (setup_ui, start_session).chain());
    app.add_systems(
        Update,
        (request_scan, show_results, press_esc_close),
    );

    app.run();
}

#[derive(Component)]
struct Preview;

#[derive(Component)]
struct ResultText;

#[derive(Resource)]
struct DemoPresets(PreviewPresets);

#[derive(Resource, Default)]
struct ScanState {
    session: Option<SessionId>,
    ticket: Option<ScanTicket>,
}

fn setup_ui(mut commands: Commands, mut presets: ResMut<Assets<PreviewPreset>>) {
    commands.insert_resource(DemoPresets(PreviewPresets::standard(&mut presets)));
    commands.spawn(Camera2d);

    commands.spawn((
        Preview,
        ImageNode::default(),
        Node {
            width: Val::Percent(100.0),
            height: Val::Percent(100.0),
            ..default()
        },
    ));

    commands.spawn((
        ResultText,
        Text::new("point the camera at a QR code"),
        TextFont {
            font_size: 32.0,
            ..default()
        },
        TextColor(Color::WHITE),
        Node {
            position_type: PositionType::Absolute,
            bottom: Val::Px(5.0),
            left: Val::Px(15.0),
            ..default()
        },
        ZIndex(2),
    ));
}

fn start_session(
    mut scanner: Scanner,
    mut state: ResMut<ScanState>,
    presets: Res<DemoPresets>,
    preview: Single<Entity, With<Preview>>,
) {
    let options = ScannerOptions {
        presets: presets.0.clone(),
        ..default()
    };
    let session = match scanner.start(options) {
        Ok(session) => session,
        Err(err) => {
            error!("failed to start scanning: {err}");
            return;
        }
    };
    if let Err(err) = scanner.bind_preview(session, *preview) {
        error!("failed to bind preview: {err}");
    }
    state.session = Some(session);
}

fn request_scan(
    mut scanner: Scanner,
    mut state: ResMut<ScanState>,
    preview: Single<&ComputedNode, With<Preview>>,
) {
    let Some(session) = state.session else {
        return;
    };
    if state.ticket.is_some() {
        return;
    }
    let size = preview.size();
    if size.x <= 0.0 || size.y <= 0.0 {
        return;
    }

    let request = ScanRequest {
        region: Some(DisplayRegion::centered(SCAN_AREA, size)),
        timeout: None,
    };
    match scanner.request_scan(session, request) {
        Ok(ticket) => state.ticket = Some(ticket),
        Err(err) => {
            error!("scan request failed: {err}");
            state.session = None;
        }
    }
}

fn show_results(
    mut finished: MessageReader<ScanFinished>,
    mut state: ResMut<ScanState>,
    mut text: Single<&mut Text, With<ResultText>>,
) {
    for message in finished.read() {
        if state.ticket.as_ref().map(ScanTicket::id) != Some(message.ticket) {
            continue;
        }
        state.ticket = None;
        match &message.outcome {
            ScanOutcome::Decoded(result) => {
                let decoded = result.text.clone().unwrap_or_default();
                info!("decoded: {decoded}");
                text.0 = decoded;
            }
            ScanOutcome::Cancelled | ScanOutcome::TimedOut => {}
        }
    }
}

fn press_esc_close(
    keys: Res<ButtonInput<KeyCode>>,
    mut scanner: Scanner,
    state: Res<ScanState>,
    mut exit: MessageWriter<AppExit>,
) {
    if keys.just_pressed(KeyCode::Escape) {
        if let Some(session) = state.session
            && let Err(err) = scanner.dispose(session)
        {
            warn!("failed to dispose scan session: {err}");
        }
        exit.write(AppExit::Success);
    }
}
