//! Binds the camera texture to UI image nodes.

use bevy::{
    asset::RenderAssetUsages,
    prelude::*,
    render::render_resource::{Extent3d, TextureDimension, TextureFormat},
    ui::{ComputedNode, UiTransform},
};

use crate::{
    device::Facing,
    orientation::{FrameView, PlatformFlags, Rotation},
    session::ScannerHost,
};

/// How bound preview nodes are drawn for one orientation.
#[derive(Asset, TypePath, Clone, Debug, PartialEq)]
pub struct PreviewPreset {
    pub tint: Color,
    /// Turn the node so the picture appears upright.
    pub rotate_node: bool,
}

impl PreviewPreset {
    pub fn upright() -> Self {
        Self {
            tint: Color::WHITE,
            rotate_node: false,
        }
    }

    pub fn quarter_turn() -> Self {
        Self {
            tint: Color::WHITE,
            rotate_node: true,
        }
    }
}

/// The presets a session resolves when it starts. Both must be loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreviewPresets {
    pub upright: Handle<PreviewPreset>,
    /// Used while the device is rotated by 90 or 270 degrees.
    pub quarter_turn: Handle<PreviewPreset>,
}

impl PreviewPresets {
    /// Adds the stock presets to `assets`.
    pub fn standard(assets: &mut Assets<PreviewPreset>) -> Self {
        Self {
            upright: assets.add(PreviewPreset::upright()),
            quarter_turn: assets.add(PreviewPreset::quarter_turn()),
        }
    }
}

/// Marks an image node that currently shows a session's camera feed.
#[derive(Component, Clone, Copy, Debug, Default, Reflect)]
#[reflect(Component)]
pub struct PreviewTarget;

pub(crate) fn frame_texture_format(is_srgb: bool) -> TextureFormat {
    if is_srgb {
        TextureFormat::Rgba8UnormSrgb
    } else {
        TextureFormat::Rgba8Unorm
    }
}

pub(crate) fn blank_texture(width: u32, height: u32, is_srgb: bool) -> Image {
    Image::new_fill(
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        &[0u8; 4],
        frame_texture_format(is_srgb),
        RenderAssetUsages::default(),
    )
}

fn write_frame_to_image(
    image: &mut Image,
    extent: Extent3d,
    pixels: Vec<u8>,
    format: TextureFormat,
) {
    if image.texture_descriptor.size != extent {
        image.resize(extent);
    }
    if image.texture_descriptor.format != format {
        image.texture_descriptor.format = format;
    }
    image.data = Some(pixels);
}

/// Moves the newest camera frame into the preview texture and refreshes
/// what the session knows about the feed.
pub(crate) fn upload_frames(mut host: ResMut<ScannerHost>, mut images: ResMut<Assets<Image>>) {
    let Some(session) = host.active.as_mut() else {
        return;
    };
    let Some(frame) = session.device.latest_frame() else {
        return;
    };

    session.view.size = frame.size();
    session.view.rotation = session.device.rotation();
    session.view.front_facing = session.device.info().facing == Facing::Front;
    session.view.flags = PlatformFlags::current(session.device.vertically_mirrored());

    let Some(image) = images.get_mut(&session.texture) else {
        warn!("webcam texture handle is missing");
        session.frame = Some(frame);
        return;
    };

    let extent = Extent3d {
        width: frame.width(),
        height: frame.height(),
        depth_or_array_layers: 1,
    };
    if image.texture_descriptor.size != extent {
        warn!(
            "camera resolution changed from {}x{} to {}x{}",
            image.texture_descriptor.size.width,
            image.texture_descriptor.size.height,
            extent.width,
            extent.height
        );
    }
    write_frame_to_image(
        image,
        extent,
        frame.rgba().to_vec(),
        frame_texture_format(session.options.is_srgb),
    );
    session.frame = Some(frame);
}

/// How one bound node draws the feed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PreviewLayout {
    pub(crate) rect: Rect,
    pub(crate) flip_x: bool,
    pub(crate) flip_y: bool,
    pub(crate) rotation: Rot2,
    pub(crate) scale: Vec2,
}

/// Lays the feed out over a node of `node_size`.
///
/// A turned node still draws into its own layout box, so a quarter turn
/// also scales the node by the swapped aspect: the crop is drawn at the
/// picture's own aspect and, once turned, covers the original box. A half
/// turn needs no transform and is drawn with both axes flipped.
pub(crate) fn preview_layout(
    view: &FrameView,
    node_size: Vec2,
    rotate_node: bool,
) -> PreviewLayout {
    let sized = node_size.x > 0.0 && node_size.y > 0.0;
    let target_aspect = if sized {
        node_size.x / node_size.y
    } else {
        f32::NAN
    };
    let turned = view.rotation.is_quarter_turn() && rotate_node;

    let uv = if view.rotation.is_quarter_turn() && !rotate_node {
        // Shown sideways, so crop the texture as it lies.
        FrameView {
            rotation: Rotation::Deg0,
            ..*view
        }
        .uv_rect(target_aspect)
    } else {
        view.uv_rect(target_aspect)
    };
    let (rect, mut flip_x, mut flip_y) = uv.to_image_rect(view.size.as_vec2());
    if view.rotation == Rotation::Deg180 {
        flip_x = !flip_x;
        flip_y = !flip_y;
    }

    let rotation = if turned {
        Rot2::degrees(view.rotation.degrees() as f32)
    } else {
        Rot2::IDENTITY
    };
    let scale = if turned && sized {
        Vec2::new(node_size.y / node_size.x, node_size.x / node_size.y)
    } else {
        Vec2::ONE
    };

    PreviewLayout {
        rect,
        flip_x,
        flip_y,
        rotation,
        scale,
    }
}

type TargetQuery<'w, 's> = Query<
    'w,
    's,
    (
        &'static mut ImageNode,
        Option<&'static ComputedNode>,
        Option<&'static mut UiTransform>,
        Has<PreviewTarget>,
    ),
>;

/// Points every bound image node at the camera texture with the current
/// crop, flips, tint and rotation. Detached nodes are reset.
pub(crate) fn refresh_preview_targets(
    mut host: ResMut<ScannerHost>,
    mut targets: TargetQuery,
    mut commands: Commands,
) {
    for entity in host.detached.drain(..) {
        let Ok((mut node, _, transform, marked)) = targets.get_mut(entity) else {
            continue;
        };
        node.image = Handle::default();
        node.rect = None;
        node.flip_x = false;
        node.flip_y = false;
        node.color = Color::WHITE;
        if let Some(mut transform) = transform {
            transform.rotation = Rot2::IDENTITY;
            transform.scale = Vec2::ONE;
        }
        if marked {
            commands.entity(entity).try_remove::<PreviewTarget>();
        }
    }

    let Some(session) = host.active.as_mut() else {
        return;
    };

    let view = session.view;
    let preset = if view.rotation.is_quarter_turn() {
        &session.quarter_turn
    } else {
        &session.upright
    };

    session.targets.retain(|&entity| {
        let Ok((mut node, computed, transform, marked)) = targets.get_mut(entity) else {
            debug!("dropping preview target {entity}: no longer an image node");
            return false;
        };

        let node_size = computed.map(ComputedNode::size).unwrap_or(Vec2::ZERO);
        let PreviewLayout {
            rect,
            flip_x,
            flip_y,
            rotation,
            scale,
        } = preview_layout(&view, node_size, preset.rotate_node);

        if node.image != session.texture {
            node.image = session.texture.clone();
        }
        if node.rect != Some(rect) {
            node.rect = Some(rect);
        }
        if node.flip_x != flip_x {
            node.flip_x = flip_x;
        }
        if node.flip_y != flip_y {
            node.flip_y = flip_y;
        }
        if node.color != preset.tint {
            node.color = preset.tint;
        }

        match transform {
            Some(mut transform) => {
                if transform.rotation != rotation {
                    transform.rotation = rotation;
                }
                if transform.scale != scale {
                    transform.scale = scale;
                }
            }
            None if rotation != Rot2::IDENTITY || scale != Vec2::ONE => {
                commands.entity(entity).try_insert(UiTransform {
                    rotation,
                    scale,
                    ..default()
                });
            }
            None => {}
        }

        if !marked {
            commands.entity(entity).try_insert(PreviewTarget);
        }
        true
    });
}
