//! Orientation-aware mapping between a camera texture and the rectangle it is
//! displayed in.
//!
//! The forward direction ([`fit_uv_rect`]) picks the part of the texture a
//! preview should sample so that the picture keeps its aspect ratio, honours
//! the device rotation and undoes any mirroring. The inverse direction
//! ([`FrameView::map_region`]) takes a rectangle the user sees on screen and
//! finds the source pixels behind it, which is what the decoder crops to.

use bevy::prelude::*;

const EDGE_TOLERANCE: f32 = 1e-3;

/// Device rotation, snapped to quarter turns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Snaps an arbitrary angle to the nearest quarter turn. Negative angles
    /// wrap, so `-90` is [`Rotation::Deg270`].
    pub fn from_degrees(angle: i32) -> Self {
        match ((angle as f32 / 90.0).round() as i32).rem_euclid(4) {
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            3 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    /// Maps a point of the displayed picture (normalised, origin top-left)
    /// to the matching point of the unrotated texture.
    fn display_to_texture(self, point: Vec2) -> Vec2 {
        match self {
            Rotation::Deg0 => point,
            Rotation::Deg90 => Vec2::new(point.y, 1.0 - point.x),
            Rotation::Deg180 => Vec2::new(1.0 - point.x, 1.0 - point.y),
            Rotation::Deg270 => Vec2::new(1.0 - point.y, point.x),
        }
    }
}

/// Mirroring corrections that depend on where the frames come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect)]
pub struct PlatformFlags {
    /// The device delivers rows bottom-up relative to Bevy's top-down images.
    pub vertically_mirrored: bool,
    /// The platform's camera feed arrives horizontally mirrored.
    pub mirror_feed: bool,
}

impl PlatformFlags {
    /// Flags for the platform we are compiled for. iOS delivers a mirrored
    /// feed; desktop drivers and browsers hand over upright frames.
    pub fn current(vertically_mirrored: bool) -> Self {
        Self {
            vertically_mirrored,
            mirror_feed: cfg!(target_os = "ios"),
        }
    }
}

/// A normalised sub-rectangle of a texture. A negative scale on an axis
/// means that axis is sampled backwards.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct UvRect {
    pub offset: Vec2,
    pub scale: Vec2,
}

impl Default for UvRect {
    fn default() -> Self {
        Self::FULL
    }
}

impl UvRect {
    pub const FULL: UvRect = UvRect {
        offset: Vec2::ZERO,
        scale: Vec2::ONE,
    };

    pub fn flip_x(self) -> Self {
        Self {
            offset: Vec2::new(self.offset.x + self.scale.x, self.offset.y),
            scale: Vec2::new(-self.scale.x, self.scale.y),
        }
    }

    pub fn flip_y(self) -> Self {
        Self {
            offset: Vec2::new(self.offset.x, self.offset.y + self.scale.y),
            scale: Vec2::new(self.scale.x, -self.scale.y),
        }
    }

    pub fn map(&self, uv: Vec2) -> Vec2 {
        self.offset + uv * self.scale
    }

    /// Converts to the pixel rectangle and flip flags `ImageNode` expects.
    pub fn to_image_rect(&self, texture_size: Vec2) -> (Rect, bool, bool) {
        let start = self.offset * texture_size;
        let end = (self.offset + self.scale) * texture_size;
        (
            Rect::from_corners(start, end),
            self.scale.x < 0.0,
            self.scale.y < 0.0,
        )
    }
}

/// Computes the part of a `source`-sized texture to show in a target of
/// `target_aspect` (width / height).
///
/// The picture is cropped symmetrically along one axis so it keeps its
/// aspect ratio. For quarter-turn rotations the aspect is computed on the
/// rotated picture and the result is transposed back into texture space.
/// A vertically mirrored feed gets its V axis flipped. Front-facing cameras
/// and mirrored platform feeds each flip the U axis, so together they
/// cancel.
pub fn fit_uv_rect(
    source: UVec2,
    rotation: Rotation,
    target_aspect: f32,
    front_facing: bool,
    flags: PlatformFlags,
) -> UvRect {
    if source.x == 0 || source.y == 0 {
        return UvRect::FULL;
    }

    let (width, height) = if rotation.is_quarter_turn() {
        (source.y, source.x)
    } else {
        (source.x, source.y)
    };
    let source_aspect = width as f32 / height as f32;
    let target_aspect = if target_aspect.is_finite() && target_aspect > 0.0 {
        target_aspect
    } else {
        source_aspect
    };

    let display = if source_aspect > target_aspect {
        Vec2::new(target_aspect / source_aspect, 1.0)
    } else {
        Vec2::new(1.0, source_aspect / target_aspect)
    };
    let scale = if rotation.is_quarter_turn() {
        Vec2::new(display.y, display.x)
    } else {
        display
    };

    let mut uv = UvRect {
        offset: (Vec2::ONE - scale) / 2.0,
        scale,
    };
    if flags.vertically_mirrored {
        uv = uv.flip_y();
    }
    if front_facing != flags.mirror_feed {
        uv = uv.flip_x();
    }
    uv
}

/// A rectangle over the displayed preview, normalised to `[0, 1]` with the
/// origin in the top-left corner, together with the preview's aspect ratio.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct DisplayRegion {
    pub rect: Rect,
    pub target_aspect: f32,
}

impl DisplayRegion {
    /// `rect` is normalised; `preview_size` is the on-screen size of the
    /// preview node, used only for its aspect ratio.
    pub fn new(rect: Rect, preview_size: Vec2) -> Self {
        Self {
            rect,
            target_aspect: preview_size.x / preview_size.y,
        }
    }

    /// The whole preview.
    pub fn full(preview_size: Vec2) -> Self {
        Self::new(Rect::new(0.0, 0.0, 1.0, 1.0), preview_size)
    }

    /// A centred rectangle covering `fraction` of each preview axis.
    pub fn centered(fraction: f32, preview_size: Vec2) -> Self {
        let margin = (1.0 - fraction.clamp(0.0, 1.0)) / 2.0;
        Self::new(
            Rect::new(margin, margin, 1.0 - margin, 1.0 - margin),
            preview_size,
        )
    }
}

/// An integer crop rectangle inside a source frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Reflect)]
pub struct PixelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Why a display region could not be turned into a crop. Both cases skip
/// one scan attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    #[error("region falls outside the source frame")]
    OutOfBounds,
    #[error("region has no area")]
    Empty,
}

/// What is known about the frames of an active session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Reflect)]
pub struct FrameView {
    pub size: UVec2,
    pub rotation: Rotation,
    pub front_facing: bool,
    pub flags: PlatformFlags,
}

impl FrameView {
    pub fn uv_rect(&self, target_aspect: f32) -> UvRect {
        fit_uv_rect(
            self.size,
            self.rotation,
            target_aspect,
            self.front_facing,
            self.flags,
        )
    }

    /// Maps a rectangle of the displayed preview back to source pixels.
    pub fn map_region(&self, region: &DisplayRegion) -> Result<PixelRegion, RegionError> {
        let uv = self.uv_rect(region.target_aspect);
        let size = self.size.as_vec2();

        let a = uv.map(self.rotation.display_to_texture(region.rect.min)) * size;
        let b = uv.map(self.rotation.display_to_texture(region.rect.max)) * size;
        let mapped = Rect::from_corners(a, b);

        if !mapped.min.is_finite() || !mapped.max.is_finite() {
            return Err(RegionError::OutOfBounds);
        }
        if mapped.min.x < -EDGE_TOLERANCE
            || mapped.min.y < -EDGE_TOLERANCE
            || mapped.max.x > size.x + EDGE_TOLERANCE
            || mapped.max.y > size.y + EDGE_TOLERANCE
        {
            return Err(RegionError::OutOfBounds);
        }

        let x0 = mapped.min.x.floor().max(0.0) as u32;
        let y0 = mapped.min.y.floor().max(0.0) as u32;
        let x1 = (mapped.max.x.ceil() as u32).min(self.size.x);
        let y1 = (mapped.max.y.ceil() as u32).min(self.size.y);
        if x1 <= x0 || y1 <= y0 {
            return Err(RegionError::Empty);
        }

        Ok(PixelRegion {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}
