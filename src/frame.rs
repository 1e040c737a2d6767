use crate::orientation::PixelRegion;

/// One captured frame in tightly packed RGBA8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSnapshot {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

/// A single-channel 8-bit image as handed to the decoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LumaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FrameSnapshot {
    /// Wraps a packed RGBA8 buffer. Returns `None` unless it holds exactly
    /// `width * height` pixels.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        (rgba.len() == expected).then_some(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn size(&self) -> bevy::math::UVec2 {
        bevy::math::UVec2::new(self.width, self.height)
    }

    /// Converts the frame, or the part of it inside `region`, to luma.
    /// Regions are clamped to the frame.
    pub fn luma(&self, region: Option<PixelRegion>) -> LumaFrame {
        let region = region.unwrap_or(PixelRegion {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        });
        let x0 = region.x.min(self.width);
        let y0 = region.y.min(self.height);
        let x1 = region.x.saturating_add(region.width).min(self.width);
        let y1 = region.y.saturating_add(region.height).min(self.height);

        let width = x1 - x0;
        let height = y1 - y0;
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in y0..y1 {
            let row = y as usize * self.width as usize * 4;
            let start = row + x0 as usize * 4;
            let end = row + x1 as usize * 4;
            pixels.extend(self.rgba[start..end].chunks_exact(4).map(luma));
        }

        LumaFrame {
            width,
            height,
            pixels,
        }
    }
}

impl LumaFrame {
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn inverted(&self) -> LumaFrame {
        LumaFrame {
            width: self.width,
            height: self.height,
            pixels: self.pixels.iter().map(|p| 255 - p).collect(),
        }
    }
}

// BT.601 weights in 8.8 fixed point.
fn luma(pixel: &[u8]) -> u8 {
    let r = pixel[0] as u32;
    let g = pixel[1] as u32;
    let b = pixel[2] as u32;
    ((77 * r + 150 * g + 29 * b) >> 8) as u8
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for chunk in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 0xff]);
    }
    rgba
}
