//! The boundary to the barcode decoding library.

use bevy::prelude::*;

use crate::frame::LumaFrame;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
pub enum BarcodeFormat {
    #[default]
    QrCode,
    DataMatrix,
    Aztec,
    Pdf417,
    Code128,
    Ean13,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Reflect)]
pub struct DecodeHints {
    pub format: BarcodeFormat,
    /// Also look for symbols that are not upright.
    pub auto_rotate: bool,
    /// Also look for light-on-dark symbols.
    pub try_inverted: bool,
}

impl Default for DecodeHints {
    fn default() -> Self {
        Self {
            format: BarcodeFormat::QrCode,
            auto_rotate: true,
            try_inverted: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Reflect)]
pub struct DecodedBarcode {
    pub format: BarcodeFormat,
    pub text: String,
}

/// Result of a finished scan as seen by callers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Reflect)]
pub struct ScanResult {
    pub found: bool,
    pub text: Option<String>,
}

impl From<Option<DecodedBarcode>> for ScanResult {
    fn from(decoded: Option<DecodedBarcode>) -> Self {
        match decoded {
            Some(barcode) => Self {
                found: true,
                text: Some(barcode.text),
            },
            None => Self::default(),
        }
    }
}

/// A barcode decoder. Implementations return `None` when nothing was
/// found; that is the common case and not an error.
pub trait BarcodeReader: Send + Sync + 'static {
    fn supports(&self, format: BarcodeFormat) -> bool;

    fn decode(&self, frame: &LumaFrame, hints: &DecodeHints) -> Option<DecodedBarcode>;
}

/// QR code reader backed by `rqrr`.
///
/// `rqrr` locates finder patterns in any orientation, so `auto_rotate`
/// needs no extra pass here.
#[derive(Clone, Copy, Debug, Default)]
pub struct QrReader;

impl QrReader {
    fn decode_pass(frame: &LumaFrame) -> Option<String> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            frame.width as usize,
            frame.height as usize,
            |x, y| frame.get(x as u32, y as u32),
        );
        prepared
            .detect_grids()
            .into_iter()
            .find_map(|grid| match grid.decode() {
                Ok((_, text)) => Some(text),
                Err(err) => {
                    debug!("qr grid found but not decodable: {err}");
                    None
                }
            })
    }
}

impl BarcodeReader for QrReader {
    fn supports(&self, format: BarcodeFormat) -> bool {
        format == BarcodeFormat::QrCode
    }

    fn decode(&self, frame: &LumaFrame, hints: &DecodeHints) -> Option<DecodedBarcode> {
        if !self.supports(hints.format) || frame.width == 0 || frame.height == 0 {
            return None;
        }

        let text = Self::decode_pass(frame).or_else(|| {
            if hints.try_inverted {
                Self::decode_pass(&frame.inverted())
            } else {
                None
            }
        })?;

        Some(DecodedBarcode {
            format: BarcodeFormat::QrCode,
            text,
        })
    }
}
