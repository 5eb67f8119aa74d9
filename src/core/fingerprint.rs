use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use std::fmt;
use thiserror::Error;

pub const GRID_WIDTH: u32 = 32;
pub const GRID_HEIGHT: u32 = 32;
pub const FINGERPRINT_LEN: usize = GRID_WIDTH as usize;

/// Channel values are bucketed into four levels of 64.
const QUANT_STEP: u8 = 64;
const QUANT_MAX: u8 = 3;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Invalid fingerprint encoding: {message}")]
    Encoding { message: String },
}

/// Coarse colour digest of an image, one byte per column of the resampled grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, FingerprintError> {
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| FingerprintError::Encoding {
                message: e.to_string(),
            })?;
        let len = decoded.len();
        let bytes: [u8; FINGERPRINT_LEN] =
            decoded
                .try_into()
                .map_err(|_| FingerprintError::Encoding {
                    message: format!("expected {} bytes, got {}", FINGERPRINT_LEN, len),
                })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Compute the fingerprint of an encoded raster image.
///
/// The image is resampled to a 32x32 grid, every channel is quantized to
/// two bits, and the per-pixel bytes of each column are XOR-folded together.
/// The per-pixel byte is `(r << 4) + (g << 2) + r`: red is counted twice and
/// blue is ignored. Stored ledgers depend on this layout, so it must not change
/// without migrating them.
pub fn fingerprint(image_bytes: &[u8]) -> Result<Fingerprint, FingerprintError> {
    let decoded = image::load_from_memory(image_bytes)?;
    let grid = decoded
        .resize_exact(GRID_WIDTH, GRID_HEIGHT, FilterType::CatmullRom)
        .to_rgb8();

    let mut columns = [0u8; FINGERPRINT_LEN];
    for (x, _y, pixel) in grid.enumerate_pixels() {
        let [r, g, _b] = pixel.0;
        columns[x as usize] ^= combine(quantize(r), quantize(g));
    }

    Ok(Fingerprint(columns))
}

fn quantize(channel: u8) -> u8 {
    (channel / QUANT_STEP).min(QUANT_MAX)
}

fn combine(r: u8, g: u8) -> u8 {
    (r << 4) + (g << 2) + r
}
