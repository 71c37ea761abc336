//! Image fingerprinting for duplicate detection
//!
//! Reduces an image to an 8x8 single-channel luminance grid and hashes the
//! 64 raw pixel bytes with SHA-256. The digest is stable across byte-level
//! re-encodes that decode to the same pixels, and changes for any real
//! content difference. This is an exact content fingerprint over the
//! downsampled grid, not a Hamming-distance perceptual hash.

use image::imageops::FilterType;
use mvg_common::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Side length of the downsampled luminance grid
const GRID_SIZE: u32 = 8;

/// Fingerprint plus the image properties the moderation gate needs.
///
/// Produced from a single decode so moderation does not pay for the image
/// decode twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFingerprint {
    /// Hex-encoded SHA-256 over the 8x8 luminance grid
    pub digest: String,
    /// Decoded width in pixels
    pub width: u32,
    /// Decoded height in pixels
    pub height: u32,
    /// Size of the encoded file in bytes
    pub byte_len: u64,
}

/// Fingerprint an image from raw encoded bytes.
///
/// # Errors
/// Returns `Error::ImageDecode` if the bytes cannot be decoded. Callers must
/// treat that as a failed submission, never as "no duplicate found".
pub fn fingerprint_bytes(bytes: &[u8]) -> Result<ImageFingerprint> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::ImageDecode(e.to_string()))?;

    let width = img.width();
    let height = img.height();

    // Fill the full grid regardless of aspect ratio, then collapse to luminance
    let grid = img
        .resize_exact(GRID_SIZE, GRID_SIZE, FilterType::Triangle)
        .to_luma8();

    let digest = Sha256::digest(grid.as_raw());

    Ok(ImageFingerprint {
        digest: format!("{:x}", digest),
        width,
        height,
        byte_len: bytes.len() as u64,
    })
}

/// Fingerprint an image file.
///
/// Decode and downsample run on the blocking pool; the digest length and
/// image dimensions are logged at debug level.
pub async fn fingerprint_file(path: &Path) -> Result<ImageFingerprint> {
    let path_buf = path.to_path_buf();
    tracing::debug!(path = %path_buf.display(), "Fingerprinting image");

    let fingerprint = tokio::task::spawn_blocking(move || -> Result<ImageFingerprint> {
        let bytes = std::fs::read(&path_buf)?;
        fingerprint_bytes(&bytes)
    })
    .await
    .map_err(|e| Error::Internal(format!("Fingerprint task failed: {}", e)))??;

    tracing::debug!(
        digest = %fingerprint.digest,
        width = fingerprint.width,
        height = fingerprint.height,
        "Fingerprinted image"
    );

    Ok(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    /// Encode a flat-color test image as PNG bytes
    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn same_pixels_same_digest() {
        let a = fingerprint_bytes(&png_bytes(64, 64, [180, 120, 40])).unwrap();
        let b = fingerprint_bytes(&png_bytes(64, 64, [180, 120, 40])).unwrap();
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64); // SHA-256 hex string
    }

    #[test]
    fn different_content_different_digest() {
        let a = fingerprint_bytes(&png_bytes(64, 64, [180, 120, 40])).unwrap();
        let b = fingerprint_bytes(&png_bytes(64, 64, [40, 120, 180])).unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn records_dimensions_and_size() {
        let bytes = png_bytes(100, 50, [10, 10, 10]);
        let fp = fingerprint_bytes(&bytes).unwrap();
        assert_eq!(fp.width, 100);
        assert_eq!(fp.height, 50);
        assert_eq!(fp.byte_len, bytes.len() as u64);
    }

    #[test]
    fn undecodable_bytes_fail() {
        let err = fingerprint_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, Error::ImageDecode(_)));
    }

    #[tokio::test]
    async fn fingerprints_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("front.png");
        std::fs::write(&path, png_bytes(32, 32, [200, 150, 90])).unwrap();

        let from_file = fingerprint_file(&path).await.unwrap();
        let from_bytes = fingerprint_bytes(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(from_file, from_bytes);
    }
}
