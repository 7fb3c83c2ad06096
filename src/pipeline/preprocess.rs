//! Image preprocessing ahead of recognition.
//!
//! A fixed, deterministic chain of transforms tuned for printed documents:
//! upscale to scanner-like resolution, flatten to greyscale, stretch the
//! histogram, sharpen, binarize, and despeckle. The output is a lossless PNG
//! written next to the source file; [`PreprocessedImage`] removes it again
//! when dropped.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use tracing::debug;

use super::PipelineError;

/// Maximum input image size (in bytes) before rejecting.
/// Prevents OOM on corrupt/adversarial files.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// Upscale factor applied to the source width.
const UPSCALE_FACTOR: u32 = 3;

/// Floor on the upscaled width. Keeps small camera crops at an effective
/// resolution comparable to a 300 DPI scan.
const MIN_TARGET_WIDTH: u32 = 2400;

/// Gamma applied after histogram normalization.
const GAMMA: f32 = 1.2;

/// Linear contrast stretch: v' = GAIN * v + BIAS.
const CONTRAST_GAIN: f32 = 1.5;
const CONTRAST_BIAS: f32 = -64.0;

/// Unsharp mask parameters (blur sigma, difference threshold).
const UNSHARP_SIGMA: f32 = 1.2;
const UNSHARP_THRESHOLD: i32 = 2;

/// Brightness cutoff for binarization.
const BINARIZE_THRESHOLD: u8 = 128;

/// Filename marker appended to preprocessed output files.
pub(crate) const PROCESSED_SUFFIX: &str = "_processed";

/// A preprocessed image on disk, deleted on drop.
///
/// The intermediate file must not outlive the attempt that created it, on
/// success and failure paths alike. Dropping the guard removes it whenever
/// it differs from the source upload.
#[derive(Debug)]
pub struct PreprocessedImage {
    path: PathBuf,
    source: PathBuf,
}

impl PreprocessedImage {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PreprocessedImage {
    fn drop(&mut self) {
        if self.path != self.source {
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), error = %e, "Preprocessed file already gone");
            }
        }
    }
}

/// Run the preprocessing chain on a stored upload.
///
/// PDF input fails fast with `UnsupportedFormat` before any decode — page
/// rasterization is deliberately not part of this service. Decode and I/O
/// errors propagate unmodified; the caller treats them as a processing
/// failure.
pub fn preprocess_for_ocr(
    source: &Path,
    mime_type: &str,
) -> Result<PreprocessedImage, PipelineError> {
    if mime_type.eq_ignore_ascii_case("application/pdf") {
        return Err(PipelineError::UnsupportedFormat(
            "PDF input cannot be preprocessed; upload a raster image".into(),
        ));
    }
    if !mime_type.to_ascii_lowercase().starts_with("image/") {
        return Err(PipelineError::UnsupportedFormat(format!(
            "cannot preprocess '{mime_type}'"
        )));
    }

    let raw = std::fs::read(source)?;
    validate_image_bytes(&raw)?;

    let img = image::load_from_memory(&raw)
        .map_err(|e| PipelineError::Image(format!("Failed to decode image: {e}")))?;
    let img = apply_orientation(img, read_exif_orientation(&raw));
    let (orig_w, orig_h) = img.dimensions();

    // Upscale with a high-quality filter, then flatten to greyscale
    let target_w = (orig_w * UPSCALE_FACTOR).max(MIN_TARGET_WIDTH);
    let target_h = ((orig_h as u64 * target_w as u64) / orig_w as u64).max(1) as u32;
    let resized = img.resize_exact(target_w, target_h, FilterType::Lanczos3);
    let mut gray = resized.to_luma8();

    stretch_histogram(&mut gray);
    apply_gamma(&mut gray, GAMMA);
    apply_contrast(&mut gray, CONTRAST_GAIN, CONTRAST_BIAS);

    let mut sharpened = image::imageops::unsharpen(&gray, UNSHARP_SIGMA, UNSHARP_THRESHOLD);
    binarize(&mut sharpened, BINARIZE_THRESHOLD);
    let denoised = median_filter_3x3(&sharpened);

    let out_path = processed_path(source);
    denoised
        .save(&out_path)
        .map_err(|e| PipelineError::Image(format!("Failed to write processed image: {e}")))?;

    debug!(
        source = %source.display(),
        original = format!("{orig_w}x{orig_h}"),
        output = format!("{target_w}x{target_h}"),
        "Image preprocessed for recognition"
    );

    Ok(PreprocessedImage {
        path: out_path,
        source: source.to_path_buf(),
    })
}

/// Validate image bytes before decoding.
/// Returns early error for clearly invalid input — saves decode time.
fn validate_image_bytes(bytes: &[u8]) -> Result<(), PipelineError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(PipelineError::Image(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(PipelineError::Image(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
///
/// EXIF orientation values:
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        1 => img,
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Linear stretch over the observed intensity range.
fn stretch_histogram(img: &mut GrayImage) {
    let mut min = 255u8;
    let mut max = 0u8;
    for p in img.pixels() {
        min = min.min(p.0[0]);
        max = max.max(p.0[0]);
    }
    if max <= min {
        return;
    }

    let range = (max - min) as f32;
    for p in img.pixels_mut() {
        p.0[0] = (((p.0[0] - min) as f32 / range) * 255.0).round() as u8;
    }
}

fn apply_gamma(img: &mut GrayImage, gamma: f32) {
    let inv = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i as f32 / 255.0).powf(inv) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    for p in img.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
}

fn apply_contrast(img: &mut GrayImage, gain: f32, bias: f32) {
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = (gain * i as f32 + bias).round().clamp(0.0, 255.0) as u8;
    }
    for p in img.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
}

fn binarize(img: &mut GrayImage, threshold: u8) {
    for p in img.pixels_mut() {
        p.0[0] = if p.0[0] >= threshold { 255 } else { 0 };
    }
}

/// 3x3 median filter with clamped borders. Suppresses speckle noise left
/// over from binarization without eroding glyph edges.
fn median_filter_3x3(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = GrayImage::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let mut window = [0u8; 9];
            let mut n = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let nx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                    let ny = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                    window[n] = img.get_pixel(nx, ny).0[0];
                    n += 1;
                }
            }
            window.sort_unstable();
            out.put_pixel(x, y, Luma([window[4]]));
        }
    }

    out
}

fn processed_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".into());
    let parent = source.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{stem}{PROCESSED_SUFFIX}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbImage};

    /// Write a small gradient PNG so every transform has real dynamic range.
    fn write_test_png(path: &Path, width: u32, height: u32) {
        let mut img = RgbImage::new(width, height);
        for (x, y, p) in img.enumerate_pixels_mut() {
            let v = ((x * 7 + y * 3) % 256) as u8;
            *p = Rgb([v, v, v]);
        }
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        std::fs::write(path, cursor.into_inner()).unwrap();
    }

    #[test]
    fn pdf_mime_fails_fast_without_touching_the_file() {
        let result = preprocess_for_ocr(Path::new("/nonexistent/file.pdf"), "application/pdf");
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
    }

    #[test]
    fn non_image_mime_is_rejected() {
        let result = preprocess_for_ocr(Path::new("/nonexistent/file.txt"), "text/plain");
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
    }

    #[test]
    fn corrupt_image_propagates_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.png");
        std::fs::write(&path, [0xDE, 0xAD, 0xBE, 0xEF].repeat(25)).unwrap();

        let result = preprocess_for_ocr(&path, "image/png");
        assert!(matches!(result, Err(PipelineError::Image(_))));
    }

    #[test]
    fn truncated_file_is_rejected_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        std::fs::write(&path, [0x89, 0x50]).unwrap();

        let result = preprocess_for_ocr(&path, "image/png");
        assert!(matches!(result, Err(PipelineError::Image(_))));
    }

    #[test]
    fn output_is_upscaled_greyscale_and_binary() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.png");
        write_test_png(&source, 64, 40);

        let processed = preprocess_for_ocr(&source, "image/png").unwrap();
        assert_ne!(processed.path(), source);
        assert!(processed.path().to_string_lossy().contains("_processed"));

        let out = image::open(processed.path()).unwrap();
        assert!(out.width() >= 3 * 64);
        assert_eq!(out.width(), MIN_TARGET_WIDTH); // floor dominates small inputs
        assert_eq!(out.color(), image::ColorType::L8);

        let gray = out.to_luma8();
        assert!(gray.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        // both classes present for a gradient input
        assert!(gray.pixels().any(|p| p.0[0] == 0));
        assert!(gray.pixels().any(|p| p.0[0] == 255));
    }

    #[test]
    fn drop_removes_the_intermediate_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.png");
        write_test_png(&source, 32, 32);

        let out_path = {
            let processed = preprocess_for_ocr(&source, "image/png").unwrap();
            let p = processed.path().to_path_buf();
            assert!(p.exists());
            p
        };
        assert!(!out_path.exists());
        assert!(source.exists(), "source upload must survive the guard");
    }

    #[test]
    fn processed_path_keeps_the_directory() {
        let path = processed_path(Path::new("/data/uploads/abc123.jpg"));
        assert_eq!(path, PathBuf::from("/data/uploads/abc123_processed.png"));
    }

    #[test]
    fn median_filter_removes_isolated_speckle() {
        let mut img = GrayImage::from_pixel(9, 9, Luma([255]));
        img.put_pixel(4, 4, Luma([0]));

        let filtered = median_filter_3x3(&img);
        assert_eq!(filtered.get_pixel(4, 4).0[0], 255);
    }

    #[test]
    fn stretch_expands_narrow_range_to_full_scale() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(0, 0, Luma([100]));
        img.put_pixel(1, 0, Luma([150]));

        stretch_histogram(&mut img);
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn stretch_leaves_flat_image_unchanged() {
        let mut img = GrayImage::from_pixel(4, 4, Luma([77]));
        stretch_histogram(&mut img);
        assert!(img.pixels().all(|p| p.0[0] == 77));
    }

    #[test]
    fn binarize_is_two_valued() {
        let mut img = GrayImage::new(3, 1);
        img.put_pixel(0, 0, Luma([10]));
        img.put_pixel(1, 0, Luma([128]));
        img.put_pixel(2, 0, Luma([200]));

        binarize(&mut img, 128);
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(1, 0).0[0], 255);
        assert_eq!(img.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn exif_orientation_defaults_to_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        write_test_png(&path, 10, 10);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(read_exif_orientation(&bytes), 1);
    }

    #[test]
    fn orientation_rotations_swap_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([100, 100, 100])));
        let rotated = apply_orientation(img, 6);
        assert_eq!(rotated.width(), 20);
        assert_eq!(rotated.height(), 10);
    }
}
