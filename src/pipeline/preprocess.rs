//! Image preprocessing: raw photo → the exact JPEG a classifier expects.
//!
//! Each step is a small service composed by `JpegPreprocessor`:
//! 1. Decode (any supported source format, resolution checked from the header first)
//! 2. Fix EXIF rotation from phone cameras
//! 3. Convert to RGB
//! 4. Resize (aspect-preserving for width-only targets, exact otherwise)
//! 5. Encode JPEG at the target quality
//!
//! Re-encoding is unconditional: a PNG or GIF pick must never reach a
//! classifier that only decodes JPEG.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, RgbImage};
use tracing::debug;

use super::acquire::{validate_source_dimensions, RawImage, MAX_OUTPUT_EDGE};
use super::PreprocessError;

// ═══════════════════════════════════════════════════════════
// Target specification
// ═══════════════════════════════════════════════════════════

/// Encoding of the prepared image. Classifiers only accept JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
}

/// Shape and encoding a classifier strategy requires.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSpec {
    pub width: u32,
    /// `None` keeps the source aspect ratio.
    pub height: Option<u32>,
    pub format: OutputFormat,
    /// Encoder quality in (0, 1].
    pub quality: f32,
}

impl TargetSpec {
    /// Square input edge of the on-device MobileNet model.
    pub const ON_DEVICE_EDGE: u32 = 224;

    /// Remote upload: fixed width, height follows the photo.
    pub fn remote(width: u32, quality: f32) -> Self {
        Self {
            width,
            height: None,
            format: OutputFormat::Jpeg,
            quality,
        }
    }

    /// On-device model input: exact 224×224, lossless-as-possible JPEG.
    pub fn on_device() -> Self {
        Self {
            width: Self::ON_DEVICE_EDGE,
            height: Some(Self::ON_DEVICE_EDGE),
            format: OutputFormat::Jpeg,
            quality: 1.0,
        }
    }

    /// Map the (0, 1] quality onto the encoder's 1..=100 scale.
    pub fn jpeg_quality(&self) -> u8 {
        let q = if self.quality.is_finite() {
            self.quality.clamp(0.0, 1.0)
        } else {
            1.0
        };
        ((q * 100.0).round() as u8).max(1)
    }

    /// Output dimensions for a source of `src_w` × `src_h`.
    ///
    /// A width-only target rejects sources whose aspect ratio would push the
    /// scaled height past `MAX_OUTPUT_EDGE`.
    pub fn output_dimensions(
        &self,
        src_w: u32,
        src_h: u32,
    ) -> Result<(u32, u32), PreprocessError> {
        let Some(h) = self.height else {
            let scaled = (src_h as f64 * self.width as f64 / src_w.max(1) as f64).round();
            if scaled > MAX_OUTPUT_EDGE as f64 {
                return Err(PreprocessError::InvalidSource(format!(
                    "Image aspect ratio {src_w}x{src_h} is too extreme to prepare"
                )));
            }
            return Ok((self.width, (scaled as u32).max(1)));
        };
        Ok((self.width, h))
    }

    fn validate(&self) -> Result<(), PreprocessError> {
        if self.width == 0 || self.height == Some(0) {
            return Err(PreprocessError::InvalidTarget(
                "target dimensions must be greater than zero".into(),
            ));
        }
        if self.width > MAX_OUTPUT_EDGE || self.height.is_some_and(|h| h > MAX_OUTPUT_EDGE) {
            return Err(PreprocessError::InvalidTarget(format!(
                "target dimensions must not exceed {MAX_OUTPUT_EDGE}"
            )));
        }
        Ok(())
    }
}

/// CatmullRom: sharp downscale without Lanczos ringing.
const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

// ═══════════════════════════════════════════════════════════
// Result type
// ═══════════════════════════════════════════════════════════

/// A JPEG whose dimensions match the active strategy's `TargetSpec`.
///
/// Owned by a single pipeline call and dropped after classification.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub jpeg_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

// ═══════════════════════════════════════════════════════════
// Service traits
// ═══════════════════════════════════════════════════════════

/// Fixes image orientation from EXIF metadata.
///
/// Phone photos embed rotation in EXIF tag 0x0112; without correction a
/// portrait shot reaches the classifier sideways.
pub trait OrientationCorrector: Send + Sync {
    /// `raw_bytes` are the original file bytes (EXIF lives there).
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage;
}

/// Turns an acquired photo into a classifier-ready JPEG.
pub trait ImagePreprocessor: Send + Sync {
    fn prepare(&self, raw: &RawImage, target: &TargetSpec)
        -> Result<PreparedImage, PreprocessError>;
}

// ═══════════════════════════════════════════════════════════
// JpegPreprocessor
// ═══════════════════════════════════════════════════════════

pub struct JpegPreprocessor {
    orientation: Box<dyn OrientationCorrector>,
}

impl JpegPreprocessor {
    pub fn new(orientation: Box<dyn OrientationCorrector>) -> Self {
        Self { orientation }
    }
}

impl Default for JpegPreprocessor {
    fn default() -> Self {
        Self::new(Box::new(ExifOrientationCorrector))
    }
}

impl ImagePreprocessor for JpegPreprocessor {
    fn prepare(
        &self,
        raw: &RawImage,
        target: &TargetSpec,
    ) -> Result<PreparedImage, PreprocessError> {
        target.validate()?;
        let bytes = raw.bytes();

        let (header_w, header_h) = read_dimensions(bytes)?;
        validate_source_dimensions(header_w, header_h)?;

        let img = image::load_from_memory(bytes)
            .map_err(|e| PreprocessError::Decode(e.to_string()))?;
        let img = self.orientation.correct(bytes, img);
        let (src_w, src_h) = img.dimensions();
        validate_source_dimensions(src_w, src_h)?;
        let (out_w, out_h) = target.output_dimensions(src_w, src_h)?;

        let rgb = img.to_rgb8();
        let resized = if (src_w, src_h) == (out_w, out_h) {
            rgb
        } else {
            image::imageops::resize(&rgb, out_w, out_h, RESIZE_FILTER)
        };

        let jpeg_bytes = match target.format {
            OutputFormat::Jpeg => encode_jpeg(resized, target.jpeg_quality())?,
        };

        debug!(
            original = format!("{src_w}x{src_h}"),
            output = format!("{out_w}x{out_h}"),
            jpeg_size = jpeg_bytes.len(),
            quality = target.jpeg_quality(),
            "Image prepared for classifier"
        );

        Ok(PreparedImage {
            jpeg_bytes,
            width: out_w,
            height: out_h,
        })
    }
}

/// Width and height from the image header, without decoding pixels.
fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32), PreprocessError> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|e| PreprocessError::Decode(e.to_string()))
}

/// Encode RGB pixels as a baseline JPEG.
pub fn encode_jpeg(img: RgbImage, quality: u8) -> Result<Vec<u8>, PreprocessError> {
    let dynamic = DynamicImage::ImageRgb8(img);
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Jpeg(quality))
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(cursor.into_inner())
}

// ── ExifOrientationCorrector ──────────────────────────────

/// EXIF orientation values:
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub struct ExifOrientationCorrector;

impl OrientationCorrector for ExifOrientationCorrector {
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage {
        let orientation = read_exif_orientation(raw_bytes);
        apply_orientation(image, orientation)
    }
}

/// Returns 1 (normal) if there is no EXIF data or no orientation tag.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
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

pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
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

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};

    fn make_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    fn raw(bytes: Vec<u8>) -> RawImage {
        RawImage::from_bytes(bytes).unwrap()
    }

    fn is_jpeg(bytes: &[u8]) -> bool {
        image::guess_format(bytes).ok() == Some(ImageFormat::Jpeg)
    }

    #[test]
    fn on_device_target_is_exact_224() {
        let pre = JpegPreprocessor::default();
        let out = pre
            .prepare(&raw(make_png(800, 600, [200, 180, 40])), &TargetSpec::on_device())
            .unwrap();
        assert_eq!((out.width, out.height), (224, 224));
        assert!(is_jpeg(&out.jpeg_bytes));

        let decoded = image::load_from_memory(&out.jpeg_bytes).unwrap();
        assert_eq!(decoded.dimensions(), (224, 224));
    }

    #[test]
    fn remote_target_preserves_aspect_ratio() {
        let pre = JpegPreprocessor::default();
        let out = pre
            .prepare(&raw(make_png(1280, 960, [10, 120, 10])), &TargetSpec::remote(640, 0.8))
            .unwrap();
        assert_eq!((out.width, out.height), (640, 480));
        assert!(is_jpeg(&out.jpeg_bytes));
    }

    #[test]
    fn narrow_source_reaches_target_width() {
        let pre = JpegPreprocessor::default();
        let out = pre
            .prepare(&raw(make_png(320, 400, [90, 90, 90])), &TargetSpec::remote(640, 0.8))
            .unwrap();
        assert_eq!((out.width, out.height), (640, 800));
    }

    #[test]
    fn png_source_is_reencoded_as_jpeg() {
        let pre = JpegPreprocessor::default();
        let out = pre
            .prepare(&raw(make_png(640, 640, [1, 2, 3])), &TargetSpec::remote(640, 0.7))
            .unwrap();
        assert!(is_jpeg(&out.jpeg_bytes));
    }

    #[test]
    fn undecodable_source_is_preprocess_error() {
        let pre = JpegPreprocessor::default();
        let err = pre
            .prepare(&raw(vec![0x42; 512]), &TargetSpec::on_device())
            .unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }

    #[test]
    fn zero_sized_target_rejected() {
        let pre = JpegPreprocessor::default();
        let err = pre
            .prepare(&raw(make_png(10, 10, [0, 0, 0])), &TargetSpec::remote(0, 0.8))
            .unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidTarget(_)));
    }

    #[test]
    fn jpeg_quality_mapping() {
        assert_eq!(TargetSpec::remote(640, 0.7).jpeg_quality(), 70);
        assert_eq!(TargetSpec::on_device().jpeg_quality(), 100);
        assert_eq!(TargetSpec::remote(640, 0.0).jpeg_quality(), 1);
        assert_eq!(TargetSpec::remote(640, 3.0).jpeg_quality(), 100);
    }

    #[test]
    fn output_dimensions_round_height() {
        let spec = TargetSpec::remote(640, 0.8);
        assert_eq!(spec.output_dimensions(1000, 333).unwrap(), (640, 213));
        assert_eq!(spec.output_dimensions(10_000, 1).unwrap(), (640, 1));
    }

    #[test]
    fn output_height_is_bounded() {
        let spec = TargetSpec::remote(640, 0.8);
        assert!(matches!(
            spec.output_dimensions(1, 20_000),
            Err(PreprocessError::InvalidSource(_))
        ));
        assert_eq!(
            TargetSpec::on_device().output_dimensions(1, 20_000).unwrap(),
            (224, 224)
        );
    }

    #[test]
    fn thin_tall_source_is_rejected_not_upscaled() {
        let pre = JpegPreprocessor::default();
        let bytes = make_png(1, 20_000, [120, 60, 30]);
        let err = pre
            .prepare(&raw(bytes), &TargetSpec::remote(640, 0.8))
            .unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidSource(_)));
    }

    #[test]
    fn thin_tall_source_still_fits_square_target() {
        let pre = JpegPreprocessor::default();
        let out = pre
            .prepare(&raw(make_png(1, 20_000, [120, 60, 30])), &TargetSpec::on_device())
            .unwrap();
        assert_eq!((out.width, out.height), (224, 224));
    }

    #[test]
    fn oversized_target_rejected() {
        let pre = JpegPreprocessor::default();
        let err = pre
            .prepare(
                &raw(make_png(10, 10, [0, 0, 0])),
                &TargetSpec::remote(MAX_OUTPUT_EDGE + 1, 0.8),
            )
            .unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidTarget(_)));
    }

    #[test]
    fn orientation_six_rotates_portrait() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([0, 0, 0])));
        let rotated = apply_orientation(img, 6);
        assert_eq!(rotated.dimensions(), (20, 40));
    }

    #[test]
    fn orientation_one_and_unknown_are_identity() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([0, 0, 0])));
        assert_eq!(apply_orientation(img.clone(), 1).dimensions(), (40, 20));
        assert_eq!(apply_orientation(img, 42).dimensions(), (40, 20));
    }

    #[test]
    fn no_exif_reads_as_normal() {
        assert_eq!(read_exif_orientation(&make_png(4, 4, [0, 0, 0])), 1);
        assert_eq!(read_exif_orientation(b"not an image"), 1);
    }
}
