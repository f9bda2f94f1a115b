//! Image normalization: brightness, contrast, grayscale and binarization.
//!
//! Every step here is a pure function of the input bytes and the
//! [`PreprocessParams`], so the same image and the same settings always
//! produce a byte-identical [`NormalizedImage`].

use std::{borrow::Cow, fmt, fs, io::Cursor, sync::Arc};

use clap::Args;
use image::{
    DynamicImage, GrayImage, ImageDecoder as _, ImageFormat, ImageReader, ImageResult, Luma,
    RgbImage, imageops::FilterType, metadata::Orientation,
};

use crate::prelude::*;

/// Default preview bounding box, in pixels.
pub const PREVIEW_SIZE: (u32, u32) = (400, 300);

/// Tunable preprocessing settings, applied uniformly to a batch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PreprocessParams {
    /// Brightness, between 0.0 and 2.0. 1.0 leaves the image unchanged.
    pub brightness: f64,
    /// Contrast, between 0.0 and 2.0. 1.0 leaves the image unchanged.
    pub contrast: f64,
    /// Pixels at or above this gray level become white, others black.
    pub threshold: u8,
}

impl PreprocessParams {
    /// Create a new set of parameters, checking ranges.
    pub fn new(brightness: f64, contrast: f64, threshold: u8) -> Result<Self> {
        if !(0.0..=2.0).contains(&brightness) {
            return Err(anyhow!(
                "brightness must be between 0.0 and 2.0, got {brightness}"
            ));
        }
        if !(0.0..=2.0).contains(&contrast) {
            return Err(anyhow!("contrast must be between 0.0 and 2.0, got {contrast}"));
        }
        Ok(Self {
            brightness,
            contrast,
            threshold,
        })
    }

    /// The intensity shift applied after scaling by `contrast`.
    ///
    /// Truncates toward zero, so 0.995 and 1.0 both give a shift of 0.
    fn beta(&self) -> f64 {
        (100.0 * (self.brightness - 1.0)).trunc()
    }
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            contrast: 1.0,
            threshold: 127,
        }
    }
}

/// Command-line options for preprocessing.
#[derive(Args, Clone, Debug)]
pub struct PreprocessOpts {
    /// Brightness adjustment, from 0.0 to 2.0.
    #[clap(long, default_value = "1.0", value_parser = parse_unit_range)]
    pub brightness: f64,

    /// Contrast adjustment, from 0.0 to 2.0.
    #[clap(long, default_value = "1.0", value_parser = parse_unit_range)]
    pub contrast: f64,

    /// Binarization threshold, from 0 to 255.
    #[clap(long, default_value = "127")]
    pub threshold: u8,
}

impl PreprocessOpts {
    /// Convert to [`PreprocessParams`].
    pub fn to_params(&self) -> Result<PreprocessParams> {
        PreprocessParams::new(self.brightness, self.contrast, self.threshold)
    }
}

/// Parse a float in `[0.0, 2.0]` for clap.
fn parse_unit_range(s: &str) -> Result<f64, String> {
    let value = s
        .parse::<f64>()
        .map_err(|err| format!("not a number: {err}"))?;
    if (0.0..=2.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not between 0.0 and 2.0"))
    }
}

/// Where the encoded bytes of a [`SourceImage`] live.
#[derive(Clone, Debug)]
pub enum ImageData {
    /// Read from disk when normalized.
    Path(PathBuf),
    /// Already in memory.
    Memory(Arc<[u8]>),
}

/// A caller-owned input image. Never modified by the pipeline.
#[derive(Clone, Debug)]
pub struct SourceImage {
    /// The document ID used in results.
    pub id: String,
    /// The encoded image.
    pub data: ImageData,
}

impl SourceImage {
    /// Create a source image for a file, using the file name as the ID.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            id,
            data: ImageData::Path(path),
        }
    }

    /// Create a source image from encoded bytes.
    pub fn from_bytes(id: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: id.into(),
            data: ImageData::Memory(bytes.into()),
        }
    }

    /// Load the encoded bytes. Blocking.
    fn encoded_bytes(&self) -> Result<Cow<'_, [u8]>, InvalidImage> {
        match &self.data {
            ImageData::Path(path) => fs::read(path).map(Cow::Owned).map_err(|err| {
                InvalidImage(format!("could not read {:?}: {}", path.display(), err))
            }),
            ImageData::Memory(bytes) => Ok(Cow::Borrowed(&bytes[..])),
        }
    }
}

/// The source image could not be read or decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidImage(pub String);

impl fmt::Display for InvalidImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid image: {}", self.0)
    }
}

impl std::error::Error for InvalidImage {}

/// A single-channel image where every pixel is either 0 or 255.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedImage {
    pixels: GrayImage,
}

impl NormalizedImage {
    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Raw row-major pixel data.
    pub fn as_bytes(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    /// How many pixels are black?
    pub fn black_pixel_count(&self) -> usize {
        self.as_bytes().iter().filter(|&&p| p == 0).count()
    }

    /// Is every pixel white?
    pub fn is_blank(&self) -> bool {
        self.as_bytes().iter().all(|&p| p == 255)
    }

    /// Encode as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.pixels
            .write_to(&mut out, ImageFormat::Png)
            .context("failed to encode normalized image as PNG")?;
        Ok(out.into_inner())
    }

    /// Scale to fit inside `max_width` x `max_height` for display.
    ///
    /// Nearest-neighbor keeps the preview two-toned.
    pub fn preview(&self, max_width: u32, max_height: u32) -> NormalizedImage {
        let (width, height) = fit_within(self.width(), self.height(), max_width, max_height);
        NormalizedImage {
            pixels: image::imageops::resize(&self.pixels, width, height, FilterType::Nearest),
        }
    }
}

/// Compute dimensions that fit inside a bounding box, keeping aspect ratio.
fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = f64::min(
        f64::from(max_width) / f64::from(width),
        f64::from(max_height) / f64::from(height),
    );
    let w = ((f64::from(width) * scale).round() as u32).max(1);
    let h = ((f64::from(height) * scale).round() as u32).max(1);
    (w, h)
}

/// Normalize an image for OCR. Blocking and CPU-bound.
#[instrument(level = "debug", skip_all, fields(id = %image.id))]
pub fn normalize(
    image: &SourceImage,
    params: &PreprocessParams,
) -> Result<NormalizedImage, InvalidImage> {
    let bytes = image.encoded_bytes()?;
    if let Some(kind) = infer::get(&bytes) {
        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(InvalidImage(format!(
                "{} is {}, not an image",
                image.id,
                kind.mime_type()
            )));
        }
    }
    let decoded = decode_upright(&bytes)
        .map_err(|err| InvalidImage(format!("could not decode {}: {}", image.id, err)))?;
    let rgb = decoded.to_rgb8();
    trace!(width = rgb.width(), height = rgb.height(), "Decoded image");
    Ok(normalize_rgb(&rgb, params))
}

/// Decode an image, applying any EXIF orientation so phone photos come out
/// upright.
fn decode_upright(bytes: &[u8]) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or_else(|err| {
        debug!(%err, "Ignoring unreadable image orientation");
        Orientation::NoTransforms
    });
    let mut decoded = DynamicImage::from_decoder(decoder)?;
    if orientation != Orientation::NoTransforms {
        trace!(?orientation, "Applying image orientation");
        decoded.apply_orientation(orientation);
    }
    Ok(decoded)
}

/// The pixel transform behind [`normalize`], on an already-decoded image.
pub fn normalize_rgb(rgb: &RgbImage, params: &PreprocessParams) -> NormalizedImage {
    let lut = scale_lut(params);
    let threshold = params.threshold;
    let pixels = GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let gray = luminance(lut[usize::from(r)], lut[usize::from(g)], lut[usize::from(b)]);
        Luma([if gray >= threshold { 255 } else { 0 }])
    });
    NormalizedImage { pixels }
}

/// Precompute the brightness/contrast mapping for every channel value.
fn scale_lut(params: &PreprocessParams) -> [u8; 256] {
    let beta = params.beta();
    let mut lut = [0u8; 256];
    for (value, out) in lut.iter_mut().enumerate() {
        let scaled = (value as f64 * params.contrast + beta).round_ties_even();
        *out = scaled.clamp(0.0, 255.0) as u8;
    }
    lut
}

/// BT.601 luma in 14-bit fixed point.
fn luminance(r: u8, g: u8, b: u8) -> u8 {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    let y = (R * u32::from(r) + G * u32::from(g) + B * u32::from(b) + (1 << 13)) >> 14;
    y.min(255) as u8
}

#[cfg(test)]
pub(crate) mod tests {
    use image::Rgb;

    use super::*;

    /// Encode an RGB image as PNG bytes.
    pub(crate) fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// A horizontal gradient with some color, so every threshold matters.
    pub(crate) fn gradient_png() -> Vec<u8> {
        let img = RgbImage::from_fn(64, 8, |x, y| {
            let v = (x * 4) as u8;
            Rgb([v, v.saturating_add(y as u8), 255 - v])
        });
        png_bytes(&img)
    }

    /// A solid white image.
    pub(crate) fn blank_png() -> Vec<u8> {
        png_bytes(&RgbImage::from_pixel(32, 16, Rgb([255, 255, 255])))
    }

    #[test]
    fn normalize_is_deterministic() {
        let source = SourceImage::from_bytes("gradient", gradient_png());
        let params = PreprocessParams::new(1.3, 0.8, 90).unwrap();
        let first = normalize(&source, &params).unwrap();
        let second = normalize(&source, &params).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn output_is_binary() {
        let source = SourceImage::from_bytes("gradient", gradient_png());
        let normalized = normalize(&source, &PreprocessParams::default()).unwrap();
        assert!(normalized.as_bytes().iter().all(|&p| p == 0 || p == 255));
        assert_eq!((normalized.width(), normalized.height()), (64, 8));
    }

    #[test]
    fn raising_threshold_never_removes_black_pixels() {
        let source = SourceImage::from_bytes("gradient", gradient_png());
        let mut previous = 0;
        for threshold in 0..=255u8 {
            let params = PreprocessParams::new(1.0, 1.0, threshold).unwrap();
            let black = normalize(&source, &params).unwrap().black_pixel_count();
            assert!(
                black >= previous,
                "threshold {threshold}: {black} black pixels < {previous}"
            );
            previous = black;
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let img = RgbImage::from_pixel(1, 1, Rgb([127, 127, 127]));
        let at = normalize_rgb(&img, &PreprocessParams::new(1.0, 1.0, 127).unwrap());
        let above = normalize_rgb(&img, &PreprocessParams::new(1.0, 1.0, 128).unwrap());
        assert_eq!(at.as_bytes(), &[255]);
        assert_eq!(above.as_bytes(), &[0]);
    }

    #[test]
    fn brightness_shifts_and_clamps() {
        let params = PreprocessParams::new(2.0, 1.0, 0).unwrap();
        assert_eq!(params.beta(), 100.0);
        let lut = scale_lut(&params);
        assert_eq!(lut[0], 100);
        assert_eq!(lut[200], 255);

        let dark = PreprocessParams::new(0.0, 1.0, 0).unwrap();
        let lut = scale_lut(&dark);
        assert_eq!(lut[50], 0);
        assert_eq!(lut[150], 50);
    }

    #[test]
    fn blank_image_normalizes_to_white() {
        let source = SourceImage::from_bytes("blank", blank_png());
        let normalized = normalize(&source, &PreprocessParams::default()).unwrap();
        assert!(normalized.is_blank());
    }

    #[test]
    fn exif_orientation_is_applied() {
        use image::{ExtendedColorType, ImageEncoder as _, codecs::png::PngEncoder};

        // Black left column on white, tagged "rotate 90 degrees clockwise".
        let img = RgbImage::from_fn(4, 2, |x, _| {
            if x == 0 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        });
        let exif = vec![
            0x49, 0x49, 42, 0, 8, 0, 0, 0, // little-endian header, IFD at 8
            1, 0, // one entry
            0x12, 0x01, 3, 0, 1, 0, 0, 0, 6, 0, 0, 0, // orientation = 6
            0, 0, 0, 0, // no next IFD
        ];
        let mut bytes = Vec::new();
        let mut encoder = PngEncoder::new(&mut bytes);
        encoder.set_exif_metadata(exif).unwrap();
        encoder
            .write_image(img.as_raw(), 4, 2, ExtendedColorType::Rgb8)
            .unwrap();

        let normalized = normalize(
            &SourceImage::from_bytes("photo.png", bytes),
            &PreprocessParams::default(),
        )
        .unwrap();
        assert_eq!((normalized.width(), normalized.height()), (2, 4));
        assert_eq!(&normalized.as_bytes()[..2], &[0, 0]);
        assert_eq!(normalized.black_pixel_count(), 2);
    }

    #[test]
    fn corrupt_bytes_are_invalid() {
        let source = SourceImage::from_bytes("junk", b"definitely not a png".to_vec());
        let err = normalize(&source, &PreprocessParams::default()).unwrap_err();
        assert!(err.to_string().contains("junk"), "{err}");
    }

    #[test]
    fn missing_file_is_invalid() {
        let source = SourceImage::from_path("/nonexistent/scan.png");
        assert_eq!(source.id, "scan.png");
        assert!(normalize(&source, &PreprocessParams::default()).is_err());
    }

    #[test]
    fn params_are_range_checked() {
        assert!(PreprocessParams::new(2.1, 1.0, 0).is_err());
        assert!(PreprocessParams::new(1.0, -0.1, 0).is_err());
        assert!(parse_unit_range("1.5").is_ok());
        assert!(parse_unit_range("3").is_err());
    }

    #[test]
    fn preview_fits_bounding_box() {
        let img = RgbImage::from_pixel(800, 200, Rgb([0, 0, 0]));
        let normalized = normalize_rgb(&img, &PreprocessParams::default());
        let preview = normalized.preview(PREVIEW_SIZE.0, PREVIEW_SIZE.1);
        assert_eq!((preview.width(), preview.height()), (400, 100));
        assert!(preview.as_bytes().iter().all(|&p| p == 0));
    }

    #[test]
    fn png_round_trip_keeps_pixels() {
        let source = SourceImage::from_bytes("gradient", gradient_png());
        let normalized = normalize(&source, &PreprocessParams::default()).unwrap();
        let png = normalized.to_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.as_raw(), normalized.as_bytes());
    }
}
