//! Screenshot comparison against a reference

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shotcheck_engine::{Comparator, DiffBounds, DiffResult, DimensionDifference, ImageRef};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{CompareError, CompareResult};

/// Colour used for differing pixels in the rendered diff
const HIGHLIGHT: Rgba<u8> = Rgba([255, 0, 255, 255]);

/// Configuration for image comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Largest per-channel difference still treated as equal
    pub tolerance: u8,

    /// Skip decoding when both files hash identically
    pub hash_shortcut: bool,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            tolerance: 0,
            hash_shortcut: true,
        }
    }
}

/// Compares PNG files on disk
#[derive(Debug, Clone, Default)]
pub struct ImageComparator {
    config: CompareConfig,
}

impl ImageComparator {
    pub fn new(config: CompareConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompareConfig {
        &self.config
    }

    /// Compare two files synchronously
    pub fn compare_files(&self, reference: &Path, test: &Path) -> CompareResult<DiffResult> {
        let reference_bytes = read_image(reference)?;
        let test_bytes = read_image(test)?;

        if self.config.hash_shortcut && hash(&reference_bytes) == hash(&test_bytes) {
            debug!(
                "{} and {} match exactly (same hash)",
                reference.display(),
                test.display()
            );
            return Ok(DiffResult::identical());
        }

        let reference_img = image::load_from_memory(&reference_bytes)?.to_rgba8();
        let test_img = image::load_from_memory(&test_bytes)?.to_rgba8();
        diff_images(&reference_img, &test_img, self.config.tolerance)
    }
}

#[async_trait]
impl Comparator for ImageComparator {
    async fn compare(
        &self,
        reference: &ImageRef,
        test: &ImageRef,
    ) -> shotcheck_engine::Result<DiffResult> {
        let comparator = self.clone();
        let reference_path = reference.path.clone();
        let test_path = test.path.clone();

        let result = tokio::task::spawn_blocking(move || {
            comparator.compare_files(&reference_path, &test_path)
        })
        .await
        .map_err(|e| CompareError::Task(e.to_string()))??;

        debug!(
            "Compared '{}': {:.2}% mismatch",
            reference.name, result.mismatch_percentage
        );
        Ok(result)
    }
}

/// Pixel-by-pixel difference of two decoded images.
///
/// Both images are laid over a canvas as large as the bigger of the two;
/// canvas pixels not covered by both images count as differing.
pub fn diff_images(
    reference: &RgbaImage,
    test: &RgbaImage,
    tolerance: u8,
) -> CompareResult<DiffResult> {
    let (ref_width, ref_height) = reference.dimensions();
    let (test_width, test_height) = test.dimensions();
    let is_same_dimensions = (ref_width, ref_height) == (test_width, test_height);
    let dimension_difference = DimensionDifference {
        width: ref_width as i64 - test_width as i64,
        height: ref_height as i64 - test_height as i64,
    };

    if !is_same_dimensions {
        warn!(
            "Screenshot dimensions differ: reference {:?} vs test {:?}",
            reference.dimensions(),
            test.dimensions()
        );
    }

    let width = ref_width.max(test_width);
    let height = ref_height.max(test_height);
    let total_pixels = (width as u64) * (height as u64);
    if total_pixels == 0 {
        return Ok(DiffResult::new(
            0.0,
            is_same_dimensions,
            DiffBounds::default(),
            dimension_difference,
            None,
        ));
    }

    let mut canvas = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;
    // (top, left, bottom, right)
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for y in 0..height {
        for x in 0..width {
            let expected = pixel_at(reference, x, y);
            let actual = pixel_at(test, x, y);

            match (expected, actual) {
                (Some(a), Some(b)) if !pixels_differ(a, b, tolerance) => {
                    let c = b.0;
                    canvas.put_pixel(x, y, Rgba([c[0] / 2, c[1] / 2, c[2] / 2, 128]));
                }
                _ => {
                    diff_pixels += 1;
                    canvas.put_pixel(x, y, HIGHLIGHT);
                    bounds = Some(match bounds {
                        None => (y, x, y, x),
                        Some((top, left, bottom, right)) => {
                            (top.min(y), left.min(x), bottom.max(y), right.max(x))
                        }
                    });
                }
            }
        }
    }

    let mismatch_percentage = (diff_pixels as f64 / total_pixels as f64) * 100.0;
    let diff_bounds = bounds
        .map(|(top, left, bottom, right)| DiffBounds {
            top: top as i64,
            left: left as i64,
            bottom: bottom as i64,
            right: right as i64,
        })
        .unwrap_or_default();

    let rendered = if diff_pixels > 0 {
        Some(encode_png(canvas)?)
    } else {
        None
    };

    Ok(DiffResult::new(
        mismatch_percentage,
        is_same_dimensions,
        diff_bounds,
        dimension_difference,
        rendered,
    ))
}

fn pixel_at(image: &RgbaImage, x: u32, y: u32) -> Option<&Rgba<u8>> {
    if x < image.width() && y < image.height() {
        Some(image.get_pixel(x, y))
    } else {
        None
    }
}

/// Check if two pixels differ by more than `tolerance` on any channel
fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>, tolerance: u8) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .any(|(x, y)| x.abs_diff(*y) > tolerance)
}

fn encode_png(image: RgbaImage) -> CompareResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image).write_to(&mut buf, ImageOutputFormat::Png)?;
    Ok(buf.into_inner())
}

fn read_image(path: &Path) -> CompareResult<Vec<u8>> {
    if !path.exists() {
        return Err(CompareError::MissingImage(path.to_path_buf()));
    }
    Ok(std::fs::read(path)?)
}

/// Hash file contents using SHA256
fn hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
