use crate::data::ChannelImage;
use crate::utils::{AffineModel, Gray16Image, Point2, TransformClass};
use image::{ImageBuffer, Luma};

/// Options for a single warp call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarpOptions {
    pub transform: TransformClass,
    /// Bilinear when true, nearest neighbour otherwise
    pub interpolate: bool,
    /// Output canvas (width, height); the source size when `None`
    pub output_size: Option<(u32, u32)>,
}

impl Default for WarpOptions {
    fn default() -> Self {
        Self {
            transform: TransformClass::Affine,
            interpolate: true,
            output_size: None,
        }
    }
}

/// Maps a source image into the reference frame defined by a pair of landmark sets.
///
/// `reference_points[i]` and `target_points[i]` mark the same structure, in the reference
/// frame and in the source image respectively.
pub trait ImageWarper: Send + Sync {
    fn warp(
        &self,
        source: &ChannelImage,
        reference_points: &[Point2],
        target_points: &[Point2],
        options: &WarpOptions,
    ) -> anyhow::Result<ChannelImage>;
}

/// Least-squares landmark transform applied by inverse mapping.
#[derive(Debug, Default, Clone)]
pub struct AffineLandmarkWarper;

impl AffineLandmarkWarper {
    pub fn new() -> Self {
        Self
    }

    /// Resample `image` so that output pixel `p` takes the value at `model.apply(p)`.
    pub fn resample(
        image: &Gray16Image,
        model: &AffineModel,
        output_size: (u32, u32),
        interpolate: bool,
    ) -> Gray16Image {
        let (width, height) = output_size;
        ImageBuffer::from_fn(width, height, |x, y| {
            let q = model.apply(&Point2::new(x as f64, y as f64));
            let value = if interpolate {
                Self::bilinear_interpolate(image, q.x, q.y)
            } else {
                Self::nearest(image, q.x, q.y)
            };
            Luma([value])
        })
    }

    fn nearest(image: &Gray16Image, x: f64, y: f64) -> u16 {
        let (xi, yi) = (x.round(), y.round());
        if xi < 0.0 || yi < 0.0 || xi >= image.width() as f64 || yi >= image.height() as f64 {
            return 0;
        }
        image.get_pixel(xi as u32, yi as u32)[0]
    }

    fn bilinear_interpolate(image: &Gray16Image, x: f64, y: f64) -> u16 {
        let width = image.width();
        let height = image.height();

        // Points mapped outside the source are black
        if x < 0.0 || y < 0.0 || x > (width - 1) as f64 || y > (height - 1) as f64 {
            return 0;
        }

        let x1 = x.floor() as u32;
        let y1 = y.floor() as u32;
        let x2 = (x1 + 1).min(width - 1);
        let y2 = (y1 + 1).min(height - 1);
        let fx = x - x1 as f64;
        let fy = y - y1 as f64;

        let p11 = image.get_pixel(x1, y1)[0] as f64;
        let p12 = image.get_pixel(x1, y2)[0] as f64;
        let p21 = image.get_pixel(x2, y1)[0] as f64;
        let p22 = image.get_pixel(x2, y2)[0] as f64;

        let interpolated = p11 * (1.0 - fx) * (1.0 - fy)
            + p21 * fx * (1.0 - fy)
            + p12 * (1.0 - fx) * fy
            + p22 * fx * fy;

        interpolated.round().clamp(0.0, u16::MAX as f64) as u16
    }
}

impl ImageWarper for AffineLandmarkWarper {
    fn warp(
        &self,
        source: &ChannelImage,
        reference_points: &[Point2],
        target_points: &[Point2],
        options: &WarpOptions,
    ) -> anyhow::Result<ChannelImage> {
        if reference_points.len() != target_points.len() {
            anyhow::bail!(
                "landmark count mismatch: {} reference vs {} target",
                reference_points.len(),
                target_points.len()
            );
        }
        if source.width() == 0 || source.height() == 0 {
            anyhow::bail!("source image {} is empty", source.title);
        }
        let needed = options.transform.min_points();
        if reference_points.len() < needed {
            anyhow::bail!(
                "{:?} transform needs {} landmarks, got {}",
                options.transform,
                needed,
                reference_points.len()
            );
        }

        let model = AffineModel::fit(options.transform, reference_points, target_points)
            .ok_or_else(|| anyhow::anyhow!("landmarks are degenerate, no transform could be fitted"))?;

        let output_size = options.output_size.unwrap_or_else(|| source.dimensions());
        tracing::debug!(
            file = %source.title,
            landmarks = reference_points.len(),
            model = ?model.m,
            "Warping channel"
        );

        let pixels = Self::resample(&source.pixels, &model, output_size, options.interpolate);
        Ok(ChannelImage {
            path: source.path.clone(),
            title: source.title.clone(),
            pixels,
        })
    }
}
