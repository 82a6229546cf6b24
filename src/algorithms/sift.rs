use crate::algorithms::features::feature_correspondences;
use crate::algorithms::scale_space::{gradient, Keypoint, ScaleSpace};
use crate::algorithms::{CorrespondenceProvider, Correspondences, FeatureParams};
use crate::utils::Plane;
use std::f32::consts::PI;

/// Width of one descriptor cell in units of keypoint sigma
const CELL_WIDTH: f32 = 3.0;
/// Upper bound of a normalized descriptor entry before renormalization
const DESCRIPTOR_CLIP: f32 = 0.2;

/// Gradient-histogram (SIFT style) correspondence extraction.
///
/// Each keypoint is described by `fd_size x fd_size` cells of `fd_bins` orientation
/// bins, measured relative to the keypoint's dominant orientation.
#[derive(Debug, Default, Clone)]
pub struct SiftCorrespondences;

impl SiftCorrespondences {
    pub fn new() -> Self {
        Self
    }
}

impl CorrespondenceProvider<FeatureParams> for SiftCorrespondences {
    fn name(&self) -> &str {
        "sift"
    }

    fn extract(
        &self,
        reference: &Plane,
        target: &Plane,
        params: &FeatureParams,
    ) -> anyhow::Result<Correspondences> {
        if params.fd_size == 0 || params.fd_bins == 0 {
            anyhow::bail!("descriptor size and bin count must be positive");
        }
        Ok(feature_correspondences(reference, target, params, describe_gradients))
    }
}

pub fn describe_gradients(
    space: &ScaleSpace,
    keypoint: &Keypoint,
    params: &FeatureParams,
) -> Option<Vec<f32>> {
    let gaussian = space.gaussian(keypoint);
    let cells = params.fd_size;
    let bins = params.fd_bins;
    let cell_width = CELL_WIDTH * keypoint.sigma;
    let half = cells as f32 / 2.0;
    let radius = (cell_width * half * std::f32::consts::SQRT_2).ceil() as isize;
    let (sin_o, cos_o) = keypoint.orientation.sin_cos();
    let cx = keypoint.octave_x.round() as isize;
    let cy = keypoint.octave_y.round() as isize;

    let mut descriptor = vec![0.0f32; cells * cells * bins];
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            // Rotate the sample offset into the keypoint frame, in cell units
            let rx = (cos_o * dx as f32 + sin_o * dy as f32) / cell_width;
            let ry = (-sin_o * dx as f32 + cos_o * dy as f32) / cell_width;
            let col = rx + half;
            let row = ry + half;
            if col < 0.0 || row < 0.0 || col >= cells as f32 || row >= cells as f32 {
                continue;
            }

            let (magnitude, angle) = gradient(gaussian, cx + dx, cy + dy);
            let weight = (-(rx * rx + ry * ry) / (2.0 * half * half)).exp();
            let relative = (angle - keypoint.orientation).rem_euclid(2.0 * PI);
            let bin = ((relative / (2.0 * PI)) * bins as f32) as usize % bins;
            let index = (row as usize * cells + col as usize) * bins + bin;
            descriptor[index] += weight * magnitude;
        }
    }

    normalize(&mut descriptor)?;
    for v in descriptor.iter_mut() {
        *v = v.min(DESCRIPTOR_CLIP);
    }
    normalize(&mut descriptor)?;
    Some(descriptor)
}

fn normalize(values: &mut [f32]) -> Option<()> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < 1e-12 {
        return None;
    }
    values.iter_mut().for_each(|v| *v /= norm);
    Some(())
}
