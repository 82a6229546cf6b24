use crate::algorithms::features::feature_correspondences;
use crate::algorithms::scale_space::{Keypoint, ScaleSpace};
use crate::algorithms::{CorrespondenceProvider, Correspondences, FeatureParams};
use crate::utils::{sample_bilinear, Plane};

/// Sample spacing of the patch in units of keypoint sigma
const SAMPLE_SPACING: f32 = 1.25;

/// Multi-scale oriented patch correspondence extraction.
///
/// Describes each keypoint by an `fd_size x fd_size` intensity patch sampled along the
/// keypoint orientation and normalized to zero mean and unit variance.
#[derive(Debug, Default, Clone)]
pub struct MopsCorrespondences;

impl MopsCorrespondences {
    pub fn new() -> Self {
        Self
    }
}

impl CorrespondenceProvider<FeatureParams> for MopsCorrespondences {
    fn name(&self) -> &str {
        "mops"
    }

    fn extract(
        &self,
        reference: &Plane,
        target: &Plane,
        params: &FeatureParams,
    ) -> anyhow::Result<Correspondences> {
        if params.fd_size < 2 {
            anyhow::bail!("patch descriptors need at least 2x2 samples");
        }
        Ok(feature_correspondences(reference, target, params, describe_patch))
    }
}

pub fn describe_patch(
    space: &ScaleSpace,
    keypoint: &Keypoint,
    params: &FeatureParams,
) -> Option<Vec<f32>> {
    let gaussian = space.gaussian(keypoint);
    let size = params.fd_size;
    let spacing = SAMPLE_SPACING * keypoint.sigma;
    let (sin_o, cos_o) = keypoint.orientation.sin_cos();
    let offset = (size as f32 - 1.0) / 2.0;

    let mut patch = Vec::with_capacity(size * size);
    for row in 0..size {
        for col in 0..size {
            let u = (col as f32 - offset) * spacing;
            let v = (row as f32 - offset) * spacing;
            let x = keypoint.octave_x + cos_o * u - sin_o * v;
            let y = keypoint.octave_y + sin_o * u + cos_o * v;
            patch.push(sample_bilinear(gaussian, x, y));
        }
    }

    let n = patch.len() as f32;
    let mean = patch.iter().sum::<f32>() / n;
    let variance = patch.iter().map(|p| (p - mean).powi(2)).sum::<f32>() / n;
    if variance < 1e-10 {
        return None;
    }
    let std_dev = variance.sqrt();
    // Scale to unit length so distances are comparable with the ratio test
    let scale = std_dev * n.sqrt();
    Some(patch.iter().map(|p| (p - mean) / scale).collect())
}
