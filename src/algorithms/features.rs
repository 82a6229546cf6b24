use crate::algorithms::scale_space::{Keypoint, ScaleSpace};
use crate::algorithms::{Correspondences, FeatureParams};
use crate::utils::{filter_ransac, Plane, Point2, RansacConfig, TransformClass};
use std::collections::HashMap;

/// Keypoint with its descriptor vector
pub struct Feature {
    pub keypoint: Keypoint,
    pub descriptor: Vec<f32>,
}

/// Computes a descriptor for a keypoint, or `None` when the neighbourhood carries no signal
pub type DescriptorFn = fn(&ScaleSpace, &Keypoint, &FeatureParams) -> Option<Vec<f32>>;

pub fn extract_features(plane: &Plane, params: &FeatureParams, describe: DescriptorFn) -> Vec<Feature> {
    let space = ScaleSpace::build(plane, params);
    space
        .detect(params)
        .into_iter()
        .filter_map(|keypoint| {
            describe(&space, &keypoint, params).map(|descriptor| Feature {
                keypoint,
                descriptor,
            })
        })
        .collect()
}

/// Detect, describe, match and RANSAC-filter features of both planes.
pub fn feature_correspondences(
    reference: &Plane,
    target: &Plane,
    params: &FeatureParams,
    describe: DescriptorFn,
) -> Correspondences {
    let reference_features = extract_features(reference, params, describe);
    let target_features = extract_features(target, params, describe);
    tracing::debug!(
        reference_features = reference_features.len(),
        target_features = target_features.len(),
        steps = params.steps_per_octave,
        "Feature extraction completed"
    );

    let candidates = match_descriptors(&reference_features, &target_features, params.rod);
    let from: Vec<Point2> = candidates
        .iter()
        .map(|&(i, _)| keypoint_position(&reference_features[i].keypoint))
        .collect();
    let to: Vec<Point2> = candidates
        .iter()
        .map(|&(_, j)| keypoint_position(&target_features[j].keypoint))
        .collect();

    let config = RansacConfig {
        max_epsilon: params.max_epsilon,
        min_inlier_ratio: params.min_inlier_ratio,
        min_inliers: params.min_num_inliers,
        model: TransformClass::Affine,
        ..RansacConfig::default()
    };

    match filter_ransac(&from, &to, &config) {
        Some(result) => {
            tracing::debug!(
                candidates = candidates.len(),
                inliers = result.inliers.len(),
                "Feature correspondences accepted"
            );
            Correspondences::new(
                result.inliers.iter().map(|&i| from[i]).collect(),
                result.inliers.iter().map(|&i| to[i]).collect(),
            )
        }
        None => Correspondences::empty(),
    }
}

fn keypoint_position(keypoint: &Keypoint) -> Point2 {
    Point2::new(keypoint.x as f64, keypoint.y as f64)
}

/// Nearest-neighbour matching with a distance-ratio test.
///
/// Target features claimed by more than one reference feature are ambiguous and dropped.
pub fn match_descriptors(reference: &[Feature], target: &[Feature], rod: f32) -> Vec<(usize, usize)> {
    if target.len() < 2 {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for (i, feature) in reference.iter().enumerate() {
        let mut best = (usize::MAX, f32::MAX);
        let mut second = f32::MAX;
        for (j, other) in target.iter().enumerate() {
            let d = squared_distance(&feature.descriptor, &other.descriptor);
            if d < best.1 {
                second = best.1;
                best = (j, d);
            } else if d < second {
                second = d;
            }
        }
        if best.0 != usize::MAX && best.1.sqrt() < rod * second.sqrt() {
            candidates.push((i, best.0));
        }
    }

    let mut claims: HashMap<usize, usize> = HashMap::new();
    for &(_, j) in &candidates {
        *claims.entry(j).or_insert(0) += 1;
    }
    candidates.retain(|(_, j)| claims.get(j) == Some(&1));
    candidates
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
