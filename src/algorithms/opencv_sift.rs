use crate::algorithms::{CorrespondenceProvider, Correspondences, FeatureParams};
use crate::utils::{filter_ransac, plane_to_mat, Plane, Point2, RansacConfig, TransformClass};
use opencv::core::{no_array, DMatch, KeyPoint, Mat, Vector};
use opencv::features2d::{BFMatcher, SIFT};
use opencv::prelude::*;

/// SIFT correspondence extraction backed by OpenCV.
///
/// OpenCV objects are created per call; the provider itself holds no state.
#[derive(Debug, Default, Clone)]
pub struct OpenCvSiftCorrespondences;

impl OpenCvSiftCorrespondences {
    pub fn new() -> Self {
        Self
    }

    fn detect_and_compute(
        &self,
        image: &Mat,
        params: &FeatureParams,
    ) -> anyhow::Result<(Vector<KeyPoint>, Mat)> {
        let mut detector = SIFT::create(
            params.max_features as i32,
            params.steps_per_octave as i32,
            params.contrast_threshold as f64,
            10.0, // edge threshold
            params.initial_sigma as f64,
            false, // enable_precise_upscale
        )?;

        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        detector.detect_and_compute(image, &no_array(), &mut keypoints, &mut descriptors, false)?;
        Ok((keypoints, descriptors))
    }

    fn match_features(&self, desc1: &Mat, desc2: &Mat, rod: f32) -> anyhow::Result<Vec<DMatch>> {
        if desc1.rows() == 0 || desc2.rows() < 2 {
            return Ok(Vec::new());
        }

        let matcher = BFMatcher::create(opencv::core::NORM_L2, false)?;
        let mut knn = Vector::<Vector<DMatch>>::new();
        matcher.knn_train_match(desc1, desc2, &mut knn, 2, &no_array(), false)?;

        let mut good = Vec::new();
        for pair in knn.iter() {
            if pair.len() < 2 {
                continue;
            }
            let best = pair.get(0)?;
            let second = pair.get(1)?;
            if best.distance < rod * second.distance {
                good.push(best);
            }
        }
        Ok(good)
    }
}

impl CorrespondenceProvider<FeatureParams> for OpenCvSiftCorrespondences {
    fn name(&self) -> &str {
        "opencv-sift"
    }

    fn extract(
        &self,
        reference: &Plane,
        target: &Plane,
        params: &FeatureParams,
    ) -> anyhow::Result<Correspondences> {
        let reference_mat = plane_to_mat(reference)?;
        let target_mat = plane_to_mat(target)?;

        let (reference_kp, reference_desc) = self.detect_and_compute(&reference_mat, params)?;
        let (target_kp, target_desc) = self.detect_and_compute(&target_mat, params)?;
        if reference_kp.is_empty() || target_kp.is_empty() {
            return Ok(Correspondences::empty());
        }

        let matches = self.match_features(&reference_desc, &target_desc, params.rod)?;
        let mut from = Vec::with_capacity(matches.len());
        let mut to = Vec::with_capacity(matches.len());
        for m in &matches {
            let p = reference_kp.get(m.query_idx as usize)?.pt();
            let q = target_kp.get(m.train_idx as usize)?.pt();
            from.push(Point2::new(p.x as f64, p.y as f64));
            to.push(Point2::new(q.x as f64, q.y as f64));
        }

        tracing::debug!(
            reference_keypoints = reference_kp.len(),
            target_keypoints = target_kp.len(),
            matches = matches.len(),
            "OpenCV SIFT matching completed"
        );

        let config = RansacConfig {
            max_epsilon: params.max_epsilon,
            min_inlier_ratio: params.min_inlier_ratio,
            min_inliers: params.min_num_inliers,
            model: TransformClass::Affine,
            ..RansacConfig::default()
        };
        Ok(match filter_ransac(&from, &to, &config) {
            Some(result) => Correspondences::new(
                result.inliers.iter().map(|&i| from[i]).collect(),
                result.inliers.iter().map(|&i| to[i]).collect(),
            ),
            None => Correspondences::empty(),
        })
    }
}
