use crate::utils::{AffineModel, Point2, TransformClass};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

/// Fixed seed so repeated runs on the same input select the same landmarks.
const RANSAC_SEED: u64 = 0x5eed_1a7e;

/// Configuration for RANSAC model filtering of candidate correspondences
#[derive(Clone, Debug)]
pub struct RansacConfig {
    pub max_iterations: usize,
    /// Maximal alignment error in pixels for a candidate to count as inlier
    pub max_epsilon: f64,
    /// Minimal fraction of candidates that must agree with the model
    pub min_inlier_ratio: f64,
    /// Minimal absolute number of inliers
    pub min_inliers: usize,
    pub model: TransformClass,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            max_epsilon: 25.0,
            min_inlier_ratio: 0.05,
            min_inliers: 7,
            model: TransformClass::Affine,
        }
    }
}

/// Result of RANSAC filtering
#[derive(Clone, Debug)]
pub struct RansacResult {
    pub model: AffineModel,
    pub inliers: Vec<usize>,
    pub total_candidates: usize,
}

impl RansacResult {
    pub fn inlier_ratio(&self) -> f64 {
        if self.total_candidates == 0 {
            0.0
        } else {
            self.inliers.len() as f64 / self.total_candidates as f64
        }
    }
}

/// Find the largest consensus set among candidate correspondences.
///
/// Returns `None` when no model reaches both the minimal inlier count and the
/// minimal inlier ratio.
pub fn filter_ransac(
    from: &[Point2],
    to: &[Point2],
    config: &RansacConfig,
) -> Option<RansacResult> {
    let n = from.len();
    let sample_size = config.model.min_points();
    let min_inliers = config.min_inliers.max(sample_size);
    if n != to.len() || n < min_inliers {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(RANSAC_SEED);
    let mut best: Vec<usize> = Vec::new();

    for _ in 0..config.max_iterations {
        let picked = sample(&mut rng, n, sample_size).into_vec();
        let sample_from: Vec<Point2> = picked.iter().map(|&i| from[i]).collect();
        let sample_to: Vec<Point2> = picked.iter().map(|&i| to[i]).collect();

        let Some(model) = AffineModel::fit(config.model, &sample_from, &sample_to) else {
            continue;
        };

        let inliers = collect_inliers(&model, from, to, config.max_epsilon);
        if inliers.len() > best.len() {
            best = inliers;
            if best.len() == n {
                break;
            }
        }
    }

    if best.len() < sample_size {
        return None;
    }

    // Refit on the consensus set until it stops changing
    let mut inliers = best;
    let mut model = AffineModel::identity();
    for _ in 0..10 {
        let inlier_from: Vec<Point2> = inliers.iter().map(|&i| from[i]).collect();
        let inlier_to: Vec<Point2> = inliers.iter().map(|&i| to[i]).collect();
        model = AffineModel::fit(config.model, &inlier_from, &inlier_to)?;
        let refined = collect_inliers(&model, from, to, config.max_epsilon);
        if refined == inliers || refined.len() < sample_size {
            break;
        }
        inliers = refined;
    }

    let result = RansacResult {
        model,
        inliers,
        total_candidates: n,
    };

    if result.inliers.len() < min_inliers || result.inlier_ratio() < config.min_inlier_ratio {
        tracing::debug!(
            inliers = result.inliers.len(),
            candidates = n,
            ratio = result.inlier_ratio(),
            "RANSAC consensus rejected"
        );
        return None;
    }

    Some(result)
}

fn collect_inliers(model: &AffineModel, from: &[Point2], to: &[Point2], epsilon: f64) -> Vec<usize> {
    from.iter()
        .zip(to)
        .enumerate()
        .filter(|(_, (p, q))| model.residual(p, q) < epsilon)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with_outliers() -> (Vec<Point2>, Vec<Point2>) {
        let mut from = Vec::new();
        let mut to = Vec::new();
        for i in 0..5 {
            for j in 0..4 {
                let p = Point2::new(i as f64 * 20.0, j as f64 * 15.0);
                from.push(p);
                to.push(Point2::new(p.x + 5.0, p.y - 3.0));
            }
        }
        // Two gross outliers
        from.push(Point2::new(10.0, 10.0));
        to.push(Point2::new(200.0, -150.0));
        from.push(Point2::new(30.0, 40.0));
        to.push(Point2::new(-90.0, 300.0));
        (from, to)
    }

    #[test]
    fn test_ransac_rejects_outliers() {
        let (from, to) = grid_with_outliers();
        let config = RansacConfig {
            max_epsilon: 2.0,
            ..RansacConfig::default()
        };
        let result = filter_ransac(&from, &to, &config).unwrap();

        assert_eq!(result.inliers.len(), 20);
        assert!(!result.inliers.contains(&20));
        assert!(!result.inliers.contains(&21));
        let moved = result.model.apply(&Point2::new(0.0, 0.0));
        assert!((moved.x - 5.0).abs() < 1e-6);
        assert!((moved.y + 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_ransac_enforces_ratio() {
        let (from, to) = grid_with_outliers();
        let config = RansacConfig {
            max_epsilon: 2.0,
            min_inlier_ratio: 0.95,
            ..RansacConfig::default()
        };
        assert!(filter_ransac(&from, &to, &config).is_none());
    }

    #[test]
    fn test_too_few_candidates() {
        let from = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)];
        assert!(filter_ransac(&from, &from, &RansacConfig::default()).is_none());
    }
}
