use crate::utils::Point2;
use serde::{Deserialize, Serialize};

/// The three correspondence-extraction strategies, in cascade order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Scale-invariant gradient-histogram descriptors
    Sift,
    /// Denser detection with larger normalized patch descriptors
    Mops,
    /// Block correlation on a regular grid
    BlockMatching,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Sift => "sift",
            Strategy::Mops => "mops",
            Strategy::BlockMatching => "block-matching",
        }
    }
}

/// Parameters of the scale-space feature strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureParams {
    /// Scale steps per octave
    pub steps_per_octave: u32,
    pub initial_sigma: f32,
    pub min_octave_size: usize,
    /// Images whose larger side exceeds this are halved before detection
    pub max_octave_size: usize,
    /// Descriptor grid size (cells per side for gradient descriptors, samples per side for patches)
    pub fd_size: usize,
    /// Orientation bins per descriptor cell
    pub fd_bins: usize,
    /// Contrast threshold before division by the step count
    pub contrast_threshold: f32,
    /// Closest/next-closest descriptor distance ratio
    pub rod: f32,
    /// Maximal alignment error in pixels
    pub max_epsilon: f64,
    pub min_inlier_ratio: f64,
    pub min_num_inliers: usize,
    pub max_features: usize,
}

impl FeatureParams {
    /// Gradient-histogram extraction tuned for the first strategy
    pub fn sift() -> Self {
        Self {
            steps_per_octave: 3,
            initial_sigma: 1.6,
            min_octave_size: 64,
            max_octave_size: 1024,
            fd_size: 4,
            fd_bins: 8,
            contrast_threshold: 0.04,
            rod: 0.92,
            max_epsilon: 25.0,
            min_inlier_ratio: 0.05,
            min_num_inliers: 7,
            max_features: 1500,
        }
    }

    /// Denser detection and larger patch descriptors for the second strategy
    pub fn mops() -> Self {
        Self {
            fd_size: 16,
            fd_bins: 1,
            contrast_threshold: 0.02,
            min_inlier_ratio: 0.5,
            min_num_inliers: 3,
            max_features: 2500,
            ..Self::sift()
        }
    }
}

/// Parameters of grid block matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMatchingParams {
    /// Scale of the coarse search level
    pub layer_scale: f32,
    /// Half-size of the correlation block in full-resolution pixels
    pub block_radius: usize,
    /// Maximal displacement searched in full-resolution pixels
    pub search_radius: usize,
    /// Spacing of the reference grid in full-resolution pixels
    pub grid_spacing: usize,
    /// Blocks with lower standard deviation carry no texture and are skipped
    pub min_block_std: f32,
    /// Minimal normalized cross-correlation for a match
    pub min_correlation: f32,
    pub use_local_smoothness_filter: bool,
    /// Gaussian width of the neighbourhood weighting in pixels
    pub local_region_sigma: f64,
    /// Absolute local displacement limit in pixels
    pub max_local_epsilon: f64,
    /// Local displacement limit relative to the mean residual
    pub max_local_trust: f64,
}

impl Default for BlockMatchingParams {
    fn default() -> Self {
        Self {
            layer_scale: 0.5,
            block_radius: 24,
            search_radius: 32,
            grid_spacing: 32,
            min_block_std: 0.01,
            min_correlation: 0.5,
            use_local_smoothness_filter: true,
            local_region_sigma: 65.0,
            max_local_epsilon: 12.0,
            max_local_trust: 3.0,
        }
    }
}

/// Matched point sets returned by a provider; index `i` of both sets is one correspondence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Correspondences {
    pub reference: Vec<Point2>,
    pub target: Vec<Point2>,
}

impl Correspondences {
    pub fn new(reference: Vec<Point2>, target: Vec<Point2>) -> Self {
        Self { reference, target }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Both images carry a non-empty selection of equal length
    pub fn is_match(&self) -> bool {
        !self.reference.is_empty()
            && !self.target.is_empty()
            && self.reference.len() == self.target.len()
    }

    pub fn len(&self) -> usize {
        self.reference.len().min(self.target.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One strategy invocation inside the cascade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: Strategy,
    /// Steps per octave for the feature strategies
    pub steps: Option<u32>,
    pub reference_points: usize,
    pub target_points: usize,
    pub duration_ms: f64,
    pub error: Option<String>,
}

impl StrategyAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && self.reference_points > 0
            && self.reference_points == self.target_points
    }
}
