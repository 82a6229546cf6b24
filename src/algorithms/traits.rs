use crate::algorithms::Correspondences;
use crate::utils::Plane;

/// Computes corresponding landmarks between a reference and a target plane.
///
/// An empty [`Correspondences`] is a legitimate "no match" answer. `Err` is reserved
/// for failures of the extractor itself; the cascade treats both as a failed attempt.
pub trait CorrespondenceProvider<P>: Send + Sync {
    /// Returns the name of the extractor
    fn name(&self) -> &str;

    fn extract(&self, reference: &Plane, target: &Plane, params: &P) -> anyhow::Result<Correspondences>;
}
