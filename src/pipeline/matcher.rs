use crate::algorithms::{
    BlockMatchingCorrespondences, BlockMatchingParams, CorrespondenceProvider, Correspondences,
    FeatureParams, MopsCorrespondences, SiftCorrespondences, Strategy, StrategyAttempt,
};
use crate::config::MatchingParams;
use crate::data::ChannelImage;
use crate::error::RegistrationError;
use crate::logging::StrategySpan;
use crate::pipeline::{LandmarkPair, RunSession};
use crate::utils::Plane;
use tracing::{debug, info, warn};

/// Result of one cascade run
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched {
        pair: LandmarkPair,
        /// Store slot of the reference point set
        slot: usize,
        strategy: Strategy,
        attempts: Vec<StrategyAttempt>,
    },
    NotFound {
        attempts: Vec<StrategyAttempt>,
    },
}

impl MatchOutcome {
    pub fn attempts(&self) -> &[StrategyAttempt] {
        match self {
            MatchOutcome::Matched { attempts, .. } | MatchOutcome::NotFound { attempts } => attempts,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Runs the correspondence fallback cascade for one image pair.
///
/// Strategy A is swept over steps per octave from the initial value in increments
/// until the sweep bound, then B and C are each tried once. The first strategy that
/// yields a non-empty pair of point sets wins.
pub struct FeatureMatcher {
    sift: Box<dyn CorrespondenceProvider<FeatureParams>>,
    mops: Box<dyn CorrespondenceProvider<FeatureParams>>,
    block: Box<dyn CorrespondenceProvider<BlockMatchingParams>>,
    params: MatchingParams,
}

impl FeatureMatcher {
    pub fn new(
        sift: Box<dyn CorrespondenceProvider<FeatureParams>>,
        mops: Box<dyn CorrespondenceProvider<FeatureParams>>,
        block: Box<dyn CorrespondenceProvider<BlockMatchingParams>>,
        params: MatchingParams,
    ) -> Self {
        Self {
            sift,
            mops,
            block,
            params,
        }
    }

    /// The pure-Rust providers
    pub fn with_params(params: MatchingParams) -> Self {
        Self::new(
            Box::new(SiftCorrespondences::new()),
            Box::new(MopsCorrespondences::new()),
            Box::new(BlockMatchingCorrespondences::new()),
            params,
        )
    }

    /// Strategy A backed by OpenCV
    #[cfg(feature = "opencv")]
    pub fn with_opencv_sift(params: MatchingParams) -> Self {
        Self::new(
            Box::new(crate::algorithms::OpenCvSiftCorrespondences::new()),
            Box::new(MopsCorrespondences::new()),
            Box::new(BlockMatchingCorrespondences::new()),
            params,
        )
    }

    pub fn params(&self) -> &MatchingParams {
        &self.params
    }

    /// Find correspondences between `reference` and `target` and, on success, append
    /// them to the session's landmark store under `pair_index`.
    ///
    /// Only cancellation is reported as an error; provider failures are failed attempts.
    pub fn match_pair(
        &self,
        reference: &ChannelImage,
        target: &ChannelImage,
        pair_index: usize,
        min_inlier_ratio: f64,
        initial_steps: u32,
        session: &mut RunSession,
    ) -> Result<MatchOutcome, RegistrationError> {
        let reference_plane = reference.plane();
        let target_plane = target.plane();
        let max_octave_size = reference
            .width()
            .max(reference.height())
            .max(target.width())
            .max(target.height()) as usize;

        let mut attempts = Vec::new();
        let stage = format!("matching pair {pair_index}");

        let mut steps = initial_steps;
        while steps <= self.params.max_steps {
            session.cancel.check(&stage)?;
            let params = FeatureParams {
                steps_per_octave: steps,
                max_octave_size,
                min_inlier_ratio,
                ..self.params.sift.clone()
            };
            let found = self.attempt(
                Strategy::Sift,
                self.sift.as_ref(),
                (&reference_plane, &target_plane),
                &params,
                Some(steps),
                pair_index,
                session,
                &mut attempts,
            );
            steps = steps.saturating_add(self.params.step_increment.max(1));
            if let Some(found) = found {
                return Ok(self.record(found, Strategy::Sift, pair_index, session, attempts));
            }
        }

        session.cancel.check(&stage)?;
        let params = FeatureParams {
            steps_per_octave: steps,
            max_octave_size,
            ..self.params.mops.clone()
        };
        if let Some(found) = self.attempt(
            Strategy::Mops,
            self.mops.as_ref(),
            (&reference_plane, &target_plane),
            &params,
            Some(steps),
            pair_index,
            session,
            &mut attempts,
        ) {
            return Ok(self.record(found, Strategy::Mops, pair_index, session, attempts));
        }

        session.cancel.check(&stage)?;
        if let Some(found) = self.attempt(
            Strategy::BlockMatching,
            self.block.as_ref(),
            (&reference_plane, &target_plane),
            &self.params.block,
            None,
            pair_index,
            session,
            &mut attempts,
        ) {
            return Ok(self.record(found, Strategy::BlockMatching, pair_index, session, attempts));
        }

        warn!(
            pair_index = pair_index,
            reference = %reference.title,
            target = %target.title,
            attempts = attempts.len(),
            "No correspondences found by any strategy"
        );
        Ok(MatchOutcome::NotFound { attempts })
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt<P>(
        &self,
        strategy: Strategy,
        provider: &dyn CorrespondenceProvider<P>,
        planes: (&Plane, &Plane),
        params: &P,
        steps: Option<u32>,
        pair_index: usize,
        session: &RunSession,
        attempts: &mut Vec<StrategyAttempt>,
    ) -> Option<Correspondences> {
        let span = StrategySpan::new(provider.name(), pair_index, steps);
        let _enter = span.enter();

        let result = provider.extract(planes.0, planes.1, params);
        let (found, duration, error) = match result {
            Ok(found) => {
                let duration =
                    span.record_result(found.reference.len(), found.target.len(), found.is_match());
                (found, duration, None)
            }
            Err(e) => {
                let duration = span.record_error(&e);
                (Correspondences::empty(), duration, Some(format!("{e:#}")))
            }
        };

        let attempt = StrategyAttempt {
            strategy,
            steps,
            reference_points: found.reference.len(),
            target_points: found.target.len(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            error,
        };
        let success = attempt.succeeded();
        session
            .metrics
            .record(strategy.name(), duration, Some(session.run_id), success);
        debug!(
            strategy = strategy.name(),
            steps = steps,
            points = found.len(),
            success = success,
            "Cascade attempt finished"
        );
        attempts.push(attempt);

        if success {
            Some(found)
        } else {
            None
        }
    }

    fn record(
        &self,
        found: Correspondences,
        strategy: Strategy,
        pair_index: usize,
        session: &mut RunSession,
        attempts: Vec<StrategyAttempt>,
    ) -> MatchOutcome {
        let pair = LandmarkPair {
            pair_index,
            reference: found.reference,
            target: found.target,
        };
        let slot = session.store.append(&session.marker, pair.clone());
        info!(
            pair_index = pair_index,
            strategy = strategy.name(),
            points = pair.reference.len(),
            attempts = attempts.len(),
            slot = slot,
            "Correspondences found"
        );
        MatchOutcome::Matched {
            pair,
            slot,
            strategy,
            attempts,
        }
    }
}
