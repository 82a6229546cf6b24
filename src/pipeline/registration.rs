use crate::config::{MatchingParams, RegistrationConfig};
use crate::data::{AffineLandmarkWarper, CatalogEntry, ChannelImage, ImageCatalog, ImageWarper, WarpOptions};
use crate::error::RegistrationError;
use crate::logging::{self, RunSpan, Timer};
use crate::pipeline::{CancellationToken, FeatureMatcher, MatchOutcome, RunGuard, RunSession, Stack};
use crate::utils::TransformClass;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

pub const ALIGNED_STACK_FILE: &str = "Aligned_Stack.tif";
pub const LANDMARKS_FILE: &str = "Landmarks.json";

/// What a successful run leaves behind
#[derive(Debug, Clone)]
pub struct RegistrationOutputs {
    pub aligned_stack_path: PathBuf,
    pub landmark_export_path: PathBuf,
    pub qc_stack_path: PathBuf,
    /// Labels of the aligned stack, in slice order
    pub slice_labels: Vec<String>,
    pub landmark_pairs: usize,
    pub run_id: Uuid,
}

/// Aligns every round of a multiplexed acquisition onto round 1's common-marker image.
///
/// Runs are synchronous; the pipeline rejects a second run while one is active.
/// Any failure aborts the run and leaves files already written in place.
pub struct RegistrationPipeline {
    matcher: FeatureMatcher,
    warper: Box<dyn ImageWarper>,
    running: AtomicBool,
}

impl RegistrationPipeline {
    pub fn new(matcher: FeatureMatcher, warper: Box<dyn ImageWarper>) -> Self {
        Self {
            matcher,
            warper,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_matching(params: MatchingParams) -> Self {
        Self::new(
            FeatureMatcher::with_params(params),
            Box::new(AffineLandmarkWarper::new()),
        )
    }

    pub fn with_defaults() -> Self {
        Self::with_matching(MatchingParams::default())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn run(&self, config: &RegistrationConfig) -> Result<RegistrationOutputs, RegistrationError> {
        self.run_with_cancel(config, CancellationToken::new())
    }

    /// Run with a token the caller can trip from another thread.
    pub fn run_with_cancel(
        &self,
        config: &RegistrationConfig,
        cancel: CancellationToken,
    ) -> Result<RegistrationOutputs, RegistrationError> {
        let _guard = RunGuard::acquire(&self.running)?;

        let mut session = RunSession::new(config.marker(), cancel);
        logging::set_correlation_id(session.run_id);
        let span = RunSpan::new(session.run_id, config.marker(), config.rounds());
        let _enter = span.enter();

        info!(
            input = %config.input_folder().display(),
            output = %config.results_folder().display(),
            marker = config.marker(),
            rounds = config.rounds(),
            fine_tune = config.fine_tune(),
            "Starting registration run"
        );

        let result = self.execute(config, &mut session, &span);
        match &result {
            Ok(outputs) => span.record_completion(true, outputs.slice_labels.len(), outputs.landmark_pairs),
            Err(e) => {
                tracing::error!(kind = e.kind(), error = %e, "Registration failed");
                span.record_completion(false, 0, session.store.pair_count());
            }
        }
        session.metrics.log_summary();
        logging::clear_correlation_id();
        result
    }

    fn execute(
        &self,
        config: &RegistrationConfig,
        session: &mut RunSession,
        span: &RunSpan,
    ) -> Result<RegistrationOutputs, RegistrationError> {
        let results = config.results_folder();
        if results.exists() {
            return Err(RegistrationError::OutputConflict { path: results });
        }
        std::fs::create_dir_all(&results).map_err(|e| RegistrationError::io(&results, e))?;
        session.store.reset();

        // Discovery and reference selection
        let timer = Timer::start("discovery", Some(session.run_id), session.metrics.clone());
        let catalog = ImageCatalog::scan(config.input_folder())?;
        if catalog.is_empty() {
            return Err(RegistrationError::Config(format!(
                "no image files found in {}",
                config.input_folder().display()
            )));
        }
        let markers = catalog.marker_files(config.marker());
        let Some(reference_entry) = markers.first() else {
            return Err(RegistrationError::Config(format!(
                "no file name contains the marker '{}'",
                config.marker()
            )));
        };
        let reference = ChannelImage::open(&reference_entry.path).map_err(|source| {
            RegistrationError::ReferenceOpen {
                path: reference_entry.path.clone(),
                source,
            }
        })?;
        let reference_size = reference.dimensions();
        info!(
            reference = %reference.title,
            width = reference_size.0,
            height = reference_size.1,
            marker_files = markers.len(),
            images = catalog.len(),
            "Reference image selected"
        );
        span.record_stage("discovery", timer.stop(true));

        // Marker images of later rounds, one landmark pair each
        let timer = Timer::start("qc_stack", Some(session.run_id), session.metrics.clone());
        let mut qc_stack = Stack::new(format!("{}_stack", config.marker()));
        qc_stack.push(reference.clone());
        for (pair_index, entry) in markers.iter().enumerate().skip(1) {
            session.cancel.check(&format!("matching pair {pair_index}"))?;
            let target = open_channel(entry)?;
            let outcome = self.matcher.match_pair(
                &reference,
                &target,
                pair_index,
                config.effective_min_inlier_ratio(),
                config.effective_initial_steps(),
                session,
            )?;
            match outcome {
                MatchOutcome::Matched { .. } => {
                    qc_stack.push(target);
                }
                MatchOutcome::NotFound { attempts } => {
                    return Err(RegistrationError::CorrespondenceNotFound {
                        pair_index,
                        reference: reference.title.clone(),
                        target: target.title,
                        attempts,
                    });
                }
            }
        }
        let qc_stack_path = results.join(format!("{}_stack.tif", config.marker()));
        qc_stack.write_tiff(&qc_stack_path)?;
        drop(qc_stack);
        span.record_stage("qc_stack", timer.stop(true));

        // Final stack, round by round
        let timer = Timer::start("aligned_stack", Some(session.run_id), session.metrics.clone());
        let mut stack = Stack::new("Aligned_Stack");
        let mut reference = Some(reference);
        let warp_options = WarpOptions {
            transform: TransformClass::Affine,
            interpolate: true,
            output_size: Some(reference_size),
        };

        for round in 1..=config.rounds() {
            session.cancel.check(&format!("round {round}"))?;
            let channels = catalog.round_channels(config.layer_keyword(), round, config.marker());
            debug!(round = round, channels = channels.len(), "Processing round");

            if round == 1 {
                if let Some(reference) = reference.take() {
                    stack.push(reference);
                }
                for entry in &channels {
                    stack.push(open_channel(entry)?);
                }
                continue;
            }

            let pair = session.store.get(round)?;
            for entry in &channels {
                let source = open_channel(entry)?;
                let warped = self
                    .warper
                    .warp(&source, &pair.reference, &pair.target, &warp_options)
                    .map_err(|e| RegistrationError::WarpApplication {
                        round,
                        file: source.title.clone(),
                        reason: format!("{e:#}"),
                    })?;
                if warped.width() == 0 || warped.height() == 0 {
                    return Err(RegistrationError::WarpApplication {
                        round,
                        file: source.title,
                        reason: "warper returned an empty image".to_string(),
                    });
                }
                stack.push(warped);
            }
        }

        let slice_labels = stack.labels();
        let aligned_stack_path = results.join(ALIGNED_STACK_FILE);
        stack.into_composite().write_tiff(&aligned_stack_path)?;
        span.record_stage("aligned_stack", timer.stop(true));

        let landmark_export_path = results.join(LANDMARKS_FILE);
        session.store.export_json(&landmark_export_path)?;

        Ok(RegistrationOutputs {
            aligned_stack_path,
            landmark_export_path,
            qc_stack_path,
            slice_labels,
            landmark_pairs: session.store.pair_count(),
            run_id: session.run_id,
        })
    }
}

fn open_channel(entry: &CatalogEntry) -> Result<ChannelImage, RegistrationError> {
    ChannelImage::open(&entry.path).map_err(|source| RegistrationError::ChannelOpen {
        path: entry.path.clone(),
        source,
    })
}
