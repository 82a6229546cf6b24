//! Spans for registration runs and cascade attempts

use std::time::{Duration, Instant};
use tracing::{field, span, Level, Span};
use uuid::Uuid;

/// Span covering one pipeline run
pub struct RunSpan {
    span: Span,
    start_time: Instant,
    run_id: Uuid,
}

impl RunSpan {
    pub fn new(run_id: Uuid, marker: &str, rounds: usize) -> Self {
        let span = span!(
            Level::INFO,
            "registration_run",
            correlation_id = %run_id,
            marker = marker,
            rounds = rounds,
            slices = field::Empty,
            landmark_pairs = field::Empty,
            success = field::Empty,
            execution_time_ms = field::Empty,
        );

        Self {
            span,
            start_time: Instant::now(),
            run_id,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Log the duration of a finished stage
    pub fn record_stage(&self, stage: &str, duration: Duration) {
        tracing::info!(
            parent: &self.span,
            stage = stage,
            duration_ms = duration.as_millis(),
            "Stage completed"
        );
    }

    pub fn record_completion(&self, success: bool, slices: usize, landmark_pairs: usize) {
        let duration = self.start_time.elapsed();
        self.span.record("success", success);
        self.span.record("slices", slices);
        self.span.record("landmark_pairs", landmark_pairs);
        self.span.record("execution_time_ms", duration.as_millis() as f64);

        if success {
            tracing::info!(
                parent: &self.span,
                slices = slices,
                landmark_pairs = landmark_pairs,
                execution_time_ms = duration.as_millis(),
                "Registration run completed"
            );
        } else {
            tracing::warn!(
                parent: &self.span,
                landmark_pairs = landmark_pairs,
                execution_time_ms = duration.as_millis(),
                "Registration run aborted"
            );
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span for a single strategy invocation inside the fallback cascade
pub struct StrategySpan {
    span: Span,
    start_time: Instant,
}

impl StrategySpan {
    pub fn new(strategy: &str, pair_index: usize, steps: Option<u32>) -> Self {
        let correlation_id = crate::logging::get_correlation_id();
        let span = span!(
            Level::DEBUG,
            "strategy_attempt",
            strategy = strategy,
            pair_index = pair_index,
            steps = steps,
            correlation_id = correlation_id.map(field::display),
            reference_points = field::Empty,
            target_points = field::Empty,
            success = field::Empty,
        );

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    /// Record the provider's result and return the elapsed time
    pub fn record_result(&self, reference_points: usize, target_points: usize, success: bool) -> Duration {
        let duration = self.start_time.elapsed();
        self.span.record("reference_points", reference_points);
        self.span.record("target_points", target_points);
        self.span.record("success", success);

        tracing::debug!(
            parent: &self.span,
            reference_points = reference_points,
            target_points = target_points,
            success = success,
            execution_time_ms = duration.as_millis(),
            "Strategy attempt completed"
        );
        duration
    }

    pub fn record_error(&self, error: &anyhow::Error) -> Duration {
        let duration = self.start_time.elapsed();
        self.span.record("success", false);
        tracing::warn!(
            parent: &self.span,
            error = %error,
            execution_time_ms = duration.as_millis(),
            "Strategy attempt failed with an error"
        );
        duration
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_run_span_logs_stages() {
        let span = RunSpan::new(Uuid::new_v4(), "Hu", 2);
        let _enter = span.enter();
        span.record_stage("qc_stack", Duration::from_millis(12));
        span.record_completion(true, 4, 1);

        assert!(logs_contain("Stage completed"));
        assert!(logs_contain("Registration run completed"));
    }

    #[traced_test]
    #[test]
    fn test_strategy_span_reports_failure() {
        let span = StrategySpan::new("sift", 1, Some(3));
        span.record_result(0, 0, false);
        span.record_error(&anyhow::anyhow!("descriptor size too small"));

        assert!(logs_contain("Strategy attempt failed with an error"));
        assert!(logs_contain("descriptor size too small"));
    }
}
