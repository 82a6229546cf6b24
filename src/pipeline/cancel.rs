use crate::error::RegistrationError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between the caller and a running pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` naming `stage` once the token is tripped.
    pub fn check(&self, stage: &str) -> Result<(), RegistrationError> {
        if self.is_cancelled() {
            tracing::warn!(stage = stage, "Cancellation requested");
            return Err(RegistrationError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}

/// Holds the pipeline's in-progress flag for the duration of one run.
#[derive(Debug)]
pub struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    /// Claim the flag, failing with `RunInProgress` if another run holds it.
    pub fn acquire(flag: &'a AtomicBool) -> Result<Self, RegistrationError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RegistrationError::RunInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
