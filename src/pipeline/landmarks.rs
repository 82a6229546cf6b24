use crate::error::RegistrationError;
use crate::utils::Point2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A labelled point set as stored and exported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    pub label: String,
    pub points: Vec<Point2>,
}

/// Corresponding point sets between the run reference and the marker image of one later round
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkPair {
    /// `k` for the k-th additional marker image; round `k + 1`
    pub pair_index: usize,
    pub reference: Vec<Point2>,
    pub target: Vec<Point2>,
}

impl LandmarkPair {
    pub fn reference_label(&self, marker: &str) -> String {
        format!("{}_{}_ref", marker, self.pair_index)
    }

    pub fn target_label(&self, marker: &str) -> String {
        format!("{}_{}_target", marker, self.pair_index)
    }
}

/// Append-only landmark records of one run.
///
/// The pair for round `r > 1` lives at slots `2(r-2)` and `2(r-2)+1`.
#[derive(Debug, Clone, Default)]
pub struct LandmarkStore {
    records: Vec<LandmarkRecord>,
}

impl LandmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Store both point sets and return the slot of the reference set.
    pub fn append(&mut self, marker: &str, pair: LandmarkPair) -> usize {
        let slot = self.records.len();
        let (reference_label, target_label) = (pair.reference_label(marker), pair.target_label(marker));
        self.records.push(LandmarkRecord {
            label: reference_label,
            points: pair.reference,
        });
        self.records.push(LandmarkRecord {
            label: target_label,
            points: pair.target,
        });
        slot
    }

    /// The pair that maps round `round` onto the reference frame.
    pub fn get(&self, round: usize) -> Result<LandmarkPair, RegistrationError> {
        let missing = || RegistrationError::LandmarkMissing {
            round,
            available: self.records.len(),
        };
        if round < 2 || self.records.len() < 2 * (round - 1) {
            return Err(missing());
        }

        let slot = 2 * (round - 2);
        let reference = &self.records[slot];
        let target = &self.records[slot + 1];
        if reference.points.is_empty() || target.points.is_empty() {
            return Err(missing());
        }

        Ok(LandmarkPair {
            pair_index: round - 1,
            reference: reference.points.clone(),
            target: target.points.clone(),
        })
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn pair_count(&self) -> usize {
        self.records.len() / 2
    }

    pub fn records(&self) -> &[LandmarkRecord] {
        &self.records
    }

    /// Write all records, in append order, as a JSON array.
    pub fn export_json(&self, path: &Path) -> Result<(), RegistrationError> {
        let content = serde_json::to_string_pretty(&self.records)
            .map_err(|e| RegistrationError::export(path, e))?;
        std::fs::write(path, content).map_err(|e| RegistrationError::io(path, e))?;
        tracing::info!(
            path = %path.display(),
            records = self.records.len(),
            "Landmarks exported"
        );
        Ok(())
    }
}
