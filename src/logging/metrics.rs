//! Duration metrics for cascade attempts and pipeline stages

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Individual performance measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMeasurement {
    pub operation: String,
    pub duration_ms: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub correlation_id: Option<Uuid>,
    pub success: bool,
}

/// Statistical summary of the measurements of one operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub operation: String,
    pub count: usize,
    pub successes: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
}

/// Thread-safe metrics collector, one per run
#[derive(Debug, Default)]
pub struct MetricsCollector {
    measurements: Mutex<Vec<PerformanceMeasurement>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        operation: &str,
        duration: Duration,
        correlation_id: Option<Uuid>,
        success: bool,
    ) {
        let measurement = PerformanceMeasurement {
            operation: operation.to_string(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            timestamp: chrono::Utc::now(),
            correlation_id,
            success,
        };

        if let Ok(mut measurements) = self.measurements.lock() {
            measurements.push(measurement);
        }
    }

    pub fn get_measurements(&self, operation: &str) -> Vec<PerformanceMeasurement> {
        match self.measurements.lock() {
            Ok(measurements) => measurements
                .iter()
                .filter(|m| m.operation == operation)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Distinct operation names in first-seen order
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if let Ok(measurements) = self.measurements.lock() {
            for m in measurements.iter() {
                if !names.contains(&m.operation) {
                    names.push(m.operation.clone());
                }
            }
        }
        names
    }

    pub fn calculate_stats(&self, operation: &str) -> Option<PerformanceStats> {
        let measurements = self.get_measurements(operation);
        if measurements.is_empty() {
            return None;
        }

        let successes = measurements.iter().filter(|m| m.success).count();
        let mut durations: Vec<f64> = measurements.iter().map(|m| m.duration_ms).collect();
        durations.sort_by(|a, b| a.total_cmp(b));

        let count = durations.len();
        let mean = durations.iter().sum::<f64>() / count as f64;
        let variance = durations
            .iter()
            .map(|d| {
                let diff = d - mean;
                diff * diff
            })
            .sum::<f64>()
            / count as f64;

        let median = if count % 2 == 0 {
            (durations[count / 2 - 1] + durations[count / 2]) / 2.0
        } else {
            durations[count / 2]
        };
        let p95_index = ((count as f64) * 0.95) as usize;

        Some(PerformanceStats {
            operation: operation.to_string(),
            count,
            successes,
            mean_ms: mean,
            median_ms: median,
            std_dev_ms: variance.sqrt(),
            min_ms: durations[0],
            max_ms: durations[count - 1],
            p95_ms: durations[p95_index.min(count - 1)],
        })
    }

    /// Stats for every recorded operation
    pub fn summary(&self) -> Vec<PerformanceStats> {
        self.operations()
            .iter()
            .filter_map(|op| self.calculate_stats(op))
            .collect()
    }

    /// Emit one `info` line per operation
    pub fn log_summary(&self) {
        for stats in self.summary() {
            tracing::info!(
                operation = %stats.operation,
                count = stats.count,
                successes = stats.successes,
                mean_ms = format!("{:.2}", stats.mean_ms),
                p95_ms = format!("{:.2}", stats.p95_ms),
                "Timing summary"
            );
        }
    }

    pub fn clear(&self) {
        if let Ok(mut measurements) = self.measurements.lock() {
            measurements.clear();
        }
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn export_to_json(&self) -> Result<String, serde_json::Error> {
        match self.measurements.lock() {
            Ok(measurements) => serde_json::to_string_pretty(&*measurements),
            Err(_) => Ok("[]".to_string()),
        }
    }
}

/// Measures one operation and records it on `stop`
pub struct Timer {
    start: Instant,
    operation: String,
    correlation_id: Option<Uuid>,
    collector: Arc<MetricsCollector>,
}

impl Timer {
    pub fn start(operation: &str, correlation_id: Option<Uuid>, collector: Arc<MetricsCollector>) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
            correlation_id,
            collector,
        }
    }

    pub fn stop(self, success: bool) -> Duration {
        let duration = self.start.elapsed();
        self.collector
            .record(&self.operation, duration, self.correlation_id, success);

        tracing::debug!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            correlation_id = ?self.correlation_id,
            "Timer completed"
        );
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new();
        let correlation_id = Uuid::new_v4();

        collector.record("sift", Duration::from_millis(100), Some(correlation_id), false);
        collector.record("sift", Duration::from_millis(150), Some(correlation_id), false);
        collector.record("sift", Duration::from_millis(200), None, true);
        collector.record("mops", Duration::from_millis(40), None, true);

        assert_eq!(collector.operations(), ["sift", "mops"]);

        let stats = collector.calculate_stats("sift").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.successes, 1);
        assert!((stats.mean_ms - 150.0).abs() < 1.0);
        assert!((stats.median_ms - 150.0).abs() < 1.0);
        assert!((stats.p95_ms - 200.0).abs() < 1.0);

        assert_eq!(collector.summary().len(), 2);
        assert!(collector.calculate_stats("block-matching").is_none());
    }

    #[test]
    fn test_timer_records_measurement() {
        let collector = Arc::new(MetricsCollector::new());
        let timer = Timer::start("qc_stack", None, collector.clone());
        thread::sleep(Duration::from_millis(5));
        let duration = timer.stop(true);

        assert!(duration >= Duration::from_millis(5));
        assert_eq!(collector.measurement_count(), 1);
        assert!(collector.export_to_json().unwrap().contains("qc_stack"));

        collector.clear();
        assert_eq!(collector.measurement_count(), 0);
    }
}
