use chrono::{DateTime, Utc};
use pixelsarsa_learner::{EpisodeSummary, RunConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningReport {
    pub trained_at: DateTime<Utc>,
    pub config: RunConfig,
    pub total_frames: u64,
    pub num_groups: usize,
    pub num_mapped_features: usize,
    pub episodes: Vec<EpisodeSummary>,
    pub evaluation: EvaluationReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub evaluated_at: DateTime<Utc>,
    pub episodes: Vec<f64>,
    pub mean: f64,
}

impl EvaluationReport {
    /// Stamps `scores` with the current time. The mean of no episodes is 0.
    pub fn from_scores(scores: Vec<f64>) -> Self {
        #[expect(clippy::cast_precision_loss)]
        let mean = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        Self {
            evaluated_at: Utc::now(),
            episodes: scores,
            mean,
        }
    }
}
