use serde::{Deserialize, Serialize};

/// Per-epoch monitoring values for the affinity scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn record(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

/// Running sums of loss and hits over a sequence of mini-batches.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    loss_sum: f64,
    correct: usize,
    count: usize,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `probabilities` is the predicted distribution for one example.
    pub fn record(&mut self, probabilities: &[f32], target: usize) {
        self.loss_sum += cross_entropy(probabilities, target);
        if argmax(probabilities) == target {
            self.correct += 1;
        }
        self.count += 1;
    }

    pub fn mean_loss(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.loss_sum / self.count as f64
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.correct as f64 / self.count as f64
        }
    }
}

pub fn cross_entropy(probabilities: &[f32], target: usize) -> f64 {
    let p = probabilities.get(target).copied().unwrap_or(0.0) as f64;
    -(p.max(1e-7)).ln()
}

pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value {
                (i, v)
            } else {
                (best, best_value)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator() {
        let mut acc = MetricsAccumulator::new();
        acc.record(&[0.9, 0.1], 0);
        acc.record(&[0.6, 0.4], 1);
        assert!((acc.accuracy() - 0.5).abs() < 1e-9);
        let expected = (-(0.9f64).ln() - (0.4f64).ln()) / 2.0;
        assert!((acc.mean_loss() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_argmax_prefers_first_on_tie() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), 1);
        assert_eq!(argmax(&[]), 0);
    }
}
