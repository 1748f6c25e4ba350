use std::{collections::BTreeSet, fmt::Display, sync::Arc};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};

use crate::{utils::tensors::int_values, Error, Result};

use super::{Adapter, Batcher, Item, Model, ModelMode, Train};

/// Accuracy and per-class metrics over a labelled split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Fraction of correctly classified items, in [0, 1]; zero for an empty split
    pub accuracy: f64,

    /// Per-class precision, recall and F1
    pub report: ClassificationReport,
}

/// Metrics for a single class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// The class id
    pub class_id: usize,

    /// Correct predictions of this class over all predictions of it
    pub precision: f64,

    /// Correct predictions of this class over all items of it
    pub recall: f64,

    /// Harmonic mean of precision and recall
    pub f1: f64,

    /// Number of items labelled with this class
    pub support: usize,
}

/// Per-class metrics with macro and support-weighted averages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// One entry per class seen in either the labels or the predictions, by class id
    pub classes: Vec<ClassMetrics>,

    /// Overall accuracy
    pub accuracy: f64,

    /// Unweighted mean of the per-class metrics
    pub macro_avg: (f64, f64, f64),

    /// Support-weighted mean of the per-class metrics
    pub weighted_avg: (f64, f64, f64),

    /// Total number of items
    pub support: usize,
}

impl ClassificationReport {
    /// Compare predictions against the true class ids
    pub fn new(actual: &[usize], predicted: &[usize]) -> Self {
        let support = actual.len();
        let correct = actual
            .iter()
            .zip(predicted)
            .filter(|(a, p)| a == p)
            .count();
        let accuracy = ratio(correct, support);

        let class_ids: BTreeSet<usize> = actual.iter().chain(predicted).copied().collect();

        let classes: Vec<ClassMetrics> = class_ids
            .into_iter()
            .map(|class_id| {
                let pairs = actual.iter().zip(predicted);
                let true_positive = pairs
                    .clone()
                    .filter(|(a, p)| **a == class_id && **p == class_id)
                    .count();
                let predicted_positive = pairs.clone().filter(|(_, p)| **p == class_id).count();
                let class_support = actual.iter().filter(|a| **a == class_id).count();

                let precision = ratio(true_positive, predicted_positive);
                let recall = ratio(true_positive, class_support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };

                ClassMetrics {
                    class_id,
                    precision,
                    recall,
                    f1,
                    support: class_support,
                }
            })
            .collect();

        let n = classes.len().max(1) as f64;
        let macro_avg = classes.iter().fold((0.0, 0.0, 0.0), |acc, c| {
            (acc.0 + c.precision / n, acc.1 + c.recall / n, acc.2 + c.f1 / n)
        });

        let total = support.max(1) as f64;
        let weighted_avg = classes.iter().fold((0.0, 0.0, 0.0), |acc, c| {
            let w = c.support as f64 / total;
            (acc.0 + c.precision * w, acc.1 + c.recall * w, acc.2 + c.f1 * w)
        });

        Self {
            classes,
            accuracy,
            macro_avg,
            weighted_avg,
            support,
        }
    }
}

impl Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;

        for class in &self.classes {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                class.class_id, class.precision, class.recall, class.f1, class.support
            )?;
        }

        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.support
        )?;

        for (name, (precision, recall, f1)) in [
            ("macro avg", self.macro_avg),
            ("weighted avg", self.weighted_avg),
        ] {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, precision, recall, f1, self.support
            )?;
        }

        Ok(())
    }
}

/// Run the model over a labelled split and score its predictions.
///
/// Only forward passes are made, on a model that must be in inference mode, so repeated
/// calls with the same model and split give the same result.
pub fn evaluate<B, M, I, D>(
    adapter: &Adapter<B, M>,
    dataset: &D,
    batch_size: usize,
    max_length: usize,
) -> Result<Evaluation>
where
    B: Backend,
    M: Model<B>,
    I: Item,
    D: Dataset<I>,
{
    adapter.require(ModelMode::Inference)?;

    if batch_size == 0 {
        return Err(Error::InvalidConfig("batch size must be at least 1".to_string()));
    }

    let mut actual = Vec::with_capacity(dataset.len());
    let mut predicted = Vec::with_capacity(dataset.len());

    let batcher = Batcher::<B>::new(adapter.device().clone());
    let dataloader: Arc<dyn DataLoader<Train<B>>> = DataLoaderBuilder::new(batcher)
        .batch_size(batch_size)
        .build(adapter.encode_dataset(dataset, max_length)?);

    for Train { input, targets } in dataloader.iter() {
        predicted.extend(adapter.predict_input(input)?);
        actual.extend(int_values(targets));
    }

    let report = ClassificationReport::new(&actual, &predicted);

    Ok(Evaluation {
        accuracy: report.accuracy,
        report,
    })
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
