use std::{path::Path, sync::Arc, time::Instant};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    lr_scheduler::{linear::LinearLrSchedulerConfig, LrScheduler},
    module::{AutodiffModule, ModuleVisitor, ParamId},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
    LearningRate,
};

use crate::{Error, Result};

use super::{
    checkpoint, evaluate, Adapter, Batcher, EpochStats, Evaluation, Item, Model, ModelMode,
    Observer, Train,
};

/// Hyper-parameters for fine-tuning
#[derive(burn::config::Config)]
pub struct TrainingConfig {
    /// Maximum sequence length
    #[config(default = 128)]
    pub max_length: usize,

    /// Batch size
    #[config(default = 16)]
    pub batch_size: usize,

    /// Number of epochs
    #[config(default = 5)]
    pub num_epochs: usize,

    /// Initial learning rate, decayed linearly to zero
    #[config(default = 2e-5)]
    pub learning_rate: LearningRate,

    /// Adam epsilon
    #[config(default = 1e-8)]
    pub adam_epsilon: f32,

    /// Gradients of all parameters are rescaled together so their combined L2 norm never
    /// exceeds this ceiling
    #[config(default = 1.0)]
    pub max_grad_norm: f32,

    /// Dropout rate
    #[config(default = 0.1)]
    pub hidden_dropout_prob: f64,

    /// Fraction of the labelled data held out for validation
    #[config(default = 0.15)]
    pub validation_fraction: f64,

    /// Shuffle the split and every training epoch
    #[config(default = true)]
    pub shuffle: bool,

    /// Seed for splitting and shuffling
    #[config(default = 42)]
    pub seed: u64,

    /// Number of orientation classes
    #[config(default = 3)]
    pub num_classes: usize,

    /// Model name (e.g., "bert-base-uncased")
    #[config(default = "\"bert-base-uncased\".to_string()")]
    pub model_name: String,
}

/// Where the training loop is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started
    Idle,

    /// Updating parameters during the given 1-based epoch
    Training {
        /// The current epoch
        epoch: usize,
    },

    /// Scoring the validation split after the given epoch
    Evaluating {
        /// The epoch just completed
        epoch: usize,
    },

    /// All epochs have run and the checkpoint is written
    Checkpointed,

    /// Finished
    Done,
}

/// The outcome of a completed run
pub struct Trained<B: burn::tensor::backend::Backend, M> {
    /// The fine-tuned model, ready for inference
    pub adapter: Adapter<B, M>,

    /// Statistics for every epoch
    pub history: Vec<EpochStats>,

    /// Validation metrics of the final model
    pub evaluation: Evaluation,
}

/// Fine-tunes a classifier for a fixed number of epochs, then checkpoints it
pub struct Trainer {
    config: TrainingConfig,
    phase: Phase,
}

impl Trainer {
    /// Create an idle trainer
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
        }
    }

    /// The current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Train on `dataset_train`, evaluating on `dataset_valid` after every epoch, and save the
    /// final parameters to `checkpoint_path`.
    ///
    /// Every epoch runs; validation results are reported to `observer` but never stop training
    /// early. Schema problems are reported before any compute. A malformed batch or a failure
    /// to write the checkpoint aborts the run.
    pub fn fit<B, M, I, D, O>(
        &mut self,
        adapter: Adapter<B, M>,
        dataset_train: &D,
        dataset_valid: &D,
        checkpoint_path: &Path,
        observer: &mut O,
    ) -> Result<Trained<B::InnerBackend, M::InnerModule>>
    where
        B: AutodiffBackend,
        M: Model<B> + AutodiffModule<B>,
        M::InnerModule: Model<B::InnerBackend>,
        I: Item,
        D: Dataset<I>,
        O: Observer,
    {
        let config = self.config.clone();

        adapter.require(ModelMode::Training)?;
        self.check(adapter.model().n_classes(), dataset_train, dataset_valid)?;

        let steps_per_epoch = dataset_train.len().div_ceil(config.batch_size);

        // Tokenize once; the data loader then only stacks and shuffles
        let batcher = Batcher::<B>::new(adapter.device().clone());
        let mut builder = DataLoaderBuilder::new(batcher).batch_size(config.batch_size);
        if config.shuffle {
            builder = builder.shuffle(config.seed);
        }
        let dataloader_train: Arc<dyn DataLoader<Train<B>>> =
            builder.build(adapter.encode_dataset(dataset_train, config.max_length)?);

        // Step `k` of `n` runs at `learning_rate * (n - k) / n`, with no warm-up
        let mut lr_scheduler = LinearLrSchedulerConfig::new(
            config.learning_rate,
            0.0,
            steps_per_epoch * config.num_epochs,
        )
        .init();

        let mut optim = AdamWConfig::new()
            .with_epsilon(config.adam_epsilon)
            .init::<B, M>();

        let loss_fn = CrossEntropyLossConfig::new().init(adapter.device());

        info!(
            "Training on {} samples ({} steps per epoch) for {} epochs",
            dataset_train.len(),
            steps_per_epoch,
            config.num_epochs
        );

        let mut adapter = adapter;
        let mut history = Vec::with_capacity(config.num_epochs);
        let mut last = None;

        for epoch in 1..=config.num_epochs {
            self.transition(Phase::Training { epoch });
            let started = Instant::now();

            let mut loss_sum = 0.0;
            let mut batches = 0;
            let mut learning_rate = config.learning_rate;

            for Train { input, targets } in dataloader_train.iter() {
                // Every backward pass builds fresh gradients, so there is nothing to zero
                let logits = adapter.model().forward(input);
                let [rows, _] = logits.dims();
                let [n_targets] = targets.dims();
                if rows != n_targets {
                    return Err(Error::BatchShape {
                        inputs: rows,
                        labels: n_targets,
                    });
                }

                let loss = loss_fn.forward(logits, targets);
                loss_sum += loss.clone().into_scalar().elem::<f64>();
                batches += 1;

                let grads = GradientsParams::from_grads(loss.backward(), adapter.model());
                let grads = clip_grad_norm::<B, M>(adapter.model(), grads, config.max_grad_norm);

                learning_rate = LrScheduler::<B>::step(&mut lr_scheduler);
                adapter = adapter.map_model(|model| optim.step(learning_rate, model, grads));
            }

            self.transition(Phase::Evaluating { epoch });

            let valid = adapter.valid();
            let evaluation = evaluate(
                &valid,
                dataset_valid,
                config.batch_size,
                config.max_length,
            )?;

            let stats = EpochStats {
                epoch,
                num_epochs: config.num_epochs,
                train_loss: loss_sum / batches.max(1) as f64,
                valid_accuracy: evaluation.accuracy,
                learning_rate,
                elapsed: started.elapsed(),
            };

            observer.on_epoch(&stats);
            history.push(stats);
            last = Some((valid, evaluation));
        }

        let (valid, evaluation) = last.ok_or_else(|| {
            Error::InvalidConfig("training requires at least one epoch".to_string())
        })?;

        if let Err(e) = checkpoint::save::<B::InnerBackend, _>(valid.model(), checkpoint_path) {
            error!("Training finished but the model could not be saved: {}", e);
            return Err(e);
        }
        self.transition(Phase::Checkpointed);

        info!(
            "Validation accuracy {:.4}\n{}",
            evaluation.accuracy, evaluation.report
        );
        self.transition(Phase::Done);

        Ok(Trained {
            adapter: valid,
            history,
            evaluation,
        })
    }

    /// Reject configurations and data that would fail part-way through a run
    fn check<I: Item, D: Dataset<I>>(
        &self,
        n_classes: usize,
        dataset_train: &D,
        dataset_valid: &D,
    ) -> Result<()> {
        if self.config.batch_size == 0 || self.config.num_epochs == 0 {
            return Err(Error::InvalidConfig(
                "batch size and epoch count must both be at least 1".to_string(),
            ));
        }

        if !(self.config.learning_rate > 0.0 && self.config.learning_rate <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be in (0, 1], got {}",
                self.config.learning_rate
            )));
        }

        if !(self.config.max_grad_norm > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "max_grad_norm must be positive, got {}",
                self.config.max_grad_norm
            )));
        }

        if n_classes != self.config.num_classes {
            return Err(Error::InvalidConfig(format!(
                "model head has {} classes but {} were configured",
                n_classes, self.config.num_classes
            )));
        }

        if dataset_train.is_empty() {
            return Err(Error::DataFormat("the training split is empty".to_string()));
        }

        for (split, dataset) in [("training", dataset_train), ("validation", dataset_valid)] {
            for item in dataset.iter() {
                match item.class_id() {
                    Some(class_id) if class_id < n_classes => {}
                    Some(class_id) => {
                        return Err(Error::DataFormat(format!(
                            "{} split has label {} but the model only has {} classes",
                            split, class_id, n_classes
                        )))
                    }
                    None => {
                        return Err(Error::DataFormat(format!(
                            "{} split has an unlabelled item: {:?}",
                            split, item
                        )))
                    }
                }
            }
        }

        Ok(())
    }

    fn transition(&mut self, phase: Phase) {
        debug!("Training phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

/// Combined L2 norm of every parameter gradient in `model`
pub fn global_grad_norm<B, M>(model: &M, grads: &GradientsParams) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = GradNorm {
        grads,
        sum_squares: 0.0,
    };
    model.visit(&mut visitor);

    visitor.sum_squares.sqrt()
}

/// Rescale all gradients together when their combined norm exceeds `max_norm`
pub fn clip_grad_norm<B, M>(model: &M, mut grads: GradientsParams, max_norm: f32) -> GradientsParams
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let norm = global_grad_norm::<B, M>(model, &grads);
    let scale = max_norm as f64 / (norm + 1e-6);

    if scale < 1.0 {
        trace!("Clipping gradient norm {:.4} to {}", norm, max_norm);
        model.visit(&mut ScaleGrads {
            grads: &mut grads,
            scale,
        });
    }

    grads
}

struct GradNorm<'a> {
    grads: &'a GradientsParams,
    sum_squares: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradNorm<'_> {
    fn visit_float<const D: usize>(&mut self, id: &ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.sum_squares += (grad.clone() * grad).sum().into_scalar().elem::<f64>();
        }
    }
}

struct ScaleGrads<'a> {
    grads: &'a mut GradientsParams,
    scale: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for ScaleGrads<'_> {
    fn visit_float<const D: usize>(&mut self, id: &ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id.clone(), grad.mul_scalar(self.scale));
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::{
        backend::{Autodiff, NdArray},
        nn::{Linear, LinearConfig},
    };

    use super::*;

    type TestBackend = Autodiff<NdArray>;

    fn gradients(model: &Linear<TestBackend>) -> GradientsParams {
        let device = Default::default();
        let input = Tensor::<TestBackend, 2>::ones([2, 4], &device).mul_scalar(10.0);
        let output = model.forward(input);
        let loss = (output.clone() * output).sum();

        GradientsParams::from_grads(loss.backward(), model)
    }

    #[test]
    fn test_large_gradients_are_rescaled_to_the_ceiling() {
        let model: Linear<TestBackend> = LinearConfig::new(4, 3).init(&Default::default());
        let grads = gradients(&model);

        let before = global_grad_norm::<TestBackend, _>(&model, &grads);
        assert!(before > 1.0, "expected a large gradient, got {}", before);

        let clipped = clip_grad_norm::<TestBackend, _>(&model, grads, 0.5);
        let after = global_grad_norm::<TestBackend, _>(&model, &clipped);

        assert!((after - 0.5).abs() < 1e-4, "clipped norm is {}", after);
    }

    #[test]
    fn test_small_gradients_are_left_alone() {
        let model: Linear<TestBackend> = LinearConfig::new(4, 3).init(&Default::default());
        let grads = gradients(&model);

        let before = global_grad_norm::<TestBackend, _>(&model, &grads);
        let kept = clip_grad_norm::<TestBackend, _>(&model, grads, (before * 2.0) as f32);
        let after = global_grad_norm::<TestBackend, _>(&model, &kept);

        assert!((after - before).abs() < 1e-6 * before.max(1.0));
    }
}
