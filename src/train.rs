//! Per-example SGD training loop with a decaying learning rate

use tracing::{debug, info, instrument, warn};

use crate::data::Dataset;
use crate::error::{Error, Result};
use crate::nn::{Loss, Sequential, Sgd};
use crate::tensor::Tensor;

/// Training hyperparameters
///
/// `Default` can be overridden through environment variables:
/// - `NEURAL_EPOCHS`: number of passes over the training set
/// - `NEURAL_LEARNING_RATE`: initial SGD learning rate
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    /// Multiplied into the learning rate after every epoch
    pub lr_decay: f32,
    /// Examples between progress logs; 0 disables them
    pub log_every: usize,
    /// Examples between mid-epoch test evaluations; 0 disables them
    pub eval_every: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self::base().with_env_overrides(|key| std::env::var(key).ok())
    }
}

impl TrainConfig {
    fn base() -> Self {
        Self {
            epochs: 10,
            learning_rate: 1e-4,
            lr_decay: 0.5,
            log_every: 1000,
            eval_every: 10_000,
            seed: 0,
        }
    }

    /// Apply `NEURAL_EPOCHS` / `NEURAL_LEARNING_RATE` from `lookup`;
    /// unparsable values are ignored
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(epochs) = lookup("NEURAL_EPOCHS").and_then(|s| s.parse().ok()) {
            self.epochs = epochs;
        }
        if let Some(lr) = lookup("NEURAL_LEARNING_RATE").and_then(|s| s.parse().ok()) {
            self.learning_rate = lr;
        }
        self
    }

    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn lr_decay(mut self, lr_decay: f32) -> Self {
        self.lr_decay = lr_decay;
        self
    }

    pub fn log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every;
        self
    }

    pub fn eval_every(mut self, eval_every: usize) -> Self {
        self.eval_every = eval_every;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Summary of one pass over the training set
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub mean_loss: f32,
    /// Percent of training rows whose argmax matched the target
    pub train_accuracy: f32,
    /// Learning rate used during this epoch
    pub learning_rate: f32,
    pub test_accuracy: Option<f32>,
}

/// Running loss and hit counts between two progress logs
///
/// Loss is averaged per example, accuracy per row.
#[derive(Debug, Default)]
struct Window {
    loss_sum: f32,
    examples: usize,
    hits: usize,
    rows: usize,
}

impl Window {
    fn record(&mut self, loss: f32, hits: usize, rows: usize) {
        self.loss_sum += loss;
        self.examples += 1;
        self.hits += hits;
        self.rows += rows;
    }

    fn mean_loss(&self) -> f32 {
        self.loss_sum / self.examples.max(1) as f32
    }

    fn accuracy(&self) -> f32 {
        percent(self.hits, self.rows)
    }
}

/// (matching rows, total rows) comparing per-row argmax of a
/// `[batch, classes]` prediction and target
fn row_hits(prediction: &Tensor, target: &Tensor) -> Result<(usize, usize)> {
    let predicted = prediction.argmax_rows()?;
    let expected = target.argmax_rows()?;
    if predicted.len() != expected.len() {
        return Err(Error::shape_mismatch(
            "row_hits",
            prediction.shape(),
            target.shape(),
        ));
    }
    let hits = predicted.iter().zip(&expected).filter(|(p, e)| p == e).count();
    Ok((hits, expected.len()))
}

fn percent(hits: usize, total: usize) -> f32 {
    hits as f32 / total.max(1) as f32 * 100.0
}

pub struct Trainer {
    config: TrainConfig,
    sgd: Sgd,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Self {
        let sgd = Sgd::new(config.learning_rate);
        Trainer { config, sgd }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Current learning rate, after any decay already applied
    pub fn learning_rate(&self) -> f32 {
        self.sgd.learning_rate
    }

    /// Train `model` one example at a time
    ///
    /// Every example runs forward, loss, backward and an SGD step. When a
    /// test set is given it is evaluated every `eval_every` examples and at
    /// the end of each epoch.
    #[instrument(skip_all, fields(examples = train.len(), epochs = self.config.epochs, loss = loss.name()))]
    pub fn fit(
        &mut self,
        model: &mut Sequential,
        loss: &dyn Loss,
        train: &dyn Dataset,
        test: Option<&dyn Dataset>,
    ) -> Result<Vec<EpochStats>> {
        model.check_loss(loss)?;
        if train.is_empty() {
            return Err(Error::Dataset("training set is empty".to_string()));
        }

        let mut history = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            info!(epoch, lr = self.sgd.learning_rate, "starting epoch");
            let mut epoch_window = Window::default();
            let mut log_window = Window::default();

            for index in 0..train.len() {
                let (input, target) = train.get(index)?;
                let activations = model.forward(&input)?;
                let prediction = &activations.output;

                let loss_value = loss.forward(prediction, &target)?;
                if !loss_value.is_finite() {
                    warn!(epoch, index, loss = loss_value, "non-finite loss");
                }
                let (hits, rows) = row_hits(prediction, &target)?;
                epoch_window.record(loss_value, hits, rows);
                log_window.record(loss_value, hits, rows);

                let grad = loss.backward(prediction, &target)?;
                model.backward(&activations, &grad)?;
                self.sgd.step(&mut model.parameters_mut())?;

                let step = index + 1;
                if self.config.log_every > 0 && step % self.config.log_every == 0 {
                    info!(
                        epoch,
                        step,
                        avg_loss = log_window.mean_loss(),
                        lr = self.sgd.learning_rate,
                        train_accuracy = log_window.accuracy(),
                        "progress"
                    );
                    log_window = Window::default();
                }
                if let Some(test) = test {
                    if self.config.eval_every > 0 && step % self.config.eval_every == 0 {
                        evaluate(model, test)?;
                    }
                }
            }

            let test_accuracy = test.map(|t| evaluate(model, t)).transpose()?;
            let stats = EpochStats {
                epoch,
                mean_loss: epoch_window.mean_loss(),
                train_accuracy: epoch_window.accuracy(),
                learning_rate: self.sgd.learning_rate,
                test_accuracy,
            };
            info!(
                epoch,
                mean_loss = stats.mean_loss,
                train_accuracy = stats.train_accuracy,
                test_accuracy = ?stats.test_accuracy,
                "epoch done"
            );
            history.push(stats);
            self.sgd.learning_rate *= self.config.lr_decay;
        }
        Ok(history)
    }
}

/// Percent of rows, over every example, whose predicted argmax equals the
/// target argmax
#[instrument(skip_all, fields(examples = dataset.len()))]
pub fn evaluate(model: &Sequential, dataset: &dyn Dataset) -> Result<f32> {
    if dataset.is_empty() {
        return Err(Error::Dataset("cannot evaluate on an empty dataset".to_string()));
    }
    let (mut hits, mut total) = (0, 0);
    for index in 0..dataset.len() {
        let (input, target) = dataset.get(index)?;
        let prediction = model.predict(&input)?;
        let (batch_hits, rows) = row_hits(&prediction, &target)?;
        hits += batch_hits;
        total += rows;
        if index % 1000 == 0 {
            debug!(index, "evaluating");
        }
    }
    let accuracy = percent(hits, total);
    info!(hits, total, accuracy, "evaluation");
    Ok(accuracy)
}
