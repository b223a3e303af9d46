//! Affinity scorer: a feed-forward classifier over `user ⊕ product`
//! indicator vectors predicting the bucketed preference-similarity label.
//!
//! Hidden stages use ReLU, the output layer a softmax over label classes,
//! trained with mini-batch cross-entropy. Activations are laid out
//! column-per-example (`features x batch`).

use crate::algorithms::encoder::{AttributeVector, EncodedAttributes, FeatureLayout};
use crate::algorithms::labeler::{label_matrix, LabelBuckets};
use crate::config::TrainingConfig;
use crate::error::{RecError, RecResult};
use crate::models::{LayerParameters, ProductId, ScorerArtifact, UserId, ARTIFACT_FORMAT_VERSION};
use crate::utils::metrics::{EpochMetrics, MetricsAccumulator, TrainingHistory};
use crate::utils::validation::validate_training_config;
use chrono::Utc;
use nalgebra::DMatrix;
use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Cross-join of users and products with their similarity labels.
#[derive(Debug, Clone)]
pub struct LabeledPairs {
    layout: Arc<FeatureLayout>,
    pairs: Vec<(UserId, ProductId)>,
    features: Array2<f32>,
    labels: Vec<u32>,
}

impl LabeledPairs {
    /// Row `u * products + p` holds `users[u] ⊕ products[p]` and its label.
    pub fn cross_join(
        user_ids: &[UserId],
        users: &EncodedAttributes,
        product_ids: &[ProductId],
        products: &EncodedAttributes,
    ) -> RecResult<Self> {
        if user_ids.len() != users.rows() || product_ids.len() != products.rows() {
            return Err(RecError::EncodingMismatch(format!(
                "identifier count does not match encoded rows ({} / {} users, {} / {} products)",
                user_ids.len(),
                users.rows(),
                product_ids.len(),
                products.rows()
            )));
        }

        let labels_matrix = label_matrix(users, products)?;
        let width = users.layout().width();
        let rows = users.rows() * products.rows();
        let mut features = Array2::<f32>::zeros((rows, 2 * width));
        let mut pairs = Vec::with_capacity(rows);
        let mut labels = Vec::with_capacity(rows);

        for (u, user_id) in user_ids.iter().enumerate() {
            let user_row = users.matrix().row(u).mapv(f32::from);
            for (p, product_id) in product_ids.iter().enumerate() {
                let row = u * product_ids.len() + p;
                features.slice_mut(s![row, ..width]).assign(&user_row);
                features
                    .slice_mut(s![row, width..])
                    .assign(&products.matrix().row(p).mapv(f32::from));
                pairs.push((user_id.clone(), product_id.clone()));
                labels.push(labels_matrix[[u, p]]);
            }
        }

        Ok(Self {
            layout: users.layout().clone(),
            pairs,
            features,
            labels,
        })
    }

    pub fn layout(&self) -> &Arc<FeatureLayout> {
        &self.layout
    }

    pub fn pairs(&self) -> &[(UserId, ProductId)] {
        &self.pairs
    }

    pub fn features(&self) -> &Array2<f32> {
        &self.features
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn batch(&self, indices: &[usize]) -> DMatrix<f32> {
        DMatrix::from_fn(self.features.ncols(), indices.len(), |r, c| {
            self.features[[indices[c], r]]
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    weights: DMatrix<f32>,
    bias: DMatrix<f32>,
}

impl DenseLayer {
    fn forward(&self, input: &DMatrix<f32>) -> DMatrix<f32> {
        let ones = DMatrix::from_element(1, input.ncols(), 1.0);
        &self.weights * input + &self.bias * ones
    }

    fn to_parameters(&self) -> LayerParameters {
        let (rows, cols) = self.weights.shape();
        let mut weights = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            weights.extend(self.weights.row(r).iter().copied());
        }
        LayerParameters {
            rows,
            cols,
            weights,
            bias: self.bias.iter().copied().collect(),
        }
    }

    fn from_parameters(params: &LayerParameters) -> RecResult<Self> {
        if params.weights.len() != params.rows * params.cols || params.bias.len() != params.rows {
            return Err(RecError::InvalidArtifact(format!(
                "layer {}x{} carries {} weights and {} biases",
                params.rows,
                params.cols,
                params.weights.len(),
                params.bias.len()
            )));
        }
        Ok(Self {
            weights: DMatrix::from_row_slice(params.rows, params.cols, &params.weights),
            bias: DMatrix::from_column_slice(params.rows, 1, &params.bias),
        })
    }
}

/// Stack of dense layers; ReLU between layers, softmax at the end.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    layers: Vec<DenseLayer>,
}

struct ForwardPass {
    /// Inputs to each layer, starting with the batch itself.
    inputs: Vec<DMatrix<f32>>,
    /// Pre-activations of each layer.
    outputs: Vec<DMatrix<f32>>,
    probabilities: DMatrix<f32>,
}

impl Network {
    fn new(input_width: usize, config: &TrainingConfig, rng: &mut StdRng) -> Self {
        let mut widths = vec![input_width];
        widths.extend(config.hidden_layers.iter().copied());
        widths.push(config.num_classes);

        let layers = widths
            .windows(2)
            .map(|w| DenseLayer {
                weights: config.initialization.initialize(rng, w[0], w[1]),
                bias: DMatrix::zeros(w[1], 1),
            })
            .collect();
        Self { layers }
    }

    pub fn input_width(&self) -> usize {
        self.layers.first().map(|l| l.weights.ncols()).unwrap_or(0)
    }

    pub fn output_width(&self) -> usize {
        self.layers.last().map(|l| l.weights.nrows()).unwrap_or(0)
    }

    fn forward(&self, batch: &DMatrix<f32>) -> ForwardPass {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut outputs = Vec::with_capacity(self.layers.len());
        let mut activation = batch.clone();
        let last = self.layers.len() - 1;

        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activation);
            inputs.push(activation);
            activation = if i == last {
                softmax_columns(&z)
            } else {
                z.map(|x| x.max(0.0))
            };
            outputs.push(z);
        }

        ForwardPass {
            inputs,
            outputs,
            probabilities: activation,
        }
    }

    pub fn predict_proba(&self, batch: &DMatrix<f32>) -> DMatrix<f32> {
        self.forward(batch).probabilities
    }

    /// One mini-batch step of softmax cross-entropy. Returns the forward
    /// probabilities computed before the update.
    fn train_step(
        &mut self,
        batch: &DMatrix<f32>,
        targets: &[usize],
        optimizer: &mut dyn crate::algorithms::optimizer::Optimizer,
    ) -> DMatrix<f32> {
        let pass = self.forward(batch);
        let batch_size = batch.ncols() as f32;

        let mut delta = pass.probabilities.clone();
        for (c, &target) in targets.iter().enumerate() {
            delta[(target, c)] -= 1.0;
        }
        delta /= batch_size;

        optimizer.begin_step();
        let ones = DMatrix::from_element(batch.ncols(), 1, 1.0);
        for i in (0..self.layers.len()).rev() {
            let grad_w = &delta * pass.inputs[i].transpose();
            let grad_b = &delta * &ones;

            if i > 0 {
                let upstream = self.layers[i].weights.transpose() * &delta;
                let relu_mask = pass.outputs[i - 1].map(|x| if x > 0.0 { 1.0 } else { 0.0 });
                delta = upstream.component_mul(&relu_mask);
            }

            let layer = &mut self.layers[i];
            optimizer.update(&format!("layer{}.weight", i), &mut layer.weights, &grad_w);
            optimizer.update(&format!("layer{}.bias", i), &mut layer.bias, &grad_b);
        }

        pass.probabilities
    }
}

fn softmax_columns(z: &DMatrix<f32>) -> DMatrix<f32> {
    let mut out = z.clone();
    for mut column in out.column_iter_mut() {
        let max = column.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        column.apply(|x| *x = (*x - max).exp());
        let sum: f32 = column.iter().sum();
        if sum > 0.0 {
            column /= sum;
        }
    }
    out
}

/// Prediction for one user/product pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AffinityScore {
    pub class: usize,
    /// Probability-weighted class index.
    pub expected_label: f32,
    pub probabilities: Vec<f32>,
}

impl AffinityScore {
    fn from_probabilities(probabilities: Vec<f32>) -> Self {
        let class = crate::utils::metrics::argmax(&probabilities);
        let expected_label = probabilities
            .iter()
            .enumerate()
            .map(|(k, p)| k as f32 * p)
            .sum();
        Self {
            class,
            expected_label,
            probabilities,
        }
    }
}

/// Trained network together with the layout its inputs must follow.
#[derive(Debug, Clone)]
pub struct AffinityScorer {
    layout: Arc<FeatureLayout>,
    buckets: LabelBuckets,
    network: Network,
    history: TrainingHistory,
}

impl AffinityScorer {
    pub fn layout(&self) -> &Arc<FeatureLayout> {
        &self.layout
    }

    pub fn buckets(&self) -> LabelBuckets {
        self.buckets
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn score(&self, user: &AttributeVector, product: &AttributeVector) -> RecResult<AffinityScore> {
        self.layout.ensure_compatible(user.layout())?;
        self.layout.ensure_compatible(product.layout())?;

        let mut input = user.as_f32();
        input.extend(product.as_f32());
        let batch = DMatrix::from_column_slice(input.len(), 1, &input);
        let probabilities = self.network.predict_proba(&batch);
        Ok(AffinityScore::from_probabilities(
            probabilities.column(0).iter().copied().collect(),
        ))
    }

    /// Scores one user against every encoded product in a single batch.
    pub fn score_products(
        &self,
        user: &AttributeVector,
        products: &EncodedAttributes,
    ) -> RecResult<Vec<AffinityScore>> {
        self.layout.ensure_compatible(user.layout())?;
        self.layout.ensure_compatible(products.layout())?;
        if products.rows() == 0 {
            return Ok(Vec::new());
        }

        let width = self.layout.width();
        let user_values = user.values();
        let matrix = products.matrix();
        let batch = DMatrix::from_fn(2 * width, products.rows(), |r, c| {
            if r < width {
                user_values[r] as f32
            } else {
                matrix[[c, r - width]] as f32
            }
        });

        let probabilities = self.network.predict_proba(&batch);
        Ok(probabilities
            .column_iter()
            .map(|column| AffinityScore::from_probabilities(column.iter().copied().collect()))
            .collect())
    }

    pub fn to_artifact(&self) -> ScorerArtifact {
        ScorerArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            layout: (*self.layout).clone(),
            buckets: self.buckets,
            layers: self.network.layers.iter().map(DenseLayer::to_parameters).collect(),
            history: self.history.clone(),
        }
    }

    pub fn from_artifact(artifact: &ScorerArtifact) -> RecResult<Self> {
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(RecError::InvalidArtifact(format!(
                "unsupported format version {}",
                artifact.format_version
            )));
        }
        let buckets = LabelBuckets::new(artifact.buckets.num_classes())
            .map_err(|e| RecError::InvalidArtifact(e.to_string()))?;

        let layers = artifact
            .layers
            .iter()
            .map(DenseLayer::from_parameters)
            .collect::<RecResult<Vec<_>>>()?;
        if layers.is_empty() {
            return Err(RecError::InvalidArtifact("artifact has no layers".to_string()));
        }

        let mut expected_in = 2 * artifact.layout.width();
        for (i, layer) in layers.iter().enumerate() {
            if layer.weights.ncols() != expected_in {
                return Err(RecError::InvalidArtifact(format!(
                    "layer {} expects {} inputs, layout provides {}",
                    i,
                    layer.weights.ncols(),
                    expected_in
                )));
            }
            expected_in = layer.weights.nrows();
        }
        if expected_in != buckets.num_classes() {
            return Err(RecError::InvalidArtifact(format!(
                "output width {} does not match {} label classes",
                expected_in,
                buckets.num_classes()
            )));
        }

        Ok(Self {
            layout: Arc::new(artifact.layout.clone()),
            buckets,
            network: Network { layers },
            history: artifact.history.clone(),
        })
    }
}

/// Trains the scorer on the cross-join. A held-out fraction is evaluated
/// after each epoch for monitoring only.
pub fn train(pairs: &LabeledPairs, config: &TrainingConfig) -> RecResult<AffinityScorer> {
    validate_training_config(config)?;
    let buckets = LabelBuckets::new(config.num_classes)?;
    buckets.ensure_diversity(pairs.labels())?;

    let targets: Vec<usize> = pairs.labels().iter().map(|&l| buckets.class_of(l)).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut indices: Vec<usize> = (0..pairs.len()).collect();
    indices.shuffle(&mut rng);
    let val_len = ((pairs.len() as f64 * config.validation_fraction).round() as usize)
        .clamp(1, pairs.len() - 1);
    let (val_indices, train_indices) = indices.split_at(val_len);
    let mut train_indices = train_indices.to_vec();

    info!(
        "Training affinity scorer on {} pairs ({} held out), classes {:?}",
        train_indices.len(),
        val_indices.len(),
        buckets.describe()
    );

    let mut network = Network::new(2 * pairs.layout().width(), config, &mut rng);
    let mut optimizer = config.optimizer.build(config.learning_rate);
    let mut history = TrainingHistory::default();

    for epoch in 1..=config.epochs {
        train_indices.shuffle(&mut rng);
        let mut train_metrics = MetricsAccumulator::new();

        for chunk in train_indices.chunks(config.batch_size) {
            let batch = pairs.batch(chunk);
            let batch_targets: Vec<usize> = chunk.iter().map(|&i| targets[i]).collect();
            let probabilities = network.train_step(&batch, &batch_targets, optimizer.as_mut());
            for (c, &target) in batch_targets.iter().enumerate() {
                let column: Vec<f32> = probabilities.column(c).iter().copied().collect();
                train_metrics.record(&column, target);
            }
        }

        let mut val_metrics = MetricsAccumulator::new();
        for chunk in val_indices.chunks(config.batch_size.max(256)) {
            let probabilities = network.predict_proba(&pairs.batch(chunk));
            for (c, &i) in chunk.iter().enumerate() {
                let column: Vec<f32> = probabilities.column(c).iter().copied().collect();
                val_metrics.record(&column, targets[i]);
            }
        }

        let metrics = EpochMetrics {
            epoch,
            train_loss: train_metrics.mean_loss(),
            train_accuracy: train_metrics.accuracy(),
            val_loss: val_metrics.mean_loss(),
            val_accuracy: val_metrics.accuracy(),
        };
        info!(
            "Epoch {}/{}: loss {:.4} acc {:.4} val_loss {:.4} val_acc {:.4}",
            epoch,
            config.epochs,
            metrics.train_loss,
            metrics.train_accuracy,
            metrics.val_loss,
            metrics.val_accuracy
        );
        history.record(metrics);
    }

    debug!(
        "Scorer network {} -> {:?} -> {}",
        network.input_width(),
        config.hidden_layers,
        network.output_width()
    );

    Ok(AffinityScorer {
        layout: pairs.layout().clone(),
        buckets,
        network,
        history,
    })
}
