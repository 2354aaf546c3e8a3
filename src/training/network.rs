//! Convolutional image classifier
//!
//! A small sequential network: `Conv2D(valid) -> ReLU -> MaxPool` per entry
//! in `filters`, then `Flatten -> Dense(ReLU) -> Dropout -> Dense(softmax)`.
//! Trained with Adam on sparse categorical cross-entropy. Inputs are NHWC
//! tensors scaled to `[0, 1]`.

use ndarray::{s, Array, Array1, Array2, Array3, Array4, ArrayView3, Axis, Dimension, Zip};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::metrics::Evaluation;
use crate::error::{MlError, Result};
use crate::export::{Payload, PayloadKind};

pub const CUSTOM_ARCHITECTURE: &str = "custom";
/// Recognised backbone names that need weights this crate does not ship
pub const PRETRAINED_ARCHITECTURES: [&str; 3] = ["mobilenet", "vgg16", "resnet50"];

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-7;

/// Network shape and optimiser settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CnnParams {
    /// `[height, width, channels]`
    pub input_shape: [usize; 3],
    pub num_classes: usize,
    pub architecture: String,
    pub dropout_rate: f32,
    pub filters: Vec<usize>,
    pub kernel_size: [usize; 2],
    pub pool_size: [usize; 2],
    pub dense_units: usize,
    pub learning_rate: f32,
    pub random_state: Option<u64>,
}

impl Default for CnnParams {
    fn default() -> Self {
        Self {
            input_shape: [224, 224, 3],
            num_classes: 10,
            architecture: CUSTOM_ARCHITECTURE.to_string(),
            dropout_rate: 0.5,
            filters: vec![32, 64, 128],
            kernel_size: [3, 3],
            pool_size: [2, 2],
            dense_units: 128,
            learning_rate: 0.001,
            random_state: None,
        }
    }
}

impl CnnParams {
    /// Parse from a JSON object; unknown keys are rejected
    pub fn from_json(params: &Map<String, Value>) -> Result<Self> {
        let parsed: Self = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| MlError::ValidationError(format!("Invalid CNN parameters: {}", e)))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn with_input_shape(mut self, height: usize, width: usize, channels: usize) -> Self {
        self.input_shape = [height, width, channels];
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let arch = self.architecture.to_lowercase();
        if PRETRAINED_ARCHITECTURES.contains(&arch.as_str()) {
            return Err(MlError::ValidationError(format!(
                "Architecture '{}' requires pretrained weights, which are not available; use '{}'",
                self.architecture, CUSTOM_ARCHITECTURE
            )));
        }
        if arch != CUSTOM_ARCHITECTURE {
            return Err(MlError::ValidationError(format!(
                "Unknown architecture '{}'",
                self.architecture
            )));
        }
        if self.num_classes == 0 {
            return Err(MlError::ValidationError("num_classes must be at least 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(MlError::ValidationError("dropout_rate must be in [0, 1)".to_string()));
        }
        if self.filters.is_empty() || self.filters.contains(&0) {
            return Err(MlError::ValidationError("filters must be a non-empty list of positive counts".to_string()));
        }
        if self.dense_units == 0 || !(self.learning_rate > 0.0) {
            return Err(MlError::ValidationError(
                "dense_units and learning_rate must be positive".to_string(),
            ));
        }
        if self.kernel_size.contains(&0) || self.pool_size.contains(&0) || self.input_shape.contains(&0) {
            return Err(MlError::ValidationError(
                "input_shape, kernel_size and pool_size must be positive".to_string(),
            ));
        }
        self.stage_shapes().map(|_| ())
    }

    /// Output shape after every conv/pool stage
    fn stage_shapes(&self) -> Result<Vec<(usize, usize, usize)>> {
        let [mut h, mut w, _] = self.input_shape;
        let [kh, kw] = self.kernel_size;
        let [ph, pw] = self.pool_size;
        let mut shapes = Vec::with_capacity(self.filters.len());
        for &f in &self.filters {
            if h < kh || w < kw || (h - kh + 1) < ph || (w - kw + 1) < pw {
                return Err(MlError::ValidationError(format!(
                    "Input shape {:?} is too small for {} conv/pool stages",
                    self.input_shape,
                    self.filters.len()
                )));
            }
            h = (h - kh + 1) / ph;
            w = (w - kw + 1) / pw;
            shapes.push((h, w, f));
        }
        Ok(shapes)
    }
}

/// Settings for one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainParams {
    pub batch_size: usize,
    pub epochs: usize,
    /// Random horizontal flips
    pub data_augmentation: bool,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            batch_size: 32,
            epochs: 10,
            data_augmentation: true,
        }
    }
}

impl TrainParams {
    pub fn from_json(params: &Map<String, Value>) -> Result<Self> {
        let parsed: Self = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| MlError::ValidationError(format!("Invalid training parameters: {}", e)))?;
        if parsed.batch_size == 0 || parsed.epochs == 0 {
            return Err(MlError::ValidationError(
                "batch_size and epochs must be at least 1".to_string(),
            ));
        }
        Ok(parsed)
    }
}

/// Per-epoch curves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub accuracy: Vec<f64>,
    pub loss: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub val_accuracy: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub val_loss: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConvLayer {
    /// `(kh, kw, in_channels, filters)`
    weights: Array4<f32>,
    bias: Array1<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DenseLayer {
    /// `(inputs, outputs)`
    weights: Array2<f32>,
    bias: Array1<f32>,
}

struct StageCache {
    input: Array3<f32>,
    activated: Array3<f32>,
    /// Position in `activated` that won each pooling window
    argmax: Array3<(usize, usize)>,
}

struct ForwardPass {
    stages: Vec<StageCache>,
    flat: Array1<f32>,
    hidden: Array1<f32>,
    mask: Option<Array1<f32>>,
    proba: Array1<f32>,
}

#[derive(Clone)]
struct Gradients {
    conv: Vec<(Array4<f32>, Array1<f32>)>,
    hidden: (Array2<f32>, Array1<f32>),
    output: (Array2<f32>, Array1<f32>),
}

impl Gradients {
    fn zeros(net: &ImageClassifier) -> Self {
        Self {
            conv: net
                .conv
                .iter()
                .map(|l| (Array4::zeros(l.weights.raw_dim()), Array1::zeros(l.bias.len())))
                .collect(),
            hidden: (Array2::zeros(net.hidden.weights.raw_dim()), Array1::zeros(net.hidden.bias.len())),
            output: (Array2::zeros(net.output.weights.raw_dim()), Array1::zeros(net.output.bias.len())),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        for (a, b) in self.conv.iter_mut().zip(other.conv) {
            a.0 += &b.0;
            a.1 += &b.1;
        }
        self.hidden.0 += &other.hidden.0;
        self.hidden.1 += &other.hidden.1;
        self.output.0 += &other.output.0;
        self.output.1 += &other.output.1;
        self
    }

    fn scale(&mut self, factor: f32) {
        for (w, b) in &mut self.conv {
            *w *= factor;
            *b *= factor;
        }
        self.hidden.0 *= factor;
        self.hidden.1 *= factor;
        self.output.0 *= factor;
        self.output.1 *= factor;
    }
}

struct AdamState {
    m: Gradients,
    v: Gradients,
    step: i32,
}

/// Trainable convolutional classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageClassifier {
    params: CnnParams,
    conv: Vec<ConvLayer>,
    hidden: DenseLayer,
    output: DenseLayer,
    trained: bool,
}

impl ImageClassifier {
    /// Build a freshly initialised network
    pub fn new(params: CnnParams) -> Result<Self> {
        params.validate()?;
        let shapes = params.stage_shapes()?;
        let mut rng = match params.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let [kh, kw] = params.kernel_size;
        let mut in_channels = params.input_shape[2];
        let mut conv = Vec::with_capacity(params.filters.len());
        for &f in &params.filters {
            let limit = (6.0 / (kh * kw * in_channels) as f32).sqrt();
            conv.push(ConvLayer {
                weights: Array4::from_shape_fn((kh, kw, in_channels, f), |_| rng.gen_range(-limit..limit)),
                bias: Array1::zeros(f),
            });
            in_channels = f;
        }

        let (h, w, c) = shapes[shapes.len() - 1];
        let flat = h * w * c;
        let limit = (6.0 / flat as f32).sqrt();
        let hidden = DenseLayer {
            weights: Array2::from_shape_fn((flat, params.dense_units), |_| rng.gen_range(-limit..limit)),
            bias: Array1::zeros(params.dense_units),
        };
        let limit = (6.0 / (params.dense_units + params.num_classes) as f32).sqrt();
        let output = DenseLayer {
            weights: Array2::from_shape_fn((params.dense_units, params.num_classes), |_| {
                rng.gen_range(-limit..limit)
            }),
            bias: Array1::zeros(params.num_classes),
        };

        debug!(stages = conv.len(), flat_features = flat, "Initialised image classifier");
        Ok(Self {
            params,
            conv,
            hidden,
            output,
            trained: false,
        })
    }

    pub fn params(&self) -> &CnnParams {
        &self.params
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Fit on `x` (NHWC) with integer labels, optionally tracking a
    /// validation set each epoch.
    pub fn train(
        &mut self,
        x: &Array4<f32>,
        y: &Array1<usize>,
        validation: Option<(&Array4<f32>, &Array1<usize>)>,
        train: &TrainParams,
    ) -> Result<TrainingHistory> {
        self.check_input(x)?;
        self.check_labels(x, y)?;
        if let Some((vx, vy)) = validation {
            self.check_input(vx)?;
            self.check_labels(vx, vy)?;
        }
        if train.batch_size == 0 || train.epochs == 0 {
            return Err(MlError::ValidationError(
                "batch_size and epochs must be at least 1".to_string(),
            ));
        }

        let mut rng = match self.params.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut adam = AdamState {
            m: Gradients::zeros(self),
            v: Gradients::zeros(self),
            step: 0,
        };
        let mut history = TrainingHistory::default();
        let mut order: Vec<usize> = (0..x.len_of(Axis(0))).collect();

        for epoch in 0..train.epochs {
            order.shuffle(&mut rng);
            let (mut loss_sum, mut correct) = (0.0f64, 0usize);

            for batch in order.chunks(train.batch_size) {
                let seeds: Vec<(usize, u64, bool)> = batch
                    .iter()
                    .map(|&i| (i, rng.next_u64(), train.data_augmentation && rng.gen_bool(0.5)))
                    .collect();

                let (grads, batch_loss, batch_correct) = seeds
                    .par_iter()
                    .map(|&(i, seed, flip)| {
                        let image = x.index_axis(Axis(0), i);
                        let image = if flip { image.slice_move(s![.., ..;-1, ..]) } else { image };
                        let mut sample_rng = ChaCha8Rng::seed_from_u64(seed);
                        self.sample_gradients(image, y[i], &mut sample_rng)
                    })
                    .reduce(
                        || (Gradients::zeros(self), 0.0, 0),
                        |a, b| (a.0.merge(b.0), a.1 + b.1, a.2 + b.2),
                    );

                let mut grads = grads;
                grads.scale(1.0 / batch.len() as f32);
                self.apply_adam(&grads, &mut adam);
                loss_sum += batch_loss;
                correct += batch_correct;
            }

            let n = order.len().max(1) as f64;
            history.loss.push(loss_sum / n);
            history.accuracy.push(correct as f64 / n);
            if let Some((vx, vy)) = validation {
                let (val_loss, val_acc) = self.loss_and_accuracy(vx, vy)?;
                history.val_loss.push(val_loss);
                history.val_accuracy.push(val_acc);
            }
            info!(
                epoch = epoch + 1,
                loss = history.loss[epoch],
                accuracy = history.accuracy[epoch],
                "Epoch complete"
            );
        }

        self.trained = true;
        Ok(history)
    }

    /// Softmax outputs, one row per image
    pub fn predict_proba(&self, x: &Array4<f32>) -> Result<Array2<f32>> {
        self.check_input(x)?;
        let k = self.params.num_classes;
        let rows: Vec<f32> = (0..x.len_of(Axis(0)))
            .into_par_iter()
            .flat_map_iter(|i| self.forward(x.index_axis(Axis(0), i), None).proba.to_vec())
            .collect();
        Ok(Array2::from_shape_vec((x.len_of(Axis(0)), k), rows)?)
    }

    pub fn predict(&self, x: &Array4<f32>) -> Result<Array1<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba.rows().into_iter().map(|row| argmax_f32(row.iter())).collect())
    }

    /// Loss, accuracy and the classification report on held-out images
    pub fn evaluate(&self, x: &Array4<f32>, y: &Array1<usize>, labels: &[String]) -> Result<Evaluation> {
        self.check_labels(x, y)?;
        let proba = self.predict_proba(x)?;
        let loss = cross_entropy(&proba, y);
        let predicted: Array1<f64> = proba.rows().into_iter().map(|r| argmax_f32(r.iter()) as f64).collect();
        let truth = y.mapv(|v| v as f64);
        Ok(Evaluation::classification(&truth, &predicted, self.params.num_classes, labels).with_loss(loss))
    }

    fn loss_and_accuracy(&self, x: &Array4<f32>, y: &Array1<usize>) -> Result<(f64, f64)> {
        let proba = self.predict_proba(x)?;
        let correct = proba
            .rows()
            .into_iter()
            .zip(y.iter())
            .filter(|(row, &label)| argmax_f32(row.iter()) == label)
            .count();
        Ok((cross_entropy(&proba, y), correct as f64 / y.len().max(1) as f64))
    }

    fn check_input(&self, x: &Array4<f32>) -> Result<()> {
        let (_, h, w, c) = x.dim();
        if [h, w, c] != self.params.input_shape {
            return Err(MlError::ShapeError {
                expected: format!("{:?}", self.params.input_shape),
                actual: format!("{:?}", [h, w, c]),
            });
        }
        Ok(())
    }

    fn check_labels(&self, x: &Array4<f32>, y: &Array1<usize>) -> Result<()> {
        if x.len_of(Axis(0)) != y.len() {
            return Err(MlError::ShapeError {
                expected: format!("{} labels", x.len_of(Axis(0))),
                actual: format!("{} labels", y.len()),
            });
        }
        if let Some(bad) = y.iter().find(|&&label| label >= self.params.num_classes) {
            return Err(MlError::ValidationError(format!(
                "Label {} is out of range for {} classes",
                bad, self.params.num_classes
            )));
        }
        Ok(())
    }

    fn forward(&self, image: ArrayView3<f32>, dropout: Option<&mut ChaCha8Rng>) -> ForwardPass {
        let [ph, pw] = self.params.pool_size;
        let mut stages = Vec::with_capacity(self.conv.len());
        let mut current = image.to_owned();
        for layer in &self.conv {
            let activated = layer.forward(&current);
            let (pooled, argmax) = max_pool(&activated, ph, pw);
            stages.push(StageCache {
                input: current,
                activated,
                argmax,
            });
            current = pooled;
        }

        let flat = Array1::from_iter(current.iter().copied());
        let mut hidden = flat.dot(&self.hidden.weights) + &self.hidden.bias;
        hidden.mapv_inplace(|v| v.max(0.0));

        let mask = dropout.filter(|_| self.params.dropout_rate > 0.0).map(|rng| {
            let keep = 1.0 - self.params.dropout_rate;
            Array1::from_shape_fn(hidden.len(), |_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 })
        });
        if let Some(mask) = &mask {
            hidden *= mask;
        }

        let logits = hidden.dot(&self.output.weights) + &self.output.bias;
        ForwardPass {
            stages,
            flat,
            hidden,
            mask,
            proba: softmax(&logits),
        }
    }

    /// Gradients, loss and hit for a single training image
    fn sample_gradients(&self, image: ArrayView3<f32>, label: usize, rng: &mut ChaCha8Rng) -> (Gradients, f64, usize) {
        let pass = self.forward(image, Some(rng));
        let loss = -(pass.proba[label].max(1e-7) as f64).ln();
        let hit = usize::from(argmax_f32(pass.proba.iter()) == label);

        let mut grads = Gradients::zeros(self);
        let mut d_logits = pass.proba.clone();
        d_logits[label] -= 1.0;

        grads.output.0 = outer(&pass.hidden, &d_logits);
        grads.output.1 = d_logits.clone();

        let mut d_hidden = self.output.weights.dot(&d_logits);
        if let Some(mask) = &pass.mask {
            d_hidden *= mask;
        }
        Zip::from(&mut d_hidden)
            .and(&pass.hidden)
            .for_each(|d, &h| if h <= 0.0 { *d = 0.0 });

        grads.hidden.0 = outer(&pass.flat, &d_hidden);
        grads.hidden.1 = d_hidden.clone();

        let d_flat = self.hidden.weights.dot(&d_hidden);
        let last_shape = match pass.stages.last() {
            Some(stage) => {
                let (ah, aw, c) = stage.activated.dim();
                let [ph, pw] = self.params.pool_size;
                (ah / ph, aw / pw, c)
            }
            None => return (grads, loss, hit),
        };
        let mut d_current = Array3::from_shape_vec(last_shape, d_flat.to_vec()).unwrap_or_else(|_| Array3::zeros(last_shape));

        for (idx, (layer, stage)) in self.conv.iter().zip(&pass.stages).enumerate().rev() {
            let (gw, gb) = &mut grads.conv[idx];
            d_current = layer.backward(stage, &d_current, gw, gb, idx > 0);
        }
        (grads, loss, hit)
    }

    fn apply_adam(&mut self, grads: &Gradients, adam: &mut AdamState) {
        adam.step += 1;
        let lr = self.params.learning_rate * (1.0 - BETA2.powi(adam.step)).sqrt() / (1.0 - BETA1.powi(adam.step));

        for (i, layer) in self.conv.iter_mut().enumerate() {
            adam_update(&mut layer.weights, &grads.conv[i].0, &mut adam.m.conv[i].0, &mut adam.v.conv[i].0, lr);
            adam_update(&mut layer.bias, &grads.conv[i].1, &mut adam.m.conv[i].1, &mut adam.v.conv[i].1, lr);
        }
        adam_update(&mut self.hidden.weights, &grads.hidden.0, &mut adam.m.hidden.0, &mut adam.v.hidden.0, lr);
        adam_update(&mut self.hidden.bias, &grads.hidden.1, &mut adam.m.hidden.1, &mut adam.v.hidden.1, lr);
        adam_update(&mut self.output.weights, &grads.output.0, &mut adam.m.output.0, &mut adam.v.output.0, lr);
        adam_update(&mut self.output.bias, &grads.output.1, &mut adam.m.output.1, &mut adam.v.output.1, lr);
    }
}

impl ConvLayer {
    /// Valid convolution followed by ReLU
    fn forward(&self, input: &Array3<f32>) -> Array3<f32> {
        let (h, w, c) = input.dim();
        let (kh, kw, _, f) = self.weights.dim();
        let (oh, ow) = (h - kh + 1, w - kw + 1);
        let mut out = Array3::<f32>::zeros((oh, ow, f));
        for y in 0..oh {
            for x in 0..ow {
                let mut acc = self.bias.clone();
                for i in 0..kh {
                    for j in 0..kw {
                        for ch in 0..c {
                            let v = input[[y + i, x + j, ch]];
                            if v != 0.0 {
                                acc.scaled_add(v, &self.weights.slice(s![i, j, ch, ..]));
                            }
                        }
                    }
                }
                for k in 0..f {
                    out[[y, x, k]] = acc[k].max(0.0);
                }
            }
        }
        out
    }

    /// Accumulate weight gradients and return the gradient w.r.t. the input
    fn backward(
        &self,
        cache: &StageCache,
        grad_pooled: &Array3<f32>,
        grad_w: &mut Array4<f32>,
        grad_b: &mut Array1<f32>,
        need_input_grad: bool,
    ) -> Array3<f32> {
        let mut grad_act = Array3::<f32>::zeros(cache.activated.raw_dim());
        for ((py, px, k), &g) in grad_pooled.indexed_iter() {
            let (y, x) = cache.argmax[[py, px, k]];
            if cache.activated[[y, x, k]] > 0.0 {
                grad_act[[y, x, k]] += g;
            }
        }

        let (kh, kw, c, _) = self.weights.dim();
        let mut grad_in = Array3::<f32>::zeros(cache.input.raw_dim());
        for ((y, x, k), &g) in grad_act.indexed_iter() {
            if g == 0.0 {
                continue;
            }
            grad_b[k] += g;
            for i in 0..kh {
                for j in 0..kw {
                    for ch in 0..c {
                        grad_w[[i, j, ch, k]] += g * cache.input[[y + i, x + j, ch]];
                        if need_input_grad {
                            grad_in[[y + i, x + j, ch]] += g * self.weights[[i, j, ch, k]];
                        }
                    }
                }
            }
        }
        grad_in
    }
}

/// Non-overlapping max pooling; trailing rows/columns are dropped
fn max_pool(input: &Array3<f32>, ph: usize, pw: usize) -> (Array3<f32>, Array3<(usize, usize)>) {
    let (h, w, c) = input.dim();
    let (oh, ow) = (h / ph, w / pw);
    let mut pooled = Array3::<f32>::zeros((oh, ow, c));
    let mut argmax = Array3::from_elem((oh, ow, c), (0, 0));
    for py in 0..oh {
        for px in 0..ow {
            for k in 0..c {
                let mut best = (py * ph, px * pw);
                let mut best_v = f32::NEG_INFINITY;
                for y in py * ph..(py + 1) * ph {
                    for x in px * pw..(px + 1) * pw {
                        if input[[y, x, k]] > best_v {
                            best_v = input[[y, x, k]];
                            best = (y, x);
                        }
                    }
                }
                pooled[[py, px, k]] = best_v;
                argmax[[py, px, k]] = best;
            }
        }
    }
    (pooled, argmax)
}

fn adam_update<D: Dimension>(
    param: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    m: &mut Array<f32, D>,
    v: &mut Array<f32, D>,
    lr: f32,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = BETA1 * *m + (1.0 - BETA1) * g;
            *v = BETA2 * *v + (1.0 - BETA2) * g * g;
            *p -= lr * *m / (v.sqrt() + ADAM_EPS);
        });
}

fn outer(a: &Array1<f32>, b: &Array1<f32>) -> Array2<f32> {
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    col.dot(&row)
}

fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

fn cross_entropy(proba: &Array2<f32>, y: &Array1<usize>) -> f64 {
    let n = y.len().max(1) as f64;
    proba
        .rows()
        .into_iter()
        .zip(y.iter())
        .map(|(row, &label)| -(row[label].max(1e-7) as f64).ln())
        .sum::<f64>()
        / n
}

fn argmax_f32<'a>(values: impl Iterator<Item = &'a f32>) -> usize {
    values
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}

impl Payload for ImageClassifier {
    const KIND: PayloadKind = PayloadKind::Deep;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tiny_params() -> CnnParams {
        CnnParams {
            input_shape: [8, 8, 1],
            num_classes: 2,
            filters: vec![4],
            dense_units: 8,
            dropout_rate: 0.0,
            learning_rate: 0.01,
            random_state: Some(3),
            ..Default::default()
        }
    }

    /// Bright left half vs bright right half
    fn halves(n: usize) -> (Array4<f32>, Array1<usize>) {
        let x = Array4::from_shape_fn((n, 8, 8, 1), |(i, _, col, _)| {
            let left = i % 2 == 0;
            if (col < 4) == left { 1.0 } else { 0.0 }
        });
        let y = Array1::from_iter((0..n).map(|i| i % 2));
        (x, y)
    }

    #[test]
    fn test_pretrained_architectures_rejected() {
        let params = CnnParams {
            architecture: "vgg16".to_string(),
            ..tiny_params()
        };
        assert!(matches!(ImageClassifier::new(params), Err(MlError::ValidationError(_))));
        let params = CnnParams {
            architecture: "lenet".to_string(),
            ..tiny_params()
        };
        assert!(ImageClassifier::new(params).is_err());
    }

    #[test]
    fn test_too_many_stages_rejected() {
        let params = CnnParams {
            filters: vec![2, 2, 2],
            ..tiny_params()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_params_from_json() {
        let map = json!({"filters": [8, 16], "dropout_rate": 0.25}).as_object().cloned().unwrap();
        let params = CnnParams::from_json(&map).unwrap();
        assert_eq!(params.filters, vec![8, 16]);
        assert_eq!(params.input_shape, [224, 224, 3]);

        let bad = json!({"layers": 3}).as_object().cloned().unwrap();
        assert!(CnnParams::from_json(&bad).is_err());
        assert!(TrainParams::from_json(&json!({"epochs": 0}).as_object().cloned().unwrap()).is_err());
    }

    #[test]
    fn test_learns_simple_pattern() {
        let (x, y) = halves(16);
        let mut net = ImageClassifier::new(tiny_params()).unwrap();
        let history = net
            .train(
                &x,
                &y,
                Some((&x, &y)),
                &TrainParams {
                    batch_size: 4,
                    epochs: 20,
                    data_augmentation: false,
                },
            )
            .unwrap();

        assert_eq!(history.loss.len(), 20);
        assert_eq!(history.val_accuracy.len(), 20);
        assert!(history.loss[19] < history.loss[0]);

        let eval = net.evaluate(&x, &y, &["left".to_string(), "right".to_string()]).unwrap();
        assert_eq!(eval.accuracy, Some(1.0));
        assert!(eval.loss.is_some());
        assert!(net.is_trained());
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, _) = halves(3);
        let net = ImageClassifier::new(tiny_params()).unwrap();
        let proba = net.predict_proba(&x).unwrap();
        assert_eq!(proba.dim(), (3, 2));
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_shape_and_label_checks() {
        let net = ImageClassifier::new(tiny_params()).unwrap();
        let wrong = Array4::<f32>::zeros((1, 4, 4, 1));
        assert!(matches!(net.predict(&wrong), Err(MlError::ShapeError { .. })));

        let mut net = net;
        let (x, _) = halves(2);
        let labels = Array1::from_vec(vec![0, 5]);
        assert!(net.train(&x, &labels, None, &TrainParams::default()).is_err());
    }
}
