use core::fmt;

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::TopologyError;
use crate::regression::RegressionConfig;

/// Height and width of an MNIST image.
pub const IMAGE_SIZE: usize = 28;
/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;

/// Configuration of the [MNIST convolutional network](mnist_convnet).
#[derive(Config, Debug)]
pub struct ConvNetConfig {
    /// Learning rate bound to the regression layer. Default: 0.001
    #[config(default = 0.001)]
    pub learning_rate: f64,
    /// Keep probability shared by both dropout layers. Default: 0.8
    #[config(default = 0.8)]
    pub keep_prob: f64,
}

/// Activation applied at the output of a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Tanh,
    Softmax,
}

/// Weight regularization applied to a layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Regularizer {
    /// Adds `weight_decay * sum(w²) / 2` to the loss.
    L2 { weight_decay: f64 },
}

impl Regularizer {
    /// L2 regularization with the default weight decay of `0.001`.
    pub fn l2() -> Self {
        Self::L2 {
            weight_decay: 0.001,
        }
    }
}

/// Optimizer used by the regression layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam {
        beta_1: f64,
        beta_2: f64,
        epsilon: f64,
    },
}

impl OptimizerKind {
    /// Adam with `beta_1 = 0.9`, `beta_2 = 0.999` and `epsilon = 1e-8`.
    pub fn adam() -> Self {
        Self::Adam {
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Loss minimized by the regression layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    CategoricalCrossEntropy,
}

/// A single layer of a [topology](Topology) with its hyperparameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum LayerSpec {
    /// Input placeholder, `None` marks the batch dimension.
    ///
    /// The shape follows the `[batch, height, width, channels]` layout.
    Input {
        name: String,
        shape: [Option<usize>; 4],
    },
    /// 2D convolution with stride 1 and `same` padding, the kernel size must be odd.
    Conv2d {
        name: String,
        filters: usize,
        kernel_size: usize,
        activation: Activation,
        regularizer: Option<Regularizer>,
    },
    /// 2D max pooling with a stride equal to the window.
    ///
    /// Pooling is unpadded: a side of `n` becomes `n / kernel_size` rounded down, and the
    /// trailing rows and columns that do not fill a window are dropped. `same` padded pooling
    /// would round up instead, which gives the same shapes whenever the side is a multiple of
    /// the window, as with `28 -> 14 -> 7`.
    MaxPool2d { name: String, kernel_size: usize },
    /// Local response normalization across channels.
    LocalResponseNorm {
        name: String,
        depth_radius: usize,
        bias: f64,
        alpha: f64,
        beta: f64,
    },
    FullyConnected {
        name: String,
        units: usize,
        activation: Activation,
    },
    Dropout { name: String, keep_prob: f64 },
    /// Binds an optimizer, a learning rate and a loss to the network output.
    Regression {
        name: String,
        optimizer: OptimizerKind,
        learning_rate: f64,
        loss: LossKind,
    },
}

impl LayerSpec {
    pub fn input(shape: [Option<usize>; 4]) -> Self {
        Self::Input {
            name: "input".to_string(),
            shape,
        }
    }

    pub fn conv_2d(
        filters: usize,
        kernel_size: usize,
        activation: Activation,
        regularizer: Option<Regularizer>,
    ) -> Self {
        Self::Conv2d {
            name: "conv2D".to_string(),
            filters,
            kernel_size,
            activation,
            regularizer,
        }
    }

    pub fn max_pool_2d(kernel_size: usize) -> Self {
        Self::MaxPool2d {
            name: "max_pool_2d".to_string(),
            kernel_size,
        }
    }

    /// Local response normalization with the default radius 5, bias 1, alpha 1e-4 and beta 0.75.
    pub fn local_response_norm() -> Self {
        Self::LocalResponseNorm {
            name: "LocalResponseNormalization".to_string(),
            depth_radius: 5,
            bias: 1.0,
            alpha: 1e-4,
            beta: 0.75,
        }
    }

    pub fn fully_connected(units: usize, activation: Activation) -> Self {
        let name = match activation {
            Activation::Softmax => "softmax",
            _ => "fully_connected",
        };

        Self::FullyConnected {
            name: name.to_string(),
            units,
            activation,
        }
    }

    pub fn dropout(keep_prob: f64) -> Self {
        Self::Dropout {
            name: "dropout".to_string(),
            keep_prob,
        }
    }

    pub fn regression(optimizer: OptimizerKind, learning_rate: f64, loss: LossKind) -> Self {
        Self::Regression {
            name: "target".to_string(),
            optimizer,
            learning_rate,
            loss,
        }
    }

    /// Renames the layer.
    pub fn with_name(mut self, new_name: impl Into<String>) -> Self {
        match &mut self {
            Self::Input { name, .. }
            | Self::Conv2d { name, .. }
            | Self::MaxPool2d { name, .. }
            | Self::LocalResponseNorm { name, .. }
            | Self::FullyConnected { name, .. }
            | Self::Dropout { name, .. }
            | Self::Regression { name, .. } => *name = new_name.into(),
        }
        self
    }

    /// The name given to the layer.
    pub fn name(&self) -> &str {
        match self {
            Self::Input { name, .. }
            | Self::Conv2d { name, .. }
            | Self::MaxPool2d { name, .. }
            | Self::LocalResponseNorm { name, .. }
            | Self::FullyConnected { name, .. }
            | Self::Dropout { name, .. }
            | Self::Regression { name, .. } => name,
        }
    }

    /// The kind of layer, independent of its hyperparameters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Conv2d { .. } => "conv_2d",
            Self::MaxPool2d { .. } => "max_pool_2d",
            Self::LocalResponseNorm { .. } => "local_response_norm",
            Self::FullyConnected { .. } => "fully_connected",
            Self::Dropout { .. } => "dropout",
            Self::Regression { .. } => "regression",
        }
    }
}

impl fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<20} {:<20}", self.kind(), self.name())?;

        match self {
            Self::Input { shape, .. } => {
                let dims: Vec<String> = shape
                    .iter()
                    .map(|dim| dim.map_or("?".to_string(), |dim| dim.to_string()))
                    .collect();
                write!(f, "shape=[{}]", dims.join(", "))
            }
            Self::Conv2d {
                filters,
                kernel_size,
                activation,
                regularizer,
                ..
            } => {
                write!(
                    f,
                    "filters={filters} kernel={kernel_size} activation={activation:?}"
                )?;
                match regularizer {
                    Some(Regularizer::L2 { weight_decay }) => write!(f, " l2={weight_decay}"),
                    None => Ok(()),
                }
            }
            Self::MaxPool2d { kernel_size, .. } => write!(f, "kernel={kernel_size}"),
            Self::LocalResponseNorm {
                depth_radius,
                bias,
                alpha,
                beta,
                ..
            } => write!(
                f,
                "radius={depth_radius} bias={bias} alpha={alpha} beta={beta}"
            ),
            Self::FullyConnected {
                units, activation, ..
            } => write!(f, "units={units} activation={activation:?}"),
            Self::Dropout { keep_prob, .. } => write!(f, "keep_prob={keep_prob}"),
            Self::Regression {
                optimizer,
                learning_rate,
                loss,
                ..
            } => write!(
                f,
                "optimizer={optimizer:?} learning_rate={learning_rate} loss={loss:?}"
            ),
        }
    }
}

/// Ordered sequence of layers describing a network before it is materialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    layers: Vec<LayerSpec>,
}

/// Builds the convolutional network used to classify MNIST digits.
///
/// The returned topology always holds 13 layers: two convolution stages (convolution, max
/// pooling and local response normalization), two fully-connected layers each followed by
/// dropout, a softmax output over 10 classes and the regression layer.
///
/// Both dropout layers use `config.keep_prob` and the regression layer uses
/// `config.learning_rate` as is.
pub fn mnist_convnet(config: &ConvNetConfig) -> Topology {
    Topology::new(vec![
        LayerSpec::input([None, Some(IMAGE_SIZE), Some(IMAGE_SIZE), Some(1)]),
        LayerSpec::conv_2d(32, 3, Activation::Relu, Some(Regularizer::l2())),
        LayerSpec::max_pool_2d(2),
        LayerSpec::local_response_norm(),
        LayerSpec::conv_2d(64, 3, Activation::Relu, Some(Regularizer::l2())),
        LayerSpec::max_pool_2d(2),
        LayerSpec::local_response_norm(),
        LayerSpec::fully_connected(128, Activation::Tanh).with_name("tabh"),
        LayerSpec::dropout(config.keep_prob),
        LayerSpec::fully_connected(256, Activation::Tanh).with_name("tabh"),
        LayerSpec::dropout(config.keep_prob),
        LayerSpec::fully_connected(NUM_CLASSES, Activation::Softmax),
        LayerSpec::regression(
            OptimizerKind::adam(),
            config.learning_rate,
            LossKind::CategoricalCrossEntropy,
        ),
    ])
}

impl Topology {
    pub fn new(layers: Vec<LayerSpec>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerSpec> {
        self.layers.iter()
    }

    /// Parameters of the last regression layer, if any.
    pub fn regression(&self) -> Option<RegressionConfig> {
        self.layers.iter().rev().find_map(|layer| match layer {
            LayerSpec::Regression {
                optimizer,
                learning_rate,
                loss,
                ..
            } => Some(RegressionConfig::new(*optimizer, *learning_rate, *loss)),
            _ => None,
        })
    }

    /// Number of units of the last fully-connected layer.
    pub fn num_classes(&self) -> Option<usize> {
        self.layers.iter().rev().find_map(|layer| match layer {
            LayerSpec::FullyConnected { units, .. } => Some(*units),
            _ => None,
        })
    }

    /// Keep probabilities of every dropout layer, in order.
    pub fn keep_probs(&self) -> Vec<f64> {
        self.layers
            .iter()
            .filter_map(|layer| match layer {
                LayerSpec::Dropout { keep_prob, .. } => Some(*keep_prob),
                _ => None,
            })
            .collect()
    }

    /// Checks that the topology can be materialized.
    pub fn validate(&self) -> Result<(), TopologyError> {
        self.plan().map(|_| ())
    }

    pub fn to_json(&self) -> Result<String, TopologyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TopologyError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Groups the layers into the stages the model is built from.
    ///
    /// Accepted layout: an input layer, convolution stages (a convolution optionally followed by
    /// max pooling then local response normalization), fully-connected stages (a fully-connected
    /// layer optionally followed by dropout) and a final regression layer.
    pub(crate) fn plan(&self) -> Result<Plan, TopologyError> {
        let (first, last) = match (self.layers.first(), self.layers.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(TopologyError::Empty),
        };
        let last_index = self.layers.len() - 1;

        let input = match first {
            LayerSpec::Input { name, shape } => input_dims(name, shape)?,
            other => {
                return Err(TopologyError::MissingInput {
                    index: 0,
                    found: other.kind().to_string(),
                })
            }
        };

        let regression = match last {
            LayerSpec::Regression {
                name,
                optimizer,
                learning_rate,
                loss,
            } if last_index > 0 => {
                check_learning_rate(last_index, name, *learning_rate)?;
                check_optimizer(last_index, name, optimizer)?;
                RegressionConfig::new(*optimizer, *learning_rate, *loss)
            }
            other => {
                return Err(TopologyError::MissingRegression {
                    index: last_index,
                    found: other.kind().to_string(),
                })
            }
        };

        let mut plan = Plan {
            input,
            features: Vec::new(),
            classifier: Vec::new(),
            regression,
        };
        let [mut height, mut width, mut channels] = plan.input;
        let mut d_input = 0;

        for (index, layer) in self.layers.iter().enumerate().take(last_index).skip(1) {
            let dense_started = !plan.classifier.is_empty();
            let unsupported = || TopologyError::Unsupported {
                index,
                name: layer.name().to_string(),
            };

            match layer {
                LayerSpec::Conv2d {
                    name,
                    filters,
                    kernel_size,
                    activation,
                    regularizer,
                } => {
                    if dense_started {
                        return Err(unsupported());
                    }
                    check_non_zero(index, name, "filters", *filters)?;
                    check_non_zero(index, name, "kernel_size", *kernel_size)?;
                    // Same padding is symmetric, only odd kernels keep the spatial size.
                    if kernel_size % 2 == 0 {
                        return Err(TopologyError::InvalidParameter {
                            index,
                            name: name.clone(),
                            field: "kernel_size",
                            value: *kernel_size as f64,
                        });
                    }
                    if let Some(Regularizer::L2 { weight_decay }) = regularizer {
                        check_non_negative(index, name, "weight_decay", *weight_decay)?;
                    }

                    plan.features.push(ConvStage {
                        channels: [channels, *filters],
                        kernel_size: *kernel_size,
                        activation: *activation,
                        regularizer: *regularizer,
                        pool: None,
                        norm: None,
                    });
                    channels = *filters;
                }
                LayerSpec::MaxPool2d { name, kernel_size } => {
                    let stage = match plan.features.last_mut() {
                        Some(stage)
                            if !dense_started && stage.pool.is_none() && stage.norm.is_none() =>
                        {
                            stage
                        }
                        _ => return Err(unsupported()),
                    };
                    check_non_zero(index, name, "kernel_size", *kernel_size)?;

                    height /= *kernel_size;
                    width /= *kernel_size;
                    if height == 0 || width == 0 {
                        return Err(TopologyError::ZeroSize {
                            index,
                            name: name.clone(),
                            field: "pooled feature map",
                        });
                    }
                    stage.pool = Some(*kernel_size);
                }
                LayerSpec::LocalResponseNorm {
                    name,
                    depth_radius,
                    bias,
                    alpha,
                    beta,
                } => {
                    let stage = match plan.features.last_mut() {
                        Some(stage) if !dense_started && stage.norm.is_none() => stage,
                        _ => return Err(unsupported()),
                    };
                    // A non-positive base or exponent breaks `x / (bias + alpha * sum)^beta`.
                    check_positive(index, name, "bias", *bias)?;
                    check_non_negative(index, name, "alpha", *alpha)?;
                    check_positive(index, name, "beta", *beta)?;

                    stage.norm = Some(LrnParams {
                        depth_radius: *depth_radius,
                        bias: *bias,
                        alpha: *alpha,
                        beta: *beta,
                    });
                }
                LayerSpec::FullyConnected {
                    name,
                    units,
                    activation,
                } => {
                    check_non_zero(index, name, "units", *units)?;

                    if !dense_started {
                        d_input = height
                            .checked_mul(width)
                            .and_then(|size| size.checked_mul(channels))
                            .ok_or_else(|| TopologyError::Overflow {
                                index,
                                name: name.clone(),
                                field: "flattened features",
                                dims: [height, width, channels],
                            })?;
                    }
                    plan.classifier.push(DenseStage {
                        d_input,
                        units: *units,
                        activation: *activation,
                        keep_prob: None,
                    });
                    d_input = *units;
                }
                LayerSpec::Dropout { name, keep_prob } => {
                    let stage = match plan.classifier.last_mut() {
                        Some(stage) if stage.keep_prob.is_none() => stage,
                        _ => return Err(unsupported()),
                    };
                    if !(*keep_prob > 0.0 && *keep_prob <= 1.0) {
                        return Err(TopologyError::KeepProbability {
                            index,
                            name: name.clone(),
                            keep_prob: *keep_prob,
                        });
                    }
                    stage.keep_prob = Some(*keep_prob);
                }
                LayerSpec::Input { .. } | LayerSpec::Regression { .. } => {
                    return Err(unsupported());
                }
            }
        }

        if plan.classifier.is_empty() {
            return Err(TopologyError::MissingOutput { index: last_index });
        }

        Ok(plan)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, layer) in self.layers.iter().enumerate() {
            writeln!(f, "{:>3}. {layer}", index + 1)?;
        }
        Ok(())
    }
}

/// Stages of a validated topology.
#[derive(Clone, Debug)]
pub(crate) struct Plan {
    /// `[height, width, channels]` of a single input image.
    pub input: [usize; 3],
    pub features: Vec<ConvStage>,
    pub classifier: Vec<DenseStage>,
    pub regression: RegressionConfig,
}

#[derive(Clone, Debug)]
pub(crate) struct ConvStage {
    pub channels: [usize; 2],
    pub kernel_size: usize,
    pub activation: Activation,
    pub regularizer: Option<Regularizer>,
    pub pool: Option<usize>,
    pub norm: Option<LrnParams>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct LrnParams {
    pub depth_radius: usize,
    pub bias: f64,
    pub alpha: f64,
    pub beta: f64,
}

#[derive(Clone, Debug)]
pub(crate) struct DenseStage {
    pub d_input: usize,
    pub units: usize,
    pub activation: Activation,
    pub keep_prob: Option<f64>,
}

fn input_dims(name: &str, shape: &[Option<usize>; 4]) -> Result<[usize; 3], TopologyError> {
    let mut dims = [0; 3];

    for (dim, (value, field)) in dims
        .iter_mut()
        .zip(shape[1..].iter().zip(["height", "width", "channels"]))
    {
        *dim = value.unwrap_or(0);
        check_non_zero(0, name, field, *dim)?;
    }

    Ok(dims)
}

fn check_non_zero(
    index: usize,
    name: &str,
    field: &'static str,
    value: usize,
) -> Result<(), TopologyError> {
    if value == 0 {
        return Err(TopologyError::ZeroSize {
            index,
            name: name.to_string(),
            field,
        });
    }
    Ok(())
}

fn check_finite(
    index: usize,
    name: &str,
    field: &'static str,
    value: f64,
) -> Result<(), TopologyError> {
    if !value.is_finite() {
        return Err(TopologyError::InvalidParameter {
            index,
            name: name.to_string(),
            field,
            value,
        });
    }
    Ok(())
}

fn check_non_negative(
    index: usize,
    name: &str,
    field: &'static str,
    value: f64,
) -> Result<(), TopologyError> {
    check_finite(index, name, field, value)?;
    if value < 0.0 {
        return Err(TopologyError::InvalidParameter {
            index,
            name: name.to_string(),
            field,
            value,
        });
    }
    Ok(())
}

fn check_positive(
    index: usize,
    name: &str,
    field: &'static str,
    value: f64,
) -> Result<(), TopologyError> {
    check_non_negative(index, name, field, value)?;
    if value == 0.0 {
        return Err(TopologyError::InvalidParameter {
            index,
            name: name.to_string(),
            field,
            value,
        });
    }
    Ok(())
}

fn check_learning_rate(index: usize, name: &str, learning_rate: f64) -> Result<(), TopologyError> {
    if !(learning_rate.is_finite() && learning_rate > 0.0) {
        return Err(TopologyError::LearningRate {
            index,
            name: name.to_string(),
            learning_rate,
        });
    }
    Ok(())
}

fn check_optimizer(
    index: usize,
    name: &str,
    optimizer: &OptimizerKind,
) -> Result<(), TopologyError> {
    match optimizer {
        OptimizerKind::Adam {
            beta_1,
            beta_2,
            epsilon,
        } => {
            for (field, value) in [("beta_1", *beta_1), ("beta_2", *beta_2)] {
                if !(0.0..1.0).contains(&value) {
                    return Err(TopologyError::InvalidParameter {
                        index,
                        name: name.to_string(),
                        field,
                        value,
                    });
                }
            }
            check_non_negative(index, name, "epsilon", *epsilon)
        }
    }
}
