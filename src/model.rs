use crate::data::MnistBatch;
use crate::error::TopologyError;
use crate::lrn::{LocalResponseNorm, LocalResponseNormConfig};
use crate::regression::RegressionConfig;
use crate::topology::{Activation, ConvStage, DenseStage, Regularizer, Topology};
use burn::{
    module::{Ignored, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Initializer, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{relu, softmax, tanh},
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{ClassificationOutput, InferenceStep, TrainOutput, TrainStep},
};

const WEIGHT_STD: f64 = 0.02;

/// Uniform in `±sqrt(3 / fan_in)`, the scaling the convolutions are trained with.
const CONV_INITIALIZER: Initializer = Initializer::KaimingUniform {
    gain: 1.0,
    fan_out_only: false,
};

/// Convolution followed by its activation, max pooling and local response normalization.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    activation: Ignored<Activation>,
    pool: Option<MaxPool2d>,
    norm: Option<LocalResponseNorm>,
    weight_decay: Ignored<Option<f64>>,
}

/// Fully-connected layer followed by its activation and dropout.
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    linear: Linear<B>,
    activation: Ignored<Activation>,
    dropout: Option<Dropout>,
    keep_prob: Ignored<Option<f64>>,
}

/// Network materialized from a [topology](Topology).
#[derive(Module, Debug)]
pub struct MnistConvNet<B: Backend> {
    features: Vec<ConvBlock<B>>,
    classifier: Vec<DenseBlock<B>>,
    regression: Ignored<RegressionConfig>,
}

impl Topology {
    /// Validates the topology and builds the corresponding network on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<MnistConvNet<B>, TopologyError> {
        let plan = self.plan()?;
        let initializer = Initializer::Normal {
            mean: 0.0,
            std: WEIGHT_STD,
        };

        let features = plan
            .features
            .iter()
            .map(|stage| ConvBlock::new(stage, &CONV_INITIALIZER, device))
            .collect::<Vec<_>>();
        let classifier = plan
            .classifier
            .iter()
            .map(|stage| DenseBlock::new(stage, &initializer, device))
            .collect::<Vec<_>>();

        log::info!(
            "Materialized topology with {} convolution stages and {} dense stages ({} classes)",
            features.len(),
            classifier.len(),
            plan.classifier.last().map_or(0, |stage| stage.units),
        );

        Ok(MnistConvNet {
            features,
            classifier,
            regression: Ignored(plan.regression),
        })
    }
}

impl<B: Backend> ConvBlock<B> {
    fn new(stage: &ConvStage, initializer: &Initializer, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(stage.channels, [stage.kernel_size, stage.kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .with_initializer(initializer.clone())
            .init(device);
        let pool = stage.pool.map(|kernel_size| {
            MaxPool2dConfig::new([kernel_size, kernel_size])
                .with_strides([kernel_size, kernel_size])
                .init()
        });
        let norm = stage.norm.map(|params| {
            LocalResponseNormConfig::new()
                .with_depth_radius(params.depth_radius)
                .with_bias(params.bias)
                .with_alpha(params.alpha)
                .with_beta(params.beta)
                .init()
        });
        let weight_decay = stage.regularizer.map(|regularizer| match regularizer {
            Regularizer::L2 { weight_decay } => weight_decay,
        });

        log::debug!(
            "conv_2d {:?} kernel={} pool={:?} lrn={}",
            stage.channels,
            stage.kernel_size,
            stage.pool,
            stage.norm.is_some()
        );

        Self {
            conv,
            activation: Ignored(stage.activation),
            pool,
            norm,
            weight_decay: Ignored(weight_decay),
        }
    }

    /// # Shapes
    ///
    /// - input: `[batch_size, channels_in, height, width]`
    /// - output: `[batch_size, channels_out, height_out, width_out]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let mut x = activate(x, *self.activation, 1);

        if let Some(pool) = &self.pool {
            x = pool.forward(x);
        }
        if let Some(norm) = &self.norm {
            x = norm.forward(x);
        }

        x
    }

    /// L2 penalty of the convolution weights, `None` when the block is not regularized.
    pub fn l2_penalty(&self) -> Option<Tensor<B, 1>> {
        (*self.weight_decay).map(|weight_decay| {
            self.conv
                .weight
                .val()
                .powf_scalar(2.0)
                .sum()
                .mul_scalar(weight_decay / 2.0)
        })
    }
}

impl<B: Backend> DenseBlock<B> {
    fn new(stage: &DenseStage, initializer: &Initializer, device: &B::Device) -> Self {
        let linear = LinearConfig::new(stage.d_input, stage.units)
            .with_initializer(initializer.clone())
            .init(device);
        let dropout = stage
            .keep_prob
            .map(|keep_prob| DropoutConfig::new(1.0 - keep_prob).init());

        log::debug!(
            "fully_connected {} -> {} keep_prob={:?}",
            stage.d_input,
            stage.units,
            stage.keep_prob
        );

        Self {
            linear,
            activation: Ignored(stage.activation),
            dropout,
            keep_prob: Ignored(stage.keep_prob),
        }
    }

    /// Softmax is left to the caller when `output` is set, so the block returns logits.
    fn forward(&self, input: Tensor<B, 2>, output: bool) -> Tensor<B, 2> {
        let x = self.linear.forward(input);
        let x = match *self.activation {
            Activation::Softmax if output => x,
            activation => activate(x, activation, 1),
        };

        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }
}

impl<B: Backend> MnistConvNet<B> {
    /// Computes the pre-softmax scores of every class.
    ///
    /// # Shapes
    ///
    /// - images: `[batch_size, height, width, channels]`
    /// - output: `[batch_size, num_classes]`
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        // [batch_size, height, width, channels] -> [batch_size, channels, height, width]
        let mut x = images.permute([0, 3, 1, 2]);

        for block in self.features.iter() {
            x = block.forward(x);
        }

        let mut x: Tensor<B, 2> = x.flatten(1, 3);
        let last = self.classifier.len().saturating_sub(1);

        for (index, block) in self.classifier.iter().enumerate() {
            x = block.forward(x, index == last);
        }

        x
    }

    /// Computes the class probabilities of every image.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let logits = self.forward_logits(images);

        match self.classifier.last().map(|block| *block.activation) {
            Some(Activation::Softmax) => softmax(logits, 1),
            _ => logits,
        }
    }

    /// Sum of the L2 penalties of the regularized convolutions.
    pub fn l2_penalty(&self) -> Option<Tensor<B, 1>> {
        self.features
            .iter()
            .filter_map(ConvBlock::l2_penalty)
            .reduce(|acc, penalty| acc + penalty)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward_logits(images);
        let loss = self.regression.loss(output.clone(), targets.clone());
        let loss = match self.l2_penalty() {
            Some(penalty) => loss + penalty,
            None => loss,
        };

        ClassificationOutput::new(loss, output, targets)
    }

    /// Optimizer, learning rate and loss bound to the network.
    pub fn regression(&self) -> &RegressionConfig {
        &self.regression
    }

    pub fn num_classes(&self) -> usize {
        self.classifier
            .last()
            .map_or(0, |block| block.linear.weight.val().dims()[1])
    }

    /// Keep probability of each dropout layer, in order.
    pub fn keep_probs(&self) -> Vec<f64> {
        self.classifier
            .iter()
            .filter_map(|block| *block.keep_prob)
            .collect()
    }
}

impl<B: AutodiffBackend> TrainStep for MnistConvNet<B> {
    type Input = MnistBatch<B>;
    type Output = ClassificationOutput<B>;

    fn step(&self, batch: MnistBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> InferenceStep for MnistConvNet<B> {
    type Input = MnistBatch<B>;
    type Output = ClassificationOutput<B>;

    fn step(&self, batch: MnistBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

fn activate<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    activation: Activation,
    dim: usize,
) -> Tensor<B, D> {
    match activation {
        Activation::Relu => relu(x),
        Activation::Tanh => tanh(x),
        Activation::Softmax => softmax(x, dim),
    }
}
