use crate::data::MnistBatch;
use crate::model::MnistConvNet;
use crate::topology::{LossKind, OptimizerKind};
use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};

/// Optimizer, learning rate and loss bound to the output of a network.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegressionConfig {
    optimizer: OptimizerKind,
    learning_rate: f64,
    loss: LossKind,
}

impl RegressionConfig {
    pub fn new(optimizer: OptimizerKind, learning_rate: f64, loss: LossKind) -> Self {
        Self {
            optimizer,
            learning_rate,
            loss,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn optimizer_kind(&self) -> OptimizerKind {
        self.optimizer
    }

    pub fn loss_kind(&self) -> LossKind {
        self.loss
    }

    /// Creates the optimizer used to update the parameters of `M`.
    pub fn optimizer<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> impl Optimizer<M, B> {
        match self.optimizer {
            OptimizerKind::Adam {
                beta_1,
                beta_2,
                epsilon,
            } => AdamConfig::new()
                .with_beta_1(beta_1 as f32)
                .with_beta_2(beta_2 as f32)
                .with_epsilon(epsilon as f32)
                .init(),
        }
    }

    /// Computes the loss of the network output against the target classes.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes]`
    /// - targets: `[batch_size]`
    /// - output: `[1]`
    pub fn loss<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        match self.loss {
            // Softmax followed by categorical cross-entropy, computed from the logits.
            LossKind::CategoricalCrossEntropy => CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits, targets),
        }
    }

    /// Runs a single optimization step on the batch and returns the updated model with the
    /// loss measured before the update.
    pub fn step<B, O>(
        &self,
        model: MnistConvNet<B>,
        optimizer: &mut O,
        batch: MnistBatch<B>,
    ) -> (MnistConvNet<B>, f64)
    where
        B: AutodiffBackend,
        O: Optimizer<MnistConvNet<B>, B>,
    {
        let output = model.forward_classification(batch.images, batch.targets);
        let loss = output.loss.clone().into_scalar().elem::<f64>();

        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        let model = optimizer.step(self.learning_rate, model, grads);

        log::trace!("Optimization step with loss {loss}");

        (model, loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};
    use crate::topology::{mnist_convnet, ConvNetConfig};
    use burn::tensor::{Distribution, TensorData};

    #[test]
    fn loss_is_cross_entropy_of_logits() {
        let device = Default::default();
        let config = RegressionConfig::new(
            OptimizerKind::adam(),
            0.001,
            LossKind::CategoricalCrossEntropy,
        );
        // Uniform logits over 4 classes.
        let logits = Tensor::<TestBackend, 2>::zeros([2, 4], &device);
        let targets =
            Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([0i64, 3]), &device);

        let loss = config
            .loss(logits, targets)
            .into_data()
            .to_vec::<f32>()
            .unwrap()[0];

        assert!((loss - 4f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn topology_regression_is_passed_through() {
        let topology = mnist_convnet(&ConvNetConfig::new().with_learning_rate(0.0042));
        let regression = topology.regression().unwrap();

        assert_eq!(regression.learning_rate(), 0.0042);
        assert_eq!(regression.optimizer_kind(), OptimizerKind::adam());
        assert_eq!(regression.loss_kind(), LossKind::CategoricalCrossEntropy);
    }

    #[test]
    fn step_updates_the_model() {
        let device = Default::default();
        let model = mnist_convnet(&ConvNetConfig::new().with_keep_prob(1.0))
            .init::<TestAutodiffBackend>(&device)
            .unwrap();
        let regression = *model.regression();
        let mut optimizer =
            regression.optimizer::<TestAutodiffBackend, MnistConvNet<TestAutodiffBackend>>();
        let batch = MnistBatch::new(
            Tensor::random([4, 28, 28, 1], Distribution::Default, &device),
            Tensor::from_data(TensorData::from([0i64, 1, 2, 3]), &device),
        );
        let penalty = |model: &MnistConvNet<TestAutodiffBackend>| {
            model
                .l2_penalty()
                .unwrap()
                .into_data()
                .to_vec::<f32>()
                .unwrap()[0]
        };
        let before = penalty(&model);

        let (model, loss) = regression.step(model, &mut optimizer, batch);

        assert!(loss.is_finite() && loss > 0.0);
        assert_ne!(before, penalty(&model));
    }
}
