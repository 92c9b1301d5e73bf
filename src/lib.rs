//! Convolutional network topology for MNIST digit classification.
//!
//! [mnist_convnet] describes the network as an ordered [Topology] of [LayerSpec]. The
//! descriptor is validated and materialized into a burn module with [Topology::init], and its
//! regression layer provides the optimizer and loss used to train it.

pub mod data;
pub mod error;
pub mod lrn;
pub mod model;
pub mod regression;
pub mod topology;

pub use data::MnistBatch;
pub use error::TopologyError;
pub use model::MnistConvNet;
pub use regression::RegressionConfig;
pub use topology::{
    mnist_convnet, Activation, ConvNetConfig, LayerSpec, LossKind, OptimizerKind, Regularizer,
    Topology,
};

#[cfg(test)]
mod tests {
    pub type TestBackend = burn::backend::NdArray<f32>;
    pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
}
