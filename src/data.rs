use burn::tensor::{backend::Backend, Int, Tensor};

/// A batch of MNIST images with their class labels.
#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Images in the `[batch_size, height, width, channels]` layout.
    pub images: Tensor<B, 4>,
    /// Class index of each image.
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> MnistBatch<B> {
    pub fn new(images: Tensor<B, 4>, targets: Tensor<B, 1, Int>) -> Self {
        Self { images, targets }
    }

    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
