use burn::config::Config;
use burn::module::{Content, DisplaySettings, Module, ModuleDisplay};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Configuration to create a [LocalResponseNorm](LocalResponseNorm) layer using the
/// [init function](LocalResponseNormConfig::init).
#[derive(Debug, Config)]
pub struct LocalResponseNormConfig {
    /// Number of neighbouring channels summed on each side. Default: 5
    #[config(default = 5)]
    pub depth_radius: usize,
    /// Offset added to the scaled sum. Default: 1.0
    #[config(default = 1.0)]
    pub bias: f64,
    /// Scale applied to the sum of squares. Default: 1e-4
    #[config(default = 1e-4)]
    pub alpha: f64,
    /// Exponent of the normalization. Default: 0.75
    #[config(default = 0.75)]
    pub beta: f64,
}

/// Applies local response normalization across the channels of an input tensor.
///
/// `Y[c] = X[c] / (bias + alpha * sum(X[c - r..=c + r]²))^beta`
///
/// Channels outside of `[0, channels)` count as zero. The sum is not divided by the window size.
///
/// Should be created using [LocalResponseNormConfig](LocalResponseNormConfig).
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct LocalResponseNorm {
    depth_radius: usize,
    bias: f64,
    alpha: f64,
    beta: f64,
}

impl LocalResponseNormConfig {
    /// Initialize a new [local response norm](LocalResponseNorm) module.
    pub fn init(&self) -> LocalResponseNorm {
        LocalResponseNorm {
            depth_radius: self.depth_radius,
            bias: self.bias,
            alpha: self.alpha,
            beta: self.beta,
        }
    }
}

impl LocalResponseNorm {
    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, channels, height, width]`
    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch_size, channels, height, width] = input.dims();
        let radius = self.depth_radius;
        let squared = input.clone().powf_scalar(2.0);

        let sum = if radius == 0 {
            squared
        } else {
            let padding =
                Tensor::<B, 4>::zeros([batch_size, radius, height, width], &input.device());
            let padded = Tensor::cat(vec![padding.clone(), squared, padding], 1);

            (0..=2 * radius)
                .map(|offset| {
                    padded.clone().slice([
                        0..batch_size,
                        offset..offset + channels,
                        0..height,
                        0..width,
                    ])
                })
                .reduce(|acc, window| acc + window)
                .unwrap_or_else(|| input.zeros_like())
        };

        let scale = sum
            .mul_scalar(self.alpha)
            .add_scalar(self.bias)
            .powf_scalar(self.beta);

        input / scale
    }
}

impl ModuleDisplay for LocalResponseNorm {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("depth_radius", &self.depth_radius)
            .add("bias", &self.bias)
            .add("alpha", &self.alpha)
            .add("beta", &self.beta)
            .optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;
    use burn::tensor::TensorData;
    use rstest::rstest;

    fn assert_close(actual: Tensor<TestBackend, 4>, expected: &[f32]) {
        let actual = actual.into_data().to_vec::<f32>().unwrap();

        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "expected {expected:?}, got {actual:?}");
        }
    }

    #[test]
    fn default_config_matches_common_values() {
        let config = LocalResponseNormConfig::new();

        assert_eq!(config.depth_radius, 5);
        assert_eq!(config.bias, 1.0);
        assert_eq!(config.alpha, 1e-4);
        assert_eq!(config.beta, 0.75);
    }

    #[rstest]
    #[case::radius_zero(0, [0.5, 0.4])]
    #[case::radius_one(1, [1.0 / 6.0, 2.0 / 6.0])]
    #[case::radius_wider_than_channels(4, [1.0 / 6.0, 2.0 / 6.0])]
    fn forward_normalizes_across_channels(#[case] depth_radius: usize, #[case] expected: [f32; 2]) {
        let device = Default::default();
        let module = LocalResponseNormConfig::new()
            .with_depth_radius(depth_radius)
            .with_bias(1.0)
            .with_alpha(1.0)
            .with_beta(1.0)
            .init();
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0], [1, 2, 1, 1]),
            &device,
        );

        assert_close(module.forward(input), &expected);
    }

    #[test]
    fn forward_keeps_shape_and_only_mixes_channels() {
        let device = Default::default();
        let module = LocalResponseNormConfig::new()
            .with_depth_radius(1)
            .with_alpha(1.0)
            .with_beta(0.5)
            .init();
        // Two spatial positions, three channels each.
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 2.0, 0.0, 3.0, 0.0], [1, 3, 1, 2]),
            &device,
        );

        let output = module.forward(input);

        assert_eq!(output.dims(), [1, 3, 1, 2]);
        assert_close(
            output,
            &[
                1.0 / 6f32.sqrt(),
                0.0,
                2.0 / 15f32.sqrt(),
                0.0,
                3.0 / 14f32.sqrt(),
                0.0,
            ],
        );
    }

    #[test]
    fn display() {
        let layer = LocalResponseNormConfig::new().init();

        assert_eq!(
            format!("{layer}"),
            "LocalResponseNorm {depth_radius: 5, bias: 1, alpha: 0.0001, beta: 0.75}"
        );
    }
}
