//! Batch normalization in inference mode
//!
//! The backbone is always run with its pretrained moving statistics, in both
//! training stages. Only `gamma` and `beta` can learn, and only while the
//! layer is trainable.

use burn::{
    module::{Module, Param},
    tensor::{backend::Backend, Tensor},
};

/// Batch normalization that normalizes with moving statistics only
#[derive(Module, Debug)]
pub struct StaticBatchNorm<B: Backend> {
    pub gamma: Param<Tensor<B, 1>>,
    pub beta: Param<Tensor<B, 1>>,
    pub moving_mean: Param<Tensor<B, 1>>,
    pub moving_var: Param<Tensor<B, 1>>,
    epsilon: f64,
    trainable: bool,
}

impl<B: Backend> StaticBatchNorm<B> {
    /// Identity-initialized layer (gamma 1, beta 0, mean 0, var 1)
    pub fn new(channels: usize, epsilon: f64, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([channels], device)),
            beta: Param::from_tensor(Tensor::zeros([channels], device)),
            moving_mean: Param::from_tensor(Tensor::zeros([channels], device)),
            moving_var: Param::from_tensor(Tensor::ones([channels], device)),
            epsilon,
            trainable: true,
        }
    }

    pub fn channels(&self) -> usize {
        self.gamma.dims()[0]
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub fn set_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    /// `(x - mean) / sqrt(var + eps) * gamma + beta` over the channel dim
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let channels = self.channels();

        let mean = self.moving_mean.val().detach();
        let var = self.moving_var.val().detach();
        let (gamma, beta) = if self.trainable {
            (self.gamma.val(), self.beta.val())
        } else {
            (self.gamma.val().detach(), self.beta.val().detach())
        };

        let scale = gamma / (var + self.epsilon).sqrt();
        let shift = beta - mean * scale.clone();

        x * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
    }
}
