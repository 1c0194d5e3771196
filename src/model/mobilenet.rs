//! MobileNetV2 backbone
//!
//! Stem convolution, 17 inverted residual blocks and the final 1x1
//! convolution to 1280 channels. Every convolution and batch norm carries
//! its own trainable flag; the flags are set from a [`LayerPlan`] mask.
//!
//! Stride-2 convolutions use symmetric padding of 1, matching the layout of
//! the ImageNet weights imported by [`crate::model::pretrained`].

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::model::batch_norm::StaticBatchNorm;
use crate::model::layers::{
    block_prefix, block_specs, BlockSpec, LayerPlan, LAST_CHANNELS, STEM_CHANNELS,
};

/// Configuration for the MobileNetV2 backbone
#[derive(Config, Debug)]
pub struct MobileNetV2Config {
    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Batch norm epsilon
    #[config(default = "1e-5")]
    pub bn_epsilon: f64,
}

impl MobileNetV2Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetV2<B> {
        MobileNetV2::new(self, device)
    }
}

/// Convolution + batch norm + optional ReLU6
#[derive(Module, Debug)]
pub struct ConvBnAct<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: StaticBatchNorm<B>,
    relu6: bool,
    conv_trainable: bool,
}

impl<B: Backend> ConvBnAct<B> {
    /// Build a bias-free convolution followed by batch norm
    ///
    /// `groups == in_channels` gives a depthwise convolution.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        relu6: bool,
        bn_epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let padding = kernel_size / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: StaticBatchNorm::new(out_channels, bn_epsilon, device),
            relu6,
            conv_trainable: true,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = if self.conv_trainable {
            self.conv.forward(x)
        } else {
            self.conv.clone().no_grad().forward(x)
        };
        let x = self.bn.forward(x);

        if self.relu6 {
            x.clamp(0.0, 6.0)
        } else {
            x
        }
    }

    pub fn set_trainable(mut self, conv: bool, bn: bool) -> Self {
        self.conv_trainable = conv;
        self.bn = self.bn.set_trainable(bn);
        self
    }

    /// (conv, bn) trainable flags
    pub fn trainable(&self) -> (bool, bool) {
        (self.conv_trainable, self.bn.is_trainable())
    }
}

/// Inverted residual block: expand, depthwise, linear project
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    pub expand: Option<ConvBnAct<B>>,
    pub depthwise: ConvBnAct<B>,
    pub project: ConvBnAct<B>,
    index: usize,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn new(spec: &BlockSpec, bn_epsilon: f64, device: &B::Device) -> Self {
        let hidden = spec.hidden_channels;

        let expand = spec.expand.then(|| {
            ConvBnAct::new(spec.in_channels, hidden, 1, 1, 1, true, bn_epsilon, device)
        });
        let depthwise = ConvBnAct::new(hidden, hidden, 3, spec.stride, hidden, true, bn_epsilon, device);
        let project =
            ConvBnAct::new(hidden, spec.out_channels, 1, 1, 1, false, bn_epsilon, device);

        Self {
            expand,
            depthwise,
            project,
            index: spec.index,
            use_residual: spec.residual,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = x.clone();
        if let Some(expand) = &self.expand {
            out = expand.forward(out);
        }
        let out = self.depthwise.forward(out);
        let out = self.project.forward(out);

        if self.use_residual {
            out + x
        } else {
            out
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn set_trainable(mut self, plan: &LayerPlan, mask: &[bool]) -> Self {
        let prefix = block_prefix(self.index);
        let flag = |suffix: &str| layer_flag(plan, mask, &format!("{}{}", prefix, suffix));

        self.expand = self
            .expand
            .map(|m| m.set_trainable(flag("expand"), flag("expand_BN")));
        self.depthwise = self
            .depthwise
            .set_trainable(flag("depthwise"), flag("depthwise_BN"));
        self.project = self
            .project
            .set_trainable(flag("project"), flag("project_BN"));
        self
    }
}

fn layer_flag(plan: &LayerPlan, mask: &[bool], name: &str) -> bool {
    plan.index_of(name)
        .and_then(|i| mask.get(i).copied())
        .unwrap_or(false)
}

/// MobileNetV2 feature extractor (width multiplier 1.0, no top)
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    pub stem: ConvBnAct<B>,
    pub blocks: Vec<InvertedResidual<B>>,
    pub head: ConvBnAct<B>,
}

impl<B: Backend> MobileNetV2<B> {
    pub fn new(config: &MobileNetV2Config, device: &B::Device) -> Self {
        let eps = config.bn_epsilon;

        let stem = ConvBnAct::new(config.in_channels, STEM_CHANNELS, 3, 2, 1, true, eps, device);
        let specs = block_specs();
        let blocks = specs
            .iter()
            .map(|spec| InvertedResidual::new(spec, eps, device))
            .collect();
        let last_in = specs.last().map(|s| s.out_channels).unwrap_or(STEM_CHANNELS);
        let head = ConvBnAct::new(last_in, LAST_CHANNELS, 1, 1, 1, true, eps, device);

        Self { stem, blocks, head }
    }

    /// Features of shape [batch, 1280, H/32, W/32]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.head.forward(x)
    }

    /// Number of feature channels produced by `forward`
    pub fn out_channels(&self) -> usize {
        LAST_CHANNELS
    }

    /// Apply per-layer trainable flags from a mask over [`LayerPlan::mobilenet_v2`]
    pub fn set_trainable(mut self, mask: &[bool]) -> Self {
        let plan = LayerPlan::mobilenet_v2();

        self.stem = self.stem.set_trainable(
            layer_flag(&plan, mask, "Conv1"),
            layer_flag(&plan, mask, "bn_Conv1"),
        );
        self.blocks = self
            .blocks
            .into_iter()
            .map(|block| block.set_trainable(&plan, mask))
            .collect();
        self.head = self.head.set_trainable(
            layer_flag(&plan, mask, "Conv_1"),
            layer_flag(&plan, mask, "Conv_1_bn"),
        );
        self
    }

    pub fn freeze_all(self) -> Self {
        let plan = LayerPlan::mobilenet_v2();
        self.set_trainable(&plan.trainable_mask(0))
    }

    /// Train only the last `n` layers of the plan
    pub fn unfreeze_last(self, n: usize) -> Self {
        let plan = LayerPlan::mobilenet_v2();
        self.set_trainable(&plan.trainable_mask(n))
    }

    /// Names of the weight-carrying layers that are currently trainable
    pub fn trainable_layers(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut push = |name: String, trainable: bool| {
            if trainable {
                names.push(name);
            }
        };

        let (conv, bn) = self.stem.trainable();
        push("Conv1".to_string(), conv);
        push("bn_Conv1".to_string(), bn);

        for block in &self.blocks {
            let prefix = block_prefix(block.index());
            if let Some(expand) = &block.expand {
                let (conv, bn) = expand.trainable();
                push(format!("{}expand", prefix), conv);
                push(format!("{}expand_BN", prefix), bn);
            }
            let (conv, bn) = block.depthwise.trainable();
            push(format!("{}depthwise", prefix), conv);
            push(format!("{}depthwise_BN", prefix), bn);
            let (conv, bn) = block.project.trainable();
            push(format!("{}project", prefix), conv);
            push(format!("{}project_BN", prefix), bn);
        }

        let (conv, bn) = self.head.trainable();
        push("Conv_1".to_string(), conv);
        push("Conv_1_bn".to_string(), bn);

        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_feature_shape() {
        let device = Default::default();
        let model = MobileNetV2Config::new().init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device);
        let features = model.forward(input);

        assert_eq!(features.dims(), [1, 1280, 2, 2]);
    }

    #[test]
    fn test_block_structure() {
        let device = Default::default();
        let model = MobileNetV2Config::new().init::<TestBackend>(&device);

        assert_eq!(model.blocks.len(), 17);
        assert!(model.blocks[0].expand.is_none());
        assert!(model.blocks[1].expand.is_some());
        assert!(model.blocks[2].use_residual);
        assert!(!model.blocks[3].use_residual);
    }

    #[test]
    fn test_freeze_and_unfreeze_last() {
        let device = Default::default();
        let model = MobileNetV2Config::new().init::<TestBackend>(&device);
        assert_eq!(model.trainable_layers().len(), 104);

        let model = model.freeze_all();
        assert!(model.trainable_layers().is_empty());

        let model = model.unfreeze_last(100);
        let trainable = model.trainable_layers();
        assert_eq!(trainable.first().map(String::as_str), Some("block_6_expand"));
        assert_eq!(trainable.last().map(String::as_str), Some("Conv_1_bn"));
        assert!(!trainable.iter().any(|n| n == "block_5_project_BN"));

        let plan = LayerPlan::mobilenet_v2();
        assert_eq!(trainable.len(), plan.trainable_weight_layers(&plan.trainable_mask(100)));
    }
}
