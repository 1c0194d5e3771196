//! Backbone layer plan
//!
//! MobileNetV2 (width 1.0, no classification top) enumerated as a flat,
//! ordered list of layers with the naming and granularity used by the
//! reference Keras application model. Freezing decisions ("train only the
//! last N layers") are made against this list and then pushed down onto
//! the weight-carrying modules.

use serde::{Deserialize, Serialize};

/// Inverted residual settings `(expansion, out_channels, repeats, first_stride)`
pub const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

/// Output channels of the stem convolution
pub const STEM_CHANNELS: usize = 32;

/// Output channels of the final 1x1 convolution
pub const LAST_CHANNELS: usize = 1280;

/// Kind of a backbone layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    Input,
    Conv,
    DepthwiseConv,
    BatchNorm,
    Relu6,
    ZeroPad,
    Add,
}

impl LayerKind {
    /// Whether the layer owns trainable weights
    pub fn has_weights(&self) -> bool {
        matches!(
            self,
            LayerKind::Conv | LayerKind::DepthwiseConv | LayerKind::BatchNorm
        )
    }
}

/// Part of the network a layer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerGroup {
    Stem,
    Block(usize),
    Head,
}

impl std::fmt::Display for LayerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerGroup::Stem => write!(f, "stem"),
            LayerGroup::Block(i) => write!(f, "block {}", i),
            LayerGroup::Head => write!(f, "head"),
        }
    }
}

/// One entry of the layer plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub index: usize,
    pub name: String,
    pub kind: LayerKind,
    pub group: LayerGroup,
}

/// Shape of one inverted residual block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    pub index: usize,
    pub in_channels: usize,
    pub hidden_channels: usize,
    pub out_channels: usize,
    pub stride: usize,
    pub expand: bool,
    pub residual: bool,
}

impl BlockSpec {
    /// Layer name prefix (`expanded_conv_` for block 0, `block_{i}_` otherwise)
    pub fn prefix(&self) -> String {
        block_prefix(self.index)
    }
}

/// Layer name prefix of block `index`
pub fn block_prefix(index: usize) -> String {
    if index == 0 {
        "expanded_conv_".to_string()
    } else {
        format!("block_{}_", index)
    }
}

/// The 17 inverted residual blocks in order
pub fn block_specs() -> Vec<BlockSpec> {
    let mut specs = Vec::with_capacity(17);
    let mut in_channels = STEM_CHANNELS;

    for &(t, c, n, s) in INVERTED_RESIDUAL_SETTINGS.iter() {
        for repeat in 0..n {
            let stride = if repeat == 0 { s } else { 1 };
            specs.push(BlockSpec {
                index: specs.len(),
                in_channels,
                hidden_channels: in_channels * t,
                out_channels: c,
                stride,
                expand: t != 1,
                residual: stride == 1 && in_channels == c,
            });
            in_channels = c;
        }
    }

    specs
}

/// Ordered list of backbone layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerPlan {
    layers: Vec<LayerSpec>,
}

impl LayerPlan {
    /// The MobileNetV2 layer plan (154 layers)
    pub fn mobilenet_v2() -> Self {
        let mut plan = Self { layers: Vec::new() };

        plan.push("input_1", LayerKind::Input, LayerGroup::Stem);
        plan.push("Conv1", LayerKind::Conv, LayerGroup::Stem);
        plan.push("bn_Conv1", LayerKind::BatchNorm, LayerGroup::Stem);
        plan.push("Conv1_relu", LayerKind::Relu6, LayerGroup::Stem);

        for block in block_specs() {
            let group = LayerGroup::Block(block.index);
            let p = block.prefix();

            if block.expand {
                plan.push(&format!("{}expand", p), LayerKind::Conv, group);
                plan.push(&format!("{}expand_BN", p), LayerKind::BatchNorm, group);
                plan.push(&format!("{}expand_relu", p), LayerKind::Relu6, group);
            }
            if block.stride == 2 {
                plan.push(&format!("{}pad", p), LayerKind::ZeroPad, group);
            }
            plan.push(&format!("{}depthwise", p), LayerKind::DepthwiseConv, group);
            plan.push(&format!("{}depthwise_BN", p), LayerKind::BatchNorm, group);
            plan.push(&format!("{}depthwise_relu", p), LayerKind::Relu6, group);
            plan.push(&format!("{}project", p), LayerKind::Conv, group);
            plan.push(&format!("{}project_BN", p), LayerKind::BatchNorm, group);
            if block.residual {
                plan.push(&format!("{}add", p), LayerKind::Add, group);
            }
        }

        plan.push("Conv_1", LayerKind::Conv, LayerGroup::Head);
        plan.push("Conv_1_bn", LayerKind::BatchNorm, LayerGroup::Head);
        plan.push("out_relu", LayerKind::Relu6, LayerGroup::Head);

        plan
    }

    fn push(&mut self, name: &str, kind: LayerKind, group: LayerGroup) {
        self.layers.push(LayerSpec {
            index: self.layers.len(),
            name: name.to_string(),
            kind,
            group,
        });
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    pub fn get(&self, index: usize) -> Option<&LayerSpec> {
        self.layers.get(index)
    }

    /// Position of a layer by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    /// Index of the first trainable layer when only the last `n` are trained
    pub fn first_trainable(&self, unfreeze_last: usize) -> usize {
        self.len() - unfreeze_last.min(self.len())
    }

    /// Per-layer trainable flags when only the last `n` are trained
    pub fn trainable_mask(&self, unfreeze_last: usize) -> Vec<bool> {
        let first = self.first_trainable(unfreeze_last);
        (0..self.len()).map(|i| i >= first).collect()
    }

    /// Number of weight-carrying layers among the trainable ones
    pub fn trainable_weight_layers(&self, mask: &[bool]) -> usize {
        self.layers
            .iter()
            .zip(mask)
            .filter(|(layer, &trainable)| trainable && layer.kind.has_weights())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_count() {
        let plan = LayerPlan::mobilenet_v2();
        assert_eq!(plan.len(), 154);
        assert_eq!(plan.get(0).map(|l| l.name.as_str()), Some("input_1"));
        assert_eq!(plan.get(153).map(|l| l.name.as_str()), Some("out_relu"));
    }

    #[test]
    fn test_unfreeze_last_100() {
        let plan = LayerPlan::mobilenet_v2();
        let first = plan.first_trainable(100);

        assert_eq!(first, 54);
        assert_eq!(plan.get(first).map(|l| l.name.as_str()), Some("block_6_expand"));
        assert_eq!(plan.get(first - 1).map(|l| l.name.as_str()), Some("block_5_add"));

        let mask = plan.trainable_mask(100);
        assert_eq!(mask.iter().filter(|&&t| !t).count(), 54);
        assert_eq!(mask.iter().filter(|&&t| t).count(), 100);
    }

    #[test]
    fn test_unfreeze_more_than_available() {
        let plan = LayerPlan::mobilenet_v2();
        assert_eq!(plan.first_trainable(1000), 0);
        assert_eq!(plan.first_trainable(0), 154);
        assert!(plan.trainable_mask(0).iter().all(|&t| !t));
    }

    #[test]
    fn test_key_layer_names() {
        let plan = LayerPlan::mobilenet_v2();
        for name in [
            "Conv1",
            "bn_Conv1",
            "expanded_conv_depthwise",
            "expanded_conv_project_BN",
            "block_1_pad",
            "block_2_add",
            "block_13_pad",
            "block_16_project_BN",
            "Conv_1_bn",
        ] {
            assert!(plan.index_of(name).is_some(), "missing {}", name);
        }
        assert!(plan.index_of("expanded_conv_expand").is_none());
        assert!(plan.index_of("block_16_add").is_none());
        assert!(plan.index_of("block_10_add").is_none());
    }

    #[test]
    fn test_block_specs() {
        let specs = block_specs();
        assert_eq!(specs.len(), 17);

        let strided: Vec<usize> = specs.iter().filter(|b| b.stride == 2).map(|b| b.index).collect();
        assert_eq!(strided, vec![1, 3, 6, 13]);

        let residual: Vec<usize> = specs.iter().filter(|b| b.residual).map(|b| b.index).collect();
        assert_eq!(residual, vec![2, 4, 5, 7, 8, 9, 11, 12, 14, 15]);

        assert_eq!(specs[0].hidden_channels, 32);
        assert_eq!(specs[16].in_channels, 160);
        assert_eq!(specs[16].hidden_channels, 960);
        assert_eq!(specs[16].out_channels, 320);
    }

    #[test]
    fn test_weight_layers() {
        let plan = LayerPlan::mobilenet_v2();
        let all = vec![true; plan.len()];
        // 52 convolutions and 52 batch norms
        assert_eq!(plan.trainable_weight_layers(&all), 104);
    }
}
