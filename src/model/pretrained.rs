//! ImageNet weight import
//!
//! Reads a safetensors file laid out like torchvision's `mobilenet_v2`
//! state dict and copies every convolution and batch norm tensor into the
//! backbone:
//!
//! ```text
//! features.0.{0,1}             stem conv / bn
//! features.1.conv.{0.0,0.1}    block 0 depthwise conv / bn
//! features.1.conv.{1,2}        block 0 project conv / bn
//! features.{i+1}.conv.{0.0,0.1} block i expand conv / bn
//! features.{i+1}.conv.{1.0,1.1} block i depthwise conv / bn
//! features.{i+1}.conv.{2,3}    block i project conv / bn
//! features.18.{0,1}            final 1x1 conv / bn
//! ```
//!
//! `num_batches_tracked` and `classifier.*` entries are ignored.

use std::collections::HashMap;
use std::path::Path;

use burn::{
    module::Param,
    tensor::{backend::Backend, Tensor, TensorData},
};
use half::f16;
use safetensors::{tensor::Dtype, SafeTensors};
use tracing::{debug, info, warn};

use crate::model::layers::block_specs;
use crate::model::mobilenet::{ConvBnAct, MobileNetV2};
use crate::utils::error::{Result, SoybeanError};

/// A decoded tensor
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Named tensors read from a weight file
#[derive(Debug, Clone, Default)]
pub struct PretrainedWeights {
    tensors: HashMap<String, WeightTensor>,
}

impl PretrainedWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a safetensors file
    pub fn from_safetensors(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SoybeanError::PathNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        let weights = Self::from_bytes(&bytes)?;
        info!("Read {} tensors from {:?}", weights.len(), path);
        Ok(weights)
    }

    /// Parse safetensors bytes; F32 and F16 tensors are kept, others skipped
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let st = SafeTensors::deserialize(bytes)
            .map_err(|e| SoybeanError::Model(format!("Invalid safetensors data: {}", e)))?;

        let mut tensors = HashMap::new();
        for (name, view) in st.tensors() {
            let raw = view.data();
            let data: Vec<f32> = match view.dtype() {
                Dtype::F32 => raw
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
                Dtype::F16 => raw
                    .chunks_exact(2)
                    .map(|b| f16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32())
                    .collect(),
                other => {
                    warn!("Skipping tensor {} with unsupported dtype {:?}", name, other);
                    continue;
                }
            };

            tensors.insert(
                name,
                WeightTensor {
                    shape: view.shape().to_vec(),
                    data,
                },
            );
        }

        Ok(Self { tensors })
    }

    pub fn insert(&mut self, key: &str, shape: Vec<usize>, data: Vec<f32>) {
        self.tensors
            .insert(key.to_string(), WeightTensor { shape, data });
    }

    pub fn get(&self, key: &str) -> Option<&WeightTensor> {
        self.tensors.get(key)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Build a tensor for `key`, checking it has the `expected` shape
    pub fn tensor<B: Backend, const D: usize>(
        &self,
        key: &str,
        expected: [usize; D],
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        let weight = self
            .get(key)
            .ok_or_else(|| SoybeanError::Model(format!("Missing pretrained tensor '{}'", key)))?;

        if weight.shape.as_slice() != expected.as_slice() {
            return Err(SoybeanError::Model(format!(
                "Shape mismatch for '{}': file has {:?}, model expects {:?}",
                key, weight.shape, expected
            )));
        }

        Ok(Tensor::from_data(
            TensorData::new(weight.data.clone(), expected),
            device,
        ))
    }
}

/// (conv key, bn key) prefixes for every conv/bn pair, in backbone order
pub fn torchvision_prefixes() -> Vec<(String, String)> {
    let mut prefixes = vec![("features.0.0".to_string(), "features.0.1".to_string())];

    for block in block_specs() {
        let base = format!("features.{}.conv", block.index + 1);
        if block.expand {
            prefixes.push((format!("{}.0.0", base), format!("{}.0.1", base)));
            prefixes.push((format!("{}.1.0", base), format!("{}.1.1", base)));
            prefixes.push((format!("{}.2", base), format!("{}.3", base)));
        } else {
            prefixes.push((format!("{}.0.0", base), format!("{}.0.1", base)));
            prefixes.push((format!("{}.1", base), format!("{}.2", base)));
        }
    }

    prefixes.push(("features.18.0".to_string(), "features.18.1".to_string()));
    prefixes
}

impl<B: Backend> ConvBnAct<B> {
    /// Copy conv weight and bn statistics; returns the number of tensors copied
    pub fn load_pretrained(
        &mut self,
        weights: &PretrainedWeights,
        conv_key: &str,
        bn_key: &str,
        device: &B::Device,
    ) -> Result<usize> {
        let weight_dims = self.conv.weight.dims();
        self.conv.weight = Param::from_tensor(weights.tensor(
            &format!("{}.weight", conv_key),
            weight_dims,
            device,
        )?);

        let channels = [self.bn.channels()];
        self.bn.gamma =
            Param::from_tensor(weights.tensor(&format!("{}.weight", bn_key), channels, device)?);
        self.bn.beta =
            Param::from_tensor(weights.tensor(&format!("{}.bias", bn_key), channels, device)?);
        self.bn.moving_mean = Param::from_tensor(weights.tensor(
            &format!("{}.running_mean", bn_key),
            channels,
            device,
        )?);
        self.bn.moving_var = Param::from_tensor(weights.tensor(
            &format!("{}.running_var", bn_key),
            channels,
            device,
        )?);

        Ok(5)
    }
}

impl<B: Backend> MobileNetV2<B> {
    /// Conv/bn pairs in backbone order (matches [`torchvision_prefixes`])
    pub fn conv_bn_layers_mut(&mut self) -> Vec<&mut ConvBnAct<B>> {
        let mut layers = vec![&mut self.stem];
        for block in self.blocks.iter_mut() {
            if let Some(expand) = block.expand.as_mut() {
                layers.push(expand);
            }
            layers.push(&mut block.depthwise);
            layers.push(&mut block.project);
        }
        layers.push(&mut self.head);
        layers
    }

    /// Load ImageNet weights; returns the number of tensors copied
    pub fn load_pretrained(
        &mut self,
        weights: &PretrainedWeights,
        device: &B::Device,
    ) -> Result<usize> {
        let prefixes = torchvision_prefixes();
        let layers = self.conv_bn_layers_mut();

        if layers.len() != prefixes.len() {
            return Err(SoybeanError::Model(format!(
                "Backbone has {} conv/bn pairs, weight layout has {}",
                layers.len(),
                prefixes.len()
            )));
        }

        let mut copied = 0;
        for (layer, (conv_key, bn_key)) in layers.into_iter().zip(prefixes.iter()) {
            copied += layer.load_pretrained(weights, conv_key, bn_key, device)?;
            debug!("Loaded {} / {}", conv_key, bn_key);
        }

        info!("Copied {} pretrained tensors into the backbone", copied);
        Ok(copied)
    }
}
