//! Soybean quality classifier
//!
//! MobileNetV2 features -> global average pooling -> dropout -> dense layer.
//! `forward` returns logits for the cross-entropy loss; `forward_softmax`
//! returns class probabilities.

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Initializer, Linear, LinearConfig,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};
use tracing::info;

use crate::model::mobilenet::{MobileNetV2, MobileNetV2Config};
use crate::model::pretrained::PretrainedWeights;
use crate::utils::error::{self, SoybeanError};

/// Configuration for the SoybeanClassifier, saved next to the weights
#[derive(Config, Debug)]
pub struct SoybeanClassifierConfig {
    /// Class names in label order
    pub class_names: Vec<String>,

    /// Number of output classes
    #[config(default = "5")]
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "224")]
    pub image_size: usize,

    /// Dropout rate before the dense layer
    #[config(default = "0.3")]
    pub dropout: f64,

    /// Batch norm epsilon of the backbone
    #[config(default = "1e-5")]
    pub bn_epsilon: f64,
}

impl SoybeanClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SoybeanClassifier<B> {
        SoybeanClassifier::new(self, device)
    }
}

/// MobileNetV2 backbone with a single dense classification head
#[derive(Module, Debug)]
pub struct SoybeanClassifier<B: Backend> {
    pub backbone: MobileNetV2<B>,
    pub pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub head: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> SoybeanClassifier<B> {
    pub fn new(config: &SoybeanClassifierConfig, device: &B::Device) -> Self {
        let backbone = MobileNetV2Config::new()
            .with_bn_epsilon(config.bn_epsilon)
            .init(device);

        let head = LinearConfig::new(backbone.out_channels(), config.num_classes)
            .with_initializer(Initializer::XavierUniform { gain: 1.0 })
            .init(device);

        Self {
            backbone,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(config.dropout).init(),
            head,
            num_classes: config.num_classes,
        }
    }

    /// Logits of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.backbone.forward(x);
        let x = self.pool.forward(x);

        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout.forward(x);
        self.head.forward(x)
    }

    /// Class probabilities; each row sums to 1
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Copy ImageNet weights into the backbone
    pub fn load_pretrained(&mut self, weights: &PretrainedWeights, device: &B::Device) -> error::Result<usize> {
        self.backbone.load_pretrained(weights, device)
    }

    /// Freeze every backbone layer; only the head trains
    pub fn freeze_backbone(mut self) -> Self {
        self.backbone = self.backbone.freeze_all();
        self
    }

    /// Train the last `n` backbone layers along with the head
    pub fn unfreeze_backbone_last(mut self, n: usize) -> Self {
        self.backbone = self.backbone.unfreeze_last(n);
        self
    }

    /// Save weights to `<path>.mpk`
    pub fn save(&self, path: &Path) -> error::Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.clone()
            .save_file(path, &recorder)
            .map_err(|e| SoybeanError::Record(format!("Failed to save model: {:?}", e)))?;
        info!("Model weights saved to {:?}", path.with_extension("mpk"));
        Ok(())
    }

    /// Build from `config` and load weights saved by [`SoybeanClassifier::save`]
    pub fn load(config: &SoybeanClassifierConfig, path: &Path, device: &B::Device) -> error::Result<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        Self::new(config, device)
            .load_file(path, &recorder, device)
            .map_err(|e| SoybeanError::Record(format!("Failed to load model: {:?}", e)))
    }
}
