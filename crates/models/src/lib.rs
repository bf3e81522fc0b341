//! Burn segmentation models for thaw-slump detection.
//!
//! This crate defines the architectures behind one trait:
//! - `PlainUnet`: encoder/decoder with skip connections.
//! - `Fcn`: two 3x3 convolutions and a 1x1 head.
//!
//! Both map `[N, C, H, W]` inputs to `[N, 1, H, W]` logits. `Architecture` is the
//! registry the run configuration resolves names against; `losses` holds the
//! loss registry.

pub mod losses;

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use losses::LossKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown architecture `{name}`. Available options are: {available:?}")]
    UnknownArchitecture {
        name: String,
        available: Vec<&'static str>,
    },
    #[error("Wrong loss type `{name}`. Available options are: {available:?}")]
    UnknownLoss {
        name: String,
        available: Vec<&'static str>,
    },
    #[error("invalid model config: {0}")]
    InvalidConfig(String),
}

/// Pixel-wise binary segmentation network.
pub trait SegmentationModel<B: Backend>: Module<B> {
    /// `[N, C, H, W]` -> `[N, 1, H, W]` logits.
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// `model` section of a run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub architecture: String,
    /// Filled in from the data sources at startup.
    #[serde(default)]
    pub input_channels: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_channels: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    PlainUnet,
    Fcn,
}

impl Architecture {
    pub const ALL: [Architecture; 2] = [Architecture::PlainUnet, Architecture::Fcn];

    pub fn name(&self) -> &'static str {
        match self {
            Architecture::PlainUnet => "PlainUNet",
            Architecture::Fcn => "FCN",
        }
    }

    /// Case-insensitive registry lookup.
    pub fn from_name(name: &str) -> Result<Self, ModelError> {
        Self::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| ModelError::UnknownArchitecture {
                name: name.to_string(),
                available: Self::ALL.iter().map(|a| a.name()).collect(),
            })
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: nn::BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: nn::BatchNorm<B, 2>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = |i, o| {
            Conv2dConfig::new([i, o], [3, 3])
                .with_padding(nn::PaddingConfig2d::Same)
                .init(device)
        };
        Self {
            conv1: conv(in_channels, out_channels),
            norm1: nn::BatchNormConfig::new(out_channels).init(device),
            conv2: conv(out_channels, out_channels),
            norm2: nn::BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm1.forward(self.conv1.forward(x)));
        relu(self.norm2.forward(self.conv2.forward(x)))
    }
}

#[derive(Debug, Clone)]
pub struct PlainUnetConfig {
    pub input_channels: usize,
    pub base_channels: usize,
    pub depth: usize,
}

impl Default for PlainUnetConfig {
    fn default() -> Self {
        Self {
            input_channels: 4,
            base_channels: 16,
            depth: 3,
        }
    }
}

#[derive(Debug, Module)]
pub struct PlainUnet<B: Backend> {
    encoders: Vec<ConvBlock<B>>,
    bottleneck: ConvBlock<B>,
    ups: Vec<ConvTranspose2d<B>>,
    decoders: Vec<ConvBlock<B>>,
    pool: MaxPool2d,
    head: Conv2d<B>,
}

impl<B: Backend> PlainUnet<B> {
    /// Input height and width must be divisible by `2^depth`.
    pub fn new(cfg: PlainUnetConfig, device: &B::Device) -> Self {
        let base = cfg.base_channels.max(1);
        let widths: Vec<usize> = (0..cfg.depth).map(|i| base << i).collect();
        let mut encoders = Vec::with_capacity(cfg.depth);
        let mut in_ch = cfg.input_channels;
        for &w in &widths {
            encoders.push(ConvBlock::new(in_ch, w, device));
            in_ch = w;
        }
        let bottom = base << cfg.depth;
        let bottleneck = ConvBlock::new(in_ch, bottom, device);
        let mut ups = Vec::with_capacity(cfg.depth);
        let mut decoders = Vec::with_capacity(cfg.depth);
        let mut below = bottom;
        for &w in widths.iter().rev() {
            ups.push(
                ConvTranspose2dConfig::new([below, w], [2, 2])
                    .with_stride([2, 2])
                    .init(device),
            );
            decoders.push(ConvBlock::new(w * 2, w, device));
            below = w;
        }
        Self {
            encoders,
            bottleneck,
            ups,
            decoders,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            head: Conv2dConfig::new([below, 1], [1, 1]).init(device),
        }
    }
}

impl<B: Backend> SegmentationModel<B> for PlainUnet<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = input;
        for enc in &self.encoders {
            let features = enc.forward(x);
            x = self.pool.forward(features.clone());
            skips.push(features);
        }
        x = self.bottleneck.forward(x);
        for (up, dec) in self.ups.iter().zip(&self.decoders) {
            let Some(skip) = skips.pop() else {
                break;
            };
            x = up.forward(x);
            x = dec.forward(Tensor::cat(vec![x, skip], 1));
        }
        self.head.forward(x)
    }
}

#[derive(Debug, Clone)]
pub struct FcnConfig {
    pub input_channels: usize,
    pub hidden: usize,
}

impl Default for FcnConfig {
    fn default() -> Self {
        Self {
            input_channels: 4,
            hidden: 16,
        }
    }
}

#[derive(Debug, Module)]
pub struct Fcn<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    head: Conv2d<B>,
}

impl<B: Backend> Fcn<B> {
    pub fn new(cfg: FcnConfig, device: &B::Device) -> Self {
        let hidden = cfg.hidden.max(1);
        Self {
            conv1: Conv2dConfig::new([cfg.input_channels, hidden], [3, 3])
                .with_padding(nn::PaddingConfig2d::Same)
                .init(device),
            conv2: Conv2dConfig::new([hidden, hidden], [3, 3])
                .with_padding(nn::PaddingConfig2d::Same)
                .init(device),
            head: Conv2dConfig::new([hidden, 1], [1, 1]).init(device),
        }
    }
}

impl<B: Backend> SegmentationModel<B> for Fcn<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv1.forward(input));
        let x = relu(self.conv2.forward(x));
        self.head.forward(x)
    }
}

impl ModelConfig {
    pub fn architecture(&self) -> Result<Architecture, ModelError> {
        Architecture::from_name(&self.architecture)
    }

    pub fn validate(&self) -> Result<Architecture, ModelError> {
        let arch = self.architecture()?;
        if self.base_channels == Some(0) {
            return Err(ModelError::InvalidConfig("base_channels must be positive".into()));
        }
        Ok(arch)
    }

    pub fn plain_unet(&self) -> PlainUnetConfig {
        let defaults = PlainUnetConfig::default();
        PlainUnetConfig {
            input_channels: self.input_channels,
            base_channels: self.base_channels.unwrap_or(defaults.base_channels),
            depth: self.depth.unwrap_or(defaults.depth),
        }
    }

    pub fn fcn(&self) -> FcnConfig {
        FcnConfig {
            input_channels: self.input_channels,
            hidden: self.base_channels.unwrap_or(FcnConfig::default().hidden),
        }
    }
}

pub mod prelude {
    pub use super::{
        Architecture, Fcn, FcnConfig, LossKind, ModelConfig, ModelError, PlainUnet,
        PlainUnetConfig, SegmentationModel,
    };
}
