//! Model module for the lung ultrasound networks using the Burn framework
//!
//! This module provides:
//! - A declarative layer description with explicit shape propagation
//! - The VGG16 convolutional backbone and its weight loading
//! - The classification and class-activation-map heads
//! - Positional freezing of trailing layers
//!
//! ## Architecture
//!
//! Both variants share the 13-convolution VGG16 backbone. The classifier adds
//! average pooling, a hidden dense block with batch normalization and dropout,
//! and a softmax output; the CAM variant only adds global average pooling and
//! the softmax output.

pub mod assembled;
pub mod backbone;
pub mod config;
pub mod head;
pub mod layer;
pub mod network;
pub mod trainable;

// Re-export main types for convenience
pub use assembled::AssembledModel;
pub use backbone::{vgg16_features, WeightSource};
pub use config::{build_cam_model, build_model, Architecture, CamConfig, ClassifierConfig, ModelFile};
pub use layer::{Activation, InputShape, LayerSpec, TensorShape};
pub use network::{CamOutput, FeatureStack, GraphBuilder, LayerInfo, LayerSlot, Network};
pub use trainable::{select_trainable, Trainable};

/// Default dropout rate of the classifier head
pub const DEFAULT_DROPOUT: f64 = 0.5;

/// Default number of classes (COVID-19, pneumonia, healthy)
pub const DEFAULT_NUM_CLASSES: usize = 3;
