//! # Lung Ultrasound Classifier
//!
//! VGG16-based network topologies for classifying lung ultrasound frames,
//! built with the Burn framework.
//!
//! ## Features
//!
//! - **Classifier**: VGG16 backbone with a pooled, batch-normalized dense head
//! - **CAM model**: the same backbone with global average pooling and a single
//!   softmax layer, exposing feature maps and class weights for activation maps
//! - **Positional freezing**: only the last N layers stay trainable
//!
//! ## Modules
//!
//! - `model`: Layer descriptions, backbone, heads and builders
//! - `backend`: Backend selection (NdArray or CUDA)
//! - `utils`: Errors, logging and config files
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lus_classifier::backend::{default_device, DefaultBackend};
//! use lus_classifier::model::{ClassifierConfig, WeightSource};
//!
//! let device = default_device();
//! let model = ClassifierConfig::new()
//!     .with_num_classes(3)
//!     .init::<DefaultBackend>(&WeightSource::file("weights/vgg16_imagenet"), &device)?;
//! let probabilities = model.forward(images);
//! ```

pub mod backend;
pub mod model;
pub mod utils;

// Re-export commonly used items for convenience
pub use model::{
    build_cam_model, build_model, AssembledModel, CamConfig, ClassifierConfig, InputShape,
    ModelFile, WeightSource,
};
pub use utils::error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
