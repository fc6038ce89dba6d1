//! Layer specifications
//!
//! A model is described as an ordered list of [`LayerSpec`] values. Each spec
//! knows which tensor shape it accepts, which shape it produces and how many
//! parameters it owns, so a whole topology can be checked before any weights
//! are allocated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};

/// Image dimensions expected by a model, in `(height, width, channels)` order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// 224x224 RGB
    pub fn imagenet() -> Self {
        Self::new(224, 224, 3)
    }

    /// Check that every dimension is positive
    pub fn validate(&self) -> Result<()> {
        if self.height == 0 || self.width == 0 || self.channels == 0 {
            return Err(Error::Shape(format!(
                "input dimensions must be positive, got {}",
                self
            )));
        }
        Ok(())
    }

    /// Shape of a batch in Burn's channel-first layout
    pub fn batch_dims(&self, batch_size: usize) -> [usize; 4] {
        [batch_size, self.channels, self.height, self.width]
    }
}

impl Default for InputShape {
    fn default() -> Self {
        Self::imagenet()
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}

/// Shape of the activations flowing between two layers (batch dimension omitted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorShape {
    /// Feature maps: height x width x channels
    Spatial {
        height: usize,
        width: usize,
        channels: usize,
    },
    /// Flat feature vector
    Vector { features: usize },
}

impl TensorShape {
    /// Number of scalar values per sample
    pub fn size(&self) -> usize {
        match *self {
            TensorShape::Spatial {
                height,
                width,
                channels,
            } => height * width * channels,
            TensorShape::Vector { features } => features,
        }
    }

    pub fn is_spatial(&self) -> bool {
        matches!(self, TensorShape::Spatial { .. })
    }
}

impl From<InputShape> for TensorShape {
    fn from(shape: InputShape) -> Self {
        TensorShape::Spatial {
            height: shape.height,
            width: shape.width,
            channels: shape.channels,
        }
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorShape::Spatial {
                height,
                width,
                channels,
            } => write!(f, "(None, {}, {}, {})", height, width, channels),
            TensorShape::Vector { features } => write!(f, "(None, {})", features),
        }
    }
}

/// Activation applied after a convolution or dense projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Softmax,
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Linear => write!(f, "linear"),
            Activation::Relu => write!(f, "relu"),
            Activation::Softmax => write!(f, "softmax"),
        }
    }
}

/// One layer of a topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    /// Entry point fixing the image dimensions
    Input { shape: InputShape },
    /// Square convolution with "same" padding and unit stride
    Conv2d {
        filters: usize,
        kernel: usize,
        activation: Activation,
    },
    /// Max pooling, stride equal to the window, no padding
    MaxPool2d { pool: usize },
    /// Average pooling, stride equal to the window, no padding
    AveragePool2d { pool: usize },
    /// Mean over the spatial dimensions, one value per channel
    GlobalAveragePool2d,
    Flatten,
    Dense { units: usize, activation: Activation },
    /// Batch normalization over the feature dimension
    BatchNorm,
    Relu,
    Dropout { rate: f64 },
}

impl LayerSpec {
    /// Keras-style type name, also used as the base for generated layer names
    pub fn kind(&self) -> &'static str {
        match self {
            LayerSpec::Input { .. } => "input_layer",
            LayerSpec::Conv2d { .. } => "conv2d",
            LayerSpec::MaxPool2d { .. } => "max_pooling2d",
            LayerSpec::AveragePool2d { .. } => "average_pooling2d",
            LayerSpec::GlobalAveragePool2d => "global_average_pooling2d",
            LayerSpec::Flatten => "flatten",
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::BatchNorm => "batch_normalization",
            LayerSpec::Relu => "re_lu",
            LayerSpec::Dropout { .. } => "dropout",
        }
    }

    /// Whether this layer turns feature maps into a feature vector
    pub fn is_reduction(&self) -> bool {
        matches!(self, LayerSpec::Flatten | LayerSpec::GlobalAveragePool2d)
    }

    /// Check hyperparameters that do not depend on the incoming shape
    pub fn validate(&self) -> Result<()> {
        match *self {
            LayerSpec::Input { shape } => shape.validate(),
            LayerSpec::Conv2d {
                filters,
                kernel,
                activation,
            } => {
                if activation == Activation::Softmax {
                    return Err(Error::InvalidArgument(
                        "softmax is only supported on dense layers".to_string(),
                    ));
                }
                if filters == 0 {
                    return Err(Error::InvalidArgument(
                        "conv2d needs at least one filter".to_string(),
                    ));
                }
                if kernel == 0 || kernel % 2 == 0 {
                    return Err(Error::InvalidArgument(format!(
                        "conv2d kernel must be a positive odd number, got {}",
                        kernel
                    )));
                }
                Ok(())
            }
            LayerSpec::MaxPool2d { pool } | LayerSpec::AveragePool2d { pool } => {
                if pool == 0 {
                    return Err(Error::InvalidArgument(
                        "pooling window must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            LayerSpec::Dense { units, .. } => {
                if units == 0 {
                    return Err(Error::InvalidArgument(
                        "dense layer needs at least one unit".to_string(),
                    ));
                }
                Ok(())
            }
            LayerSpec::Dropout { rate } => {
                if !(0.0..1.0).contains(&rate) {
                    return Err(Error::InvalidArgument(format!(
                        "dropout rate must be in [0.0, 1.0), got {}",
                        rate
                    )));
                }
                Ok(())
            }
            LayerSpec::GlobalAveragePool2d
            | LayerSpec::Flatten
            | LayerSpec::BatchNorm
            | LayerSpec::Relu => Ok(()),
        }
    }

    /// Shape produced by this layer when fed `input`.
    ///
    /// `Input` ignores its argument and returns its own shape.
    pub fn output_shape(&self, input: TensorShape) -> Result<TensorShape> {
        self.validate()?;

        match (self, input) {
            (LayerSpec::Input { shape }, _) => Ok((*shape).into()),
            (
                LayerSpec::Conv2d { filters, .. },
                TensorShape::Spatial { height, width, .. },
            ) => Ok(TensorShape::Spatial {
                height,
                width,
                channels: *filters,
            }),
            (
                LayerSpec::MaxPool2d { pool } | LayerSpec::AveragePool2d { pool },
                TensorShape::Spatial {
                    height,
                    width,
                    channels,
                },
            ) => {
                if height < *pool || width < *pool {
                    return Err(Error::Shape(format!(
                        "{} window {}x{} does not fit {}x{} feature maps",
                        self.kind(),
                        pool,
                        pool,
                        height,
                        width
                    )));
                }
                Ok(TensorShape::Spatial {
                    height: height / pool,
                    width: width / pool,
                    channels,
                })
            }
            (LayerSpec::GlobalAveragePool2d, TensorShape::Spatial { channels, .. }) => {
                Ok(TensorShape::Vector { features: channels })
            }
            (LayerSpec::Flatten, shape @ TensorShape::Spatial { .. }) => Ok(TensorShape::Vector {
                features: shape.size(),
            }),
            (LayerSpec::Dense { units, .. }, TensorShape::Vector { .. }) => {
                Ok(TensorShape::Vector { features: *units })
            }
            (
                LayerSpec::BatchNorm | LayerSpec::Relu | LayerSpec::Dropout { .. },
                shape @ TensorShape::Vector { .. },
            ) => Ok(shape),
            (spec, shape) => {
                let expected = if shape.is_spatial() {
                    "a flat feature vector"
                } else {
                    "spatial feature maps"
                };
                Err(Error::Shape(format!(
                    "{} expects {} but receives {}",
                    spec.kind(),
                    expected,
                    shape
                )))
            }
        }
    }

    /// Number of values owned by this layer given its input shape.
    ///
    /// Batch normalization counts its scale and offset plus the running mean
    /// and variance.
    pub fn parameter_count(&self, input: TensorShape) -> usize {
        match (self, input) {
            (
                LayerSpec::Conv2d {
                    filters, kernel, ..
                },
                TensorShape::Spatial { channels, .. },
            ) => kernel * kernel * channels * filters + filters,
            (LayerSpec::Dense { units, .. }, input) => input.size() * units + units,
            (LayerSpec::BatchNorm, input) => 4 * input.size(),
            _ => 0,
        }
    }

    /// Part of [`LayerSpec::parameter_count`] that is never trained: the
    /// batch normalization running statistics
    pub fn statistics_count(&self, input: TensorShape) -> usize {
        match self {
            LayerSpec::BatchNorm => 2 * input.size(),
            _ => 0,
        }
    }
}

impl fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerSpec::Input { shape } => write!(f, "Input{}", shape),
            LayerSpec::Conv2d {
                filters,
                kernel,
                activation,
            } => write!(f, "Conv2D({}, {}x{}, {})", filters, kernel, kernel, activation),
            LayerSpec::MaxPool2d { pool } => write!(f, "MaxPooling2D({}x{})", pool, pool),
            LayerSpec::AveragePool2d { pool } => write!(f, "AveragePooling2D({}x{})", pool, pool),
            LayerSpec::GlobalAveragePool2d => write!(f, "GlobalAveragePooling2D"),
            LayerSpec::Flatten => write!(f, "Flatten"),
            LayerSpec::Dense { units, activation } => write!(f, "Dense({}, {})", units, activation),
            LayerSpec::BatchNorm => write!(f, "BatchNormalization"),
            LayerSpec::Relu => write!(f, "ReLU"),
            LayerSpec::Dropout { rate } => write!(f, "Dropout({})", rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spatial(height: usize, width: usize, channels: usize) -> TensorShape {
        TensorShape::Spatial {
            height,
            width,
            channels,
        }
    }

    #[test]
    fn test_input_shape_validation() {
        assert!(InputShape::imagenet().validate().is_ok());
        assert!(InputShape::new(224, 0, 3).validate().is_err());
        assert_eq!(InputShape::new(32, 48, 1).batch_dims(2), [2, 1, 32, 48]);
    }

    #[test]
    fn test_conv_keeps_spatial_extent() {
        let conv = LayerSpec::Conv2d {
            filters: 64,
            kernel: 3,
            activation: Activation::Relu,
        };
        assert_eq!(conv.output_shape(spatial(224, 224, 3)).unwrap(), spatial(224, 224, 64));
        assert_eq!(conv.parameter_count(spatial(224, 224, 3)), 1_792);
    }

    #[test]
    fn test_even_kernel_rejected() {
        let conv = LayerSpec::Conv2d {
            filters: 8,
            kernel: 2,
            activation: Activation::Linear,
        };
        assert!(matches!(
            conv.output_shape(spatial(8, 8, 3)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_softmax_conv_rejected() {
        let conv = LayerSpec::Conv2d {
            filters: 8,
            kernel: 3,
            activation: Activation::Softmax,
        };
        assert!(matches!(conv.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_pooling_floors_and_rejects_small_maps() {
        let pool = LayerSpec::AveragePool2d { pool: 4 };
        assert_eq!(pool.output_shape(spatial(7, 7, 512)).unwrap(), spatial(1, 1, 512));
        assert!(matches!(pool.output_shape(spatial(3, 7, 512)), Err(Error::Shape(_))));

        let max = LayerSpec::MaxPool2d { pool: 2 };
        assert_eq!(max.output_shape(spatial(15, 15, 8)).unwrap(), spatial(7, 7, 8));
    }

    #[test]
    fn test_reductions() {
        assert_eq!(
            LayerSpec::Flatten.output_shape(spatial(2, 3, 4)).unwrap(),
            TensorShape::Vector { features: 24 }
        );
        assert_eq!(
            LayerSpec::GlobalAveragePool2d.output_shape(spatial(7, 7, 512)).unwrap(),
            TensorShape::Vector { features: 512 }
        );
        assert!(LayerSpec::Flatten.is_reduction());
        assert!(!LayerSpec::BatchNorm.is_reduction());
    }

    #[test]
    fn test_rank_mismatch_is_shape_error() {
        let dense = LayerSpec::Dense {
            units: 3,
            activation: Activation::Softmax,
        };
        assert!(matches!(dense.output_shape(spatial(7, 7, 512)), Err(Error::Shape(_))));
        assert!(matches!(
            LayerSpec::Flatten.output_shape(TensorShape::Vector { features: 10 }),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn test_dense_and_batch_norm_parameter_counts() {
        let input = TensorShape::Vector { features: 512 };
        let dense = LayerSpec::Dense {
            units: 64,
            activation: Activation::Linear,
        };
        assert_eq!(dense.parameter_count(input), 512 * 64 + 64);
        let hidden = TensorShape::Vector { features: 64 };
        assert_eq!(LayerSpec::BatchNorm.parameter_count(hidden), 256);
        assert_eq!(LayerSpec::BatchNorm.statistics_count(hidden), 128);
        assert_eq!(dense.statistics_count(input), 0);
        assert_eq!(LayerSpec::Relu.parameter_count(input), 0);
    }

    #[test]
    fn test_dropout_range() {
        assert!(LayerSpec::Dropout { rate: 0.0 }.validate().is_ok());
        assert!(LayerSpec::Dropout { rate: 0.5 }.validate().is_ok());
        assert!(LayerSpec::Dropout { rate: 1.0 }.validate().is_err());
        assert!(LayerSpec::Dropout { rate: -0.1 }.validate().is_err());
    }

    #[test]
    fn test_spec_serializes_as_tagged_table() {
        let spec = LayerSpec::Dense {
            units: 4,
            activation: Activation::Softmax,
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"type":"dense","units":4,"activation":"softmax"}"#);
        let back: LayerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
