//! Classification heads appended to the backbone

use super::layer::{Activation, LayerSpec};

/// Window (and stride) of the average pooling opening the classifier head
pub const AVERAGE_POOL_WINDOW: usize = 4;

/// Pooling, flatten, a hidden dense block and a softmax output
pub fn classifier_head(hidden_size: usize, dropout: f64, num_classes: usize) -> Vec<LayerSpec> {
    vec![
        LayerSpec::AveragePool2d {
            pool: AVERAGE_POOL_WINDOW,
        },
        LayerSpec::Flatten,
        LayerSpec::Dense {
            units: hidden_size,
            activation: Activation::Linear,
        },
        LayerSpec::BatchNorm,
        LayerSpec::Relu,
        LayerSpec::Dropout { rate: dropout },
        LayerSpec::Dense {
            units: num_classes,
            activation: Activation::Softmax,
        },
    ]
}

/// Global average pooling straight into the softmax output.
///
/// Keeps a single linear map from pooled channels to class scores, which is
/// what class activation maps are computed from.
pub fn cam_head(num_classes: usize) -> Vec<LayerSpec> {
    vec![
        LayerSpec::GlobalAveragePool2d,
        LayerSpec::Dense {
            units: num_classes,
            activation: Activation::Softmax,
        },
    ]
}
