//! VGG16 Backbone
//!
//! The convolutional part of VGG16 (13 convolutions in five blocks, each block
//! closed by 2x2 max pooling) without its fully connected classifier.
//! Pretrained weights are injected through [`WeightSource`].

use std::path::{Path, PathBuf};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::layer::{Activation, InputShape, LayerSpec};
use super::network::{FeatureStack, GraphBuilder, SpatialLayer};
use crate::utils::error::{Error, Result};

/// Convolutions per block and their filter count
pub const VGG16_BLOCKS: [(usize, usize); 5] = [(2, 64), (2, 128), (3, 256), (3, 512), (3, 512)];

/// Smallest height/width the five pooling stages can handle
pub const MIN_INPUT_EXTENT: usize = 32;

/// Channel count the pretrained weights were trained on
pub const PRETRAINED_CHANNELS: usize = 3;

/// Number of layer positions the backbone occupies, input layer included
pub const VGG16_LAYER_COUNT: usize = 19;

/// Where backbone weights come from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "source", content = "path", rename_all = "snake_case")]
pub enum WeightSource {
    /// Fresh initialization
    #[default]
    Random,
    /// Burn `CompactRecorder` file holding a [`FeatureStack`] record
    File(PathBuf),
}

impl WeightSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        WeightSource::File(path.into())
    }

    pub fn is_pretrained(&self) -> bool {
        matches!(self, WeightSource::File(_))
    }

    /// Load the weights into `stack`, or return it untouched for [`WeightSource::Random`]
    pub fn load<B: Backend>(
        &self,
        stack: FeatureStack<B>,
        device: &B::Device,
    ) -> Result<FeatureStack<B>> {
        match self {
            WeightSource::Random => Ok(stack),
            WeightSource::File(path) => {
                let record_path = record_file(path)
                    .ok_or_else(|| Error::WeightsUnavailable(path.clone()))?;
                info!("Loading backbone weights from {}", record_path.display());

                let expected = parameter_shapes(&stack);

                // The recorder appends its own extension
                let stack = stack.load_file(path.clone(), &CompactRecorder::new(), device)?;
                check_parameter_shapes(&expected, &parameter_shapes(&stack))?;
                Ok(stack)
            }
        }
    }
}

/// Weight and bias dims of every layer; `None` for parameterless layers
type ParameterShapes = Vec<Option<([usize; 4], Option<[usize; 1]>)>>;

fn parameter_shapes<B: Backend>(stack: &FeatureStack<B>) -> ParameterShapes {
    stack
        .layers
        .iter()
        .map(|layer| match layer {
            SpatialLayer::Conv(layer) => Some((
                layer.conv.weight.val().dims(),
                layer.conv.bias.as_ref().map(|bias| bias.val().dims()),
            )),
            SpatialLayer::MaxPool(_) | SpatialLayer::AvgPool(_) => None,
        })
        .collect()
}

/// A record may hold a backbone of the same depth but other channel counts
fn check_parameter_shapes(expected: &ParameterShapes, loaded: &ParameterShapes) -> Result<()> {
    if expected.len() != loaded.len() {
        return Err(Error::Record(format!(
            "record holds {} layers, the backbone has {}",
            loaded.len(),
            expected.len()
        )));
    }

    for (index, (expected, loaded)) in expected.iter().zip(loaded).enumerate() {
        if expected != loaded {
            return Err(Error::Record(format!(
                "layer {} parameters have shape {:?}, expected {:?}",
                index, loaded, expected
            )));
        }
    }

    Ok(())
}

/// Resolve the on-disk record file, with or without the `.mpk` extension
fn record_file(path: &Path) -> Option<PathBuf> {
    let with_extension = path.with_extension("mpk");
    with_extension.is_file().then_some(with_extension)
}

/// The backbone topology with VGG layer names, input layer first
pub fn vgg16_layers(input: InputShape) -> Vec<(String, LayerSpec)> {
    let mut layers = Vec::with_capacity(VGG16_LAYER_COUNT);
    layers.push(("input_layer".to_string(), LayerSpec::Input { shape: input }));

    for (block, (convs, filters)) in VGG16_BLOCKS.iter().enumerate() {
        for conv in 1..=*convs {
            layers.push((
                format!("block{}_conv{}", block + 1, conv),
                LayerSpec::Conv2d {
                    filters: *filters,
                    kernel: 3,
                    activation: Activation::Relu,
                },
            ));
        }
        layers.push((
            format!("block{}_pool", block + 1),
            LayerSpec::MaxPool2d { pool: 2 },
        ));
    }

    layers
}

/// Check that `input` can run through the backbone with the given weights
pub fn check_input(input: InputShape, weights: &WeightSource) -> Result<()> {
    input.validate()?;

    if input.height < MIN_INPUT_EXTENT || input.width < MIN_INPUT_EXTENT {
        return Err(Error::Shape(format!(
            "VGG16 needs at least {}x{} inputs, got {}",
            MIN_INPUT_EXTENT, MIN_INPUT_EXTENT, input
        )));
    }
    if weights.is_pretrained() && input.channels != PRETRAINED_CHANNELS {
        return Err(Error::Shape(format!(
            "pretrained VGG16 weights expect {} input channels, got {}",
            PRETRAINED_CHANNELS, input.channels
        )));
    }

    Ok(())
}

/// Push the VGG16 backbone onto an empty graph and load its weights
pub fn push_vgg16<B: Backend>(
    graph: &mut GraphBuilder<'_, B>,
    input: InputShape,
    weights: &WeightSource,
    device: &B::Device,
) -> Result<()> {
    check_input(input, weights)?;

    for (name, spec) in vgg16_layers(input) {
        graph.push_named(name, spec)?;
    }
    graph.map_features(|stack| weights.load(stack, device))
}

/// A standalone backbone, e.g. to produce or convert weight records
pub fn vgg16_features<B: Backend>(
    input: InputShape,
    weights: &WeightSource,
    device: &B::Device,
) -> Result<FeatureStack<B>> {
    let mut graph = GraphBuilder::<B>::new(device);
    push_vgg16(&mut graph, input, weights, device)?;
    Ok(graph.into_feature_stack())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, ElementConversion, Tensor};

    use crate::model::layer::TensorShape;

    type TestBackend = NdArray;

    #[test]
    fn test_vgg16_layer_names() {
        let layers = vgg16_layers(InputShape::imagenet());
        assert_eq!(layers.len(), VGG16_LAYER_COUNT);
        assert_eq!(layers[0].0, "input_layer");
        assert_eq!(layers[1].0, "block1_conv1");
        assert_eq!(layers[3].0, "block1_pool");
        assert_eq!(layers[18].0, "block5_pool");

        let convs = layers
            .iter()
            .filter(|(_, spec)| matches!(spec, LayerSpec::Conv2d { .. }))
            .count();
        assert_eq!(convs, 13);
    }

    #[test]
    fn test_backbone_output_and_parameters() {
        let device = Default::default();
        let mut graph = GraphBuilder::<TestBackend>::new(&device);
        push_vgg16(&mut graph, InputShape::imagenet(), &WeightSource::Random, &device).unwrap();

        assert_eq!(
            graph.output_shape(),
            Some(TensorShape::Spatial {
                height: 7,
                width: 7,
                channels: 512
            })
        );

        graph.push(LayerSpec::Flatten).unwrap();
        let assembled = graph.finish().unwrap();
        let params: usize = assembled.layers.iter().map(|l| l.params).sum();
        assert_eq!(params, 14_714_688);
    }

    #[test]
    fn test_input_checks() {
        let random = WeightSource::Random;
        let pretrained = WeightSource::file("vgg16");

        assert!(check_input(InputShape::new(224, 224, 3), &pretrained).is_ok());
        assert!(check_input(InputShape::new(224, 224, 1), &random).is_ok());
        assert!(matches!(
            check_input(InputShape::new(224, 224, 1), &pretrained),
            Err(Error::Shape(_))
        ));
        assert!(matches!(
            check_input(InputShape::new(31, 224, 3), &random),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn test_missing_weight_file() {
        let device = Default::default();
        let source = WeightSource::file("/nonexistent/vgg16_imagenet");
        let result = vgg16_features::<TestBackend>(InputShape::imagenet(), &source, &device);
        assert!(matches!(result, Err(Error::WeightsUnavailable(_))));
    }

    fn first_conv_weights(stack: &FeatureStack<TestBackend>) -> Tensor<TestBackend, 4> {
        match &stack.layers[0] {
            SpatialLayer::Conv(layer) => layer.conv.weight.val(),
            other => panic!("expected a convolution, got {:?}", other),
        }
    }

    #[test]
    fn test_weights_round_trip_through_file() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vgg16");
        let input = InputShape::new(32, 32, 3);

        let original = vgg16_features::<TestBackend>(input, &WeightSource::Random, &device).unwrap();
        original
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .unwrap();

        // Both spellings of the path resolve to the same record
        for source in [WeightSource::file(&path), WeightSource::file(path.with_extension("mpk"))] {
            let loaded = vgg16_features::<TestBackend>(input, &source, &device).unwrap();
            assert_eq!(loaded.layers.len(), original.layers.len());

            // The compact recorder stores half precision
            let diff: f32 = (first_conv_weights(&original) - first_conv_weights(&loaded))
                .abs()
                .max()
                .into_scalar()
                .elem();
            assert!(diff < 1e-3, "weights differ by {}", diff);
        }
    }

    #[test]
    fn test_record_with_other_channel_count_rejected() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vgg16_grayscale");

        vgg16_features::<TestBackend>(InputShape::new(32, 32, 1), &WeightSource::Random, &device)
            .unwrap()
            .save_file(path.clone(), &CompactRecorder::new())
            .unwrap();

        let result = vgg16_features::<TestBackend>(
            InputShape::new(32, 32, 3),
            &WeightSource::file(&path),
            &device,
        );
        match result {
            Err(Error::Record(message)) => assert!(message.contains("layer 0")),
            other => panic!("expected a record error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_feature_stack_forward_shape() {
        let device = Default::default();
        let input = InputShape::new(64, 32, 3);
        let stack = vgg16_features::<TestBackend>(input, &WeightSource::Random, &device).unwrap();

        let images = Tensor::<TestBackend, 4>::random(input.batch_dims(2), Distribution::Default, &device);
        assert_eq!(stack.forward(images).dims(), [2, 512, 2, 1]);
    }
}
