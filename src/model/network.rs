//! Network assembly
//!
//! [`GraphBuilder`] walks an ordered list of [`LayerSpec`]s, propagates shapes
//! explicitly and instantiates the matching Burn modules. The resulting
//! [`Network`] is split by tensor rank: spatial layers operate on
//! `[batch, channels, height, width]`, a single reduction turns feature maps
//! into vectors, and vector layers operate on `[batch, features]`.

use std::collections::HashMap;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation, backend::Backend, Tensor},
};
use serde::Serialize;
use tracing::debug;

use super::layer::{Activation, InputShape, LayerSpec, TensorShape};
use super::trainable::Trainable;
use crate::utils::error::{Error, Result};

/// Softmax over the last dimension
#[derive(Module, Clone, Debug, Default)]
pub struct Softmax;

impl Softmax {
    pub fn new() -> Self {
        Self
    }

    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        activation::softmax(x, D - 1)
    }
}

/// Convolution with an optional fused ReLU
#[derive(Module, Debug)]
pub struct ConvLayer<B: Backend> {
    pub conv: Conv2d<B>,
    pub relu: Option<Relu>,
}

impl<B: Backend> ConvLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        match &self.relu {
            Some(relu) => relu.forward(x),
            None => x,
        }
    }
}

/// Fully connected projection with an optional activation
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    pub linear: Linear<B>,
    pub relu: Option<Relu>,
    pub softmax: Option<Softmax>,
}

impl<B: Backend> DenseLayer<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = match &self.relu {
            Some(relu) => relu.forward(x),
            None => x,
        };
        match &self.softmax {
            Some(softmax) => softmax.forward(x),
            None => x,
        }
    }
}

/// Layers operating on feature maps
#[derive(Module, Debug)]
pub enum SpatialLayer<B: Backend> {
    Conv(ConvLayer<B>),
    MaxPool(MaxPool2d),
    AvgPool(AvgPool2d),
}

impl<B: Backend> SpatialLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            SpatialLayer::Conv(layer) => layer.forward(x),
            SpatialLayer::MaxPool(pool) => pool.forward(x),
            SpatialLayer::AvgPool(pool) => pool.forward(x),
        }
    }
}

/// Layers operating on feature vectors
#[derive(Module, Debug)]
pub enum VectorLayer<B: Backend> {
    Dense(DenseLayer<B>),
    BatchNorm(BatchNorm<B, 0>),
    Relu(Relu),
    Dropout(Dropout),
}

impl<B: Backend> VectorLayer<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            VectorLayer::Dense(layer) => layer.forward(x),
            VectorLayer::BatchNorm(norm) => norm.forward(x),
            VectorLayer::Relu(relu) => relu.forward(x),
            VectorLayer::Dropout(dropout) => dropout.forward(x),
        }
    }
}

/// Spatial-to-vector transition: plain flattening, or global average pooling first
#[derive(Module, Clone, Debug)]
pub struct Reduction {
    pub global_pool: Option<AdaptiveAvgPool2d>,
}

impl Reduction {
    pub fn flatten() -> Self {
        Self { global_pool: None }
    }

    pub fn global_average() -> Self {
        Self {
            global_pool: Some(AdaptiveAvgPool2dConfig::new([1, 1]).init()),
        }
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = match &self.global_pool {
            Some(pool) => pool.forward(x),
            None => x,
        };
        x.flatten(1, 3)
    }
}

/// A run of spatial layers, e.g. a backbone, as a standalone module.
///
/// This is the record layout expected for pretrained backbone weights.
#[derive(Module, Debug)]
pub struct FeatureStack<B: Backend> {
    pub layers: Vec<SpatialLayer<B>>,
}

impl<B: Backend> FeatureStack<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers.iter().fold(x, |x, layer| layer.forward(x))
    }
}

/// Where a layer lives inside a [`Network`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LayerSlot {
    Input,
    Feature(usize),
    Reduction,
    Classifier(usize),
}

/// Description of one assembled layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerInfo {
    pub name: String,
    pub spec: LayerSpec,
    pub output_shape: TensorShape,
    /// All values owned by the layer, running statistics included
    pub params: usize,
    /// Values excluded from training regardless of `trainable`
    pub statistics: usize,
    pub trainable: bool,
    pub slot: LayerSlot,
}

/// Intermediate activations needed for class activation maps
#[derive(Debug, Clone)]
pub struct CamOutput<B: Backend> {
    /// Output of the last spatial layer: `[batch, channels, height, width]`
    pub feature_maps: Tensor<B, 4>,
    /// Class probabilities: `[batch, num_classes]`
    pub probabilities: Tensor<B, 2>,
}

/// Image-to-probabilities network
#[derive(Module, Debug)]
pub struct Network<B: Backend> {
    pub features: Vec<SpatialLayer<B>>,
    pub reduction: Reduction,
    pub classifier: Vec<VectorLayer<B>>,
}

impl<B: Backend> Network<B> {
    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, channels, height, width]
    ///
    /// # Returns
    /// * Tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_with_features(x).probabilities
    }

    /// Forward pass that also returns the last feature maps before the reduction
    pub fn forward_with_features(&self, x: Tensor<B, 4>) -> CamOutput<B> {
        let feature_maps = self.features.iter().fold(x, |x, layer| layer.forward(x));
        let x = self.reduction.forward(feature_maps.clone());
        let probabilities = self.classifier.iter().fold(x, |x, layer| layer.forward(x));

        CamOutput {
            feature_maps,
            probabilities,
        }
    }

    /// Weights of the final dense layer, shaped `[input_features, num_classes]`
    pub fn class_weights(&self) -> Option<Tensor<B, 2>> {
        match self.classifier.last() {
            Some(VectorLayer::Dense(dense)) => Some(dense.linear.weight.val()),
            _ => None,
        }
    }

    /// Set `require_grad` on every parameterized layer according to `flags`.
    ///
    /// Layers not mentioned keep the default of trainable.
    pub fn apply_trainable<I>(self, flags: I) -> Self
    where
        I: IntoIterator<Item = (LayerSlot, bool)>,
    {
        let mut feature_flags = vec![true; self.features.len()];
        let mut classifier_flags = vec![true; self.classifier.len()];

        for (slot, trainable) in flags {
            let flag = match slot {
                LayerSlot::Feature(index) => feature_flags.get_mut(index),
                LayerSlot::Classifier(index) => classifier_flags.get_mut(index),
                LayerSlot::Input | LayerSlot::Reduction => None,
            };
            if let Some(flag) = flag {
                *flag = trainable;
            }
        }

        Self {
            features: self
                .features
                .into_iter()
                .zip(feature_flags)
                .map(|(layer, trainable)| layer.set_trainable(trainable))
                .collect(),
            reduction: self.reduction,
            classifier: self
                .classifier
                .into_iter()
                .zip(classifier_flags)
                .map(|(layer, trainable)| layer.set_trainable(trainable))
                .collect(),
        }
    }
}

impl<B: Backend> Trainable for SpatialLayer<B> {
    fn set_trainable(self, trainable: bool) -> Self {
        match self {
            SpatialLayer::Conv(layer) => SpatialLayer::Conv(ConvLayer {
                conv: layer.conv.set_trainable(trainable),
                relu: layer.relu,
            }),
            other => other,
        }
    }
}

impl<B: Backend> Trainable for VectorLayer<B> {
    fn set_trainable(self, trainable: bool) -> Self {
        match self {
            VectorLayer::Dense(layer) => VectorLayer::Dense(DenseLayer {
                linear: layer.linear.set_trainable(trainable),
                relu: layer.relu,
                softmax: layer.softmax,
            }),
            VectorLayer::BatchNorm(norm) => VectorLayer::BatchNorm(norm.set_trainable(trainable)),
            other => other,
        }
    }
}

/// Everything produced by a finished [`GraphBuilder`]
#[derive(Debug)]
pub struct AssembledGraph<B: Backend> {
    pub network: Network<B>,
    pub input_shape: InputShape,
    pub layers: Vec<LayerInfo>,
}

/// Incremental, shape-checked construction of a [`Network`]
pub struct GraphBuilder<'a, B: Backend> {
    device: &'a B::Device,
    input_shape: Option<InputShape>,
    shape: Option<TensorShape>,
    features: Vec<SpatialLayer<B>>,
    reduction: Option<Reduction>,
    classifier: Vec<VectorLayer<B>>,
    layers: Vec<LayerInfo>,
    name_counts: HashMap<&'static str, usize>,
}

impl<'a, B: Backend> GraphBuilder<'a, B> {
    pub fn new(device: &'a B::Device) -> Self {
        Self {
            device,
            input_shape: None,
            shape: None,
            features: Vec::new(),
            reduction: None,
            classifier: Vec::new(),
            layers: Vec::new(),
            name_counts: HashMap::new(),
        }
    }

    /// Shape produced by the last pushed layer
    pub fn output_shape(&self) -> Option<TensorShape> {
        self.shape
    }

    /// Number of layers pushed so far
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Append a layer with a generated Keras-style name (`dense`, `dense_1`, ...)
    pub fn push(&mut self, spec: LayerSpec) -> Result<()> {
        let kind = spec.kind();
        let count = self.name_counts.get(kind).copied().unwrap_or(0);
        let name = if count == 0 {
            kind.to_string()
        } else {
            format!("{}_{}", kind, count)
        };

        self.push_named(name, spec)?;
        self.name_counts.insert(kind, count + 1);
        Ok(())
    }

    /// Append several layers with generated names
    pub fn extend<I>(&mut self, specs: I) -> Result<()>
    where
        I: IntoIterator<Item = LayerSpec>,
    {
        for spec in specs {
            self.push(spec)?;
        }
        Ok(())
    }

    /// Append a layer under an explicit name
    pub fn push_named(&mut self, name: impl Into<String>, spec: LayerSpec) -> Result<()> {
        let name = name.into();

        let input = match (&spec, self.shape) {
            (LayerSpec::Input { shape }, None) => TensorShape::from(*shape),
            (LayerSpec::Input { .. }, Some(_)) => {
                return Err(Error::Shape(format!(
                    "input layer '{}' must be the first layer",
                    name
                )))
            }
            (_, None) => {
                return Err(Error::Shape(format!(
                    "layer '{}' has no input; a topology must start with an input layer",
                    name
                )))
            }
            (_, Some(shape)) => shape,
        };

        let output = spec.output_shape(input)?;
        let params = spec.parameter_count(input);
        let statistics = spec.statistics_count(input);
        let slot = self.instantiate(&spec, input);

        debug!(
            "{:<28} {:<28} {:>10} params",
            name,
            output.to_string(),
            params
        );

        if let LayerSpec::Input { shape } = spec {
            self.input_shape = Some(shape);
        }
        self.shape = Some(output);
        self.layers.push(LayerInfo {
            name,
            spec,
            output_shape: output,
            params,
            statistics,
            trainable: true,
            slot,
        });

        Ok(())
    }

    /// Instantiate the Burn module for an already shape-checked spec
    fn instantiate(&mut self, spec: &LayerSpec, input: TensorShape) -> LayerSlot {
        let device = self.device;

        match *spec {
            LayerSpec::Input { .. } => LayerSlot::Input,
            LayerSpec::Conv2d {
                filters,
                kernel,
                activation,
            } => {
                let channels = match input {
                    TensorShape::Spatial { channels, .. } => channels,
                    TensorShape::Vector { features } => features,
                };
                let conv = Conv2dConfig::new([channels, filters], [kernel, kernel])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device);
                let relu = (activation == Activation::Relu).then(Relu::new);
                self.push_feature(SpatialLayer::Conv(ConvLayer { conv, relu }))
            }
            LayerSpec::MaxPool2d { pool } => self.push_feature(SpatialLayer::MaxPool(
                MaxPool2dConfig::new([pool, pool])
                    .with_strides([pool, pool])
                    .init(),
            )),
            LayerSpec::AveragePool2d { pool } => self.push_feature(SpatialLayer::AvgPool(
                AvgPool2dConfig::new([pool, pool])
                    .with_strides([pool, pool])
                    .init(),
            )),
            LayerSpec::GlobalAveragePool2d => {
                self.reduction = Some(Reduction::global_average());
                LayerSlot::Reduction
            }
            LayerSpec::Flatten => {
                self.reduction = Some(Reduction::flatten());
                LayerSlot::Reduction
            }
            LayerSpec::Dense { units, activation } => {
                let linear = LinearConfig::new(input.size(), units).init(device);
                let dense = DenseLayer {
                    linear,
                    relu: (activation == Activation::Relu).then(Relu::new),
                    softmax: (activation == Activation::Softmax).then(Softmax::new),
                };
                self.push_classifier(VectorLayer::Dense(dense))
            }
            LayerSpec::BatchNorm => {
                let norm = BatchNormConfig::new(input.size()).init(device);
                self.push_classifier(VectorLayer::BatchNorm(norm))
            }
            LayerSpec::Relu => self.push_classifier(VectorLayer::Relu(Relu::new())),
            LayerSpec::Dropout { rate } => {
                self.push_classifier(VectorLayer::Dropout(DropoutConfig::new(rate).init()))
            }
        }
    }

    fn push_feature(&mut self, layer: SpatialLayer<B>) -> LayerSlot {
        self.features.push(layer);
        LayerSlot::Feature(self.features.len() - 1)
    }

    fn push_classifier(&mut self, layer: VectorLayer<B>) -> LayerSlot {
        self.classifier.push(layer);
        LayerSlot::Classifier(self.classifier.len() - 1)
    }

    /// Replace the spatial layers pushed so far, e.g. with pretrained weights.
    ///
    /// Only allowed before the reduction; the transform must keep the layer count.
    pub fn map_features<F>(&mut self, transform: F) -> Result<()>
    where
        F: FnOnce(FeatureStack<B>) -> Result<FeatureStack<B>>,
    {
        if self.reduction.is_some() {
            return Err(Error::Shape(
                "feature layers are sealed once the network has been reduced".to_string(),
            ));
        }

        let expected = self.features.len();
        let stack = transform(FeatureStack {
            layers: std::mem::take(&mut self.features),
        })?;
        if stack.layers.len() != expected {
            return Err(Error::Shape(format!(
                "feature stack changed from {} to {} layers",
                expected,
                stack.layers.len()
            )));
        }
        self.features = stack.layers;

        Ok(())
    }

    /// Keep only the spatial layers pushed so far
    pub fn into_feature_stack(self) -> FeatureStack<B> {
        FeatureStack {
            layers: self.features,
        }
    }

    /// Seal the topology
    pub fn finish(self) -> Result<AssembledGraph<B>> {
        let input_shape = self.input_shape.ok_or_else(|| {
            Error::Shape("a topology must start with an input layer".to_string())
        })?;
        let reduction = self.reduction.ok_or_else(|| {
            Error::Shape("feature maps are never reduced to a vector".to_string())
        })?;

        Ok(AssembledGraph {
            network: Network {
                features: self.features,
                reduction,
                classifier: self.classifier,
            },
            input_shape,
            layers: self.layers,
        })
    }
}
