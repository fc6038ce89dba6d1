//! End-to-end models returned by the builders

use burn::tensor::{backend::Backend, Tensor};
use tracing::{info, warn};

use super::layer::{InputShape, LayerSpec};
use super::network::{AssembledGraph, CamOutput, LayerInfo, Network};
use super::trainable::select_trainable;

/// A backbone and head wired into one network, with per-layer metadata
#[derive(Debug, Clone)]
pub struct AssembledModel<B: Backend> {
    network: Network<B>,
    input_shape: InputShape,
    layers: Vec<LayerInfo>,
}

impl<B: Backend> From<AssembledGraph<B>> for AssembledModel<B> {
    fn from(graph: AssembledGraph<B>) -> Self {
        Self {
            network: graph.network,
            input_shape: graph.input_shape,
            layers: graph.layers,
        }
    }
}

impl<B: Backend> AssembledModel<B> {
    /// Images `[batch, channels, height, width]` to probabilities `[batch, classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.network.forward(images)
    }

    /// Forward pass keeping the last convolutional feature maps
    pub fn forward_with_features(&self, images: Tensor<B, 4>) -> CamOutput<B> {
        self.network.forward_with_features(images)
    }

    /// Output layer weights `[channels, classes]`
    pub fn class_weights(&self) -> Option<Tensor<B, 2>> {
        self.network.class_weights()
    }

    pub fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    /// Units of the final dense layer
    pub fn output_classes(&self) -> usize {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| match layer.spec {
                LayerSpec::Dense { units, .. } => Some(units),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn layers(&self) -> &[LayerInfo] {
        &self.layers
    }

    /// Layer positions, input layer included
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|layer| layer.params).sum()
    }

    pub fn trainable_params(&self) -> usize {
        self.layers
            .iter()
            .filter(|layer| layer.trainable)
            .map(|layer| layer.params - layer.statistics)
            .sum()
    }

    pub fn trainable_layer_count(&self) -> usize {
        self.layers.iter().filter(|layer| layer.trainable).count()
    }

    pub fn network(&self) -> &Network<B> {
        &self.network
    }

    pub fn into_network(self) -> Network<B> {
        self.network
    }

    /// Keep the last `count` layers trainable and freeze the rest
    pub fn with_trainable_layers(self, count: usize) -> Self {
        let total = self.layers.len();
        if count > total {
            warn!(
                "Requested {} trainable layers but the model only has {}; training all of them",
                count, total
            );
        }

        let flags: Vec<bool> = select_trainable(self.layers.iter().map(|layer| layer.slot), count)
            .into_iter()
            .map(|(_, trainable)| trainable)
            .collect();
        let network = self.network.apply_trainable(
            self.layers
                .iter()
                .map(|layer| layer.slot)
                .zip(flags.iter().copied()),
        );
        let layers = self
            .layers
            .into_iter()
            .zip(flags)
            .map(|(layer, trainable)| LayerInfo { trainable, ..layer })
            .collect();

        let model = Self {
            network,
            input_shape: self.input_shape,
            layers,
        };
        info!(
            "{} of {} layers trainable ({} trainable parameters)",
            model.trainable_layer_count(),
            total,
            model.trainable_params()
        );
        model
    }
}
