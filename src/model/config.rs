//! Model Configuration Module
//!
//! Hyperparameters of the two model variants and the builders turning them
//! into [`AssembledModel`]s.

use std::path::PathBuf;

use burn::{config::Config, tensor::backend::Backend};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::assembled::AssembledModel;
use super::backbone::{push_vgg16, WeightSource};
use super::head::{cam_head, classifier_head};
use super::layer::InputShape;
use super::network::GraphBuilder;
use crate::utils::error::{self, Error};

/// Configuration for the VGG16 classifier
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// Input image shape (height, width, channels)
    #[config(default = "InputShape::imagenet()")]
    pub input_size: InputShape,

    /// Units of the hidden dense layer
    #[config(default = "64")]
    pub hidden_size: usize,

    /// Dropout rate after the hidden layer, in [0, 1)
    #[config(default = "0.5")]
    pub dropout: f64,

    /// Number of output classes
    #[config(default = "3")]
    pub num_classes: usize,

    /// How many trailing layers stay trainable
    #[config(default = "3")]
    pub trainable_layers: usize,
}

impl ClassifierConfig {
    pub fn validate(&self) -> error::Result<()> {
        check_num_classes(self.num_classes)?;

        if self.hidden_size == 0 {
            return Err(Error::InvalidArgument(
                "hidden_size must be greater than 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidArgument(format!(
                "dropout must be in range [0.0, 1.0), got {}",
                self.dropout
            )));
        }

        Ok(())
    }

    /// Build the classifier on `device`
    pub fn init<B: Backend>(
        &self,
        weights: &WeightSource,
        device: &B::Device,
    ) -> error::Result<AssembledModel<B>> {
        build_model(self, weights, device)
    }
}

/// Configuration for the class-activation-map variant
#[derive(Config, Debug)]
pub struct CamConfig {
    /// Input image shape (height, width, channels)
    #[config(default = "InputShape::imagenet()")]
    pub input_size: InputShape,

    /// Number of output classes
    #[config(default = "3")]
    pub num_classes: usize,

    /// How many trailing layers stay trainable
    #[config(default = "3")]
    pub trainable_layers: usize,
}

impl CamConfig {
    pub fn validate(&self) -> error::Result<()> {
        check_num_classes(self.num_classes)
    }

    /// Build the CAM model on `device`
    pub fn init<B: Backend>(
        &self,
        weights: &WeightSource,
        device: &B::Device,
    ) -> error::Result<AssembledModel<B>> {
        build_cam_model(self, weights, device)
    }
}

fn check_num_classes(num_classes: usize) -> error::Result<()> {
    if num_classes == 0 {
        return Err(Error::InvalidArgument(
            "num_classes must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// VGG16 backbone with the pooling/dense/batch-norm classification head
pub fn build_model<B: Backend>(
    config: &ClassifierConfig,
    weights: &WeightSource,
    device: &B::Device,
) -> error::Result<AssembledModel<B>> {
    config.validate()?;

    let mut graph = GraphBuilder::<B>::new(device);
    push_vgg16(&mut graph, config.input_size, weights, device)?;
    graph.extend(classifier_head(
        config.hidden_size,
        config.dropout,
        config.num_classes,
    ))?;

    let model = AssembledModel::from(graph.finish()?);
    info!(
        "Built VGG16 classifier: input {}, {} classes, {} layers, {} parameters",
        model.input_shape(),
        model.output_classes(),
        model.num_layers(),
        model.total_params()
    );

    Ok(model.with_trainable_layers(config.trainable_layers))
}

/// VGG16 backbone with global average pooling and a single softmax layer
pub fn build_cam_model<B: Backend>(
    config: &CamConfig,
    weights: &WeightSource,
    device: &B::Device,
) -> error::Result<AssembledModel<B>> {
    config.validate()?;

    let mut graph = GraphBuilder::<B>::new(device);
    push_vgg16(&mut graph, config.input_size, weights, device)?;
    graph.extend(cam_head(config.num_classes))?;

    let model = AssembledModel::from(graph.finish()?);
    info!(
        "Built VGG16 CAM model: input {}, {} classes, {} layers, {} parameters",
        model.input_shape(),
        model.output_classes(),
        model.num_layers(),
        model.total_params()
    );

    Ok(model.with_trainable_layers(config.trainable_layers))
}

/// Which head to put on the backbone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    #[default]
    Classifier,
    Cam,
}

impl std::str::FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> error::Result<Self> {
        match s.to_lowercase().as_str() {
            "classifier" => Ok(Architecture::Classifier),
            "cam" => Ok(Architecture::Cam),
            other => Err(Error::InvalidArgument(format!(
                "unknown architecture '{}', expected 'classifier' or 'cam'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::Classifier => write!(f, "classifier"),
            Architecture::Cam => write!(f, "cam"),
        }
    }
}

/// Everything needed to build a model, as stored in a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    #[serde(default)]
    pub architecture: Architecture,

    /// Backbone record; random initialization when absent
    #[serde(default)]
    pub weights: Option<PathBuf>,

    #[serde(default = "ClassifierConfig::new")]
    pub classifier: ClassifierConfig,

    #[serde(default = "CamConfig::new")]
    pub cam: CamConfig,
}

impl Default for ModelFile {
    fn default() -> Self {
        Self {
            architecture: Architecture::default(),
            weights: None,
            classifier: ClassifierConfig::new(),
            cam: CamConfig::new(),
        }
    }
}

impl ModelFile {
    pub fn weight_source(&self) -> WeightSource {
        match &self.weights {
            Some(path) => WeightSource::file(path),
            None => WeightSource::Random,
        }
    }

    pub fn input_size(&self) -> InputShape {
        match self.architecture {
            Architecture::Classifier => self.classifier.input_size,
            Architecture::Cam => self.cam.input_size,
        }
    }

    /// Build the selected architecture
    pub fn build<B: Backend>(&self, device: &B::Device) -> error::Result<AssembledModel<B>> {
        let weights = self.weight_source();
        match self.architecture {
            Architecture::Classifier => build_model(&self.classifier, &weights, device),
            Architecture::Cam => build_cam_model(&self.cam, &weights, device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::module::Module;

    use crate::model::layer::{Activation, LayerSpec};

    type TestBackend = NdArray;

    #[test]
    fn test_defaults() {
        let config = ClassifierConfig::new();
        assert_eq!(config.input_size, InputShape::new(224, 224, 3));
        assert_eq!(config.hidden_size, 64);
        assert_eq!(config.dropout, 0.5);
        assert_eq!(config.num_classes, 3);
        assert_eq!(config.trainable_layers, 3);

        let cam = CamConfig::new();
        assert_eq!(cam.num_classes, 3);
        assert_eq!(cam.trainable_layers, 3);
    }

    #[test]
    fn test_validation() {
        assert!(ClassifierConfig::new().validate().is_ok());
        assert!(ClassifierConfig::new().with_num_classes(0).validate().is_err());
        assert!(ClassifierConfig::new().with_hidden_size(0).validate().is_err());
        assert!(ClassifierConfig::new().with_dropout(1.0).validate().is_err());
        assert!(ClassifierConfig::new().with_dropout(-0.1).validate().is_err());
        assert!(ClassifierConfig::new().with_dropout(0.0).validate().is_ok());
        assert!(CamConfig::new().with_num_classes(0).validate().is_err());
    }

    #[test]
    fn test_classifier_layout() {
        let device = Default::default();
        let model = ClassifierConfig::new()
            .init::<TestBackend>(&WeightSource::Random, &device)
            .unwrap();

        assert_eq!(model.num_layers(), 26);
        assert_eq!(model.total_params(), 14_747_971);
        assert_eq!(model.network().num_params(), model.total_params());

        // Everything trainable except the batch norm running statistics
        let open = ClassifierConfig::new()
            .with_trainable_layers(26)
            .init::<TestBackend>(&WeightSource::Random, &device)
            .unwrap();
        assert_eq!(open.trainable_params(), 14_747_971 - 128);

        let names: Vec<&str> = model.layers()[19..].iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "average_pooling2d",
                "flatten",
                "dense",
                "batch_normalization",
                "re_lu",
                "dropout",
                "dense_1"
            ]
        );
    }

    #[test]
    fn test_cam_layout() {
        let device = Default::default();
        let model = CamConfig::new()
            .with_num_classes(4)
            .init::<TestBackend>(&WeightSource::Random, &device)
            .unwrap();

        assert_eq!(model.num_layers(), 21);
        assert_eq!(model.layers()[19].spec, LayerSpec::GlobalAveragePool2d);
        assert_eq!(
            model.layers()[20].spec,
            LayerSpec::Dense {
                units: 4,
                activation: Activation::Softmax
            }
        );
    }

    #[test]
    fn test_small_input_rejected_by_head() {
        let device = Default::default();
        let result = ClassifierConfig::new()
            .with_input_size(InputShape::new(100, 100, 3))
            .init::<TestBackend>(&WeightSource::Random, &device);
        assert!(matches!(result, Err(Error::Shape(_))));

        // Global pooling has no minimum beyond the backbone's
        let result = CamConfig::new()
            .with_input_size(InputShape::new(100, 100, 3))
            .init::<TestBackend>(&WeightSource::Random, &device);
        assert!(result.is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.json");

        let config = ClassifierConfig::new()
            .with_hidden_size(128)
            .with_input_size(InputShape::new(256, 256, 3));
        config.save(&path).unwrap();

        let loaded = ClassifierConfig::load(&path).unwrap();
        assert_eq!(loaded.hidden_size, 128);
        assert_eq!(loaded.input_size, InputShape::new(256, 256, 3));
    }

    #[test]
    fn test_architecture_parsing() {
        assert_eq!("CAM".parse::<Architecture>().unwrap(), Architecture::Cam);
        assert_eq!(
            "classifier".parse::<Architecture>().unwrap(),
            Architecture::Classifier
        );
        assert!("resnet".parse::<Architecture>().is_err());
    }

    #[test]
    fn test_model_file_defaults_from_partial_toml() {
        let file: ModelFile = toml::from_str(
            r#"
            architecture = "cam"

            [cam]
            num_classes = 4
            trainable_layers = 2
            input_size = { height = 128, width = 128, channels = 3 }
            "#,
        )
        .unwrap();

        assert_eq!(file.architecture, Architecture::Cam);
        assert_eq!(file.weight_source(), WeightSource::Random);
        assert_eq!(file.input_size(), InputShape::new(128, 128, 3));
        assert_eq!(file.classifier.hidden_size, 64);
    }
}
