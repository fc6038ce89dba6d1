//! Lung Ultrasound Classifier CLI
//!
//! Builds the VGG16 classifier or its CAM variant from a TOML config and
//! inspects the result.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use burn::tensor::Tensor;
use lus_classifier::backend::{backend_name, default_device, DefaultBackend};
use lus_classifier::model::{Architecture, AssembledModel, InputShape, ModelFile};
use lus_classifier::utils::config::{load_toml_config, save_toml_config};
use lus_classifier::utils::format_number;
use lus_classifier::utils::logging::{init_logging, LogConfig};

/// VGG16-based lung ultrasound classifier
#[derive(Parser, Debug)]
#[command(name = "lus-classifier")]
#[command(author = "Warre Snaet")]
#[command(version)]
#[command(about = "Build and inspect lung ultrasound classifiers with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the layer table of a model
    Summary {
        #[command(flatten)]
        model: ModelArgs,

        /// Print the layers as JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Write a default model config file
    InitConfig {
        /// Output path for the TOML file
        #[arg(short, long, default_value = "model.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Run a zero-valued batch through a model
    Probe {
        #[command(flatten)]
        model: ModelArgs,

        /// Number of images in the batch
        #[arg(short, long, default_value = "1")]
        batch_size: usize,
    },
}

/// Model selection shared by the subcommands; flags override the config file
#[derive(Args, Debug)]
struct ModelArgs {
    /// TOML model config (defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Head to build: classifier or cam
    #[arg(short, long)]
    architecture: Option<Architecture>,

    /// Backbone weights recorded with Burn's CompactRecorder
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Square input size in pixels
    #[arg(long)]
    image_size: Option<usize>,

    /// Number of output classes
    #[arg(long)]
    num_classes: Option<usize>,

    /// Number of trailing layers left trainable
    #[arg(long)]
    trainable_layers: Option<usize>,
}

impl ModelArgs {
    fn resolve(&self) -> Result<ModelFile> {
        let mut file = match &self.config {
            Some(path) => load_toml_config::<ModelFile>(path)
                .with_context(|| format!("Failed to load model config {}", path.display()))?,
            None => ModelFile::default(),
        };

        if let Some(architecture) = self.architecture {
            file.architecture = architecture;
        }
        if let Some(weights) = &self.weights {
            file.weights = Some(weights.clone());
        }

        let classifier = &mut file.classifier;
        let cam = &mut file.cam;
        if let Some(size) = self.image_size {
            let channels = match file.architecture {
                Architecture::Classifier => classifier.input_size.channels,
                Architecture::Cam => cam.input_size.channels,
            };
            classifier.input_size = InputShape::new(size, size, channels);
            cam.input_size = InputShape::new(size, size, channels);
        }
        if let Some(num_classes) = self.num_classes {
            classifier.num_classes = num_classes;
            cam.num_classes = num_classes;
        }
        if let Some(count) = self.trainable_layers {
            classifier.trainable_layers = count;
            cam.trainable_layers = count;
        }

        Ok(file)
    }

    fn build(&self) -> Result<AssembledModel<DefaultBackend>> {
        let file = self.resolve()?;
        let device = default_device();
        info!(
            "Building {} model on {}",
            file.architecture,
            backend_name()
        );

        file.build::<DefaultBackend>(&device)
            .with_context(|| format!("Failed to build the {} model", file.architecture))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };

    if let Err(e) = init_logging(&log_config) {
        eprintln!("{} {}", "Warning:".yellow(), e);
    }

    match cli.command {
        Commands::Summary { model, json } => {
            cmd_summary(&model, json)?;
        }

        Commands::InitConfig { output, force } => {
            cmd_init_config(&output, force)?;
        }

        Commands::Probe { model, batch_size } => {
            cmd_probe(&model, batch_size)?;
        }
    }

    Ok(())
}

fn cmd_summary(args: &ModelArgs, json: bool) -> Result<()> {
    let model = args.build()?;

    if json {
        println!("{}", serde_json::to_string_pretty(model.layers())?);
        return Ok(());
    }

    println!();
    println!(
        "{:<28} {:<26} {:<24} {:>12}  {}",
        "Layer".bold(),
        "Type".bold(),
        "Output Shape".bold(),
        "Params".bold(),
        "Trainable".bold()
    );
    println!("{}", "=".repeat(104));

    for layer in model.layers() {
        let trainable = if layer.trainable {
            "yes".green()
        } else {
            "no".red()
        };
        println!(
            "{:<28} {:<26} {:<24} {:>12}  {}",
            layer.name,
            layer.spec.to_string(),
            layer.output_shape.to_string(),
            format_number(layer.params),
            trainable
        );
    }

    let total = model.total_params();
    let trainable = model.trainable_params();
    println!("{}", "=".repeat(104));
    println!("Total params:         {}", format_number(total).cyan());
    println!("Trainable params:     {}", format_number(trainable).green());
    println!(
        "Non-trainable params: {}",
        format_number(total - trainable).yellow()
    );
    println!(
        "Trainable layers:     {} of {}",
        model.trainable_layer_count(),
        model.num_layers()
    );

    Ok(())
}

fn cmd_init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite it",
            output.display()
        );
    }

    save_toml_config(&ModelFile::default(), output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} Wrote default model config to {}",
        "Done:".green(),
        output.display()
    );
    Ok(())
}

fn cmd_probe(args: &ModelArgs, batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        anyhow::bail!("batch size must be at least 1");
    }

    let model = args.build()?;
    let device = default_device();
    let images = Tensor::<DefaultBackend, 4>::zeros(model.input_shape().batch_dims(batch_size), &device);

    let output = model.forward_with_features(images);
    let sums: Vec<f32> = output
        .probabilities
        .clone()
        .sum_dim(1)
        .into_data()
        .to_vec()
        .map_err(|e| anyhow::anyhow!("Failed to read probabilities: {:?}", e))?;

    println!();
    println!("{}", "Probe".cyan().bold());
    println!("  Backend:       {}", backend_name());
    println!("  Input:         {:?}", model.input_shape().batch_dims(batch_size));
    println!("  Feature maps:  {:?}", output.feature_maps.dims());
    println!("  Probabilities: {:?}", output.probabilities.dims());
    for (index, sum) in sums.iter().enumerate() {
        println!("  Sample {:>3} sums to {:.6}", index, sum);
    }

    Ok(())
}
