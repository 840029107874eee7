//! `agri-advisor <IMAGE> <CROP> [--format <FORMAT>]`
//!
//! Runs one detection and prints the result as JSON. The format defaults to
//! the one guessed from the file extension.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use agri_advisor::config::{self, DetectionConfig};
use agri_advisor::pipeline::classify::scorer::{ImageScorer, UnconfiguredScorer};
use agri_advisor::pipeline::recommend::ReferenceTable;
use agri_advisor::DetectionPipeline;

/// Diagnose a crop disease from a field photo
#[derive(Parser, Debug)]
#[command(name = "agri-advisor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Crop disease detection and treatment advice from a field photo", long_about = None)]
struct Args {
    /// Photo of the affected plant (JPEG or PNG)
    image: PathBuf,

    /// Crop in the photo (rice, wheat, maize, tomato, potato)
    crop: String,

    /// Declared image format (MIME type, `jpeg` or `png`). Guessed from the extension when omitted
    #[arg(long)]
    format: Option<String>,
}

impl Args {
    fn declared_format(&self) -> String {
        self.format
            .clone()
            .unwrap_or_else(|| guess_format(&self.image))
    }
}

fn guess_format(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    agri_advisor::init_tracing();
    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    let path = args.image.as_path();
    let format = args.declared_format();

    let config = match DetectionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(78);
        }
    };
    let reference = match ReferenceTable::builtin() {
        Ok(table) => Arc::new(table),
        Err(e) => {
            eprintln!("reference table error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("cannot read {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let scorer = load_scorer(&config);
    let pipeline = DetectionPipeline::new(config, scorer, reference);

    match pipeline.detect(&bytes, &format, &args.crop).await {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("cannot serialize result: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("invalid input ({}): {e}", e.reason());
            ExitCode::from(2)
        }
    }
}

#[cfg(feature = "onnx-classifier")]
fn load_scorer(config: &DetectionConfig) -> Arc<dyn ImageScorer> {
    use agri_advisor::pipeline::classify::OnnxScorer;

    match OnnxScorer::load(&config.model_dir) {
        Ok(scorer) => {
            tracing::info!(crops = ?scorer.loaded_crops(), "ONNX scorer ready");
            Arc::new(scorer)
        }
        Err(e) => {
            tracing::warn!(error = %e, "ONNX models unavailable, detection will be degraded");
            Arc::new(UnconfiguredScorer)
        }
    }
}

#[cfg(not(feature = "onnx-classifier"))]
fn load_scorer(config: &DetectionConfig) -> Arc<dyn ImageScorer> {
    tracing::warn!(
        model_dir = %config.model_dir.display(),
        "Built without onnx-classifier, detection will be degraded"
    );
    Arc::new(UnconfiguredScorer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_image_and_crop() {
        let args = Args::try_parse_from(["agri-advisor", "leaf.jpg", "rice"]).unwrap();
        assert_eq!(args.image, PathBuf::from("leaf.jpg"));
        assert_eq!(args.crop, "rice");
        assert!(args.format.is_none());
    }

    #[test]
    fn format_guessed_from_extension() {
        let args = Args::try_parse_from(["agri-advisor", "leaf.JPG", "rice"]).unwrap();
        assert_eq!(args.declared_format(), "image/jpeg");

        let args = Args::try_parse_from(["agri-advisor", "leaf.png", "tomato"]).unwrap();
        assert_eq!(args.declared_format(), "image/png");
    }

    #[test]
    fn explicit_format_wins() {
        let args =
            Args::try_parse_from(["agri-advisor", "upload.bin", "maize", "--format", "png"]).unwrap();
        assert_eq!(args.declared_format(), "png");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        let args = Args::try_parse_from(["agri-advisor", "upload", "wheat"]).unwrap();
        assert_eq!(args.declared_format(), "application/octet-stream");
    }

    #[test]
    fn missing_crop_is_usage_error() {
        assert!(Args::try_parse_from(["agri-advisor", "leaf.jpg"]).is_err());
    }
}
