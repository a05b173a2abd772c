use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{
    codec, EuclideanMatcher, FaceDetector, FaceEmbedder, FacePipeline, FaceRecognizer, Matcher,
    DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE,
};
use image::{ImageReader, RgbImage};
use serde_json::json;

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate face embedding CLI")]
struct Cli {
    /// Directory holding det_500m.onnx and facenet512.onnx
    /// (default: $FACEGATE_MODEL_DIR, then ~/.local/share/facegate/models)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a face descriptor from a photo
    Enroll {
        /// Photo file (JPEG, PNG, ...)
        image: PathBuf,
    },
    /// Check a photo against a stored descriptor
    Verify {
        /// Photo file (JPEG, PNG, ...)
        image: PathBuf,
        /// Base64 descriptor returned by a previous enroll
        #[arg(short, long)]
        stored: String,
    },
    /// Distance between two stored descriptors (no models needed)
    Compare {
        a: String,
        b: String,
    },
    /// Check that the model files exist and load
    Doctor,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let model_dir = resolve_model_dir(cli.model_dir);

    match cli.command {
        Commands::Enroll { image } => enroll(&model_dir, &image, cli.json),
        Commands::Verify { image, stored } => verify(&model_dir, &image, &stored, cli.json),
        Commands::Compare { a, b } => compare(&a, &b, cli.json),
        Commands::Doctor => doctor(&model_dir, cli.json),
    }
}

fn resolve_model_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var("FACEGATE_MODEL_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(facegate_core::default_model_dir)
}

fn load_photo(path: &Path) -> Result<RgbImage> {
    let image = ImageReader::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("cannot decode {}", path.display()))?;
    Ok(image.into_rgb8())
}

fn enroll(model_dir: &Path, image: &Path, as_json: bool) -> Result<()> {
    let mut pipeline = FacePipeline::load(model_dir)?;
    let extraction = pipeline.embed(&load_photo(image)?)?;
    let descriptor = codec::encode_embedding(&extraction.embedding);

    if as_json {
        println!(
            "{}",
            json!({
                "faceDescriptor": descriptor,
                "dim": extraction.embedding.dim(),
                "model": extraction.embedding.model_version,
                "face": extraction.face,
                "facesFound": extraction.faces_found,
            })
        );
    } else {
        println!("{descriptor}");
    }
    Ok(())
}

fn verify(model_dir: &Path, image: &Path, stored: &str, as_json: bool) -> Result<()> {
    let stored = codec::decode_embedding(stored).context("invalid stored descriptor")?;
    let mut pipeline = FacePipeline::load(model_dir)?;
    let extraction = pipeline.embed(&load_photo(image)?)?;
    let result = EuclideanMatcher::default().compare(&extraction.embedding, &stored)?;

    if as_json {
        println!(
            "{}",
            json!({ "success": result.matched, "distance": result.distance })
        );
    } else {
        let verdict = if result.matched { "match" } else { "no match" };
        println!("{verdict} (distance {:.4})", result.distance);
    }
    Ok(())
}

fn compare(a: &str, b: &str, as_json: bool) -> Result<()> {
    let a = codec::decode_embedding(a).context("invalid first descriptor")?;
    let b = codec::decode_embedding(b).context("invalid second descriptor")?;
    let result = EuclideanMatcher::default().compare(&a, &b)?;

    if as_json {
        println!(
            "{}",
            json!({ "success": result.matched, "distance": result.distance })
        );
    } else {
        println!("{:.4}", result.distance);
    }
    Ok(())
}

fn doctor(model_dir: &Path, as_json: bool) -> Result<()> {
    let detector_path = model_dir.join(DETECTOR_MODEL_FILE);
    let recognizer_path = model_dir.join(RECOGNIZER_MODEL_FILE);

    let detector = FaceDetector::load(&detector_path).map(|_| ()).map_err(|e| e.to_string());
    let recognizer = FaceRecognizer::load(&recognizer_path).map(|_| ()).map_err(|e| e.to_string());

    let healthy = detector.is_ok() && recognizer.is_ok();

    if as_json {
        println!(
            "{}",
            json!({
                "modelDir": model_dir,
                "detector": { "path": detector_path, "error": detector.as_ref().err() },
                "recognizer": { "path": recognizer_path, "error": recognizer.as_ref().err() },
                "ok": healthy,
            })
        );
    } else {
        println!("model dir: {}", model_dir.display());
        for (name, path, status) in [
            ("detector", &detector_path, &detector),
            ("recognizer", &recognizer_path, &recognizer),
        ] {
            match status {
                Ok(()) => println!("  {name:<10} ok     {}", path.display()),
                Err(e) => println!("  {name:<10} FAIL   {e}"),
            }
        }
    }

    if !healthy {
        anyhow::bail!("model check failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_verify() {
        let cli = Cli::try_parse_from(["facegate", "verify", "me.jpg", "--stored", "AACAPw=="]).unwrap();
        match cli.command {
            Commands::Verify { image, stored } => {
                assert_eq!(image, PathBuf::from("me.jpg"));
                assert_eq!(stored, "AACAPw==");
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn test_model_dir_flag_wins() {
        let dir = resolve_model_dir(Some(PathBuf::from("/opt/models")));
        assert_eq!(dir, PathBuf::from("/opt/models"));
    }

    #[test]
    fn test_compare_descriptors() {
        // [1.0] vs [1.0]
        assert!(compare("AACAPw==", "AACAPw==", true).is_ok());
        assert!(compare("AACAPw==", "not base64!", false).is_err());
    }

    #[test]
    fn test_doctor_missing_models_fails() {
        assert!(doctor(Path::new("/nonexistent/models"), true).is_err());
    }
}
