use std::{env, fs, path::PathBuf, time::Instant};

use camcal::{CalibratorConfig, MonoCalibrator, StereoCalibrator};
use image::{GrayImage, ImageReader};
use serde::Deserialize;
#[cfg(feature = "tracing")]
use tracing_subscriber::EnvFilter;

/// Calibration run, loaded from JSON.
#[derive(Debug, Deserialize)]
struct ExampleConfig {
    /// Left (or only) camera images.
    left: Vec<String>,
    /// Right camera images; present for a stereo run.
    #[serde(default)]
    right: Option<Vec<String>>,
    calibrator: CalibratorConfig,
    /// Where to write `ost.txt`, `*.yaml` and `calibration.json`.
    #[serde(default)]
    output_dir: Option<String>,
}

fn load(paths: &[String]) -> Result<Vec<GrayImage>, Box<dyn std::error::Error>> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        images.push(ImageReader::open(path)?.decode()?.to_luma8());
    }
    Ok(images)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or("usage: calibrate_files <config.json>")?;
    let config: ExampleConfig = serde_json::from_str(&fs::read_to_string(&config_path)?)?;
    let out_dir = PathBuf::from(config.output_dir.as_deref().unwrap_or("calibration"));
    fs::create_dir_all(&out_dir)?;

    let left = load(&config.left)?;
    let started = Instant::now();
    match &config.right {
        Some(right_paths) => {
            let right = load(right_paths)?;
            let cal = StereoCalibrator::from_config(config.calibrator).calibrate(&left, &right)?;
            println!("{}", cal.report());
            let (left_yaml, right_yaml) = cal.yaml();
            fs::write(out_dir.join("ost.txt"), cal.ost())?;
            fs::write(out_dir.join("left.yaml"), left_yaml)?;
            fs::write(out_dir.join("right.yaml"), right_yaml)?;
            fs::write(out_dir.join("calibration.json"), cal.as_message().to_json()?)?;
        }
        None => {
            let cal = MonoCalibrator::from_config(config.calibrator).calibrate(&left)?;
            println!("{}", cal.report());
            fs::write(out_dir.join("ost.txt"), cal.ost())?;
            fs::write(out_dir.join("camera.yaml"), cal.yaml())?;
            fs::write(out_dir.join("calibration.json"), cal.as_message().to_json()?)?;
        }
    }
    println!(
        "calibrated in {:.2}s, results in {}",
        started.elapsed().as_secs_f64(),
        out_dir.display()
    );
    Ok(())
}

fn init_logging() {
    #[cfg(feature = "tracing")]
    {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = camcal::core::init_with_level(log::LevelFilter::Info);
    }
}
