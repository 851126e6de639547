use std::fs::File;
use std::path::PathBuf;

use adaptive_sgd::core::{Image, MeanSquaresMetric, RandomSampler};
use adaptive_sgd::io::{save_covariance_matrix, write_progress_csv};
use adaptive_sgd::observers::{ProgressLogger, ProgressRecorder};
use adaptive_sgd::optimizer::{AdaptiveStochasticGradientDescent, ResolutionProblem};
use adaptive_sgd::transform::{AffineTransform, BSplineTransform, Transform, TranslationTransform};
use adaptive_sgd::{AsgdConfig, AsgdResult, init_logger};
use clap::Parser;
use nalgebra::DVector;
use tracing::info;

#[derive(Parser)]
#[command(name = "asgd_register")]
#[command(about = "Register a synthetic 2D image pair with adaptive stochastic gradient descent")]
struct Args {
    /// Transform model: "translation", "affine" or "bspline"
    #[arg(short, long, default_value = "affine")]
    transform: String,

    /// Number of resolution levels (coarsest first)
    #[arg(short, long, default_value = "2")]
    levels: usize,

    /// Maximum number of iterations per resolution (overrides the parameter file)
    #[arg(short, long)]
    max_iterations: Option<usize>,

    /// Random samples drawn per iteration
    #[arg(short, long, default_value = "2000")]
    samples: usize,

    /// Optional elastix-style parameter file
    #[arg(short, long)]
    parameter_file: Option<PathBuf>,

    /// Seed for the iteration sampler
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Optional path for a CSV with per-iteration progress
    #[arg(long)]
    progress_csv: Option<PathBuf>,

    /// Optional path for the last saved covariance matrix
    #[arg(long)]
    covariance_output: Option<PathBuf>,
}

/// Physical extent of the synthetic images.
const EXTENT: f64 = 128.0;
/// Voxels per dimension at the finest level.
const FINEST_SIZE: usize = 128;

fn scene(point: &DVector<f64>, shift: (f64, f64)) -> f64 {
    let blobs = [(40.0, 50.0, 12.0), (85.0, 70.0, 18.0), (60.0, 95.0, 9.0)];
    blobs
        .iter()
        .map(|&(cx, cy, width)| {
            let dx = point[0] - cx - shift.0;
            let dy = point[1] - cy - shift.1;
            (-(dx * dx + dy * dy) / (2.0 * width * width)).exp()
        })
        .sum()
}

/// Fixed and moving image of one level; level 0 is the coarsest.
fn image_pair(level: usize, levels: usize) -> AsgdResult<(Image, Image)> {
    let factor = 1usize << (levels - 1 - level);
    let size = (FINEST_SIZE / factor).max(8);
    let spacing = EXTENT / size as f64;
    let fixed = Image::from_fn(vec![size, size], vec![spacing; 2], vec![0.0; 2], |p| {
        scene(p, (0.0, 0.0))
    })?;
    let moving = Image::from_fn(vec![size, size], vec![spacing; 2], vec![0.0; 2], |p| {
        scene(p, (4.0, -3.0))
    })?;
    Ok((fixed, moving))
}

fn run<T: Transform + Clone + 'static>(args: &Args, config: AsgdConfig, transform: T) -> AsgdResult<()> {
    let levels = args.levels.max(1);
    let mut optimizer = AdaptiveStochasticGradientDescent::new(config);
    let recorder = ProgressRecorder::new();
    optimizer.add_observer(ProgressLogger::every(50));
    optimizer.add_observer(recorder.clone());

    let mut position = transform.parameters();
    for level in 0..levels {
        let (fixed, moving) = image_pair(level, levels)?;
        let moving_spacing = moving.mean_spacing();
        let metric = MeanSquaresMetric::new(moving, transform.clone())?;
        let mut sampler = RandomSampler::new(args.samples, args.seed.wrapping_add(level as u64));

        let problem = ResolutionProblem::new(&metric, &transform, &fixed, &mut sampler)
            .with_moving_spacing(moving_spacing);
        let result = optimizer.optimize_resolution(level, problem, &position)?;
        info!(
            "Level {}: {} | cost {:.6e} -> {:.6e} | {} iterations in {:?}",
            level, result.status, result.init_cost, result.final_cost, result.iterations, result.elapsed_time
        );
        position = result.parameters;
    }

    if position.len() <= 12 {
        info!("Final parameters: {}", position.transpose());
    }

    if let Some(path) = &args.progress_csv {
        write_progress_csv(File::create(path)?, &recorder.records())?;
        info!("Progress written to {}", path.display());
    }
    if let Some(path) = &args.covariance_output {
        match optimizer.covariance_snapshot() {
            Some(snapshot) => {
                save_covariance_matrix(path, snapshot)?;
                info!("Covariance matrix written to {}", path.display());
            }
            None => info!("No covariance matrix saved; enable SaveCovarianceMatrix"),
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let args = Args::parse();

    let mut config = match &args.parameter_file {
        Some(path) => AsgdConfig::from_parameter_file(path)?,
        None => AsgdConfig::default(),
    };
    if let Some(iterations) = args.max_iterations {
        config = config.with_max_iterations(iterations);
    }

    let center = DVector::from_element(2, EXTENT / 2.0);
    match args.transform.as_str() {
        "translation" => run(&args, config, TranslationTransform::identity(2))?,
        "affine" => {
            // Rotation-like parameters are much more sensitive than translations.
            if config.scales.is_empty() {
                config = config.with_scales(vec![1e4, 1e4, 1e4, 1e4, 1.0, 1.0]);
            }
            run(&args, config, AffineTransform::identity(center)?)?
        }
        "bspline" => {
            let transform = BSplineTransform::covering(&[0.0, 0.0], &[EXTENT, EXTENT], &[32.0, 32.0])?;
            run(&args, config, transform)?
        }
        other => {
            return Err(format!("unknown transform '{other}', expected translation, affine or bspline").into());
        }
    }
    Ok(())
}
