use clap::Parser;
use tracing_subscriber::EnvFilter;

use posepipe_core::TextureTransform;
use posepipe_nn::{BuiltinModel, FileModel, ModelAssetProvider};
use posepipe_pipeline::PoseEstimator;

mod cli;

use cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("posepipe v{}", env!("CARGO_PKG_VERSION"));

    let capabilities = cli.capabilities();
    let config = cli.pipeline_config()?;
    let model: Box<dyn ModelAssetProvider> = match &cli.model {
        Some(path) => Box::new(FileModel::new(path)),
        None => Box::new(BuiltinModel),
    };

    match &cli.command {
        Command::Estimate {
            input,
            synthetic,
            format,
            view,
        } => {
            let image = match input {
                Some(path) if !synthetic => cli::load_image(path)?,
                _ => cli::synthetic_image()?,
            };
            let transform = cli::texture_transform(&image, view)?;
            let mut estimator =
                PoseEstimator::build(&config, capabilities, model.as_ref(), transform)?;
            let pose = estimator.estimate(&image)?;
            cli::print_pose(&pose, format)?;
        }
        Command::BenchFrames {
            input,
            frames,
            warmup,
            buffers,
            view,
        } => {
            let image = match input {
                Some(path) => cli::load_image(path)?,
                None => cli::synthetic_image()?,
            };
            let transform = cli::texture_transform(&image, view)?;
            let mut estimator =
                PoseEstimator::build(&config, capabilities, model.as_ref(), transform)?;
            let stats = cli::bench_frames(&mut estimator, &image, *frames, *warmup, *buffers)?;
            println!(
                "{} frames | mean render:{:.2}ms ml:{:.2}ms total:{:.2}ms | min {:.2}ms max {:.2}ms | tier {:?}",
                stats.frames,
                stats.mean.render_ms,
                stats.mean.ml_ms,
                stats.mean.total_ms(),
                stats.min_total_ms,
                stats.max_total_ms,
                estimator.last_tier(),
            );
        }
        Command::Info => {
            let mut estimator = PoseEstimator::build(
                &config,
                capabilities,
                model.as_ref(),
                TextureTransform::identity(),
            )?;
            estimator.estimate(&cli::synthetic_image()?)?;
            cli::print_info(&capabilities, &config, &estimator);
        }
    }

    Ok(())
}
