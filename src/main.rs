use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fixmatch_datasets::datasets::Registry;
use fixmatch_datasets::driver::{self, Outcome};
use fixmatch_datasets::Config;

/// Download image datasets and write them as TFRecord files of PNG images
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Datasets to prepare; every configured dataset when none are given
    datasets: Vec<String>,

    /// Directory the .tfrecord files are written to
    #[arg(long, env = "ML_DATA")]
    data_dir: PathBuf,

    /// Root of the local image folder dataset (train/0, train/1, test/0, test/1)
    #[arg(long, env = "VOETS_DIR")]
    voets_dir: Option<PathBuf>,

    /// Previously downloaded STL-10 archive, used instead of downloading when it exists
    #[arg(long, default_value = "stl10/stl10_binary.tar.gz")]
    stl10_archive: PathBuf,

    /// Side length images from the local folder are resized to
    #[arg(long, default_value_t = 100)]
    image_size: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config {
        data_dir: args.data_dir,
        voets_dir: args.voets_dir,
        stl10_archive: args.stl10_archive,
        folder_image_size: args.image_size,
    };
    let registry = Registry::standard(&config);

    let now = Instant::now();
    let report = driver::prepare(&registry, &args.datasets, &config)?;
    let skipped = report
        .iter()
        .filter(|(_, outcome)| *outcome == Outcome::Skipped)
        .count();
    info!(
        "Done: {} prepared, {} skipped [{}ms]",
        report.len() - skipped,
        skipped,
        now.elapsed().as_millis()
    );
    Ok(())
}
