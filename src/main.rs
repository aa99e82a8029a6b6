use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::metadata::LevelFilter;

use stage_deepstream_models::{
    stage_artifacts, ArtifactStore, CurlFetcher, IndicatifProgressReporter, NvidiaSmiProbe,
    StageOptions, DEFAULT_BASE_URL, DEFAULT_CONFIG_PATH, DEFAULT_OUTPUT_DIR, DEFAULT_REPO,
};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Inference config file holding property.model-engine-file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Root directory the model tree is staged under
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Artifact store base URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Artifact store repository key
    #[arg(long, default_value = DEFAULT_REPO)]
    repo: String,
}

fn setup_logging() {
    let filter = std::env::var("STAGE_MODELS_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() {
    setup_logging();

    let cli = Cli::parse();

    let options = StageOptions {
        config_path: cli.config,
        output_dir: cli.output_dir,
        store: ArtifactStore::new(cli.base_url, cli.repo),
        docker_config_json: std::env::var("dockerconfigjson").ok(),
        registry_env: std::env::var("JFROG_ENV").ok(),
    };

    let fetcher = CurlFetcher::new();
    let probe = NvidiaSmiProbe::new();
    let progress = IndicatifProgressReporter::new();

    match stage_artifacts(&fetcher, &probe, &progress, &options) {
        Ok(stats) => {
            println!(
                "downloaded: {} skipped: {} verified: {}",
                stats.downloaded, stats.skipped, stats.verified
            );
        }
        Err(err) => {
            tracing::error!("{err}");
            process::exit(1);
        }
    }
}
