use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::Deserialize;
use tracing::info;

use crate::domain::{
    gpu_model_from_listing, model_version_from_path, ArtifactStore, Credentials, DockerConfig,
    InferConfig, ModelVariant, StageStats, ENGINE_FILE_NAME, LABEL_FILE_NAME, MODELS_DIR_NAME,
};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("config error: {0}")]
    Config(String),
    #[error("could not extract a model version from {0:?}")]
    Extraction(String),
    #[error("credential error: {0}")]
    Credentials(String),
    #[error("gpu probe failed: {0}")]
    Probe(String),
    #[error("download failed for {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("md5 mismatch for {}: expected {expected}, got {actual}", .path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("unsupported gpu model: {0:?}")]
    UnsupportedGpu(Option<String>),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authenticated access to the artifact store. The real implementation shells
/// out to an HTTP client tool; tests substitute an in-memory fake.
pub trait ArtifactFetcher {
    /// Download `url` to `dest`. Timeouts and retries are the client tool's.
    fn fetch(&self, url: &str, credentials: &Credentials, dest: &Path) -> Result<(), StageError>;

    /// Raw body of the store's storage-metadata endpoint for `url`.
    fn storage_metadata(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> Result<String, StageError>;
}

/// Hardware enumeration. Returns the collaborator tool's raw stdout; parsing
/// stays in the domain so a fake can hand back canned listings.
pub trait GpuProbe {
    fn list_gpus(&self) -> Result<String, StageError>;
}

pub trait ProgressReporter {
    fn on_start(&self, model_dir: &Path);
    fn on_skip(&self, path: &Path);
    fn on_download(&self, url: &str);
    fn on_verified(&self, path: &Path);
    fn on_finish(&self, stats: &StageStats);
}

#[derive(Debug, Clone)]
pub struct StageOptions {
    pub config_path: PathBuf,
    pub output_dir: PathBuf,
    pub store: ArtifactStore,
    pub docker_config_json: Option<String>,
    pub registry_env: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageMetadata {
    checksums: StorageChecksums,
}

#[derive(Debug, Deserialize)]
struct StorageChecksums {
    md5: String,
}

pub fn read_engine_path(path: &Path) -> Result<String, StageError> {
    let raw = fs::read_to_string(path)
        .map_err(|err| StageError::Config(format!("read {}: {err}", path.display())))?;
    let config: InferConfig = serde_yaml::from_str(&raw)
        .map_err(|err| StageError::Config(format!("parse {}: {err}", path.display())))?;
    Ok(config.property.model_engine_file)
}

pub fn resolve_credentials(
    docker_config_json: &str,
    registry_env: &str,
) -> Result<Credentials, StageError> {
    let config: DockerConfig = serde_json::from_str(docker_config_json)
        .map_err(|err| StageError::Credentials(format!("malformed registry secret: {err}")))?;
    let auth = config
        .auths
        .get(registry_env)
        .ok_or_else(|| StageError::Credentials(format!("no auth entry for {registry_env:?}")))?;

    if auth.username.is_empty() || auth.password.is_empty() {
        return Err(StageError::Credentials(
            "empty username or password".to_string(),
        ));
    }

    Ok(Credentials {
        username: auth.username.clone(),
        password: auth.password.clone(),
    })
}

pub fn file_md5(path: &Path) -> Result<String, StageError> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 4096];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify_md5(path: &Path, expected: &str) -> Result<(), StageError> {
    let actual = file_md5(path)?;
    if actual != expected {
        return Err(StageError::Integrity {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    info!("md5 check passed for {}", path.display());
    Ok(())
}

fn expected_md5(
    fetcher: &dyn ArtifactFetcher,
    url: &str,
    credentials: &Credentials,
) -> Result<String, StageError> {
    let body = fetcher.storage_metadata(url, credentials)?;
    let metadata: StorageMetadata = serde_json::from_str(&body).map_err(|err| {
        StageError::Network {
            url: url.to_string(),
            reason: format!("invalid storage metadata: {err}"),
        }
    })?;
    Ok(metadata.checksums.md5)
}

fn download_and_verify(
    fetcher: &dyn ArtifactFetcher,
    progress: &dyn ProgressReporter,
    store: &ArtifactStore,
    version: &str,
    file_name: &str,
    dest: &Path,
    credentials: &Credentials,
) -> Result<(), StageError> {
    let url = store.download_url(version, file_name);
    progress.on_download(&url);
    fetcher.fetch(&url, credentials, dest)?;

    let expected = expected_md5(fetcher, &store.storage_url(version, file_name), credentials)?;
    verify_md5(dest, &expected)?;
    progress.on_verified(dest);
    Ok(())
}

/// Runs the whole staging pipeline: config, version, credentials, label file,
/// GPU probe, engine file. The engine file downloads under its
/// variant-qualified name and is renamed to the canonical name only after its
/// checksum verifies, so a mismatch leaves the staged file for inspection.
pub fn stage_artifacts(
    fetcher: &dyn ArtifactFetcher,
    probe: &dyn GpuProbe,
    progress: &dyn ProgressReporter,
    options: &StageOptions,
) -> Result<StageStats, StageError> {
    let engine_path = read_engine_path(&options.config_path)?;
    let version = model_version_from_path(&engine_path)
        .ok_or_else(|| StageError::Extraction(engine_path.clone()))?
        .to_string();
    info!("model version: {version}");

    let (Some(docker_config_json), Some(registry_env)) = (
        options.docker_config_json.as_deref(),
        options.registry_env.as_deref(),
    ) else {
        return Err(StageError::Credentials(
            "dockerconfigjson or JFROG_ENV not set".to_string(),
        ));
    };
    let credentials = resolve_credentials(docker_config_json, registry_env)?;

    let model_dir = options.output_dir.join(MODELS_DIR_NAME).join(&version);
    fs::create_dir_all(&model_dir)?;
    progress.on_start(&model_dir);

    let mut stats = StageStats::default();

    let label_path = model_dir.join(LABEL_FILE_NAME);
    if label_path.exists() {
        info!("label file already exists, skipping download");
        progress.on_skip(&label_path);
        stats.skipped += 1;
    } else {
        info!("label file not found, downloading");
        download_and_verify(
            fetcher,
            progress,
            &options.store,
            &version,
            LABEL_FILE_NAME,
            &label_path,
            &credentials,
        )?;
        stats.downloaded += 1;
        stats.verified += 1;
    }

    // The probe runs even when the engine file is already staged; a broken
    // probe should fail the deployment before the inference service starts.
    let listing = probe.list_gpus()?;
    let gpu_model = gpu_model_from_listing(&listing).map(str::to_string);

    let engine_target = model_dir.join(ENGINE_FILE_NAME);
    if engine_target.exists() {
        info!("model engine file already exists, skipping download");
        progress.on_skip(&engine_target);
        stats.skipped += 1;
    } else {
        let variant = gpu_model
            .as_deref()
            .and_then(ModelVariant::for_gpu)
            .ok_or_else(|| StageError::UnsupportedGpu(gpu_model.clone()))?;
        info!(
            "model engine file not found, downloading {} variant for {:?}",
            variant.as_str(),
            gpu_model
        );

        let artifact = variant.engine_artifact();
        let staged = model_dir.join(&artifact);
        download_and_verify(
            fetcher,
            progress,
            &options.store,
            &version,
            &artifact,
            &staged,
            &credentials,
        )?;
        fs::rename(&staged, &engine_target)?;
        stats.downloaded += 1;
        stats.verified += 1;
    }

    progress.on_finish(&stats);
    Ok(stats)
}
