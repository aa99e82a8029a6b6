pub mod application;
pub mod domain;
pub mod infrastructure;

pub use crate::application::{
    file_md5, read_engine_path, resolve_credentials, stage_artifacts, verify_md5, ArtifactFetcher,
    GpuProbe, ProgressReporter, StageError, StageOptions,
};
pub use crate::domain::{
    gpu_model_from_listing, model_version_from_path, ArtifactStore, Credentials, ModelVariant,
    StageStats, DEFAULT_BASE_URL, DEFAULT_CONFIG_PATH, DEFAULT_OUTPUT_DIR, DEFAULT_REPO,
    ENGINE_FILE_NAME, LABEL_FILE_NAME,
};
pub use crate::infrastructure::{
    CurlFetcher, IndicatifProgressReporter, LineProgressReporter, NoProgressReporter,
    NvidiaSmiProbe,
};
