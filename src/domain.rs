use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/config/config-infer-primary-bot.yaml";
pub const DEFAULT_OUTPUT_DIR: &str = "/output";
pub const DEFAULT_BASE_URL: &str = "https://colesgroup.jfrog.io/artifactory";
pub const DEFAULT_REPO: &str = "ieb-prod-generic-virtual";

pub const LABEL_FILE_NAME: &str = "labels.txt";
pub const ENGINE_FILE_NAME: &str = "model.onnx_b1_gpu0_fp16.engine";

/// Local staging directory under the output root. The remote store spells the
/// same segment with a hyphen.
pub const MODELS_DIR_NAME: &str = "deepstream_models";
pub const REMOTE_MODELS_SEGMENT: &str = "deepstream-models";

/// The slice of the inference config this tool consults.
#[derive(Debug, Deserialize)]
pub struct InferConfig {
    pub property: InferProperty,
}

#[derive(Debug, Deserialize)]
pub struct InferProperty {
    #[serde(rename = "model-engine-file")]
    pub model_engine_file: String,
}

/// Shape of the mounted Docker registry secret (`dockerconfigjson`).
#[derive(Debug, Deserialize)]
pub struct DockerConfig {
    pub auths: HashMap<String, RegistryAuth>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegistryAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/output/deepstream_models/([^/]+)/").expect("version pattern"));

static GPU_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r": (.*)").expect("gpu name pattern"));

/// The segment between `/output/deepstream_models/` and the next separator.
pub fn model_version_from_path(path: &str) -> Option<&str> {
    VERSION_PATTERN
        .captures(path)?
        .get(1)
        .map(|segment| segment.as_str())
}

/// Everything after the first `": "` in a GPU enumeration line, e.g.
/// `GPU 0: NVIDIA A16-16Q (UUID: ...)`.
pub fn gpu_model_from_listing(listing: &str) -> Option<&str> {
    GPU_NAME_PATTERN
        .captures(listing)?
        .get(1)
        .map(|name| name.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    A2,
    A16,
}

impl ModelVariant {
    /// Substring match against the probed GPU name. Anything that names
    /// neither variant has no precompiled engine.
    pub fn for_gpu(gpu_model: &str) -> Option<Self> {
        if gpu_model.contains("A2") {
            Some(ModelVariant::A2)
        } else if gpu_model.contains("A16") {
            Some(ModelVariant::A16)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::A2 => "A2",
            ModelVariant::A16 => "A16",
        }
    }

    /// Remote artifact name for this variant's engine file.
    pub fn engine_artifact(&self) -> String {
        format!("{}_{}", self.as_str(), ENGINE_FILE_NAME)
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_url: String,
    repo: String,
}

impl ArtifactStore {
    pub fn new(base_url: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            repo: repo.into(),
        }
    }

    pub fn download_url(&self, version: &str, file_name: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.base_url, self.repo, REMOTE_MODELS_SEGMENT, version, file_name
        )
    }

    /// Metadata endpoint whose JSON body carries `checksums.md5`.
    pub fn storage_url(&self, version: &str, file_name: &str) -> String {
        format!(
            "{}/api/storage/{}/{}/{}/{}",
            self.base_url, self.repo, REMOTE_MODELS_SEGMENT, version, file_name
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageStats {
    pub downloaded: u64,
    pub skipped: u64,
    pub verified: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_version_segment_from_engine_path() {
        assert_eq!(
            model_version_from_path("/output/deepstream_models/v3.2/model.onnx"),
            Some("v3.2")
        );
    }

    #[test]
    fn extraction_stops_at_the_next_separator() {
        assert_eq!(
            model_version_from_path("/output/deepstream_models/v3.2/resnet/model.onnx"),
            Some("v3.2")
        );
    }

    #[test]
    fn extraction_requires_prefix_and_closing_separator() {
        assert_eq!(model_version_from_path("/models/v3.2/model.onnx"), None);
        assert_eq!(model_version_from_path("/output/deepstream_models/v3.2"), None);
        assert_eq!(model_version_from_path(""), None);
    }

    #[test]
    fn selects_variant_by_gpu_substring() {
        assert_eq!(ModelVariant::for_gpu("NVIDIA A2"), Some(ModelVariant::A2));
        assert_eq!(
            ModelVariant::for_gpu("NVIDIA A16-16Q"),
            Some(ModelVariant::A16)
        );
        assert_eq!(ModelVariant::for_gpu("NVIDIA A100"), None);
        assert_eq!(ModelVariant::for_gpu(""), None);
    }

    #[test]
    fn engine_artifact_is_variant_prefixed() {
        assert_eq!(
            ModelVariant::A16.engine_artifact(),
            "A16_model.onnx_b1_gpu0_fp16.engine"
        );
    }

    #[test]
    fn gpu_model_follows_the_colon_separator() {
        let listing = "GPU 0: NVIDIA A16-16Q (UUID: GPU-5e2d)";
        assert_eq!(
            gpu_model_from_listing(listing),
            Some("NVIDIA A16-16Q (UUID: GPU-5e2d)")
        );
        assert_eq!(gpu_model_from_listing("no devices found"), None);
    }

    #[test]
    fn urls_follow_the_store_layout() {
        let store = ArtifactStore::new("https://host/artifactory", "release-repo");
        assert_eq!(
            store.download_url("v3.2", "labels.txt"),
            "https://host/artifactory/release-repo/deepstream-models/v3.2/labels.txt"
        );
        assert_eq!(
            store.storage_url("v3.2", "labels.txt"),
            "https://host/artifactory/api/storage/release-repo/deepstream-models/v3.2/labels.txt"
        );
    }
}
