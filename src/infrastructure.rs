use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::application::{ArtifactFetcher, GpuProbe, ProgressReporter, StageError};
use crate::domain::{Credentials, StageStats};

/// Downloads through the `curl` binary, inheriting its connect timeout and
/// retry behavior instead of reimplementing either.
pub struct CurlFetcher;

impl CurlFetcher {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactFetcher for CurlFetcher {
    fn fetch(&self, url: &str, credentials: &Credentials, dest: &Path) -> Result<(), StageError> {
        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        // -O writes the URL basename into the working directory; the rename
        // moves it onto the requested destination name.
        let file_name = url.rsplit('/').next().unwrap_or(url);

        let status = Command::new("curl")
            .args(["--connect-timeout", "30"])
            .args(["--retry", "3", "--retry-delay", "5"])
            .args([
                "--user",
                &format!("{}:{}", credentials.username, credentials.password),
            ])
            .args(["-s", "-S", "-f", "-O", url])
            .current_dir(parent)
            .status()
            .map_err(|err| StageError::Network {
                url: url.to_string(),
                reason: format!("spawn curl: {err}"),
            })?;

        if !status.success() {
            return Err(StageError::Network {
                url: url.to_string(),
                reason: format!("curl exited with {status}"),
            });
        }

        fs::rename(parent.join(file_name), dest).map_err(|err| StageError::Network {
            url: url.to_string(),
            reason: format!("rename to {}: {err}", dest.display()),
        })?;

        Ok(())
    }

    fn storage_metadata(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> Result<String, StageError> {
        let output = Command::new("curl")
            .args([
                "--user",
                &format!("{}:{}", credentials.username, credentials.password),
            ])
            .args(["-s", url])
            .output()
            .map_err(|err| StageError::Network {
                url: url.to_string(),
                reason: format!("spawn curl: {err}"),
            })?;

        if !output.status.success() {
            return Err(StageError::Network {
                url: url.to_string(),
                reason: format!("curl exited with {}", output.status),
            });
        }

        String::from_utf8(output.stdout).map_err(|err| StageError::Network {
            url: url.to_string(),
            reason: format!("non-utf8 metadata response: {err}"),
        })
    }
}

/// Enumerates GPUs through `nvidia-smi -L`.
pub struct NvidiaSmiProbe;

impl NvidiaSmiProbe {
    pub fn new() -> Self {
        Self
    }
}

impl GpuProbe for NvidiaSmiProbe {
    fn list_gpus(&self) -> Result<String, StageError> {
        let output = Command::new("nvidia-smi")
            .arg("-L")
            .output()
            .map_err(|err| StageError::Probe(format!("spawn nvidia-smi: {err}")))?;

        if !output.status.success() {
            return Err(StageError::Probe(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

pub struct NoProgressReporter;

impl NoProgressReporter {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for NoProgressReporter {
    fn on_start(&self, _model_dir: &Path) {}

    fn on_skip(&self, _path: &Path) {}

    fn on_download(&self, _url: &str) {}

    fn on_verified(&self, _path: &Path) {}

    fn on_finish(&self, _stats: &StageStats) {}
}

pub struct IndicatifProgressReporter {
    bar: ProgressBar,
}

impl IndicatifProgressReporter {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(draw_target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(None, draw_target);
        let style = ProgressStyle::with_template("{spinner:.yellow} {msg:.blue}")
            .expect("invalid progress style template")
            .tick_chars("⣾⣽⣻⢿⡿⣟⣯⣷");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));

        Self { bar }
    }
}

impl ProgressReporter for IndicatifProgressReporter {
    fn on_start(&self, model_dir: &Path) {
        let _ = self
            .bar
            .println(format!("staging into: {}", model_dir.display()));
        self.bar.set_message("waiting");
    }

    fn on_skip(&self, path: &Path) {
        let message = format!("already present: {}", path.display());
        let _ = self.bar.println(style(message).dim().to_string());
    }

    fn on_download(&self, url: &str) {
        self.bar.set_message(format!("downloading {url}"));
    }

    fn on_verified(&self, path: &Path) {
        let _ = self.bar.println(format!("verified: {}", path.display()));
    }

    fn on_finish(&self, stats: &StageStats) {
        self.bar.disable_steady_tick();
        self.bar.finish_with_message(format_stats(stats));
    }
}

struct LineProgressState<W: Write> {
    writer: W,
    started: bool,
}

pub struct LineProgressReporter<W: Write + Send> {
    state: Mutex<LineProgressState<W>>,
}

impl LineProgressReporter<std::io::Stderr> {
    pub fn new() -> Self {
        Self::with_writer(std::io::stderr())
    }
}

impl<W: Write + Send> LineProgressReporter<W> {
    pub fn with_writer(writer: W) -> Self {
        Self {
            state: Mutex::new(LineProgressState {
                writer,
                started: false,
            }),
        }
    }

    pub fn into_inner(self) -> W {
        let state = match self.state.into_inner() {
            Ok(state) => state,
            Err(err) => err.into_inner(),
        };
        state.writer
    }

    fn write_line(&self, line: &str) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(err) => err.into_inner(),
        };

        let _ = writeln!(state.writer, "{line}");
        let _ = state.writer.flush();
    }
}

impl<W: Write + Send> ProgressReporter for LineProgressReporter<W> {
    fn on_start(&self, model_dir: &Path) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(err) => err.into_inner(),
        };

        if state.started {
            return;
        }

        let _ = writeln!(state.writer, "staging into: {}", model_dir.display());
        let _ = state.writer.flush();
        state.started = true;
    }

    fn on_skip(&self, path: &Path) {
        self.write_line(&format!("already present: {}", path.display()));
    }

    fn on_download(&self, url: &str) {
        self.write_line(&format!("downloading {url}"));
    }

    fn on_verified(&self, path: &Path) {
        self.write_line(&format!("verified: {}", path.display()));
    }

    fn on_finish(&self, stats: &StageStats) {
        self.write_line(&format_stats(stats));
    }
}

fn format_stats(stats: &StageStats) -> String {
    format!(
        "downloaded: {} skipped: {} verified: {}",
        stats.downloaded, stats.skipped, stats.verified
    )
}
