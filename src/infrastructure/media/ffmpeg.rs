use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::settings::MediaConfig;
use crate::error::{PipelineError, PipelineResult};

/// What the pipeline needs to know about an uploaded media file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub width: i32,
    pub height: i32,
    /// Container duration in seconds, when the format reports one.
    pub duration_secs: Option<f64>,
}

impl ProbeReport {
    pub fn duration_ms(&self) -> i64 {
        self.duration_secs
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d * 1000.0) as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe(&self, input: &Path) -> PipelineResult<ProbeReport>;

    /// Writes a single JPEG frame taken at `timestamp` to `output`.
    async fn extract_frame(&self, input: &Path, timestamp: &str, output: &Path) -> PipelineResult<()>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    error: Option<FfprobeError>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    string: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    width: Option<i32>,
    #[serde(default)]
    height: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<NumberOrString>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

impl NumberOrString {
    fn as_f64(&self) -> Option<f64> {
        match self {
            NumberOrString::Number(n) => Some(*n),
            NumberOrString::String(s) => s.trim().parse().ok(),
        }
    }
}

/// Interprets `ffprobe -print_format json -show_error` output.
///
/// Only an error object with a non-zero code counts as failure. The last
/// stream reporting a dimension wins, matching ffprobe's stream order.
pub fn parse_probe_output(raw: &[u8]) -> PipelineResult<ProbeReport> {
    let output: FfprobeOutput = serde_json::from_slice(raw)
        .map_err(|e| PipelineError::Probe(format!("unreadable ffprobe output: {e}")))?;

    if let Some(err) = output.error.as_ref().filter(|e| e.code != 0) {
        return Err(PipelineError::Probe(format!(
            "ffprobe error {}: {}",
            err.code,
            err.string.as_deref().unwrap_or("unknown")
        )));
    }

    let mut report = ProbeReport::default();
    for stream in &output.streams {
        if let Some(width) = stream.width.filter(|w| *w > 0) {
            report.width = width;
        }
        if let Some(height) = stream.height.filter(|h| *h > 0) {
            report.height = height;
        }
    }
    report.duration_secs = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(NumberOrString::as_f64);

    Ok(report)
}

/// Runs the real `ffprobe`/`ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffprobe_bin: String,
    ffmpeg_bin: String,
}

impl FfmpegTool {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffprobe_bin: config.ffprobe_bin.clone(),
            ffmpeg_bin: config.ffmpeg_bin.clone(),
        }
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe(&self, input: &Path) -> PipelineResult<ProbeReport> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-show_error",
                "-show_chapters",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Probe(format!("failed to run {}: {e}", self.ffprobe_bin)))?;

        if !output.stderr.is_empty() {
            debug!(input = %input.display(), "ffprobe stderr: {}", String::from_utf8_lossy(&output.stderr));
        }
        if !output.status.success() {
            warn!(input = %input.display(), status = %output.status, "ffprobe exited unsuccessfully");
        }

        let raw = if output.stdout.is_empty() { &output.stderr } else { &output.stdout };
        parse_probe_output(raw)
    }

    async fn extract_frame(&self, input: &Path, timestamp: &str, output: &Path) -> PipelineResult<()> {
        let result = Command::new(&self.ffmpeg_bin)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-ss", timestamp, "-frames:v", "1"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Extract(format!("failed to run {}: {e}", self.ffmpeg_bin)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            return Err(PipelineError::Extract(format!("ffmpeg exited with {}: {tail}", result.status)));
        }

        debug!(input = %input.display(), timestamp, "poster frame extracted");
        Ok(())
    }
}
