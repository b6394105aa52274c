//! External media tools.
//!
//! The pipeline talks to ffprobe and ffmpeg through the [`MediaProber`] and
//! [`FrameEncoder`] traits so that tests (and hosts without the tools) can
//! substitute their own implementations.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Stream and container description as reported by ffprobe's JSON writer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeData {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    #[serde(default)]
    pub format: Option<ProbeFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub codec_long_name: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFormat {
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Parsed probe result plus the tool's raw text, which vendor fallbacks
/// scan for tags the structured output does not surface.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutput {
    pub data: ProbeData,
    pub raw: String,
}

pub trait MediaProber: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ProbeOutput>;
}

pub trait FrameEncoder: Send + Sync {
    /// Write one still frame of `source`, scaled to `width`, to `target`.
    fn extract_frame(&self, source: &Path, target: &Path, width: u32) -> Result<()>;
}

/// Runs `ffprobe` and parses its JSON output.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: PathBuf,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl MediaProber for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<ProbeOutput> {
        let output = Command::new(&self.binary)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .map_err(|e| PipelineError::Tool {
                tool: "ffprobe",
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(PipelineError::Probe(format!(
                "ffprobe exited with {} for {}",
                output.status,
                path.display()
            )));
        }

        let data: ProbeData = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::Probe(format!("unreadable ffprobe output: {e}")))?;

        let mut raw = String::from_utf8_lossy(&output.stdout).into_owned();
        raw.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ProbeOutput { data, raw })
    }
}

/// Runs `ffmpeg` to grab a single scaled frame.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
}

impl FfmpegEncoder {
    /// The encoder at `binary`, or `None` when it cannot be executed.
    pub fn detect(binary: impl Into<PathBuf>) -> Option<Self> {
        let binary = binary.into();
        match Command::new(&binary).arg("-version").output() {
            Ok(output) if output.status.success() => {
                debug!("Using encoder {}", binary.display());
                Some(Self { binary })
            }
            _ => {
                info!("{} not available, thumbnails for videos are disabled", binary.display());
                None
            }
        }
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn extract_frame(&self, source: &Path, target: &Path, width: u32) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(["-y", "-v", "error", "-i"])
            .arg(source)
            .args(["-frames:v", "1", "-vf"])
            .arg(format!("scale={width}:-2"))
            .arg(target)
            .output()
            .map_err(|e| PipelineError::Tool {
                tool: "ffmpeg",
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(PipelineError::Tool {
                tool: "ffmpeg",
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
