//! `ffmpeg`/`ffprobe` behind the [`MediaToolkit`] seam.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::process::{RunError, run_with_timeout};

/// Output sample rate for every tier.
pub const SAMPLE_RATE: u32 = 44_100;
/// Output channel count for every tier.
pub const CHANNELS: u8 = 2;
/// EBU R128 target used when normalization is on.
pub const LOUDNORM_FILTER: &str = "loudnorm=I=-14:TP=-1.5:LRA=11";

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    Run(#[from] RunError),

    #[error("{tool} exited with status {code:?}: {stderr}")]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("could not read {tool} output: {message}")]
    Parse { tool: String, message: String },
}

/// One tier's encode settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub bitrate_kbps: u32,
    pub normalize: bool,
    pub timeout: Duration,
}

/// Probe, transcode and measure audio files.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Container duration in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64, ToolError>;

    /// Encode `input` to AAC in an M4A container at `output`.
    async fn transcode(&self, input: &Path, output: &Path, job: &TranscodeJob)
    -> Result<(), ToolError>;

    /// RMS level in dB of the signal above `cutoff_hz`; `-inf` for silence.
    async fn high_band_rms(&self, path: &Path, cutoff_hz: u32) -> Result<f64, ToolError>;
}

/// Arguments for one tier's encode.
pub fn transcode_args(input: &Path, output: &Path, job: &TranscodeJob) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-y".into(),
        "-v".into(),
        "error".into(),
        "-i".into(),
        input.into(),
        "-vn".into(),
    ];
    if job.normalize {
        args.push("-af".into());
        args.push(LOUDNORM_FILTER.into());
    }
    for arg in [
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", job.bitrate_kbps),
        "-ar".to_string(),
        SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        CHANNELS.to_string(),
        "-map_metadata".to_string(),
        "-1".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        "ipod".to_string(),
    ] {
        args.push(arg.into());
    }
    args.push(output.into());
    args
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    /// ffprobe reports numbers as strings
    duration: Option<String>,
}

/// Duration from `ffprobe -show_format -of json` output.
pub fn parse_probe_duration(stdout: &str) -> Option<f64> {
    let probe: ProbeOutput = serde_json::from_str(stdout).ok()?;
    probe.format?.duration?.trim().parse().ok()
}

/// Overall RMS level from `astats` stderr.
///
/// Understands both the summary block (`Overall` followed by
/// `RMS level dB: -70.2`) and the metadata form (`Overall.RMS_level=-70.2`).
pub fn parse_rms_level(stderr: &str) -> Option<f64> {
    let parse = |s: &str| s.split_whitespace().next()?.parse::<f64>().ok();

    if let Some(level) = stderr
        .lines()
        .rev()
        .find_map(|l| l.split_once("Overall.RMS_level=").and_then(|(_, v)| parse(v)))
    {
        return Some(level);
    }

    let mut in_overall = false;
    for line in stderr.lines() {
        if line.trim_end().ends_with("Overall") {
            in_overall = true;
        } else if in_overall && let Some((_, value)) = line.split_once("RMS level dB:") {
            return parse(value);
        }
    }
    None
}

/// The system `ffmpeg` and `ffprobe`.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: String,
    ffprobe: String,
}

impl Ffmpeg {
    pub fn new() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_binaries(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new()
    }
}

fn failed(tool: &str, output: &std::process::Output) -> ToolError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    ToolError::Failed {
        tool: tool.to_string(),
        code: output.status.code(),
        stderr: stderr.lines().last().unwrap_or_default().trim().to_string(),
    }
}

#[async_trait]
impl MediaToolkit for Ffmpeg {
    async fn probe_duration(&self, path: &Path) -> Result<f64, ToolError> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(["-v", "error", "-show_format", "-of", "json"]).arg(path);
        let output = run_with_timeout(cmd, PROBE_TIMEOUT).await?;
        if !output.status.success() {
            return Err(failed(&self.ffprobe, &output));
        }
        parse_probe_duration(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ToolError::Parse {
                tool: self.ffprobe.clone(),
                message: "no format duration".to_string(),
            }
        })
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        job: &TranscodeJob,
    ) -> Result<(), ToolError> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(transcode_args(input, output, job));
        let result = run_with_timeout(cmd, job.timeout).await?;
        if !result.status.success() {
            return Err(failed(&self.ffmpeg, &result));
        }
        Ok(())
    }

    async fn high_band_rms(&self, path: &Path, cutoff_hz: u32) -> Result<f64, ToolError> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner")
            .arg("-nostats")
            .arg("-i")
            .arg(path)
            .arg("-af")
            .arg(format!("highpass=f={cutoff_hz},astats=metadata=1:reset=0"))
            .args(["-f", "null", "-"]);
        let output = run_with_timeout(cmd, PROBE_TIMEOUT * 4).await?;
        if !output.status.success() {
            return Err(failed(&self.ffmpeg, &output));
        }
        parse_rms_level(&String::from_utf8_lossy(&output.stderr)).ok_or_else(|| ToolError::Parse {
            tool: self.ffmpeg.clone(),
            message: "no overall RMS level".to_string(),
        })
    }
}
