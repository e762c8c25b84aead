//! Video metadata probing and poster-frame extraction via the ffmpeg
//! tool suite.
//!
//! Container formats routinely keep their index at the end of the file, so
//! probing works on a temporary file rather than a stdin pipe.

use std::{path::PathBuf, process::Stdio};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use lazy_regex::regex_captures;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use uuid::Uuid;

use super::GpsCoordinates;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("could not parse ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("temporary file error: {0}")]
    TempFile(#[source] std::io::Error),
    #[error("`{command}` produced no frame")]
    EmptyFrame { command: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsCoordinates>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    #[serde(default)]
    tags: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Runs `ffprobe` over the payload and extracts what it reports.
pub async fn probe(ffprobe_bin: &str, bytes: &Bytes) -> Result<VideoMetadata, ProbeError> {
    let path = spill_to_temp_file(bytes).await.map_err(ProbeError::TempFile)?;
    let result = probe_file(ffprobe_bin, &path).await;
    cleanup(&path).await;
    result
}

async fn probe_file(ffprobe_bin: &str, path: &PathBuf) -> Result<VideoMetadata, ProbeError> {
    let output = Command::new(ffprobe_bin)
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ProbeError::Spawn {
            command: ffprobe_bin.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(ProbeError::Failed {
            command: ffprobe_bin.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parses ffprobe JSON into [`VideoMetadata`]. Split out from the
/// subprocess plumbing so it can be exercised without ffprobe installed.
pub(crate) fn parse_probe_output(json: &str) -> Result<VideoMetadata, ProbeError> {
    let probe: ProbeOutput = serde_json::from_str(json)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let mut metadata = VideoMetadata {
        width: video_stream.and_then(|s| s.width),
        height: video_stream.and_then(|s| s.height),
        ..VideoMetadata::default()
    };

    if let Some(format) = probe.format {
        metadata.duration_secs = format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok());
        metadata.recorded_at = tag_str(&format.tags, "creation_time")
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc));
        metadata.gps = tag_str(&format.tags, "location")
            .or_else(|| tag_str(&format.tags, "com.apple.quicktime.location.ISO6709"))
            .and_then(parse_iso6709);
    }

    Ok(metadata)
}

fn tag_str<'a>(
    tags: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    tags.get(key).and_then(serde_json::Value::as_str)
}

/// Parses an ISO 6709 position string such as `+52.5200+013.4050+034.000/`
/// into decimal coordinates. The altitude, if any, is ignored.
pub(crate) fn parse_iso6709(value: &str) -> Option<GpsCoordinates> {
    let (_, lat, lon) = regex_captures!(
        r"^([+-]\d+(?:\.\d+)?)([+-]\d+(?:\.\d+)?)",
        value.trim()
    )?;
    Some(GpsCoordinates {
        latitude: lat.parse().ok()?,
        longitude: lon.parse().ok()?,
    })
}

/// Extracts a poster frame as JPEG. Seeks one second in first, falling
/// back to the very first frame for clips shorter than that.
pub async fn extract_poster_frame(ffmpeg_bin: &str, bytes: &Bytes) -> Result<Vec<u8>, ProbeError> {
    let path = spill_to_temp_file(bytes).await.map_err(ProbeError::TempFile)?;
    let mut result = extract_frame_at(ffmpeg_bin, &path, "1").await;
    if !matches!(&result, Ok(frame) if !frame.is_empty()) {
        result = extract_frame_at(ffmpeg_bin, &path, "0").await;
    }
    cleanup(&path).await;
    match result {
        Ok(frame) if frame.is_empty() => Err(ProbeError::EmptyFrame {
            command: ffmpeg_bin.to_string(),
        }),
        other => other,
    }
}

async fn extract_frame_at(
    ffmpeg_bin: &str,
    path: &PathBuf,
    seek_secs: &str,
) -> Result<Vec<u8>, ProbeError> {
    let output = Command::new(ffmpeg_bin)
        .args(["-v", "error", "-ss", seek_secs, "-i"])
        .arg(path)
        .args(["-frames:v", "1", "-f", "image2pipe", "-c:v", "mjpeg", "pipe:1"])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ProbeError::Spawn {
            command: ffmpeg_bin.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(ProbeError::Failed {
            command: ffmpeg_bin.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output.stdout)
}

pub(crate) async fn spill_to_temp_file(bytes: &Bytes) -> Result<PathBuf, std::io::Error> {
    let path = std::env::temp_dir().join(format!("galleria-{}.bin", Uuid::now_v7()));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

pub(crate) async fn cleanup(path: &PathBuf) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
    }
}
