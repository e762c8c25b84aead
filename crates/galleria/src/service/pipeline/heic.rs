//! HEIC/HEIF to JPEG conversion.
//!
//! ffmpeg decodes straight to JPEG when its build carries an mjpeg
//! encoder. Builds without one can usually still emit PPM, so the fallback
//! decodes to PPM and re-encodes with the `image` crate. Both attempts
//! share one wall-clock timeout; a stuck decoder must not hold an upload
//! slot forever.

use std::{io::Cursor, path::PathBuf, process::Stdio, time::Duration};

use bytes::Bytes;
use tokio::process::Command;

use super::video::{cleanup, spill_to_temp_file};

#[derive(Debug, thiserror::Error)]
pub enum HeicError {
    #[error("HEIC conversion timed out after {0:?}")]
    Timeout(Duration),
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
    #[error("re-encoding the decoded frame failed: {0}")]
    Reencode(#[from] image::ImageError),
    #[error("temporary file error: {0}")]
    TempFile(#[source] std::io::Error),
    #[error("conversion task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Converts a HEIC payload to JPEG within `timeout`.
pub async fn convert_to_jpeg(
    ffmpeg_bin: &str,
    bytes: &Bytes,
    timeout: Duration,
) -> Result<Bytes, HeicError> {
    let path = spill_to_temp_file(bytes).await.map_err(HeicError::TempFile)?;
    let result = tokio::time::timeout(timeout, convert_file(ffmpeg_bin, &path)).await;
    cleanup(&path).await;
    match result {
        Ok(converted) => converted,
        Err(_) => Err(HeicError::Timeout(timeout)),
    }
}

async fn convert_file(ffmpeg_bin: &str, path: &PathBuf) -> Result<Bytes, HeicError> {
    match run_ffmpeg(ffmpeg_bin, path, "mjpeg").await {
        Ok(jpeg) if !jpeg.is_empty() => return Ok(Bytes::from(jpeg)),
        Ok(_) => tracing::debug!("ffmpeg produced no JPEG output, trying PPM fallback"),
        Err(e) => tracing::debug!(error = %e, "Direct JPEG conversion failed, trying PPM fallback"),
    }

    let ppm = run_ffmpeg(ffmpeg_bin, path, "ppm").await?;
    let jpeg = tokio::task::spawn_blocking(move || reencode_ppm(&ppm)).await??;
    Ok(Bytes::from(jpeg))
}

async fn run_ffmpeg(ffmpeg_bin: &str, path: &PathBuf, codec: &str) -> Result<Vec<u8>, HeicError> {
    let output = Command::new(ffmpeg_bin)
        .args(["-v", "error", "-i"])
        .arg(path)
        .args(["-frames:v", "1", "-f", "image2pipe", "-c:v", codec, "pipe:1"])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| HeicError::Spawn {
            command: ffmpeg_bin.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(HeicError::Failed {
            command: ffmpeg_bin.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output.stdout)
}

fn reencode_ppm(ppm: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory_with_format(ppm, image::ImageFormat::Pnm)?;
    let mut jpeg = Cursor::new(Vec::new());
    decoded.write_to(&mut jpeg, image::ImageFormat::Jpeg)?;
    Ok(jpeg.into_inner())
}
