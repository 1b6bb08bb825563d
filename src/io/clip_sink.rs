//! Clip storage backends
//!
//! A sink turns an ordered run of BGR24 frames into one stored clip and
//! returns the path it was written to. Writes are blocking; callers run
//! them on the blocking pool.

use crate::domain::types::Frame;
use crate::infra::config::{ClipEncoder, Config};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClipError {
    #[error("no frames to export")]
    Empty,
    #[error("failed to create clip directory {dir:?}")]
    CreateDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start encoder {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder exited with {status}: {stderr}")]
    Encoder { status: std::process::ExitStatus, stderr: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Append-only clip store keyed by clip name
pub trait ClipSink: Send + Sync {
    /// Write `frames` (oldest first) as clip `key`, returning the stored path
    fn write_clip(&self, key: &str, frames: &[Frame], fps: u32) -> Result<String, ClipError>;
}

fn ensure_dir(dir: &Path) -> Result<(), ClipError> {
    fs::create_dir_all(dir).map_err(|source| ClipError::CreateDir { dir: dir.to_path_buf(), source })
}

/// Frames matching the first frame's geometry; others are skipped
fn uniform_frames(frames: &[Frame]) -> Result<impl Iterator<Item = &Frame> + '_, ClipError> {
    let first = frames.first().ok_or(ClipError::Empty)?;
    let (width, height) = (first.width, first.height);
    let expected = width as usize * height as usize * 3;

    Ok(frames.iter().filter(move |f| {
        let ok = f.width == width && f.height == height && f.data.len() == expected;
        if !ok {
            warn!(
                seq = %f.seq,
                width = %f.width,
                height = %f.height,
                bytes = %f.data.len(),
                "clip_frame_skipped"
            );
        }
        ok
    }))
}

/// Encodes clips to H.264 mp4 by piping raw frames into ffmpeg
pub struct FfmpegClipSink {
    dir: PathBuf,
    program: String,
}

impl FfmpegClipSink {
    pub fn new(dir: impl Into<PathBuf>, program: &str) -> Self {
        Self { dir: dir.into(), program: program.to_string() }
    }

    fn command(&self, width: u32, height: u32, fps: u32, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(fps.max(1).to_string())
            .arg("-i")
            .arg("-")
            .arg("-an")
            .arg("-c:v")
            .arg("libx264")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg(output);
        cmd.stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::piped());
        cmd
    }
}

impl ClipSink for FfmpegClipSink {
    fn write_clip(&self, key: &str, frames: &[Frame], fps: u32) -> Result<String, ClipError> {
        let first = frames.first().ok_or(ClipError::Empty)?;
        ensure_dir(&self.dir)?;
        let output = self.dir.join(format!("{key}.mp4"));

        let mut child = self
            .command(first.width, first.height, fps, &output)
            .spawn()
            .map_err(|source| ClipError::Spawn { program: self.program.clone(), source })?;

        let mut written = 0usize;
        let write_result = match child.stdin.take() {
            Some(stdin) => {
                let mut stdin = BufWriter::new(stdin);
                let mut result = Ok(());
                for frame in uniform_frames(frames)? {
                    if let Err(e) = stdin.write_all(&frame.data) {
                        result = Err(e);
                        break;
                    }
                    written += 1;
                }
                // Dropping stdin closes the pipe so ffmpeg can finish
                result.and_then(|()| stdin.flush())
            }
            None => Err(std::io::Error::other("encoder stdin not captured")),
        };

        let out = child.wait_with_output()?;
        if !out.status.success() {
            return Err(ClipError::Encoder {
                status: out.status,
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        write_result?;

        debug!(path = %output.display(), frames = %written, "ffmpeg_clip_written");
        Ok(output.display().to_string())
    }
}

/// Dumps raw BGR24 frames back to back, no external encoder needed
pub struct RawClipSink {
    dir: PathBuf,
}

impl RawClipSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ClipSink for RawClipSink {
    fn write_clip(&self, key: &str, frames: &[Frame], _fps: u32) -> Result<String, ClipError> {
        let frames = uniform_frames(frames)?;
        ensure_dir(&self.dir)?;
        let output = self.dir.join(format!("{key}.bgr"));

        let mut file = BufWriter::new(File::create(&output)?);
        let mut written = 0usize;
        for frame in frames {
            file.write_all(&frame.data)?;
            written += 1;
        }
        file.flush()?;

        debug!(path = %output.display(), frames = %written, "raw_clip_written");
        Ok(output.display().to_string())
    }
}

/// Build the configured clip sink
pub fn create_clip_sink(config: &Config) -> Box<dyn ClipSink> {
    match config.clip_encoder() {
        ClipEncoder::Ffmpeg => Box::new(FfmpegClipSink::new(config.clip_dir(), config.ffmpeg_path())),
        ClipEncoder::Raw => Box::new(RawClipSink::new(config.clip_dir())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn frames(n: u64) -> Vec<Frame> {
        (0..n)
            .map(|i| Frame::new(i, 1000 + i * 100, 2, 2, Bytes::from(vec![i as u8; 12])))
            .collect()
    }

    #[test]
    fn test_raw_sink_writes_frames_in_order() {
        let dir = tempdir().unwrap();
        let sink = RawClipSink::new(dir.path().join("clips"));

        let path = sink.write_clip("event_20250104_174545", &frames(3), 10).unwrap();
        assert!(path.ends_with("event_20250104_174545.bgr"));

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 36);
        assert_eq!(&bytes[0..12], &[0u8; 12]);
        assert_eq!(&bytes[24..36], &[2u8; 12]);
    }

    #[test]
    fn test_raw_sink_rejects_empty() {
        let dir = tempdir().unwrap();
        let sink = RawClipSink::new(dir.path());
        assert!(matches!(sink.write_clip("k", &[], 10), Err(ClipError::Empty)));
    }

    #[test]
    fn test_raw_sink_skips_mismatched_frames() {
        let dir = tempdir().unwrap();
        let sink = RawClipSink::new(dir.path());

        let mut input = frames(2);
        input.push(Frame::blank(9, 2000, 4, 4));
        let path = sink.write_clip("k", &input, 10).unwrap();
        assert_eq!(fs::read(path).unwrap().len(), 24);
    }

    #[test]
    fn test_ffmpeg_sink_missing_binary() {
        let dir = tempdir().unwrap();
        let sink = FfmpegClipSink::new(dir.path(), "/nonexistent/ffmpeg-binary");

        let err = sink.write_clip("k", &frames(2), 10).unwrap_err();
        assert!(matches!(err, ClipError::Spawn { .. }), "got {err:?}");
    }

    #[test]
    fn test_create_clip_sink_from_config() {
        let dir = tempdir().unwrap();
        let clip_dir = dir.path().to_str().unwrap();
        let config = Config::default().with_clips(clip_dir, ClipEncoder::Raw);

        let sink = create_clip_sink(&config);
        let path = sink.write_clip("event_x", &frames(1), 10).unwrap();
        assert!(Path::new(&path).starts_with(dir.path()));
    }
}
