use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::Context;
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use image::ImageReader;

mod types;

pub use types::{CaptureError, Frame, FrameFormat};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Spawns a background thread that cycles through the still images under
/// `dir`, decoding each to RGB8 and forwarding it over the returned
/// [`Receiver`] at roughly `fps` frames per second.
///
/// The buffer is intentionally small to backpressure the reader when the
/// downstream consumer falls behind; the directory is replayed in a loop so
/// the source behaves like a continuous stream.
pub fn spawn_directory_reader(dir: &Path, fps: f64) -> Result<Receiver<Result<Frame, CaptureError>>, CaptureError> {
    let paths = list_images(dir)?;
    if paths.is_empty() {
        return Err(CaptureError::Empty {
            uri: dir.display().to_string(),
        });
    }

    let (tx, rx) = bounded(2);
    let interval = frame_interval(fps);

    thread::spawn(move || {
        replay_loop(&paths, interval, tx);
    });

    Ok(rx)
}

fn frame_interval(fps: f64) -> Duration {
    if fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        Duration::from_millis(33)
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let entries = std::fs::read_dir(dir).map_err(|_| CaptureError::Open {
        uri: dir.display().to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn replay_loop(paths: &[PathBuf], interval: Duration, tx: Sender<Result<Frame, CaptureError>>) {
    loop {
        for path in paths {
            let frame = decode_frame(path);
            if tx.send(frame).is_err() {
                return;
            }
            thread::sleep(interval);
        }
    }
}

fn decode_frame(path: &Path) -> Result<Frame, CaptureError> {
    let rgb = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .decode()
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgb8();

    let (width, height) = rgb.dimensions();
    Ok(Frame {
        data: rgb.into_raw(),
        width,
        height,
        timestamp_ms: Utc::now().timestamp_millis(),
        format: FrameFormat::Rgb8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([12, 34, 56]));
        img.save(dir.join(name)).expect("failed to write test image");
    }

    #[test]
    fn reader_cycles_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_png(dir.path(), "a.png", 8, 6);
        write_png(dir.path(), "b.png", 8, 6);

        let rx = spawn_directory_reader(dir.path(), 1000.0).expect("reader");
        for _ in 0..5 {
            let frame = rx.recv().expect("frame").expect("decode");
            assert_eq!(frame.width, 8);
            assert_eq!(frame.height, 6);
            assert!(matches!(frame.format, FrameFormat::Rgb8));
            assert_eq!(frame.data.len(), 8 * 6 * 3);
        }
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            spawn_directory_reader(dir.path(), 30.0),
            Err(CaptureError::Empty { .. })
        ));
    }

    #[test]
    fn missing_directory_is_rejected() {
        assert!(matches!(
            spawn_directory_reader(Path::new("/nonexistent/frames"), 30.0),
            Err(CaptureError::Open { .. })
        ));
    }
}
