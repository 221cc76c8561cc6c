//! The watch command: a headless client session that paces frames from a
//! local source into the detection API.
//!
//! Frames arrive from `frame-ingest` on a crossbeam channel and are bridged
//! onto an async channel so the loop can select between frame ticks, the
//! in-flight request, and the stop signal. The loop awaits each submission's
//! terminal outcome before re-arming, so the steady-state request cadence is
//! `max(min_interval, server_round_trip)`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use frame_ingest::{CaptureError, Frame, FrameFormat};
use image::codecs::jpeg::JpegEncoder;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::detect::{
    config::WatchConfig,
    pacer::{DetectionSession, FramePacer},
    telemetry,
    transport::{DetectTransport, HttpTransport},
};

/// Run the watch command until interrupted or the source dries up.
pub fn run_watch(config: WatchConfig) -> Result<()> {
    telemetry::init_tracing(config.verbose);
    let _ = telemetry::init_metrics_recorder();

    let capture_rx = frame_ingest::spawn_directory_reader(&config.source, config.fps)?;

    let (frame_tx, mut frame_rx) = mpsc::channel::<Result<Frame, CaptureError>>(2);
    std::thread::Builder::new()
        .name("frame-bridge".into())
        .spawn(move || {
            while let Ok(frame) = capture_rx.recv() {
                if frame_tx.blocking_send(frame).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn frame bridge thread")?;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    })
    .context("Failed to install Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build client runtime")?;

    runtime.block_on(async move {
        let transport = HttpTransport::new(&config.server);
        let mut pacer = FramePacer::new(Duration::from_millis(config.interval_ms));
        let mut session = DetectionSession::new(config.classes.clone());

        info!(
            "watching {} via {} (interval: {} ms)",
            config.source.display(),
            config.server,
            config.interval_ms
        );
        drive(
            &transport,
            &mut frame_rx,
            &mut stop_rx,
            &mut pacer,
            &mut session,
            config.jpeg_quality,
            Duration::from_millis(config.startup_timeout_ms),
        )
        .await?;

        if let Some(err) = session.last_error() {
            warn!("last detection error: {err}");
        }
        info!("watch stopped");
        Ok(())
    })
}

/// Core client loop, separated from I/O setup so it can run against a mock
/// transport in tests.
async fn drive<T: DetectTransport>(
    transport: &T,
    frames: &mut mpsc::Receiver<Result<Frame, CaptureError>>,
    stop: &mut watch::Receiver<bool>,
    pacer: &mut FramePacer,
    session: &mut DetectionSession,
    jpeg_quality: u8,
    startup_timeout: Duration,
) -> Result<()> {
    // The stream must go live before pacing begins; a source that never
    // produces a frame is a user-visible failure, not a retry loop.
    let first = tokio::select! {
        biased;
        _ = stop.changed() => return Ok(()),
        first = tokio::time::timeout(startup_timeout, frames.recv()) => first,
    };
    let first = first.map_err(|_| {
        anyhow!(
            "no frames from source within {} ms",
            startup_timeout.as_millis()
        )
    })?;
    let first = first.context("frame source closed before producing a frame")?;
    let mut pending = Some(first?);

    pacer.start();

    loop {
        let frame = match pending.take() {
            Some(frame) => frame,
            None => tokio::select! {
                biased;
                _ = stop.changed() => {
                    pacer.stop();
                    session.clear();
                    break;
                }
                recv = frames.recv() => match recv {
                    Some(Ok(frame)) => frame,
                    Some(Err(err)) => {
                        warn!("capture error: {err}");
                        pacer.stop();
                        session.clear();
                        break;
                    }
                    None => {
                        pacer.stop();
                        session.clear();
                        break;
                    }
                },
            },
        };

        // The tokio clock keeps pacing testable under a paused runtime.
        let Some(generation) = pacer.on_frame(tokio::time::Instant::now().into_std()) else {
            continue;
        };

        let jpeg = encode_jpeg(&frame, jpeg_quality)?;
        metrics::counter!("pacer_requests_total").increment(1);

        let started = tokio::time::Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = stop.changed() => {
                // Dropping the request future aborts the in-flight request;
                // its eventual outcome is discarded.
                pacer.stop();
                session.clear();
                break;
            }
            outcome = transport.detect(jpeg) => outcome,
        };
        metrics::histogram!("pacer_round_trip_seconds").record(started.elapsed().as_secs_f64());

        if pacer.on_outcome(generation) {
            match outcome {
                Ok(response) => {
                    session.apply_success(response);
                    debug!("{} detection(s) displayed", session.detections().len());
                }
                Err(err) => {
                    metrics::counter!("pacer_failures_total").increment(1);
                    warn!("detection request failed: {err}");
                    session.apply_error(err.to_string());
                }
            }
        }
    }

    Ok(())
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let FrameFormat::Rgb8 = frame.format;
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode(
            &frame.data,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .context("Failed to encode frame as JPEG")?;
    Ok(buffer)
}
