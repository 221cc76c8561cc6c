//! Frame pacing state machine and client-side detection session state.
//!
//! The pacer decides when a captured frame may be submitted: at most one
//! request is in flight per session, and submissions are gated to a minimum
//! inter-request interval so a fast frame source cannot outrun the server.
//! Because the loop always awaits the terminal outcome of a submission
//! before re-arming, the generation counter is a safety net rather than the
//! primary pacing mechanism: any outcome carrying a stale generation is
//! discarded without touching session state.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::detect::data::{Detection, DetectionResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacerState {
    Idle,
    Armed,
    AwaitingResult,
}

pub struct FramePacer {
    state: PacerState,
    min_interval: Duration,
    last_submit: Option<Instant>,
    generation: u64,
}

impl FramePacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            state: PacerState::Idle,
            min_interval,
            last_submit: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    /// Idle → Armed once the stream is live and detection is on.
    pub fn start(&mut self) {
        if self.state == PacerState::Idle {
            self.state = PacerState::Armed;
            self.last_submit = None;
        }
    }

    /// Frame tick. Returns the generation token for a new submission, or
    /// `None` when the tick is skipped (not armed, or interval not elapsed).
    pub fn on_frame(&mut self, now: Instant) -> Option<u64> {
        if self.state != PacerState::Armed {
            return None;
        }
        if let Some(last) = self.last_submit {
            if now.duration_since(last) < self.min_interval {
                return None;
            }
        }
        self.last_submit = Some(now);
        self.generation += 1;
        self.state = PacerState::AwaitingResult;
        debug!("submitting frame (generation {})", self.generation);
        Some(self.generation)
    }

    /// Terminal outcome for a submission. Returns true when the outcome is
    /// current and the session should be updated; stale generations (from a
    /// submission superseded by `stop`) are discarded.
    pub fn on_outcome(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != PacerState::AwaitingResult {
            debug!("discarding stale outcome (generation {generation})");
            return false;
        }
        self.state = PacerState::Armed;
        true
    }

    /// Any state → Idle. Bumping the generation invalidates whatever is
    /// still in flight.
    pub fn stop(&mut self) {
        self.state = PacerState::Idle;
        self.generation += 1;
    }
}

/// Client-side detection state: the current overlay payload plus the last
/// error, which persists until the next successful detection. Errors never
/// blank detections from a prior successful frame.
pub struct DetectionSession {
    detections: Vec<Detection>,
    last_error: Option<String>,
    enabled_classes: Option<Vec<String>>,
}

impl DetectionSession {
    pub fn new(enabled_classes: Option<Vec<String>>) -> Self {
        Self {
            detections: Vec::new(),
            last_error: None,
            enabled_classes: enabled_classes
                .map(|classes| classes.into_iter().map(|name| name.to_lowercase()).collect()),
        }
    }

    pub fn apply_success(&mut self, response: DetectionResponse) {
        self.detections = self.filter(response.detections);
        self.last_error = None;
    }

    pub fn apply_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    /// Stream stopped: drop the overlay but keep the last error visible.
    pub fn clear(&mut self) {
        self.detections.clear();
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Class filter matching the UI behavior: case-insensitive substring in
    /// either direction, empty enabled set passes nothing, no filter passes
    /// everything.
    fn filter(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let Some(enabled) = &self.enabled_classes else {
            return detections;
        };
        detections
            .into_iter()
            .filter(|detection| {
                let class = detection.class.to_lowercase();
                enabled
                    .iter()
                    .any(|name| class.contains(name.as_str()) || name.contains(class.as_str()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::data::BoundingBox;

    fn detection(class: &str) -> Detection {
        Detection {
            class: class.to_string(),
            class_id: 0,
            confidence: 0.9,
            bbox: BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 1.0,
                y2: 1.0,
            },
        }
    }

    fn response(classes: &[&str]) -> DetectionResponse {
        DetectionResponse {
            detections: classes.iter().map(|class| detection(class)).collect(),
        }
    }

    #[test]
    fn idle_pacer_ignores_frames() {
        let mut pacer = FramePacer::new(Duration::from_millis(300));
        assert_eq!(pacer.state(), PacerState::Idle);
        assert!(pacer.on_frame(Instant::now()).is_none());
    }

    #[test]
    fn first_frame_after_start_submits_immediately() {
        let mut pacer = FramePacer::new(Duration::from_millis(300));
        pacer.start();
        assert!(pacer.on_frame(Instant::now()).is_some());
        assert_eq!(pacer.state(), PacerState::AwaitingResult);
    }

    #[test]
    fn interval_gates_resubmission() {
        let mut pacer = FramePacer::new(Duration::from_millis(300));
        pacer.start();
        let base = Instant::now();
        let generation = pacer.on_frame(base).expect("first submission");
        assert!(pacer.on_outcome(generation));

        // Armed again, but the interval has not elapsed.
        assert!(pacer.on_frame(base + Duration::from_millis(100)).is_none());
        assert_eq!(pacer.state(), PacerState::Armed);
        assert!(pacer.on_frame(base + Duration::from_millis(300)).is_some());
    }

    #[test]
    fn awaiting_pacer_skips_frames() {
        let mut pacer = FramePacer::new(Duration::from_millis(0));
        pacer.start();
        let base = Instant::now();
        assert!(pacer.on_frame(base).is_some());
        assert!(pacer.on_frame(base + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn stop_invalidates_inflight_generation() {
        let mut pacer = FramePacer::new(Duration::from_millis(0));
        pacer.start();
        let generation = pacer.on_frame(Instant::now()).expect("submission");
        pacer.stop();
        assert_eq!(pacer.state(), PacerState::Idle);
        assert!(!pacer.on_outcome(generation));
    }

    #[test]
    fn restart_submits_without_interval_carryover() {
        let mut pacer = FramePacer::new(Duration::from_secs(300));
        pacer.start();
        let base = Instant::now();
        let generation = pacer.on_frame(base).expect("submission");
        assert!(pacer.on_outcome(generation));
        pacer.stop();
        pacer.start();
        assert!(pacer.on_frame(base + Duration::from_millis(1)).is_some());
    }

    #[test]
    fn success_replaces_detections_and_clears_error() {
        let mut session = DetectionSession::new(None);
        session.apply_error("Detection failed".into());
        session.apply_success(response(&["helmet"]));
        assert_eq!(session.detections().len(), 1);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn error_keeps_prior_detections() {
        let mut session = DetectionSession::new(None);
        session.apply_success(response(&["helmet", "vest"]));
        session.apply_error("Detection failed".into());
        assert_eq!(session.detections().len(), 2);
        assert_eq!(session.last_error(), Some("Detection failed"));
    }

    #[test]
    fn class_filter_matches_substrings_both_ways() {
        let mut session = DetectionSession::new(Some(vec!["helmet".into()]));
        session.apply_success(response(&["no_helmet", "Helmet", "vest"]));
        let classes: Vec<&str> = session
            .detections()
            .iter()
            .map(|det| det.class.as_str())
            .collect();
        assert_eq!(classes, vec!["no_helmet", "Helmet"]);
    }

    #[test]
    fn empty_enabled_set_passes_nothing() {
        let mut session = DetectionSession::new(Some(Vec::new()));
        session.apply_success(response(&["helmet"]));
        assert!(session.detections().is_empty());
    }
}
