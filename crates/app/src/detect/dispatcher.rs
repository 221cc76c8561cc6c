//! Admission-controlled dispatch of detection requests onto inference
//! workers.
//!
//! The dispatcher is a single-owner control loop: all mutations of the
//! concurrency counter and the FIFO queue happen on one task, so no locking
//! is needed. Worker executions run concurrently as spawned tasks and report
//! back over the same command channel, which is the only admission path out
//! of the queue. There is deliberately no timeout on a running worker: a
//! hung invocation occupies its slot until the process exits.

use std::{collections::VecDeque, future::Future, sync::Arc};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::detect::{
    config::DispatcherConfig,
    data::DetectionResponse,
    worker::{self, DispatchError},
};

/// Handle to the dispatcher control loop.
///
/// Cloning is cheap; all clones feed the same loop. Dropping every handle
/// without calling [`shutdown`](Self::shutdown) leaves the loop running until
/// the process exits.
#[derive(Clone)]
pub struct AdmissionDispatcher {
    commands: mpsc::UnboundedSender<Command>,
}

struct PendingSlot {
    image: Vec<u8>,
    respond: oneshot::Sender<Result<DetectionResponse, DispatchError>>,
}

enum Command {
    Submit(PendingSlot),
    Done,
    Shutdown,
}

impl AdmissionDispatcher {
    /// Spawn the control loop on the current runtime.
    pub fn spawn(config: DispatcherConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let core = DispatcherCore {
            worker: Arc::new(config.worker),
            max_concurrent: config.max_concurrent.max(1),
            max_queue_depth: config.max_queue_depth,
            active: 0,
            queue: VecDeque::new(),
            submitted: 0,
            done_tx: commands.clone(),
        };
        info!(
            "dispatcher ready (max concurrent: {}, queue cap: {})",
            core.max_concurrent,
            core.max_queue_depth
                .map(|cap| cap.to_string())
                .unwrap_or_else(|| "unbounded".into())
        );
        tokio::spawn(core.run(rx));
        Self { commands }
    }

    /// Submit one detection request.
    ///
    /// The command is sent before the returned future is first polled, so
    /// queue positions follow call order exactly. The future resolves once
    /// the request has been admitted, executed, and routed back; dropping it
    /// abandons the result but never the execution.
    pub fn submit(
        &self,
        image: Vec<u8>,
    ) -> impl Future<Output = Result<DetectionResponse, DispatchError>> + 'static {
        let (respond, rx) = oneshot::channel();
        let sent = self.commands.send(Command::Submit(PendingSlot { image, respond }));
        async move {
            if sent.is_err() {
                return Err(DispatchError::Shutdown);
            }
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(DispatchError::Shutdown),
            }
        }
    }

    /// Stop the control loop. Queued requests are failed with
    /// [`DispatchError::Shutdown`]; active workers run to completion and
    /// their results are discarded.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct DispatcherCore {
    worker: Arc<crate::detect::config::WorkerConfig>,
    max_concurrent: usize,
    max_queue_depth: Option<usize>,
    active: usize,
    queue: VecDeque<PendingSlot>,
    submitted: u64,
    done_tx: mpsc::UnboundedSender<Command>,
}

impl DispatcherCore {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Submit(slot) => self.admit(slot),
                Command::Done => self.complete(),
                Command::Shutdown => break,
            }
        }
        for slot in self.queue.drain(..) {
            let _ = slot.respond.send(Err(DispatchError::Shutdown));
        }
        debug!("dispatcher loop stopped ({} execution(s) still active)", self.active);
    }

    fn admit(&mut self, slot: PendingSlot) {
        self.submitted += 1;
        let seq = self.submitted;
        metrics::counter!("detect_requests_total").increment(1);
        if self.active < self.max_concurrent {
            debug!("request {seq} admitted immediately ({} active)", self.active + 1);
            self.start(slot);
        } else if self
            .max_queue_depth
            .is_some_and(|cap| self.queue.len() >= cap)
        {
            debug!("request {seq} rejected: queue full ({} waiting)", self.queue.len());
            metrics::counter!("detect_rejected_total").increment(1);
            let _ = slot.respond.send(Err(DispatchError::Overloaded));
        } else {
            self.queue.push_back(slot);
            debug!("request {seq} queued at position {}", self.queue.len());
            metrics::gauge!("detect_queue_depth").set(self.queue.len() as f64);
        }
    }

    fn complete(&mut self) {
        // Exactly one Done per started execution, on every outcome branch.
        self.active -= 1;
        if let Some(slot) = self.queue.pop_front() {
            metrics::gauge!("detect_queue_depth").set(self.queue.len() as f64);
            self.start(slot);
        } else {
            metrics::gauge!("detect_active_workers").set(self.active as f64);
        }
    }

    fn start(&mut self, slot: PendingSlot) {
        self.active += 1;
        metrics::gauge!("detect_active_workers").set(self.active as f64);

        let worker = self.worker.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let outcome = worker::run(&worker, &slot.image).await;
            if slot.respond.send(outcome).is_err() {
                debug!("caller went away before completion; discarding result");
            }
            let _ = done.send(Command::Done);
        });
    }
}
