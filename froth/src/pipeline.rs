//! # Threaded measurement pipeline
//!
//! Frames are handed from the acquisition thread to a processing thread through a single slot.
//! When the processing thread is still busy, a newly pushed frame replaces the pending one, so
//! slow estimation skips frames instead of building up latency.
//!
//! Flow is estimated without holding the session lock. Results are applied only if the session
//! was not reset in the meantime.

use crate::prelude::v1::*;
use log::*;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
};
use std::thread::{spawn, JoinHandle};
use std::time::Instant;

#[derive(Default)]
struct FrameSlot {
    pending: Option<Frame>,
    busy: bool,
}

struct Shared {
    slot: Mutex<FrameSlot>,
    cond: Condvar,
    signal: AtomicBool,
    received: AtomicU64,
    skipped: AtomicU64,
}

impl Shared {
    fn slot(&self) -> MutexGuard<FrameSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks the pipeline stopped when the processing thread exits, including by panic.
struct ExitGuard<'a>(&'a Shared);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("processing thread panicked, pipeline stopped");
        }

        self.0.signal.store(false, Ordering::Relaxed);
        let mut slot = self.0.slot();
        slot.busy = false;
        self.0.cond.notify_all();
    }
}

/// Session driven by a background processing thread.
pub struct Pipeline {
    session: Arc<Mutex<Session>>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Start processing frames into a session.
    ///
    /// # Arguments
    ///
    /// * `session` - session to record into. It may be calibrated before or after spawning.
    /// * `estimator` - flow estimator, moved to the processing thread.
    pub fn spawn<E: FlowEstimator + Send + 'static>(session: Session, estimator: E) -> Self {
        let session = Arc::new(Mutex::new(session));
        let shared = Arc::new(Shared {
            slot: Default::default(),
            cond: Condvar::new(),
            signal: AtomicBool::new(true),
            received: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        });

        let handle = Some({
            let session = session.clone();
            let shared = shared.clone();
            spawn(move || Worker::new(estimator).run(&session, &shared))
        });

        Self {
            session,
            shared,
            handle,
        }
    }

    /// Hand a frame to the processing thread.
    ///
    /// Never blocks on flow estimation. If a frame is still pending, it is replaced.
    pub fn push_frame(&self, frame: Frame) {
        self.shared.received.fetch_add(1, Ordering::Relaxed);

        let mut slot = self.shared.slot();
        if let Some(old) = slot.pending.replace(frame) {
            trace!("frame {} replaced before processing", old.index());
            self.shared.skipped.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.cond.notify_all();
    }

    /// Block until every pushed frame has been processed or skipped.
    ///
    /// Returns early if the processing thread has stopped.
    pub fn flush(&self) {
        let mut slot = self.shared.slot();
        while (slot.pending.is_some() || slot.busy) && self.shared.signal.load(Ordering::Relaxed)
        {
            slot = self
                .shared
                .cond
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Lock the session for direct access.
    ///
    /// Processing is paused while the guard is held.
    pub fn session(&self) -> MutexGuard<Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a consistent snapshot of the session from any thread.
    pub fn finalize(&self) -> Result<SessionSnapshot> {
        self.session().finalize()
    }

    /// Reset the session. No sample from a pair started before the reset is recorded.
    pub fn reset(&self) {
        self.session().reset();
    }

    /// Check whether the processing thread is still accepting frames.
    pub fn is_running(&self) -> bool {
        self.shared.signal.load(Ordering::Relaxed)
    }

    /// Session statistics including handoff counters.
    pub fn stats(&self) -> SessionStats {
        let mut stats = self.session().stats().clone();
        stats.frames_received = self.shared.received.load(Ordering::Relaxed);
        stats.frames_skipped = self.shared.skipped.load(Ordering::Relaxed);
        stats
    }

    /// Stop the processing thread and return the session.
    pub fn shutdown(mut self) -> Session {
        self.stop();
        let session = std::mem::take(&mut *self.session());
        session
    }

    fn stop(&mut self) {
        self.shared.signal.store(false, Ordering::Relaxed);
        self.shared.cond.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("processing thread panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<E> {
    estimator: E,
    prev: Option<(Frame, u64)>,
}

impl<E: FlowEstimator> Worker<E> {
    fn new(estimator: E) -> Self {
        Self {
            estimator,
            prev: None,
        }
    }

    fn run(mut self, session: &Mutex<Session>, shared: &Shared) {
        info!("processing thread started with {} estimator", self.estimator.name());

        let _guard = ExitGuard(shared);

        loop {
            let frame = {
                let mut slot = shared.slot();
                loop {
                    if !shared.signal.load(Ordering::Relaxed) {
                        info!("processing thread stopped");
                        return;
                    }
                    if let Some(frame) = slot.pending.take() {
                        slot.busy = true;
                        break frame;
                    }
                    slot = shared
                        .cond
                        .wait(slot)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };

            self.process(session, frame);

            shared.slot().busy = false;
            shared.cond.notify_all();
        }
    }

    fn process(&mut self, session: &Mutex<Session>, next: Frame) {
        let lock = move || session.lock().unwrap_or_else(PoisonError::into_inner);

        let epoch = lock().epoch();

        // Frames from before a reset never pair with newer ones.
        let prev = match self.prev.take() {
            Some((frame, e)) if e == epoch => Some(frame),
            _ => None,
        };

        if let Some(prev) = prev {
            let checked = {
                let mut s = lock();
                if s.state() == SessionState::Running {
                    Some(s.check_pair(&prev, &next))
                } else {
                    None
                }
            };

            match checked {
                Some(Ok(())) => {
                    let timer = Instant::now();
                    let field = self.estimator.estimate(&prev, &next);
                    let elapsed = timer.elapsed();

                    let mut s = lock();
                    if s.epoch() != epoch {
                        debug!("session reset during frame {}, result abandoned", next.index());
                    } else {
                        match s.apply_estimate(&prev, &next, field, elapsed) {
                            Ok(report) => trace!(
                                "frame {}: {} samples, {} skipped",
                                next.index(),
                                report.samples.len(),
                                report.skipped.len()
                            ),
                            Err(e) if e.is_recoverable() => {
                                debug!("frame {} skipped: {}", next.index(), e)
                            }
                            Err(e) => warn!("frame {} not processed: {}", next.index(), e),
                        }
                    }
                }
                Some(Err(e)) if e.is_recoverable() => {
                    debug!("frame {} skipped: {}", next.index(), e)
                }
                Some(Err(e)) => warn!("frame {} not processed: {}", next.index(), e),
                None => {}
            }
        }

        self.prev = Some((next, epoch));
    }
}
