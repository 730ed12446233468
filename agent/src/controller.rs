//! Playback Session Controller.
//!
//! Owns at most one playback session at a time. `start` tears down whatever
//! is playing (signal, then join) before launching the replacement on its
//! own worker thread, so two sessions never hold the output device at once.
//! `stop` and `status` never block on a worker.
//!
//! Two locks are involved:
//! - the launch gate serializes `start` calls end to end, so the
//!   join-then-spawn sequence is atomic with respect to other starts;
//! - the session slot guards only the reference swap and is never held
//!   across a join.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chime_common::MetricsContext;
use tracing::{debug, error, info};

use crate::audio::AudioBuffer;
use crate::device::OutputDevice;
use crate::error::PlaybackError;
use crate::session::{PlaybackSession, SessionEnd};

/// Default ceiling on a single session's wall-clock lifetime.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(60);

/// Default interval between device liveness polls; also the cancellation
/// latency bound.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a session repeats its buffer.
///
/// `repeat_count` only matters when `loop_forever` is false; 1 means play once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackPolicy {
    // ---
    pub loop_forever: bool,
    pub repeat_count: u32,
}

impl PlaybackPolicy {
    // ---
    /// Play the buffer a single time.
    pub fn once() -> Self {
        Self::repeat(1)
    }

    /// Play the buffer `count` times back to back.
    pub fn repeat(count: u32) -> Self {
        // ---
        Self {
            loop_forever: false,
            repeat_count: count,
        }
    }

    /// Replay until stopped or the watchdog fires.
    pub fn forever() -> Self {
        // ---
        Self {
            loop_forever: true,
            repeat_count: 1,
        }
    }

    pub fn validate(&self) -> Result<(), PlaybackError> {
        // ---
        if !self.loop_forever && self.repeat_count < 1 {
            return Err(PlaybackError::InvalidPolicy(
                "repeat count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Timing knobs for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    // ---
    /// No session may run longer than this, whatever its policy.
    pub max_duration: Duration,

    /// Sleep between checks of the device and the running flag.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_duration: DEFAULT_MAX_DURATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

struct ActiveSession {
    id: u64,
    running: Arc<AtomicBool>,
    worker: JoinHandle<SessionEnd>,
}

/// Serializes access to the output device across playback requests.
///
/// Construct once and share behind an `Arc`.
pub struct PlaybackController {
    // ---
    device: Arc<dyn OutputDevice>,
    config: ControllerConfig,
    metrics: Option<MetricsContext>,
    launch_gate: Mutex<()>,
    session: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
}

impl PlaybackController {
    // ---
    pub fn new(device: Arc<dyn OutputDevice>, config: ControllerConfig) -> Self {
        // ---
        Self {
            device,
            config,
            metrics: None,
            launch_gate: Mutex::new(()),
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reports session lifecycle events to `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.metrics = Some(metrics);
        self
    }

    /// Preempts any running session, then launches `audio` under `policy`.
    ///
    /// Blocks only while the previous worker exits (bounded by the poll
    /// interval); returns as soon as the new worker is launched.
    ///
    /// # Errors
    ///
    /// Returns `EmptyAudio` or `InvalidPolicy` for precondition violations.
    /// The running session is left untouched in that case.
    pub fn start(
        &self,
        audio: Arc<AudioBuffer>,
        policy: PlaybackPolicy,
    ) -> Result<(), PlaybackError> {
        // ---
        policy.validate()?;
        if audio.is_empty() {
            return Err(PlaybackError::EmptyAudio);
        }

        let _gate = self
            .launch_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let previous = self.slot().take();
        if let Some(previous) = previous {
            self.retire(previous);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let running = Arc::new(AtomicBool::new(true));
        let session = PlaybackSession {
            id,
            audio,
            policy,
            running: Arc::clone(&running),
            device: Arc::clone(&self.device),
            config: self.config,
            metrics: self.metrics.clone(),
        };

        match thread::Builder::new()
            .name(format!("playback-{id}"))
            .spawn(move || session.run())
        {
            Ok(worker) => {
                if let Some(m) = &self.metrics {
                    m.sessions_started_total.inc();
                }
                *self.slot() = Some(ActiveSession {
                    id,
                    running,
                    worker,
                });
            }
            Err(e) => {
                // Nothing is playing; status() reports false
                error!("Failed to spawn playback worker: {}", e);
            }
        }

        Ok(())
    }

    /// Signals the running session to stop. Idempotent; never blocks on the
    /// worker, which exits at its next poll.
    pub fn stop(&self) {
        // ---
        if let Some(active) = self.slot().as_ref() {
            if active.running.swap(false, Ordering::SeqCst) {
                info!("Stop requested for session {}", active.id);
            }
        }
    }

    /// Whether a session is currently marked running. Advisory only: the
    /// session may end right after this returns.
    pub fn status(&self) -> bool {
        // ---
        self.slot()
            .as_ref()
            .map_or(false, |active| active.running.load(Ordering::SeqCst))
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signals `previous` and waits for its worker to exit.
    fn retire(&self, previous: ActiveSession) {
        // ---
        if previous.running.swap(false, Ordering::SeqCst) {
            info!("Preempting session {}", previous.id);
            if let Some(m) = &self.metrics {
                m.sessions_preempted_total.inc();
            }
        }

        match previous.worker.join() {
            Ok(end) => debug!("Session {} joined ({:?})", previous.id, end),
            Err(_) => error!("Playback worker for session {} panicked", previous.id),
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        // ---
        let previous = self.slot().take();
        if let Some(previous) = previous {
            self.retire(previous);
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn policy_constructors() {
        // ---
        assert_eq!(
            PlaybackPolicy::once(),
            PlaybackPolicy {
                loop_forever: false,
                repeat_count: 1
            }
        );
        assert_eq!(PlaybackPolicy::repeat(3).repeat_count, 3);
        assert!(PlaybackPolicy::forever().loop_forever);
    }

    #[test]
    fn zero_repeats_is_invalid_unless_looping() {
        // ---
        assert!(matches!(
            PlaybackPolicy::repeat(0).validate(),
            Err(PlaybackError::InvalidPolicy(_))
        ));

        let looping = PlaybackPolicy {
            loop_forever: true,
            repeat_count: 0,
        };
        assert!(looping.validate().is_ok());
    }

    #[test]
    fn default_config_uses_sixty_second_ceiling() {
        // ---
        let config = ControllerConfig::default();
        assert_eq!(config.max_duration, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }
}
