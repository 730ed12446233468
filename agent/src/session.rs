//! The playback loop run by one session worker.
//!
//! A session owns its device handle and reads the shared `running` flag
//! between polls; the controller is the only other party that writes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chime_common::MetricsContext;
use tracing::{debug, info, warn};

use crate::audio::AudioBuffer;
use crate::controller::{ControllerConfig, PlaybackPolicy};
use crate::device::OutputDevice;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The repeat policy was satisfied.
    Completed,

    /// `stop()` or a newer `start()` cleared the running flag.
    Stopped,

    /// The maximum session duration elapsed.
    Watchdog,

    /// Submission failed or the device died mid-playback.
    DeviceFailed,
}

/// Runtime state of one playback, owned by its worker thread.
pub(crate) struct PlaybackSession {
    // ---
    pub id: u64,
    pub audio: Arc<AudioBuffer>,
    pub policy: PlaybackPolicy,
    pub running: Arc<AtomicBool>,
    pub device: Arc<dyn OutputDevice>,
    pub config: ControllerConfig,
    pub metrics: Option<MetricsContext>,
}

impl PlaybackSession {
    // ---
    /// Plays until the policy, a stop signal, the watchdog or a device
    /// failure ends the session.
    pub fn run(self) -> SessionEnd {
        // ---
        let _guard = RunningGuard {
            running: Arc::clone(&self.running),
            metrics: self.metrics.clone(),
        };
        if let Some(m) = &self.metrics {
            m.session_active.inc();
        }

        let started_at = Instant::now();
        let mut loops_completed: u32 = 0;
        let mut watchdog_fired = false;

        info!(
            "Session {} started: {:.2}s buffer, {:?}",
            self.id,
            self.audio.duration().as_secs_f64(),
            self.policy
        );

        let end = loop {
            if !self.is_running() {
                break SessionEnd::Stopped;
            }

            let mut handle = match self.device.submit(&self.audio) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Session {}: device submission failed: {:#}", self.id, e);
                    self.running.store(false, Ordering::SeqCst);
                    break SessionEnd::DeviceFailed;
                }
            };

            while handle.is_playing() && self.is_running() {
                thread::sleep(self.config.poll_interval);
                watchdog_fired |= self.check_watchdog(started_at);
            }
            watchdog_fired |= self.check_watchdog(started_at);

            loops_completed += 1;
            if let Some(m) = &self.metrics {
                m.playback_loops_total.inc();
            }
            debug!(
                "Session {}: loop {} done after {:?}",
                self.id,
                loops_completed,
                started_at.elapsed()
            );

            if handle.failed() {
                warn!("Session {}: output device failed mid-playback", self.id);
                handle.stop();
                self.running.store(false, Ordering::SeqCst);
                break SessionEnd::DeviceFailed;
            }

            let policy = self.policy;
            if !policy.loop_forever
                && policy.repeat_count > 1
                && loops_completed >= policy.repeat_count
            {
                handle.stop();
                self.running.store(false, Ordering::SeqCst);
                break SessionEnd::Completed;
            }

            if !self.is_running() {
                handle.stop();
                break if watchdog_fired {
                    SessionEnd::Watchdog
                } else {
                    SessionEnd::Stopped
                };
            }

            if !policy.loop_forever && policy.repeat_count == 1 {
                break SessionEnd::Completed;
            }
        };

        let elapsed = started_at.elapsed();
        info!(
            "Session {} ended ({:?}) after {} loop(s), {:.2}s",
            self.id,
            end,
            loops_completed,
            elapsed.as_secs_f64()
        );

        if let Some(m) = &self.metrics {
            m.session_duration_seconds.observe(elapsed.as_secs_f64());
            match end {
                SessionEnd::Completed => m.sessions_completed_total.inc(),
                SessionEnd::Stopped => m.sessions_stopped_total.inc(),
                SessionEnd::Watchdog => m.watchdog_fired_total.inc(),
                SessionEnd::DeviceFailed => m.device_failures_total.inc(),
            }
        }

        end
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clears the running flag once the session outlives its ceiling.
    fn check_watchdog(&self, started_at: Instant) -> bool {
        // ---
        if self.is_running() && started_at.elapsed() > self.config.max_duration {
            info!(
                "Session {}: maximum duration {:?} reached",
                self.id, self.config.max_duration
            );
            self.running.store(false, Ordering::SeqCst);
            return true;
        }
        false
    }
}

/// Clears the running flag on every exit path, unwinding included.
struct RunningGuard {
    running: Arc<AtomicBool>,
    metrics: Option<MetricsContext>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        // ---
        self.running.store(false, Ordering::SeqCst);
        if let Some(m) = &self.metrics {
            m.session_active.dec();
        }
    }
}
