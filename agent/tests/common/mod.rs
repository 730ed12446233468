//! Shared test fixtures: an instrumented output device and helpers.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use agent::{AudioBuffer, OutputDevice, PlaybackHandle};

/// Something the fake device observed, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Submit(usize),
    Stop(usize),
    Release(usize),
}

#[derive(Default)]
struct Recorder {
    events: Vec<(Event, Instant)>,
    active: usize,
    max_active: usize,
    submits: usize,
}

/// Output device that "plays" for the buffer's duration in wall-clock time.
///
/// Counts concurrently held handles so tests can assert that sessions never
/// overlap on the device.
#[derive(Clone, Default)]
pub struct FakeDevice {
    recorder: Arc<Mutex<Recorder>>,
    fail_submit: bool,
    die_after: Option<Duration>,
}

impl FakeDevice {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submission fails as if the device were unplugged.
    pub fn failing() -> Self {
        // ---
        Self {
            fail_submit: true,
            ..Self::default()
        }
    }

    /// Handles report failure `after` into playback.
    pub fn dying_after(after: Duration) -> Self {
        // ---
        Self {
            die_after: Some(after),
            ..Self::default()
        }
    }

    pub fn submits(&self) -> usize {
        self.recorder.lock().unwrap().submits
    }

    pub fn max_active(&self) -> usize {
        self.recorder.lock().unwrap().max_active
    }

    pub fn active(&self) -> usize {
        self.recorder.lock().unwrap().active
    }

    pub fn events(&self) -> Vec<Event> {
        // ---
        self.recorder
            .lock()
            .unwrap()
            .events
            .iter()
            .map(|(e, _)| *e)
            .collect()
    }

    pub fn time_of(&self, event: Event) -> Option<Instant> {
        // ---
        self.recorder
            .lock()
            .unwrap()
            .events
            .iter()
            .find(|(e, _)| *e == event)
            .map(|(_, at)| *at)
    }

    pub fn position(&self, event: Event) -> Option<usize> {
        self.events().iter().position(|e| *e == event)
    }
}

impl OutputDevice for FakeDevice {
    fn submit(&self, audio: &AudioBuffer) -> anyhow::Result<Box<dyn PlaybackHandle>> {
        // ---
        if self.fail_submit {
            anyhow::bail!("device unavailable");
        }

        let mut rec = self.recorder.lock().unwrap();
        let id = rec.submits;
        rec.submits += 1;
        rec.active += 1;
        rec.max_active = rec.max_active.max(rec.active);
        rec.events.push((Event::Submit(id), Instant::now()));

        Ok(Box::new(FakeHandle {
            id,
            started: Instant::now(),
            duration: audio.duration(),
            die_after: self.die_after,
            stopped: false,
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

struct FakeHandle {
    id: usize,
    started: Instant,
    duration: Duration,
    die_after: Option<Duration>,
    stopped: bool,
    recorder: Arc<Mutex<Recorder>>,
}

impl PlaybackHandle for FakeHandle {
    fn is_playing(&self) -> bool {
        !self.stopped && !self.failed() && self.started.elapsed() < self.duration
    }

    fn stop(&mut self) {
        // ---
        if !self.stopped {
            self.stopped = true;
            let mut rec = self.recorder.lock().unwrap();
            rec.events.push((Event::Stop(self.id), Instant::now()));
        }
    }

    fn failed(&self) -> bool {
        self.die_after
            .map_or(false, |after| self.started.elapsed() >= after)
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        // ---
        let mut rec = self.recorder.lock().unwrap();
        rec.active -= 1;
        rec.events.push((Event::Release(self.id), Instant::now()));
    }
}

/// Silent mono buffer lasting `ms` milliseconds.
pub fn silence_ms(ms: usize) -> Arc<AudioBuffer> {
    // 1 kHz sample rate: one frame per millisecond
    Arc::new(AudioBuffer::from_i16(&vec![0i16; ms], 1, 1000).expect("buffer"))
}

/// Polls `cond` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    // ---
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
