// SPDX-License-Identifier: GPL-3.0-only
//! Strategy that records what it is asked to do

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::BrightnessStrategy;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initialize,
    SetBrightness(f32),
    Diagnose,
    Refresh,
    Dispose,
}

/// Handle kept by the test after the strategy moved into the code under test
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_sets: Arc<AtomicBool>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn brightness_calls(&self) -> Vec<f32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SetBrightness(fraction) => Some(fraction),
                _ => None,
            })
            .collect()
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[derive(Debug)]
pub struct RecordingStrategy {
    name: &'static str,
    usable: bool,
    initialized: bool,
    recorder: Recorder,
}

impl RecordingStrategy {
    pub fn new(name: &'static str, usable: bool) -> (Self, Recorder) {
        let recorder = Recorder::default();
        let strategy = Self {
            name,
            usable,
            initialized: false,
            recorder: recorder.clone(),
        };
        (strategy, recorder)
    }

    /// A strategy that is already initialized and usable
    pub fn working() -> (Self, Recorder) {
        let (mut strategy, recorder) = Self::new("recording", true);
        strategy.initialized = true;
        (strategy, recorder)
    }
}

impl BrightnessStrategy for RecordingStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn initialize(&mut self) -> bool {
        self.recorder.record(Call::Initialize);
        self.initialized = true;
        self.works()
    }

    fn set_brightness(&mut self, fraction: f32) -> bool {
        self.recorder.record(Call::SetBrightness(fraction));
        !self.recorder.fail_sets.load(Ordering::SeqCst)
    }

    fn diagnose(&mut self) {
        self.recorder.record(Call::Diagnose);
    }

    fn print_configuration(&self) {}

    fn test_responsiveness(&mut self) -> Duration {
        Duration::ZERO
    }

    fn refresh(&mut self) -> bool {
        self.recorder.record(Call::Refresh);
        self.works()
    }

    fn dispose(&mut self) {
        self.recorder.record(Call::Dispose);
        self.initialized = false;
    }

    fn works(&self) -> bool {
        self.usable && self.initialized
    }
}
