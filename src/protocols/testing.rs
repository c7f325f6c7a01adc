// SPDX-License-Identifier: GPL-3.0-only
//! In-memory protocols for tests

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};

use super::{BrightnessRange, GammaProtocol, GammaRamp, RangeProtocol};

/// What a mock device saw, shared with the test that created it
#[derive(Debug, Default)]
pub struct MockLog {
    pub values: Vec<u32>,
    pub ramps: Vec<GammaRamp>,
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub released: bool,
}

pub type SharedLog = Arc<Mutex<MockLog>>;

#[derive(Debug)]
pub struct MockRange {
    name: String,
    range: BrightnessRange,
    log: SharedLog,
}

impl MockRange {
    pub fn new(name: &str, range: BrightnessRange) -> (Box<dyn RangeProtocol>, SharedLog) {
        let log = SharedLog::default();
        let mock = Self {
            name: name.to_string(),
            range,
            log: log.clone(),
        };
        (Box::new(mock), log)
    }

    pub fn failing(name: &str) -> (Box<dyn RangeProtocol>, SharedLog) {
        let (mock, log) = Self::new(name, BrightnessRange { min: 0, current: 0, max: 0 });
        log.lock().unwrap().fail_reads = true;
        (mock, log)
    }
}

impl RangeProtocol for MockRange {
    fn description(&self) -> String {
        self.name.clone()
    }

    fn read_range(&mut self) -> Result<BrightnessRange> {
        let log = self.log.lock().unwrap();
        if log.fail_reads {
            bail!("no answer from {}", self.name);
        }
        Ok(BrightnessRange {
            current: log.values.last().copied().unwrap_or(self.range.current),
            ..self.range
        })
    }

    fn write_value(&mut self, value: u32) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.fail_writes {
            bail!("write to {} rejected", self.name);
        }
        log.values.push(value);
        Ok(())
    }
}

impl Drop for MockRange {
    fn drop(&mut self) {
        self.log.lock().unwrap().released = true;
    }
}

#[derive(Debug)]
pub struct MockGamma {
    name: String,
    baseline: GammaRamp,
    log: SharedLog,
}

impl MockGamma {
    pub fn new(name: &str, baseline: GammaRamp) -> (Box<dyn GammaProtocol>, SharedLog) {
        let log = SharedLog::default();
        let mock = Self {
            name: name.to_string(),
            baseline,
            log: log.clone(),
        };
        (Box::new(mock), log)
    }
}

impl GammaProtocol for MockGamma {
    fn description(&self) -> String {
        self.name.clone()
    }

    fn read_ramp(&mut self) -> Result<GammaRamp> {
        let log = self.log.lock().unwrap();
        if log.fail_reads {
            bail!("gamma ramp of {} unavailable", self.name);
        }
        Ok(log.ramps.last().cloned().unwrap_or_else(|| self.baseline.clone()))
    }

    fn write_ramp(&mut self, ramp: &GammaRamp) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.fail_writes {
            bail!("gamma ramp of {} rejected", self.name);
        }
        log.ramps.push(ramp.clone());
        Ok(())
    }
}

impl Drop for MockGamma {
    fn drop(&mut self) {
        self.log.lock().unwrap().released = true;
    }
}
