//! Output pin probe: edge detection and PWM measurement.
//!
//! The probe samples one output pin after every system clock, the way a
//! testbench polls `uo_out[n]` once per cycle. An edge is reported on the
//! first tick whose level differs from the previous sample.

use thiserror::Error;

use crate::{Peripheral, Port};

/// A single output pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pin {
    pub port: Port,
    pub bit: u8,
}

impl Pin {
    pub fn new(port: Port, bit: u8) -> Self {
        Pin { port, bit: bit & 7 }
    }

    pub fn level(&self, dev: &Peripheral) -> bool {
        dev.port_out(self.port) & (1 << self.bit) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// A recorded pin transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEdge {
    /// Model tick of the first sample at the new level
    pub tick: u64,
    pub edge: Edge,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("no {edge:?} edge within {waited} cycles")]
    Timeout { edge: Edge, waited: u64 },
}

/// Measured PWM waveform, in system clocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmMeasurement {
    pub high_ticks: u64,
    pub period_ticks: u64,
}

impl PwmMeasurement {
    pub fn duty(&self) -> f64 {
        if self.period_ticks == 0 { return 0.0; }
        self.high_ticks as f64 / self.period_ticks as f64
    }

    pub fn period_ns(&self, clock_hz: u32) -> f64 {
        self.period_ticks as f64 * 1e9 / clock_hz as f64
    }

    /// Measured duty within `tolerance` (relative) of `expected`.
    pub fn duty_within(&self, expected: f64, tolerance: f64) -> bool {
        let d = self.duty();
        d >= expected * (1.0 - tolerance) && d <= expected * (1.0 + tolerance)
    }
}

/// Rising/falling edge counts over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeCount {
    pub rising: u64,
    pub falling: u64,
}

/// Default cap on recorded edges
pub const RECORD_LIMIT: usize = 4096;

/// Edge detector bound to one pin.
pub struct Probe {
    pub pin: Pin,
    level: bool,
    edges: Vec<PinEdge>,
    /// Record every edge seen, not only the ones waited for
    pub recording: bool,
    /// Edges kept while recording; later edges are counted in `dropped`
    pub record_limit: usize,
    pub dropped: u64,
}

impl Probe {
    /// Attach to `pin`, taking its current level as the reference.
    pub fn attach(dev: &Peripheral, pin: Pin) -> Self {
        Probe {
            pin,
            level: pin.level(dev),
            edges: Vec::new(),
            recording: false,
            record_limit: RECORD_LIMIT,
            dropped: 0,
        }
    }

    pub fn level(&self) -> bool {
        self.level
    }

    /// Recorded edges (only while `recording`), oldest first, at most
    /// `record_limit` of them.
    pub fn edges(&self) -> &[PinEdge] {
        &self.edges
    }

    /// Clock the model once and sample the pin.
    pub fn step(&mut self, dev: &mut Peripheral) -> Option<Edge> {
        dev.tick();
        let level = self.pin.level(dev);
        if level == self.level {
            return None;
        }
        self.level = level;
        let edge = if level { Edge::Rising } else { Edge::Falling };
        if self.recording {
            if self.edges.len() < self.record_limit {
                self.edges.push(PinEdge { tick: dev.tick, edge });
            } else {
                self.dropped += 1;
            }
        }
        Some(edge)
    }

    /// Clock until `edge` is seen. Returns the tick of the first sample at
    /// the new level.
    pub fn wait_edge(&mut self, dev: &mut Peripheral, edge: Edge, timeout: u64) -> Result<u64, ProbeError> {
        for _ in 0..timeout {
            if self.step(dev) == Some(edge) {
                return Ok(dev.tick);
            }
        }
        Err(ProbeError::Timeout { edge, waited: timeout })
    }

    /// Rising edge, falling edge, next rising edge. Each wait is bounded
    /// by `timeout`.
    pub fn measure_pwm(&mut self, dev: &mut Peripheral, timeout: u64) -> Result<PwmMeasurement, ProbeError> {
        let start = self.wait_edge(dev, Edge::Rising, timeout)?;
        let fall = self.wait_edge(dev, Edge::Falling, timeout)?;
        let next = self.wait_edge(dev, Edge::Rising, timeout)?;
        Ok(PwmMeasurement { high_ticks: fall - start, period_ticks: next - start })
    }

    pub fn count_edges(&mut self, dev: &mut Peripheral, cycles: u64) -> EdgeCount {
        let mut count = EdgeCount::default();
        for _ in 0..cycles {
            match self.step(dev) {
                Some(Edge::Rising) => count.rising += 1,
                Some(Edge::Falling) => count.falling += 1,
                None => {}
            }
        }
        count
    }
}
