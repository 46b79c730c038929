//! Rolling waveform capture of both output ports.
//!
//! Stores one `(uo_out, uio_out)` sample per captured clock in a ring and
//! renders them as 16 logic-analyzer lanes: port A bits 0..7 on top, port B
//! bits 0..7 below.

use std::collections::VecDeque;

use crate::Peripheral;

/// Number of lanes rendered (8 bits x 2 ports)
pub const LANES: usize = 16;

pub struct WaveTrace {
    samples: VecDeque<(u8, u8)>,
    capacity: usize,
    /// Clocks per captured sample
    pub stride: u64,
    phase: u64,
}

impl WaveTrace {
    pub fn new(capacity: usize, stride: u64) -> Self {
        WaveTrace {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            stride: stride.max(1),
            phase: 0,
        }
    }

    pub fn push(&mut self, port_a: u8, port_b: u8) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((port_a, port_b));
    }

    /// Offer the current output state; one in every `stride` calls is kept.
    #[inline]
    pub fn sample(&mut self, dev: &Peripheral) {
        if self.phase == 0 {
            self.push(dev.port_a_out(), dev.port_b_out());
        }
        self.phase = (self.phase + 1) % self.stride;
    }

    /// Clock the model `cycles` times, sampling after each clock.
    pub fn run(&mut self, dev: &mut Peripheral, cycles: u64) {
        for _ in 0..cycles {
            dev.tick();
            self.sample(dev);
        }
    }

    pub fn len(&self) -> usize { self.samples.len() }

    pub fn is_empty(&self) -> bool { self.samples.is_empty() }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.phase = 0;
    }

    /// Level of `lane` in sample `idx` (0 = oldest).
    pub fn level(&self, idx: usize, lane: usize) -> bool {
        match self.samples.get(idx) {
            Some(&(a, _)) if lane < 8 => a & (1 << lane) != 0,
            Some(&(_, b)) if lane < LANES => b & (1 << (lane - 8)) != 0,
            _ => false,
        }
    }

    /// Render the most recent `width` samples into a `width` x
    /// `LANES * lane_height` bitmap (true = lit). Each lane draws its high
    /// level on the top row and its low level on the bottom row, with a
    /// vertical stroke at every transition.
    pub fn render(&self, width: usize, lane_height: usize) -> Vec<bool> {
        let lane_height = lane_height.max(3);
        let height = LANES * lane_height;
        let mut px = vec![false; width * height];
        let first = self.samples.len().saturating_sub(width);
        let shown = self.samples.len() - first;
        // Right-align so the newest sample is at the right edge
        let x0 = width - shown.min(width);

        for lane in 0..LANES {
            let top = lane * lane_height + 1;
            let bottom = (lane + 1) * lane_height - 2;
            let mut prev: Option<bool> = None;
            for i in 0..shown {
                let x = x0 + i;
                let level = self.level(first + i, lane);
                let y = if level { top } else { bottom };
                px[y * width + x] = true;
                if prev.map_or(false, |p| p != level) {
                    for yy in top..=bottom {
                        px[yy * width + x] = true;
                    }
                }
                prev = Some(level);
            }
        }
        px
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_capacity() {
        let mut t = WaveTrace::new(3, 1);
        for i in 0..5 {
            t.push(i, 0);
        }
        assert_eq!(t.len(), 3);
        assert!(t.level(0, 1)); // sample 2 = 0b10
        assert!(t.level(2, 2)); // sample 4 = 0b100
    }

    #[test]
    fn test_stride() {
        let mut dev = Peripheral::new();
        let mut t = WaveTrace::new(100, 10);
        t.run(&mut dev, 95);
        assert_eq!(t.len(), 10);
    }

    #[test]
    fn test_render_edge_stroke() {
        let mut t = WaveTrace::new(4, 1);
        t.push(0x00, 0x80);
        t.push(0x01, 0x80);
        let px = t.render(4, 4);
        let w = 4;
        // Lane 0: low then high, right-aligned at x=2,3
        assert!(px[2 * w + 2]); // bottom row of lane 0
        assert!(px[1 * w + 3] && px[2 * w + 3]); // transition stroke
        // Lane 15 (port B bit 7) constantly high
        assert!(px[(15 * 4 + 1) * w + 2] && px[(15 * 4 + 1) * w + 3]);
        assert!(!px[0]);
    }
}
