//! PWM generator: two free-running period counters sharing one duty level.
//!
//! Each counter counts 0..period-1 and wraps. The output is high while the
//! counter is below `duty_threshold(duty, period)`, so duty 0 never goes high
//! and duty 255 never goes low.

/// Compare threshold for an 8-bit duty level, rounded to the nearest cycle.
///
/// `duty_threshold(0, p) == 0` and `duty_threshold(255, p) == p` for any `p`.
pub fn duty_threshold(duty: u8, period: u32) -> u32 {
    ((duty as u64 * period as u64 + 127) / 255) as u32
}

/// Single free-running PWM counter
#[derive(Debug, Clone)]
pub struct PwmCounter {
    count: u32,
    period: u32,
}

impl PwmCounter {
    pub fn new(period: u32) -> Self {
        PwmCounter { count: 0, period: period.max(1) }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Output level for the current count.
    #[inline]
    pub fn level(&self, threshold: u32) -> bool {
        self.count < threshold
    }

    #[inline]
    pub fn advance(&mut self) {
        self.count += 1;
        if self.count >= self.period {
            self.count = 0;
        }
    }

    pub fn count(&self) -> u32 { self.count }

    pub fn period(&self) -> u32 { self.period }
}

/// Port A and port B counters
pub struct Pwm {
    pub a: PwmCounter,
    pub b: PwmCounter,
    /// Levels computed on the last clock
    pub level_a: bool,
    pub level_b: bool,
}

impl Pwm {
    pub fn new(period: u32) -> Self {
        Pwm {
            a: PwmCounter::new(period),
            b: PwmCounter::new(period),
            level_a: false,
            level_b: false,
        }
    }

    pub fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
        self.level_a = false;
        self.level_b = false;
    }

    pub fn period(&self) -> u32 {
        self.a.period()
    }

    /// Compare both counters against `duty`, then advance them.
    /// Returns (port A level, port B level) for this clock.
    pub fn clock(&mut self, duty: u8) -> (bool, bool) {
        let threshold = duty_threshold(duty, self.period());
        self.level_a = self.a.level(threshold);
        self.level_b = self.b.level(threshold);
        self.a.advance();
        self.b.advance();
        (self.level_a, self.level_b)
    }

    pub fn save_state(&self) -> crate::savestate::PwmState {
        crate::savestate::PwmState {
            count_a: self.a.count, count_b: self.b.count,
            level_a: self.level_a, level_b: self.level_b,
        }
    }

    pub fn load_state(&mut self, s: &crate::savestate::PwmState) {
        self.a.count = s.count_a % self.a.period;
        self.b.count = s.count_b % self.b.period;
        self.level_a = s.level_a;
        self.level_b = s.level_b;
    }
}

/// Combine enable masks with the PWM level into a port value.
///
/// Output-enabled bits without PWM drive high; PWM bits follow `level`.
#[inline]
pub fn compose_port(output_enable: u8, pwm_enable: u8, level: bool) -> u8 {
    let pwm_mask = if level { 0xFF } else { 0x00 };
    output_enable & (!pwm_enable | pwm_mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const P: u32 = 3333;

    fn high_ticks(duty: u8) -> u32 {
        let mut pwm = Pwm::new(P);
        (0..P).filter(|_| pwm.clock(duty).0).count() as u32
    }

    #[test]
    fn test_threshold_bounds() {
        assert_eq!(duty_threshold(0, P), 0);
        assert_eq!(duty_threshold(255, P), P);
        assert_eq!(duty_threshold(0x7F, P), 1660);
        assert_eq!(duty_threshold(255, 1), 1);
    }

    #[test]
    fn test_zero_duty_never_high() {
        assert_eq!(high_ticks(0), 0);
    }

    #[test]
    fn test_full_duty_never_low() {
        assert_eq!(high_ticks(255), P);
    }

    #[test]
    fn test_counter_wraps() {
        let mut c = PwmCounter::new(4);
        for _ in 0..5 { c.advance(); }
        assert_eq!(c.count(), 1);
    }

    #[test]
    fn test_counters_in_phase() {
        let mut pwm = Pwm::new(P);
        for _ in 0..(P * 2 + 17) {
            let (a, b) = pwm.clock(0xCF);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_compose_port() {
        assert_eq!(compose_port(0xF0, 0x00, false), 0xF0);
        assert_eq!(compose_port(0xFF, 0x0F, false), 0xF0);
        assert_eq!(compose_port(0xFF, 0x0F, true), 0xFF);
        assert_eq!(compose_port(0x00, 0xFF, true), 0x00);
    }

    proptest! {
        #[test]
        fn prop_high_time_within_one_cycle(duty: u8) {
            let exact = duty as f64 * P as f64 / 255.0;
            let high = high_ticks(duty) as f64;
            prop_assert!((high - exact).abs() <= 1.0);
        }

        #[test]
        fn prop_threshold_monotonic(duty in 0u8..255) {
            prop_assert!(duty_threshold(duty, P) <= duty_threshold(duty + 1, P));
        }
    }
}
