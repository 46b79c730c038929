//! Stimulus scripts.
//!
//! A script is a line-oriented list of bus and probe commands run against a
//! [`Peripheral`] through a [`SpiMaster`]:
//!
//! ```text
//! reset 5                 # hold rst_n low 5 clocks, then idle 5 clocks
//! write 0x00 0xF0         # SPI write frame
//! expect port_a 0xF0
//! read 0x30               # SPI read frame
//! expect read 0x00
//! abort 7 0x00 0xFF       # first 7 bits only, then release chip-select
//! wait 1000
//! measure a 0 0x7F        # check duty and period on uo_out[0]
//! ```
//!
//! Numbers are decimal or `0x` hex. `#` starts a comment.

use log::{debug, info};
use thiserror::Error;

use crate::master::SpiMaster;
use crate::peripherals::{Frame, FrameError};
use crate::probe::{EdgeCount, Pin, Probe, ProbeError, PwmMeasurement};
use crate::{Peripheral, Port, Transaction};

/// Relative tolerance for duty and period checks
pub const TOLERANCE: f64 = 0.01;

/// Register values written by the built-in demo before each PWM check
const DEMO_PWM_SETUP: &str = "\
write 0x00 0xFF
wait 1000
write 0x01 0xFF
wait 1000
write 0x02 0xFF
wait 1000
write 0x03 0xFF
wait 1000
";

/// Built-in scenario: GPIO writes, unmapped address handling, PWM sweep.
pub fn demo_script() -> String {
    let mut s = String::from(
        "\
# GPIO and register file
reset 5
write 0x00 0xF0
expect port_a 0xF0
wait 1000
write 0x01 0xCC
expect port_b 0xCC
wait 100
write 0x30 0xAA
wait 100
read 0x30
expect read 0x00
wait 100
read 0x41
expect read 0x00
abort 9 0x00 0x0F
expect reg 0x00 0xF0
",
    );
    for duty in ["0x7F", "0xE5", "0xFF", "0x00", "0x01"] {
        s.push_str("\n# PWM\nreset 5\n");
        s.push_str(DEMO_PWM_SETUP);
        s.push_str(&format!("write 0x04 {}\nwait 1000\nmeasure a 0 {}\nmeasure b 7 {}\n", duty, duty, duty));
    }
    s
}

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: {source}")]
    Frame {
        line: usize,
        #[source]
        source: FrameError,
    },

    #[error("line {line}: expected {what} = {expected:#04x}, got {actual}")]
    Expectation {
        line: usize,
        what: &'static str,
        expected: u8,
        actual: String,
    },

    #[error("line {line}: {source}")]
    Probe {
        line: usize,
        #[source]
        source: ProbeError,
    },

    #[error("line {line}: {message}")]
    Measurement { line: usize, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    PortA(u8),
    PortB(u8),
    /// Value of the most recent read frame
    Read(u8),
    /// Register contents, inspected directly
    Reg { address: u8, value: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reset(u64),
    Wait(u64),
    Write { address: u8, value: u8 },
    Read { address: u8 },
    Abort { bits: u8, address: u8, value: u8 },
    Expect(Expectation),
    Measure { pin: Pin, duty: Option<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// 1-based source line
    pub line: usize,
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasureOutcome {
    Waveform(PwmMeasurement),
    /// Pin held one level for the whole window
    Flat { level: bool, edges: EdgeCount },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub line: usize,
    pub pin: Pin,
    pub duty: Option<u8>,
    pub outcome: MeasureOutcome,
}

#[derive(Debug, Default)]
pub struct ScriptReport {
    pub transactions: Vec<Transaction>,
    pub measurements: Vec<Measurement>,
    pub expectations: usize,
    pub ticks: u64,
}

/// Parse a script into steps.
pub fn parse_script(src: &str) -> Result<Vec<Step>, ScriptError> {
    let mut steps = Vec::new();
    for (i, raw) in src.lines().enumerate() {
        let line = i + 1;
        let text = raw.split('#').next().unwrap_or("").trim();
        if text.is_empty() { continue; }
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let command = parse_command(&tokens, line)?;
        steps.push(Step { line, command });
    }
    Ok(steps)
}

fn parse_command(tokens: &[&str], line: usize) -> Result<Command, ScriptError> {
    let args = &tokens[1..];
    let command = match tokens[0].to_ascii_lowercase().as_str() {
        "reset" => {
            arity(args, 1, 1, line)?;
            Command::Reset(number(args[0], u64::MAX, line)?)
        }
        "wait" => {
            arity(args, 1, 1, line)?;
            Command::Wait(number(args[0], u64::MAX, line)?)
        }
        "write" => {
            arity(args, 2, 2, line)?;
            Command::Write { address: byte(args[0], line)?, value: byte(args[1], line)? }
        }
        "read" => {
            arity(args, 1, 1, line)?;
            Command::Read { address: byte(args[0], line)? }
        }
        "abort" => {
            arity(args, 3, 3, line)?;
            Command::Abort {
                bits: number(args[0], 15, line)? as u8,
                address: byte(args[1], line)?,
                value: byte(args[2], line)?,
            }
        }
        "expect" => Command::Expect(parse_expectation(args, line)?),
        "measure" => {
            arity(args, 2, 3, line)?;
            let port = match args[0].to_ascii_lowercase().as_str() {
                "a" | "port_a" | "uo_out" => Port::A,
                "b" | "port_b" | "uio_out" => Port::B,
                other => return Err(syntax(line, format!("unknown port '{}'", other))),
            };
            let bit = number(args[1], 7, line)? as u8;
            let duty = args.get(2).map(|s| byte(s, line)).transpose()?;
            Command::Measure { pin: Pin::new(port, bit), duty }
        }
        other => return Err(syntax(line, format!("unknown command '{}'", other))),
    };
    Ok(command)
}

fn parse_expectation(args: &[&str], line: usize) -> Result<Expectation, ScriptError> {
    if args.is_empty() {
        return Err(syntax(line, "expect needs a target".into()));
    }
    let rest = &args[1..];
    Ok(match args[0].to_ascii_lowercase().as_str() {
        "port_a" | "uo_out" => {
            arity(rest, 1, 1, line)?;
            Expectation::PortA(byte(rest[0], line)?)
        }
        "port_b" | "uio_out" => {
            arity(rest, 1, 1, line)?;
            Expectation::PortB(byte(rest[0], line)?)
        }
        "read" => {
            arity(rest, 1, 1, line)?;
            Expectation::Read(byte(rest[0], line)?)
        }
        "reg" => {
            arity(rest, 2, 2, line)?;
            Expectation::Reg { address: byte(rest[0], line)?, value: byte(rest[1], line)? }
        }
        other => return Err(syntax(line, format!("unknown expectation '{}'", other))),
    })
}

fn syntax(line: usize, message: String) -> ScriptError {
    ScriptError::Syntax { line, message }
}

fn arity(args: &[&str], min: usize, max: usize, line: usize) -> Result<(), ScriptError> {
    if args.len() < min || args.len() > max {
        return Err(syntax(line, format!("expected {}..={} arguments, got {}", min, max, args.len())));
    }
    Ok(())
}

fn number(tok: &str, max: u64, line: usize) -> Result<u64, ScriptError> {
    let parsed = match tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => tok.parse::<u64>(),
    };
    match parsed {
        Ok(v) if v <= max => Ok(v),
        Ok(v) => Err(syntax(line, format!("value {} exceeds {}", v, max))),
        Err(_) => Err(syntax(line, format!("invalid number '{}'", tok))),
    }
}

fn byte(tok: &str, line: usize) -> Result<u8, ScriptError> {
    Ok(number(tok, 0xFF, line)? as u8)
}

/// Runs parsed scripts against a peripheral.
pub struct Runner {
    pub master: SpiMaster,
}

impl Runner {
    pub fn new(master: SpiMaster) -> Self {
        Runner { master }
    }

    pub fn run(&self, dev: &mut Peripheral, steps: &[Step]) -> Result<ScriptReport, ScriptError> {
        let start = dev.tick;
        let mut report = ScriptReport::default();
        for step in steps {
            self.run_step(dev, step, &mut report)?;
        }
        report.ticks = dev.tick - start;
        info!(
            "script done: {} transactions, {} checks, {} measurements, {} ticks",
            report.transactions.len(), report.expectations, report.measurements.len(), report.ticks
        );
        Ok(report)
    }

    fn run_step(&self, dev: &mut Peripheral, step: &Step, report: &mut ScriptReport) -> Result<(), ScriptError> {
        let line = step.line;
        let frame_err = |source| ScriptError::Frame { line, source };
        match step.command {
            Command::Reset(cycles) => {
                dev.set_ui_in(1 << crate::UI_NCS);
                dev.set_reset(false);
                dev.run(cycles.max(1));
                dev.set_reset(true);
                dev.run(cycles);
            }
            Command::Wait(cycles) => {
                report.transactions.extend(dev.run(cycles));
            }
            Command::Write { address, value } => {
                let frame = Frame::write(address, value).map_err(frame_err)?;
                report.transactions.extend(self.master.transfer(dev, frame));
            }
            Command::Read { address } => {
                let frame = Frame::read(address).map_err(frame_err)?;
                report.transactions.extend(self.master.transfer(dev, frame));
            }
            Command::Abort { bits, address, value } => {
                let frame = Frame::write(address, value).map_err(frame_err)?;
                report.transactions.extend(self.master.abort(dev, frame, bits));
            }
            Command::Expect(expectation) => {
                check(dev, expectation, line)?;
                report.expectations += 1;
            }
            Command::Measure { pin, duty } => {
                let outcome = measure(dev, pin, duty, line)?;
                debug!("line {}: {:?} {:?}", line, pin, outcome);
                report.measurements.push(Measurement { line, pin, duty, outcome });
            }
        }
        Ok(())
    }
}

impl Default for Runner {
    fn default() -> Self {
        Runner::new(SpiMaster::default())
    }
}

/// Parse and run in one go.
pub fn run_script(dev: &mut Peripheral, master: SpiMaster, src: &str) -> Result<ScriptReport, ScriptError> {
    let steps = parse_script(src)?;
    Runner::new(master).run(dev, &steps)
}

fn check(dev: &Peripheral, expectation: Expectation, line: usize) -> Result<(), ScriptError> {
    let (what, expected, actual) = match expectation {
        Expectation::PortA(v) => ("uo_out", v, Some(dev.port_a_out())),
        Expectation::PortB(v) => ("uio_out", v, Some(dev.port_b_out())),
        Expectation::Read(v) => ("read data", v, dev.last_read()),
        Expectation::Reg { address, value } => ("register", value, Some(dev.regs.read(address))),
    };
    if actual == Some(expected) {
        return Ok(());
    }
    Err(ScriptError::Expectation {
        line,
        what,
        expected,
        actual: actual.map_or_else(|| "nothing".to_string(), |v| format!("{:#04x}", v)),
    })
}

fn measure(dev: &mut Peripheral, pin: Pin, duty: Option<u8>, line: usize) -> Result<MeasureOutcome, ScriptError> {
    let period = dev.config().pwm_period() as u64;
    // First-edge searches run at least 10k cycles
    let window = (3 * period).max(10_000);
    let mut probe = Probe::attach(dev, pin);
    let fail = |message: String| ScriptError::Measurement { line, message };

    match duty {
        Some(0) | Some(0xFF) => {
            let level = probe.level();
            let edges = probe.count_edges(dev, window);
            // 0% must sit low and never rise, 100% must sit high and never fall
            let full = duty == Some(0xFF);
            if level != full {
                return Err(fail(format!(
                    "pin held {} at {}% duty",
                    if level { "high" } else { "low" },
                    if full { 100 } else { 0 }
                )));
            }
            if !full && edges.rising > 0 {
                return Err(fail(format!("{} rising edges at 0% duty", edges.rising)));
            }
            if full && edges.falling > 0 {
                return Err(fail(format!("{} falling edges at 100% duty", edges.falling)));
            }
            Ok(MeasureOutcome::Flat { level, edges })
        }
        _ => {
            let m = probe
                .measure_pwm(dev, window)
                .map_err(|source| ScriptError::Probe { line, source })?;
            if let Some(d) = duty {
                let expected = d as f64 / 255.0;
                if !m.duty_within(expected, TOLERANCE) {
                    return Err(fail(format!("duty {:.4} outside {:.4} ±1%", m.duty(), expected)));
                }
                let nominal = period as f64;
                let measured = m.period_ticks as f64;
                if measured < nominal * (1.0 - TOLERANCE) || measured > nominal * (1.0 + TOLERANCE) {
                    return Err(fail(format!("period {} cycles outside {} ±1%", m.period_ticks, period)));
                }
            }
            Ok(MeasureOutcome::Waveform(m))
        }
    }
}
