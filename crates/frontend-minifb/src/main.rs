//! spipwm-sim: SPI PWM peripheral simulator frontend.
//!
//! Two execution modes:
//!
//! - **GUI mode** (default): logic-analyzer window showing all 16 output
//!   pins, with keyboard control of the register file over real SPI frames.
//! - **Headless mode** (`--headless`): runs a stimulus script, prints the
//!   transactions and measurements, exits non-zero on the first failure.
//!
//! Both modes run the stimulus script first (the built-in demo when no path
//! is given).

use clap::Parser;
use log::{debug, info, warn};
use minifb::{Key, Window, WindowOptions, Scale, ScaleMode};
use spipwm_core::master::SpiMaster;
use spipwm_core::script::{self, MeasureOutcome, ScriptReport};
use spipwm_core::trace::{WaveTrace, LANES};
use spipwm_core::{png, savestate, Peripheral, Register, SimConfig, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

/// Samples shown across the window
const TRACE_WIDTH: usize = 640;
/// Pixel rows per lane
const LANE_HEIGHT: usize = 10;
/// Window refresh rate
const TARGET_FPS: usize = 60;

const COLOR_HIGH: u32 = 0x0033_FF66;
const COLOR_LOW: u32 = 0x0010_1418;
const COLOR_SPLIT: u32 = 0x0030_3840;

#[derive(Parser, Debug)]
#[command(name = "spipwm-sim", version, about = "SPI-programmed GPIO/PWM peripheral simulator")]
struct Args {
    /// Stimulus script (built-in demo when omitted)
    script: Option<PathBuf>,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// TOML configuration (clock, PWM frequency, bus timing)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Extra clocks to free-run after the script
    #[arg(long, value_name = "N", default_value_t = 0)]
    cycles: u64,

    /// Write a waveform capture after the run (headless)
    #[arg(long, value_name = "FILE")]
    png: Option<PathBuf>,

    /// Save the model state after the run (headless)
    #[arg(long, value_name = "FILE")]
    save_state: Option<PathBuf>,

    /// Restore a saved state before running (skips the built-in demo)
    #[arg(long, value_name = "FILE")]
    load_state: Option<PathBuf>,

    /// Window scale 1-4
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=4))]
    scale: u8,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

// ─── Main ───────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = match &args.config {
        Some(path) => match SimConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Config error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => SimConfig::default(),
    };
    debug!("config: {:?}", config);

    let source = match startup_script(&args) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut dev = Peripheral::new_with_config(config.peripheral);
    let master = SpiMaster::new(config.bus);

    if let Some(path) = &args.load_state {
        match savestate::load_from_file(path, dev.config().pwm_period()) {
            Ok(state) => dev.load_state(&state),
            Err(e) => {
                eprintln!("Load state error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if args.headless {
        run_headless(&args, &mut dev, master, source.as_deref())
    } else {
        run_gui(&args, &mut dev, master, source.as_deref())
    }
}

/// Script to run at startup. A restored state skips the built-in demo,
/// which would reset it; an explicit script still runs on top of it.
fn startup_script(args: &Args) -> Result<Option<String>, String> {
    match &args.script {
        Some(path) => fs::read_to_string(path)
            .map(Some)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e)),
        None if args.load_state.is_some() => Ok(None),
        None => Ok(Some(script::demo_script())),
    }
}

fn state_file(args: &Args) -> String {
    let stem = args.script.as_deref().and_then(Path::to_str).unwrap_or("demo.spi");
    savestate::state_path(stem)
}

// ─── Reporting ──────────────────────────────────────────────────────────────

fn print_report(report: &ScriptReport, clock_hz: u32) {
    for txn in &report.transactions {
        match txn {
            Transaction::Write { address, value } => println!("  W  0x{:02X} <- 0x{:02X}", address, value),
            Transaction::Read { address, value } => println!("  R  0x{:02X} -> 0x{:02X}", address, value),
        }
    }
    for m in &report.measurements {
        let pin = format!("{:?}{}", m.pin.port, m.pin.bit);
        match m.outcome {
            MeasureOutcome::Waveform(w) => println!(
                "  line {:3}: {} period {:.0} ns, high {} / {} clk, duty {:.2}%",
                m.line, pin, w.period_ns(clock_hz), w.high_ticks, w.period_ticks, w.duty() * 100.0
            ),
            MeasureOutcome::Flat { level, edges } => println!(
                "  line {:3}: {} held {} ({} rising, {} falling)",
                m.line, pin, if level { "high" } else { "low" }, edges.rising, edges.falling
            ),
        }
    }
    println!(
        "{} transactions, {} checks, {} measurements in {} clocks",
        report.transactions.len(), report.expectations, report.measurements.len(), report.ticks
    );
}

// ─── Headless Mode ──────────────────────────────────────────────────────────

fn run_headless(args: &Args, dev: &mut Peripheral, master: SpiMaster, source: Option<&str>) -> ExitCode {
    if let Some(source) = source {
        let report = match script::run_script(dev, master, source) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Script failed: {}", e);
                eprintln!("{}", dev.dump_regs());
                return ExitCode::FAILURE;
            }
        };
        print_report(&report, dev.config().clock_hz);
    }

    let period = dev.config().pwm_period() as u64;
    let stride = (2 * period / TRACE_WIDTH as u64).max(1);
    let mut trace = WaveTrace::new(TRACE_WIDTH, stride);
    let capture = if args.png.is_some() { args.cycles.max(stride * TRACE_WIDTH as u64) } else { args.cycles };
    if capture > 0 {
        trace.run(dev, capture);
        info!("free-ran {} clocks", capture);
    }

    println!("{}", dev.dump_regs());

    if let Some(path) = &args.png {
        let data = png::encode_trace(&trace, TRACE_WIDTH, LANE_HEIGHT);
        if let Err(e) = fs::write(path, data) {
            eprintln!("PNG error: {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        println!("Capture: {}", path.display());
    }
    if let Some(path) = &args.save_state {
        if let Err(e) = savestate::save_to_file(&dev.save_state(), path) {
            eprintln!("Save state error: {}", e);
            return ExitCode::FAILURE;
        }
        println!("State: {}", path.display());
    }
    ExitCode::SUCCESS
}

// ─── GUI Mode ───────────────────────────────────────────────────────────────

fn write_reg(dev: &mut Peripheral, master: &SpiMaster, reg: Register, value: u8) {
    // Addresses come from the register map, so framing cannot fail
    if let Err(e) = master.write(dev, reg.address(), value) {
        warn!("{}: {}", reg.name(), e);
    }
}

fn toggle_pair(dev: &mut Peripheral, master: &SpiMaster, a: Register, b: Register) {
    let value = if dev.regs.get(a) == 0 { 0xFF } else { 0x00 };
    write_reg(dev, master, a, value);
    write_reg(dev, master, b, value);
}

fn render(trace: &WaveTrace, scale: usize, buf: &mut [u32]) {
    let w = TRACE_WIDTH * scale;
    let px = trace.render(TRACE_WIDTH, LANE_HEIGHT);
    for y in 0..LANES * LANE_HEIGHT {
        for x in 0..TRACE_WIDTH {
            let c = if px[y * TRACE_WIDTH + x] {
                COLOR_HIGH
            } else if y == 8 * LANE_HEIGHT {
                COLOR_SPLIT
            } else {
                COLOR_LOW
            };
            for sy in 0..scale {
                let base = (y * scale + sy) * w + x * scale;
                buf[base..base + scale].fill(c);
            }
        }
    }
}

fn run_gui(args: &Args, dev: &mut Peripheral, master: SpiMaster, source: Option<&str>) -> ExitCode {
    if let Some(source) = source {
        match script::run_script(dev, master, source) {
            Ok(report) => print_report(&report, dev.config().clock_hz),
            Err(e) => eprintln!("Script failed: {}", e),
        }
    }

    let scale = args.scale as usize;
    let width = TRACE_WIDTH * scale;
    let height = LANES * LANE_HEIGHT * scale;
    let mut window = match Window::new(
        "spipwm-sim", width, height,
        WindowOptions { scale: Scale::X1, scale_mode: ScaleMode::AspectRatioStretch, resize: true, ..Default::default() },
    ) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Failed to create window: {}", e);
            return ExitCode::FAILURE;
        }
    };
    window.set_target_fps(TARGET_FPS);

    // Two PWM periods across the screen, real time
    let period = dev.config().pwm_period() as u64;
    let clocks_per_frame = dev.config().clock_hz as u64 / TARGET_FPS as u64;
    let mut trace = WaveTrace::new(TRACE_WIDTH, (2 * period / TRACE_WIDTH as u64).max(1));
    let mut buf = vec![0u32; width * height];
    let state_path = state_file(args);

    let mut prev_up = false;
    let mut prev_down = false;
    let mut prev_p = false;
    let mut prev_o = false;
    let mut prev_r = false;
    let mut prev_s = false;
    let mut prev_d = false;
    let mut prev_f5 = false;
    let mut prev_f9 = false;
    let mut capture_n = 0u32;
    let mut frames = 0u64;
    let mut last_title = Instant::now();

    while window.is_open() && !window.is_key_down(Key::Escape) {
        let shift = window.is_key_down(Key::LeftShift) || window.is_key_down(Key::RightShift);
        let step = if shift { 16 } else { 1 };

        // Duty (Up/Down)
        let up = window.is_key_down(Key::Up);
        let down = window.is_key_down(Key::Down);
        if (up && !prev_up) || (down && !prev_down) {
            let duty = dev.regs.get(Register::DutyCycle);
            let duty = if up { duty.saturating_add(step) } else { duty.saturating_sub(step) };
            write_reg(dev, &master, Register::DutyCycle, duty);
            debug!("duty -> 0x{:02X}", duty);
        }
        prev_up = up;
        prev_down = down;

        // PWM enable (P)
        let p = window.is_key_down(Key::P);
        if p && !prev_p {
            toggle_pair(dev, &master, Register::PwmEnableA, Register::PwmEnableB);
        }
        prev_p = p;

        // Output enable (O)
        let o = window.is_key_down(Key::O);
        if o && !prev_o {
            toggle_pair(dev, &master, Register::OutputEnableA, Register::OutputEnableB);
        }
        prev_o = o;

        // Reset pulse (R)
        let r = window.is_key_down(Key::R);
        if r && !prev_r {
            dev.set_reset(false);
            dev.run(5);
            dev.set_reset(true);
            dev.run(5);
        }
        prev_r = r;

        // Capture (S)
        let s = window.is_key_down(Key::S);
        if s && !prev_s {
            let f = format!("capture_{:04}.png", capture_n);
            match fs::write(&f, png::encode_trace(&trace, TRACE_WIDTH, LANE_HEIGHT)) {
                Ok(()) => { eprintln!("Capture: {}", f); capture_n += 1; }
                Err(e) => eprintln!("Capture error: {}", e),
            }
        }
        prev_s = s;

        // Reg dump (D)
        let d = window.is_key_down(Key::D);
        if d && !prev_d {
            eprintln!("--- Regs (tick {}) ---\n{}\n---", dev.tick, dev.dump_regs());
        }
        prev_d = d;

        // Save / load state (F5 / F9)
        let f5 = window.is_key_down(Key::F5);
        if f5 && !prev_f5 {
            match savestate::save_to_file(&dev.save_state(), Path::new(&state_path)) {
                Ok(()) => eprintln!("State saved: {}", state_path),
                Err(e) => eprintln!("Save state error: {}", e),
            }
        }
        prev_f5 = f5;
        let f9 = window.is_key_down(Key::F9);
        if f9 && !prev_f9 {
            match savestate::load_from_file(Path::new(&state_path), dev.config().pwm_period()) {
                Ok(state) => {
                    dev.load_state(&state);
                    trace.clear();
                    eprintln!("State loaded: {}", state_path);
                }
                Err(e) => eprintln!("Load state error: {}", e),
            }
        }
        prev_f9 = f9;

        trace.run(dev, clocks_per_frame);
        frames += 1;

        render(&trace, scale, &mut buf);
        if let Err(e) = window.update_with_buffer(&buf, width, height) {
            eprintln!("Window update failed: {}", e);
            return ExitCode::FAILURE;
        }

        if last_title.elapsed() >= Duration::from_secs(1) {
            let fps = frames as f64 / last_title.elapsed().as_secs_f64();
            window.set_title(&format!(
                "spipwm-sim - duty 0x{:02X} oe {:02X}/{:02X} pwm {:02X}/{:02X} - {:.0} FPS",
                dev.regs.get(Register::DutyCycle),
                dev.regs.get(Register::OutputEnableA), dev.regs.get(Register::OutputEnableB),
                dev.regs.get(Register::PwmEnableA), dev.regs.get(Register::PwmEnableB),
                fps
            ));
            frames = 0;
            last_title = Instant::now();
        }
    }
    info!("exit at tick {}", dev.tick);
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_runs_by_default() {
        let args = Args::parse_from(["spipwm-sim", "--headless"]);
        assert_eq!(startup_script(&args).unwrap(), Some(script::demo_script()));
    }

    #[test]
    fn test_loaded_state_skips_demo() {
        let args = Args::parse_from(["spipwm-sim", "--headless", "--load-state", "run.state"]);
        assert_eq!(startup_script(&args).unwrap(), None);
    }

    #[test]
    fn test_loaded_state_survives_headless_run() {
        let mut dev = Peripheral::new();
        let master = SpiMaster::default();
        master.write(&mut dev, 0x00, 0xA5).unwrap();
        let state = dev.save_state();

        let mut restored = Peripheral::new();
        restored.load_state(&state);
        let args = Args::parse_from(["spipwm-sim", "--headless", "--load-state", "run.state"]);
        let source = startup_script(&args).unwrap();
        run_headless(&args, &mut restored, master, source.as_deref());
        assert_eq!(restored.port_a_out(), 0xA5);
    }

    #[test]
    fn test_missing_script_reported() {
        let args = Args::parse_from(["spipwm-sim", "--headless", "/nonexistent/stim.spi"]);
        assert!(startup_script(&args).unwrap_err().starts_with("Failed to read"));
    }
}
