use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use printkit::sim::{RamBlockDevice, SimMachine};
use printkit::{init_logging, ChannelKind, MachineConfig, PlannerState, Printer, PrinterEvent};
use printkit_printer::Clock;
use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Run a G-code program through a simulated printer
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// G-code program to run
    program: PathBuf,
    /// Stream the program from the SD channel instead of the serial line
    #[arg(long)]
    sd: bool,
    /// Machine description (TOML or JSON); overrides --machine
    #[arg(long)]
    config: Option<PathBuf>,
    /// Built-in machine description
    #[arg(long, value_enum, default_value_t = Machine::Delta)]
    machine: Machine,
    /// Simulated seconds per wall-clock second
    #[arg(long, default_value_t = 1.0)]
    time_scale: f64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Machine {
    Delta,
    Cartesian,
}

impl Machine {
    fn config(self) -> MachineConfig {
        match self {
            Machine::Delta => MachineConfig::delta(),
            Machine::Cartesian => MachineConfig::cartesian(),
        }
    }
}

fn program_lines(text: &str) -> VecDeque<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with(';'))
        .map(|l| format!("{}\n", l))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    anyhow::ensure!(cli.time_scale > 0.0, "--time-scale must be positive");

    let config = match &cli.config {
        Some(path) => MachineConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => cli.machine.config(),
    };
    let program = std::fs::read_to_string(&cli.program)
        .with_context(|| format!("reading {}", cli.program.display()))?;

    let (storage, mut lines) = if cli.sd {
        let mut text = program.clone();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        let commands = VecDeque::from(["M21\n".to_string(), "M24\n".to_string()]);
        (RamBlockDevice::with_text(&text), commands)
    } else {
        (RamBlockDevice::with_text(""), program_lines(&program))
    };

    let sim = SimMachine::with_storage(&config, storage);
    let mut printer = Printer::new(config, sim.hardware())?;
    sim.thermal
        .attach(printer.heaters().iter().map(|h| h.cell().clone()).collect());

    let mut log_events = printer.subscribe();
    let monitor = tokio::spawn(async move {
        loop {
            match log_events.recv().await {
                Ok(event) => tracing::info!("{}", event),
                Err(RecvError::Lagged(n)) => tracing::warn!("Missed {} printer events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut done_events = printer.subscribe();
    let mut stream_ended = !cli.sd;
    let start = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(1));
    let mut stdout = std::io::stdout();

    loop {
        ticker.tick().await;

        let now = start.elapsed().mul_f64(cli.time_scale);
        sim.thermal.advance(now.saturating_sub(sim.clock.now()));
        sim.clock.set(now);

        let serial_idle = !printer.arbiter().has_command(ChannelKind::Serial)
            && sim.serial.pending_input() == 0;
        if serial_idle {
            if let Some(line) = lines.pop_front() {
                tracing::debug!("> {}", line.trim_end());
                sim.serial.send(&line);
            }
        }

        printer.run_until_idle();
        write!(stdout, "{}", sim.serial.take_output())?;
        stdout.flush()?;

        loop {
            match done_events.try_recv() {
                Ok(PrinterEvent::StorageEof) => stream_ended = true,
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        let finished = serial_idle
            && lines.is_empty()
            && stream_ended
            && !printer.arbiter().is_locked()
            && printer.planner_state() == PlannerState::None;
        if finished {
            break;
        }
    }

    tracing::info!(
        "Program finished after {:.1}s simulated, {} underruns",
        sim.clock.now().as_secs_f64(),
        printer.underrun_count()
    );
    drop(printer);
    monitor.abort();
    Ok(())
}
