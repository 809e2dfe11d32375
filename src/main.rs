//! dsp-passthru - real-time audio pass-through client
//!
//! Registers one mono input and one mono output with the audio server and
//! runs a pluggable transform on every audio cycle. The input is either:
//! - live capture from the physical input (`-c`)
//! - raw 16-bit little-endian mono PCM read from standard input, played
//!   through a double-buffered ring refilled by the main thread

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{CommandFactory, Parser};

mod audio;
mod settings;

use audio::{
    capture_bridge, AudioBuffer, BridgeStats, CycleInput, CycleStats, Mode, Passthrough,
    PcmFeeder, ProcessCycle, RefillAction, RefillLoop, Session, SessionConfig, SessionError,
    Transform, WindowOrder, WindowState,
};
use settings::ClientSettings;

const SPINNER: [char; 4] = ['-', '/', '|', '\\'];

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "dsp-passthru")]
#[command(about = "Real-time audio pass-through client")]
#[command(version, disable_help_flag = true)]
struct Args {
    /// More log output
    #[arg(short, long)]
    verbose: bool,

    /// Print usage and keep running
    #[arg(short, long)]
    help: bool,

    /// Take input from the physical capture ports instead of standard input
    #[arg(short = 'c', long)]
    capture: bool,

    /// Client name announced to the audio server
    #[arg(long)]
    client_name: Option<String>,

    /// Audio host to connect to
    #[arg(long, value_enum)]
    host: Option<audio::HostPreference>,

    /// Playback buffer capacity in samples
    #[arg(long, value_name = "SAMPLES")]
    capacity: Option<usize>,

    /// Fixed cycle size in frames (device default if unset)
    #[arg(long, value_name = "FRAMES")]
    period: Option<u32>,

    /// Window read order of the file playback callback
    #[arg(long, value_enum)]
    window_order: Option<WindowOrder>,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Save the effective settings to the settings file
    #[arg(long)]
    write_config: bool,
}

impl Args {
    /// Layer command-line overrides on top of the stored settings
    fn apply(&self, settings: &mut ClientSettings) {
        if let Some(name) = &self.client_name {
            settings.client_name = name.clone();
        }
        if let Some(host) = self.host {
            settings.host = host;
        }
        if let Some(capacity) = self.capacity {
            settings.buffer_capacity = capacity;
        }
        if let Some(period) = self.period {
            settings.period_frames = Some(period);
        }
        if let Some(order) = self.window_order {
            settings.window_order = order;
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    log::info!("Starting dsp-passthru");

    if args.help {
        if let Err(e) = Args::command().print_help() {
            log::warn!("Failed to print help: {}", e);
        }
        println!();
    }

    let mut settings = ClientSettings::load(args.config.as_deref());
    args.apply(&mut settings);
    if args.write_config {
        settings.save(args.config.as_deref());
    }

    let mode = if args.capture { Mode::Capture } else { Mode::File };
    match run(&settings, mode, Passthrough) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(1)
        }
    }
}

fn run(
    settings: &ClientSettings,
    mode: Mode,
    mut transform: impl Transform,
) -> Result<(), SessionError> {
    let mut session = Session::open(SessionConfig {
        client_name: settings.client_name.clone(),
        host: settings.host,
        mode,
        period_frames: settings.period_frames,
        playback_ports: settings.playback_ports,
        capture_ports: settings.capture_ports,
    })?;

    let sample_rate = session.sample_rate();
    log::info!("Engine sample rate: {}", sample_rate);
    transform.init(sample_rate);

    match mode {
        Mode::Capture => {
            let (producer, consumer, bridge) = capture_bridge(settings.capture_bridge_samples);
            let cycle = ProcessCycle::new(
                CycleInput::Capture(consumer),
                Box::new(transform),
                sample_rate,
            );
            let stats = cycle.stats();
            session.register_ports(cycle, Some(producer))?;
            start(&mut session)?;

            log::info!("Capture from microphone");
            run_capture(&mut session, settings, &stats, &bridge)
        }
        Mode::File => {
            let buffer = Arc::new(AudioBuffer::new(settings.buffer_capacity));
            let window = Arc::new(WindowState::new(buffer.capacity()));
            let cycle = ProcessCycle::new(
                CycleInput::File {
                    buffer: Arc::clone(&buffer),
                    window: Arc::clone(&window),
                    order: settings.window_order,
                },
                Box::new(transform),
                sample_rate,
            );
            let stats = cycle.stats();
            session.register_ports(cycle, None)?;
            start(&mut session)?;

            log::info!("Process from standard input");
            let feeder = PcmFeeder::new(io::stdin().lock());
            let mut refill = RefillLoop::new(feeder, buffer, window);
            run_file(&mut session, settings, &stats, &mut refill)?;

            session.close();
            Ok(())
        }
    }
}

fn start(session: &mut Session) -> Result<(), SessionError> {
    session.activate()?;
    session.connect()?;
    session.start()?;
    log::debug!(
        "Client `{}' on {} is {:?}",
        session.client_name(),
        session.host_name(),
        session.state()
    );
    Ok(())
}

/// Spin until the server shuts us down
fn run_capture(
    session: &mut Session,
    settings: &ClientSettings,
    stats: &CycleStats,
    bridge: &BridgeStats,
) -> Result<(), SessionError> {
    let interval = Duration::from_millis(settings.capture_poll_ms);
    let mut reporter = FailureReporter::default();
    let (mut missing, mut dropped, mut skipped) = (0, 0, 0);
    let mut tick = 0usize;

    loop {
        session.check()?;
        reporter.report(stats);

        let (now_missing, now_dropped, now_skipped) =
            (bridge.missing(), bridge.dropped(), bridge.skipped());
        if now_missing > missing || now_dropped > dropped || now_skipped > skipped {
            log::debug!(
                "Capture bridge: {} samples of silence, {} dropped, {} skipped",
                now_missing - missing,
                now_dropped - dropped,
                now_skipped - skipped
            );
            missing = now_missing;
            dropped = now_dropped;
            skipped = now_skipped;
        }

        print!("{}\r", SPINNER[tick & 3]);
        let _ = io::stdout().flush();
        tick = tick.wrapping_add(1);
        thread::sleep(interval);
    }
}

/// Keep the playback buffer filled until standard input runs dry
fn run_file<R: io::Read>(
    session: &mut Session,
    settings: &ClientSettings,
    stats: &CycleStats,
    refill: &mut RefillLoop<R>,
) -> Result<(), SessionError> {
    let interval = Duration::from_millis(settings.file_poll_ms);
    let mut reporter = FailureReporter::default();

    loop {
        session.check()?;
        reporter.report(stats);

        if refill.poll() == RefillAction::Stop {
            log::info!("Played {} cycles", stats.cycles());
            return Ok(());
        }
        thread::sleep(interval);
    }
}

/// Logs transform failures the audio thread counted since the last report
#[derive(Default)]
struct FailureReporter {
    seen: u64,
}

impl FailureReporter {
    /// Returns the number of failures logged by this call
    fn report(&mut self, stats: &CycleStats) -> u64 {
        let failures = stats.failures();
        if failures <= self.seen {
            return 0;
        }
        let fresh = failures - self.seen;
        log::warn!("Transform failed in {} cycle(s)", fresh);
        self.seen = failures;
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        calls: usize,
    }

    impl Transform for Flaky {
        fn process(&mut self, _sample_rate: u32, input: &[f32], output: &mut [f32]) -> bool {
            output.copy_from_slice(input);
            self.calls += 1;
            self.calls % 2 == 0
        }
    }

    #[test]
    fn test_cli_overrides_stored_settings() {
        let mut settings = ClientSettings {
            client_name: "stored".to_string(),
            buffer_capacity: 1024,
            period_frames: Some(128),
            ..ClientSettings::default()
        };
        let args = Args::try_parse_from([
            "dsp-passthru",
            "--client-name",
            "lab",
            "--capacity",
            "4096",
            "--window-order",
            "current",
            "--host",
            "jack",
        ])
        .unwrap();

        args.apply(&mut settings);
        assert_eq!(settings.client_name, "lab");
        assert_eq!(settings.buffer_capacity, 4096);
        assert_eq!(settings.window_order, WindowOrder::Current);
        assert_eq!(settings.host, audio::HostPreference::Jack);
        // Not given on the command line
        assert_eq!(settings.period_frames, Some(128));
    }

    #[test]
    fn test_no_flags_keep_stored_settings() {
        let stored = ClientSettings {
            client_name: "stored".to_string(),
            file_poll_ms: 5,
            ..ClientSettings::default()
        };
        let mut settings = stored.clone();
        let args = Args::try_parse_from(["dsp-passthru", "-v", "-c"]).unwrap();

        args.apply(&mut settings);
        assert_eq!(settings, stored);
        assert!(args.verbose);
        assert!(args.capture);
    }

    #[test]
    fn test_help_flag_does_not_exit() {
        let args = Args::try_parse_from(["dsp-passthru", "-h"]).unwrap();
        assert!(args.help);
    }

    #[test]
    fn test_failures_reported_once() {
        let (_producer, consumer, _) = capture_bridge(8);
        let mut cycle = ProcessCycle::new(
            CycleInput::Capture(consumer),
            Box::new(Flaky { calls: 0 }),
            8000,
        );
        let stats = cycle.stats();
        let mut reporter = FailureReporter::default();

        assert_eq!(reporter.report(&stats), 0);

        for _ in 0..4 {
            cycle.run(2);
        }
        assert_eq!(reporter.report(&stats), 2);
        assert_eq!(reporter.report(&stats), 0);

        cycle.run(2);
        cycle.run(2);
        assert_eq!(reporter.report(&stats), 1);
        assert_eq!(stats.cycles(), 6);
    }
}
