//! Audio server session
//!
//! Opens the client against a cpal host, registers the mono output (and, in
//! capture mode, the mono input), activates the streams and wires them to
//! the device's physical channels. Lifecycle:
//!
//! `Created -> PortsRegistered -> Activated -> Connected -> Running`
//!
//! ending in `Shutdown` (the server went away) or `Killed` (we closed it).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use clap::ValueEnum;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample, StreamError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::bridge::CaptureProducer;
use super::cycle::{mix_down, ProcessCycle};

/// Errors that end the session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unable to connect to audio server: {0}")]
    ServerUnavailable(String),

    #[error("No physical {0} ports")]
    NoPhysicalPorts(&'static str),

    #[error("No more ports available: {0}")]
    PortRegistration(String),

    #[error("Cannot activate client: {0}")]
    Activation(String),

    #[error("Audio server shut down")]
    Shutdown,

    #[error("Invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    PortsRegistered,
    Activated,
    Connected,
    Running,
    Shutdown,
    Killed,
}

impl SessionState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Shutdown | Self::Killed)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Created, PortsRegistered)
                | (PortsRegistered, Activated)
                | (Activated, Connected)
                | (Connected, Running)
                | (_, Shutdown)
                | (_, Killed)
        )
    }
}

/// Which audio host to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HostPreference {
    /// Platform default host
    #[default]
    Default,
    /// JACK (requires the `jack` feature)
    Jack,
}

/// Where the process callback takes its input from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Live capture from the input device
    Capture,
    /// Raw PCM from standard input
    File,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub client_name: String,
    pub host: HostPreference,
    pub mode: Mode,
    /// Fixed cycle size in frames, or the device default
    pub period_frames: Option<u32>,
    /// Physical playback channels the output is connected to
    pub playback_ports: usize,
    /// Physical capture channels mixed into the input
    pub capture_ports: usize,
}

/// Outcome of wiring one port to the device's physical channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiringPlan {
    pub connected: usize,
    /// Requested physical channels that do not exist
    pub missing: Vec<usize>,
}

pub fn plan_wiring(requested: usize, available: usize) -> WiringPlan {
    WiringPlan {
        connected: requested.min(available),
        missing: (available..requested).collect(),
    }
}

/// Sample rates one capture configuration can run at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRange {
    pub format: cpal::SampleFormat,
    pub min: u32,
    pub max: u32,
}

impl RateRange {
    fn fits(&self, rate: u32) -> bool {
        matches!(self.format, cpal::SampleFormat::F32 | cpal::SampleFormat::I16)
            && (self.min..=self.max).contains(&rate)
    }
}

/// Pick the capture configuration that runs at the output's `rate`.
///
/// Ranges in the device's `preferred` format win over other formats.
pub fn match_rate(ranges: &[RateRange], preferred: cpal::SampleFormat, rate: u32) -> Option<usize> {
    ranges
        .iter()
        .position(|r| r.format == preferred && r.fits(rate))
        .or_else(|| ranges.iter().position(|r| r.fits(rate)))
}

pub struct Session {
    config: SessionConfig,
    state: SessionState,
    host_name: &'static str,
    output_device: cpal::Device,
    output_config: cpal::SupportedStreamConfig,
    input: Option<(cpal::Device, cpal::SupportedStreamConfig)>,
    output_stream: Option<cpal::Stream>,
    input_stream: Option<cpal::Stream>,
    output_wiring: Option<Arc<AtomicUsize>>,
    input_wiring: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl Session {
    /// Open a client session against the configured host
    pub fn open(config: SessionConfig) -> Result<Self, SessionError> {
        let host = select_host(config.host)?;
        let host_name = host.id().name();

        let output_device = host.default_output_device().ok_or_else(|| {
            SessionError::ServerUnavailable(format!("{} has no output device", host_name))
        })?;
        let output_config = output_device
            .default_output_config()
            .map_err(|e| SessionError::ServerUnavailable(e.to_string()))?;

        let input = match config.mode {
            Mode::Capture => {
                let device = host
                    .default_input_device()
                    .ok_or(SessionError::NoPhysicalPorts("capture"))?;
                let supported = device
                    .default_input_config()
                    .map_err(|e| SessionError::ServerUnavailable(e.to_string()))?;
                Some((device, supported))
            }
            Mode::File => None,
        };

        let device_name = output_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());
        log::info!(
            "Client `{}' opened on {} ({})",
            config.client_name,
            host_name,
            device_name
        );
        log::debug!("Output config: {:?}", output_config);

        Ok(Self {
            config,
            state: SessionState::Created,
            host_name,
            output_device,
            output_config,
            input,
            output_stream: None,
            input_stream: None,
            output_wiring: None,
            input_wiring: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_name(&self) -> &str {
        &self.config.client_name
    }

    pub fn host_name(&self) -> &'static str {
        self.host_name
    }

    /// Negotiated sample rate of the output
    pub fn sample_rate(&self) -> u32 {
        self.output_config.sample_rate().0
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        log::debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn stream_config(&self, supported: &cpal::SupportedStreamConfig) -> cpal::StreamConfig {
        let mut config = supported.config();
        if let Some(frames) = self.config.period_frames {
            config.buffer_size = cpal::BufferSize::Fixed(frames);
        }
        config
    }

    /// Register the output port driven by `cycle` and, in capture mode, the
    /// input port feeding `capture`.
    pub fn register_ports(
        &mut self,
        cycle: ProcessCycle,
        capture: Option<CaptureProducer>,
    ) -> Result<(), SessionError> {
        if !self.state.can_transition_to(SessionState::PortsRegistered) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::PortsRegistered,
            });
        }

        self.output_wiring = Some(cycle.wiring());
        let config = self.stream_config(&self.output_config);
        let output_stream = match self.output_config.sample_format() {
            cpal::SampleFormat::F32 => {
                build_output::<f32>(&self.output_device, &config, cycle, &self.shutdown)
            }
            cpal::SampleFormat::I16 => {
                build_output::<i16>(&self.output_device, &config, cycle, &self.shutdown)
            }
            format => {
                return Err(SessionError::PortRegistration(format!(
                    "Unsupported output format: {:?}",
                    format
                )))
            }
        }
        .map_err(|e| SessionError::PortRegistration(e.to_string()))?;
        self.output_stream = Some(output_stream);

        if self.config.mode == Mode::Capture {
            let producer = capture.ok_or_else(|| {
                SessionError::PortRegistration("capture mode needs a capture bridge".to_string())
            })?;
            let (device, default) = self
                .input
                .take()
                .ok_or(SessionError::NoPhysicalPorts("capture"))?;
            let supported = aligned_input_config(&device, &default, self.sample_rate())?;
            let config = self.stream_config(&supported);
            let wiring = Arc::clone(&self.input_wiring);

            let input_stream = match supported.sample_format() {
                cpal::SampleFormat::F32 => {
                    build_input::<f32>(&device, &config, producer, wiring, &self.shutdown)
                }
                cpal::SampleFormat::I16 => {
                    build_input::<i16>(&device, &config, producer, wiring, &self.shutdown)
                }
                format => {
                    return Err(SessionError::PortRegistration(format!(
                        "Unsupported input format: {:?}",
                        format
                    )))
                }
            }
            .map_err(|e| SessionError::PortRegistration(e.to_string()))?;
            self.input_stream = Some(input_stream);
            self.input = Some((device, supported));
        }

        self.transition(SessionState::PortsRegistered)
    }

    /// Start the streams; the process callback runs from here on
    pub fn activate(&mut self) -> Result<(), SessionError> {
        if !self.state.can_transition_to(SessionState::Activated) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::Activated,
            });
        }
        for stream in self.output_stream.iter().chain(self.input_stream.iter()) {
            stream
                .play()
                .map_err(|e| SessionError::Activation(e.to_string()))?;
        }
        self.transition(SessionState::Activated)
    }

    /// Wire the ports to the physical channels.
    ///
    /// Missing channels are logged and skipped; a device with no channels at
    /// all is fatal.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        if !self.state.can_transition_to(SessionState::Connected) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::Connected,
            });
        }

        if let Some((_, supported)) = &self.input {
            let available = supported.channels() as usize;
            if available == 0 {
                return Err(SessionError::NoPhysicalPorts("capture"));
            }
            let plan = plan_wiring(self.config.capture_ports, available);
            for channel in &plan.missing {
                log::warn!("Cannot connect input ports (capture channel {})", channel);
            }
            self.input_wiring.store(plan.connected, Ordering::Relaxed);
        }

        let available = self.output_config.channels() as usize;
        if available == 0 {
            return Err(SessionError::NoPhysicalPorts("playback"));
        }
        let plan = plan_wiring(self.config.playback_ports, available);
        for channel in &plan.missing {
            log::warn!("Cannot connect output ports (playback channel {})", channel);
        }
        if let Some(wiring) = &self.output_wiring {
            wiring.store(plan.connected, Ordering::Relaxed);
        }

        self.transition(SessionState::Connected)
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Running)
    }

    /// Fails once the server has shut the session down
    pub fn check(&mut self) -> Result<(), SessionError> {
        if self.shutdown.load(Ordering::Acquire) {
            if !self.state.is_terminal() {
                self.state = SessionState::Shutdown;
            }
            return Err(SessionError::Shutdown);
        }
        Ok(())
    }

    /// Stop the streams and close the client
    pub fn close(mut self) {
        self.input_stream = None;
        self.output_stream = None;
        if self.transition(SessionState::Killed).is_ok() {
            log::info!("Client `{}' closed", self.config.client_name);
        }
    }
}

fn select_host(preference: HostPreference) -> Result<cpal::Host, SessionError> {
    match preference {
        HostPreference::Default => Ok(cpal::default_host()),
        HostPreference::Jack => jack_host(),
    }
}

#[cfg(all(
    feature = "jack",
    any(
        target_os = "linux",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "netbsd"
    )
))]
fn jack_host() -> Result<cpal::Host, SessionError> {
    cpal::host_from_id(cpal::HostId::Jack)
        .map_err(|e| SessionError::ServerUnavailable(e.to_string()))
}

#[cfg(not(all(
    feature = "jack",
    any(
        target_os = "linux",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "netbsd"
    )
)))]
fn jack_host() -> Result<cpal::Host, SessionError> {
    Err(SessionError::ServerUnavailable(
        "JACK support not compiled in (build with --features jack)".to_string(),
    ))
}

/// Run the capture device at the output rate so both callbacks move the same
/// number of frames per second through the bridge.
fn aligned_input_config(
    device: &cpal::Device,
    default: &cpal::SupportedStreamConfig,
    rate: u32,
) -> Result<cpal::SupportedStreamConfig, SessionError> {
    if default.sample_rate().0 == rate {
        return Ok(default.clone());
    }

    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| SessionError::PortRegistration(e.to_string()))?
        .collect();
    let summary: Vec<RateRange> = ranges
        .iter()
        .map(|r| RateRange {
            format: r.sample_format(),
            min: r.min_sample_rate().0,
            max: r.max_sample_rate().0,
        })
        .collect();

    let index = match_rate(&summary, default.sample_format(), rate).ok_or_else(|| {
        SessionError::PortRegistration(format!("Capture device cannot run at {} Hz", rate))
    })?;
    let aligned = ranges[index].clone().with_sample_rate(cpal::SampleRate(rate));
    log::info!(
        "Capture rate {} Hz aligned to output rate {} Hz",
        default.sample_rate().0,
        rate
    );
    log::debug!("Input config: {:?}", aligned);
    Ok(aligned)
}

/// Error callback shared by both streams. A vanished device is the server
/// shutting us down.
fn on_stream_error(
    shutdown: &Arc<AtomicBool>,
    port: &'static str,
) -> impl FnMut(StreamError) + Send + 'static {
    let shutdown = Arc::clone(shutdown);
    move |err| match err {
        StreamError::DeviceNotAvailable => {
            log::error!("Audio server disconnected the {} port", port);
            shutdown.store(true, Ordering::Release);
        }
        other => log::error!("Audio {} error: {}", port, other),
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut cycle: ProcessCycle,
    shutdown: &Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            cycle.render(data, channels);
        },
        on_stream_error(shutdown, "output"),
        None,
    )
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: CaptureProducer,
    wiring: Arc<AtomicUsize>,
    shutdown: &Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let wired = wiring.load(Ordering::Relaxed);
            mix_down(data, channels, wired, |sample| producer.push(sample));
        },
        on_stream_error(shutdown, "input"),
        None,
    )
}
