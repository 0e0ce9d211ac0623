use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use clap_derive::Parser;
use robolink::control::{AxisFilter, Button, ControlCommand, Mode, Telemetry};
use robolink::link::{LinkConfig, Station, DEFAULT_PORT};
use tokio::select;
use tokio::time::{interval, sleep, Instant};
use tracing::{info, warn, Level};

/// Operator station: connects to a robot and drives it with a scripted controller session
#[derive(Parser)]
struct Args {
    #[clap(default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    robot_address: SocketAddr,

    #[clap(long, default_value_t = 10)]
    connect_attempts: u32,

    #[clap(long, default_value_t = 1000)]
    ack_timeout_millis: u64,

    /// give up on a command after this many transmissions instead of retrying forever
    #[clap(long)]
    max_transmissions: Option<u32>,

    /// how long to drive before sending shutdown
    #[clap(long, default_value_t = 5)]
    session_seconds: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = LinkConfig::new(args.robot_address);
    config.ack_timeout = Duration::from_millis(args.ack_timeout_millis);
    config.max_transmissions = args.max_transmissions;

    let station = connect_with_retry(&config, args.connect_attempts).await?;
    station.submit_command(ControlCommand::Ready.to_payload()?);

    let mode = Mode::Teleop;
    station.submit_command(ControlCommand::ModeSwitch { mode }.to_payload()?);

    let mut filter = AxisFilter::new();
    let mut ticks = interval(Duration::from_millis(50));
    let started = Instant::now();
    let session = Duration::from_secs(args.session_seconds);
    let mut tick_count: u64 = 0;

    while started.elapsed() < session {
        select! {
            _ = ticks.tick() => {}
            _ = station.closed() => {
                warn!("robot went away");
                return Ok(());
            }
        }
        tick_count += 1;

        for command in simulated_input(mode, tick_count) {
            if let Some(command) = filter.filter(command) {
                station.submit_command(command.to_payload()?);
            }
        }

        while let Some(payload) = station.get_next_telemetry() {
            match Telemetry::from_payload(&payload) {
                Ok(telemetry) => info!("telemetry: {:?}", telemetry),
                Err(_) => info!("telemetry: {}", payload),
            }
        }
        while let Some(failed) = station.pop_delivery_failure() {
            warn!("{}", failed);
        }
    }

    info!("requesting robot shutdown");
    station.submit_command(ControlCommand::Shutdown.to_payload()?);

    // give the link a chance to deliver everything before closing it
    let deadline = Instant::now() + config.ack_timeout * 3;
    while station.pending_count() > 0 && station.is_connected() && Instant::now() < deadline {
        sleep(Duration::from_millis(50)).await;
    }
    if station.pending_count() > 0 {
        warn!("closing with {} unacknowledged commands", station.pending_count());
    }

    station.shutdown().await;
    Ok(())
}

async fn connect_with_retry(config: &LinkConfig, attempts: u32) -> anyhow::Result<Station> {
    let mut attempt = 1;
    loop {
        match Station::connect(config).await {
            Ok(station) => return Ok(station),
            Err(e) if attempt < attempts => {
                warn!("connection attempt {} of {} failed: {:#}", attempt, attempts, e);
                attempt += 1;
                sleep(Duration::from_secs(1)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Stands in for a game controller: the left stick slowly sweeps back and forth, LB is tapped
///  every two seconds
fn simulated_input(mode: Mode, tick: u64) -> Vec<ControlCommand> {
    let mut result = Vec::new();

    // quantized so that consecutive samples repeat, which the axis filter suppresses
    let phase = (tick / 5) % 40;
    let x = if phase < 20 { phase as f64 / 20.0 } else { (40 - phase) as f64 / 20.0 };
    result.push(ControlCommand::Axes {
        mode,
        x,
        y: 0.0,
        yaw_rate: 0.0,
        pitch_rate: 0.0,
        left_trigger: -1.0,
        right_trigger: -1.0,
    });

    match tick % 40 {
        0 => result.push(ControlCommand::Button { mode, button: Button::Lb, pressed: true }),
        2 => result.push(ControlCommand::Button { mode, button: Button::Lb, pressed: false }),
        _ => {}
    }
    result
}
