use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use clap_derive::Parser;
use robolink::control::{ControlCommand, Mode, Telemetry};
use robolink::link::{LinkConfig, Robot, DEFAULT_PORT};
use tokio::select;
use tokio::time::interval;
use tracing::{info, warn, Level};

/// Robot side: waits for a station, executes its commands (by logging them) and reports
///  telemetry
#[derive(Parser)]
struct Args {
    #[clap(default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    listen_address: SocketAddr,

    #[clap(long, default_value_t = 500)]
    telemetry_interval_millis: u64,

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

    let config = LinkConfig::new(args.listen_address);
    let robot = Robot::start(&config).await?;

    let mut ready = false;
    let mut mode: Option<Mode> = None;
    let mut sequence = 0;
    let mut commands = interval(Duration::from_millis(50));
    let mut telemetry = interval(Duration::from_millis(args.telemetry_interval_millis));

    loop {
        select! {
            _ = commands.tick() => {
                while let Some(payload) = robot.get_next_command() {
                    let command = match ControlCommand::from_payload(&payload) {
                        Ok(command) => command,
                        Err(e) => {
                            warn!("ignoring command {}: {}", payload, e);
                            continue;
                        }
                    };

                    match command {
                        ControlCommand::Ready => {
                            info!("station is ready");
                            ready = true;
                        }
                        ControlCommand::Shutdown => {
                            info!("shutdown requested by station");
                            robot.shutdown().await;
                            return Ok(());
                        }
                        _ if !ready => warn!("ignoring {:?} - station did not signal ready", command),
                        ControlCommand::ModeSwitch { mode: new_mode } => {
                            info!("switching to {:?}", new_mode);
                            mode = Some(new_mode);
                        }
                        other => info!("executing {:?}", other),
                    }
                }
            }
            _ = telemetry.tick() => {
                if ready {
                    let record = Telemetry::new(mode, sequence)
                        .with_field("pending", robot.pending_count());
                    robot.submit_telemetry(record.to_payload()?);
                    sequence += 1;
                }
            }
            _ = robot.closed() => {
                info!("station disconnected");
                return Ok(());
            }
        }
    }
}
