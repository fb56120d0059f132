use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::{info, warn};
use tokio::sync::mpsc as tokio_mpsc;
use tokio::time;

use tetra_protocol::transport::LineReader;
use tetra_protocol::transport::serial::{self, SerialTransport};
use tetra_protocol::{DeviceId, Event, TriggerRules};
use tetra_term::config::{self, AppConfig, ConfigWatcher, DeviceConfig};
use tetra_term::{DeviceEvent, DeviceTask, Profiles, Router, discovery, replay};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Data-channel engine for TETRA terminals on serial AT ports",
    long_about = "Connects to one or more TETRA terminals, decodes incoming SDS \
                  (status, text, LIP/LRRP positions), acknowledges them, retries \
                  partial position reports and runs automation profiles on triggers."
)]
struct Args {
    #[arg(required_unless_present = "list_ports", help = "Config file (TOML)")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Decode a captured terminal log instead of opening ports"
    )]
    replay: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = 1,
        requires = "replay",
        help = "Device the replayed log belongs to"
    )]
    device: u8,

    #[arg(long, help = "List serial ports and exit")]
    list_ports: bool,
}

/// An opened terminal: one handle for reading, one for writing.
struct Terminal {
    device: DeviceConfig,
    reader: SerialTransport,
    writer: SerialTransport,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_ports {
        list_ports();
        return;
    }

    let Some(path) = args.config else {
        eprintln!("No config file given.");
        std::process::exit(2);
    };
    let config = match config::from_file(&path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    if let Some(log) = args.replay {
        if let Err(e) = run_replay(&config, DeviceId(args.device), &log) {
            eprintln!("Failed to replay {}: {e}", log.display());
            std::process::exit(1);
        }
        return;
    }

    // Ports are opened and identified before the runtime starts.
    let terminals = connect(&config);
    if terminals.is_empty() {
        eprintln!("No terminal connected.");
        eprintln!();
        eprintln!("Troubleshooting:");
        eprintln!("  1. Check the port names with --list-ports");
        eprintln!("  2. Set `port` or `issi` for every [[devices]] entry");
        eprintln!("  3. Make sure no other program holds the port open");
        std::process::exit(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            std::process::exit(1);
        }
    };
    rt.block_on(run(config, path, terminals));
}

fn list_ports() {
    match serial::available_ports() {
        Ok(ports) if ports.is_empty() => println!("No serial ports found."),
        Ok(ports) => ports.iter().for_each(|p| println!("{p}")),
        Err(e) => {
            eprintln!("Failed to list ports: {e}");
            std::process::exit(1);
        }
    }
}

fn run_replay(config: &AppConfig, device: DeviceId, log: &Path) -> std::io::Result<()> {
    let input = BufReader::new(File::open(log)?);
    let triggers = TriggerRules::new(config.triggers.clone());
    let events = replay::replay(device, config.engine.clone(), triggers, input)?;
    for event in &events {
        println!("{event:?}");
    }
    info!("{} event(s) decoded", events.len());
    Ok(())
}

fn connect(config: &AppConfig) -> Vec<Terminal> {
    let candidates = serial::available_ports().unwrap_or_else(|e| {
        warn!("cannot list serial ports: {e}");
        Vec::new()
    });
    let assigned = discovery::assign_ports(&config.devices, &candidates, |port| {
        let transport = serial::open_port(port, config.baud_rate)?;
        serial::identify_issi(&mut LineReader::new(transport))
    });

    let mut terminals = Vec::new();
    for device in &config.devices {
        let Some(port) = assigned.get(&device.id) else {
            continue;
        };
        match open_pair(port, config.baud_rate) {
            Ok((reader, writer)) => {
                println!("Device {} connected on {port}.", device.id);
                terminals.push(Terminal {
                    device: device.clone(),
                    reader,
                    writer,
                });
            }
            Err(e) => eprintln!("Device {}: failed to open {port}: {e}", device.id),
        }
    }
    terminals
}

fn open_pair(port: &str, baud_rate: u32) -> tetra_protocol::Result<(SerialTransport, SerialTransport)> {
    let reader = serial::open_port(port, baud_rate)?;
    let writer = reader.try_clone()?;
    Ok((reader, writer))
}

async fn run(config: AppConfig, path: PathBuf, terminals: Vec<Terminal>) {
    let triggers = TriggerRules::new(config.triggers.clone());
    let profiles = Profiles::new(config.profiles.clone());

    let (event_tx, mut events) = tokio_mpsc::unbounded_channel::<DeviceEvent>();
    let mut router = Router::new();
    for terminal in terminals {
        let device = terminal.device;
        let (cmd_tx, cmd_rx) = tokio_mpsc::unbounded_channel();
        router.add(device.id, cmd_tx);
        let task = DeviceTask {
            device: device.id,
            ack: device.ack,
            startup: device.startup_commands(),
            poll_signal: device.poll_signal,
            poll_gps: device.poll_gps,
            engine: config.engine.clone(),
            triggers: triggers.clone(),
            profiles: profiles.clone(),
        };
        tokio::spawn(task.run(
            LineReader::new(terminal.reader),
            terminal.writer,
            cmd_rx,
            event_tx.clone(),
        ));
    }
    drop(event_tx);

    let mut watcher = ConfigWatcher::new(path);
    let mut reload = time::interval(ConfigWatcher::POLL_INTERVAL);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                log_event(&event);
                router.route(&event);
                if let DeviceEvent::Disconnected { device } = event {
                    router.remove(device);
                    if router.is_empty() {
                        break;
                    }
                }
            }
            _ = reload.tick() => match watcher.poll() {
                Some(Ok(new)) => {
                    info!(
                        "{} reloaded: {} trigger(s), {} profile(s)",
                        watcher.path().display(),
                        new.triggers.len(),
                        new.profiles.len()
                    );
                    triggers.replace(new.triggers);
                    profiles.replace(new.profiles);
                }
                Some(Err(e)) => warn!("{}: {e}, keeping previous rules", watcher.path().display()),
                None => {}
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                router.quit_all();
            }
        }
    }
}

fn log_event(event: &DeviceEvent) {
    let device = event.device();
    match event {
        DeviceEvent::Connected { .. } => info!("[{device}] connected"),
        DeviceEvent::Disconnected { .. } => info!("[{device}] disconnected"),
        DeviceEvent::Error { message, .. } => warn!("[{device}] {message}"),
        DeviceEvent::Decoded { event, .. } => match event {
            Event::Text { from, text, .. } => {
                info!("[{device}] text from {}: {text}", from.as_deref().unwrap_or("?"))
            }
            Event::Status { from, code, .. } => {
                info!("[{device}] status {code} from {}", from.as_deref().unwrap_or("?"))
            }
            Event::Position(fix) => info!(
                "[{device}] position of {}: {:.6}, {:.6}",
                fix.source,
                fix.latitude,
                fix.longitude.unwrap_or_default()
            ),
            Event::RetryExhausted { issi } => warn!("[{device}] no full position from {issi}"),
            other => info!("[{device}] {other:?}"),
        },
    }
}
