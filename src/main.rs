//! Entry point for the **keycommander** daemon.
//!
//! Spawns the hot-plug watcher and the control socket on background threads
//! and processes every [`ChannelInput`](keycommander::event::ChannelInput)
//! on the main thread.
//!
//! Usage: `keycommander [--config <path>]`

use keycommander::channel::SerialCommandChannel;
use keycommander::config::Config;
use keycommander::event::{ChannelEvent, ChannelInput};
use keycommander::ipc::listener::UnixSocketListener;
use keycommander::launcher::AppLauncher;
use keycommander::schedule::ThreadScheduler;
use keycommander::serial::port::SerialPortTransport;
use keycommander::serial::watcher::PortWatcher;
use keycommander::traits::ControlSource;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

/// Default socket path for the control listener.
fn default_socket_path() -> String {
    let runtime = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".into());
    format!("{}/keycommander.sock", runtime)
}

/// Resolve the config directory (`$XDG_CONFIG_HOME/keycommander`).
fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        format!("{}/.config", home)
    });
    PathBuf::from(base).join("keycommander")
}

/// The path given with `--config`, if any.
fn config_arg() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

/// Load the config from `--config <path>` (which must exist) or from
/// `$XDG_CONFIG_HOME/keycommander/config.json`, falling back to the
/// compiled-in defaults.
fn load_config() -> Config {
    if let Some(path) = config_arg() {
        return match Config::load(&path) {
            Ok(cfg) => {
                info!("loaded config from {}", path.display());
                cfg
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        };
    }

    let path = config_dir().join("config.json");
    match Config::load(&path) {
        Ok(cfg) => {
            info!("loaded config from {}", path.display());
            cfg
        }
        Err(e) => {
            info!("no config file ({}), using defaults", e);
            Config::default()
        }
    }
}

//  Main

fn main() {
    env_logger::init();

    let config = load_config();
    info!("serial port path: {}", config.serial.device_path);
    info!("serial port baud rate: {}", config.serial.baud_rate);
    for (identifier, path) in config.applications.iter() {
        info!("application mapping: {} -> {}", identifier, path.display());
    }

    let (input_tx, input_rx) = mpsc::channel::<ChannelInput>();

    let mut channel = SerialCommandChannel::new(
        SerialPortTransport::new(input_tx.clone()),
        ThreadScheduler::new(input_tx.clone()),
        AppLauncher::new(config.launcher.clone()),
        config.serial.clone(),
        config.applications.clone(),
    );
    spawn_notifier(channel.subscribe());

    spawn_port_watcher(&config, input_tx.clone());
    spawn_control_socket(input_tx);

    if let Err(e) = channel.connect(config.serial.clone()) {
        warn!("initial connect skipped: {}", e);
    }

    info!("keycommander running");
    for input in input_rx {
        channel.handle(input);
    }
    info!("all input sources closed, exiting");
}

//  Helpers

/// Log the user-facing notification for every channel event.
///
/// Displaying them is left to the desktop; this is where a notification
/// daemon would be called.
fn spawn_notifier(events: mpsc::Receiver<ChannelEvent>) {
    std::thread::spawn(move || {
        for event in events {
            if let Some(notification) = event.notification() {
                info!("notification: {}", notification);
            }
        }
    });
}

fn spawn_port_watcher(config: &Config, tx: mpsc::Sender<ChannelInput>) {
    if config.hotplug.poll_interval_ms == 0 {
        info!("hot-plug detection disabled");
        return;
    }
    let interval = Duration::from_millis(config.hotplug.poll_interval_ms);
    std::thread::spawn(move || {
        PortWatcher::new(interval).run(tx);
    });
}

fn spawn_control_socket(tx: mpsc::Sender<ChannelInput>) {
    let path = default_socket_path();
    std::thread::spawn(move || {
        let result = UnixSocketListener::bind(&path).and_then(|mut source| source.run(tx));
        if let Err(e) = result {
            error!("control socket error: {}", e);
        }
    });
}
