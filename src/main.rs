// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
mod broadcaster;
mod cancel;
mod config;
mod driver;
mod frame;
mod pool;
mod sensor;
mod supervisor;
mod sync;
mod worker;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::supervisor::Supervisor;

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=visionbridge depth camera service

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/visionbridge
ExecStart=/usr/local/bin/visionbridge start "$VISIONBRIDGE_CONFIG"
ExecReload=/bin/kill -HUP $MAINPID

[Install]
WantedBy=multi-user.target
Alias=visionbridge.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = "0.1.0",
    about = "A depth camera capture, processing, and broadcast service."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the service: opens the device, runs the configured sensors, and listens for
    /// subscribers.
    Start {
        /// The path to the service config.
        config_path: String,
    },
    /// Lists the available camera devices.
    Devices {},
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config_path } => {
            let config = Config::load(&PathBuf::from(&config_path))?;
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(config.debug.log_level()))
                .init();

            Supervisor::run(config).await?;
        }
        Commands::Devices {} => {
            tracing_subscriber::fmt::init();
            let driver = driver::get_driver("mock", 0)?;
            let info = driver.device_info();
            println!("Devices:");
            println!("- {} (serial {})", info.name, info.serial);
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
