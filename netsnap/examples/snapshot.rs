//! Snapshot example: take configuration snapshots of live devices
//!
//! Loads every driver of a directory, then snapshots each given device
//! concurrently and prints the results as JSON.
//!
//! # Prerequisites
//!
//! - Devices reachable over SSH or Telnet
//! - A driver directory (the crate's `drivers/` works for Cisco IOS)
//!
//! # Usage
//!
//! ```bash
//! cargo run --example snapshot -- --drivers drivers --driver CiscoIOS12 \
//!     --user admin --password secret --enable secret 192.0.2.1 192.0.2.2
//! ```
//!
//! Append `:telnet` to an address to use Telnet.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use netsnap::{
    Credentials, DeviceTarget, DeviceTask, DriverRegistry, EngineConfig, Orchestrator,
    TransportKind,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.devices.is_empty() {
        Args::print_help();
        std::process::exit(1);
    }

    let config = EngineConfig::default().max_sessions(args.concurrency);
    let registry = DriverRegistry::load_dir(&args.drivers, &config.script)?;
    println!(
        "Loaded drivers: {}",
        registry.names().collect::<Vec<_>>().join(", ")
    );
    let orchestrator = Orchestrator::with_network(config, Arc::new(registry));

    let mut credentials = Credentials::new(&args.user, &args.password);
    if let Some(enable) = &args.enable {
        credentials = credentials.with_super_password(enable);
    }

    let tasks = args
        .devices
        .iter()
        .enumerate()
        .map(|(i, device)| {
            let (address, transport) = match device.strip_suffix(":telnet") {
                Some(address) => (address, TransportKind::Telnet),
                None => (device.as_str(), TransportKind::Ssh),
            };
            DeviceTask::snapshot(
                format!("snapshot-{i}"),
                DeviceTarget::new(address, address, transport),
                &args.driver,
                credentials.clone(),
            )
        })
        .collect();

    // Ctrl-C cancels every task; sessions are closed before results come back
    let cancel = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.shutdown();
        }
    });

    for result in orchestrator.run_all(tasks).await {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    drivers: PathBuf,
    driver: String,
    user: String,
    password: String,
    enable: Option<String>,
    concurrency: usize,
    devices: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut drivers = PathBuf::from("drivers");
        let mut driver = "CiscoIOS12".to_string();
        let mut user = env::var("USER").unwrap_or_else(|_| "admin".to_string());
        let mut password = String::new();
        let mut enable = None;
        let mut concurrency = 10usize;
        let mut devices = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--drivers" | "-d" => {
                    i += 1;
                    if i < args.len() {
                        drivers = PathBuf::from(&args[i]);
                    }
                }
                "--driver" => {
                    i += 1;
                    if i < args.len() {
                        driver = args[i].clone();
                    }
                }
                "--user" | "-u" => {
                    i += 1;
                    if i < args.len() {
                        user = args[i].clone();
                    }
                }
                "--password" | "-P" => {
                    i += 1;
                    if i < args.len() {
                        password = args[i].clone();
                    }
                }
                "--enable" | "-e" => {
                    i += 1;
                    if i < args.len() {
                        enable = Some(args[i].clone());
                    }
                }
                "--concurrency" | "-c" => {
                    i += 1;
                    if i < args.len() {
                        concurrency = args[i].parse().unwrap_or(10);
                    }
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                other if other.starts_with('-') => {
                    eprintln!("Unknown argument: {}", other);
                }
                device => devices.push(device.to_string()),
            }
            i += 1;
        }

        Self {
            drivers,
            driver,
            user,
            password,
            enable,
            concurrency,
            devices,
        }
    }

    fn print_help() {
        println!(
            r#"netsnap snapshot example

USAGE:
    cargo run --example snapshot -- [OPTIONS] <ADDRESS>...

OPTIONS:
    -d, --drivers <DIR>        Driver directory [default: drivers]
        --driver <NAME>        Driver name [default: CiscoIOS12]
    -u, --user <USER>          Username [default: $USER]
    -P, --password <PASS>      Password
    -e, --enable <PASS>        Enable (super) password
    -c, --concurrency <N>      Maximum concurrent sessions [default: 10]
    --help                     Print this help message

Append :telnet to an address to connect over Telnet."#
        );
    }
}
