//! Offline example: snapshot a replayed Cisco IOS device
//!
//! This example runs the bundled Cisco IOS driver against a scripted
//! transport, so no device is needed. It shows the full snapshot flow:
//! entry macro, pager avoidance, commands, facts and configuration.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug cargo run --example offline_snapshot
//! ```

use std::sync::Arc;

use netsnap::transport::{ScriptedConnector, ScriptedTransport};
use netsnap::{
    Credentials, DeviceTarget, DeviceTask, DriverLoader, DriverRegistry, EngineConfig,
    Orchestrator, TransportKind,
};

const SHOW_VERSION: &str = "show version\r\n\
    Cisco IOS Software, C2900 Software (C2900-UNIVERSALK9-M), Version 15.2(4)M7, RELEASE SOFTWARE\r\n\
    edge1 uptime is 3 weeks, 2 days\r\n\
    524288K bytes of physical memory\r\n\
    edge1#";

const RUNNING_CONFIG: &str = "show running-config\r\n\
    Building configuration...\r\n\
    !\r\n\
    ! Last configuration change at 10:02:11 UTC Mon Mar 4 2024 by netops\r\n\
    hostname edge1\r\n\
    interface Gi0/0\r\n\
    \x20description uplink\r\n\
    end\r\n\
    edge1#";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut registry = DriverRegistry::new();
    let driver = DriverLoader::default().load_str(
        "cisco_ios.rhai",
        include_str!("../drivers/cisco_ios.rhai"),
    )?;
    registry.register(driver)?;

    let connector = Arc::new(ScriptedConnector::new(|_: &DeviceTarget| {
        ScriptedTransport::new()
            .greeting("edge1#")
            .reply("terminal length 0\n", "terminal length 0\r\nedge1#")
            .reply("show version\n", SHOW_VERSION)
            .reply("show running-config\n", RUNNING_CONFIG)
            .reply("show startup-config\n", "show startup-config\r\n% Invalid input\r\nedge1#")
    }));
    let orchestrator = Orchestrator::new(EngineConfig::default(), Arc::new(registry), connector);

    let task = DeviceTask::snapshot(
        "offline-1",
        DeviceTarget::new("edge1", "192.0.2.1", TransportKind::Ssh),
        "CiscoIOS12",
        Credentials::new("admin", "secret"),
    );
    let result = orchestrator.run(task).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
