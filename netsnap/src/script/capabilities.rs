//! Host API capability table.
//!
//! Drivers can query the table at run time with `has_capability(name)` or
//! declare what they need in `info.requires`, in which case a missing
//! capability rejects the driver when it is loaded.

use crate::descriptor::DriverInfo;
use crate::error::DescriptorError;

/// Version of the host API exposed to driver scripts.
pub const HOST_API_VERSION: i64 = 1;

/// Capabilities provided by this host.
pub const CAPABILITIES: &[&str] = &[
    "cli.macro",
    "cli.command",
    "cli.findSections",
    "cli.sleep",
    "cli.debug",
    "device.set",
    "device.add",
    "device.get",
    "config.set",
    "config.computeHash",
    "config.customHash",
    "config.download",
    "config.download.sftp",
    "config.download.scp",
    "config.download.checksum",
    "text.regex",
];

/// Whether the host provides a capability.
pub fn has_capability(name: &str) -> bool {
    CAPABILITIES.contains(&name)
}

/// Reject a driver that requires something this host does not provide.
pub fn check_requirements(info: &DriverInfo) -> Result<(), DescriptorError> {
    match info.requires.iter().find(|req| !has_capability(req)) {
        Some(missing) => Err(DescriptorError::MissingCapability {
            name: info.name.clone(),
            capability: missing.clone(),
        }),
        None => Ok(()),
    }
}
