//! Session-less driver entry points: syslog, trap and SNMP discovery.
//!
//! These run on the calling thread with the same sandbox as snapshots but
//! without `cli`, `device` or `config`. Callers on an async runtime should
//! move them to a blocking thread.
//!
//! The last argument handed to each function is a callable that appends a
//! message to the trace, e.g. `fn analyzeSyslog(message, log) { log.call("..") }`.

use std::collections::BTreeMap;
use std::net::IpAddr;

use log::debug;
use rhai::{Dynamic, FnPtr, Map};

use super::{api, truthy, Sandbox, DEBUG_FN};
use crate::config::ScriptLimits;
use crate::descriptor::DriverDescriptor;
use crate::error::{Result, ScriptError};
use crate::session::DebugTrace;

fn call_bool(
    descriptor: &DriverDescriptor,
    limits: &ScriptLimits,
    function: &str,
    mut args: Vec<Dynamic>,
) -> Result<bool> {
    let program = descriptor
        .program
        .as_ref()
        .filter(|p| p.has_function(function))
        .ok_or_else(|| ScriptError::MissingFunction(function.to_string()))?;

    let sandbox = Sandbox::new(limits.clone(), DebugTrace::new()).with_time_budget();
    let engine = sandbox.engine();
    let debug = FnPtr::new(DEBUG_FN).map_err(|e| api::script_failure(&sandbox.fatal, e))?;
    args.push(Dynamic::from(debug));
    let result = truthy(&sandbox.call(&engine, program, function, args)?);
    for line in sandbox.trace.lines() {
        debug!("[{}] {}", descriptor.name(), line);
    }
    Ok(result)
}

/// Ask the driver whether a syslog message announces a configuration change.
pub fn analyze_syslog(
    descriptor: &DriverDescriptor,
    limits: &ScriptLimits,
    message: &str,
    source: IpAddr,
) -> Result<bool> {
    debug!("Analyzing syslog message from {} with driver '{}'", source, descriptor.name());
    call_bool(
        descriptor,
        limits,
        "analyzeSyslog",
        vec![Dynamic::from(message.to_string())],
    )
}

/// Ask the driver whether an SNMP trap announces a configuration change.
///
/// `data` maps OIDs to their string values.
pub fn analyze_trap(
    descriptor: &DriverDescriptor,
    limits: &ScriptLimits,
    data: &BTreeMap<String, String>,
    source: IpAddr,
) -> Result<bool> {
    let map: Map = data
        .iter()
        .map(|(oid, value)| (oid.as_str().into(), Dynamic::from(value.clone())))
        .collect();
    debug!("Analyzing trap from {} with driver '{}'", source, descriptor.name());
    call_bool(descriptor, limits, "analyzeTrap", vec![Dynamic::from_map(map)])
}

/// Ask the driver whether it handles a device with this SNMP identity.
pub fn snmp_auto_discover(
    descriptor: &DriverDescriptor,
    limits: &ScriptLimits,
    sys_object_id: &str,
    sys_desc: &str,
) -> Result<bool> {
    call_bool(
        descriptor,
        limits,
        "snmpAutoDiscover",
        vec![
            Dynamic::from(sys_object_id.to_string()),
            Dynamic::from(sys_desc.to_string()),
        ],
    )
}
