//! Driver descriptors: the typed model of a vendor CLI.
//!
//! A descriptor is loaded once from a Rhai driver file, validated, and then
//! shared read-only by every session using that driver.

mod attribute;
mod definition;
mod loader;
mod mode;
mod registry;

pub use attribute::{AttributeSpec, AttributeType};
pub use definition::{DriverDescriptor, DriverInfo};
pub use loader::{DriverLoader, DRIVER_EXTENSION};
pub use mode::{MacroSpec, ModeSpec, PagerSpec, AUTO_MACRO};
pub use registry::DriverRegistry;
