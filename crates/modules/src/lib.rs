//! Module lifecycle: discovery, per-scope instances, enable flags, hot
//! reload and per-request capability catalogs.

pub mod catalog;
pub mod manifest;
pub mod registry;
pub mod toggles;
pub mod watcher;

pub use catalog::{CapabilityCatalog, Dispatch};
pub use manifest::{DiscoveredModule, SourceDescriptor};
pub use registry::{
    ModuleEntry, ModuleEvent, ModuleRegistry, ModuleReport, ModuleView, RegistrySnapshot, Scope,
    StatusReport,
};
pub use toggles::ToggleStore;
pub use watcher::{Debouncer, ModuleWatcher};
