//! Plugin Lifecycle Module
//!
//! Capability modules (browser, scheduler, messaging bridges, third-party
//! extensions) are plugins: they declare handler bindings, get wired into the
//! shared [`EventBus`](crate::bus::EventBus) by the [`PluginRegistry`], and go
//! through `on_load`/`on_unload` around that wiring.
//!
//! Compiled plugins are made available through named factories; plugin
//! directories contain manifests that pick a factory and supply its config.
//! Reloading a plugin means recreating it from its factory, not swapping code.
//!
//! Dependencies declared by plugins are advisory: missing ones are reported
//! after discovery, and load order is the directory scan order.

pub mod manifest;
pub mod registry;
pub mod types;

pub use manifest::{scan_manifests, PluginManifest};
pub use registry::{PluginInfo, PluginRegistry};
pub use types::{
    Capability, HandlerBinding, Plugin, PluginContext, PluginFactory, PluginSummary,
};
