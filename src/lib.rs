// Jackson Coxson
//! `iosdevicectl` — an orchestration core for controlling tethered and
//! simulated iOS devices: install/uninstall/launch applications, capture
//! screenshots and system logs, pull crash reports, and bridge a Web
//! Inspector session, over the same `idevice*`/`cfgutil`/`simctl`
//! tooling a developer would drive by hand.
//!
//! Two device backends share one [`device::Device`] contract:
//! [`real_device::RealDevice`] for tethered hardware (reached through
//! `idevice*`/`cfgutil`, with a native GDB remote-serial-protocol client
//! for app launches — see [`debug_proxy`]) and [`simulator::SimulatorDevice`]
//! for `xcrun simctl`-managed simulators. [`host::IosDeviceHost`]
//! discovers and memoises both kinds by UDID.
//!
//! This crate does not install a global `tracing` subscriber; callers
//! (e.g. the [`bin/idevicewebinspectorproxy`](https://docs.rs/iosdevicectl)
//! binary) own that.

pub mod cache;
pub mod command;
pub mod config;
pub mod debug_proxy;
pub mod device;
pub mod devimage;
pub mod error;
pub mod host;
pub mod lockdown;
pub mod model;
pub mod real_device;
pub mod retry;
pub mod simulator;
pub mod usbmux;
pub mod webinspector;

pub use device::{Device, RealDeviceOps, SimulatorOps};
pub use error::{DeviceError, OrchestratorError, Remedy};
pub use host::IosDeviceHost;
pub use model::Udid;
