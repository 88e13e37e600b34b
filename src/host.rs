// Jackson Coxson
//! The device host / registry (C12): memoises one `Arc<dyn Device>` per
//! UDID for the process lifetime. Generalizes the teacher's
//! `IdeviceProvider` pattern (construct a fresh connection handle per
//! call) into "construct once, reuse for as long as the process lives",
//! the mechanism behind spec.md §3 invariant (ii) — `connectedDevice`
//! and `connectedDevices` always hand back the same instance for a UDID.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;

use crate::command::Command;
use crate::config::HostConfig;
use crate::device::Device;
use crate::error::OrchestratorError;
use crate::model::Udid;
use crate::real_device::RealDevice;
use crate::simulator::{self, SimulatorDevice};

/// Guards spec.md §3 invariant (vi): the real-device subsystem (usbmuxd
/// connections, lockdown pairing state) may only be initialised once per
/// process. A second, independent [`IosDeviceHost::new`] call is a
/// programming error, not a recoverable one — the same "misuse panics"
/// contract [`crate::device::Device`] documents for its own operations.
static SUBSYSTEM_INITIALIZED: OnceLock<()> = OnceLock::new();

fn parse_real_device_udids(stdout: &str) -> Vec<Udid> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Udid::new)
        .collect()
}

/// The process-wide registry of known devices, real and simulated.
pub struct IosDeviceHost {
    config: HostConfig,
    devices: Mutex<HashMap<Udid, Arc<dyn Device>>>,
}

impl IosDeviceHost {
    /// Initialises the host's real-device subsystem and returns a fresh,
    /// empty registry. Panics if called more than once in this process.
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        if SUBSYSTEM_INITIALIZED.set(()).is_err() {
            panic!("IosDeviceHost::new called twice; the real-device subsystem may only be initialised once per process");
        }
        Self {
            config,
            devices: Mutex::new(HashMap::new()),
        }
    }

    async fn real_device_udids(&self) -> Result<Vec<Udid>, OrchestratorError> {
        let result = Command::new(&self.config.idevice_id_binary).arg("-l").execute().await?;
        Ok(parse_real_device_udids(&result.stdout()))
    }

    fn build_real_device(&self, udid: Udid) -> Arc<dyn Device> {
        Arc::new(RealDevice::with_config(udid, self.config.clone()))
    }

    /// Polls `idevice_id -l` and `simctl list devices --json`, inserting
    /// a device handle for every UDID not already known and returning
    /// the full, current set of known devices.
    pub async fn connected_devices(&self) -> Result<Vec<Arc<dyn Device>>, OrchestratorError> {
        let real_udids = self.real_device_udids().await?;
        let sim_udids: Vec<Udid> = simulator::list_devices().await?.into_iter().map(|s| s.udid).collect();

        let mut guard = self.devices.lock().await;
        let mut result = Vec::with_capacity(real_udids.len() + sim_udids.len());

        for udid in real_udids {
            let device = guard
                .entry(udid.clone())
                .or_insert_with(|| self.build_real_device(udid))
                .clone();
            result.push(device);
        }
        for udid in sim_udids {
            let device = guard
                .entry(udid.clone())
                .or_insert_with(|| Arc::new(SimulatorDevice::new(udid)) as Arc<dyn Device>)
                .clone();
            result.push(device);
        }

        Ok(result)
    }

    /// The same instance [`Self::connected_devices`] would return for
    /// `udid`, or `None` if it isn't currently connected.
    pub async fn connected_device(&self, udid: &Udid) -> Result<Option<Arc<dyn Device>>, OrchestratorError> {
        Ok(self.connected_devices().await?.into_iter().find(|d| d.udid() == udid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_udid_per_nonblank_line() {
        let udids = parse_real_device_udids("aaaa1111\n\nbbbb2222\n");
        assert_eq!(udids, vec![Udid::new("aaaa1111"), Udid::new("bbbb2222")]);
    }

    #[test]
    fn empty_output_yields_no_udids() {
        assert!(parse_real_device_udids("").is_empty());
    }

    // `IosDeviceHost::new` touches a process-wide `OnceLock`, so only one
    // test in this binary may call it; every other host behaviour above
    // is exercised through the pure helper functions instead.
    #[test]
    fn second_construction_in_the_same_process_panics() {
        let _first = IosDeviceHost::new();
        let second = std::panic::catch_unwind(IosDeviceHost::new);
        assert!(second.is_err());
    }
}
