// Jackson Coxson
//! The device abstraction (C4): every driver — real or simulated —
//! implements [`Device`]. Declared with `#[async_trait]` rather than as
//! native `async fn`s in the trait, diverging from the teacher's
//! `IdeviceService`/`RsdService` traits, because [`crate::host::IosDeviceHost`]
//! needs to hand callers a `Arc<dyn Device>` and native async-fn-in-traits
//! are not yet object safe.

use std::path::Path;

use async_trait::async_trait;

use crate::error::DeviceError;
use crate::model::{AppBundleId, AppInfo, AppProcess, DeviceResource, Model, Udid, Version};
use crate::webinspector::client::FramedSocket;

/// The contract every device — tethered or simulated — satisfies.
///
/// Per spec.md §4.4: every operation fails with [`DeviceError`] (carrying
/// an optional [`crate::error::Remedy`]) on device-side problems; misuse
/// of the API (e.g. calling an operation twice that is documented as
/// single-shot) is a programming error and panics rather than returning
/// a typed failure.
#[async_trait]
pub trait Device: Send + Sync {
    fn udid(&self) -> &Udid;

    async fn is_responsive(&self) -> bool;

    /// True while a [`Self::restart`] initiated by this process is in
    /// flight. Cleared on every exit path of `restart`, including error
    /// paths, so a caller can never observe it stuck at `true`.
    fn is_restarting(&self) -> bool;

    async fn model(&self) -> Result<Model, DeviceError>;

    async fn version(&self) -> Result<Version, DeviceError>;

    async fn list_applications(&self) -> Result<Vec<AppInfo>, DeviceError>;

    async fn is_application_installed(&self, bundle_id: &AppBundleId) -> Result<bool, DeviceError>;

    async fn install_application(&self, path_to_app_or_ipa: &Path) -> Result<(), DeviceError>;

    async fn uninstall_application(&self, bundle_id: &AppBundleId) -> Result<(), DeviceError>;

    async fn run_application(
        &self,
        bundle_id: &AppBundleId,
        args: &[String],
    ) -> Result<AppProcess, DeviceError>;

    /// Starts capturing the device's system log to `log_path`. Per
    /// invariant (iii), at most one logger may be active at a time; a
    /// second call while one is running is a programming error.
    async fn start_system_logger(&self, log_path: &Path) -> Result<DeviceResource, DeviceError>;

    async fn pull_crash_logs(&self, dir: &Path) -> Result<(), DeviceError>;

    async fn clear_crash_logs(&self) -> Result<(), DeviceError>;

    async fn restart(&self) -> Result<(), DeviceError>;

    async fn take_screenshot(&self) -> Result<Vec<u8>, DeviceError>;

    async fn open_web_inspector_socket(&self) -> Result<FramedSocket, DeviceError>;
}

/// Configuration-profile and time-sync operations only a tethered,
/// supervised device supports.
#[async_trait]
pub trait RealDeviceOps: Device {
    async fn install_profile(&self, profile: &Path) -> Result<(), DeviceError>;

    async fn remove_profile(&self, identifier: &str) -> Result<(), DeviceError>;

    async fn list_configuration_profiles(&self) -> Result<Vec<String>, DeviceError>;

    async fn sync_to_system_time(&self) -> Result<(), DeviceError>;

    async fn battery_level(&self) -> Result<u8, DeviceError>;
}

/// Lifecycle operations only a `simctl`-backed simulator supports.
#[async_trait]
pub trait SimulatorOps: Device {
    async fn startup(&self) -> Result<(), DeviceError>;

    async fn shutdown(&self) -> Result<(), DeviceError>;

    async fn erase(&self) -> Result<(), DeviceError>;
}
