// Jackson Coxson
//! Host-level configuration (C15): overridable tool paths, timeouts, and
//! retry tuning, collected into one `Default`-able struct rather than
//! scattered `const`s, so an embedder can point the crate at e.g. a
//! non-`PATH` `ideviceinfo` without touching driver code.
//!
//! Named constants follow the teacher's convention of a `pub const` on
//! the type that owns the behaviour (`UsbmuxdConnection::DEFAULT_PORT`)
//! rather than free-floating module-level constants.

use std::path::PathBuf;
use std::time::Duration;

/// Process-wide tuning for the real-device and simulator drivers.
///
/// [`RealDevice`](crate::real_device::RealDevice) is constructed from one
/// of these (see `RealDevice::with_config`) and consumes every field
/// below directly instead of hardcoding its own constants or tool names.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// How long to sleep after `idevicediagnostics restart` before
    /// polling for responsiveness (spec.md §4.5).
    pub restart_settle_delay: Duration,
    /// Number of `is_responsive` polls attempted after the settle delay.
    pub restart_poll_attempts: u32,
    /// Delay between responsiveness polls during a restart.
    pub restart_poll_interval: Duration,
    /// Attempts for the developer-disk-image auto-mount retry loop.
    pub dev_image_mount_attempts: u32,
    /// Delay between developer-disk-image mount retries.
    pub dev_image_mount_delay: Duration,
    /// Polls for the apprunner-wedge-recovery check, each
    /// `apprunner_wedge_poll_interval` long.
    pub apprunner_wedge_polls: u32,
    pub apprunner_wedge_poll_interval: Duration,
    /// Attempts for the post-install verification poll.
    pub post_install_verify_attempts: u32,
    pub post_install_verify_delay: Duration,
    /// Root directory searched for a matching developer disk image.
    pub developer_disk_image_root: Option<PathBuf>,
    /// The `cfgutil pair` supervision identity, if the host manages
    /// supervised devices.
    pub supervision_identity: Option<String>,
    /// Binary name or path for the native Web Inspector proxy
    /// (spec.md §6, `idevicewebinspectorproxy`).
    pub webinspector_proxy_binary: String,

    /// Binary name or path for `idevice_id` (device enumeration).
    pub idevice_id_binary: String,
    /// Binary name or path for `ideviceinfo`.
    pub ideviceinfo_binary: String,
    /// Binary name or path for `ideviceinstaller`.
    pub ideviceinstaller_binary: String,
    /// Binary name or path for `idevicesyslog`.
    pub idevicesyslog_binary: String,
    /// Binary name or path for `idevicecrashreport`.
    pub idevicecrashreport_binary: String,
    /// Binary name or path for `idevicediagnostics`.
    pub idevicediagnostics_binary: String,
    /// Binary name or path for `idevicescreenshot`.
    pub idevicescreenshot_binary: String,
    /// Binary name or path for `ideviceimagemounter`.
    pub ideviceimagemounter_binary: String,
    /// Binary name or path for `idevicedate`.
    pub idevicedate_binary: String,
    /// Binary name or path for `cfgutil`.
    pub cfgutil_binary: String,
}

impl HostConfig {
    pub const DEFAULT_RESTART_SETTLE_DELAY: Duration = Duration::from_secs(30);
    pub const DEFAULT_RESTART_POLL_ATTEMPTS: u32 = 12;
    pub const DEFAULT_RESTART_POLL_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_DEV_IMAGE_MOUNT_ATTEMPTS: u32 = 10;
    pub const DEFAULT_DEV_IMAGE_MOUNT_DELAY: Duration = Duration::from_secs(3);
    pub const DEFAULT_APPRUNNER_WEDGE_POLLS: u32 = 5;
    pub const DEFAULT_APPRUNNER_WEDGE_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_POST_INSTALL_VERIFY_ATTEMPTS: u32 = 5;
    pub const DEFAULT_POST_INSTALL_VERIFY_DELAY: Duration = Duration::from_millis(500);
    pub const DEFAULT_WEBINSPECTOR_PROXY_BINARY: &'static str = "idevicewebinspectorproxy";

    pub const DEFAULT_IDEVICE_ID_BINARY: &'static str = "idevice_id";
    pub const DEFAULT_IDEVICEINFO_BINARY: &'static str = "ideviceinfo";
    pub const DEFAULT_IDEVICEINSTALLER_BINARY: &'static str = "ideviceinstaller";
    pub const DEFAULT_IDEVICESYSLOG_BINARY: &'static str = "idevicesyslog";
    pub const DEFAULT_IDEVICECRASHREPORT_BINARY: &'static str = "idevicecrashreport";
    pub const DEFAULT_IDEVICEDIAGNOSTICS_BINARY: &'static str = "idevicediagnostics";
    pub const DEFAULT_IDEVICESCREENSHOT_BINARY: &'static str = "idevicescreenshot";
    pub const DEFAULT_IDEVICEIMAGEMOUNTER_BINARY: &'static str = "ideviceimagemounter";
    pub const DEFAULT_IDEVICEDATE_BINARY: &'static str = "idevicedate";
    pub const DEFAULT_CFGUTIL_BINARY: &'static str = "cfgutil";
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            restart_settle_delay: Self::DEFAULT_RESTART_SETTLE_DELAY,
            restart_poll_attempts: Self::DEFAULT_RESTART_POLL_ATTEMPTS,
            restart_poll_interval: Self::DEFAULT_RESTART_POLL_INTERVAL,
            dev_image_mount_attempts: Self::DEFAULT_DEV_IMAGE_MOUNT_ATTEMPTS,
            dev_image_mount_delay: Self::DEFAULT_DEV_IMAGE_MOUNT_DELAY,
            apprunner_wedge_polls: Self::DEFAULT_APPRUNNER_WEDGE_POLLS,
            apprunner_wedge_poll_interval: Self::DEFAULT_APPRUNNER_WEDGE_POLL_INTERVAL,
            post_install_verify_attempts: Self::DEFAULT_POST_INSTALL_VERIFY_ATTEMPTS,
            post_install_verify_delay: Self::DEFAULT_POST_INSTALL_VERIFY_DELAY,
            developer_disk_image_root: None,
            supervision_identity: None,
            webinspector_proxy_binary: Self::DEFAULT_WEBINSPECTOR_PROXY_BINARY.to_string(),
            idevice_id_binary: Self::DEFAULT_IDEVICE_ID_BINARY.to_string(),
            ideviceinfo_binary: Self::DEFAULT_IDEVICEINFO_BINARY.to_string(),
            ideviceinstaller_binary: Self::DEFAULT_IDEVICEINSTALLER_BINARY.to_string(),
            idevicesyslog_binary: Self::DEFAULT_IDEVICESYSLOG_BINARY.to_string(),
            idevicecrashreport_binary: Self::DEFAULT_IDEVICECRASHREPORT_BINARY.to_string(),
            idevicediagnostics_binary: Self::DEFAULT_IDEVICEDIAGNOSTICS_BINARY.to_string(),
            idevicescreenshot_binary: Self::DEFAULT_IDEVICESCREENSHOT_BINARY.to_string(),
            ideviceimagemounter_binary: Self::DEFAULT_IDEVICEIMAGEMOUNTER_BINARY.to_string(),
            idevicedate_binary: Self::DEFAULT_IDEVICEDATE_BINARY.to_string(),
            cfgutil_binary: Self::DEFAULT_CFGUTIL_BINARY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_the_documented_constants() {
        let config = HostConfig::default();
        assert_eq!(config.restart_settle_delay, Duration::from_secs(30));
        assert_eq!(config.restart_poll_attempts, 12);
        assert_eq!(config.webinspector_proxy_binary, "idevicewebinspectorproxy");
        assert_eq!(config.ideviceinfo_binary, "ideviceinfo");
        assert_eq!(config.cfgutil_binary, "cfgutil");
        assert!(config.developer_disk_image_root.is_none());
    }
}
