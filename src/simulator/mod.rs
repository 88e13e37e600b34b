// Jackson Coxson
//! The simulator driver (C6): wraps `xcrun simctl`. Grounded in
//! `other_examples`' Xscape `simctl` module for the JSON-enumeration and
//! boot/shutdown-tolerant-error shape, generalized onto this crate's
//! [`crate::command::Command`] engine instead of calling
//! `tokio::process::Command` directly, and extended with the IPA-unzip
//! install path, app enumeration, and model resolution spec.md §4.6 adds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::command::{Command, OutputSink};
use crate::device::{Device, SimulatorOps};
use crate::error::{DeviceError, OrchestratorError};
use crate::model::{AppBundleId, AppInfo, AppProcess, Architecture, DeviceResource, Model, Udid, Version};
use crate::webinspector::client::FramedSocket;

const BOOT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct SimctlDeviceList {
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    #[serde(default)]
    udid: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "deviceTypeIdentifier", default)]
    device_type_identifier: Option<String>,
    #[serde(default)]
    state: String,
}

/// Summary of one `simctl list devices --json` entry.
#[derive(Debug, Clone)]
pub struct SimulatorSummary {
    pub udid: Udid,
    pub name: String,
    pub device_type_identifier: String,
    pub runtime_identifier: String,
    pub state: SimulatorState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Shutdown,
    Booting,
    Booted,
    ShuttingDown,
}

fn parse_state(s: &str) -> SimulatorState {
    match s.to_lowercase().as_str() {
        "booted" => SimulatorState::Booted,
        "booting" => SimulatorState::Booting,
        "shuttingdown" | "shutting down" => SimulatorState::ShuttingDown,
        _ => SimulatorState::Shutdown,
    }
}

/// Enumerates every simulator `simctl` knows about.
pub async fn list_devices() -> Result<Vec<SimulatorSummary>, OrchestratorError> {
    let result = Command::new("xcrun")
        .args(["simctl", "list", "devices", "--json"])
        .execute()
        .await?;

    let list: SimctlDeviceList = serde_json::from_slice(&result.stdout_bytes())
        .map_err(|e| OrchestratorError::IllegalState(format!("malformed simctl list output: {e}")))?;

    let mut devices = Vec::new();
    for (runtime_id, runtime_devices) in list.devices {
        for device in runtime_devices {
            devices.push(SimulatorSummary {
                udid: Udid::new(device.udid),
                name: device.name,
                device_type_identifier: device.device_type_identifier.unwrap_or_default(),
                runtime_identifier: runtime_id.clone(),
                state: parse_state(&device.state),
            });
        }
    }
    Ok(devices)
}

/// A `simctl`-backed simulator.
pub struct SimulatorDevice {
    udid: Udid,
    device_type_identifier: std::sync::Mutex<Option<String>>,
    is_restarting: std::sync::atomic::AtomicBool,
}

impl SimulatorDevice {
    pub fn new(udid: Udid) -> Self {
        Self {
            udid,
            device_type_identifier: std::sync::Mutex::new(None),
            is_restarting: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn device_error(&self, message: impl Into<String>) -> DeviceError {
        DeviceError::new(self.udid.clone(), message)
    }

    async fn simctl(&self, args: &[&str]) -> Result<crate::command::CommandResult, DeviceError> {
        Command::new("xcrun")
            .args(std::iter::once("simctl").chain(args.iter().copied()))
            .execute()
            .await
            .map_err(|e| self.device_error(format!("simctl {args:?} failed: {e}")))
    }

    /// Polls `simctl io <udid> enumerate` until it reports an
    /// `IOSurface port`, meaning the device is booted AND can produce a
    /// screenshot (spec.md §4.6).
    async fn wait_until_screenshot_ready(&self) -> Result<(), DeviceError> {
        loop {
            let result = Command::new("xcrun")
                .args(["simctl", "io", self.udid.as_str(), "enumerate"])
                .execute()
                .await;
            if let Ok(result) = result {
                if result.stdout().contains("IOSurface port") {
                    return Ok(());
                }
            }
            tokio::time::sleep(BOOT_POLL_INTERVAL).await;
        }
    }

    /// Locates this device's runtime's `RuntimeRoot/Applications`
    /// directory — where preinstalled system apps (Settings, Mobile
    /// Safari, ...) live — trying the CoreSimulator profile directories
    /// first and falling back to the Xcode SDK path (spec.md §4.6:
    /// "combines system apps ... with user apps").
    async fn runtime_roots(&self) -> Vec<PathBuf> {
        let runtime_suffix = list_devices()
            .await
            .ok()
            .into_iter()
            .flatten()
            .find(|d| d.udid == self.udid)
            .and_then(|d| d.runtime_identifier.rsplit('.').next().map(str::to_string));

        let mut runtimes_dirs = Vec::new();
        if let Some(home) = dirs_home() {
            runtimes_dirs.push(home.join("Library/Developer/CoreSimulator/Profiles/Runtimes"));
            runtimes_dirs.push(home.join("Library/Developer/CoreSimulator/Runtimes"));
        }
        if let Ok(output) = std::process::Command::new("xcode-select").arg("-p").output() {
            if output.status.success() {
                let dev_dir = String::from_utf8_lossy(&output.stdout).trim().to_string();
                runtimes_dirs.push(
                    PathBuf::from(dev_dir)
                        .join("Platforms/iPhoneOS.platform/Library/Developer/CoreSimulator/Profiles/Runtimes"),
                );
            }
        }

        let mut roots = Vec::new();
        for runtimes_dir in runtimes_dirs {
            let mut entries = match tokio::fs::read_dir(&runtimes_dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                let matches = runtime_suffix.as_deref().map(|suffix| name.contains(suffix)).unwrap_or(true);
                if matches {
                    roots.push(entry.path().join("Contents/Resources/RuntimeRoot/Applications"));
                }
            }
        }
        roots
    }

    fn user_apps_root(&self) -> Option<PathBuf> {
        dirs_home().map(|home| {
            home.join("Library/Developer/CoreSimulator/Devices")
                .join(self.udid.as_str())
                .join("data/Containers/Bundle/Application")
        })
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Reads the device type's `profile.plist` for its `supportedArchs` and
/// picks x86_64 if the simulator supports running as one, else i386
/// (spec.md §4.6). Falls back to x86_64 when the profile can't be read,
/// which is the common case on modern device types.
async fn architecture_for_device_type(device_type_identifier: &str) -> Architecture {
    let home = match dirs_home() {
        Some(home) => home,
        None => return Architecture::X86_64,
    };
    let profile_path = home
        .join("Library/Developer/CoreSimulator/Profiles/DeviceTypes")
        .join(format!("{device_type_identifier}.simdevicetype"))
        .join("Contents/Resources/profile.plist");

    let bytes = match tokio::fs::read(&profile_path).await {
        Ok(bytes) => bytes,
        Err(_) => return Architecture::X86_64,
    };
    let value: plist::Value = match plist::from_bytes(&bytes) {
        Ok(value) => value,
        Err(_) => return Architecture::X86_64,
    };
    let supports_x86_64 = value
        .as_dictionary()
        .and_then(|dict| dict.get("supportedArchs"))
        .and_then(|v| v.as_array())
        .map(|archs| archs.iter().any(|a| a.as_string() == Some("x86_64")))
        .unwrap_or(true);

    if supports_x86_64 {
        Architecture::X86_64
    } else {
        Architecture::I386
    }
}

#[async_trait]
impl Device for SimulatorDevice {
    fn udid(&self) -> &Udid {
        &self.udid
    }

    async fn is_responsive(&self) -> bool {
        list_devices()
            .await
            .ok()
            .into_iter()
            .flatten()
            .any(|d| d.udid == self.udid && d.state == SimulatorState::Booted)
    }

    fn is_restarting(&self) -> bool {
        self.is_restarting.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn model(&self) -> Result<Model, DeviceError> {
        let identifier = {
            let mut guard = self.device_type_identifier.lock().expect("mutex poisoned");
            if guard.is_none() {
                let devices = list_devices()
                    .await
                    .map_err(|e| self.device_error(e.to_string()))?;
                let found = devices
                    .into_iter()
                    .find(|d| d.udid == self.udid)
                    .ok_or_else(|| self.device_error("not found in simctl device list"))?;
                *guard = Some(found.device_type_identifier);
            }
            guard.clone().expect("just set")
        };

        // "com.apple.CoreSimulator.SimDeviceType.iPhone-14" -> "iPhone-14"
        let device_type_name = identifier
            .rsplit('.')
            .next()
            .unwrap_or(&identifier)
            .to_string();
        let normalized: String = device_type_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();

        let architecture = architecture_for_device_type(&identifier).await;
        Ok(Model::from_identifier(normalized, architecture))
    }

    async fn version(&self) -> Result<Version, DeviceError> {
        let devices = list_devices().await.map_err(|e| self.device_error(e.to_string()))?;
        let found = devices
            .into_iter()
            .find(|d| d.udid == self.udid)
            .ok_or_else(|| self.device_error("not found in simctl device list"))?;
        // "com.apple.CoreSimulator.SimRuntime.iOS-17-0" -> "17.0"
        let version_str = found
            .runtime_identifier
            .rsplit('.')
            .next()
            .unwrap_or("")
            .trim_start_matches("iOS-")
            .replace('-', ".");
        Ok(Version::new(version_str.clone(), version_str))
    }

    async fn list_applications(&self) -> Result<Vec<AppInfo>, DeviceError> {
        let mut apps = Vec::new();
        for root in self.runtime_roots().await {
            if let Ok(mut entries) = tokio::fs::read_dir(&root).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if entry.path().extension().and_then(|e| e.to_str()) == Some("app") {
                        if let Ok(info) = AppInfo::from_app_dir(&entry.path()) {
                            apps.push(info);
                        }
                    }
                }
            }
        }
        if let Some(user_apps_root) = self.user_apps_root() {
            if let Ok(mut entries) = tokio::fs::read_dir(&user_apps_root).await {
                while let Ok(Some(container)) = entries.next_entry().await {
                    if let Ok(mut bundles) = tokio::fs::read_dir(container.path()).await {
                        while let Ok(Some(bundle)) = bundles.next_entry().await {
                            if bundle.path().extension().and_then(|e| e.to_str()) == Some("app") {
                                if let Ok(info) = AppInfo::from_app_dir(&bundle.path()) {
                                    apps.push(info);
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(apps)
    }

    async fn is_application_installed(&self, bundle_id: &AppBundleId) -> Result<bool, DeviceError> {
        Ok(self
            .list_applications()
            .await?
            .iter()
            .any(|app| &app.bundle_id == bundle_id))
    }

    async fn install_application(&self, path_to_app_or_ipa: &Path) -> Result<(), DeviceError> {
        let is_ipa = path_to_app_or_ipa.extension().and_then(|e| e.to_str()) == Some("ipa");

        if !is_ipa {
            let path = path_to_app_or_ipa.to_string_lossy().into_owned();
            self.simctl(&["install", self.udid.as_str(), &path]).await?;
            return Ok(());
        }

        let tmp = tempfile::tempdir().map_err(|e| self.device_error(format!("mktemp failed: {e}")))?;
        let file = std::fs::File::open(path_to_app_or_ipa)
            .map_err(|e| self.device_error(format!("failed to open ipa: {e}")))?;
        let mut archive =
            zip::ZipArchive::new(file).map_err(|e| self.device_error(format!("not a zip archive: {e}")))?;
        archive
            .extract(tmp.path())
            .map_err(|e| self.device_error(format!("failed to unzip ipa: {e}")))?;

        let payload_dir = tmp.path().join("Payload");
        let app_dir = std::fs::read_dir(&payload_dir)
            .map_err(|e| self.device_error(format!("ipa missing Payload/: {e}")))?
            .filter_map(|e| e.ok())
            .find(|e| e.path().extension().and_then(|x| x.to_str()) == Some("app"))
            .ok_or_else(|| self.device_error("ipa Payload/ contains no .app"))?
            .path();

        let app_dir_str = app_dir.to_string_lossy().into_owned();
        self.simctl(&["install", self.udid.as_str(), &app_dir_str]).await?;
        Ok(())
    }

    async fn uninstall_application(&self, bundle_id: &AppBundleId) -> Result<(), DeviceError> {
        self.simctl(&["uninstall", self.udid.as_str(), bundle_id.as_str()]).await?;
        Ok(())
    }

    async fn run_application(&self, bundle_id: &AppBundleId, args: &[String]) -> Result<AppProcess, DeviceError> {
        let mut cmd = Command::new("xcrun")
            .arg("simctl")
            .arg("launch")
            .arg("--console")
            .arg("--terminate-running-process")
            .arg(self.udid.as_str())
            .arg(bundle_id.as_str())
            .stderr(OutputSink::Capture);
        for arg in args {
            cmd = cmd.arg(arg.clone());
        }

        let process = cmd.start().await.map_err(|e| self.device_error(e.to_string()))?;
        // Per spec.md §9 Open Question (a): `simctl launch --console`
        // relays the hosted app's stdout on simctl's own stderr.
        Ok(AppProcess::from_command(process, true))
    }

    async fn start_system_logger(&self, log_path: &Path) -> Result<DeviceResource, DeviceError> {
        let cmd = Command::new("xcrun")
            .args(["simctl", "spawn", self.udid.as_str(), "log", "stream"])
            .stdout(OutputSink::File(log_path.to_path_buf()));
        let process = cmd.start().await.map_err(|e| self.device_error(e.to_string()))?;
        Ok(DeviceResource::new(move || {
            let process = process.clone();
            tokio::spawn(async move {
                let _ = process.kill().await;
            });
        }))
    }

    async fn pull_crash_logs(&self, dir: &Path) -> Result<(), DeviceError> {
        let source = dirs_home()
            .map(|home| {
                home.join("Library/Logs/DiagnosticReports")
            })
            .ok_or_else(|| self.device_error("HOME not set"))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| self.device_error(e.to_string()))?;
        let mut entries = tokio::fs::read_dir(&source)
            .await
            .map_err(|e| self.device_error(e.to_string()))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let dest = dir.join(entry.file_name());
            let _ = tokio::fs::copy(entry.path(), dest).await;
        }
        Ok(())
    }

    async fn clear_crash_logs(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn restart(&self) -> Result<(), DeviceError> {
        tracing::info!(udid = %self.udid, "restart begin");
        self.is_restarting.store(true, std::sync::atomic::Ordering::SeqCst);
        let result = async {
            self.simctl(&["shutdown", self.udid.as_str()]).await.ok();
            self.simctl(&["boot", self.udid.as_str()]).await?;
            self.wait_until_screenshot_ready().await
        }
        .await;
        self.is_restarting.store(false, std::sync::atomic::Ordering::SeqCst);
        match &result {
            Ok(()) => tracing::info!(udid = %self.udid, "restart end"),
            Err(e) => tracing::warn!(udid = %self.udid, error = %e, "restart failed"),
        }
        result
    }

    async fn take_screenshot(&self) -> Result<Vec<u8>, DeviceError> {
        let tmp = tempfile::NamedTempFile::new().map_err(|e| self.device_error(e.to_string()))?;
        let screenshot_path = tmp.path().to_string_lossy().into_owned();
        self.simctl(&["io", self.udid.as_str(), "screenshot", &screenshot_path])
            .await?;
        tokio::fs::read(tmp.path())
            .await
            .map_err(|e| self.device_error(format!("failed to read screenshot: {e}")))
    }

    async fn open_web_inspector_socket(&self) -> Result<FramedSocket, DeviceError> {
        FramedSocket::connect_simulator()
            .await
            .map_err(|e| self.device_error(e.to_string()))
    }
}

#[async_trait]
impl SimulatorOps for SimulatorDevice {
    async fn startup(&self) -> Result<(), DeviceError> {
        tracing::info!(udid = %self.udid, "startup begin");
        // "Unable to boot device in current state: Booted" isn't a
        // real failure.
        if let Err(e) = self.simctl(&["boot", self.udid.as_str()]).await {
            if !e.message.contains("Booted") {
                tracing::warn!(udid = %self.udid, error = %e, "startup failed");
                return Err(e);
            }
            tracing::info!(udid = %self.udid, "simulator already booted, ignoring");
        }
        let result = self.wait_until_screenshot_ready().await;
        match &result {
            Ok(()) => tracing::info!(udid = %self.udid, "startup end"),
            Err(e) => tracing::warn!(udid = %self.udid, error = %e, "startup failed waiting for screenshot readiness"),
        }
        result
    }

    async fn shutdown(&self) -> Result<(), DeviceError> {
        tracing::info!(udid = %self.udid, "shutdown begin");
        if let Err(e) = self.simctl(&["shutdown", self.udid.as_str()]).await {
            if !e.message.contains("Shutdown") {
                tracing::warn!(udid = %self.udid, error = %e, "shutdown failed");
                return Err(e);
            }
            tracing::info!(udid = %self.udid, "simulator already shut down, ignoring");
        }
        tracing::info!(udid = %self.udid, "shutdown end");
        Ok(())
    }

    async fn erase(&self) -> Result<(), DeviceError> {
        tracing::info!(udid = %self.udid, "erase begin");
        self.simctl(&["erase", self.udid.as_str()]).await?;
        tracing::info!(udid = %self.udid, "erase end");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_state_recognizes_every_variant() {
        assert_eq!(parse_state("Booted"), SimulatorState::Booted);
        assert_eq!(parse_state("Booting"), SimulatorState::Booting);
        assert_eq!(parse_state("Shutting Down"), SimulatorState::ShuttingDown);
        assert_eq!(parse_state("Shutdown"), SimulatorState::Shutdown);
        assert_eq!(parse_state("garbage"), SimulatorState::Shutdown);
    }
}
