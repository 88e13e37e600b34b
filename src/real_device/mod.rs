// Jackson Coxson
//! The real-device driver (C5): wraps the `idevice*`/`cfgutil` binaries
//! and implements the device contract, driving the retry harness (C2)
//! with the recovery algorithms spec.md §4.5 names — entitlement-mismatch
//! reinstall, post-install verification, lockdownd re-pair, developer
//! disk image auto-mount, apprunner-wedge recovery, screenshot format
//! normalisation, and restart. App launches go through [`crate::debug_proxy`]
//! directly rather than shelling out, the same way that module's own doc
//! comment frames it: C7 is reimplemented natively, not invoked as a CLI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::Lazy;
use crate::command::{Command, CommandResult};
use crate::config::HostConfig;
use crate::debug_proxy::GdbRspProcess;
use crate::devimage;
use crate::device::{Device, RealDeviceOps};
use crate::error::{CommandError, DebugProxyError, DeviceError, OrchestratorError, Remedy};
use crate::model::{AppBundleId, AppInfo, AppProcess, Architecture, DeviceResource, Model, Udid, Version};
use crate::retry::Retrier;
use crate::webinspector::client::FramedSocket;

#[derive(Debug, Clone)]
struct DeviceInfo {
    model: Model,
    version: Version,
}

fn architecture_from_str(s: &str) -> Architecture {
    match s {
        "arm64" | "arm64e" => Architecture::Arm64,
        "armv7" => Architecture::Armv7,
        "armv7f" => Architecture::Armv7f,
        "armv7k" => Architecture::Armv7k,
        "armv7s" => Architecture::Armv7s,
        "i386" => Architecture::I386,
        "x86_64" => Architecture::X86_64,
        _ => Architecture::Arm64,
    }
}

/// The first line of stdout beginning with "Could not start" plus a 255
/// exit code is how a screenshot attempt signals that the screenshot
/// service needs the developer disk image mounted first (spec.md §4.5).
fn needs_developer_image(result: &CommandResult) -> bool {
    result.exit_code == Some(255) && result.stdout().lines().next().unwrap_or("").starts_with("Could not start")
}

/// Maps a failed app-launch dialogue onto the stderr-pattern→Remedy table
/// of spec.md §4.5. Since launches go through [`crate::debug_proxy`]
/// natively rather than through a CLI's stderr, the patterns are matched
/// against [`DebugProxyError::UnexpectedReply`]'s raw reply payload
/// (the unframed equivalent of the CLI's stderr line) instead.
fn classify_debug_proxy_remedy(err: &DebugProxyError) -> Option<Remedy> {
    match err {
        DebugProxyError::Timeout => Some(Remedy::DismissDialog),
        DebugProxyError::UnexpectedReply { got, .. } => {
            let last_line = got.lines().last().unwrap_or(got.as_str());
            if last_line == "E4294967295"
                || last_line.starts_with("Efailed to get the task for process")
                || last_line.starts_with("ENo such file or directory")
                || last_line == "ENotFound"
                || last_line.contains("Unknown APPID")
            {
                Some(Remedy::ReinstallApp)
            } else if last_line.starts_with("Etimed out trying to launch app") {
                Some(Remedy::RestartDevice)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn parse_installed_apps(bytes: &[u8], udid: &Udid) -> Result<Vec<AppInfo>, DeviceError> {
    let value: plist::Value =
        plist::from_bytes(bytes).map_err(|e| DeviceError::new(udid.clone(), format!("malformed ideviceinstaller plist: {e}")))?;
    let array = value
        .as_array()
        .ok_or_else(|| DeviceError::new(udid.clone(), "ideviceinstaller -l root wasn't an array"))?;
    Ok(array
        .iter()
        .filter_map(|entry| entry.as_dictionary())
        .filter_map(|dict| dict.get("CFBundleIdentifier").and_then(|v| v.as_string()))
        .filter_map(|id| AppBundleId::new(id).ok())
        .map(|bundle_id| AppInfo { bundle_id })
        .collect())
}

/// Failure from one attempt of [`RealDevice::launch_with_dev_image_retry`].
#[derive(Debug)]
enum LaunchFailure {
    Connect(OrchestratorError),
    Mount(DeviceError),
    Debug(DebugProxyError),
}

/// Compared by rendered `Debug` output — `Connect`/`Debug` wrap
/// non-comparable sources (`std::io::Error` et al.) that don't implement
/// `PartialEq` themselves. Used by [`Retrier`] to recognise a handler
/// that raises back the same error it was given.
impl PartialEq for LaunchFailure {
    fn eq(&self, other: &Self) -> bool {
        format!("{self:?}") == format!("{other:?}")
    }
}

type LaunchFuture<'a> = Pin<Box<dyn std::future::Future<Output = Result<AppProcess, DeviceError>> + Send + 'a>>;

/// An `idevice*`/`cfgutil`-backed real, tethered device.
pub struct RealDevice {
    udid: Udid,
    config: HostConfig,
    info: Lazy<DeviceInfo, String>,
    is_restarting: AtomicBool,
}

impl RealDevice {
    /// Constructs a device with [`HostConfig::default`] tuning.
    pub fn new(udid: Udid) -> Self {
        Self::with_config(udid, HostConfig::default())
    }

    pub fn with_config(udid: Udid, config: HostConfig) -> Self {
        Self {
            udid,
            config,
            info: Lazy::new(),
            is_restarting: AtomicBool::new(false),
        }
    }

    /// Configures the supervision identity `cfgutil pair` uses for
    /// auto-pair retry on a lockdownd connect failure (spec.md §4.5).
    pub fn with_supervision_identity(mut self, identity: impl Into<String>) -> Self {
        self.config.supervision_identity = Some(identity.into());
        self
    }

    /// Configures the root directory [`crate::devimage::resolve`] searches
    /// for a matching developer disk image.
    pub fn with_developer_disk_image_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.developer_disk_image_root = Some(root.into());
        self
    }

    fn device_error(&self, message: impl Into<String>) -> DeviceError {
        DeviceError::new(self.udid.clone(), message)
    }

    fn should_retry_pairing(&self, result: &CommandResult) -> bool {
        self.config.supervision_identity.is_some() && result.stderr().contains("Could not connect to lockdownd")
    }

    async fn repair(&self) -> Result<(), DeviceError> {
        let identity = self.config.supervision_identity.as_deref().expect("checked by caller");
        Command::new(&self.config.cfgutil_binary)
            .arg("-e")
            .arg(self.udid.as_str())
            .arg("pair")
            .arg(identity)
            .execute()
            .await
            .map_err(|e| self.device_error(format!("cfgutil pair failed: {e}")))?;
        Ok(())
    }

    /// Runs `build()`, auto-pairing and retrying once if it fails with
    /// exit ≠ 0, stderr containing "Could not connect to lockdownd", and
    /// a supervision identity configured (spec.md §4.5).
    async fn run_with_pairing_retry(&self, build: impl Fn() -> Command) -> Result<CommandResult, DeviceError> {
        match build().execute().await {
            Ok(result) => Ok(result),
            Err(CommandError::CommandFailure(cmd, result)) if self.should_retry_pairing(&result) => {
                tracing::warn!(udid = %self.udid, program = %cmd.program(), "lockdownd pairing lost, re-pairing and retrying");
                self.repair().await?;
                build()
                    .execute()
                    .await
                    .map_err(|e| self.device_error(format!("{} failed after re-pair: {e}", cmd.program())))
            }
            Err(e) => Err(self.device_error(e.to_string())),
        }
    }

    async fn idevice_command(&self, tool: &str, args: &[&str]) -> Result<CommandResult, DeviceError> {
        let udid = self.udid.clone();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.run_with_pairing_retry(move || Command::new(tool).arg("-u").arg(udid.as_str()).args(args.clone()))
            .await
    }

    async fn cfgutil_command(&self, args: &[&str]) -> Result<CommandResult, DeviceError> {
        let udid = self.udid.clone();
        let cfgutil = self.config.cfgutil_binary.clone();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.run_with_pairing_retry(move || Command::new(&cfgutil).arg("-e").arg(udid.as_str()).args(args.clone()))
            .await
    }

    /// Parses `ideviceinfo -x` once per device lifetime and memoises the
    /// result (spec.md §4.5 "device info caching", C3).
    async fn device_info(&self) -> Result<DeviceInfo, DeviceError> {
        let udid = self.udid.clone();
        let binary = self.config.ideviceinfo_binary.clone();
        self.info
            .get_or_try_init(|| async move { Self::fetch_device_info(&udid, &binary).await.map_err(|e| e.to_string()) })
            .await
            .map_err(|message| self.device_error(message))
    }

    async fn fetch_device_info(udid: &Udid, ideviceinfo_binary: &str) -> Result<DeviceInfo, DeviceError> {
        let result = Command::new(ideviceinfo_binary)
            .arg("-u")
            .arg(udid.as_str())
            .arg("-x")
            .execute()
            .await
            .map_err(|e| DeviceError::new(udid.clone(), format!("ideviceinfo -x failed: {e}")))?;

        let value: plist::Value = plist::from_bytes(result.stdout_bytes())
            .map_err(|e| DeviceError::new(udid.clone(), format!("malformed ideviceinfo plist: {e}")))?;
        let dict = value
            .as_dictionary()
            .ok_or_else(|| DeviceError::new(udid.clone(), "ideviceinfo root wasn't a dictionary"))?;

        let identifier = dict.get("ProductType").and_then(|v| v.as_string()).unwrap_or("Unknown");
        let architecture = dict
            .get("CPUArchitecture")
            .and_then(|v| v.as_string())
            .map(architecture_from_str)
            .unwrap_or(Architecture::Arm64);
        let product_version = dict.get("ProductVersion").and_then(|v| v.as_string()).unwrap_or("");
        let build_version = dict.get("BuildVersion").and_then(|v| v.as_string()).unwrap_or("");

        Ok(DeviceInfo {
            model: Model::from_identifier(identifier, architecture),
            version: Version::new(build_version, product_version),
        })
    }

    /// Resolves an app's on-device executable path for the launch
    /// dialogue's `A` command, via `ideviceinstaller -l`'s `Path` entry.
    async fn resolve_executable_path(&self, bundle_id: &AppBundleId) -> Result<String, DeviceError> {
        let ideviceinstaller = self.config.ideviceinstaller_binary.clone();
        let result = self.idevice_command(&ideviceinstaller, &["-l", "-o", "xml"]).await?;
        let value: plist::Value = plist::from_bytes(result.stdout_bytes())
            .map_err(|e| self.device_error(format!("malformed ideviceinstaller plist: {e}")))?;
        let array = value
            .as_array()
            .ok_or_else(|| self.device_error("ideviceinstaller -l root wasn't an array"))?;

        array
            .iter()
            .filter_map(|entry| entry.as_dictionary())
            .find(|dict| dict.get("CFBundleIdentifier").and_then(|v| v.as_string()) == Some(bundle_id.as_str()))
            .and_then(|dict| dict.get("Path"))
            .and_then(|v| v.as_string())
            .map(str::to_string)
            .ok_or_else(|| self.device_error(format!("{bundle_id} not found by ideviceinstaller -l")))
    }

    async fn mount_developer_image(&self) -> Result<(), DeviceError> {
        let root = self
            .config
            .developer_disk_image_root
            .as_deref()
            .ok_or_else(|| self.device_error("no developer disk image root configured"))?;
        let info = self.device_info().await?;
        let image = devimage::resolve(root, &info.version.product_version)
            .map_err(|e| self.device_error(format!("developer disk image resolution failed: {e}")))?;
        let ideviceimagemounter = self.config.ideviceimagemounter_binary.clone();
        self.idevice_command(
            &ideviceimagemounter,
            &[
                image.dmg.to_string_lossy().as_ref(),
                image.signature.to_string_lossy().as_ref(),
            ],
        )
        .await?;
        tracing::info!(udid = %self.udid, "mounted developer disk image");
        Ok(())
    }

    /// Runs a Command-based tool that needs the developer disk image
    /// (the screenshot service), mounting it and retrying up to 10 times
    /// at 3-second intervals on the "Could not start" / exit-255 signal.
    async fn run_tool_with_dev_image_retry(&self, tool: &str, args: &[&str]) -> Result<CommandResult, DeviceError> {
        let mounted = Arc::new(AtomicBool::new(false));
        let udid = self.udid.clone();
        let arg_strings: Vec<String> = args.iter().map(|s| s.to_string()).collect();

        let retrier = Retrier::new()
            .with_max_attempts(self.config.dev_image_mount_attempts)
            .with_delay(self.config.dev_image_mount_delay);

        retrier
            .run(|| {
                let mounted = mounted.clone();
                let args = arg_strings.clone();
                let udid = udid.clone();
                async move {
                    match Command::new(tool).arg("-u").arg(udid.as_str()).args(args).execute().await {
                        Ok(result) => Ok(result),
                        Err(CommandError::CommandFailure(_, result)) if needs_developer_image(&result) => {
                            if !mounted.swap(true, Ordering::SeqCst) {
                                tracing::warn!(udid = %udid, %tool, "developer disk image needed, mounting");
                                self.mount_developer_image().await?;
                            }
                            Err(self.device_error(format!("{tool} needs the developer disk image")))
                        }
                        Err(e) => Err(self.device_error(format!("{tool} failed: {e}"))),
                    }
                }
            })
            .await
            .map_err(|failure| failure.primary)
    }

    /// Connects to `debugserver` and drives the launch dialogue, mounting
    /// the developer disk image and retrying (up to 10 attempts, 3s
    /// delay) if the service can't be reached at all — treated as the
    /// native equivalent of the CLI's "Could not start" signal, since
    /// `debugserver` simply doesn't start without the image mounted.
    async fn launch_with_dev_image_retry(&self, path: &str, args: &[String]) -> Result<GdbRspProcess, DeviceError> {
        let mounted = Arc::new(AtomicBool::new(false));
        let retrier = Retrier::new()
            .with_max_attempts(self.config.dev_image_mount_attempts)
            .with_delay(self.config.dev_image_mount_delay);

        let outcome = retrier
            .run(|| {
                let mounted = mounted.clone();
                let path = path.to_string();
                let args = args.to_vec();
                async move {
                    let client = match crate::debug_proxy::connect(&self.udid).await {
                        Ok(client) => client,
                        Err(e) => {
                            if !mounted.swap(true, Ordering::SeqCst) {
                                tracing::warn!(udid = %self.udid, "debugserver unreachable, mounting developer disk image");
                                self.mount_developer_image().await.map_err(LaunchFailure::Mount)?;
                            }
                            return Err(LaunchFailure::Connect(e));
                        }
                    };
                    client.launch(&path, &args, &HashMap::new()).await.map_err(LaunchFailure::Debug)
                }
            })
            .await;

        match outcome {
            Ok(process) => Ok(process),
            Err(failure) => Err(self.classify_launch_failure(failure.primary)),
        }
    }

    fn classify_launch_failure(&self, failure: LaunchFailure) -> DeviceError {
        match failure {
            LaunchFailure::Mount(e) => e,
            LaunchFailure::Connect(e) => self.device_error(format!("could not reach debugserver: {e}")),
            LaunchFailure::Debug(e) => {
                let err = self.device_error(format!("app launch failed: {e}"));
                match classify_debug_proxy_remedy(&e) {
                    Some(remedy) => {
                        tracing::info!(udid = %self.udid, ?remedy, "app launch failure carries a remedy");
                        err.with_remedy(remedy)
                    }
                    None => err,
                }
            }
        }
    }

    /// Launches `path`, retrying once (restarting the device first) if
    /// no output appears within 5 attempts × 1s — the "debug server is
    /// wedged" signal of spec.md §4.5.
    fn launch_app<'a>(&'a self, path: String, args: Vec<String>, allow_restart_retry: bool) -> LaunchFuture<'a> {
        Box::pin(async move {
            let process = self.launch_with_dev_image_retry(&path, &args).await?;
            let wedge_polls = self.config.apprunner_wedge_polls;
            let wedge_interval = self.config.apprunner_wedge_poll_interval;
            if allow_restart_retry && !saw_output_within_wedge_window(&process, wedge_polls, wedge_interval).await {
                tracing::warn!(udid = %self.udid, "app runner appears wedged, restarting device and retrying launch");
                let _ = process.kill().await;
                self.restart().await?;
                return self.launch_app(path, args, false).await;
            }
            Ok(AppProcess::from_gdb_rsp(process))
        })
    }
}

async fn saw_output_within_wedge_window(process: &GdbRspProcess, polls: u32, interval: Duration) -> bool {
    let mut reader = process.output_reader();
    for _ in 0..polls {
        if tokio::time::timeout(interval, reader.read_chunk()).await.is_ok() {
            // Either bytes arrived or the buffer closed cleanly; neither
            // is the "nothing at all for 5s" wedge condition.
            return true;
        }
    }
    false
}

fn normalize_screenshot(bytes: Vec<u8>) -> image::ImageResult<Vec<u8>> {
    let format = image::guess_format(&bytes)?;
    if format == image::ImageFormat::Png {
        return Ok(bytes);
    }
    let decoded = image::load_from_memory_with_format(&bytes, format)?;
    let mut out = Vec::new();
    decoded.write_to(&mut std::io::Cursor::new(&mut out), image::ImageOutputFormat::Png)?;
    Ok(out)
}

#[async_trait]
impl Device for RealDevice {
    fn udid(&self) -> &Udid {
        &self.udid
    }

    async fn is_responsive(&self) -> bool {
        Command::new(&self.config.idevice_id_binary)
            .arg("-l")
            .execute()
            .await
            .map(|result| result.stdout().lines().any(|line| line.trim() == self.udid.as_str()))
            .unwrap_or(false)
    }

    fn is_restarting(&self) -> bool {
        self.is_restarting.load(Ordering::SeqCst)
    }

    async fn model(&self) -> Result<Model, DeviceError> {
        Ok(self.device_info().await?.model)
    }

    async fn version(&self) -> Result<Version, DeviceError> {
        Ok(self.device_info().await?.version)
    }

    async fn list_applications(&self) -> Result<Vec<AppInfo>, DeviceError> {
        let ideviceinstaller = self.config.ideviceinstaller_binary.clone();
        let result = self.idevice_command(&ideviceinstaller, &["-l", "-o", "xml"]).await?;
        parse_installed_apps(result.stdout_bytes(), &self.udid)
    }

    async fn is_application_installed(&self, bundle_id: &AppBundleId) -> Result<bool, DeviceError> {
        Ok(self.list_applications().await?.iter().any(|app| &app.bundle_id == bundle_id))
    }

    async fn install_application(&self, path_to_app_or_ipa: &Path) -> Result<(), DeviceError> {
        let info = if path_to_app_or_ipa.extension().and_then(|e| e.to_str()) == Some("ipa") {
            AppInfo::from_ipa(path_to_app_or_ipa)
        } else {
            AppInfo::from_app_dir(path_to_app_or_ipa)
        }
        .map_err(|e| self.device_error(e.to_string()))?;

        let ideviceinstaller = self.config.ideviceinstaller_binary.clone();
        let path_str = path_to_app_or_ipa.to_string_lossy().into_owned();
        match self.idevice_command(&ideviceinstaller, &["-i", &path_str]).await {
            Ok(_) => {}
            Err(e) if e.message.contains("MismatchedApplicationIdentifierEntitlement") => {
                tracing::warn!(udid = %self.udid, bundle_id = %info.bundle_id, "entitlement mismatch, reinstalling");
                self.uninstall_application(&info.bundle_id).await?;
                self.idevice_command(&ideviceinstaller, &["-i", &path_str]).await?;
            }
            Err(e) => return Err(e),
        }

        for _ in 0..self.config.post_install_verify_attempts {
            if self.is_application_installed(&info.bundle_id).await? {
                return Ok(());
            }
            tokio::time::sleep(self.config.post_install_verify_delay).await;
        }
        Err(self.device_error("not in application list after install"))
    }

    async fn uninstall_application(&self, bundle_id: &AppBundleId) -> Result<(), DeviceError> {
        let ideviceinstaller = self.config.ideviceinstaller_binary.clone();
        self.idevice_command(&ideviceinstaller, &["-U", bundle_id.as_str()]).await?;
        Ok(())
    }

    async fn run_application(&self, bundle_id: &AppBundleId, args: &[String]) -> Result<AppProcess, DeviceError> {
        let path = self.resolve_executable_path(bundle_id).await?;
        self.launch_app(path, args.to_vec(), true).await
    }

    async fn start_system_logger(&self, log_path: &Path) -> Result<DeviceResource, DeviceError> {
        let cmd = Command::new(&self.config.idevicesyslog_binary)
            .arg("-u")
            .arg(self.udid.as_str())
            .stdout(crate::command::OutputSink::File(log_path.to_path_buf()));
        let process = cmd.start().await.map_err(|e| self.device_error(e.to_string()))?;
        Ok(DeviceResource::new(move || {
            let process = process.clone();
            tokio::spawn(async move {
                let _ = process.kill().await;
            });
        }))
    }

    async fn pull_crash_logs(&self, dir: &Path) -> Result<(), DeviceError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| self.device_error(e.to_string()))?;
        let dir_str = dir.to_string_lossy().into_owned();
        let idevicecrashreport = self.config.idevicecrashreport_binary.clone();
        self.idevice_command(&idevicecrashreport, &["-k", &dir_str]).await?;
        Ok(())
    }

    async fn clear_crash_logs(&self) -> Result<(), DeviceError> {
        let tmp = tempfile::tempdir().map_err(|e| self.device_error(e.to_string()))?;
        let dir_str = tmp.path().to_string_lossy().into_owned();
        let idevicecrashreport = self.config.idevicecrashreport_binary.clone();
        self.idevice_command(&idevicecrashreport, &[&dir_str]).await?;
        Ok(())
    }

    async fn restart(&self) -> Result<(), DeviceError> {
        tracing::info!(udid = %self.udid, "restart begin");
        self.is_restarting.store(true, Ordering::SeqCst);
        let idevicediagnostics = self.config.idevicediagnostics_binary.clone();
        let result = async {
            self.idevice_command(&idevicediagnostics, &["restart"]).await?;
            tokio::time::sleep(self.config.restart_settle_delay).await;
            for _ in 0..self.config.restart_poll_attempts {
                if self.is_responsive().await {
                    return Ok(());
                }
                tokio::time::sleep(self.config.restart_poll_interval).await;
            }
            Err(self.device_error("device did not become responsive after restart"))
        }
        .await;
        self.is_restarting.store(false, Ordering::SeqCst);
        match &result {
            Ok(()) => tracing::info!(udid = %self.udid, "restart end"),
            Err(e) => tracing::warn!(udid = %self.udid, error = %e, "restart failed"),
        }
        result
    }

    async fn take_screenshot(&self) -> Result<Vec<u8>, DeviceError> {
        let tmp = tempfile::NamedTempFile::new().map_err(|e| self.device_error(e.to_string()))?;
        let screenshot_path = tmp.path().to_string_lossy().into_owned();
        let idevicescreenshot = self.config.idevicescreenshot_binary.clone();
        self.run_tool_with_dev_image_retry(&idevicescreenshot, &[&screenshot_path]).await?;
        let bytes = tokio::fs::read(tmp.path())
            .await
            .map_err(|e| self.device_error(format!("failed to read screenshot: {e}")))?;
        normalize_screenshot(bytes).map_err(|e| self.device_error(format!("screenshot format normalisation failed: {e}")))
    }

    async fn open_web_inspector_socket(&self) -> Result<FramedSocket, DeviceError> {
        FramedSocket::connect_real_device(&self.udid, &self.config.webinspector_proxy_binary)
            .await
            .map_err(|e| self.device_error(e.to_string()))
    }
}

#[async_trait]
impl RealDeviceOps for RealDevice {
    async fn install_profile(&self, profile: &Path) -> Result<(), DeviceError> {
        let path = profile.to_string_lossy().into_owned();
        self.cfgutil_command(&["install-profile", &path]).await?;
        Ok(())
    }

    async fn remove_profile(&self, identifier: &str) -> Result<(), DeviceError> {
        self.cfgutil_command(&["remove-profile", identifier]).await?;
        Ok(())
    }

    async fn list_configuration_profiles(&self) -> Result<Vec<String>, DeviceError> {
        let result = self.cfgutil_command(&["get", "profileList"]).await?;
        Ok(result
            .stdout()
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    async fn sync_to_system_time(&self) -> Result<(), DeviceError> {
        let idevicedate = self.config.idevicedate_binary.clone();
        self.idevice_command(&idevicedate, &["-s"]).await?;
        Ok(())
    }

    async fn battery_level(&self) -> Result<u8, DeviceError> {
        let ideviceinfo = self.config.ideviceinfo_binary.clone();
        let result = self
            .idevice_command(&ideviceinfo, &["-q", "com.apple.mobile.battery", "-k", "BatteryCurrentCapacity"])
            .await?;
        result
            .stdout()
            .trim()
            .parse::<u8>()
            .map_err(|e| self.device_error(format!("malformed battery level: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_every_app_launch_stderr_pattern_in_the_table() {
        let cases = [
            ("E4294967295", Remedy::ReinstallApp),
            ("Efailed to get the task for process 123", Remedy::ReinstallApp),
            ("ENo such file or directory /private/blah", Remedy::ReinstallApp),
            ("ENotFound", Remedy::ReinstallApp),
            ("some text Unknown APPID trailing", Remedy::ReinstallApp),
            ("Etimed out trying to launch app", Remedy::RestartDevice),
        ];
        for (got, expected) in cases {
            let err = DebugProxyError::UnexpectedReply {
                sent: "A...".to_string(),
                got: got.to_string(),
            };
            assert_eq!(classify_debug_proxy_remedy(&err), Some(expected), "pattern: {got}");
        }
    }

    #[test]
    fn await_timeout_classifies_as_dismiss_dialog() {
        assert_eq!(classify_debug_proxy_remedy(&DebugProxyError::Timeout), Some(Remedy::DismissDialog));
    }

    #[test]
    fn unrecognised_reply_carries_no_remedy() {
        let err = DebugProxyError::UnexpectedReply {
            sent: "A...".to_string(),
            got: "OK but weird".to_string(),
        };
        assert_eq!(classify_debug_proxy_remedy(&err), None);
    }

    #[test]
    fn architecture_from_str_maps_known_identifiers() {
        assert_eq!(architecture_from_str("arm64e"), Architecture::Arm64);
        assert_eq!(architecture_from_str("armv7s"), Architecture::Armv7s);
        assert_eq!(architecture_from_str("bogus"), Architecture::Arm64);
    }

    #[tokio::test]
    async fn needs_developer_image_requires_both_exit_255_and_the_stdout_prefix() {
        let any_exit = crate::command::SuccessPredicate::new(|_| true);

        let matching = Command::new("sh")
            .arg("-c")
            .arg("echo 'Could not start com.apple.mobile.screenshotr'; exit 255")
            .success_predicate(any_exit.clone())
            .execute()
            .await
            .unwrap();
        assert!(needs_developer_image(&matching));

        let wrong_exit = Command::new("sh")
            .arg("-c")
            .arg("echo 'Could not start com.apple.mobile.screenshotr'; exit 1")
            .success_predicate(any_exit.clone())
            .execute()
            .await
            .unwrap();
        assert!(!needs_developer_image(&wrong_exit));

        let wrong_prefix = Command::new("sh")
            .arg("-c")
            .arg("echo 'unrelated failure'; exit 255")
            .success_predicate(any_exit)
            .execute()
            .await
            .unwrap();
        assert!(!needs_developer_image(&wrong_prefix));
    }

    #[test]
    fn parse_installed_apps_extracts_valid_bundle_ids_only() {
        let mut entries = Vec::new();
        let mut good = plist::Dictionary::new();
        good.insert("CFBundleIdentifier".to_string(), "com.example.App".into());
        entries.push(plist::Value::Dictionary(good));
        let mut bad = plist::Dictionary::new();
        bad.insert("CFBundleIdentifier".to_string(), "not valid!".into());
        entries.push(plist::Value::Dictionary(bad));

        let mut bytes = Vec::new();
        plist::to_writer_xml(&mut bytes, &plist::Value::Array(entries)).unwrap();

        let apps = parse_installed_apps(&bytes, &Udid::new("dead")).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].bundle_id.as_str(), "com.example.App");
    }
}
