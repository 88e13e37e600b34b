// Jackson Coxson
//! Supporting value types (C11): device identity, model/version, app
//! bundle identifiers, app info, the app-process future handle, and scoped
//! device resources.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::Mutex;

use crate::command::CommandProcess;
use crate::error::OrchestratorError;

/// A device's stable identifier: 40 hex characters for a tethered device,
/// a UUID for a simulator. Equality of two [`crate::device::Device`]s is
/// defined entirely in terms of this type (spec.md §3 invariant i).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Udid(String);

impl Udid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Udid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Udid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Udid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// CPU architecture of a device, as reported by `ideviceinfo`/`simctl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Arm64,
    Armv7,
    Armv7f,
    Armv7k,
    Armv7s,
    I386,
    X86_64,
}

/// Coarse device family, derived from the first token of `productName`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    IPhone,
    IPad,
    IPod,
    Other,
}

impl DeviceClass {
    fn from_product_name(product_name: &str) -> Self {
        match product_name.split_whitespace().next() {
            Some("iPhone") => DeviceClass::IPhone,
            Some("iPad") => DeviceClass::IPad,
            Some("iPod") => DeviceClass::IPod,
            _ => DeviceClass::Other,
        }
    }
}

/// Maps a hardware identifier (e.g. `"iPhone5,1"`) to a human product
/// name. The real table is large; this carries the entries the test
/// suite and common hardware generations need and falls back to the raw
/// identifier, matching the "derived from a fixed lookup table" wording
/// of spec.md §3 without claiming an exhaustive Apple hardware database.
fn product_name_for_identifier(identifier: &str) -> String {
    const TABLE: &[(&str, &str)] = &[
        ("iPhone5,1", "iPhone 5"),
        ("iPhone5,2", "iPhone 5"),
        ("iPhone8,1", "iPhone 6s"),
        ("iPhone10,3", "iPhone X"),
        ("iPhone10,6", "iPhone X"),
        ("iPhone14,5", "iPhone 13"),
        ("iPad4,1", "iPad Air"),
        ("iPad6,11", "iPad 5"),
        ("iPod7,1", "iPod touch (6th generation)"),
    ];
    TABLE
        .iter()
        .find(|(id, _)| *id == identifier)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| identifier.to_string())
}

/// A device's hardware model (spec.md §3).
#[derive(Debug, Clone)]
pub struct Model {
    pub architecture: Architecture,
    pub identifier: String,
    pub product_name: String,
    pub device_class: DeviceClass,
}

impl Model {
    pub fn from_identifier(identifier: impl Into<String>, architecture: Architecture) -> Self {
        let identifier = identifier.into();
        let product_name = product_name_for_identifier(&identifier);
        let device_class = DeviceClass::from_product_name(&product_name);
        Self {
            architecture,
            identifier,
            product_name,
            device_class,
        }
    }
}

/// A device's OS build/product version (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub build_version: String,
    pub product_version: String,
}

impl Version {
    pub fn new(build_version: impl Into<String>, product_version: impl Into<String>) -> Self {
        Self {
            build_version: build_version.into(),
            product_version: product_version.into(),
        }
    }

    /// The integer prefix of `productVersion`, e.g. `"8"` for `"8.4.1"`.
    pub fn major_version(&self) -> Option<u32> {
        self.product_version
            .split('.')
            .next()
            .and_then(|s| s.parse().ok())
    }
}

/// A validated printable UTI bundle identifier: `^[A-Za-z0-9\-\.]+$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppBundleId(String);

impl AppBundleId {
    pub fn new(raw: impl Into<String>) -> Result<Self, OrchestratorError> {
        let raw = raw.into();
        let re = Regex::new(r"^[A-Za-z0-9\-.]+$").expect("static pattern is valid");
        if re.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(OrchestratorError::InvalidArgument(format!(
                "`{raw}` is not a valid bundle identifier"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppBundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Information parsed from an `.app` bundle's `Info.plist`, or from
/// `Payload/*.app/Info.plist` inside an `.ipa` archive.
#[derive(Debug, Clone)]
pub struct AppInfo {
    pub bundle_id: AppBundleId,
}

impl AppInfo {
    /// Reads `Info.plist` from an unpacked `.app` directory.
    pub fn from_app_dir(path: &std::path::Path) -> Result<Self, OrchestratorError> {
        let info_plist = path.join("Info.plist");
        let value: plist::Value = plist::from_file(&info_plist)?;
        Self::from_info_plist(&value)
    }

    /// Reads `Info.plist` out of `Payload/<name>.app/` inside an `.ipa`.
    pub fn from_ipa(path: &std::path::Path) -> Result<Self, OrchestratorError> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| OrchestratorError::InvalidArgument(format!("not a zip archive: {e}")))?;

        let mut info_plist_name = None;
        for i in 0..archive.len() {
            let entry = archive
                .by_index(i)
                .map_err(|e| OrchestratorError::InvalidArgument(e.to_string()))?;
            let name = entry.name();
            if name.starts_with("Payload/") && name.matches('/').count() == 2 && name.ends_with("/Info.plist") {
                info_plist_name = Some(name.to_string());
                break;
            }
        }
        let info_plist_name = info_plist_name.ok_or_else(|| {
            OrchestratorError::InvalidArgument("ipa contains no Payload/*.app/Info.plist".into())
        })?;

        let mut entry = archive
            .by_name(&info_plist_name)
            .map_err(|e| OrchestratorError::InvalidArgument(e.to_string()))?;
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut buf)?;
        let value: plist::Value = plist::from_bytes(&buf)?;
        Self::from_info_plist(&value)
    }

    fn from_info_plist(value: &plist::Value) -> Result<Self, OrchestratorError> {
        let dict = value
            .as_dictionary()
            .ok_or_else(|| OrchestratorError::InvalidArgument("Info.plist root wasn't a dictionary".into()))?;
        let bundle_id = dict
            .get("CFBundleIdentifier")
            .and_then(|v| v.as_string())
            .ok_or_else(|| OrchestratorError::InvalidArgument("Info.plist missing CFBundleIdentifier".into()))?;
        Ok(Self {
            bundle_id: AppBundleId::new(bundle_id)?,
        })
    }
}

/// Either backend an [`AppProcess`] can wrap: a subprocess (simulator
/// launches, via `simctl launch --console`) or a GDB-RSP session (real
/// device launches, via [`crate::debug_proxy`]). Per spec.md §9 Open
/// Question (a), the simulator backend reports the hosted app's stdout
/// on simctl's own stderr stream.
enum AppBackend {
    Command {
        process: CommandProcess,
        use_stderr_as_output: bool,
    },
    GdbRsp(crate::debug_proxy::GdbRspProcess),
}

/// A future-like handle over a running app launched by
/// [`crate::device::Device::run_application`] (spec.md §3).
#[derive(Debug)]
pub struct AppProcess {
    backend: AppBackendDebug,
}

// `GdbRspProcess` and `CommandProcess` both derive little beyond what we
// need; a hand-written `Debug` avoids requiring it transitively.
struct AppBackendDebug(AppBackend);

impl fmt::Debug for AppBackendDebug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            AppBackend::Command { .. } => f.write_str("AppProcess(Command)"),
            AppBackend::GdbRsp(_) => f.write_str("AppProcess(GdbRsp)"),
        }
    }
}

impl AppProcess {
    pub fn from_command(process: CommandProcess, use_stderr_as_output: bool) -> Self {
        Self {
            backend: AppBackendDebug(AppBackend::Command {
                process,
                use_stderr_as_output,
            }),
        }
    }

    pub fn from_gdb_rsp(process: crate::debug_proxy::GdbRspProcess) -> Self {
        Self {
            backend: AppBackendDebug(AppBackend::GdbRsp(process)),
        }
    }

    pub async fn kill(&self) -> Result<(), OrchestratorError> {
        match &self.backend.0 {
            AppBackend::Command { process, .. } => process.kill().await.map_err(Into::into),
            AppBackend::GdbRsp(process) => process.kill().await.map_err(Into::into),
        }
    }

    /// Awaits process exit and returns the app's captured output text.
    pub async fn r#await(&self) -> Result<String, OrchestratorError> {
        match &self.backend.0 {
            AppBackend::Command {
                process,
                use_stderr_as_output,
            } => {
                let result = process.r#await().await?;
                let bytes = if *use_stderr_as_output {
                    result.stderr_bytes()
                } else {
                    result.stdout_bytes()
                };
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            AppBackend::GdbRsp(process) => process.r#await().await.map_err(Into::into),
        }
    }

    pub async fn await_timeout(&self, timeout: std::time::Duration) -> Result<String, OrchestratorError> {
        match &self.backend.0 {
            AppBackend::Command {
                process,
                use_stderr_as_output,
            } => {
                let result = process.await_timeout(timeout).await?;
                let bytes = if *use_stderr_as_output {
                    result.stderr_bytes()
                } else {
                    result.stdout_bytes()
                };
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            AppBackend::GdbRsp(process) => {
                tokio::time::timeout(timeout, process.r#await())
                    .await
                    .map_err(|_| OrchestratorError::Command(crate::error::CommandError::Timeout))?
                    .map_err(Into::into)
            }
        }
    }

    /// A streaming view of the same output `await()` will eventually
    /// return in full, readable incrementally while the app still runs.
    pub fn output_reader(&self) -> crate::command::CaptureReader {
        match &self.backend.0 {
            AppBackend::Command {
                process,
                use_stderr_as_output,
            } => {
                if *use_stderr_as_output {
                    process.stderr_reader()
                } else {
                    process.stdout_reader()
                }
            }
            AppBackend::GdbRsp(process) => process.output_reader(),
        }
    }
}

/// Scoped acquisition of a device-owned resource (e.g. the system log
/// capturer). Release happens on every exit path; a second release is a
/// programming error, enforced with an `AtomicBool` guard rather than
/// relying on callers to behave.
pub struct DeviceResource {
    released: Arc<std::sync::atomic::AtomicBool>,
    release: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl fmt::Debug for DeviceResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceResource")
            .field(
                "released",
                &self.released.load(std::sync::atomic::Ordering::SeqCst),
            )
            .finish()
    }
}

impl DeviceResource {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            released: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            release: Arc::new(Mutex::new(Some(Box::new(release)))),
        }
    }

    /// Releases the resource. Calling this twice is a programming error.
    pub async fn release(&self) {
        if self
            .released
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            panic!("DeviceResource released twice");
        }
        if let Some(release) = self.release.lock().await.take() {
            release();
        }
    }
}

impl Drop for DeviceResource {
    fn drop(&mut self) {
        if !self.released.load(std::sync::atomic::Ordering::SeqCst) {
            tracing::warn!("DeviceResource dropped without explicit release");
            if let Ok(mut guard) = self.release.try_lock() {
                if let Some(release) = guard.take() {
                    release();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_id_accepts_printable_uti() {
        assert!(AppBundleId::new("fake.google.OpenUrl").is_ok());
        assert!(AppBundleId::new("com.example.My-App.v2").is_ok());
    }

    #[test]
    fn bundle_id_rejects_invalid_chars() {
        assert!(AppBundleId::new("com.example/app").is_err());
        assert!(AppBundleId::new("com example").is_err());
    }

    #[test]
    fn version_major_version_parses_prefix() {
        let v = Version::new("12H321", "8.4.1");
        assert_eq!(v.major_version(), Some(8));
    }

    #[test]
    fn model_resolves_device_class_from_product_name() {
        let m = Model::from_identifier("iPhone5,1", Architecture::Armv7s);
        assert_eq!(m.product_name, "iPhone 5");
        assert_eq!(m.device_class, DeviceClass::IPhone);
    }

    #[test]
    fn model_unknown_identifier_falls_back_to_raw() {
        let m = Model::from_identifier("iPhone99,9", Architecture::Arm64);
        assert_eq!(m.product_name, "iPhone99,9");
        assert_eq!(m.device_class, DeviceClass::Other);
    }
}
