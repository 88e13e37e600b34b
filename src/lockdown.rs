// Jackson Coxson
//! A minimal `lockdownd` client: enough of the protocol to ask "what
//! port is service X bound to" (`StartService`), which is all C7 and
//! C9/C10's device-side leg need to open a raw socket to `debugserver`
//! or `com.apple.webinspector`.
//!
//! Framing and request shape are grounded in the teacher's
//! `Idevice::send_plist`/`read_plist` (4-byte big-endian length prefix,
//! XML plist body) and `LockdownClient::start_service`. Unlike the
//! teacher, this client does not perform the TLS `start_session` upgrade
//! pairing requires for most services on modern iOS — establishing a
//! trusted pairing record is out of this crate's scope (every other
//! service we touch goes through the `idevice*` CLI, which owns its own
//! pairing). `debugserver` and `com.apple.webinspector` do not require
//! the TLS upgrade on the iOS versions this crate targets, so the plain
//! handshake below is sufficient; see DESIGN.md.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::OrchestratorError;
use crate::model::Udid;
use crate::usbmux::UsbmuxConnection;

const LOCKDOWN_PORT: u16 = 62078;

pub struct LockdownClient<S> {
    socket: S,
    label: String,
}

impl LockdownClient<tokio::net::UnixStream> {
    /// Finds `udid` via usbmuxd and connects to its lockdownd port.
    #[cfg(unix)]
    pub async fn connect(udid: &Udid) -> Result<Self, OrchestratorError> {
        let mut mux = UsbmuxConnection::connect().await?;
        let device = mux
            .list_devices()
            .await?
            .into_iter()
            .find(|d| &d.udid == udid)
            .ok_or_else(|| OrchestratorError::IllegalState(format!("device {udid} not found by usbmuxd")))?;

        let socket = mux.connect_to_port(device.device_id, LOCKDOWN_PORT).await?;
        Ok(Self {
            socket,
            label: "iosdevicectl".to_string(),
        })
    }
}

impl<S> LockdownClient<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    /// Asks lockdownd which port `service_name` is bound to.
    pub async fn start_service(&mut self, service_name: &str) -> Result<u16, OrchestratorError> {
        let mut req = plist::Dictionary::new();
        req.insert("Label".into(), self.label.clone().into());
        req.insert("Request".into(), "StartService".into());
        req.insert("Service".into(), service_name.into());
        self.send_plist(req).await?;

        let res = self.read_plist().await?;
        if let Some(err) = res.get("Error").and_then(|v| v.as_string()) {
            return Err(OrchestratorError::IllegalState(format!(
                "lockdownd refused to start {service_name}: {err}"
            )));
        }
        res.get("Port")
            .and_then(|v| v.as_unsigned_integer())
            .map(|p| p as u16)
            .ok_or_else(|| {
                OrchestratorError::IllegalState(format!("lockdownd StartService reply for {service_name} had no Port"))
            })
    }

    async fn send_plist(&mut self, dict: plist::Dictionary) -> Result<(), OrchestratorError> {
        let mut body = Vec::new();
        plist::to_writer_xml(&mut body, &plist::Value::Dictionary(dict))?;
        self.socket.write_all(&(body.len() as u32).to_be_bytes()).await?;
        self.socket.write_all(&body).await?;
        self.socket.flush().await?;
        Ok(())
    }

    async fn read_plist(&mut self) -> Result<plist::Dictionary, OrchestratorError> {
        let mut len_bytes = [0u8; 4];
        self.socket.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;

        let mut body = vec![0u8; len];
        self.socket.read_exact(&mut body).await?;

        let value: plist::Value = plist::from_bytes(&body)?;
        value
            .into_dictionary()
            .ok_or_else(|| OrchestratorError::IllegalState("lockdownd reply wasn't a dictionary".into()))
    }
}
