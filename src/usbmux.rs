// Jackson Coxson
//! A minimal client for the local `usbmuxd` multiplexer daemon: device
//! enumeration and raw port forwarding. This is the one piece of wire
//! protocol C7 (App-Launch GDB-RSP Client) and C9/C10's device-side leg
//! need that no `idevice*` CLI exposes directly — opening a raw TCP-like
//! stream to a port on the device (`debugserver`, `com.apple.webinspector`)
//! once lockdownd has told us which port that service is bound to.
//!
//! Grounded directly in the teacher's `usbmuxd::UsbmuxdConnection`: the
//! 16-byte little-endian header + plist body framing, and the
//! `ListDevices`/`Connect` message shapes, reduced to what this crate
//! needs (we do not reimplement pairing-record lookup or BUID reads,
//! since those only matter to services this crate does not re-host).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::OrchestratorError;
use crate::model::Udid;

const SOCKET_FILE: &str = "/var/run/usbmuxd";
const XML_PLIST_VERSION: u32 = 1;
const PLIST_MESSAGE_TYPE: u32 = 8;

/// Any socket usbmux hands back: a raw duplex byte stream.
pub trait MuxSocket: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> MuxSocket for T {}

#[cfg(unix)]
type RawSocket = UnixStream;
#[cfg(not(unix))]
type RawSocket = tokio::net::TcpStream;

pub struct UsbmuxConnection {
    socket: RawSocket,
    tag: u32,
}

#[derive(Debug, Clone)]
pub struct UsbmuxDevice {
    pub udid: Udid,
    pub device_id: u32,
}

impl UsbmuxConnection {
    pub async fn connect() -> Result<Self, OrchestratorError> {
        #[cfg(unix)]
        let socket = UnixStream::connect(SOCKET_FILE).await?;
        #[cfg(not(unix))]
        let socket = tokio::net::TcpStream::connect(("127.0.0.1", 27015u16)).await?;

        Ok(Self { socket, tag: 0 })
    }

    pub async fn list_devices(&mut self) -> Result<Vec<UsbmuxDevice>, OrchestratorError> {
        let mut req = plist::Dictionary::new();
        req.insert("MessageType".into(), "ListDevices".into());
        req.insert("ClientVersionString".into(), "iosdevicectl".into());
        req.insert("kLibUSBMuxVersion".into(), 3.into());
        self.write_plist(req).await?;

        let res = self.read_plist().await?;
        let device_list = res
            .get("DeviceList")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut devices = Vec::with_capacity(device_list.len());
        for entry in device_list {
            let Some(dict) = entry.as_dictionary() else {
                continue;
            };
            let device_id = dict
                .get("DeviceID")
                .and_then(|v| v.as_unsigned_integer())
                .unwrap_or_default() as u32;
            let udid = dict
                .get("Properties")
                .and_then(|v| v.as_dictionary())
                .and_then(|p| p.get("SerialNumber"))
                .and_then(|v| v.as_string())
                .unwrap_or_default();
            devices.push(UsbmuxDevice {
                udid: Udid::new(udid),
                device_id,
            });
        }
        Ok(devices)
    }

    /// Opens a raw forwarded connection to `port` on `device_id`. Consumes
    /// `self`: usbmux hands the same socket back for the forwarded
    /// stream once the `Connect` handshake succeeds.
    pub async fn connect_to_port(
        mut self,
        device_id: u32,
        port: u16,
    ) -> Result<RawSocket, OrchestratorError> {
        let mut req = plist::Dictionary::new();
        req.insert("MessageType".into(), "Connect".into());
        req.insert("DeviceID".into(), (device_id as i64).into());
        req.insert("PortNumber".into(), (port.to_be() as i64).into());
        self.write_plist(req).await?;

        let res = self.read_plist().await?;
        match res.get("Number").and_then(|v| v.as_signed_integer()) {
            Some(0) => Ok(self.socket),
            _ => Err(OrchestratorError::IllegalState(
                "usbmuxd refused the port-forward Connect request".into(),
            )),
        }
    }

    async fn write_plist(&mut self, dict: plist::Dictionary) -> Result<(), OrchestratorError> {
        let mut body = Vec::new();
        plist::to_writer_xml(&mut body, &plist::Value::Dictionary(dict))?;

        let mut header = Vec::with_capacity(16);
        header.extend_from_slice(&((16 + body.len()) as u32).to_le_bytes());
        header.extend_from_slice(&XML_PLIST_VERSION.to_le_bytes());
        header.extend_from_slice(&PLIST_MESSAGE_TYPE.to_le_bytes());
        header.extend_from_slice(&self.tag.to_le_bytes());

        self.socket.write_all(&header).await?;
        self.socket.write_all(&body).await?;
        self.tag += 1;
        Ok(())
    }

    async fn read_plist(&mut self) -> Result<plist::Dictionary, OrchestratorError> {
        let mut header = [0u8; 16];
        self.socket.read_exact(&mut header).await?;
        let total_len = u32::from_le_bytes(header[..4].try_into().expect("4 bytes"));
        let body_len = total_len.saturating_sub(16) as usize;

        let mut body = vec![0u8; body_len];
        self.socket.read_exact(&mut body).await?;

        let value: plist::Value = plist::from_bytes(&body)?;
        value
            .into_dictionary()
            .ok_or_else(|| OrchestratorError::IllegalState("usbmuxd reply wasn't a dictionary".into()))
    }
}
