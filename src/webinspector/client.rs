// Jackson Coxson
//! The host-side Web Inspector framed socket and typed client (C10),
//! layered over [`crate::webinspector::message`]. Wire framing mirrors
//! [`crate::webinspector::proxy`] exactly: a 4-byte big-endian length
//! prefix followed by a binary property list.
//!
//! Grounded in the same socket/capture idioms as
//! [`crate::debug_proxy::GdbRspClient`]/[`GdbRspProcess`] — a boxed
//! duplex stream for the transport, a background cooperative task for
//! the receive pump — adapted to the `Created → Started → Closed`
//! lifecycle spec.md §4.10/§4.11 describe instead of a one-shot launch
//! dialogue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::command::{Command, CommandProcess, OutputSink};
use crate::error::{InspectorError, OrchestratorError};
use crate::model::Udid;
use crate::webinspector::message::InspectorMessage;

const SIMULATOR_ADDR: &str = "[::1]:27753";
const PROXY_CONNECT_ATTEMPTS: u32 = 15;
const PROXY_CONNECT_DELAY: Duration = Duration::from_secs(1);
const LISTEN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const SCHEDULER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type BoxedDuplex = Box<dyn AsyncReadWrite>;

trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncReadWrite for T {}

/// A raw 4-byte-length-prefixed plist duplex socket, plus (for real
/// devices) the `idevicewebinspectorproxy` process it rides on — killed
/// when the socket is dropped.
pub struct FramedSocket {
    socket: BoxedDuplex,
    proxy: Option<CommandProcess>,
}

impl FramedSocket {
    fn from_stream(socket: impl AsyncRead + AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            socket: Box::new(socket),
            proxy: None,
        }
    }

    /// Connects to a simulator's webinspector service directly — no
    /// proxy process is involved, `simctl` already exposes it on a fixed
    /// loopback port.
    pub async fn connect_simulator() -> Result<Self, InspectorError> {
        let addr: SocketAddr = SIMULATOR_ADDR.parse().expect("static address is valid");
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    /// Starts `idevicewebinspectorproxy -u UDID PORT`, picking `PORT` by
    /// binding an ephemeral local listener first, then retries a TCP
    /// client connect to it up to 15 times at 1 s intervals (spec.md
    /// §4.5 "Web-inspector socket"). The proxy process is killed when
    /// the returned socket is dropped.
    pub async fn connect_real_device(udid: &Udid, proxy_binary: &str) -> Result<Self, OrchestratorError> {
        let ephemeral = std::net::TcpListener::bind("127.0.0.1:0")?;
        let port = ephemeral.local_addr()?.port();
        drop(ephemeral);

        let command = Command::new(proxy_binary)
            .arg("-u")
            .arg(udid.as_str())
            .arg(port.to_string())
            .stdout(OutputSink::Capture)
            .stderr(OutputSink::Capture);
        let proxy = command.start().await?;

        let mut last_err = None;
        for attempt in 0..PROXY_CONNECT_ATTEMPTS {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => {
                    return Ok(Self {
                        socket: Box::new(stream),
                        proxy: Some(proxy),
                    });
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < PROXY_CONNECT_ATTEMPTS {
                        tokio::time::sleep(PROXY_CONNECT_DELAY).await;
                    }
                }
            }
        }

        let _ = proxy.kill().await;
        Err(OrchestratorError::IllegalState(format!(
            "could not connect to idevicewebinspectorproxy on port {port} after {PROXY_CONNECT_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), InspectorError> {
        self.socket.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        self.socket.write_all(payload).await?;
        self.socket.flush().await?;
        Ok(())
    }

    /// Reads one frame. EOF on the length prefix with zero bytes read so
    /// far is normal stream closure, reported as [`InspectorError::Closed`].
    async fn read_frame(&mut self) -> Result<Vec<u8>, InspectorError> {
        let mut len_bytes = [0u8; 4];
        match self.socket.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(InspectorError::Closed),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_bytes) as usize;
        let mut body = vec![0u8; len];
        self.socket.read_exact(&mut body).await?;
        Ok(body)
    }

    pub async fn send_value(&mut self, value: &plist::Value) -> Result<(), InspectorError> {
        let mut body = Vec::new();
        plist::to_writer_binary(&mut body, value)?;
        self.write_frame(&body).await
    }

    pub async fn receive_value(&mut self) -> Result<plist::Value, InspectorError> {
        let body = self.read_frame().await?;
        Ok(plist::from_bytes(&body)?)
    }
}

impl Drop for FramedSocket {
    fn drop(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            tokio::spawn(async move {
                let _ = proxy.kill().await;
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Created,
    Started,
    Closed,
}

/// The typed client above a [`FramedSocket`]: `Created → Started →
/// Closed` (spec.md §4.11). `sendMessage` is legal only in `Started`;
/// `startListening` only from `Created`; `close` only from `Started`.
pub struct WebInspectorClient {
    socket: Arc<Mutex<FramedSocket>>,
    state: Arc<Mutex<ClientState>>,
    pump: Mutex<Option<tokio::task::JoinHandle<Result<(), InspectorError>>>>,
}

impl WebInspectorClient {
    pub fn new(socket: FramedSocket) -> Self {
        Self {
            socket: Arc::new(Mutex::new(socket)),
            state: Arc::new(Mutex::new(ClientState::Created)),
            pump: Mutex::new(None),
        }
    }

    /// Schedules the background receive pump at a 50ms cadence. Legal
    /// only from `Created`.
    pub async fn start_listening<F>(&self, mut handler: F) -> Result<(), InspectorError>
    where
        F: FnMut(InspectorMessage) + Send + 'static,
    {
        let mut state = self.state.lock().await;
        if *state != ClientState::Created {
            return Err(InspectorError::AlreadyStarted);
        }
        *state = ClientState::Started;
        drop(state);

        let socket = self.socket.clone();
        let state_for_pump = self.state.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(LISTEN_POLL_INTERVAL).await;
                if *state_for_pump.lock().await != ClientState::Started {
                    return Ok(());
                }
                let value = {
                    let mut socket = socket.lock().await;
                    socket.receive_value().await
                };
                match value {
                    Ok(value) => {
                        let message = InspectorMessage::from_plist(&value)?;
                        handler(message);
                    }
                    Err(InspectorError::Closed) => {
                        if *state_for_pump.lock().await == ClientState::Started {
                            tracing::warn!("web inspector socket closed unexpectedly");
                        }
                        *state_for_pump.lock().await = ClientState::Closed;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
        });
        *self.pump.lock().await = Some(handle);
        Ok(())
    }

    /// Encodes `message` and writes one frame. Legal only in `Started`.
    pub async fn send_message(&self, message: &InspectorMessage) -> Result<(), InspectorError> {
        if *self.state.lock().await != ClientState::Started {
            return Err(InspectorError::NotStarted);
        }
        let value = message.to_plist();
        self.socket.lock().await.send_value(&value).await
    }

    /// Cancels the scheduled receive task, propagating its failure if it
    /// had already failed, then closes the socket. Legal only in `Started`.
    pub async fn close(&self) -> Result<(), InspectorError> {
        {
            let mut state = self.state.lock().await;
            if *state != ClientState::Started {
                return Err(InspectorError::AlreadyClosed);
            }
            *state = ClientState::Closed;
        }

        let handle = self.pump.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            match tokio::time::timeout(SCHEDULER_SHUTDOWN_GRACE, handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => return Err(e),
                Ok(Err(_)) | Err(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webinspector::message::NestedListing;

    async fn duplex_pair() -> (FramedSocket, FramedSocket) {
        let (a, b) = tokio::io::duplex(8192);
        (FramedSocket::from_stream(a), FramedSocket::from_stream(b))
    }

    #[tokio::test]
    async fn a_sent_frame_is_received_as_an_equal_value() {
        let (mut a, mut b) = duplex_pair().await;
        let msg = InspectorMessage::ReportIdentifier {
            connection_identifier: "id1".to_string(),
        };
        a.send_value(&msg.to_plist()).await.unwrap();
        let received = b.receive_value().await.unwrap();
        assert_eq!(InspectorMessage::from_plist(&received).unwrap(), msg);
    }

    #[tokio::test]
    async fn read_frame_reports_closed_on_clean_eof() {
        let (a, mut b) = duplex_pair().await;
        drop(a);
        let err = b.receive_value().await.unwrap_err();
        assert!(matches!(err, InspectorError::Closed));
    }

    #[tokio::test]
    async fn send_message_before_start_listening_is_not_started() {
        let (_keepalive, b) = duplex_pair().await;
        let client = WebInspectorClient::new(b);
        let msg = InspectorMessage::ReportIdentifier {
            connection_identifier: "id1".to_string(),
        };
        let err = client.send_message(&msg).await.unwrap_err();
        assert!(matches!(err, InspectorError::NotStarted));
    }

    #[tokio::test]
    async fn close_before_start_listening_is_illegal() {
        let (_keepalive, b) = duplex_pair().await;
        let client = WebInspectorClient::new(b);
        let err = client.close().await.unwrap_err();
        assert!(matches!(err, InspectorError::AlreadyClosed));
    }

    #[tokio::test]
    async fn start_listening_twice_is_rejected() {
        let (_keepalive, b) = duplex_pair().await;
        let client = WebInspectorClient::new(b);
        client.start_listening(|_| {}).await.unwrap();
        let err = client.start_listening(|_| {}).await.unwrap_err();
        assert!(matches!(err, InspectorError::AlreadyStarted));
    }

    #[tokio::test]
    async fn report_identifier_round_trip_drives_the_receive_pump() {
        let (mut a, b) = duplex_pair().await;
        let client = WebInspectorClient::new(b);

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_for_handler = received.clone();
        client
            .start_listening(move |m| {
                received_for_handler.lock().unwrap().push(m);
            })
            .await
            .unwrap();

        let mut listing = NestedListing::new();
        let mut page = plist::Dictionary::new();
        page.insert("WIRTitleKey".to_string(), plist::Value::String("t".to_string()));
        listing.insert("1".to_string(), page);
        let msg = InspectorMessage::ApplicationSentListing {
            connection_identifier: "id1".to_string(),
            application_identifier: "app1".to_string(),
            listing,
        };
        a.send_value(&msg.to_plist()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(received.lock().unwrap().as_slice(), &[msg]);

        client.close().await.unwrap();
    }
}
