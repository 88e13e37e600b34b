// Jackson Coxson
//! The device-side half of the Web Inspector bridge (C9): the
//! `idevicewebinspectorproxy` tool itself, reimplemented natively rather
//! than shelled out to (spec.md §6 lists it among the external tools we
//! DO spec). A long-lived TCP listener; each accepted client gets a
//! reader/writer task pair bridging it to the device's
//! `com.apple.webinspector` lockdown service, reached the same way
//! [`crate::debug_proxy`] reaches `debugserver` — lockdown `StartService`
//! then a usbmux port forward.
//!
//! SIGPIPE is already ignored by the Rust runtime at process startup
//! (writes to a closed socket surface as an `EPIPE` `io::Error`, not a
//! signal), so there is nothing to do for that part of spec.md §4.9
//! beyond not overriding the default disposition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::error::OrchestratorError;
use crate::lockdown::LockdownClient;
use crate::model::Udid;
use crate::usbmux::UsbmuxConnection;

const SERVICE_NAME: &str = "com.apple.webinspector";
const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Mirrors the `idevicewebinspectorproxy [-d] [-u UDID] [-t TIMEOUT_MS]
/// [-x] PORT` CLI (spec.md §6).
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub udid: Udid,
    pub debug: bool,
    pub device_recv_timeout: Duration,
    /// Re-serialise device→client frames as XML instead of binary plist.
    pub xml_output: bool,
}

impl ProxyOptions {
    pub fn new(udid: Udid) -> Self {
        Self {
            udid,
            debug: false,
            device_recv_timeout: DEFAULT_RECV_TIMEOUT,
            xml_output: false,
        }
    }
}

/// A process-wide flag set by SIGINT/SIGTERM/SIGQUIT; the accept loop
/// polls it via [`QuitFlag::notified`] rather than a bare read so it can
/// `select!` against it alongside `accept()`.
#[derive(Clone)]
pub struct QuitFlag {
    set: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl QuitFlag {
    pub fn new() -> Self {
        Self {
            set: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) {
        self.set.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        if self.is_set() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for QuitFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the background task that sets `flag` on SIGINT/SIGTERM/SIGQUIT.
#[cfg(unix)]
pub fn install_quit_signal_handler(flag: QuitFlag) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
            _ = sigquit.recv() => {}
        }
        flag.trigger();
    });
}

/// Runs the proxy: binds `port`, accepts clients until `quit` fires,
/// spawning a bridge task per connection. Exit code 0 on clean
/// termination is the caller's (the `idevicewebinspectorproxy` bin's)
/// concern; this just returns once `quit` is signalled.
pub async fn run(port: u16, opts: ProxyOptions, quit: QuitFlag) -> Result<(), OrchestratorError> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, udid = %opts.udid, "webinspector proxy listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (client, addr) = accepted?;
                let opts = opts.clone();
                tracing::debug!(%addr, "accepted webinspector client");
                tokio::spawn(async move {
                    if let Err(e) = bridge_connection(client, opts).await {
                        tracing::warn!(error = %e, "webinspector bridge connection ended");
                    }
                });
            }
            _ = quit.notified() => {
                tracing::info!("quit signalled, stopping accept loop");
                return Ok(());
            }
        }
    }
}

async fn open_device_service(opts: &ProxyOptions) -> Result<tokio::net::UnixStream, OrchestratorError> {
    let mut lockdown = LockdownClient::connect(&opts.udid).await?;
    let port = lockdown.start_service(SERVICE_NAME).await?;

    let mut mux = UsbmuxConnection::connect().await?;
    let device = mux
        .list_devices()
        .await?
        .into_iter()
        .find(|d| d.udid == opts.udid)
        .ok_or_else(|| OrchestratorError::IllegalState(format!("device {} vanished", opts.udid)))?;
    mux.connect_to_port(device.device_id, port).await
}

fn detect_and_parse(payload: &[u8]) -> Result<plist::Value, OrchestratorError> {
    // Both framings carry the same payload shape; only the serialisation
    // differs (spec.md §4.9 "recognise whether payload is XML or binary").
    let _is_xml = payload.starts_with(b"<?xml");
    Ok(plist::from_bytes(payload)?)
}

async fn read_frame(socket: &mut (impl tokio::io::AsyncRead + Unpin)) -> Result<Option<Vec<u8>>, std::io::Error> {
    let mut len_bytes = [0u8; 4];
    match socket.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_bytes) as usize;
    let mut body = vec![0u8; len];
    socket.read_exact(&mut body).await?;
    Ok(Some(body))
}

async fn write_frame(socket: &mut (impl tokio::io::AsyncWrite + Unpin), payload: &[u8]) -> Result<(), std::io::Error> {
    socket.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    socket.write_all(payload).await?;
    socket.flush().await
}

/// One accepted client connection: a client→device task and a
/// device→client task, torn down together when either side closes.
async fn bridge_connection(client: TcpStream, opts: ProxyOptions) -> Result<(), OrchestratorError> {
    let device = open_device_service(&opts).await?;

    let (mut client_read, client_write) = tokio::io::split(client);
    let (mut device_read, device_write) = tokio::io::split(device);
    let client_write = Arc::new(tokio::sync::Mutex::new(client_write));
    let device_write = Arc::new(tokio::sync::Mutex::new(device_write));

    let teardown = Arc::new(Notify::new());

    let client_to_device = {
        let device_write = device_write.clone();
        let teardown = teardown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = read_frame(&mut client_read) => {
                        match frame {
                            Ok(Some(payload)) => {
                                let Ok(value) = detect_and_parse(&payload) else { break };
                                let mut body = Vec::new();
                                if plist::to_writer_binary(&mut body, &value).is_err() {
                                    break;
                                }
                                let mut device_write = device_write.lock().await;
                                if write_frame(&mut *device_write, &body).await.is_err() {
                                    break;
                                }
                            }
                            _ => break,
                        }
                    }
                    _ = teardown.notified() => break,
                }
            }
            teardown.notify_waiters();
        })
    };

    let device_to_client = {
        let client_write = client_write.clone();
        let teardown = teardown.clone();
        let recv_timeout = opts.device_recv_timeout;
        let xml_output = opts.xml_output;
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = tokio::time::timeout(recv_timeout, read_frame(&mut device_read)) => frame,
                    _ = teardown.notified() => break,
                };
                match frame {
                    Ok(Ok(Some(payload))) => {
                        let Ok(value) = detect_and_parse(&payload) else { break };
                        let mut body = Vec::new();
                        let encoded = if xml_output {
                            plist::to_writer_xml(&mut body, &value)
                        } else {
                            plist::to_writer_binary(&mut body, &value)
                        };
                        if encoded.is_err() {
                            break;
                        }
                        let mut client_write = client_write.lock().await;
                        if write_frame(&mut *client_write, &body).await.is_err() {
                            break;
                        }
                    }
                    Ok(Ok(None)) => break,
                    Ok(Err(_)) => break,
                    Err(_timeout) => continue,
                }
            }
            teardown.notify_waiters();
        })
    };

    let _ = tokio::join!(client_to_device, device_to_client);
    Ok(())
}
