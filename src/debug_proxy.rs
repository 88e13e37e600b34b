// Jackson Coxson
//! App-Launch GDB Remote Serial Protocol client (C7): the
//! `idevice-app-runner` core, reimplemented natively rather than shelled
//! out to, per spec.md §4.7. Packet framing (`$<payload>#<checksum>`),
//! the checksum algorithm (mod-256 sum, lowercase 2-hex), and the
//! hex-encoding convention (uppercase 2-hex per byte) are grounded
//! directly in the teacher's `services::debug_proxy::DebugProxyClient`;
//! the 8-step launch dialogue and the O/W/X/T read loop are this
//! crate's own, since the teacher's client only sends one command and
//! reads one reply.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::command::{CaptureBuffer, CaptureReader};
use crate::error::DebugProxyError;
use crate::lockdown::LockdownClient;
use crate::model::Udid;
use crate::usbmux::UsbmuxConnection;

const SERVICE_NAME: &str = "com.apple.debugserver";
const PER_RECV_TIMEOUT: Duration = Duration::from_millis(500);
const OVERALL_WALL_CLOCK: Duration = Duration::from_secs(10);
const MAX_PACKET_BYTES: usize = 1 << 20;
const EMPTY_READ_SPIN_GUARD: u32 = 5;

fn checksum(data: &str) -> String {
    let sum = data.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
    format!("{sum:02x}")
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02X}");
        out
    })
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn packet(payload: &str) -> String {
    format!("${payload}#{}", checksum(payload))
}

/// Reads one `$<payload>#<checksum>` packet off `socket`, honoring the
/// 500ms per-recv timeout. A blank `socket` read loop (used for the
/// empty-read spin guard) is the caller's concern, not this function's.
async fn read_packet(
    socket: &mut (impl AsyncRead + Unpin),
    overall_deadline: Option<tokio::time::Instant>,
) -> Result<String, DebugProxyError> {
    let mut b = [0u8; 1];
    loop {
        let read = socket.read_exact(&mut b);
        let timed = match overall_deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, read).await,
            None => tokio::time::timeout(PER_RECV_TIMEOUT, read).await,
        };
        timed.map_err(|_| DebugProxyError::Timeout)??;
        if b[0] == b'$' {
            break;
        }
    }

    let mut payload = Vec::new();
    loop {
        if payload.len() > MAX_PACKET_BYTES {
            return Err(DebugProxyError::BufferOverflow);
        }
        tokio::time::timeout(PER_RECV_TIMEOUT, socket.read_exact(&mut b))
            .await
            .map_err(|_| DebugProxyError::Timeout)??;
        if b[0] == b'#' {
            break;
        }
        payload.push(b[0]);
    }

    let mut checksum_chars = [0u8; 2];
    socket.read_exact(&mut checksum_chars).await?;
    let expected = std::str::from_utf8(&checksum_chars)
        .map_err(|_| DebugProxyError::MalformedPacket("non-utf8 checksum".into()))?;
    let payload_str =
        String::from_utf8(payload).map_err(|_| DebugProxyError::MalformedPacket("non-utf8 payload".into()))?;
    let got = checksum(&payload_str);
    if !expected.eq_ignore_ascii_case(&got) {
        return Err(DebugProxyError::ChecksumMismatch {
            expected: expected.to_string(),
            got,
        });
    }
    Ok(payload_str)
}

/// Drives steps 1-6 of the launch dialogue against an already-open
/// `debugserver` socket. For real devices, obtain the socket via
/// [`connect`].
pub struct GdbRspClient<S> {
    socket: S,
}

#[cfg(unix)]
pub async fn connect(
    udid: &Udid,
) -> Result<GdbRspClient<tokio::net::UnixStream>, crate::error::OrchestratorError> {
    let mut lockdown = LockdownClient::connect(udid).await?;
    let port = lockdown.start_service(SERVICE_NAME).await?;

    let mut mux = UsbmuxConnection::connect().await?;
    let device = mux
        .list_devices()
        .await?
        .into_iter()
        .find(|d| &d.udid == udid)
        .ok_or_else(|| crate::error::OrchestratorError::IllegalState(format!("device {udid} vanished")))?;
    let socket = mux.connect_to_port(device.device_id, port).await?;

    Ok(GdbRspClient { socket })
}

impl<S> GdbRspClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(socket: S) -> Self {
        Self { socket }
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), DebugProxyError> {
        self.socket.write_all(bytes).await?;
        self.socket.flush().await?;
        Ok(())
    }

    async fn read_ack(&mut self) -> Result<(), DebugProxyError> {
        let mut b = [0u8; 1];
        tokio::time::timeout(PER_RECV_TIMEOUT, self.socket.read_exact(&mut b))
            .await
            .map_err(|_| DebugProxyError::Timeout)??;
        if b[0] != b'+' {
            return Err(DebugProxyError::NoAck);
        }
        Ok(())
    }

    async fn send_and_expect_ok(&mut self, payload: &str) -> Result<(), DebugProxyError> {
        self.write_raw(packet(payload).as_bytes()).await?;
        self.read_ack().await?;
        let reply = read_packet(&mut self.socket, None).await?;
        self.write_raw(b"+").await?;
        if reply != "OK" {
            return Err(DebugProxyError::UnexpectedReply {
                sent: payload.to_string(),
                got: reply,
            });
        }
        Ok(())
    }

    /// Runs the full launch dialogue (steps 1-6), then hands back a
    /// [`GdbRspProcess`] whose background task drives the step-7 read
    /// loop and step-8 shutdown.
    pub async fn launch(
        mut self,
        path: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<GdbRspProcess, DebugProxyError> {
        // Step 1: QStartNoAckMode
        self.write_raw(packet("QStartNoAckMode").as_bytes()).await?;
        self.read_ack().await?;
        let reply = read_packet(&mut self.socket, None).await?;
        if reply != "OK" {
            return Err(DebugProxyError::UnexpectedReply {
                sent: "QStartNoAckMode".into(),
                got: reply,
            });
        }
        self.write_raw(b"+").await?;

        // Step 2: environment, one QEnvironmentHexEncoded per variable
        for (k, v) in env {
            let kv = format!("{k}={v}");
            self.send_and_expect_ok(&format!("QEnvironmentHexEncoded:{}", hex_encode(kv.as_bytes())))
                .await?;
        }

        // Step 3: argv via the A command
        let mut fields = vec![format!("{},0,{}", path.len() * 2, hex_encode(path.as_bytes()))];
        for (i, arg) in args.iter().enumerate() {
            fields.push(format!("{},{},{}", arg.len() * 2, i + 1, hex_encode(arg.as_bytes())));
        }
        self.send_and_expect_ok(&format!("A{}", fields.join(","))).await?;

        // Step 4: qLaunchSuccess
        self.send_and_expect_ok("qLaunchSuccess").await?;

        // Step 5: select all threads
        self.send_and_expect_ok("Hc-1").await?;

        // Step 6: continue. No OK is expected; the app is now running.
        self.write_raw(packet("c").as_bytes()).await?;
        self.read_ack().await?;

        Ok(GdbRspProcess::spawn(self.socket))
    }
}

/// The running launched app: a background task drains the step-7 read
/// loop into a [`CaptureBuffer`], exposing the same `kill`/`await`/
/// `output_reader` shape [`crate::command::CommandProcess`] does, so
/// [`crate::model::AppProcess`] can wrap either one uniformly.
#[derive(Clone)]
pub struct GdbRspProcess {
    stdout_capture: CaptureBuffer,
    outcome: Arc<Mutex<Option<Result<i32, DebugProxyError>>>>,
    task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl GdbRspProcess {
    fn spawn<S>(mut socket: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let stdout_capture = CaptureBuffer::new();
        let outcome = Arc::new(Mutex::new(None));

        let capture_for_task = stdout_capture.clone();
        let outcome_for_task = outcome.clone();
        let join_handle = tokio::spawn(async move {
            let mut empty_reads = 0u32;
            let deadline = tokio::time::Instant::now() + OVERALL_WALL_CLOCK;

            let result = loop {
                match read_packet(&mut socket, Some(deadline)).await {
                    Ok(payload) if payload.is_empty() => {
                        empty_reads += 1;
                        if empty_reads > EMPTY_READ_SPIN_GUARD {
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        continue;
                    }
                    Ok(payload) => {
                        empty_reads = 0;
                        let _ = socket.write_all(b"+").await;
                        if let Some(hex) = payload.strip_prefix('O') {
                            if let Some(bytes) = decode_hex(hex) {
                                capture_for_task.push(&bytes);
                            }
                            continue;
                        }
                        if let Some(hex) = payload.strip_prefix('W').or_else(|| payload.strip_prefix('X')) {
                            let code = decode_hex(hex)
                                .and_then(|b| b.first().copied())
                                .map(i32::from)
                                .unwrap_or(-1);
                            break Ok(code);
                        }
                        if let Some(rest) = payload.strip_prefix('T') {
                            break Err(DebugProxyError::RemoteCrash(rest.to_string()));
                        }
                    }
                    Err(e) => break Err(e),
                }
            };

            capture_for_task.close();
            *outcome_for_task.lock().await = Some(result);
            let _ = socket.write_all(packet("k").as_bytes()).await;
        });

        Self {
            stdout_capture,
            outcome,
            task: Arc::new(Mutex::new(Some(join_handle))),
        }
    }

    /// Aborts the background read loop, which owns the socket and sends
    /// `$k#00` on its own exit path; aborting it here skips straight to
    /// dropping the socket rather than waiting for the app to report
    /// its own exit code.
    pub async fn kill(&self) -> Result<(), DebugProxyError> {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        self.stdout_capture.close();
        Ok(())
    }

    pub fn output_reader(&self) -> CaptureReader {
        self.stdout_capture.reader()
    }

    pub async fn r#await(&self) -> Result<String, DebugProxyError> {
        loop {
            if let Some(result) = self.outcome.lock().await.as_ref() {
                return match result {
                    Ok(_) => Ok(String::from_utf8_lossy(&self.stdout_capture.snapshot()).into_owned()),
                    Err(e) => Err(clone_error(e)),
                };
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn clone_error(e: &DebugProxyError) -> DebugProxyError {
    match e {
        DebugProxyError::RemoteCrash(s) => DebugProxyError::RemoteCrash(s.clone()),
        DebugProxyError::Timeout => DebugProxyError::Timeout,
        DebugProxyError::NoAck => DebugProxyError::NoAck,
        DebugProxyError::BufferOverflow => DebugProxyError::BufferOverflow,
        DebugProxyError::MalformedPacket(s) => DebugProxyError::MalformedPacket(s.clone()),
        DebugProxyError::ChecksumMismatch { expected, got } => DebugProxyError::ChecksumMismatch {
            expected: expected.clone(),
            got: got.clone(),
        },
        DebugProxyError::UnexpectedReply { sent, got } => DebugProxyError::UnexpectedReply {
            sent: sent.clone(),
            got: got.clone(),
        },
        DebugProxyError::Io(io) => DebugProxyError::Io(std::io::Error::new(io.kind(), io.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_teacher_algorithm() {
        assert_eq!(checksum("OK"), "9a");
        assert_eq!(checksum("QStartNoAckMode"), "b0");
    }

    #[test]
    fn hex_encode_is_uppercase_two_digit() {
        assert_eq!(hex_encode(b"A=1"), "413D31");
    }

    #[test]
    fn decode_hex_roundtrips() {
        assert_eq!(decode_hex("48656C6C6F").unwrap(), b"Hello");
    }

    #[test]
    fn decode_hex_rejects_odd_length() {
        assert!(decode_hex("ABC").is_none());
    }

    #[tokio::test]
    async fn launch_dialogue_against_a_scripted_debugserver() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let mut server = server_side;
            let mut buf = [0u8; 256];

            // Step 1
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], packet("QStartNoAckMode").as_bytes());
            server.write_all(b"+").await.unwrap();
            server.write_all(packet("OK").as_bytes()).await.unwrap();
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"+");

            // Step 3 (no env vars in this test): argv
            let n = server.read(&mut buf).await.unwrap();
            assert!(buf[..n].starts_with(b"$A"));
            server.write_all(b"+").await.unwrap();
            server.write_all(packet("OK").as_bytes()).await.unwrap();
            let _ = server.read(&mut buf).await.unwrap();

            // qLaunchSuccess
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], packet("qLaunchSuccess").as_bytes());
            server.write_all(b"+").await.unwrap();
            server.write_all(packet("OK").as_bytes()).await.unwrap();
            let _ = server.read(&mut buf).await.unwrap();

            // Hc-1
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], packet("Hc-1").as_bytes());
            server.write_all(b"+").await.unwrap();
            server.write_all(packet("OK").as_bytes()).await.unwrap();
            let _ = server.read(&mut buf).await.unwrap();

            // continue
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], packet("c").as_bytes());
            server.write_all(b"+").await.unwrap();

            // one O packet, then exit code 0 via W
            server
                .write_all(packet(&format!("O{}", hex_encode(b"hi\n"))).as_bytes())
                .await
                .unwrap();
            let _ = server.read(&mut buf).await.unwrap(); // ack
            server.write_all(packet("W00").as_bytes()).await.unwrap();
            let _ = server.read(&mut buf).await.unwrap(); // ack
            let _ = server.read(&mut buf).await; // final k
        });

        let client = GdbRspClient::new(client_side);
        let process = client
            .launch("/bin/true", &[], &HashMap::new())
            .await
            .expect("launch dialogue should succeed");
        let output = process.r#await().await.expect("process should exit cleanly");
        assert_eq!(output, "hi\n");

        server.await.unwrap();
    }
}
