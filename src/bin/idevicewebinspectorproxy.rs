// Jackson Coxson
//! `idevicewebinspectorproxy [-d] [-u UDID] [-t TIMEOUT_MS] [-x] PORT` —
//! the CLI entry point for [`iosdevicectl::webinspector::proxy`].
//! Exit code 0 on clean termination, 1 on startup failure (spec.md §6).

use std::time::Duration;

use iosdevicectl::model::Udid;
use iosdevicectl::webinspector::proxy::{self, ProxyOptions, QuitFlag};

fn print_usage() {
    println!("idevicewebinspectorproxy - bridge a TCP client to a device's Web Inspector service");
    println!("Usage:");
    println!("  idevicewebinspectorproxy [-d] [-u UDID] [-t TIMEOUT_MS] [-x] PORT");
    println!("Options:");
    println!("  -d            enable debug logging");
    println!("  -u UDID       target device (required)");
    println!("  -t TIMEOUT_MS device recv timeout in milliseconds (default 1000)");
    println!("  -x            re-serialise device->client frames as XML instead of binary plist");
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut debug = false;
    let mut udid = None;
    let mut timeout_ms = 1000u64;
    let mut xml_output = false;
    let mut port = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-d" => {
                debug = true;
                i += 1;
            }
            "-u" => {
                udid = args.get(i + 1).cloned();
                i += 2;
            }
            "-t" => {
                timeout_ms = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(1000);
                i += 2;
            }
            "-x" => {
                xml_output = true;
                i += 1;
            }
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                port = other.parse().ok();
                i += 1;
            }
        }
    }

    tracing_subscriber::fmt()
        .with_max_level(if debug { tracing::Level::DEBUG } else { tracing::Level::WARN })
        .init();

    let (Some(udid), Some(port)) = (udid, port) else {
        eprintln!("missing required -u UDID or PORT argument");
        print_usage();
        std::process::exit(1);
    };

    let opts = ProxyOptions {
        udid: Udid::new(udid),
        debug,
        device_recv_timeout: Duration::from_millis(timeout_ms),
        xml_output,
    };

    let quit = QuitFlag::new();
    proxy::install_quit_signal_handler(quit.clone());

    if let Err(e) = proxy::run(port, opts, quit).await {
        eprintln!("idevicewebinspectorproxy failed: {e}");
        std::process::exit(1);
    }
}
