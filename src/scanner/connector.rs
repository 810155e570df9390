//! The single connection attempt behind every scan task.
use super::Outcome;
use async_trait::async_trait;
use log::debug;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::{io::AsyncWriteExt, net::TcpStream, time};

// EMFILE and ENFILE.
#[cfg(not(windows))]
const EXHAUSTION_CODES: &[i32] = &[24, 23];
// WSAEMFILE and WSAENOBUFS.
#[cfg(windows)]
const EXHAUSTION_CODES: &[i32] = &[10024, 10055];

/// Performs one time-bounded reachability probe.
///
/// The scanner only ever talks to the network through this trait, which
/// lets tests drive it with scripted outcomes.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, socket: SocketAddr, timeout: Duration) -> Outcome;
}

/// Plain TCP connect probe. An accepted connection is shut down right away.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, socket: SocketAddr, timeout: Duration) -> Outcome {
        match time::timeout(timeout, TcpStream::connect(socket)).await {
            Ok(Ok(mut stream)) => {
                debug!("Connection was successful, shutting down stream {socket}");
                if let Err(e) = stream.shutdown().await {
                    debug!("Shutdown stream error {e}");
                }
                Outcome::Open
            }
            Ok(Err(e)) => classify(&e),
            Err(_) => Outcome::TimedOut,
        }
    }
}

/// Maps a failed connect onto an [`Outcome`].
///
/// Running out of local descriptors is detected from the OS error code,
/// falling back on the message for platforms that wrap the error.
pub fn classify(error: &io::Error) -> Outcome {
    if is_resource_exhaustion(error) {
        return Outcome::ResourceExhausted;
    }

    match error.kind() {
        ErrorKind::ConnectionRefused => Outcome::Refused,
        ErrorKind::TimedOut => Outcome::TimedOut,
        _ => Outcome::Other(error.to_string()),
    }
}

fn is_resource_exhaustion(error: &io::Error) -> bool {
    error
        .raw_os_error()
        .is_some_and(|code| EXHAUSTION_CODES.contains(&code))
        || error
            .to_string()
            .to_lowercase()
            .contains("too many open files")
}
