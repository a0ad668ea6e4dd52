//! Local named endpoints.
//!
//! On Windows a name maps to the named pipe `\\.\pipe\<name>`. Elsewhere it
//! maps to a Unix domain socket `<temp dir>/<name>.sock`, which gives the same
//! connect/accept semantics.

use super::{client::exchange, server::Server};
use crate::config::RetryPolicy;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, error, info};

/// All pipe instances are taken; the server creates the next one shortly.
const ERROR_PIPE_BUSY: i32 = 231;

#[cfg(windows)]
pub fn endpoint_path(name: &str) -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{name}"))
}

#[cfg(not(windows))]
pub fn endpoint_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{name}.sock"))
}

/// The endpoint is not there yet, but may appear shortly.
///
/// On Unix a socket file left by a dead server refuses connections until the
/// next server binds over it.
fn not_ready(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound
        || (cfg!(unix) && e.kind() == io::ErrorKind::ConnectionRefused)
        || (cfg!(windows) && e.raw_os_error() == Some(ERROR_PIPE_BUSY))
}

pub(crate) async fn request(name: &str, retry: RetryPolicy, message: &[u8]) -> io::Result<Vec<u8>> {
    let path = endpoint_path(name);
    let started = Instant::now();
    let mut delay = retry.initial_delay;
    loop {
        match connect(&path).await {
            Ok(stream) => return exchange(stream, message).await,
            Err(e) if not_ready(&e) && started.elapsed() <= retry.max_elapsed => {
                debug!("{} not ready ({}), retrying in {:?}", path.display(), e, delay);
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(retry.backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(not(windows))]
async fn connect(path: &Path) -> io::Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect(path).await
}

#[cfg(windows)]
async fn connect(path: &Path) -> io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(path)
}

/// Unlinks the socket file when the server stops.
#[cfg(not(windows))]
struct SocketFile(PathBuf);

#[cfg(not(windows))]
impl Drop for SocketFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                error!("Failed to remove {}: {}", self.0.display(), e)
            }
            _ => debug!("Removed {}", self.0.display()),
        }
    }
}

#[cfg(not(windows))]
pub(crate) async fn serve(server: Arc<Server>, name: &str) -> io::Result<()> {
    let path = endpoint_path(name);
    // A socket file left behind by a dead server blocks bind.
    match std::fs::remove_file(&path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    let listener = tokio::net::UnixListener::bind(&path)?;
    let _socket = SocketFile(path.clone());
    info!("Serving on {}", path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(server.clone().handle_connection(stream));
            }
            Err(e) => error!("Failed to accept on {}: {}", path.display(), e),
        }
    }
}

#[cfg(windows)]
pub(crate) async fn serve(server: Arc<Server>, name: &str) -> io::Result<()> {
    use tokio::net::windows::named_pipe::ServerOptions;

    let path = endpoint_path(name);
    let mut pipe = ServerOptions::new().first_pipe_instance(true).create(&path)?;
    info!("Serving on {}", path.display());

    loop {
        if let Err(e) = pipe.connect().await {
            error!("Failed to accept on {}: {}", path.display(), e);
            pipe = ServerOptions::new().create(&path)?;
            continue;
        }
        let connected = pipe;
        pipe = ServerOptions::new().create(&path)?;
        tokio::spawn(server.clone().handle_connection(connected));
    }
}
