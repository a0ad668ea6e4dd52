use super::{local, Transport};
use crate::{
    codec::{self, CodecError},
    config::RetryPolicy,
};
use futures::future::BoxFuture;
use std::{io, net::SocketAddr};
use tokio::{
    io::{AsyncRead, AsyncWrite, BufStream},
    net::TcpStream,
};

/// Opens a fresh TCP connection for every message.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<SocketAddr> for TcpTransport {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl Transport for TcpTransport {
    fn send<'a>(&'a self, message: &'a [u8]) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        Box::pin(async move {
            let sock = TcpStream::connect((self.host.as_str(), self.port)).await?;
            exchange(sock, message).await
        })
    }
}

/// Sends each message to a local named endpoint.
///
/// While the endpoint does not exist yet (the server is still starting),
/// connecting is retried according to the [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct PipeTransport {
    name: String,
    retry: RetryPolicy,
}

impl PipeTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for PipeTransport {
    fn send<'a>(&'a self, message: &'a [u8]) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        Box::pin(local::request(&self.name, self.retry, message))
    }
}

/// Write one message line and read the reply line.
pub(crate) async fn exchange<S>(stream: S, message: &[u8]) -> io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufStream::new(stream);
    codec::write_line(&mut stream, message).await?;
    let reply = codec::read_line(&mut stream).await.map_err(|e| match e {
        CodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    })?;
    reply.ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "No response from server"))
}
