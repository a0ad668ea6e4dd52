pub mod client;
pub mod local;
pub mod server;

use futures::future::BoxFuture;
use std::{fmt, io, net::SocketAddr, sync::Arc};

/// Carries one encoded message to the server and returns its reply.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, message: &'a [u8]) -> BoxFuture<'a, io::Result<Vec<u8>>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send<'a>(&'a self, message: &'a [u8]) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        (**self).send(message)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send<'a>(&'a self, message: &'a [u8]) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        (**self).send(message)
    }
}

/// Where a server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    /// A local endpoint name, see [`local::endpoint_path`].
    Pipe(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Pipe(name) => write!(f, "pipe:{name}"),
        }
    }
}
