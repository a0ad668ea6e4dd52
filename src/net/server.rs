use super::{local, Endpoint};
use crate::{codec, dispatcher::Dispatcher, object::RemoteObject};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream},
    net::{TcpListener, ToSocketAddrs},
    task,
};
use tracing::{debug, error, info, warn};

/// Accepts connections and answers exactly one command per connection.
#[derive(Default)]
pub struct Server {
    dispatcher: Dispatcher,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, target: impl RemoteObject) {
        self.dispatcher.add(name, target);
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn serve(self, endpoint: &Endpoint) -> io::Result<()> {
        match endpoint {
            Endpoint::Tcp(addr) => self.serve_tcp(addr).await,
            Endpoint::Pipe(name) => self.serve_local(name).await,
        }
    }

    pub async fn serve_tcp(self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_tcp_listener(listener).await
    }

    /// Serve on an already bound listener, e.g. one bound to port 0.
    pub async fn serve_tcp_listener(self, listener: TcpListener) -> io::Result<()> {
        let root_arc = Arc::new(self);
        info!("Serving on {}", listener.local_addr()?);
        loop {
            match listener.accept().await {
                Ok((sock, addr)) => {
                    debug!("Connection from {}", addr);
                    task::spawn(root_arc.clone().handle_connection(sock));
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            }
        }
    }

    pub async fn serve_local(self, name: &str) -> io::Result<()> {
        local::serve(Arc::new(self), name).await
    }

    pub(crate) async fn handle_connection<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufStream::new(stream);
        let request = match codec::read_line(&mut stream).await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!("Dropping connection: {}", e);
                return;
            }
        };
        let response = self.dispatcher.handle_message(&request);
        if let Err(e) = codec::write_line(&mut stream, &response).await {
            debug!("Client went away before the response: {}", e);
            return;
        }
        _ = stream.shutdown().await;
    }
}

impl From<Dispatcher> for Server {
    fn from(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("the server has already been started in this process")]
    AlreadyStarted,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

static STARTED: AtomicBool = AtomicBool::new(false);

/// Run `server` on `endpoint`, blocking the calling thread.
///
/// May be called once per process; later calls fail with
/// [`ServerError::AlreadyStarted`] even if the first one failed to bind.
pub fn run_server(server: Server, endpoint: Endpoint) -> Result<(), ServerError> {
    if STARTED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(ServerError::AlreadyStarted);
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server.serve(&endpoint))?;
    Ok(())
}
