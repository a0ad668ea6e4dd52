//! Client-side stand-in for a named object served by a [`Server`](crate::Server).
//!
//! Every member access is a round trip: the proxy first asks the server for
//! the attribute, and only if the answer is `callable` does it issue the call.
//!
//! ```no_run
//! use interface_proxy::Proxy;
//!
//! let target = Proxy::tcp("TargetClass", "127.0.0.1", 5000)?;
//! let doubled: i64 = target.call("get_double", (21,))?;
//! assert_eq!(doubled, 42);
//! # Ok::<(), interface_proxy::ProxyError>(())
//! ```

use crate::{
    codec::{self, CodecError},
    net::{
        client::{PipeTransport, TcpTransport},
        Transport,
    },
    protocol::{Command, Frame, Response},
    types::{Decode, IntoArgs, TaggedValue, TypeMismatch},
};
use std::{collections::BTreeMap, fmt, io};
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::debug;

/// Blocking proxy for the target `target_name`.
///
/// The proxy drives its own single-threaded runtime, so it must not be used
/// from inside another tokio runtime.
pub struct Proxy<T> {
    target_name: String,
    transport: T,
    runtime: Runtime,
}

impl Proxy<TcpTransport> {
    pub fn tcp(
        target_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self, ProxyError> {
        Self::new(target_name, TcpTransport::new(host, port))
    }
}

impl Proxy<PipeTransport> {
    pub fn pipe(target_name: impl Into<String>, pipe_name: impl Into<String>) -> Result<Self, ProxyError> {
        Self::new(target_name, PipeTransport::new(pipe_name))
    }
}

impl<T: Transport> Proxy<T> {
    pub fn new(target_name: impl Into<String>, transport: T) -> Result<Self, ProxyError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ProxyError::Runtime)?;
        Ok(Self {
            target_name: target_name.into(),
            transport,
            runtime,
        })
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Look up `name` on the remote target.
    ///
    /// Names starting with `_` are never forwarded and read as `None`.
    pub fn member(&self, name: &str) -> Result<Member<'_, T>, ProxyError> {
        if name.starts_with('_') {
            return Ok(Member::Value(TaggedValue::None));
        }
        Ok(match self.get_attribute(name)? {
            TaggedValue::Callable => Member::Callable(RemoteMethod {
                proxy: self,
                name: name.to_owned(),
            }),
            value => Member::Value(value),
        })
    }

    /// Read a data attribute and decode it.
    pub fn attr<R: Decode>(&self, name: &str) -> Result<R, ProxyError> {
        match self.member(name)? {
            Member::Value(value) => Ok(R::decode(value)?),
            Member::Callable(_) => Err(ProxyError::UnexpectedCallable(name.to_owned())),
        }
    }

    /// Call a method with positional arguments and decode its result.
    pub fn call<A: IntoArgs, R: Decode>(&self, name: &str, args: A) -> Result<R, ProxyError> {
        match self.member(name)? {
            Member::Callable(method) => method.call_with(args),
            Member::Value(_) => Err(ProxyError::NotCallable(name.to_owned())),
        }
    }

    /// The raw attribute probe: one round trip, no interpretation.
    pub fn get_attribute(&self, name: &str) -> Result<TaggedValue, ProxyError> {
        self.round_trip(&Command::get_attribute(&self.target_name, name))
    }

    /// The raw call: one round trip, without probing first.
    pub fn invoke(
        &self,
        function: &str,
        args: Vec<TaggedValue>,
        kwargs: BTreeMap<String, TaggedValue>,
    ) -> Result<TaggedValue, ProxyError> {
        self.round_trip(&Command::call(&self.target_name, function, args, kwargs))
    }

    fn round_trip(&self, command: &Command) -> Result<TaggedValue, ProxyError> {
        let request = codec::encode(command)?;
        debug!("Request: {}", String::from_utf8_lossy(&request).trim_end());
        let reply = self.runtime.block_on(self.transport.send(&request))?;
        debug!("Response: {}", String::from_utf8_lossy(&reply).trim_end());

        match codec::decode::<Response>(&reply)? {
            Response::Success { value } => Ok(value),
            Response::Exception { message, trace } => Err(RemoteError { message, trace }.into()),
        }
    }
}

/// What a member lookup on a [`Proxy`] produced.
pub enum Member<'p, T> {
    Value(TaggedValue),
    Callable(RemoteMethod<'p, T>),
}

impl<T> Member<'_, T> {
    pub fn is_callable(&self) -> bool {
        matches!(self, Member::Callable(_))
    }

    pub fn into_value(self) -> Option<TaggedValue> {
        match self {
            Member::Value(value) => Some(value),
            Member::Callable(_) => None,
        }
    }
}

impl<T> fmt::Debug for Member<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Member::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Member::Callable(method) => f.debug_tuple("Callable").field(&method.name).finish(),
        }
    }
}

/// A remote method bound to its proxy. Each call is one round trip.
pub struct RemoteMethod<'p, T> {
    proxy: &'p Proxy<T>,
    name: String,
}

impl<T: Transport> RemoteMethod<'_, T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(
        &self,
        args: Vec<TaggedValue>,
        kwargs: BTreeMap<String, TaggedValue>,
    ) -> Result<TaggedValue, ProxyError> {
        self.proxy.invoke(&self.name, args, kwargs)
    }

    pub fn call_with<A: IntoArgs, R: Decode>(&self, args: A) -> Result<R, ProxyError> {
        Ok(R::decode(self.call(args.into_args(), BTreeMap::new())?)?)
    }
}

/// A failure reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    message: String,
    trace: Vec<Frame>,
}

impl RemoteError {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace(&self) -> &[Frame] {
        &self.trace
    }

    /// The server-side trace rendered as a traceback, message last.
    pub fn traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in &self.trace {
            out.push_str(&frame.to_string());
            out.push('\n');
        }
        out.push_str(&self.message);
        out
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Server-side processing failed with {}", self.message)
    }
}

impl std::error::Error for RemoteError {}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("'{0}' is a method, not a value")]
    UnexpectedCallable(String),

    #[error("'{0}' is not callable")]
    NotCallable(String),

    #[error(transparent)]
    Type(#[from] TypeMismatch),

    #[error("failed to start the client runtime: {0}")]
    Runtime(io::Error),
}

impl ProxyError {
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            ProxyError::Remote(e) => Some(e),
            _ => None,
        }
    }
}
