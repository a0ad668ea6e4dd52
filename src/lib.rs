//! Serve ordinary objects to other processes and call them through proxies.
//!
//! A [`Server`] maps target names to [`RemoteObject`]s and answers one
//! JSON-line command per connection, over TCP or a local named endpoint. On
//! the client side a [`Proxy`] forwards attribute reads and method calls to
//! the server. Values that cannot travel by value come back as
//! [`RemoteRef`]s that can be passed back as arguments later.
//! [`Supervisor`] starts a local server process on demand.

mod macros;

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod net;
pub mod object;
pub mod protocol;
pub mod proxy;
pub mod references;
pub mod supervisor;
pub mod types;

pub use config::RetryPolicy;
pub use dispatcher::Dispatcher;
pub use futures::future::BoxFuture;
pub use net::{
    client::{PipeTransport, TcpTransport},
    server::{run_server, Server, ServerError},
    Endpoint, Transport,
};
pub use object::{Arguments, Attribute, CallError, Module, ObjectRef, RemoteObject, Value};
pub use proxy::{Member, Proxy, ProxyError, RemoteError, RemoteMethod};
pub use supervisor::{CallerId, LaunchSpec, Supervisor, SupervisorError};
pub use types::{Decode, Encode, IntoArgs, RemoteRef, Tag, TaggedValue, TypeMismatch};
