use crate::{
    codec::{self, CodecError},
    object::{Arguments, Attribute, CallError, ObjectRef, RemoteObject},
    protocol::{Action, Command, Frame, Response},
    references::{ImportError, ReferenceTable},
    types::TaggedValue,
};
use std::{
    any::Any,
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Maps target names to served objects and executes [`Command`]s against them.
///
/// Targets are added with [`add`](Self::add) before serving starts.
/// [`handle`](Self::handle) never fails: every error, including a panic in
/// served code, comes back as [`Response::Exception`].
#[derive(Default)]
pub struct Dispatcher {
    targets: BTreeMap<String, ObjectRef>,
    references: ReferenceTable,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, target: impl RemoteObject) {
        self.add_shared(name, Arc::new(target));
    }

    pub fn add_shared(&mut self, name: impl Into<String>, target: ObjectRef) {
        self.targets.insert(name.into(), target);
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn references(&self) -> &ReferenceTable {
        &self.references
    }

    /// Decode one command line, run it and encode the response line.
    pub fn handle_message(&self, line: &[u8]) -> Vec<u8> {
        debug!("Request: {}", String::from_utf8_lossy(line).trim_end());
        let response = match codec::decode::<Command>(line) {
            Ok(command) => self.handle(command),
            Err(e) => {
                warn!("Malformed command: {}", e);
                DispatchError::Malformed(e).into_response("<command>")
            }
        };
        match codec::encode(&response) {
            Ok(encoded) => {
                debug!("Response: {}", String::from_utf8_lossy(&encoded).trim_end());
                encoded
            }
            Err(e) => {
                error!("Failed to encode response: {}", e);
                ENCODE_FAILURE.to_vec()
            }
        }
    }

    pub fn handle(&self, command: Command) -> Response {
        let location = format!("{}.{}", command.target_name, command.member());
        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(command))) {
            Ok(Ok(value)) => Response::success(value),
            Ok(Err(e)) => {
                warn!("{} failed: {}", location, e);
                e.into_response(&location)
            }
            Err(payload) => {
                let e = DispatchError::Panic(panic_message(payload));
                warn!("{} panicked: {}", location, e);
                e.into_response(&location)
            }
        }
    }

    fn execute(&self, command: Command) -> Result<TaggedValue, DispatchError> {
        let target = self
            .targets
            .get(&command.target_name)
            .ok_or(DispatchError::UnknownTarget(command.target_name))?;

        match command.action {
            Action::GetAttribute(name) => Ok(match target.get_attribute(&name)? {
                Attribute::Method => TaggedValue::Callable,
                Attribute::Value(value) => self.references.export(value),
            }),
            Action::Call {
                function,
                args,
                kwargs,
            } => {
                let positional = args
                    .into_iter()
                    .map(|arg| self.references.import(arg))
                    .collect::<Result<_, _>>()?;
                let keyword = kwargs
                    .into_iter()
                    .map(|(name, arg)| Ok((name, self.references.import(arg)?)))
                    .collect::<Result<_, ImportError>>()?;
                let result = target.call_method(&function, Arguments::new(positional, keyword))?;
                Ok(self.references.export(result))
            }
        }
    }
}

const ENCODE_FAILURE: &[u8] = b"{\"status\":\"exception\",\"message\":\"EncodeError: response could not be encoded\",\"trace\":[{\"function\":\"Dispatcher::handle_message\",\"file\":\"dispatcher.rs\",\"line\":0}]}\n";

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "served code panicked".to_owned()),
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no target named '{0}'")]
    UnknownTarget(String),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("{0}")]
    Panic(String),

    #[error("{0}")]
    Malformed(CodecError),
}

impl DispatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownTarget(_) => "UnknownTarget",
            DispatchError::Import(ImportError::UnknownReference(_)) => "UnknownReference",
            DispatchError::Import(ImportError::Callable(_)) => "CallableArgument",
            DispatchError::Call(e) => e.kind(),
            DispatchError::Panic(_) => "Panic",
            DispatchError::Malformed(_) => "MalformedCommand",
        }
    }

    /// `location` names the addressed member as `target.member`.
    fn into_response(self, location: &str) -> Response {
        let origin = match &self {
            DispatchError::Call(e) => e.location(),
            _ => None,
        };
        let mut trace = vec![crate::frame!("Dispatcher::handle")];
        trace.push(match origin {
            Some(origin) => Frame::new(location, origin.file(), origin.line()),
            None => Frame::new(location, "<served>", 0),
        });
        Response::exception(format!("{}: {}", self.kind(), self), trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        object::{Module, Value},
        types::RemoteRef,
    };
    use parking_lot::Mutex;

    struct Cell(Mutex<i64>);

    impl RemoteObject for Cell {
        fn type_name(&self) -> &str {
            "Cell"
        }

        fn get_attribute(&self, name: &str) -> Result<Attribute, CallError> {
            match name {
                "var" => Ok(Attribute::Value(Value::Int(*self.0.lock()))),
                _ => Err(CallError::no_such_member(self, name)),
            }
        }

        fn call_method(&self, name: &str, _args: Arguments) -> Result<Value, CallError> {
            Err(CallError::no_such_member(self, name))
        }
    }

    fn dispatcher() -> Dispatcher {
        let lib = Module::new("library")
            .constant("PARAM1", 4)
            .function("new_cell", |_| Ok(Value::object(Cell(Mutex::new(0)))))
            .function("set", |args| {
                let cell = args.object::<Cell>(0, "cell")?;
                *cell.0.lock() = args.arg(1, "v")?;
                Ok(())
            })
            .function("get", |args| Ok(*args.object::<Cell>(0, "cell")?.0.lock()))
            .function("fail", |_| Err::<(), _>(CallError::failed("it broke")))
            .function("explode", |_| -> Result<(), CallError> { panic!("kaboom") });
        let mut dispatcher = Dispatcher::new();
        dispatcher.add("TargetClass", lib);
        dispatcher
    }

    fn call(d: &Dispatcher, function: &str, args: Vec<TaggedValue>) -> Response {
        d.handle(Command::call("TargetClass", function, args, BTreeMap::new()))
    }

    fn exception(response: Response) -> (String, Vec<Frame>) {
        match response {
            Response::Exception { message, trace } => (message, trace),
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn attribute_probe_distinguishes_values_and_methods() {
        let d = dispatcher();
        assert_eq!(
            d.handle(Command::get_attribute("TargetClass", "PARAM1")),
            Response::success(TaggedValue::Int(4))
        );
        assert_eq!(
            d.handle(Command::get_attribute("TargetClass", "set")),
            Response::success(TaggedValue::Callable)
        );
    }

    #[test]
    fn references_round_trip_to_the_same_object() {
        let d = dispatcher();
        let first = call(&d, "new_cell", vec![]);
        let second = call(&d, "new_cell", vec![]);
        assert_eq!(first, Response::success(TaggedValue::Remote(RemoteRef::new("1"))));
        assert_eq!(second, Response::success(TaggedValue::Remote(RemoteRef::new("2"))));

        let one = TaggedValue::Remote(RemoteRef::new("1"));
        let two = TaggedValue::Remote(RemoteRef::new("2"));
        call(&d, "set", vec![one.clone(), TaggedValue::Int(42)]);
        call(&d, "set", vec![two.clone(), TaggedValue::Int(4)]);
        assert_eq!(call(&d, "get", vec![one]), Response::success(TaggedValue::Int(42)));
        assert_eq!(call(&d, "get", vec![two]), Response::success(TaggedValue::Int(4)));
    }

    #[test]
    fn keyword_arguments_are_resolved() {
        let d = dispatcher();
        call(&d, "new_cell", vec![]);
        let kwargs = BTreeMap::from([
            ("cell".to_owned(), TaggedValue::Remote(RemoteRef::new("1"))),
            ("v".to_owned(), TaggedValue::Int(9)),
        ]);
        d.handle(Command::call("TargetClass", "set", vec![], kwargs));
        assert_eq!(
            call(&d, "get", vec![TaggedValue::Remote(RemoteRef::new("1"))]),
            Response::success(TaggedValue::Int(9))
        );
    }

    #[test]
    fn failures_become_exceptions_with_a_trace() {
        let d = dispatcher();

        let (message, trace) = exception(call(&d, "fail", vec![]));
        assert_eq!(message, "Failed: it broke");
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[1].function, "TargetClass.fail");
        assert_eq!(trace[1].file, file!());

        let (message, _) = exception(d.handle(Command::get_attribute("Nope", "x")));
        assert!(message.starts_with("UnknownTarget"));

        let (message, _) = exception(call(&d, "missing", vec![]));
        assert!(message.contains("has no attribute 'missing'"));

        let (message, _) = exception(call(&d, "get", vec![TaggedValue::Remote(RemoteRef::new("99"))]));
        assert!(message.starts_with("UnknownReference"));

        let (message, _) = exception(call(&d, "get", vec![TaggedValue::Callable]));
        assert!(message.starts_with("CallableArgument"));
    }

    #[test]
    fn panics_do_not_escape() {
        let d = dispatcher();
        let (message, trace) = exception(call(&d, "explode", vec![]));
        assert_eq!(message, "Panic: kaboom");
        assert!(!trace.is_empty());

        assert_eq!(
            d.handle(Command::get_attribute("TargetClass", "PARAM1")),
            Response::success(TaggedValue::Int(4))
        );
    }

    #[test]
    fn handle_message_speaks_json_lines() {
        let d = dispatcher();
        let reply = d.handle_message(b"{\"class\": \"TargetClass\", \"attribute\": \"PARAM1\"}\n");
        let response: Response = codec::decode(&reply).unwrap();
        assert_eq!(response, Response::success(TaggedValue::Int(4)));

        let reply = d.handle_message(b"{oops\n");
        let (message, trace) = exception(codec::decode(&reply).unwrap());
        assert!(message.starts_with("MalformedCommand"));
        assert!(!trace.is_empty());
    }
}
