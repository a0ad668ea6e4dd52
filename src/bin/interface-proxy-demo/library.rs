//! The sample library served by the demo server.

use interface_proxy::{Arguments, Attribute, CallError, Module, RemoteObject, Server, Value};
use parking_lot::Mutex;
use tracing::info;

/// Has no wire representation, so clients only ever see a reference to it.
#[derive(Default)]
pub struct ComplicatedObject {
    var: Mutex<i64>,
}

impl ComplicatedObject {
    pub fn set(&self, v: i64) {
        *self.var.lock() = v;
    }

    pub fn get(&self) -> i64 {
        *self.var.lock()
    }
}

impl RemoteObject for ComplicatedObject {
    fn type_name(&self) -> &str {
        "ComplicatedObject"
    }

    fn get_attribute(&self, name: &str) -> Result<Attribute, CallError> {
        match name {
            "var" => Ok(Attribute::Value(self.get().into())),
            "set" | "get" => Ok(Attribute::Method),
            _ => Err(CallError::no_such_member(self, name)),
        }
    }

    fn call_method(&self, name: &str, args: Arguments) -> Result<Value, CallError> {
        match name {
            "set" => {
                self.set(args.arg(0, "v")?);
                Ok(Value::None)
            }
            "get" => Ok(self.get().into()),
            _ => Err(CallError::no_such_member(self, name)),
        }
    }
}

pub fn library() -> Module {
    Module::new("library")
        .function("create_complicated_object", |_| {
            Ok(Value::object(ComplicatedObject::default()))
        })
        .function("set_co", |args| {
            args.object::<ComplicatedObject>(0, "co")?
                .set(args.arg(1, "v")?);
            Ok(())
        })
        .function("get_co", |args| {
            Ok(args.object::<ComplicatedObject>(0, "co")?.get())
        })
        .function("do_something", |args| {
            let action: String = args.arg(0, "action")?;
            info!("Do {}", action);
            Ok(())
        })
        .function("get_double", |args| Ok(args.arg::<i64>(0, "number")? * 2))
        .function("divide", |args| {
            let a: f64 = args.arg(0, "a")?;
            let b: f64 = args.arg(1, "b")?;
            if b == 0.0 {
                return Err(CallError::failed("float division by zero"));
            }
            Ok(a / b)
        })
}

pub fn parameters() -> Module {
    Module::new("parameters").constant("PARAM1", 4)
}

pub fn server() -> Server {
    let mut server = Server::new();
    server.add("TargetClass", library());
    server.add("Param", parameters());
    server
}
