//! Messages exchanged between [`Proxy`](crate::Proxy) and the server.

use crate::types::TaggedValue;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// A request against one served target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCommand", into = "RawCommand")]
pub struct Command {
    pub target_name: String,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Read a member. Methods answer with [`TaggedValue::Callable`].
    GetAttribute(String),
    Call {
        function: String,
        args: Vec<TaggedValue>,
        kwargs: BTreeMap<String, TaggedValue>,
    },
}

impl Command {
    pub fn get_attribute(target_name: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            action: Action::GetAttribute(attribute.into()),
        }
    }

    pub fn call(
        target_name: impl Into<String>,
        function: impl Into<String>,
        args: Vec<TaggedValue>,
        kwargs: BTreeMap<String, TaggedValue>,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            action: Action::Call {
                function: function.into(),
                args,
                kwargs,
            },
        }
    }

    /// Name of the attribute or function this command addresses.
    pub fn member(&self) -> &str {
        match &self.action {
            Action::GetAttribute(name) => name,
            Action::Call { function, .. } => function,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawCommand {
    #[serde(alias = "class")]
    target_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<Vec<TaggedValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kwargs: Option<BTreeMap<String, TaggedValue>>,
}

#[derive(Debug)]
pub struct InvalidCommand(&'static str);

impl fmt::Display for InvalidCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl TryFrom<RawCommand> for Command {
    type Error = InvalidCommand;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let action = match (raw.function, raw.attribute) {
            (Some(function), None) => Action::Call {
                function,
                args: raw.args.unwrap_or_default(),
                kwargs: raw.kwargs.unwrap_or_default(),
            },
            (None, Some(attribute)) => Action::GetAttribute(attribute),
            (Some(_), Some(_)) => {
                return Err(InvalidCommand("command names both a function and an attribute"))
            }
            (None, None) => {
                return Err(InvalidCommand("command names neither a function nor an attribute"))
            }
        };
        Ok(Self {
            target_name: raw.target_name,
            action,
        })
    }
}

impl From<Command> for RawCommand {
    fn from(command: Command) -> Self {
        let target_name = command.target_name;
        match command.action {
            Action::GetAttribute(attribute) => RawCommand {
                target_name,
                function: None,
                attribute: Some(attribute),
                args: None,
                kwargs: None,
            },
            Action::Call {
                function,
                args,
                kwargs,
            } => RawCommand {
                target_name,
                function: Some(function),
                attribute: None,
                args: Some(args),
                kwargs: Some(kwargs),
            },
        }
    }
}

/// Outcome of one [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Success {
        #[serde(rename = "return")]
        value: TaggedValue,
    },
    Exception {
        message: String,
        trace: Vec<Frame>,
    },
}

impl Response {
    pub fn success(value: TaggedValue) -> Self {
        Response::Success { value }
    }

    pub fn exception(message: impl Into<String>, trace: Vec<Frame>) -> Self {
        Response::Exception {
            message: message.into(),
            trace,
        }
    }
}

/// One display-only entry of a server-side failure trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub function: String,
    pub file: String,
    pub line: u32,
}

impl Frame {
    pub fn new(function: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            function: function.into(),
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "  File \"{}\", line {}, in {}",
            self.file, self.line, self.function
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_command_defaults_missing_args() {
        let cmd: Command =
            serde_json::from_value(json!({"target_name": "T", "function": "f"})).unwrap();
        assert_eq!(cmd, Command::call("T", "f", vec![], BTreeMap::new()));
    }

    #[test]
    fn accepts_legacy_class_field() {
        let cmd: Command =
            serde_json::from_value(json!({"class": "TargetClass", "attribute": "x"})).unwrap();
        assert_eq!(cmd.target_name, "TargetClass");
        assert_eq!(cmd.member(), "x");
    }

    #[test]
    fn requires_exactly_one_of_function_and_attribute() {
        let both = json!({"target_name": "T", "function": "f", "attribute": "a"});
        let neither = json!({"target_name": "T"});
        assert!(serde_json::from_value::<Command>(both).is_err());
        assert!(serde_json::from_value::<Command>(neither).is_err());
    }

    #[test]
    fn attribute_command_omits_call_fields() {
        let text = serde_json::to_value(Command::get_attribute("T", "a")).unwrap();
        assert_eq!(text, json!({"target_name": "T", "attribute": "a"}));
    }

    #[test]
    fn response_wire_shape() {
        assert_eq!(
            serde_json::to_value(Response::success(TaggedValue::Int(42))).unwrap(),
            json!({"status": "success", "return": {"type": "int", "value": 42}})
        );
        let exc = Response::exception("boom", vec![Frame::new("f", "lib.rs", 3)]);
        assert_eq!(
            serde_json::to_value(exc).unwrap(),
            json!({
                "status": "exception",
                "message": "boom",
                "trace": [{"function": "f", "file": "lib.rs", "line": 3}]
            })
        );
    }

    #[test]
    fn response_without_known_status_is_rejected() {
        assert!(serde_json::from_value::<Response>(json!({"return": null})).is_err());
        assert!(serde_json::from_value::<Response>(json!({"status": "weird"})).is_err());
    }
}
