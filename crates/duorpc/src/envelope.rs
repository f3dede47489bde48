//! # Wire Envelopes
//!
//! Every packet is one duopack `Value::List` whose first element is a kind tag.
//!
//! ```text
//! Exec    [0, function_id: int, args: list]
//! Invoke  [1, function_id: int, args: list, task_id: int]
//! Result  [2, value: any, task_id: int]
//! ```
//!
//! ## Invariants
//!
//! - Decoding never trusts shape: a short list, a wrong element type or an
//!   unknown kind is `Error::Malformed`, never a panic.
//! - Extra trailing elements are ignored so newer peers can append fields.

use duopack::Value;

use crate::handles::FunctionId;
use crate::handles::TaskId;

pub const KIND_EXEC: i64 = 0;
pub const KIND_INVOKE: i64 = 1;
pub const KIND_RESULT: i64 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Codec(duopack::Error),
    Malformed(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::Malformed(what) => write!(f, "Malformed envelope: {}", what),
        }
    }
}

impl std::error::Error for Error {}

impl From<duopack::Error> for Error {
    fn from(e: duopack::Error) -> Self {
        Self::Codec(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Exec { function: FunctionId, args: Vec<Value> },
    Invoke { function: FunctionId, args: Vec<Value>, task: TaskId },
    Result { value: Value, task: TaskId },
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(duopack::encode(&self.to_value())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::from_value(duopack::decode(bytes)?)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Exec { function, args } => Value::List(vec![
                Value::Int(KIND_EXEC),
                Value::Int(function.0),
                Value::List(args.clone()),
            ]),
            Self::Invoke { function, args, task } => Value::List(vec![
                Value::Int(KIND_INVOKE),
                Value::Int(function.0),
                Value::List(args.clone()),
                Value::from(task.0),
            ]),
            Self::Result { value, task } => Value::List(vec![
                Value::Int(KIND_RESULT),
                value.clone(),
                Value::from(task.0),
            ]),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::List(items) = value else {
            return Err(Error::Malformed("not a list"));
        };
        let mut items = items.into_iter();
        let kind = match items.next() {
            Some(Value::Int(kind)) => kind,
            Some(_) => return Err(Error::Malformed("kind is not an int")),
            None => return Err(Error::Malformed("empty list")),
        };

        match kind {
            KIND_EXEC => {
                let function = function_id(items.next())?;
                let args = arg_list(items.next())?;
                Ok(Self::Exec { function, args })
            }
            KIND_INVOKE => {
                let function = function_id(items.next())?;
                let args = arg_list(items.next())?;
                let task = task_id(items.next())?;
                Ok(Self::Invoke { function, args, task })
            }
            KIND_RESULT => {
                let value = items.next().ok_or(Error::Malformed("missing result value"))?;
                let task = task_id(items.next())?;
                Ok(Self::Result { value, task })
            }
            _ => Err(Error::Malformed("unknown kind")),
        }
    }
}

fn function_id(item: Option<Value>) -> Result<FunctionId> {
    match item {
        Some(Value::Int(id)) => Ok(FunctionId(id)),
        _ => Err(Error::Malformed("function id is not an int")),
    }
}

fn arg_list(item: Option<Value>) -> Result<Vec<Value>> {
    match item {
        Some(Value::List(args)) => Ok(args),
        _ => Err(Error::Malformed("args is not a list")),
    }
}

/// Task ids travel as int32; negative ids are never handed out.
fn task_id(item: Option<Value>) -> Result<TaskId> {
    let Some(Value::Int(n)) = item else {
        return Err(Error::Malformed("task id is not an int"));
    };
    i32::try_from(n)
        .ok()
        .and_then(|n| u32::try_from(n).ok())
        .map(TaskId)
        .ok_or(Error::Malformed("task id out of range"))
}
