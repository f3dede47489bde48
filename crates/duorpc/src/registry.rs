//! # Function Registry
//!
//! Maps `FunctionId`s to the handlers a host explicitly exposed. There is no
//! wildcard registration; a function that was never listed here cannot be
//! reached from the network.
//!
//! ## Invariants
//!
//! - **No Silent Overwrites**: A second registration of the same id is rejected
//!   and the first entry stays in place.
//! - **Batch Independence**: One bad method does not stop the rest of its batch.

use std::collections::HashMap;
use std::sync::Arc;

use duopack::TypeTag;
use duopack::Value;

use crate::handler::Caller;
use crate::handler::Handler;
use crate::handler::IntoHandler;
use crate::handler::IntoReply;
use crate::handler::Reply;
use crate::handles::FunctionId;

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The method name is empty or not an identifier.
    Unnamed { scope: String, name: String },
    /// The id is already taken.
    Conflict { path: String, id: FunctionId },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Unnamed { scope, name } => {
                write!(f, "method {:?} in scope '{}' has no usable name", name, scope)
            }
            Error::Conflict { path, id } => write!(f, "'{}' conflicts with registered {}", path, id),
        }
    }
}

impl std::error::Error for Error {}

/// Ordered parameter types a method accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature(Vec<TypeTag>);

impl Signature {
    pub fn new(params: Vec<TypeTag>) -> Self {
        Self(params)
    }

    pub fn params(&self) -> &[TypeTag] {
        &self.0
    }

    /// Exact arity and exact tag at every position. No coercion.
    pub fn accepts(&self, args: &[Value]) -> bool {
        args.len() == self.0.len()
            && args.iter().zip(&self.0).all(|(arg, tag)| arg.type_tag() == *tag)
    }
}

impl<const N: usize> From<[TypeTag; N]> for Signature {
    fn from(params: [TypeTag; N]) -> Self {
        Self(params.to_vec())
    }
}

impl From<Vec<TypeTag>> for Signature {
    fn from(params: Vec<TypeTag>) -> Self {
        Self(params)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_tags(f, self.0.iter().copied())
    }
}

/// Renders the runtime types of an argument list, for diagnostics.
pub(crate) struct ArgTypes<'a>(pub &'a [Value]);

impl std::fmt::Display for ArgTypes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_tags(f, self.0.iter().map(Value::type_tag))
    }
}

fn write_tags(f: &mut std::fmt::Formatter<'_>, tags: impl Iterator<Item = TypeTag>) -> std::fmt::Result {
    f.write_str("(")?;
    for (i, tag) in tags.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(tag.name())?;
    }
    f.write_str(")")
}

/// A named handler with its signature, ready to register under a scope.
pub struct Method {
    name: String,
    signature: Signature,
    handler: Handler,
}

impl Method {
    /// Wraps an untyped handler with an explicit signature.
    ///
    /// The handler only ever sees argument lists that match `signature`.
    pub fn new<F, R>(name: impl Into<String>, signature: impl Into<Signature>, handler: F) -> Self
    where
        F: Fn(&Caller, Vec<Value>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        Self {
            name: name.into(),
            signature: signature.into(),
            handler: Arc::new(move |caller: &Caller, args: Vec<Value>| Some(handler(caller, args).into_reply())),
        }
    }

    /// Wraps a typed closure, taking the signature from its parameter types.
    ///
    /// ```rust,no_run
    /// # use duorpc::Method;
    /// let add = Method::typed("add", |a: i64, b: i64| a + b);
    /// ```
    pub fn typed<Args, F: IntoHandler<Args>>(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            signature: F::signature(),
            handler: handler.into_handler(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A registered method.
pub struct MethodEntry {
    scope: String,
    path: String,
    signature: Signature,
    handler: Handler,
}

impl MethodEntry {
    /// The dotted `scope.name` path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Runs the handler. `None` if the arguments could not be bound.
    pub(crate) fn call(&self, caller: &Caller, args: Vec<Value>) -> Option<Reply> {
        (self.handler)(caller, args)
    }
}

#[derive(Default)]
pub struct Registry {
    methods: HashMap<FunctionId, MethodEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `methods` under `scope`, returning one error per rejected method.
    pub fn register(&mut self, scope: &str, methods: impl IntoIterator<Item = Method>) -> Vec<Error> {
        let mut rejected = Vec::new();

        for method in methods {
            if !is_identifier(&method.name) {
                tracing::warn!(scope, name = %method.name, "rejecting unnamed method");
                rejected.push(Error::Unnamed { scope: scope.to_owned(), name: method.name });
                continue;
            }

            let path = format!("{}.{}", scope, method.name);
            let id = FunctionId::of(scope, &method.name);
            if let Some(existing) = self.methods.get(&id) {
                tracing::warn!(%path, function = %id, existing = existing.path(), "rejecting conflicting method");
                rejected.push(Error::Conflict { path, id });
                continue;
            }

            tracing::debug!(%path, function = %id, signature = %method.signature, "registered method");
            self.methods.insert(id, MethodEntry {
                scope: scope.to_owned(),
                path,
                signature: method.signature,
                handler: method.handler,
            });
        }

        rejected
    }

    /// Removes the named methods of `scope`. Returns how many were present.
    pub fn unregister<S: AsRef<str>>(&mut self, scope: &str, names: impl IntoIterator<Item = S>) -> usize {
        names
            .into_iter()
            .filter(|name| self.methods.remove(&FunctionId::of(scope, name.as_ref())).is_some())
            .count()
    }

    /// Removes every method registered under `scope`.
    pub fn unregister_scope(&mut self, scope: &str) -> usize {
        let before = self.methods.len();
        self.methods.retain(|_, entry| entry.scope != scope);
        before - self.methods.len()
    }

    pub fn get(&self, id: FunctionId) -> Option<&MethodEntry> {
        self.methods.get(&id)
    }

    pub fn contains(&self, id: FunctionId) -> bool {
        self.methods.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
