//! Method table and resolver.
//!
//! The embedding application registers its callables once, grouped by name.
//! Resolution picks, among the overloads registered under a name, the first
//! (in registration order) whose parameter signature is compatible with the
//! incoming argument list.
//!
//! Handlers are synchronous and run on the peer's reader task, one inbound
//! message at a time. A handler that blocks (sleeping, file or network I/O)
//! holds up every later message from that peer and ties up a runtime worker
//! thread. Such work belongs in `tokio::task::spawn_blocking` or a spawned
//! task, with the handler returning right away.
//!
//! ```rust,ignore
//! use peerlink_core::MethodTable;
//!
//! let methods = MethodTable::builder()
//!     .method("add", |a: i64, b: i64| a + b)
//!     .method("add", |a: f64, b: f64| a + b)
//!     .method("plop", || tracing::info!("plop"))
//!     .build();
//! ```

pub mod handler;
pub mod params;

pub use handler::{Handler, HandlerError, IntoOutcome, InvokeError, Json};
pub use params::{are_compatible, coerce_all, FromParam, ParamType, ValueKind};

use crate::error::ErrorCode;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

type Invoker = Arc<dyn Fn(Vec<Value>) -> Result<Value, InvokeError> + Send + Sync>;

/// One registered overload.
#[derive(Clone)]
pub struct MethodEntry {
    name: String,
    signature: Vec<ParamType>,
    invoker: Invoker,
}

impl MethodEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &[ParamType] {
        &self.signature
    }

    pub fn accepts(&self, args: &[Value]) -> bool {
        are_compatible(args, &self.signature)
    }

    /// Re-cast `args` to this overload's declared types.
    pub fn coerce(&self, args: &[Value]) -> Option<Vec<Value>> {
        coerce_all(args, &self.signature)
    }

    /// Run the callable with already coerced arguments. Panics are caught.
    pub fn invoke(&self, args: Vec<Value>) -> Result<Value, InvokeError> {
        match catch_unwind(AssertUnwindSafe(|| (self.invoker)(args))) {
            Ok(outcome) => outcome,
            Err(panic) => Err(InvokeError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

impl std::fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Why a call could not be served.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::MethodNotFound(_) => ErrorCode::MethodNotFound,
            DispatchError::Invoke(err) => err.code(),
        }
    }
}

/// Name-indexed set of callables, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Vec<MethodEntry>>,
}

impl MethodTable {
    pub fn builder() -> MethodTableBuilder {
        MethodTableBuilder::default()
    }

    /// A table exposing nothing; every inbound call is Method Not Found.
    pub fn empty() -> Self {
        Self::default()
    }

    /// First overload of `name` compatible with `args`.
    pub fn resolve(&self, name: &str, args: &[Value]) -> Option<&MethodEntry> {
        self.methods
            .get(name)?
            .iter()
            .find(|entry| entry.accepts(args))
    }

    /// Resolve, coerce and invoke in one step.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, DispatchError> {
        let entry = self
            .resolve(name, args)
            .ok_or_else(|| DispatchError::MethodNotFound(name.to_string()))?;
        let coerced = entry.coerce(args).ok_or_else(|| {
            InvokeError::Coercion(format!("arguments do not fit {}", entry.name()))
        })?;
        Ok(entry.invoke(coerced)?)
    }

    pub fn overloads(&self, name: &str) -> &[MethodEntry] {
        self.methods.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Number of distinct method names.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Collects overloads before freezing them into a [`MethodTable`].
#[derive(Default)]
pub struct MethodTableBuilder {
    methods: HashMap<String, Vec<MethodEntry>>,
}

impl MethodTableBuilder {
    /// Register a typed handler under `name`.
    pub fn method<Args, H>(self, name: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let signature = H::signature();
        let invoker: Invoker = Arc::new(move |args| handler.call(args));
        self.insert(name.into(), signature, invoker)
    }

    /// Register an untyped handler with an explicit signature.
    pub fn raw<F>(self, name: impl Into<String>, signature: Vec<ParamType>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(move |args| handler(args).map_err(InvokeError::Failed));
        self.insert(name.into(), signature, invoker)
    }

    fn insert(mut self, name: String, signature: Vec<ParamType>, invoker: Invoker) -> Self {
        self.methods
            .entry(name.clone())
            .or_default()
            .push(MethodEntry {
                name,
                signature,
                invoker,
            });
        self
    }

    pub fn build(self) -> MethodTable {
        MethodTable {
            methods: self.methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> MethodTable {
        MethodTable::builder()
            .method("add", |a: i64, b: i64| a + b)
            .method("add", |a: f64, b: f64| a + b)
            .method("f", |_a: i32, _b: String| "int-string")
            .method("f", |_a: i64, _b: Value| "long-object")
            .method("boom", || -> i64 { panic!("kaboom") })
            .build()
    }

    #[test]
    fn test_resolve_by_argument_kind() {
        let methods = table();
        assert_eq!(methods.call("add", &[json!(2), json!(3)]), Ok(json!(5)));
        assert_eq!(methods.call("add", &[json!(1.5), json!(2.0)]), Ok(json!(3.5)));
    }

    #[test]
    fn test_resolve_skips_incompatible_overload() {
        let methods = table();
        let entry = methods.resolve("f", &[json!(1), Value::Null]).unwrap();
        assert_eq!(entry.signature(), &[ParamType::Long, ParamType::Any]);
        assert_eq!(
            methods.call("f", &[json!(1), Value::Null]),
            Ok(json!("long-object"))
        );
    }

    #[test]
    fn test_registration_order_breaks_ties() {
        let methods = MethodTable::builder()
            .method("pick", |_v: Value| "first")
            .method("pick", |_v: i64| "second")
            .build();
        assert_eq!(methods.call("pick", &[json!(1)]), Ok(json!("first")));
    }

    #[test]
    fn test_method_not_found() {
        let methods = table();
        let err = methods.call("nope", &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MethodNotFound);

        // Known name, no compatible overload
        let err = methods.call("add", &[json!("a"), json!(1)]).unwrap_err();
        assert_eq!(err, DispatchError::MethodNotFound("add".to_string()));
    }

    #[test]
    fn test_panic_becomes_server_error() {
        let methods = table();
        let err = methods.call("boom", &[]).unwrap_err();
        assert!(matches!(err, DispatchError::Invoke(InvokeError::Panicked(ref m)) if m == "kaboom"));
        assert_eq!(err.code(), ErrorCode::ServerError);
    }

    #[test]
    fn test_raw_handler() {
        let methods = MethodTable::builder()
            .raw("len", vec![ParamType::List], |args| {
                Ok(json!(args[0].as_array().map(Vec::len).unwrap_or(0)))
            })
            .build();
        assert_eq!(methods.call("len", &[json!([1, 2, 3])]), Ok(json!(3)));
        assert_eq!(methods.overloads("len").len(), 1);
        assert!(methods.overloads("missing").is_empty());
    }
}
