//! Typed handler adapters.
//!
//! Any `Fn(A1, .., An) -> R` whose parameters implement [`FromParam`] and whose
//! return type implements [`IntoOutcome`] can be registered as a method. The
//! parameter signature is derived from the Rust types once, at registration.

use super::params::{FromParam, ParamType};
use crate::error::{ErrorCode, PeerError};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure reported by a handler.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub code: ErrorCode,
    pub message: String,
    pub data: Option<Value>,
}

impl HandlerError {
    /// Generic failure, reported as Server Error.
    pub fn server(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ServerError,
            message: message.into(),
            data: None,
        }
    }

    /// The handler rejects its (already coerced) arguments.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidParams,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::server(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::server(message)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::server(err.to_string())
    }
}

impl From<PeerError> for HandlerError {
    fn from(err: PeerError) -> Self {
        HandlerError::server(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::server(err.to_string())
    }
}

/// Why invoking a resolved method did not produce a value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvokeError {
    #[error("argument coercion failed: {0}")]
    Coercion(String),

    #[error("{0}")]
    Failed(HandlerError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl InvokeError {
    /// Error code sent back for a failed request.
    pub fn code(&self) -> ErrorCode {
        match self {
            InvokeError::Failed(err) => err.code,
            InvokeError::Coercion(_) | InvokeError::Panicked(_) => ErrorCode::ServerError,
        }
    }
}

/// Conversion of a handler's return value into a JSON result.
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<Value, HandlerError>;
}

/// Serializes any `T: Serialize` as the result.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoOutcome for Json<T> {
    fn into_outcome(self) -> Result<Value, HandlerError> {
        serde_json::to_value(self.0).map_err(HandlerError::from)
    }
}

/// Void handlers still answer requests, with a `null` result.
impl IntoOutcome for () {
    fn into_outcome(self) -> Result<Value, HandlerError> {
        Ok(Value::Null)
    }
}

macro_rules! impl_into_outcome_via_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoOutcome for $ty {
                fn into_outcome(self) -> Result<Value, HandlerError> {
                    Ok(Value::from(self))
                }
            }
        )*
    };
}

impl_into_outcome_via_from!(
    i64,
    i32,
    u64,
    u32,
    f64,
    bool,
    String,
    &'static str,
    Vec<Value>,
    Map<String, Value>,
    Value,
);

impl<T: IntoOutcome> IntoOutcome for Option<T> {
    fn into_outcome(self) -> Result<Value, HandlerError> {
        match self {
            Some(value) => value.into_outcome(),
            None => Ok(Value::Null),
        }
    }
}

impl<T: IntoOutcome, E: Into<HandlerError>> IntoOutcome for Result<T, E> {
    fn into_outcome(self) -> Result<Value, HandlerError> {
        self.map_err(Into::into)?.into_outcome()
    }
}

/// A callable registered in a method table.
pub trait Handler<Args>: Send + Sync + 'static {
    /// Declared parameter types, in order.
    fn signature() -> Vec<ParamType>;

    /// Convert `args` to the declared Rust types and run the handler.
    fn call(&self, args: Vec<Value>) -> Result<Value, InvokeError>;
}

macro_rules! impl_handler {
    ($($ty:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + Send + Sync + 'static,
            R: IntoOutcome,
            $($ty: FromParam,)*
        {
            fn signature() -> Vec<ParamType> {
                vec![$($ty::TYPE),*]
            }

            fn call(&self, args: Vec<Value>) -> Result<Value, InvokeError> {
                let mut args = args.into_iter().enumerate();
                $(
                    let $ty = match args.next() {
                        Some((index, value)) => $ty::from_param(value).ok_or_else(|| {
                            InvokeError::Coercion(format!(
                                "argument {} cannot be converted to {}",
                                index,
                                $ty::TYPE
                            ))
                        })?,
                        None => {
                            return Err(InvokeError::Coercion("missing argument".to_string()))
                        }
                    };
                )*
                (self)($($ty),*).into_outcome().map_err(InvokeError::Failed)
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signature_of<Args, H: Handler<Args>>(_: &H) -> Vec<ParamType> {
        H::signature()
    }

    #[test]
    fn test_signature_from_types() {
        let add = |a: i64, b: i64| a + b;
        assert_eq!(signature_of(&add), vec![ParamType::Long, ParamType::Long]);

        let greet = |name: Option<String>, times: Option<i64>| name.unwrap_or_default().repeat(times.unwrap_or(1) as usize);
        assert_eq!(
            signature_of(&greet),
            vec![ParamType::Str, ParamType::LongObj]
        );
    }

    #[test]
    fn test_call_converts_arguments() {
        let add = |a: i64, b: i64| a + b;
        assert_eq!(Handler::call(&add, vec![json!(2), json!(3)]), Ok(json!(5)));
    }

    #[test]
    fn test_void_handler_returns_null() {
        let plop = || {};
        assert_eq!(Handler::<()>::call(&plop, vec![]), Ok(Value::Null));
    }

    #[test]
    fn test_handler_error_keeps_code() {
        let picky = |n: i64| -> Result<i64, HandlerError> {
            if n < 0 {
                Err(HandlerError::invalid_params("negative"))
            } else {
                Ok(n)
            }
        };
        let err = Handler::call(&picky, vec![json!(-1)]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParams);
    }

    #[test]
    fn test_string_rejects_null_at_conversion() {
        let echo = |s: String| s;
        let err = Handler::call(&echo, vec![Value::Null]).unwrap_err();
        assert!(matches!(err, InvokeError::Coercion(_)));
        assert_eq!(err.code(), ErrorCode::ServerError);
    }

    #[test]
    fn test_json_wrapper_serializes() {
        #[derive(Serialize)]
        struct Point {
            x: i32,
        }
        assert_eq!(Json(Point { x: 1 }).into_outcome(), Ok(json!({"x": 1})));
    }

    #[test]
    fn test_anyhow_error_maps_to_server_error() {
        let failing = || -> anyhow::Result<i64> { Err(anyhow::anyhow!("boom")) };
        let err = Handler::<()>::call(&failing, vec![]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServerError);
        assert_eq!(err.to_string(), "boom");
    }
}
