//! Response payloads and deferred callbacks.
//!
//! A [`CallbackMethod`] is a partially-applied callable: its leading arguments
//! are fixed when it is bound, and its last argument is the [`Payload`] of the
//! response that eventually arrives. Binding validates the fixed arguments
//! against the callable's declared parameter types up front.
//!
//! ```rust,ignore
//! fn handle_time(place: String, payload: Payload) {
//!     println!("time in {}: {:?}", place, payload.result());
//! }
//!
//! let cb = CallbackMethod::bind(handle_time, vec![json!("Paris")])?;
//! peer.send_async_request("gimme_the_time", vec![], cb, false).await?;
//! ```

use crate::error::{PeerError, Result};
use crate::methods::params::{FromParam, ParamType};
use crate::methods::panic_message;
use crate::protocol::{ResponseBody, RpcErrorObject};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Error reported by the remote peer in place of a result.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Remote error {code}: {message}")]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

impl From<RpcErrorObject> for RemoteError {
    fn from(err: RpcErrorObject) -> Self {
        Self {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Outcome of an outbound request: the remote result or the remote error.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Result(Value),
    Error(RemoteError),
}

impl Payload {
    pub fn is_error(&self) -> bool {
        matches!(self, Payload::Error(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Payload::Result(value) => Some(value),
            Payload::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RemoteError> {
        match self {
            Payload::Result(_) => None,
            Payload::Error(err) => Some(err),
        }
    }

    pub fn into_result(self) -> std::result::Result<Value, RemoteError> {
        match self {
            Payload::Result(value) => Ok(value),
            Payload::Error(err) => Err(err),
        }
    }
}

impl From<ResponseBody> for Payload {
    fn from(body: ResponseBody) -> Self {
        match body {
            ResponseBody::Result(value) => Payload::Result(value),
            ResponseBody::Error(err) => Payload::Error(err.into()),
        }
    }
}

/// A free callable usable as a callback: `Fn(A1, .., An, Payload)`.
pub trait CallbackFn<Args>: Send + Sync + 'static {
    /// Declared types of the bound (leading) parameters.
    fn signature() -> Vec<ParamType>;

    /// Dry-run the conversion of bound arguments.
    fn check(args: &[Value]) -> std::result::Result<(), String>;

    fn call(&self, args: Vec<Value>, payload: Payload);
}

/// A callable invoked on a receiver: `Fn(&R, A1, .., An, Payload)`.
pub trait ReceiverCallbackFn<R, Args>: Send + Sync + 'static {
    fn signature() -> Vec<ParamType>;

    fn check(args: &[Value]) -> std::result::Result<(), String>;

    fn call(&self, receiver: &R, args: Vec<Value>, payload: Payload);
}

macro_rules! impl_callback_fn {
    ($($ty:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, $($ty,)*> CallbackFn<($($ty,)*)> for F
        where
            F: Fn($($ty,)* Payload) + Send + Sync + 'static,
            $($ty: FromParam,)*
        {
            fn signature() -> Vec<ParamType> {
                vec![$($ty::TYPE),*]
            }

            fn check(args: &[Value]) -> std::result::Result<(), String> {
                let mut args = args.iter().enumerate();
                $(
                    if let Some((index, value)) = args.next() {
                        if $ty::from_param(value.clone()).is_none() {
                            return Err(format!("bound argument {} cannot be converted to {}", index, $ty::TYPE));
                        }
                    }
                )*
                Ok(())
            }

            fn call(&self, args: Vec<Value>, payload: Payload) {
                let mut args = args.into_iter();
                $(
                    let Some($ty) = args.next().and_then($ty::from_param) else {
                        return;
                    };
                )*
                (self)($($ty,)* payload)
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, $($ty,)*> ReceiverCallbackFn<R, ($($ty,)*)> for F
        where
            F: Fn(&R, $($ty,)* Payload) + Send + Sync + 'static,
            $($ty: FromParam,)*
        {
            fn signature() -> Vec<ParamType> {
                vec![$($ty::TYPE),*]
            }

            fn check(args: &[Value]) -> std::result::Result<(), String> {
                let mut args = args.iter().enumerate();
                $(
                    if let Some((index, value)) = args.next() {
                        if $ty::from_param(value.clone()).is_none() {
                            return Err(format!("bound argument {} cannot be converted to {}", index, $ty::TYPE));
                        }
                    }
                )*
                Ok(())
            }

            fn call(&self, receiver: &R, args: Vec<Value>, payload: Payload) {
                let mut args = args.into_iter();
                $(
                    let Some($ty) = args.next().and_then($ty::from_param) else {
                        return;
                    };
                )*
                (self)(receiver, $($ty,)* payload)
            }
        }
    };
}

impl_callback_fn!();
impl_callback_fn!(A1);
impl_callback_fn!(A1, A2);
impl_callback_fn!(A1, A2, A3);
impl_callback_fn!(A1, A2, A3, A4);

type Target = Box<dyn FnOnce(Payload) + Send>;

/// A deferred callable waiting for exactly one response payload.
pub struct CallbackMethod {
    name: &'static str,
    signature: Vec<ParamType>,
    bound_args: Vec<Value>,
    target: Target,
}

impl CallbackMethod {
    /// Bind a free callable with its leading arguments.
    pub fn bind<Args, F>(callable: F, bound_args: Vec<Value>) -> Result<Self>
    where
        F: CallbackFn<Args>,
    {
        let signature = F::signature();
        validate(&signature, &bound_args)?;
        F::check(&bound_args).map_err(PeerError::invalid_callback)?;

        let args = bound_args.clone();
        Ok(Self {
            name: std::any::type_name::<F>(),
            signature,
            bound_args,
            target: Box::new(move |payload| callable.call(args, payload)),
        })
    }

    /// Bind a callable that runs against `receiver`.
    pub fn bind_method<R, Args, F>(
        receiver: Arc<R>,
        callable: F,
        bound_args: Vec<Value>,
    ) -> Result<Self>
    where
        R: Send + Sync + 'static,
        F: ReceiverCallbackFn<R, Args>,
    {
        let signature = F::signature();
        validate(&signature, &bound_args)?;
        F::check(&bound_args).map_err(PeerError::invalid_callback)?;

        let args = bound_args.clone();
        Ok(Self {
            name: std::any::type_name::<F>(),
            signature,
            bound_args,
            target: Box::new(move |payload| callable.call(&receiver, args, payload)),
        })
    }

    /// Declared types of the bound parameters (the payload slot excluded).
    pub fn signature(&self) -> &[ParamType] {
        &self.signature
    }

    pub fn bound_args(&self) -> &[Value] {
        &self.bound_args
    }

    /// Run the callable with `payload` appended. Panics are logged and absorbed.
    pub fn invoke(self, payload: Payload) {
        let name = self.name;
        let target = self.target;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(move || target(payload))) {
            warn!(
                "Callback {} failed: {}",
                name,
                panic_message(panic.as_ref())
            );
        }
    }
}

impl std::fmt::Debug for CallbackMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackMethod")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("bound_args", &self.bound_args)
            .finish_non_exhaustive()
    }
}

fn validate(signature: &[ParamType], bound_args: &[Value]) -> Result<()> {
    if signature.len() != bound_args.len() {
        return Err(PeerError::invalid_callback(format!(
            "callable takes {} argument(s) before the payload, {} bound",
            signature.len(),
            bound_args.len()
        )));
    }
    for (index, (ty, value)) in signature.iter().zip(bound_args).enumerate() {
        if !ty.accepts(value) {
            return Err(PeerError::invalid_callback(format!(
                "bound argument {} is not compatible with {}",
                index, ty
            )));
        }
    }
    Ok(())
}
