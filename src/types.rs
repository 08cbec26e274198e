//! Common types and aliases used throughout data-provider

use futures::future::BoxFuture;
use serde_json::Value;

use crate::errors::ProviderError;

/// Outcome of a read, shared verbatim with every caller awaiting it
pub type ReadResult = Result<Value, ProviderError>;

/// Boxed future returned by `read()` and by fetch/derive strategies
pub type ReadFuture = BoxFuture<'static, ReadResult>;

/// Common trait bounds for values handed to user callbacks across tasks
pub trait CallbackBounds: Send + Sync + 'static {}
impl<T> CallbackBounds for T where T: Send + Sync + 'static {}
