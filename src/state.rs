//! State: the synchronously readable projection of a node
//!
//! Cache and state are decoupled: `state` keeps the last known data and error
//! after the cache is cleaned, which lets consumers render stale data while a
//! new read is in flight.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProviderError;

/// Common trait for async state types that represent loading, success, and error states
pub trait AsyncState {
    /// The type of successful data
    type Data;
    /// The type of error
    type Error;

    /// Returns true if the state is currently loading
    fn is_loading(&self) -> bool;

    /// Returns true if the state contains successful data
    fn is_success(&self) -> bool;

    /// Returns true if the state contains an error
    fn is_error(&self) -> bool;

    /// Returns the data if available, None otherwise
    fn data(&self) -> Option<&Self::Data>;

    /// Returns the error if failed, None otherwise
    fn error(&self) -> Option<&Self::Error>;
}

/// `{data, loading, error}` as seen by bindings and by the store bridge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub data: Option<Value>,
    pub loading: bool,
    pub error: Option<ProviderError>,
}

impl NodeState {
    /// Initial state seeded with the given data
    pub fn initial(data: Option<Value>) -> Self {
        Self {
            data,
            loading: false,
            error: None,
        }
    }

    pub(crate) fn start_loading(&mut self) {
        self.loading = true;
    }

    pub(crate) fn succeed(&mut self, data: Value) {
        self.data = Some(data);
        self.loading = false;
        self.error = None;
    }

    /// Last known data is kept on failure
    pub(crate) fn fail(&mut self, error: ProviderError) {
        self.loading = false;
        self.error = Some(error);
    }
}

impl AsyncState for NodeState {
    type Data = Value;
    type Error = ProviderError;

    fn is_loading(&self) -> bool {
        self.loading
    }

    fn is_success(&self) -> bool {
        !self.loading && self.error.is_none() && self.data.is_some()
    }

    fn is_error(&self) -> bool {
        self.error.is_some()
    }

    fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    fn error(&self) -> Option<&ProviderError> {
        self.error.as_ref()
    }
}
