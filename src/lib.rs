#![doc = include_str!("../README.md")]

// Core modules
pub mod cache;
pub mod context;
pub mod errors;
pub mod events;
mod log_utils;
pub mod node;
pub mod options;
pub mod platform;
pub mod provider;
pub mod query;
pub mod registry;
pub(crate) mod runtime;
pub mod selector;
pub mod state;
pub mod store;
pub mod types;

// Re-export commonly used items at crate root for convenience
pub use context::{ContextConfig, ProviderContext};
pub use node::Node;

pub mod prelude {
    //! The prelude exports all the most common types and functions for using data-provider.

    // Context and registry
    pub use crate::context::{ContextConfig, ProviderContext};
    pub use crate::registry::{NodeSet, Registry};

    // Nodes and their builders
    pub use crate::node::{Node, WeakNode};
    pub use crate::provider::{FetchRequest, Fetcher, Provider, ProviderBuilder};
    pub use crate::selector::{Dependency, ResolvedDependency, Selector, SelectorBuilder};

    // Queries
    pub use crate::query::{QueryKey, QueryValue, canonical_key, nested_merge, shallow_merge};

    // Configuration
    pub use crate::options::{CleanCacheOptions, ConfigOptions, InitialState, NodeOptions};

    // State, events and statistics
    pub use crate::cache::{CacheStatus, Stats};
    pub use crate::events::{EventKind, NodeEvent, Subscription};
    pub use crate::state::{AsyncState, NodeState};

    // Store bridge
    pub use crate::store::{StoreAction, StoreBridge, migrate_namespace, reducer};

    // Error types
    pub use crate::errors::{ProviderError, ProviderResult};
    pub use crate::types::{ReadFuture, ReadResult};
}
