//! # Providers
//!
//! A provider is a node whose value comes from a user-supplied fetch routine.
//! The routine receives the node's query value and the explicit read arguments.
//!
//! ## Example
//!
//! ```rust,no_run
//! use data_provider::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> ProviderResult<()> {
//! let context = ProviderContext::new();
//! let books = Provider::builder(|request: FetchRequest| async move {
//!     let author = request.query.get("author").cloned();
//!     Ok(json!({ "author": author, "titles": [] }))
//! })
//! .id("books")
//! .options(ConfigOptions::new().tag("api"))
//! .build(&context);
//!
//! let by_tolkien = books.query(QueryValue::new().with("author", "tolkien"));
//! let value = by_tolkien.read().await?;
//! # Ok(())
//! # }
//! ```

use std::{future::Future, sync::Arc};

use futures::FutureExt;
use serde_json::Value;

use crate::{
    context::ProviderContext,
    node::{Definition, NamedQuery, Node, NodeMethod, NodeSpec, Source},
    options::{ConfigHook, ConfigOptions, NodeOptions},
    query::{QueryMergeFn, QueryValue, default_merge},
    types::{CallbackBounds, ReadFuture, ReadResult},
};

/// What a fetch routine is invoked with
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub node_id: String,
    /// Query value of the node (empty at the root)
    pub query: QueryValue,
    /// Arguments given to `read_with_args`
    pub args: Vec<Value>,
}

/// Fetch strategy of a provider
///
/// Implemented for every `Fn(FetchRequest) -> impl Future<Output = ReadResult>`.
pub trait Fetcher: CallbackBounds {
    fn fetch(&self, request: FetchRequest) -> ReadFuture;
}

impl<F, Fut> Fetcher for F
where
    F: Fn(FetchRequest) -> Fut + CallbackBounds,
    Fut: Future<Output = ReadResult> + Send + 'static,
{
    fn fetch(&self, request: FetchRequest) -> ReadFuture {
        self(request).boxed()
    }
}

/// Entry point for creating providers
pub struct Provider;

impl Provider {
    pub fn builder<F, Fut>(fetch: F) -> ProviderBuilder
    where
        F: Fn(FetchRequest) -> Fut + CallbackBounds,
        Fut: Future<Output = ReadResult> + Send + 'static,
    {
        Self::from_fetcher(fetch)
    }

    /// Builder around any [`Fetcher`] implementation
    pub fn from_fetcher<F: Fetcher>(fetcher: F) -> ProviderBuilder {
        ProviderBuilder {
            id: None,
            fetcher: Arc::new(fetcher),
            options: ConfigOptions::default(),
            merge: None,
            config_hook: None,
            queries: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Provider with default options and an auto-generated id
    pub fn new<F, Fut>(context: &ProviderContext, fetch: F) -> Node
    where
        F: Fn(FetchRequest) -> Fut + CallbackBounds,
        Fut: Future<Output = ReadResult> + Send + 'static,
    {
        Self::builder(fetch).build(context)
    }
}

pub struct ProviderBuilder {
    id: Option<String>,
    fetcher: Arc<dyn Fetcher>,
    options: ConfigOptions,
    merge: Option<QueryMergeFn>,
    config_hook: Option<ConfigHook>,
    queries: Vec<(String, NamedQuery)>,
    methods: Vec<(String, NodeMethod)>,
}

impl ProviderBuilder {
    /// Explicit id; collisions are resolved by suffixing
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn options(mut self, options: ConfigOptions) -> Self {
        self.options = options;
        self
    }

    /// Override how `query()` on a specialized node derives the new query value
    pub fn query_merge(mut self, merge: QueryMergeFn) -> Self {
        self.merge = Some(merge);
        self
    }

    /// Hook run after every `config()` with the resolved options
    pub fn on_config<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NodeOptions) + Send + Sync + 'static,
    {
        self.config_hook = Some(Arc::new(hook));
        self
    }

    /// Named query, see [`Node::add_query`]
    pub fn with_query<F>(mut self, name: impl Into<String>, query: F) -> Self
    where
        F: Fn(&[Value]) -> QueryValue + Send + Sync + 'static,
    {
        self.queries.push((name.into(), Arc::new(query)));
        self
    }

    /// Named method, see [`Node::add_method`]
    pub fn method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Node, Vec<Value>) -> ReadFuture + Send + Sync + 'static,
    {
        self.methods.push((name.into(), Arc::new(method)));
        self
    }

    /// Mutation helper invoked by [`Node::create`]
    pub fn create<F, Fut>(self, create: F) -> Self
    where
        F: Fn(Node, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReadResult> + Send + 'static,
    {
        self.method("create", move |node, mut args| {
            let value = args.pop().unwrap_or(Value::Null);
            create(node, value).boxed()
        })
    }

    /// Mutation helper invoked by [`Node::update`]
    pub fn update<F, Fut>(self, update: F) -> Self
    where
        F: Fn(Node, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReadResult> + Send + 'static,
    {
        self.method("update", move |node, mut args| {
            let value = args.pop().unwrap_or(Value::Null);
            update(node, value).boxed()
        })
    }

    /// Mutation helper invoked by [`Node::delete`]
    pub fn delete<F, Fut>(self, delete: F) -> Self
    where
        F: Fn(Node) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReadResult> + Send + 'static,
    {
        self.method("delete", move |node, _args| delete(node).boxed())
    }

    /// Register the provider in `context`
    pub fn build(self, context: &ProviderContext) -> Node {
        Node::register_root(
            context,
            NodeSpec {
                id: self.id,
                options: self.options,
                definition: Definition {
                    source: Source::Fetch(self.fetcher),
                    merge: self.merge.unwrap_or_else(default_merge),
                    config_hook: self.config_hook,
                    queries: std::sync::Mutex::new(self.queries.into_iter().collect()),
                    methods: std::sync::Mutex::new(self.methods.into_iter().collect()),
                },
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_fetch_receives_query_and_args() {
        let context = ProviderContext::new();
        let provider = Provider::new(&context, |request: FetchRequest| async move {
            Ok(json!({ "query": request.query, "args": request.args }))
        });
        let child = provider.query(QueryValue::new().with("page", 2));
        let value = child.read_with_args(vec![json!("extra")]).await.unwrap();
        assert_eq!(value, json!({ "query": { "page": 2 }, "args": ["extra"] }));
    }

    #[tokio::test]
    async fn test_update_helper_cleans_cache() {
        let context = ProviderContext::new();
        let fetches = Arc::new(AtomicU32::new(0));
        let counter = fetches.clone();
        let provider = Provider::builder(move |_req: FetchRequest| {
            let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(json!(count)) }
        })
        .update(|node: Node, value: Value| async move {
            node.clean_cache();
            Ok(value)
        })
        .build(&context);

        assert_eq!(provider.read().await, Ok(json!(1)));
        assert_eq!(provider.update(json!({"title": "new"})).await, Ok(json!({"title": "new"})));
        assert_eq!(provider.read().await, Ok(json!(2)));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_create_helper_runs_on_query_children() {
        let context = ProviderContext::new();
        let provider = Provider::builder(|request: FetchRequest| async move {
            Ok(request.query.to_value())
        })
        .id("books")
        .create(|node: Node, value: Value| async move {
            Ok(json!({ "node": node.id(), "created": value }))
        })
        .build(&context);
        let shelf = provider.query(QueryValue::new().with("shelf", 1));

        assert_eq!(context.registry().get_by_id("books"), Some(provider.clone()));
        assert_eq!(
            shelf.create(json!("Dune")).await,
            Ok(json!({ "node": shelf.id(), "created": "Dune" }))
        );
    }

    #[tokio::test]
    async fn test_missing_mutation_helper() {
        let context = ProviderContext::new();
        let provider = Provider::builder(|_req: FetchRequest| async { Ok(Value::Null) })
            .id("readonly")
            .build(&context);
        assert_eq!(
            provider.delete().await,
            Err(ProviderError::MissingMethod {
                node: "readonly".to_string(),
                method: "delete".to_string(),
            })
        );
    }
}
