//! # Selectors
//!
//! A selector is a node whose value is derived from other nodes. It is built from
//! a list of [`Dependency`] descriptors and a combinator:
//!
//! - top-level dependencies are read in order, so a factory may look at the
//!   results of the dependencies before it;
//! - a [`Dependency::Group`] is read concurrently and yields an array of results;
//! - a [`Dependency::Catch`] turns a dependency failure into a substitute value.
//!
//! Every concrete node a selector reads is watched: when it cleans its cache the
//! selector cleans its own, after its in-flight read (if any) has settled. Nodes
//! listed directly (also inside groups and catches) are watched as soon as the
//! selector is built; factory results and query-specialized dependencies are
//! only known once read, so they are watched on first read.
//!
//! ```rust,no_run
//! use data_provider::prelude::*;
//! use serde_json::{Value, json};
//!
//! # async fn example() -> ProviderResult<()> {
//! let context = ProviderContext::new();
//! let authors = Provider::builder(|_req: FetchRequest| async { Ok(json!(["Tolkien"])) })
//!     .id("authors")
//!     .build(&context);
//! let books = Provider::builder(|_req: FetchRequest| async { Ok(json!(["The Hobbit"])) })
//!     .id("books")
//!     .build(&context);
//!
//! let catalog = Selector::builder()
//!     .dependency(authors)
//!     .dependency(books)
//!     .combine(|results: Vec<Value>, _query: QueryValue| Ok(json!({
//!         "authors": results[0],
//!         "books": results[1],
//!     })))
//!     .build(&context);
//!
//! let value = catalog.read().await?;
//! # Ok(())
//! # }
//! ```

use std::{fmt, future::Future, sync::Arc};

use futures::{FutureExt, future};
use serde_json::Value;

use crate::{
    context::ProviderContext,
    errors::ProviderError,
    node::{Definition, Node, NodeSpec, Source},
    options::{ConfigHook, ConfigOptions, NodeOptions},
    query::{QueryMergeFn, QueryValue, default_merge},
    types::{ReadFuture, ReadResult},
};

/// Factory resolving a dependency lazily from the query and the previous results
pub type DependencyFactory = Arc<dyn Fn(&QueryValue, &[Value]) -> Dependency + Send + Sync>;

/// Recovery applied to a failed dependency: return a substitute or re-raise
pub type RecoverFn = Arc<dyn Fn(&ProviderError, &QueryValue) -> ReadResult + Send + Sync>;

/// Combines dependency results (positional) and the selector's query value
pub type Combinator = Arc<dyn Fn(Vec<Value>, QueryValue) -> ReadFuture + Send + Sync>;

/// Dependency descriptor of a selector
#[derive(Clone)]
pub enum Dependency {
    /// A provider or selector, specialized with the selector's query before reading
    Node(Node),
    /// Resolved on every read
    Factory(DependencyFactory),
    /// Read concurrently; yields an array of results
    Group(Vec<Dependency>),
    /// A dependency whose failure goes through `recover`
    Catch {
        dependency: Box<Dependency>,
        recover: RecoverFn,
    },
}

impl Dependency {
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&QueryValue, &[Value]) -> Dependency + Send + Sync + 'static,
    {
        Dependency::Factory(Arc::new(factory))
    }

    pub fn group<I, D>(dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dependency>,
    {
        Dependency::Group(dependencies.into_iter().map(Into::into).collect())
    }

    pub fn catch<D, F>(dependency: D, recover: F) -> Self
    where
        D: Into<Dependency>,
        F: Fn(&ProviderError, &QueryValue) -> ReadResult + Send + Sync + 'static,
    {
        Dependency::Catch {
            dependency: Box::new(dependency.into()),
            recover: Arc::new(recover),
        }
    }

    /// Resolve factories and apply `query` to nodes, preserving the nesting shape
    pub fn resolve(&self, query: Option<&QueryValue>, previous: &[Value]) -> ResolvedDependency {
        match self {
            Dependency::Node(node) => ResolvedDependency::Node(node.query_opt(query.cloned())),
            Dependency::Factory(factory) => {
                factory(&query.cloned().unwrap_or_default(), previous).resolve(query, previous)
            }
            Dependency::Group(dependencies) => ResolvedDependency::Group(
                dependencies
                    .iter()
                    .map(|dependency| dependency.resolve(query, previous))
                    .collect(),
            ),
            Dependency::Catch {
                dependency,
                recover,
            } => ResolvedDependency::Catch {
                dependency: Box::new(dependency.resolve(query, previous)),
                recover: recover.clone(),
            },
        }
    }
}

impl From<Node> for Dependency {
    fn from(node: Node) -> Self {
        Dependency::Node(node)
    }
}

impl From<&Node> for Dependency {
    fn from(node: &Node) -> Self {
        Dependency::Node(node.clone())
    }
}

impl From<Vec<Dependency>> for Dependency {
    fn from(dependencies: Vec<Dependency>) -> Self {
        Dependency::Group(dependencies)
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Node(node) => f.debug_tuple("Node").field(&node.id()).finish(),
            Dependency::Factory(_) => f.write_str("Factory(..)"),
            Dependency::Group(dependencies) => f.debug_list().entries(dependencies).finish(),
            Dependency::Catch { dependency, .. } => {
                f.debug_struct("Catch").field("dependency", dependency).finish()
            }
        }
    }
}

/// A dependency tree with factories called and queries applied
#[derive(Clone)]
pub enum ResolvedDependency {
    Node(Node),
    Group(Vec<ResolvedDependency>),
    Catch {
        dependency: Box<ResolvedDependency>,
        recover: RecoverFn,
    },
}

impl ResolvedDependency {
    /// The node when this is a plain node dependency
    pub fn node(&self) -> Option<&Node> {
        match self {
            ResolvedDependency::Node(node) => Some(node),
            _ => None,
        }
    }
}

impl fmt::Debug for ResolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedDependency::Node(node) => f.debug_tuple("Node").field(&node.id()).finish(),
            ResolvedDependency::Group(dependencies) => {
                f.debug_list().entries(dependencies).finish()
            }
            ResolvedDependency::Catch { dependency, .. } => {
                f.debug_struct("Catch").field("dependency", dependency).finish()
            }
        }
    }
}

pub(crate) struct Derivation {
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) combinator: Combinator,
}

/// Read routine of a selector node
pub(crate) fn derive(node: Node, derivation: Arc<Derivation>) -> ReadFuture {
    async move {
        let query = node.dependency_query();
        let mut results = Vec::with_capacity(derivation.dependencies.len());
        for dependency in &derivation.dependencies {
            let value = read_dependency(&node, dependency, query.as_ref(), &results).await?;
            results.push(value);
        }
        (derivation.combinator)(results, node.query_value()).await
    }
    .boxed()
}

/// Resolve and read one dependency. Node reads start before this returns.
fn read_dependency(
    selector: &Node,
    dependency: &Dependency,
    query: Option<&QueryValue>,
    previous: &[Value],
) -> ReadFuture {
    match dependency {
        Dependency::Node(node) => {
            let target = node.query_opt(query.cloned());
            selector.watch_dependency(&target);
            target.read()
        }
        Dependency::Factory(factory) => {
            let resolved = factory(&query.cloned().unwrap_or_default(), previous);
            read_dependency(selector, &resolved, query, previous)
        }
        Dependency::Group(dependencies) => {
            let reads: Vec<ReadFuture> = dependencies
                .iter()
                .map(|dependency| read_dependency(selector, dependency, query, previous))
                .collect();
            async move {
                let settled = future::join_all(reads).await;
                let values = settled.into_iter().collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(values))
            }
            .boxed()
        }
        Dependency::Catch {
            dependency,
            recover,
        } => {
            let read = read_dependency(selector, dependency, query, previous);
            let recover = recover.clone();
            let query = query.cloned().unwrap_or_default();
            async move {
                match read.await {
                    Ok(value) => Ok(value),
                    Err(error) => {
                        crate::debug_log!("🩹 [SELECTOR] Recovering dependency error: {}", error);
                        recover(&error, &query)
                    }
                }
            }
            .boxed()
        }
    }
}

/// Entry point for creating selectors
pub struct Selector;

impl Selector {
    pub fn builder() -> SelectorBuilder {
        SelectorBuilder::default()
    }
}

/// Collects dependencies, the combinator and options of a selector
#[derive(Default)]
pub struct SelectorBuilder {
    id: Option<String>,
    dependencies: Vec<Dependency>,
    options: ConfigOptions,
    merge: Option<QueryMergeFn>,
    config_hook: Option<ConfigHook>,
    combinator: Option<Combinator>,
}

impl SelectorBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn dependency(mut self, dependency: impl Into<Dependency>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn dependencies<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dependency>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn options(mut self, options: ConfigOptions) -> Self {
        self.options = options;
        self
    }

    pub fn query_merge(mut self, merge: QueryMergeFn) -> Self {
        self.merge = Some(merge);
        self
    }

    pub fn on_config<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NodeOptions) + Send + Sync + 'static,
    {
        self.config_hook = Some(Arc::new(hook));
        self
    }

    /// Synchronous combinator
    pub fn combine<F>(mut self, combine: F) -> Self
    where
        F: Fn(Vec<Value>, QueryValue) -> ReadResult + Send + Sync + 'static,
    {
        self.combinator = Some(Arc::new(move |results, query| {
            future::ready(combine(results, query)).boxed()
        }));
        self
    }

    /// Asynchronous combinator
    pub fn combine_async<F, Fut>(mut self, combine: F) -> Self
    where
        F: Fn(Vec<Value>, QueryValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReadResult> + Send + 'static,
    {
        self.combinator = Some(Arc::new(move |results, query| {
            combine(results, query).boxed()
        }));
        self
    }

    /// Register the selector in `context`
    ///
    /// Without a combinator the selector resolves to the array of dependency results.
    pub fn build(self, context: &ProviderContext) -> Node {
        let combinator = self.combinator.unwrap_or_else(|| {
            Arc::new(|results, _query| future::ready(Ok(Value::Array(results))).boxed())
        });
        let selector = Node::register_root(
            context,
            NodeSpec {
                id: self.id,
                options: self.options,
                definition: Definition {
                    source: Source::Derive(Arc::new(Derivation {
                        dependencies: self.dependencies,
                        combinator,
                    })),
                    merge: self.merge.unwrap_or_else(default_merge),
                    config_hook: self.config_hook,
                    queries: Default::default(),
                    methods: Default::default(),
                },
            },
        );
        if let Source::Derive(derivation) = selector.source() {
            watch_listed(&selector, &derivation.dependencies);
        }
        selector
    }
}

/// Watch the nodes listed directly in `dependencies`
fn watch_listed(selector: &Node, dependencies: &[Dependency]) {
    for dependency in dependencies {
        match dependency {
            Dependency::Node(node) => selector.watch_dependency(node),
            Dependency::Group(members) => watch_listed(selector, members),
            Dependency::Catch { dependency, .. } => {
                watch_listed(selector, std::slice::from_ref(&**dependency))
            }
            Dependency::Factory(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FetchRequest, Provider};
    use serde_json::json;

    fn constant(context: &ProviderContext, id: &str, value: Value) -> Node {
        Provider::builder(move |_req: FetchRequest| {
            let value = value.clone();
            async move { Ok(value) }
        })
        .id(id)
        .build(context)
    }

    #[test]
    fn test_resolve_preserves_shape() {
        let context = ProviderContext::new();
        let a = constant(&context, "a", json!(1));
        let b = constant(&context, "b", json!(2));
        let selector = Selector::builder()
            .dependency(&a)
            .dependency(Dependency::group([
                Dependency::from(&b),
                Dependency::catch(&a, |_, _| Ok(json!(0))),
            ]))
            .build(&context);

        let resolved = selector.resolve_dependencies().unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].node(), Some(&a));
        match &resolved[1] {
            ResolvedDependency::Group(members) => {
                assert_eq!(members[0].node(), Some(&b));
                match &members[1] {
                    ResolvedDependency::Catch { dependency, recover } => {
                        assert_eq!(dependency.node(), Some(&a));
                        let recovered = recover(&ProviderError::fetch("x"), &QueryValue::new());
                        assert_eq!(recovered, Ok(json!(0)));
                    }
                    other => panic!("expected catch, got {other:?}"),
                }
            }
            other => panic!("expected group, got {other:?}"),
        }
        // nothing was read
        assert_eq!(a.stats().actions.read_start, 0);
    }

    #[test]
    fn test_factory_resolved_with_query() {
        let context = ProviderContext::new();
        let books = constant(&context, "books", json!([]));
        let by_author = books.clone();
        let selector = Selector::builder()
            .dependency(Dependency::factory(move |query, _previous| {
                by_author
                    .query(QueryValue::new().with("author", query.get("id").cloned().unwrap_or_default()))
                    .into()
            }))
            .build(&context);

        let child = selector.query(QueryValue::new().with("id", 3));
        let resolved = child.resolve_dependencies().unwrap();
        let target = resolved[0].node().unwrap();
        assert_eq!(
            target.query_value(),
            QueryValue::new().with("author", 3).with("id", 3)
        );
    }

    #[test]
    fn test_plain_combinator_is_callable() {
        let context = ProviderContext::new();
        let selector = Selector::builder()
            .combine(|results, _| Ok(json!(results.len())))
            .build(&context);
        let combinator = selector.combinator().unwrap();
        let value = futures::executor::block_on(combinator(vec![json!(1), json!(2)], QueryValue::new()));
        assert_eq!(value, Ok(json!(2)));
    }
}
