use data_provider::prelude::*;
use futures::future::join_all;
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;
use tokio::time::sleep;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Provider resolving to the number of times it has been fetched
fn counting_provider(context: &ProviderContext, delay: Duration) -> (Node, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let provider = Provider::builder(move |_req: FetchRequest| {
        let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            sleep(delay).await;
            Ok(json!(value))
        }
    })
    .build(context);
    (provider, calls)
}

/// Provider failing on its first fetch only
fn flaky_provider(context: &ProviderContext) -> (Node, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let provider = Provider::builder(move |_req: FetchRequest| {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if call == 1 {
                Err(ProviderError::fetch("first call fails"))
            } else {
                Ok(json!("ok"))
            }
        }
    })
    .build(context);
    (provider, calls)
}

#[tokio::test(start_paused = true)]
async fn dedupes_synchronous_reads() {
    init_tracing();
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::from_millis(10));

    let reads: Vec<ReadFuture> = (0..5).map(|_| provider.read()).collect();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let results = join_all(reads).await;
    assert!(results.iter().all(|result| result == &Ok(json!(1))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.stats().actions.read_start, 1);
    assert_eq!(provider.stats().actions.read_success, 1);
}

#[tokio::test(start_paused = true)]
async fn serves_cached_value_until_cleaned() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::from_millis(10));

    assert_eq!(provider.read().await, Ok(json!(1)));
    assert_eq!(provider.read().await, Ok(json!(1)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(provider.cache_status().is_resolved());

    provider.clean_cache();
    assert!(provider.cache_status().is_empty());
    assert_eq!(provider.read().await, Ok(json!(2)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(provider.stats().actions.read_start, 2);
    assert_eq!(provider.stats().actions.clean_cache, 1);
}

#[tokio::test]
async fn rejections_are_not_cached() {
    let context = ProviderContext::new();
    let (provider, calls) = flaky_provider(&context);

    assert_eq!(
        provider.read().await,
        Err(ProviderError::fetch("first call fails"))
    );
    assert!(provider.cache_status().is_empty());
    let state = provider.state();
    assert!(state.is_error());
    assert!(!state.is_loading());

    assert_eq!(provider.read().await, Ok(json!("ok")));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(provider.stats().actions.read_error, 1);
    assert_eq!(provider.stats().actions.read_success, 1);
    assert!(provider.state().error.is_none());
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_the_rejection() {
    let context = ProviderContext::new();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let provider = Provider::new(&context, move |_req: FetchRequest| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            sleep(Duration::from_millis(5)).await;
            Err::<Value, _>(ProviderError::fetch("down"))
        }
    });

    let results = join_all([provider.read(), provider.read(), provider.read()]).await;
    assert!(
        results
            .iter()
            .all(|result| result == &Err(ProviderError::fetch("down")))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn clean_during_read_is_deferred() {
    init_tracing();
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::from_millis(50));

    let first = provider.read();
    provider.clean_cache();
    let second = provider.read();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(first.await, Ok(json!(1)));
    assert_eq!(second.await, Ok(json!(1)));
    // the deferred clean was applied once the read settled
    assert!(provider.cache_status().is_empty());
    assert_eq!(provider.stats().actions.clean_cache, 1);

    assert_eq!(provider.read().await, Ok(json!(2)));
}

#[tokio::test(start_paused = true)]
async fn forced_clean_starts_a_new_read() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::from_millis(50));

    let first = provider.read();
    provider.clean_cache_with(CleanCacheOptions::force());
    let second = provider.read();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert_eq!(first.await, Ok(json!(1)));
    assert_eq!(second.await, Ok(json!(2)));
    // the first read settled late and did not overwrite the newer entry
    assert_eq!(provider.read().await, Ok(json!(2)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_time_expires_entries() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::ZERO);
    provider.config(ConfigOptions::new().cache_time(Duration::from_millis(200)));

    provider.read().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    provider.read().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(200)).await;
    assert!(provider.cache_status().is_empty());
    provider.read().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_time_can_be_disabled() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::ZERO);
    provider.config(ConfigOptions::new().cache_time(Duration::from_millis(200)));
    provider.read().await.unwrap();

    provider.config(ConfigOptions::new().clear_cache_time());
    sleep(Duration::from_millis(300)).await;
    provider.read().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn extending_cache_time_keeps_the_entry() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::ZERO);
    provider.config(ConfigOptions::new().cache_time(Duration::from_millis(200)));
    provider.read().await.unwrap();

    provider.config(ConfigOptions::new().cache_time(Duration::from_secs(10)));
    sleep(Duration::from_millis(300)).await;
    assert!(provider.cache_status().is_resolved());
    provider.read().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn shortening_cache_time_counts_from_the_cached_time() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::ZERO);
    provider.config(ConfigOptions::new().cache_time(Duration::from_secs(10)));
    provider.read().await.unwrap();

    sleep(Duration::from_millis(100)).await;
    provider.config(ConfigOptions::new().cache_time(Duration::from_millis(150)));
    sleep(Duration::from_millis(30)).await;
    assert!(provider.cache_status().is_resolved());

    // the entry is 150ms old after another 20ms
    sleep(Duration::from_millis(30)).await;
    assert!(provider.cache_status().is_empty());
    provider.read().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn reapplying_clean_cache_interval_keeps_the_timer() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::ZERO);
    provider.config(ConfigOptions::new().clean_cache_interval(Duration::from_millis(100)));

    provider.read().await.unwrap();
    sleep(Duration::from_millis(60)).await;
    provider.config(ConfigOptions::new().clean_cache_interval(Duration::from_millis(100)));
    assert!(provider.cache_status().is_resolved());

    sleep(Duration::from_millis(50)).await;
    assert!(provider.cache_status().is_empty());
    provider.read().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    provider.config(ConfigOptions::new().clear_clean_cache_interval());
    sleep(Duration::from_millis(250)).await;
    assert!(provider.cache_status().is_resolved());
}

#[tokio::test(start_paused = true)]
async fn disabled_cache_refetches_but_still_dedupes() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::from_millis(10));
    provider.config(ConfigOptions::new().cache(false));

    join_all([provider.read(), provider.read()]).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    provider.read().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(provider.cache_status().is_empty());
}

#[tokio::test]
async fn config_keeps_existing_cache() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::ZERO);
    provider.read().await.unwrap();

    provider.config(ConfigOptions::new().tag("books"));
    provider.read().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(provider.has_tag("books"));
}

#[tokio::test]
async fn query_children_are_memoized() {
    let context = ProviderContext::new();
    let (provider, _calls) = counting_provider(&context, Duration::ZERO);

    let a = provider.query(QueryValue::new().with("author", 1).with("sort", "asc"));
    let b = provider.query(QueryValue::new().with("sort", "asc").with("author", 1));
    assert_eq!(a, b);
    assert_eq!(provider.query_opt(None), provider);
    assert_ne!(a, provider);
    assert_eq!(a.parent(), Some(provider.clone()));
    assert_eq!(provider.children().len(), 1);
}

#[tokio::test]
async fn nested_queries_form_a_tree() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::ZERO);
    let author = provider.query(QueryValue::new().with("author", 1));
    let page = author.query(QueryValue::new().with("page", 2));

    assert_eq!(page.parent(), Some(author.clone()));
    assert_eq!(author.parent(), Some(provider.clone()));
    assert_eq!(author.children(), vec![page.clone()]);
    assert_eq!(provider.children(), vec![author.clone()]);
    assert_eq!(provider.descendants().len(), 2);

    let seen = Arc::new(AtomicU32::new(0));
    let counter = seen.clone();
    let _subscription = author.on_child(EventKind::ReadSuccess, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    for node in [&provider, &author, &page] {
        node.read().await.unwrap();
    }
    // the root is not below `author`
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    author.clean_cache();
    assert!(author.cache_status().is_empty());
    assert!(page.cache_status().is_empty());
    assert!(provider.cache_status().is_resolved());

    author.config(ConfigOptions::new().tag("scoped"));
    assert!(page.has_tag("scoped"));
    assert!(!provider.has_tag("scoped"));

    page.read().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn scoped_queries_inherit_values() {
    let context = ProviderContext::new();
    let (provider, _calls) = counting_provider(&context, Duration::ZERO);

    let mut foo = QueryValue::new().with("foo", "foo");
    let scoped = provider
        .query(foo.clone())
        .query(QueryValue::new().with("var", "var"));
    foo.insert("foo", "changed");

    assert_eq!(
        scoped.query_value(),
        QueryValue::try_from(json!({"foo": "foo", "var": "var"})).unwrap()
    );
    // the same logical query reached directly is the same node
    assert_eq!(
        provider.query(QueryValue::try_from(json!({"var": "var", "foo": "foo"})).unwrap()),
        scoped
    );
}

#[tokio::test]
async fn query_children_cache_independently() {
    let context = ProviderContext::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let provider = Provider::new(&context, move |request: FetchRequest| {
        recorder.lock().unwrap().push(request.query.clone());
        async move { Ok(request.query.to_value()) }
    });

    let first = provider.query(QueryValue::new().with("page", 1));
    let second = provider.query(QueryValue::new().with("page", 2));
    assert_eq!(first.read().await, Ok(json!({"page": 1})));
    assert_eq!(second.read().await, Ok(json!({"page": 2})));
    assert_eq!(first.read().await, Ok(json!({"page": 1})));
    assert_eq!(seen.lock().unwrap().len(), 2);

    // cleaning the root cleans its query children
    provider.clean_cache();
    assert!(first.cache_status().is_empty());
    assert!(second.cache_status().is_empty());
}

#[tokio::test]
async fn named_queries_apply_to_children() {
    let context = ProviderContext::new();
    let provider = Provider::builder(|request: FetchRequest| async move { Ok(request.query.to_value()) })
        .with_query("byAuthor", |args| QueryValue::new().with("author", args[0].clone()))
        .build(&context);
    provider.add_query("page", |args| QueryValue::new().with("page", args[0].clone()));

    let by_author = provider.named_query("byAuthor", &[json!(7)]).unwrap();
    let paged = by_author.named_query("page", &[json!(2)]).unwrap();
    assert_eq!(paged.read().await, Ok(json!({"author": 7, "page": 2})));

    assert!(matches!(
        provider.named_query("missing", &[]),
        Err(ProviderError::MissingQuery { .. })
    ));
}

#[tokio::test]
async fn state_tracks_reads_and_resets() {
    let context = ProviderContext::new();
    let provider = Provider::builder(|_req: FetchRequest| async { Ok(json!(["x"])) })
        .options(ConfigOptions::new().initial_state(json!([])))
        .build(&context);

    assert_eq!(provider.state().data, Some(json!([])));
    let loading = provider.read();
    assert!(provider.state().is_loading());
    loading.await.unwrap();
    assert_eq!(provider.state().data, Some(json!(["x"])));

    // state survives a cache clean
    provider.clean_cache();
    assert_eq!(provider.state().data, Some(json!(["x"])));

    provider.reset_state();
    assert_eq!(provider.state(), NodeState::initial(Some(json!([]))));
    assert_eq!(provider.stats().actions.reset_state, 1);
}

#[tokio::test]
async fn initial_state_from_query() {
    let context = ProviderContext::new();
    let provider = Provider::builder(|_req: FetchRequest| async { Ok(Value::Null) })
        .options(ConfigOptions::new().initial_state(InitialState::from_query(|query| {
            query.get("page").cloned()
        })))
        .build(&context);

    assert_eq!(provider.state().data, None);
    let child = provider.query(QueryValue::new().with("page", 4));
    assert_eq!(child.state().data, Some(json!(4)));
}

#[tokio::test]
async fn reset_stats_recurses_to_children() {
    let context = ProviderContext::new();
    let (provider, _calls) = counting_provider(&context, Duration::ZERO);
    let child = provider.query(QueryValue::new().with("id", 1));
    provider.read().await.unwrap();
    child.read().await.unwrap();
    assert_eq!(child.stats().actions.init, 1);

    provider.reset_stats();
    assert_eq!(provider.stats(), Stats::default());
    assert_eq!(child.stats(), Stats::default());
    // cache untouched
    assert!(child.cache_status().is_resolved());
}

#[tokio::test]
async fn on_child_sees_descendant_events() {
    let context = ProviderContext::new();
    let (provider, _calls) = counting_provider(&context, Duration::ZERO);
    let own = Arc::new(AtomicU32::new(0));
    let all = Arc::new(AtomicU32::new(0));
    let own_counter = own.clone();
    let all_counter = all.clone();
    let _own = provider.on(EventKind::ReadSuccess, move |_| {
        own_counter.fetch_add(1, Ordering::SeqCst);
    });
    let _all = provider.on_child(EventKind::ReadSuccess, move |_| {
        all_counter.fetch_add(1, Ordering::SeqCst);
    });

    provider.read().await.unwrap();
    provider.query(QueryValue::new().with("id", 1)).read().await.unwrap();
    provider.query(QueryValue::new().with("id", 2)).read().await.unwrap();

    assert_eq!(own.load(Ordering::SeqCst), 1);
    assert_eq!(all.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn once_and_unsubscribe() {
    let context = ProviderContext::new();
    let (provider, _calls) = counting_provider(&context, Duration::ZERO);
    let cleans = Arc::new(AtomicU32::new(0));
    let counter = cleans.clone();
    let subscription = provider.on(EventKind::CleanCache, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let once = Arc::new(AtomicU32::new(0));
    let once_counter = once.clone();
    let _ = provider.once(EventKind::CleanCache, move |_| {
        once_counter.fetch_add(1, Ordering::SeqCst);
    });

    for _ in 0..2 {
        provider.read().await.unwrap();
        provider.clean_cache();
    }
    assert!(subscription.unsubscribe());
    provider.read().await.unwrap();
    provider.clean_cache();

    assert_eq!(cleans.load(Ordering::SeqCst), 2);
    assert_eq!(once.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cleaning_an_empty_cache_is_a_no_op() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::ZERO);
    let cleans = Arc::new(AtomicU32::new(0));
    let counter = cleans.clone();
    let _subscription = provider.on(EventKind::CleanCache, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    provider.clean_cache();
    provider.clean_cache();
    assert_eq!(cleans.load(Ordering::SeqCst), 0);
    assert_eq!(provider.stats().actions.clean_cache, 0);

    provider.read().await.unwrap();
    provider.clean_cache();
    provider.clean_cache();
    assert_eq!(cleans.load(Ordering::SeqCst), 1);
    assert_eq!(provider.stats().actions.clean_cache, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn read_as_deserializes() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Book {
        title: String,
    }

    let context = ProviderContext::new();
    let provider = Provider::new(&context, |_req: FetchRequest| async {
        Ok(json!([{ "title": "The Hobbit" }]))
    });
    let books: Vec<Book> = provider.read_as().await.unwrap();
    assert_eq!(
        books,
        vec![Book {
            title: "The Hobbit".to_string()
        }]
    );
    assert!(matches!(
        provider.read_as::<u32>().await,
        Err(ProviderError::Serialization(_))
    ));
}

#[test]
fn read_requires_a_runtime() {
    let context = ProviderContext::new();
    let (provider, calls) = counting_provider(&context, Duration::ZERO);
    let result = futures::executor::block_on(provider.read());
    assert!(matches!(result, Err(ProviderError::Configuration(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
