//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on engine operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use fleetsim_storage::{EngineFactory, testutil::memory_config, testutil::memory_engine};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn collect() -> (Arc<Mutex<Vec<String>>>, tracing::subscriber::DefaultGuard) {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    (spans, tracing::subscriber::set_default(subscriber))
}

fn assert_span(spans: &Arc<Mutex<Vec<String>>>, name: &str) {
    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_and_get_create_spans() {
    let (spans, _guard) = collect();

    let engine = memory_engine("c");
    engine.create(engine.build_record("a")).await.expect("create");
    engine.get("a").await.expect("get");

    assert_span(&spans, "create");
    assert_span(&spans, "get");
}

#[tokio::test]
async fn lock_operations_create_spans() {
    let (spans, _guard) = collect();

    let engine = memory_engine("c");
    engine.create(engine.build_record("a")).await.expect("create");
    engine.try_to_lock("a", "n1", "partition", 5).await.expect("lock");
    engine.try_to_unlock("a", "n1", "partition").await.expect("unlock");

    assert_span(&spans, "try_to_lock");
    assert_span(&spans, "try_to_unlock");
}

#[tokio::test]
async fn bulk_delete_creates_span() {
    let (spans, _guard) = collect();

    let engine = memory_engine("c");
    engine.delete_multi(["a", "b"]).await.expect("delete_multi");

    assert_span(&spans, "delete_multi");
}

#[tokio::test]
async fn health_check_creates_span() {
    let (spans, _guard) = collect();

    let engine = memory_engine("c");
    engine.health_check().await.expect("health");

    assert_span(&spans, "health_check");
}

#[tokio::test]
async fn factory_create_creates_span() {
    let (spans, _guard) = collect();

    EngineFactory::new().create(&memory_config("c")).expect("factory create");

    assert_span(&spans, "create");
}
