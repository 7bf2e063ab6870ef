use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use insightgraph_common::InsightError;
use insightgraph_ingest::testing::{
    register, FailingPlugin, PanickingPlugin, SlowPlugin, StaticPlugin,
};
use insightgraph_ingest::{FetchBatch, Orchestrator, OrchestratorConfig, SourceErrorReason};
use insightgraph_sources::{FetchParams, PluginRegistry, SearchFilters};

fn orchestrator(registry: PluginRegistry, config: OrchestratorConfig) -> Orchestrator {
    Orchestrator::new(Arc::new(registry), config)
}

fn ids_for<'a>(items: &'a [insightgraph_common::ContentItem], source_id: &str) -> Vec<&'a str> {
    items
        .iter()
        .filter(|i| i.source_id == source_id)
        .map(|i| i.id.as_str())
        .collect()
}

#[tokio::test]
async fn failing_source_does_not_affect_siblings() {
    let registry = PluginRegistry::new();
    register(&registry, "youtube", StaticPlugin::numbered("youtube", 3));
    register(&registry, "reddit", FailingPlugin::after("reddit", 2));
    register(&registry, "newsletter", StaticPlugin::numbered("newsletter", 4));
    let orchestrator = orchestrator(registry, OrchestratorConfig::default());

    let batch = FetchBatch::for_sources(["youtube", "reddit", "newsletter"], FetchParams::default());
    let result = orchestrator.run(&batch).await;

    assert_eq!(ids_for(&result.items, "youtube").len(), 3);
    assert_eq!(ids_for(&result.items, "newsletter").len(), 4);
    // Items yielded before the failure are kept.
    assert_eq!(ids_for(&result.items, "reddit").len(), 2);

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].source_id, "reddit");
    match &result.errors[0].reason {
        SourceErrorReason::FetchFailed(msg) => assert!(msg.contains("503"), "{msg}"),
        other => panic!("unexpected reason {other:?}"),
    }
}

#[tokio::test]
async fn unregistered_sources_are_reported_and_skipped() {
    let registry = PluginRegistry::new();
    register(&registry, "a", StaticPlugin::numbered("a", 1));
    let orchestrator = orchestrator(registry, OrchestratorConfig::default());

    let batch = FetchBatch::new()
        .push("ghost", FetchParams::default())
        .push("a", FetchParams::default());
    let result = orchestrator.run(&batch).await;

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].source_id, "ghost");
    assert_eq!(result.errors[0].reason, SourceErrorReason::Unregistered);
}

#[tokio::test(start_paused = true)]
async fn fifty_sources_with_ten_unregistered_finish_within_one_budget() {
    let budget = Duration::from_secs(2);
    let registry = PluginRegistry::new();
    let mut ids = Vec::new();
    for n in 0..50 {
        let id = format!("src-{n}");
        if n % 5 != 0 {
            register(&registry, &id, SlowPlugin::every(&id, Duration::from_millis(300)));
        }
        ids.push(id);
    }
    // Default concurrency (32) is below the 40 registered sources, so some
    // sources queue for a permit.
    let config = OrchestratorConfig {
        source_time_budget: budget,
        ..OrchestratorConfig::default()
    };
    assert!(config.max_concurrency < 40);
    let orchestrator = orchestrator(registry, config.clone());

    let started = Instant::now();
    let result = orchestrator.run(&FetchBatch::for_sources(&ids, FetchParams::default())).await;
    let elapsed = started.elapsed();

    assert!(elapsed < budget + Duration::from_millis(500), "took {elapsed:?}");
    assert_eq!(result.errors.len(), 10);
    assert!(result
        .errors
        .iter()
        .all(|e| e.reason == SourceErrorReason::Unregistered));
    let progressed = ids
        .iter()
        .enumerate()
        .filter(|(n, id)| n % 5 != 0 && !ids_for(&result.items, id).is_empty())
        .count();
    assert!(progressed >= config.max_concurrency, "{progressed} sources made progress");
}

#[tokio::test(start_paused = true)]
async fn queued_source_spends_its_budget_while_waiting() {
    let registry = PluginRegistry::new();
    register(&registry, "first", SlowPlugin::every("first", Duration::from_secs(1)));
    register(&registry, "second", SlowPlugin::every("second", Duration::from_secs(1)));
    let config = OrchestratorConfig {
        source_time_budget: Duration::from_millis(2_500),
        max_concurrency: 1,
        ..OrchestratorConfig::default()
    };
    let orchestrator = orchestrator(registry, config);

    let started = Instant::now();
    let result = orchestrator
        .run(&FetchBatch::for_sources(["first", "second"], FetchParams::default()))
        .await;

    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert_eq!(ids_for(&result.items, "first").len(), 2);
    assert!(ids_for(&result.items, "second").is_empty());
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn item_cap_is_partial_success() {
    let registry = PluginRegistry::new();
    register(&registry, "big", StaticPlugin::numbered("big", 25));
    let config = OrchestratorConfig {
        max_items_per_source: 10,
        ..OrchestratorConfig::default()
    };
    let orchestrator = orchestrator(registry, config);

    let result = orchestrator
        .run(&FetchBatch::for_sources(["big"], FetchParams::default()))
        .await;
    assert_eq!(result.items.len(), 10);
    assert!(result.errors.is_empty());
    // The cap keeps the first items in yield order.
    assert_eq!(result.items[0].id, "big_item-0");
    assert_eq!(result.items[9].id, "big_item-9");
}

#[tokio::test(start_paused = true)]
async fn time_budget_is_partial_success() {
    let registry = PluginRegistry::new();
    register(&registry, "drip", SlowPlugin::every("drip", Duration::from_secs(1)));
    let config = OrchestratorConfig {
        source_time_budget: Duration::from_millis(3_500),
        ..OrchestratorConfig::default()
    };
    let orchestrator = orchestrator(registry, config);

    let result = orchestrator
        .run(&FetchBatch::for_sources(["drip"], FetchParams::default()))
        .await;
    assert_eq!(result.items.len(), 3);
    assert!(result.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deadline_reports_timeout_and_keeps_items() {
    let registry = PluginRegistry::new();
    register(&registry, "drip", SlowPlugin::every("drip", Duration::from_secs(1)));
    register(&registry, "quick", StaticPlugin::numbered("quick", 2));
    let config = OrchestratorConfig {
        deadline: Some(Duration::from_millis(2_500)),
        ..OrchestratorConfig::default()
    };
    let orchestrator = orchestrator(registry, config);

    let result = orchestrator
        .run(&FetchBatch::for_sources(["drip", "quick"], FetchParams::default()))
        .await;
    assert_eq!(ids_for(&result.items, "drip").len(), 2);
    assert_eq!(ids_for(&result.items, "quick").len(), 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].source_id, "drip");
    assert_eq!(result.errors[0].reason, SourceErrorReason::Timeout);
}

#[tokio::test(start_paused = true)]
async fn cancel_handle_stops_in_flight_sources() {
    let registry = PluginRegistry::new();
    register(&registry, "drip", SlowPlugin::every("drip", Duration::from_secs(1)));
    let orchestrator = Arc::new(orchestrator(registry, OrchestratorConfig::default()));
    let cancel = orchestrator.cancel_handle();

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .run(&FetchBatch::for_sources(["drip"], FetchParams::default()))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    cancel.cancel();

    let result = run.await.unwrap();
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.errors[0].reason, SourceErrorReason::Timeout);
}

#[tokio::test]
async fn panicking_source_is_isolated() {
    let registry = PluginRegistry::new();
    register(&registry, "buggy", PanickingPlugin::after("buggy", 2));
    register(&registry, "fine", StaticPlugin::numbered("fine", 3));
    let orchestrator = orchestrator(registry, OrchestratorConfig::default());

    let result = orchestrator
        .run(&FetchBatch::for_sources(["buggy", "fine"], FetchParams::default()))
        .await;
    assert_eq!(ids_for(&result.items, "buggy").len(), 2);
    assert_eq!(ids_for(&result.items, "fine").len(), 3);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].source_id, "buggy");
    assert_eq!(result.errors[0].reason, SourceErrorReason::Panicked);
}

#[tokio::test]
async fn items_keep_per_source_yield_order() {
    let registry = PluginRegistry::new();
    register(&registry, "a", StaticPlugin::numbered("a", 20));
    register(&registry, "b", StaticPlugin::numbered("b", 20));
    let orchestrator = orchestrator(registry, OrchestratorConfig::default());

    let result = orchestrator
        .run(&FetchBatch::for_sources(["a", "b"], FetchParams::default()))
        .await;
    let expected: Vec<String> = (0..20).map(|n| format!("a_item-{n}")).collect();
    assert_eq!(ids_for(&result.items, "a"), expected);
}

#[tokio::test]
async fn fetch_params_reach_the_plugin() {
    let registry = PluginRegistry::new();
    register(&registry, "a", StaticPlugin::numbered("a", 20));
    let orchestrator = orchestrator(registry, OrchestratorConfig::default());

    let result = orchestrator
        .run(&FetchBatch::for_sources(["a"], FetchParams::default().limit(4)))
        .await;
    assert_eq!(result.items.len(), 4);
}

#[tokio::test]
async fn search_requires_the_capability() {
    let registry = PluginRegistry::new();
    register(&registry, "plain", StaticPlugin::numbered("plain", 3));
    register(&registry, "searchable", StaticPlugin::numbered("searchable", 3).searchable());
    let orchestrator = orchestrator(registry, OrchestratorConfig::default());

    let err = orchestrator
        .search("plain", "item", &SearchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, InsightError::CapabilityUnsupported { .. }));

    let hits = orchestrator
        .search("searchable", "item 1", &SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    let err = orchestrator
        .search("ghost", "x", &SearchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, InsightError::NotFound(_)));
}
