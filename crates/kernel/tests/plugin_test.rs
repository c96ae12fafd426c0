//! Integration tests for the plugin loader.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test plugin_test
//! ```
//!
//! No database is needed: fake plugins never query the pool.
//!
//! ## Test Coverage
//!
//! - End-to-end activation in dependency order
//! - Route conflict, hook failure, panic and timeout isolation
//! - Cleanup of plugins whose startup failed
//! - Transactional rollback of route claims
//! - Disabled plugins and configuration overrides
//! - Fatal resolution errors
//! - Reverse-order shutdown and full reload, including abandoned reloads

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use marketplace_kernel::plugin::{ConfigOverrides, PluginCatalog, PluginError};
use marketplace_sdk::PluginConfig;
use marketplace_test_utils::{CallLog, FakePlugin, lazy_pool};
use serde_json::{Map, Value, json};

fn table(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn catalog(plugins: &[FakePlugin]) -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    for plugin in plugins {
        catalog.register(
            format!("{}_module", plugin.descriptor().slug),
            plugin.factory(),
        );
    }
    catalog
}

/// {A, B(A), C(A)} activates A first and all three succeed.
#[tokio::test]
async fn end_to_end_activation() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("a").route("/a").with_log(&log),
        FakePlugin::new("b")
            .depends_on("a")
            .with_routes(["/b", "/b/items"])
            .with_log(&log),
        FakePlugin::new("c").depends_on("a").route("/c").with_log(&log),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.order[0], "a");
    assert_eq!(outcome.report.active.len(), 3);
    assert!(outcome.report.failed.is_empty());
    assert_eq!(outcome.report.generation, 1);
    assert_eq!(loader.registry().len(), 3);
    assert_eq!(loader.registry().routes().len(), 4);
    assert_eq!(loader.registry().route_owner("/b/items"), Some("b"));

    // Hooks run strictly in activation order.
    assert_eq!(log.calls_to("init_db"), outcome.report.order);
    assert_eq!(log.calls_to("on_startup"), outcome.report.order);
}

/// Each plugin finishes every hook before the next one starts.
#[tokio::test]
async fn hooks_do_not_interleave() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("a").with_log(&log),
        FakePlugin::new("b").depends_on("a").with_log(&log),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());
    loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(
        log.events(),
        vec![
            "a:register_routes",
            "a:register_routes",
            "a:init_db",
            "a:on_startup",
            "b:register_routes",
            "b:register_routes",
            "b:init_db",
            "b:on_startup",
        ]
    );
}

#[tokio::test]
async fn route_conflict_excludes_second_claimant() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("status").route("/health").with_log(&log),
        FakePlugin::new("monitor").route("/health").with_log(&log),
        FakePlugin::new("search").route("/search").with_log(&log),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.active, vec!["status", "search"]);
    assert_eq!(loader.registry().route_owner("/health"), Some("status"));
    assert!(!loader.registry().contains("monitor"));

    let failure = &outcome.report.failed[0];
    assert_eq!(failure.slug, "monitor");
    assert_eq!(failure.module, "monitor_module");
    assert!(failure.error.contains("/health"));
    assert!(failure.error.contains("status"));

    // The conflict is found before any hook runs.
    assert_eq!(log.calls_to("init_db"), vec!["status", "search"]);
}

#[tokio::test]
async fn failed_activation_releases_claimed_routes() {
    let plugins = [
        FakePlugin::new("a").route("/shared"),
        // Claims /b, then hits the conflict on /shared.
        FakePlugin::new("b").with_routes(["/b", "/shared"]),
        FakePlugin::new("c").route("/b"),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.active, vec!["a", "c"]);
    assert_eq!(loader.registry().route_owner("/b"), Some("c"));
    assert!(loader.registry().routes().values().all(|owner| owner != "b"));
}

#[tokio::test]
async fn init_db_failure_is_isolated() {
    let plugins = [
        FakePlugin::new("a").route("/a"),
        FakePlugin::new("b").route("/b").fail_init_db(),
        FakePlugin::new("c").route("/c"),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.active, vec!["a", "c"]);
    assert_eq!(loader.registry().slugs(), vec!["a", "c"]);
    assert_eq!(loader.registry().route_owner("/b"), None);

    let failure = &outcome.report.failed[0];
    assert_eq!(failure.slug, "b");
    assert!(failure.error.contains("init_db"));
    assert!(failure.error.contains("table creation refused"));
}

#[tokio::test]
async fn startup_failure_excludes_dependents() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("payments").fail_startup().with_log(&log),
        FakePlugin::new("wallet").depends_on("payments").with_log(&log),
        FakePlugin::new("search").with_log(&log),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.active, vec!["search"]);
    let wallet = outcome
        .report
        .failed
        .iter()
        .find(|f| f.slug == "wallet")
        .unwrap();
    assert!(wallet.error.contains("'payments' is not active"));
    assert!(!log.touched("wallet"));
}

#[tokio::test]
async fn panicking_route_registration_is_isolated() {
    let plugins = [
        FakePlugin::new("a").route("/a"),
        FakePlugin::new("b").route("/b").panic_in_routes(),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.active, vec!["a"]);
    assert!(outcome.report.failed[0].error.contains("panicked"));
}

#[tokio::test]
async fn panicking_hooks_are_isolated() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("a").route("/a").with_log(&log),
        FakePlugin::new("b").route("/b").panic_in_init_db().with_log(&log),
        FakePlugin::new("c").route("/c").with_log(&log),
        FakePlugin::new("d").route("/d").panic_in_startup().with_log(&log),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.active, vec!["a", "c"]);
    let failed: Vec<&str> = outcome.report.failed.iter().map(|f| f.slug.as_str()).collect();
    assert_eq!(failed, vec!["b", "d"]);
    assert!(outcome.report.failed[0].error.contains("init_db failed: panicked"));
    assert!(outcome.report.failed[0].error.contains("b init_db exploded"));
    assert!(outcome.report.failed[1].error.contains("on_startup failed: panicked"));

    assert_eq!(loader.registry().route_owner("/b"), None);
    assert_eq!(loader.registry().route_owner("/d"), None);
    assert_eq!(loader.registry().slugs(), vec!["a", "c"]);
}

#[tokio::test]
async fn failed_startup_is_shut_down_once() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("payments").fail_startup().with_log(&log),
        FakePlugin::new("ledger").fail_init_db().with_log(&log),
        FakePlugin::new("search").with_log(&log),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());
    let db = lazy_pool();

    loader.load_all(&db).await.unwrap();
    // Startup ran, so cleanup runs; init_db failures never reach startup.
    assert_eq!(log.calls_to("on_shutdown"), vec!["payments"]);

    loader.shutdown_all(&db).await;
    assert_eq!(log.calls_to("on_shutdown"), vec!["payments", "search"]);
}

#[tokio::test]
async fn slow_hook_times_out() {
    let plugins = [
        FakePlugin::new("slow").slow_startup(Duration::from_secs(10)),
        FakePlugin::new("fast"),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.active, vec!["fast"]);
    assert!(outcome.report.failed[0].error.contains("timed out"));
}

#[tokio::test]
async fn disabled_plugin_is_skipped_entirely() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("a").route("/a").with_log(&log),
        FakePlugin::new("b").route("/b").with_log(&log),
    ];
    let overrides = ConfigOverrides::new().with("b", table(json!({ "enabled": false })));
    let mut loader = common::loader(catalog(&plugins), overrides);

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.active, vec!["a"]);
    assert_eq!(outcome.report.disabled, vec!["b"]);
    assert!(outcome.report.failed.is_empty());
    assert!(!loader.registry().contains("b"));
    assert_eq!(loader.registry().route_owner("/b"), None);
    assert!(!log.touched("b"));
}

#[tokio::test]
async fn force_disabled_plugin_excludes_dependents() {
    let plugins = [
        FakePlugin::new("cart"),
        FakePlugin::new("orders").depends_on("cart"),
    ];
    let overrides = ConfigOverrides::new().disable(["cart"]);
    let mut loader = common::loader(catalog(&plugins), overrides);

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert!(outcome.report.active.is_empty());
    assert_eq!(outcome.report.disabled, vec!["cart"]);
    assert_eq!(outcome.report.failed[0].slug, "orders");
}

#[tokio::test]
async fn overrides_reach_plugin_config() {
    let plugin = FakePlugin::new("cart").with_schema(marketplace_sdk::ConfigSchema::from_defaults(
        table(json!({ "max_items": 50, "currency": "EUR" })),
    ));
    let overrides = ConfigOverrides::new().with("cart", table(json!({ "max_items": 5 })));
    let mut loader = common::loader(catalog(&[plugin]), overrides);

    loader.load_all(&lazy_pool()).await.unwrap();

    let metadata = loader.registry().get("cart").unwrap().metadata();
    assert_eq!(metadata.config.settings["max_items"], 5);
    assert_eq!(metadata.config.settings["currency"], "EUR");
}

#[tokio::test]
async fn invalid_enabled_flag_fails_only_that_plugin() {
    let plugins = [FakePlugin::new("a"), FakePlugin::new("b")];
    let overrides = ConfigOverrides::new().with("a", table(json!({ "enabled": "yes" })));
    let mut loader = common::loader(catalog(&plugins), overrides);

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.active, vec!["b"]);
    assert!(outcome.report.failed[0].error.contains("invalid configuration"));
}

#[tokio::test]
async fn constructor_rejecting_config_fails_only_that_plugin() {
    let fake = FakePlugin::new("picky");
    let build = fake.factory();
    let catalog = PluginCatalog::new()
        .with("picky_module", move |config: PluginConfig| {
            if config.settings.contains_key("explode") {
                anyhow::bail!("explode is not a supported setting");
            }
            build(config)
        })
        .with("calm_module", FakePlugin::new("calm").factory());
    let overrides = ConfigOverrides::new().with("picky", table(json!({ "explode": true })));
    let mut loader = common::loader(catalog, overrides);

    let outcome = loader.load_all(&lazy_pool()).await.unwrap();

    assert_eq!(outcome.report.active, vec!["calm"]);
    let failure = &outcome.report.failed[0];
    assert_eq!(failure.module, "picky_module");
    assert!(failure.error.contains("explode is not a supported setting"));
}

#[tokio::test]
async fn cycle_aborts_whole_cycle() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("standalone").with_log(&log),
        FakePlugin::new("a").depends_on("b").with_log(&log),
        FakePlugin::new("b").depends_on("a").with_log(&log),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let err = loader.load_all(&lazy_pool()).await.err().unwrap();

    match err {
        PluginError::CircularDependency { plugins } => assert_eq!(plugins, vec!["a", "b"]),
        other => panic!("expected a cycle, got {other}"),
    }
    assert!(loader.registry().is_empty());
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn self_dependency_aborts_whole_cycle() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("a").depends_on("a").with_log(&log),
        FakePlugin::new("b").with_log(&log),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let err = loader.load_all(&lazy_pool()).await.err().unwrap();
    assert!(err.is_fatal());
    match err {
        PluginError::CircularDependency { plugins } => assert_eq!(plugins, vec!["a"]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!log.touched("b"));
}

#[tokio::test]
async fn missing_dependency_aborts_whole_cycle() {
    let plugins = [FakePlugin::new("a"), FakePlugin::new("c").depends_on("z")];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());

    let err = loader.load_all(&lazy_pool()).await.err().unwrap();

    assert!(err.is_fatal());
    let msg = err.to_string();
    assert!(msg.contains("'c'"));
    assert!(msg.contains("'z'"));
    assert!(loader.registry().is_empty());
}

#[tokio::test]
async fn duplicate_slug_aborts_whole_cycle() {
    let catalog = PluginCatalog::new()
        .with("wallet_v1", FakePlugin::new("wallet").factory())
        .with("wallet_v2", FakePlugin::new("wallet").factory());
    let mut loader = common::loader(catalog, ConfigOverrides::new());

    let err = loader.load_all(&lazy_pool()).await.err().unwrap();
    assert!(matches!(err, PluginError::DuplicateSlug { .. }));
}

#[tokio::test]
async fn shutdown_runs_in_reverse_order() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("products").with_log(&log),
        FakePlugin::new("cart")
            .depends_on("products")
            .fail_shutdown()
            .with_log(&log),
        FakePlugin::new("orders").depends_on("cart").with_log(&log),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());
    let db = lazy_pool();

    loader.load_all(&db).await.unwrap();
    loader.shutdown_all(&db).await;

    // A failing hook does not stop the sweep.
    assert_eq!(
        log.calls_to("on_shutdown"),
        vec!["orders", "cart", "products"]
    );
    assert!(loader.registry().is_empty());
    assert!(loader.registry().routes().is_empty());
}

#[tokio::test]
async fn repeated_cycles_start_fresh() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("a").route("/a").with_log(&log),
        FakePlugin::new("b").route("/b").with_log(&log),
    ];
    let mut loader = common::loader(catalog(&plugins), ConfigOverrides::new());
    let db = lazy_pool();

    let first = loader.load_all(&db).await.unwrap();
    let second = loader.load_all(&db).await.unwrap();

    assert_eq!(first.report.order, second.report.order);
    assert_eq!(second.report.generation, 2);
    assert_eq!(second.report.active, vec!["a", "b"]);
    assert_eq!(loader.registry().len(), 2);
    assert_eq!(loader.registry().routes().len(), 2);
    assert_eq!(log.calls_to("init_db"), vec!["a", "b", "a", "b"]);
}

#[tokio::test]
async fn runtime_reload_shuts_down_before_reloading() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("a").with_log(&log),
        FakePlugin::new("b").depends_on("a").with_log(&log),
    ];
    let runtime = common::runtime(catalog(&plugins));

    runtime.load().await.unwrap();
    log.clear();
    let snapshot = runtime.reload().await.unwrap();

    assert_eq!(snapshot.report.generation, 2);
    assert!(snapshot.is_active("a"));
    assert!(snapshot.is_active("b"));
    assert_eq!(
        log.events()
            .into_iter()
            .filter(|e| !e.ends_with(":register_routes"))
            .collect::<Vec<_>>(),
        vec![
            "b:on_shutdown",
            "a:on_shutdown",
            "a:init_db",
            "a:on_startup",
            "b:init_db",
            "b:on_startup",
        ]
    );
}

#[tokio::test]
async fn dropped_reload_still_completes() {
    let log = CallLog::new();
    let plugins = [
        FakePlugin::new("a").with_log(&log),
        FakePlugin::new("slow")
            .slow_startup(Duration::from_millis(120))
            .with_log(&log),
    ];
    let runtime = common::runtime(catalog(&plugins));
    runtime.load().await.unwrap();

    // Give up on the reload while `slow` is still starting.
    let abandoned = tokio::time::timeout(Duration::from_millis(30), runtime.reload()).await;
    assert!(abandoned.is_err());

    let mut finished = false;
    for _ in 0..100 {
        let snapshot = runtime.snapshot();
        if snapshot.report.generation == 2 {
            assert_eq!(snapshot.report.active, vec!["a", "slow"]);
            assert!(snapshot.last_error.is_none());
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(finished, "reload did not run to completion");

    // The next cycle sees a fully started set.
    log.clear();
    let snapshot = runtime.reload().await.unwrap();
    assert_eq!(snapshot.report.generation, 3);
    assert_eq!(log.calls_to("on_shutdown"), vec!["slow", "a"]);
}

#[tokio::test]
async fn runtime_publishes_fatal_error() {
    let plugins = [
        FakePlugin::new("a").depends_on("b"),
        FakePlugin::new("b").depends_on("a"),
    ];
    let runtime = common::runtime(catalog(&plugins));

    assert!(runtime.load().await.is_err());

    let snapshot = runtime.snapshot();
    assert!(snapshot.plugins.is_empty());
    assert!(snapshot.routes.is_empty());
    assert!(
        snapshot
            .last_error
            .as_deref()
            .unwrap()
            .contains("circular dependency")
    );
}

#[tokio::test]
async fn runtime_shutdown_empties_snapshot() {
    let log = CallLog::new();
    let runtime = common::runtime(catalog(&[FakePlugin::new("a").route("/a").with_log(&log)]));

    runtime.load().await.unwrap();
    assert!(runtime.snapshot().is_active("a"));

    runtime.shutdown().await;

    assert!(runtime.snapshot().plugins.is_empty());
    assert_eq!(log.calls_to("on_shutdown"), vec!["a"]);
}

#[test]
fn builtin_catalog_resolves() {
    use marketplace_kernel::plugin::{builtin, discover, resolve_load_order};

    let discovered = discover(&builtin()).unwrap();
    let order = resolve_load_order(&discovered).unwrap();
    assert_eq!(order, vec!["products", "cart", "orders"]);
}
