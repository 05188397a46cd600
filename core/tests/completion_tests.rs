//! Completion through an initialized stanza

use std::sync::Arc;
use std::time::Duration;

use stanza_core::completion::CompletionItem;
use stanza_core::config::Config;
use stanza_core::InitBuilder;
use tokio_util::sync::CancellationToken;

fn labels(items: &[CompletionItem]) -> Vec<&str> {
    items.iter().map(|i| i.label()).collect()
}

#[tokio::test]
async fn test_configured_references_complete() {
    let stanza = InitBuilder::new().config(Config::default()).init().await.unwrap();
    let document = stanza.session.document("main");

    let items = stanza.completions.complete(&document, "math.fl", 7).await.unwrap();
    assert_eq!(labels(&items), vec!["floor"]);
    assert!(items[0].description().await.starts_with("math.floor: fn(num) -> num"));

    let again = stanza.completions.complete(&document, "math.fl", 7).await.unwrap();
    assert!(Arc::ptr_eq(&items, &again));
}

#[tokio::test]
async fn test_new_bindings_reach_new_documents() {
    let mut stanza = InitBuilder::new().config(Config::default()).init().await.unwrap();
    let cancel = CancellationToken::new();
    assert!(stanza.session.evaluate("total = 1", &[], &cancel).await.is_success());

    let document = stanza.session.document("main");
    let items = stanza.completions.complete(&document, "to", 2).await.unwrap();
    assert_eq!(labels(&items), vec!["total"]);
}

#[tokio::test]
async fn test_rich_display_and_ttl_from_config() {
    let config = Config {
        rich_display: true,
        completion_ttl_secs: 0,
        ..Config::default()
    };
    let stanza = InitBuilder::new().config(config).init().await.unwrap();
    let document = stanza.session.document("main");

    let first = stanza.completions.complete(&document, "text.up", 7).await.unwrap();
    assert_eq!(first[0].display(), "🟣 upper");

    // A zero TTL never serves from cache
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = stanza.completions.complete(&document, "text.up", 7).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_no_completions_inside_strings() {
    let stanza = InitBuilder::new().config(Config::default()).init().await.unwrap();
    let document = stanza.session.document("main");
    let items = stanza
        .completions
        .complete(&document, "print(\"math.", 12)
        .await
        .unwrap();
    assert!(items.is_empty());
}
