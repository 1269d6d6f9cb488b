use entitle_core::{BuildEnvironment, ItemId};
use entitle_purchases::{EngineConfig, PurchaseNotice};

fn item_id(raw: &str) -> ItemId {
    ItemId::parse(raw).unwrap()
}

#[tokio::test]
async fn production_session_walks_the_whole_lifecycle() {
    let report = entitle_simulator::run_session(EngineConfig::default(), None)
        .await
        .unwrap();

    assert_eq!(report.catalog.len(), 2);
    assert_eq!(report.rejected_items, vec![item_id("sub.legacy")]);
    assert!(report.duplicate_rejected);
    assert_eq!(report.entitlement_after_purchase, Some(item_id("sub.monthly")));
    assert_eq!(report.entitlement_at_end, None);
    assert_eq!(report.acknowledged.len(), 1);
    assert_eq!(report.opened_urls.len(), 1);
    assert_eq!(
        report.notices,
        vec![
            PurchaseNotice::Entitled { item_id: item_id("sub.monthly") },
            PurchaseNotice::Cancelled { item_id: Some(item_id("coins.100")) },
        ]
    );

    let summary = serde_json::to_value(report.summary()).unwrap();
    assert_eq!(summary["catalog_size"], 2);
}

#[tokio::test]
async fn diagnostic_session_skips_the_management_page() {
    let config = EngineConfig::default().with_environment(BuildEnvironment::Diagnostic);
    let report = entitle_simulator::run_session(config, None).await.unwrap();

    assert!(report.opened_urls.is_empty());
    assert_eq!(report.entitlement_at_end, None);
}
