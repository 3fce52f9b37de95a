use std::sync::Arc;

use ai_gateway_lib::{Database, QuotaEngine};
use futures::future::join_all;

#[path = "support.rs"]
mod support;
use support::{dec, relaxed_defaults, USER_ID};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_not_lost() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Database::new(&dir.path().join("gateway.db")).expect("open db"));
    let engine = Arc::new(QuotaEngine::new(db, relaxed_defaults()));

    let tasks = (0..20u64).map(|i| {
        let engine = engine.clone();
        let model = if i % 2 == 0 { "m-a" } else { "m-b" };
        tokio::task::spawn_blocking(move || {
            engine.record_usage(USER_ID, model, 10 + i, dec("0.01"))
        })
    });
    for result in join_all(tasks).await {
        result.expect("join").expect("record usage");
    }

    let report = engine.quota_report(USER_ID).expect("report");
    // 10..=29 之和
    let expected_tokens: u64 = (10..30).sum();
    assert_eq!(report.daily.requests, 20);
    assert_eq!(report.daily.tokens, expected_tokens);
    assert_eq!(report.daily.cost, dec("0.20"));
    assert_eq!(report.monthly.tokens, expected_tokens);
    assert_eq!(report.daily.model_usage["m-a"].requests, 10);
    assert_eq!(report.daily.model_usage["m-b"].requests, 10);
}
