//! Billing run integration tests against in-memory storage

mod support;

use hydro_core::{
    models::{
        BillingRunStatus, InvoiceStatus, LineKind, NewBillingRun, RunError, ABANDONED_RUN_REASON,
    },
    traits::{BillingRunRepository, Pagination},
    AppError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use support::*;

fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.add_tariff(domestic_tariff());

    let a = account("ACC-001", 1);
    let b = account("ACC-002", 1);
    store.add_january_readings(&a, dec!(15));
    store.add_january_readings(&b, dec!(25));
    store.add_account(a);
    store.add_account(b);
    store
}

#[tokio::test]
async fn test_execute_creates_invoices_and_completes_run() {
    let store = seeded_store();
    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = orchestrator(&store, notifier.clone());

    let summary = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();

    assert_eq!(summary.status, BillingRunStatus::Completed);
    assert_eq!(summary.invoices_created, 2);
    assert_eq!(summary.accounts_processed, 2);
    assert_eq!(summary.total_billed, dec!(3110));
    assert!(summary.errors.is_empty());

    let invoices = store.invoices();
    let first = invoices.iter().find(|i| i.account_no == "ACC-001").unwrap();
    assert_eq!(first.total_amount, dec!(1130));
    assert_eq!(first.consumption, dec!(15));
    assert_eq!(first.status, InvoiceStatus::Open);
    assert_eq!(first.billing_run_id, Some(summary.run_id));

    // fixed charge + lines reconcile with the total
    for invoice in &invoices {
        let lines = store.lines_of(invoice.id);
        assert!(lines.iter().all(|l| l.kind == LineKind::Block));
        let sum: Decimal = lines.iter().map(|l| l.amount).sum();
        assert!((invoice.total_amount - (invoice.fixed_charge + sum)).abs() <= dec!(0.01));
    }

    let notified = notifier.runs.lock();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].status, BillingRunStatus::Completed);
    assert_eq!(notified[0].invoices_generated, 2);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let store = seeded_store();
    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));

    orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    let second = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();

    assert_eq!(second.status, BillingRunStatus::Completed);
    assert_eq!(second.invoices_created, 0);
    assert_eq!(second.accounts_skipped, 2);
    assert_eq!(second.total_billed, Decimal::ZERO);
    assert_eq!(store.invoices().len(), 2);
}

#[tokio::test]
async fn test_active_run_blocks_execute() {
    let store = seeded_store();
    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));

    // Another instance already holds the period
    let ctx = ctx();
    store
        .create_active(
            &ctx,
            &NewBillingRun {
                period: january(),
                due_date: day(2024, 2, 15),
                segment: None,
                stale_before: None,
            },
        )
        .await
        .unwrap();

    let err = orchestrator
        .execute(&ctx, january(), day(2024, 2, 15), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ConcurrentRun { .. }));
    assert!(store.invoices().is_empty());
    assert_eq!(store.runs().len(), 1);
}

#[tokio::test]
async fn test_account_failures_are_isolated() {
    let store = seeded_store();

    // Tariff id with no stored version
    let orphan = account("ACC-003", 99);
    store.add_january_readings(&orphan, dec!(10));
    store.add_account(orphan);

    let broken = account("ACC-004", 1);
    store.add_january_readings(&broken, dec!(10));
    store.add_account(broken);
    store.fail_insert_for("ACC-004");

    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));
    let summary = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();

    assert_eq!(summary.status, BillingRunStatus::Completed);
    assert_eq!(summary.accounts_processed, 4);
    assert_eq!(summary.invoices_created, 2);
    assert_eq!(summary.errors.len(), 2);

    let mut failed: Vec<_> = summary
        .errors
        .iter()
        .filter_map(|e| e.account_no.clone())
        .collect();
    failed.sort();
    assert_eq!(failed, vec!["ACC-003", "ACC-004"]);

    let run = orchestrator.find_run(&ctx(), summary.run_id).await.unwrap();
    assert_eq!(run.error_log.len(), 2);

    // A rerun only retries what failed
    let retry = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(retry.accounts_skipped, 2);
    assert_eq!(retry.errors.len(), 2);
}

#[tokio::test]
async fn test_slow_account_times_out() {
    let store = seeded_store();
    let slow = account("ACC-SLOW", 1);
    store.stall_meter(&slow.meter_id);
    store.add_account(slow);

    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));
    let summary = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();

    assert_eq!(summary.status, BillingRunStatus::Completed);
    assert_eq!(summary.invoices_created, 2);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].account_no.as_deref(), Some("ACC-SLOW"));
    assert!(summary.errors[0].reason.contains("timed out"));
}

#[tokio::test]
async fn test_no_active_tariff_fails_run() {
    let store = MemoryStore::new();
    let mut future_tariff = domestic_tariff();
    future_tariff.valid_from = day(2025, 1, 1);
    store.add_tariff(future_tariff);
    store.add_account(account("ACC-001", 1));

    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = orchestrator(&store, notifier.clone());
    let summary = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();

    assert_eq!(summary.status, BillingRunStatus::Failed);
    assert_eq!(summary.accounts_processed, 0);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].account_no.is_none());
    assert!(store.invoices().is_empty());
    assert_eq!(notifier.runs.lock()[0].status, BillingRunStatus::Failed);

    // The lock is released by the terminal transition
    let again = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(again.status, BillingRunStatus::Failed);
}

#[tokio::test]
async fn test_invalid_input_rejected_before_writes() {
    let store = seeded_store();
    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));

    let err = orchestrator
        .execute(&ctx(), january(), day(2024, 1, 15), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), Some("  ".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn test_preview_writes_nothing() {
    let store = seeded_store();
    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));

    for _ in 0..2 {
        let preview = orchestrator
            .preview(&ctx(), january(), None, Some(10))
            .await
            .unwrap();

        assert_eq!(preview.preview_count, 2);
        assert_eq!(preview.total_estimated, dec!(3110));
        assert_eq!(preview.accounts[0].account_no, "ACC-001");
        assert_eq!(preview.accounts[0].estimated_charge, dec!(1130));
        assert_eq!(preview.accounts[0].tariff, "Domestic 2024");
    }

    assert!(store.invoices().is_empty());
    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn test_preview_respects_limit_and_segment() {
    let store = seeded_store();
    let mut commercial = account("ACC-100", 1);
    commercial.category = "commercial".to_string();
    store.add_january_readings(&commercial, dec!(40));
    store.add_account(commercial);

    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));

    let limited = orchestrator
        .preview(&ctx(), january(), None, Some(1))
        .await
        .unwrap();
    assert_eq!(limited.preview_count, 1);

    let segment = orchestrator
        .preview(&ctx(), january(), Some("Commercial"), None)
        .await
        .unwrap();
    assert_eq!(segment.preview_count, 1);
    assert_eq!(segment.accounts[0].account_no, "ACC-100");
    // 300 + 980 + 20 * 100 + 200
    assert_eq!(segment.accounts[0].estimated_charge, dec!(3480));
}

#[tokio::test]
async fn test_missing_readings_are_estimated() {
    let store = MemoryStore::new();
    store.add_tariff(domestic_tariff());
    let a = account("ACC-001", 1);
    store.add_account(a.clone());

    // Three prior invoices averaging 12 m3
    for (month, volume) in [(10u32, dec!(10)), (11, dec!(12)), (12, dec!(14))] {
        let id = store.add_invoice("ACC-001", day(2023, month, 1), day(2023, month, 28), dec!(900));
        store.set_consumption(id, volume);
    }

    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));
    let summary = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(summary.invoices_created, 1);

    let invoice = store
        .invoices()
        .into_iter()
        .find(|i| i.period_start == day(2024, 1, 1))
        .unwrap();
    assert!(invoice.estimated);
    assert_eq!(invoice.consumption, dec!(12));
    // 300 + 6 * 70 + 200
    assert_eq!(invoice.total_amount, dec!(920));
    assert!(store.lines_of(invoice.id).iter().all(|l| l.estimated));
}

#[tokio::test]
async fn test_list_runs_newest_first() {
    let store = seeded_store();
    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));

    orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    let second = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();

    let (runs, total) = orchestrator
        .list_runs(&ctx(), &Pagination::new(1, 1))
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, second.run_id);
}

#[tokio::test]
async fn test_dropped_caller_does_not_strand_run() {
    let store = seeded_store();
    let slow = account("ACC-SLOW", 1);
    store.stall_meter(&slow.meter_id);
    store.add_account(slow);

    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));

    // The caller gives up while the slow account is still in flight
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.execute(&ctx(), january(), day(2024, 2, 15), None),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(600)).await;

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, BillingRunStatus::Completed);
    assert_eq!(store.invoices().len(), 2);

    let next = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(next.status, BillingRunStatus::Completed);
    assert_eq!(next.accounts_skipped, 2);
}

#[tokio::test]
async fn test_stale_active_run_is_reclaimed() {
    let store = seeded_store();
    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));
    let ctx = ctx();

    // A run left in processing by an instance that died
    let stranded = store
        .create_active(
            &ctx,
            &NewBillingRun {
                period: january(),
                due_date: day(2024, 2, 15),
                segment: None,
                stale_before: None,
            },
        )
        .await
        .unwrap();
    store
        .transition(
            &ctx,
            stranded.id,
            BillingRunStatus::Pending,
            BillingRunStatus::Processing,
            None,
        )
        .await
        .unwrap();

    // Still recent: the period stays locked
    let err = orchestrator
        .execute(&ctx, january(), day(2024, 2, 15), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConcurrentRun { .. }));

    store.age_runs(chrono::Duration::minutes(5));

    let summary = orchestrator
        .execute(&ctx, january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(summary.status, BillingRunStatus::Completed);
    assert_eq!(summary.invoices_created, 2);

    let reclaimed = store.run(stranded.id);
    assert_eq!(reclaimed.status, BillingRunStatus::Failed);
    assert!(reclaimed.completed_at.is_some());
    assert_eq!(
        reclaimed.error_log,
        vec![RunError::run_level(ABANDONED_RUN_REASON)]
    );
}

#[tokio::test]
async fn test_storage_error_fails_run_and_releases_period() {
    let store = seeded_store();
    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = orchestrator(&store, notifier.clone());
    store.fail_completion(true);

    let err = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Database(_)));

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, BillingRunStatus::Failed);
    assert!(runs[0]
        .error_log
        .iter()
        .any(|e| e.account_no.is_none() && e.reason.contains("aborted")));
    assert_eq!(notifier.runs.lock()[0].status, BillingRunStatus::Failed);

    // Invoices written before the failure stay put
    assert_eq!(store.invoices().len(), 2);

    store.fail_completion(false);
    let retry = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(retry.status, BillingRunStatus::Completed);
    assert_eq!(retry.invoices_created, 0);
    assert_eq!(retry.accounts_skipped, 2);
}

#[tokio::test]
async fn test_tariff_check_limited_to_segment() {
    let store = seeded_store();

    // Commercial family only takes effect next year
    let mut commercial_tariff = domestic_tariff();
    commercial_tariff.id = 2;
    commercial_tariff.code = "COM".to_string();
    commercial_tariff.name = "Commercial 2025".to_string();
    commercial_tariff.valid_from = day(2025, 1, 1);
    store.add_tariff(commercial_tariff);

    let mut shop = account("ACC-100", 2);
    shop.category = "commercial".to_string();
    store.add_january_readings(&shop, dec!(40));
    store.add_account(shop);

    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));

    let commercial = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), Some("commercial".to_string()))
        .await
        .unwrap();
    assert_eq!(commercial.status, BillingRunStatus::Failed);
    assert_eq!(commercial.accounts_processed, 0);
    assert_eq!(commercial.errors.len(), 1);
    assert!(commercial.errors[0].account_no.is_none());
    assert!(store.invoices().is_empty());

    // The domestic family is effective, so its segment bills normally
    let domestic = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), Some("domestic".to_string()))
        .await
        .unwrap();
    assert_eq!(domestic.status, BillingRunStatus::Completed);
    assert_eq!(domestic.invoices_created, 2);
    assert!(store.invoices().iter().all(|i| i.account_no != "ACC-100"));
}

#[tokio::test]
async fn test_rollover_invoice() {
    let store = MemoryStore::new();
    store.add_tariff(domestic_tariff());
    let a = account("ACC-001", 1);
    store.add_reading(&a.meter_id, day(2024, 1, 1), dec!(99990));
    store.add_reading(&a.meter_id, day(2024, 1, 31), dec!(6));
    store.add_account(a);

    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));
    let summary = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(summary.invoices_created, 1);

    let invoice = &store.invoices()[0];
    // 99999 - 99990 + 6
    assert_eq!(invoice.consumption, dec!(15));
    assert!(!invoice.estimated);
    assert_eq!(invoice.total_amount, dec!(1130));
}

#[tokio::test]
async fn test_rerun_bills_only_previously_errored_accounts() {
    let store = seeded_store();
    store.fail_insert_for("ACC-002");
    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));

    let first = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(first.invoices_created, 1);
    assert_eq!(first.errors.len(), 1);
    assert_eq!(first.errors[0].account_no.as_deref(), Some("ACC-002"));

    store.clear_insert_failures();
    let second = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(second.status, BillingRunStatus::Completed);
    assert_eq!(second.invoices_created, 1);
    assert_eq!(second.accounts_skipped, 1);
    assert!(second.errors.is_empty());
    assert_eq!(second.total_billed, dec!(1980));

    let invoices = store.invoices();
    assert_eq!(invoices.len(), 2);
    let by_account = |no: &str| {
        invoices
            .iter()
            .find(|i| i.account_no == no)
            .and_then(|i| i.billing_run_id)
    };
    assert_eq!(by_account("ACC-001"), Some(first.run_id));
    assert_eq!(by_account("ACC-002"), Some(second.run_id));
}

#[tokio::test]
async fn test_rerun_after_failed_run_bills_accounts() {
    let store = MemoryStore::new();
    let mut future_tariff = domestic_tariff();
    future_tariff.valid_from = day(2025, 1, 1);
    store.add_tariff(future_tariff);
    let a = account("ACC-001", 1);
    store.add_january_readings(&a, dec!(15));
    store.add_account(a);

    let orchestrator = orchestrator(&store, Arc::new(RecordingNotifier::default()));
    let failed = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(failed.status, BillingRunStatus::Failed);

    // An earlier version of the family is published afterwards
    let mut current = domestic_tariff();
    current.id = 2;
    store.add_tariff(current);

    let retry = orchestrator
        .execute(&ctx(), january(), day(2024, 2, 15), None)
        .await
        .unwrap();
    assert_eq!(retry.status, BillingRunStatus::Completed);
    assert_eq!(retry.invoices_created, 1);
    assert_eq!(retry.accounts_skipped, 0);
    assert_eq!(store.invoices()[0].total_amount, dec!(1130));
}
