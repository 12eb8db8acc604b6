// Integration tests: routing destinations through the wired application
// context — inbox queue, silent discard, and the holding bucket.

use std::sync::Arc;

use wispmail::config::RelayConfig;
use wispmail::inbox::lifecycle::GenerateRequest;
use wispmail::inbox::model::Message;
use wispmail::ingest::InboundMail;
use wispmail::router::RoutingOutcome;
use wispmail::AppContext;

async fn app() -> (Arc<AppContext>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RelayConfig::default();
    config.data_dir = dir.path().to_path_buf();
    config.domains.system = vec!["wisp.example".into()];
    config.domains.community = vec!["pool.example".into()];
    config.secrets.domain_challenge_secret = "test-secret".into();
    (Arc::new(AppContext::init(config).await.unwrap()), dir)
}

fn message(to: &str, subject: &str) -> Message {
    Message::new(
        "sender@remote.example",
        to,
        subject,
        "body",
        None,
        chrono::Utc::now().timestamp_millis(),
        "203.0.113.9",
    )
}

#[tokio::test]
async fn recognized_domain_without_inbox_leaves_no_trace() {
    let (ctx, _dir) = app().await;

    let outcome = ctx.router.route(message("ghost123@wisp.example", "s")).await;
    assert_eq!(outcome, RoutingOutcome::Discarded);
    let outcome = ctx.router.route(message("ghost123@pool.example", "s")).await;
    assert_eq!(outcome, RoutingOutcome::Discarded);

    // No queue anywhere, no bucket entry anywhere.
    assert_eq!(ctx.bucket.domain_count().await, 0);
}

#[tokio::test]
async fn unrecognized_domain_buckets_up_to_cap() {
    let (ctx, _dir) = app().await;

    for i in 0..25 {
        let outcome = ctx
            .router
            .route(message("anyone@custom.example", &format!("m{i}")))
            .await;
        assert_eq!(outcome, RoutingOutcome::Bucketed);
    }
    // The 26th within the retention window is dropped.
    let outcome = ctx.router.route(message("anyone@custom.example", "m25")).await;
    assert_eq!(outcome, RoutingOutcome::DroppedAtCap);

    // The bucket still holds the earliest 25, not the 26th.
    let held = ctx.inboxes.drain_custom_domain("custom.example").await;
    assert_eq!(held.len(), 25);
    assert!(held.iter().all(|m| m.subject != "m25"));
    assert_eq!(held[0].subject, "m0");
}

#[tokio::test]
async fn exactly_one_destination_per_message() {
    let (ctx, _dir) = app().await;
    let rec = ctx
        .inboxes
        .generate_address(GenerateRequest::default())
        .await
        .unwrap();

    let outcome = ctx.router.route(message(&rec.address, "s")).await;
    assert_eq!(outcome, RoutingOutcome::Queued);

    // Queued for the inbox, not duplicated into the bucket.
    assert_eq!(ctx.bucket.domain_count().await, 0);
    assert_eq!(ctx.inboxes.get_inbox(&rec.token).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sweep_leaves_live_inboxes_untouched() {
    let (ctx, _dir) = app().await;
    let rec = ctx
        .inboxes
        .generate_address(GenerateRequest::default())
        .await
        .unwrap();

    // Nothing has expired yet; the sweep must not touch the live inbox.
    ctx.inboxes.sweep_expired().await;
    assert!(ctx.inboxes.get_inbox(&rec.token).await.is_ok());

    // Mail to the live inbox still routes to its queue after the sweep.
    let outcome = ctx.router.route(message(&rec.address, "s")).await;
    assert_eq!(outcome, RoutingOutcome::Queued);
}

#[tokio::test]
async fn invalid_recipients_never_reach_the_router() {
    let (ctx, _dir) = app().await;
    let outcomes = ctx
        .ingest
        .accept(InboundMail {
            from: "sender@remote.example".into(),
            to: "has.dots@wisp.example".into(),
            cc: vec!["x".into()],
            bcc: Vec::new(),
            subject: "s".into(),
            body: "b".into(),
            html: None,
            source_ip: "203.0.113.9".into(),
        })
        .await;
    assert!(outcomes.is_empty());
    assert_eq!(ctx.inboxes.received_total().await, 0);
}
