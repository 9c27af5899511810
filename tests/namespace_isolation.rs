mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{collecting_simulator, monthly_subscription, settle, simulator_with, RecordingTransport};
use paymock::{DeclineCode, DeliveryMode, EventType, SubscriptionStatus};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn resources_and_webhooks_stay_inside_their_namespace() {
    let sim = collecting_simulator();
    monthly_subscription(&sim, "team_a", "cus_a");
    monthly_subscription(&sim, "team_b", "cus_b");
    settle().await;

    assert_eq!(sim.subscriptions().list("team_a").len(), 1);
    assert_eq!(sim.subscriptions().list("team_b").len(), 1);
    assert!(sim.subscriptions().get("team_a", "sub_missing").is_err());

    // Each namespace collected only its own creation event.
    let a_hooks = sim.webhooks().collected("team_a", "*");
    let b_hooks = sim.webhooks().collected("team_b", "*");
    assert_eq!(a_hooks.len(), 1);
    assert_eq!(b_hooks.len(), 1);
    assert_ne!(a_hooks[0].event_id, b_hooks[0].event_id);
}

#[tokio::test(start_paused = true)]
async fn endpoints_only_see_events_from_their_own_namespace() {
    let transport = RecordingTransport::new();
    let sim = simulator_with(DeliveryMode::Async, transport.clone());
    sim.webhooks()
        .register_endpoint("team_a", "https://a.test/hooks", vec!["*".into()])
        .unwrap();
    sim.webhooks()
        .register_endpoint("team_b", "https://b.test/hooks", vec!["*".into()])
        .unwrap();

    sim.emit("team_a", EventType::WebhookTest, json!({"from": "a"}));
    settle().await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://a.test/hooks");
}

#[tokio::test(start_paused = true)]
async fn chaos_in_one_namespace_leaves_the_other_billing_normally() {
    let sim = collecting_simulator();
    let victim = monthly_subscription(&sim, "chaotic", "cus_v");
    let bystander = monthly_subscription(&sim, "calm", "cus_b");
    sim.chaos()
        .simulate_failure("chaotic", "cus_v", DeclineCode::ProcessingError);

    sim.clock().advance(Duration::days(31)).unwrap();
    assert_eq!(sim.billing().process_billing("chaotic").failed, 1);
    assert_eq!(sim.billing().process_billing("calm").succeeded, 1);
    settle().await;

    assert_eq!(
        sim.subscriptions()
            .get("chaotic", &victim.id)
            .unwrap()
            .attempt_count,
        1
    );
    assert_eq!(
        sim.subscriptions()
            .get("calm", &bystander.id)
            .unwrap()
            .status,
        SubscriptionStatus::Active
    );
    assert!(sim
        .webhooks()
        .collected("calm", "invoice.payment_failed")
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn teardown_of_one_namespace_preserves_the_rest() {
    let sim = collecting_simulator();
    let kept = monthly_subscription(&sim, "kept", "cus_k");
    monthly_subscription(&sim, "doomed", "cus_d");
    sim.clock().advance(Duration::days(31)).unwrap();
    sim.billing().process_billing("kept");
    sim.billing().process_billing("doomed");
    settle().await;

    sim.teardown_namespace("doomed");

    assert!(sim.subscriptions().list("doomed").is_empty());
    assert!(sim.invoices().list("doomed").is_empty());
    assert!(sim.webhooks().collected("doomed", "*").is_empty());

    assert_eq!(sim.subscriptions().list("kept").len(), 1);
    assert_eq!(sim.invoices().list("kept").len(), 1);
    assert!(sim
        .subscriptions()
        .get("kept", &kept.id)
        .unwrap()
        .status
        .is_billable());

    // The namespace is immediately reusable.
    monthly_subscription(&sim, "doomed", "cus_d2");
    assert_eq!(sim.subscriptions().list("doomed").len(), 1);
}

#[tokio::test]
async fn concurrent_namespaces_do_not_interfere() {
    let sim = Arc::new(collecting_simulator());

    let mut handles = Vec::new();
    for n in 0..16 {
        let sim = Arc::clone(&sim);
        handles.push(tokio::spawn(async move {
            let namespace = format!("worker_{n}");
            for _ in 0..10 {
                monthly_subscription(&sim, &namespace, &format!("cus_{n}"));
            }
            namespace
        }));
    }

    for handle in handles {
        let namespace = handle.await.unwrap();
        assert_eq!(sim.subscriptions().list(&namespace).len(), 10);
    }
}
