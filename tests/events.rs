//! Event delivery through a live client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use resilient_client::events::ApiUsage;
use resilient_client::resilience::defaults::server_errors;
use resilient_client::{ApiClient, Event, RetryPolicy};

mod common;
use common::{reply, reply_with_headers, CountingSource, Recorder, ScriptedTransport};

fn client(transport: Arc<ScriptedTransport>) -> ApiClient {
    let policy = RetryPolicy::builder()
        .response_rule(server_errors())
        .backoff_base(Duration::ZERO)
        .backoff_jitter(false)
        .build()
        .unwrap();
    ApiClient::builder("https://acme.my.salesforce.com", CountingSource::new())
        .transport(transport)
        .retry_policy(policy)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_event_order_for_a_retried_call() {
    let client = client(ScriptedTransport::new(vec![reply(500, ""), reply(200, "")]));
    let recorder = Recorder::new();
    client.subscribe(recorder.clone());

    client.execute(client.get("limits").unwrap()).await.unwrap();

    assert_eq!(
        recorder.names(),
        vec![
            "request_issued",
            "api_call_accounted",
            "retry_scheduled",
            "api_call_accounted",
            "response_received",
        ]
    );
}

#[tokio::test]
async fn test_failing_observers_do_not_affect_calls() {
    let client = client(ScriptedTransport::new(vec![reply(503, ""), reply(200, "")]));
    let recorder = Recorder::new();
    client.subscribe(recorder.clone());
    client.events().subscribe_blocking_fn(|_| Err("observer rejected event".into()));
    client.events().subscribe_fn(|_| {
        async {
            if true {
                panic!("observer bug");
            }
            Ok(())
        }
        .boxed()
    });

    let response = client.execute(client.get("limits").unwrap()).await.unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(recorder.events().len(), 5);
}

#[tokio::test]
async fn test_unsubscribed_observer_stops_receiving() {
    let client = client(ScriptedTransport::new(vec![reply(200, "")]));
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let id = client.events().subscribe_blocking_fn(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    client.execute(client.get("limits").unwrap()).await.unwrap();
    let after_first = seen.load(Ordering::SeqCst);
    assert_eq!(after_first, 3);

    assert!(client.unsubscribe(id));
    assert!(!client.unsubscribe(id));
    client.execute(client.get("limits").unwrap()).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), after_first);
}

#[tokio::test]
async fn test_api_usage_is_read_from_accounted_calls() {
    let client = client(ScriptedTransport::new(vec![reply_with_headers(
        200,
        "{}",
        &[("sforce-limit-info", "api-usage=118/15000")],
    )]));
    let recorder = Recorder::new();
    client.subscribe(recorder.clone());

    client.execute(client.get("limits").unwrap()).await.unwrap();

    let usage: Vec<ApiUsage> = recorder
        .events()
        .iter()
        .filter(|e| matches!(***e, Event::ApiCallAccounted { count: 1, .. }))
        .filter_map(|e| e.api_usage())
        .collect();
    assert_eq!(
        usage,
        vec![ApiUsage {
            consumed: 118,
            limit: 15000
        }]
    );
}
