use std::{sync::Arc, time::Duration};

use relay_engine::{ContractRouter, JsonConverter, MetaTable, RouterSettings};
use relay_providers::{MockFault, MockProvider};
use relay_types::{
    Contract, FailureKind, MetaRegistration, ProviderId, RawData, RawResult, ResolvedCall, TypeTag,
    UNSUPPORTED_CONTRACT_MESSAGE,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq, Deserialize)]
struct ProfileDto {
    name: String,
}

fn get_profile() -> Contract {
    Contract::new("GetProfile", "profile/get").with_output(TypeTag::named("ProfileDto"))
}

fn ping() -> Contract {
    Contract::new("Ping", "ping")
}

fn router_with(settings: RouterSettings, registrations: Vec<MetaRegistration>) -> ContractRouter {
    ContractRouter::new(settings, MetaTable::new(registrations))
        .with_converter(Arc::new(JsonConverter::new().with_type::<ProfileDto>("ProfileDto")))
}

fn profile_router(provider: Arc<MockProvider>) -> ContractRouter {
    let router = router_with(
        RouterSettings::default(),
        vec![MetaRegistration::new("profile/get", get_profile()).with_provider(ProviderId(1))],
    );
    router.register_provider(ProviderId(0), Arc::new(MockProvider::new("default")));
    router.register_provider(ProviderId(1), provider);
    router
}

#[tokio::test]
async fn identical_responses_publish_one_change() {
    let provider = Arc::new(MockProvider::new("p1").with_response("profile/get", RawResult::ok(r#"{"name":"x"}"#)));
    let router = profile_router(Arc::clone(&provider));
    let mut changes = router.subscribe();

    let first = router.send(get_profile()).await;
    assert!(first.success);
    assert_eq!(first.result_type, TypeTag::named("ProfileDto"));
    assert_eq!(first.meta_id, get_profile().meta_id());
    assert_eq!(first.model.downcast_ref::<ProfileDto>(), Some(&ProfileDto { name: "x".into() }));

    let second = router.send(get_profile()).await;
    assert!(second.success);
    assert_eq!(second.change_hash, first.change_hash);

    assert_eq!(provider.execution_count(), 2);
    let event = changes.try_recv().unwrap();
    assert_eq!(event.raw, RawData::Text(r#"{"name":"x"}"#.into()));
    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(router.history().len(), 1);
    assert_eq!(router.sequence_id(), 2);
}

#[tokio::test]
async fn change_stream_publishes_the_new_result() {
    let provider = Arc::new(MockProvider::new("p1").with_response("profile/get", RawResult::ok(r#"{"name":"x"}"#)));
    let router = profile_router(Arc::clone(&provider));
    let mut changes = router.subscribe();

    router.send(get_profile()).await;
    provider.set_response("profile/get", RawResult::ok(r#"{"name":"y"}"#));
    let updated = router.send(get_profile()).await;

    let _first = changes.try_recv().unwrap();
    let second = changes.try_recv().unwrap();
    assert_eq!(second.change_hash, updated.change_hash);
    assert_eq!(second.model.downcast_ref::<ProfileDto>(), Some(&ProfileDto { name: "y".into() }));
    assert_eq!(router.last_result(get_profile().meta_id()).unwrap().change_hash, updated.change_hash);
}

#[tokio::test]
async fn unsupported_contract_skips_execution() {
    let provider = Arc::new(MockProvider::new("other-only").with_kinds(["Other"]));
    let router = router_with(RouterSettings::default(), vec![MetaRegistration::new("ping", ping())]);
    router.register_provider(ProviderId(0), provider.clone());

    let result = router.send(ping()).await;
    assert!(result.is_unsupported());
    assert_eq!(result.error.as_deref(), Some(UNSUPPORTED_CONTRACT_MESSAGE));
    assert_eq!(result.change_hash, -1);
    assert_eq!(result.result_type, TypeTag::String);
    assert_eq!(provider.execution_count(), 0);
    assert_eq!(router.sequence_id(), 0);
}

#[tokio::test]
async fn connection_failure_returns_empty_sentinel() {
    let provider = Arc::new(MockProvider::new("down").with_connect_failure("connection refused"));
    let router = router_with(RouterSettings::default(), vec![MetaRegistration::new("ping", ping())]);
    router.register_provider(ProviderId(0), provider.clone());

    let result = router.send(ping()).await;
    assert!(result.is_empty_sentinel());
    assert_eq!(result.failure, Some(FailureKind::ConnectionFailure));
    assert!(result.error.is_none());
    assert_eq!(provider.connect_count(), 1);
    assert_eq!(provider.execution_count(), 0);
}

#[tokio::test]
async fn connected_provider_is_not_reconnected() {
    let provider = Arc::new(MockProvider::new("p").with_fallback(RawResult::ok("pong")));
    let router = router_with(RouterSettings::default(), vec![]);
    router.register_provider(ProviderId(0), provider.clone());

    router.send(ping()).await;
    router.send(ping()).await;
    assert_eq!(provider.connect_count(), 1);
    assert_eq!(provider.execution_count(), 2);
}

#[tokio::test]
async fn handlers_run_in_registration_order() {
    let provider = Arc::new(MockProvider::new("p").with_fallback(RawResult::ok("pong")));
    let router = router_with(RouterSettings::default(), vec![MetaRegistration::new("ping", ping())]);
    router.register_provider(ProviderId(0), provider.clone());

    router.add_handler(|contract: Contract| contract.with_header("x-trace", "auth"));
    router.add_handler(|mut contract: Contract| {
        let trace = contract.headers.get("x-trace").cloned().unwrap_or_default();
        contract.headers.insert("x-trace".into(), format!("{trace},tracing"));
        contract
    });

    router.send(ping()).await;
    let seen = provider.last_contract().unwrap();
    assert_eq!(seen.headers.get("x-trace").map(String::as_str), Some("auth,tracing"));
}

#[tokio::test]
async fn conversion_fault_is_reported_without_change_event() {
    let provider = Arc::new(MockProvider::new("p1").with_response("profile/get", RawResult::ok("not json")));
    let router = profile_router(provider);
    let mut changes = router.subscribe();

    let result = router.send(get_profile()).await;
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::ConversionFault));
    assert!(result.error.unwrap().contains("ProfileDto"));
    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));
    assert!(router.history().is_empty());
    assert_eq!(router.sequence_id(), 1);
}

#[tokio::test]
async fn provider_errors_and_panics_become_empty_sentinels() {
    let provider = Arc::new(MockProvider::new("flaky").with_fault(MockFault::Error("socket closed".into())));
    let router = router_with(RouterSettings::default(), vec![MetaRegistration::new("ping", ping())]);
    router.register_provider(ProviderId(0), provider.clone());

    let errored = router.send(ping()).await;
    assert!(errored.is_empty_sentinel());
    assert_eq!(errored.failure, Some(FailureKind::ProviderExecutionFault));

    provider.set_fault(Some(MockFault::Panic("boom".into())));
    let panicked = router.send(ping()).await;
    assert!(panicked.is_empty_sentinel());
    assert_eq!(panicked.failure, Some(FailureKind::ProviderExecutionFault));
    assert_eq!(panicked.contract_id, "ping");

    provider.set_fault(None);
    provider.set_response("ping", RawResult::ok("pong"));
    assert!(router.send(ping()).await.success);
}

#[tokio::test]
async fn no_registered_provider_yields_empty_sentinel() {
    let router = router_with(RouterSettings::default(), vec![MetaRegistration::new("ping", ping())]);
    let result = router.send(ping()).await;
    assert!(result.is_empty_sentinel());
    assert_eq!(result.failure, Some(FailureKind::NoProvider));
}

#[tokio::test]
async fn cancelled_caller_token_stops_before_connect() {
    let provider = Arc::new(MockProvider::new("p").with_fallback(RawResult::ok("pong")));
    let router = router_with(RouterSettings::default(), vec![]);
    router.register_provider(ProviderId(0), provider.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = router.execute(ping(), &cancel).await;
    assert_eq!(result.failure, Some(FailureKind::Cancelled));
    assert_eq!(provider.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_in_flight_calls() {
    let provider = Arc::new(
        MockProvider::new("slow")
            .with_latency(Duration::from_secs(10))
            .with_fallback(RawResult::ok("late")),
    );
    let router = Arc::new(router_with(RouterSettings::default(), vec![]));
    router.register_provider(ProviderId(0), provider.clone());

    let in_flight = tokio::spawn({
        let router = Arc::clone(&router);
        async move { router.send(ping()).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcomes = router.shutdown().await;
    assert_eq!(outcomes.len(), 1);
    assert!(router.is_shut_down());

    let result = in_flight.await.unwrap();
    assert_eq!(result.failure, Some(FailureKind::Cancelled));
    assert_eq!(provider.disconnect_count(), 1);
}

#[tokio::test]
async fn history_keeps_most_recent_entries_per_slot() {
    let settings = RouterSettings {
        history_capacity: 3,
        ..RouterSettings::default()
    };
    let provider = Arc::new(MockProvider::new("p"));
    let router = router_with(settings, vec![MetaRegistration::new("ping", ping())]);
    router.register_provider(ProviderId(0), provider.clone());

    for call in 1..=5 {
        provider.set_response("ping", RawResult::ok(format!("pong-{call}")));
        assert!(router.send(ping()).await.success);
    }

    let history = router.history();
    assert_eq!(history.len(), 3);
    let sequence_ids: Vec<u64> = history.iter().map(|entry| entry.sequence_id).collect();
    assert_eq!(sequence_ids, vec![3, 4, 5]);

    let slot = router.history_entry(5 % 3).unwrap();
    assert_eq!(slot.sequence_id, 5);
    assert_eq!(slot.result.model.as_text(), Some("pong-5"));
}

#[tokio::test]
async fn failures_advance_sequence_without_history() {
    let provider = Arc::new(MockProvider::new("p").with_response("ping", RawResult::failed("busy").with_status(503)));
    let router = router_with(RouterSettings::default(), vec![MetaRegistration::new("ping", ping())]);
    router.register_provider(ProviderId(0), provider.clone());

    let result = router.send(ping()).await;
    assert_eq!(result.failure, Some(FailureKind::ProviderReported));
    assert_eq!(result.status_code, 503);

    provider.set_response("ping", RawResult::ok("pong"));
    router.send(ping()).await;

    assert_eq!(router.sequence_id(), 2);
    let history = router.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sequence_id, 2);
}

#[tokio::test]
async fn resolved_call_without_provider_routes_by_type() {
    let router = router_with(RouterSettings::default(), vec![MetaRegistration::new("ping", ping())]);
    let pinger = Arc::new(MockProvider::new("pinger").with_kinds(["Ping"]).with_fallback(RawResult::ok("pong")));
    router.register_provider(ProviderId(0), Arc::new(MockProvider::new("default").with_kinds(["Other"])));
    router.register_provider(ProviderId(1), pinger.clone());

    let registration = router.meta().find_by_contract(&ping());
    let call = ResolvedCall::new(registration, ping());
    let result = router.execute_resolved(call, &CancellationToken::new()).await;

    assert!(result.success);
    assert_eq!(result.model.as_text(), Some("pong"));
    assert_eq!(pinger.execution_count(), 1);
}

#[tokio::test]
async fn override_beats_preferred_default() {
    let settings = RouterSettings {
        prefer_default: true,
        ..RouterSettings::default()
    };
    let router = router_with(
        settings,
        vec![MetaRegistration::new("ping", ping()).with_provider(ProviderId(2))],
    );
    let default = Arc::new(MockProvider::new("default").with_fallback(RawResult::ok("from-default")));
    let pinned = Arc::new(MockProvider::new("pinned").with_fallback(RawResult::ok("from-pinned")));
    router.register_provider(ProviderId(0), default.clone());
    router.register_provider(ProviderId(2), pinned);

    assert_eq!(router.send(ping()).await.model.as_text(), Some("from-pinned"));

    let unregistered = Contract::new("Health", "health");
    assert_eq!(router.send(unregistered).await.model.as_text(), Some("from-default"));
    assert_eq!(default.execution_count(), 1);
}

#[tokio::test]
async fn switching_default_reroutes_preferred_calls() {
    let settings = RouterSettings {
        prefer_default: true,
        ..RouterSettings::default()
    };
    let router = router_with(settings, vec![MetaRegistration::new("ping", ping())]);
    router.register_provider(ProviderId(0), Arc::new(MockProvider::new("zero").with_fallback(RawResult::ok("zero"))));
    router.register_provider(ProviderId(1), Arc::new(MockProvider::new("one").with_fallback(RawResult::ok("one"))));

    assert_eq!(router.send(ping()).await.model.as_text(), Some("zero"));
    router.providers().switch_default(ProviderId(1));
    assert_eq!(router.send(ping()).await.model.as_text(), Some("one"));
}
