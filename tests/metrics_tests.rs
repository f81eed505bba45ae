use std::sync::Arc;

use homeserve::{
    marketplace::{Marketplace, NewUser, TopUp},
    telemetry,
};
use homeserve_core::{Money, Policy};
use homeserve_memory::InMemoryStorage;

// The Prometheus recorder is process-global, so this binary holds a single test.
#[test]
fn replays_are_counted_apart_from_events() {
    let handle = telemetry::install_metrics().unwrap();
    let market = Marketplace::new(Arc::new(InMemoryStorage::new()), Policy::default()).unwrap();
    let user = market
        .register_user(NewUser {
            full_name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            phone: "9876543210".to_string(),
        })
        .unwrap();

    for _ in 0..3 {
        market
            .top_up(
                user.id,
                TopUp {
                    amount: Money::from(500),
                    payment_method: None,
                },
                Some("topup-1"),
            )
            .unwrap();
    }
    assert_eq!(market.wallet(user.id).unwrap().balance, Money::from(500));

    let rendered = handle.render();
    assert!(
        rendered.contains("homeserve_events_total{event=\"top_up\"} 1\n"),
        "{rendered}"
    );
    assert!(
        rendered.contains("homeserve_event_replays_total{event=\"top_up\"} 2\n"),
        "{rendered}"
    );
}
