//! # Session Flow Tests
//!
//! Consumers talking JSON to the broker through the session router, with
//! a protocol router splitting tags between two simulated providers.

use std::sync::Arc;
use std::time::Duration;
use tag_broker::{
    BrokerConfig, BroadcastDispatcher, ChannelLimits, ConsumerSession, DispatcherSet,
    DisplayInfo, FanoutDispatcher, Protocol, ProtocolRouter, ServerMessage, SessionRouter,
    SimulatedProvider, SubscriptionRegistry, Tag, TagValue, ValueAlarm,
};
use tokio::time::timeout;

type Broker = SubscriptionRegistry<ProtocolRouter<SimulatedProvider, SimulatedProvider>>;

struct Deployment {
    router: SessionRouter<Broker>,
    ca: Arc<SimulatedProvider>,
    pva: Arc<SimulatedProvider>,
    broadcast: Arc<BroadcastDispatcher>,
}

fn deploy() -> Deployment {
    let ca = Arc::new(SimulatedProvider::new("ca"));
    let pva = Arc::new(SimulatedProvider::new("pva"));
    let provider = Arc::new(ProtocolRouter::new(ca.clone(), pva.clone(), Protocol::Pva));

    let config = BrokerConfig::default().with_consumer_queue_capacity(32);
    let fanout = Arc::new(FanoutDispatcher::new(config.consumer_queue_capacity));
    let broadcast = Arc::new(BroadcastDispatcher::new(config.broadcast_capacity));
    let dispatchers = DispatcherSet::new()
        .with(fanout.clone())
        .with(broadcast.clone());

    let broker = Arc::new(SubscriptionRegistry::with_config(
        provider,
        Arc::new(dispatchers),
        config,
    ));
    Deployment {
        router: SessionRouter::new(broker, fanout),
        ca,
        pva,
        broadcast,
    }
}

async fn next_update(session: &mut ConsumerSession) -> (Tag, TagValue) {
    match timeout(Duration::from_millis(200), session.updates.recv()).await {
        Ok(Some(ServerMessage::Update { tag, value, .. })) => (tag, value),
        other => panic!("expected an update, got {other:?}"),
    }
}

#[tokio::test]
async fn test_two_consumers_share_one_channel() {
    let d = deploy();
    let mut c1 = d.router.connect();
    let mut c2 = d.router.connect();

    for session in [&c1, &c2] {
        let replies = d
            .router
            .handle_text(&session.id, r#"{"type":"subscribe","tags":["ca://SR:CURRENT"]}"#)
            .await;
        assert!(replies.is_empty());
    }
    assert_eq!(d.ca.opens_for(&Tag::new("SR:CURRENT")), 1);
    assert_eq!(d.pva.total_opens(), 0);

    d.ca.publish(&Tag::new("SR:CURRENT"), TagValue::Double(401.2));

    for session in [&mut c1, &mut c2] {
        assert_eq!(
            next_update(session).await,
            (Tag::new("ca://SR:CURRENT"), TagValue::Double(401.2))
        );
    }
}

#[tokio::test]
async fn test_write_round_trip_through_protocol_router() {
    let d = deploy();
    d.pva.set_value(Tag::new("gain"), TagValue::Double(1.0));
    let mut session = d.router.connect();

    d.router
        .handle_text(&session.id, r#"{"type":"subscribe","tags":["gain"]}"#)
        .await;
    assert_eq!(next_update(&mut session).await.1, TagValue::Double(1.0));

    let replies = d
        .router
        .handle_text(&session.id, r#"{"type":"write","tag":"gain","value":"2.5"}"#)
        .await;
    assert!(replies.is_empty());
    assert_eq!(next_update(&mut session).await.1, TagValue::Double(2.5));
    assert_eq!(d.pva.writes(), vec![(Tag::new("gain"), TagValue::Double(2.5))]);
}

#[tokio::test]
async fn test_bad_write_reports_error_to_sender() {
    let d = deploy();
    d.pva.set_value(Tag::new("count"), TagValue::Int(0));
    let session = d.router.connect();
    d.router
        .handle_text(&session.id, r#"{"type":"subscribe","tags":["count"]}"#)
        .await;

    let replies = d
        .router
        .handle_text(&session.id, r#"{"type":"write","tag":"count","value":"lots"}"#)
        .await;

    assert!(matches!(
        replies.as_slice(),
        [ServerMessage::Error { tag: Some(t), .. }] if t == &Tag::new("count")
    ));
}

#[tokio::test]
async fn test_unsubscribed_consumer_stops_receiving() {
    let d = deploy();
    let mut stays = d.router.connect();
    let mut leaves = d.router.connect();
    for session in [&stays, &leaves] {
        d.router
            .handle_text(&session.id, r#"{"type":"subscribe","tags":["T"]}"#)
            .await;
    }

    d.router
        .handle_text(&leaves.id, r#"{"type":"unsubscribe","tags":["T"]}"#)
        .await;
    d.pva.publish(&Tag::new("T"), TagValue::Int(9));

    assert_eq!(next_update(&mut stays).await.1, TagValue::Int(9));
    assert!(leaves.updates.try_recv().is_err());
    assert_eq!(d.pva.channels_for(&Tag::new("T")), 1);
}

#[tokio::test]
async fn test_broadcast_sees_every_update() {
    let d = deploy();
    let mut all = d.broadcast.subscribe();
    let session = d.router.connect();
    d.router
        .handle_text(&session.id, r#"{"type":"subscribe","tags":["A","ca://B"]}"#)
        .await;

    d.pva.publish(&Tag::new("A"), TagValue::Int(1));
    d.ca.publish(&Tag::new("B"), TagValue::from("on"));

    assert_eq!(all.recv().await.unwrap().tag, Tag::new("A"));
    assert_eq!(all.recv().await.unwrap().tag, Tag::new("ca://B"));
}

#[tokio::test]
async fn test_disconnect_closes_unshared_channels() {
    let d = deploy();
    let a = d.router.connect();
    let b = d.router.connect();
    d.router
        .handle_text(&a.id, r#"{"type":"subscribe","tags":["shared","only-a"]}"#)
        .await;
    d.router
        .handle_text(&b.id, r#"{"type":"subscribe","tags":["shared"]}"#)
        .await;

    d.router.disconnect(&a.id).await.unwrap();

    assert_eq!(d.pva.open_tags(), vec![Tag::new("shared")]);
    assert_eq!(d.router.broker().consumers_of(&Tag::new("shared")), vec![b.id.clone()]);
}

#[tokio::test]
async fn test_late_joiner_replay_carries_alarm_and_limits_on_the_wire() {
    let d = deploy();
    d.ca.set_limits(
        Tag::new("SR:CURRENT"),
        ChannelLimits {
            display: Some(DisplayInfo {
                limit_low: 0.0,
                limit_high: 500.0,
                units: "mA".to_string(),
                precision: 1,
                description: "Beam current".to_string(),
            }),
            control: None,
            value_alarm: Some(ValueAlarm {
                low_alarm_limit: 10.0,
                low_warning_limit: 50.0,
                high_warning_limit: 420.0,
                high_alarm_limit: 440.0,
            }),
        },
    );

    let mut first = d.router.connect();
    d.router
        .handle_text(&first.id, r#"{"type":"subscribe","tags":["ca://SR:CURRENT"]}"#)
        .await;
    d.ca.publish(&Tag::new("SR:CURRENT"), TagValue::Double(430.0));
    next_update(&mut first).await;

    let mut late = d.router.connect();
    d.router
        .handle_text(&late.id, r#"{"type":"subscribe","tags":["ca://SR:CURRENT"]}"#)
        .await;
    let replay = timeout(Duration::from_millis(200), late.updates.recv())
        .await
        .unwrap()
        .unwrap();

    let json: serde_json::Value = serde_json::from_str(&replay.to_json().unwrap()).unwrap();
    assert_eq!(json["type"], "update");
    assert_eq!(json["value"], 430.0);
    assert_eq!(json["alarm"]["severity"], "MINOR");
    assert_eq!(json["alarm"]["message"], "HIGH");
    assert_eq!(json["display"]["units"], "mA");
    assert!(json["timeStamp"]["secondsPastEpoch"].as_i64().unwrap() > 0);
}
