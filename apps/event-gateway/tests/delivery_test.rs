mod common;

use std::time::Duration;

use event_gateway::stream::log::ReadFrom;
use event_gateway::stream::EventLog;

fn strings(fields: &[(&str, &str)]) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn user_event_reaches_every_device() {
    let ctx = common::TestContext::new();
    let addr = common::start_server(&ctx.state).await;
    let _consumer = ctx.start_consumer();

    let mut phone = common::connect_as(addr, 42, "STUDENT").await;
    let mut laptop = common::connect_as(addr, 42, "STUDENT").await;
    let mut other = common::connect_as(addr, 7, "TEACHER").await;

    ctx.publisher()
        .to_user(42, "grade_posted", &serde_json::json!({ "score": 95 }))
        .await
        .unwrap();

    for ws in [&mut phone, &mut laptop] {
        let event = common::next_event(ws).await;
        assert_eq!(event["event"], "grade_posted");
        assert_eq!(event["data"]["score"], 95);
    }

    // The next thing user 7 sees is the broadcast, not the user event.
    ctx.publisher()
        .broadcast("marker", &serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(common::next_event(&mut other).await["event"], "marker");

    common::eventually(|| ctx.pending() == 0).await;
}

#[tokio::test]
async fn users_event_skips_offline_users() {
    let ctx = common::TestContext::new();
    let addr = common::start_server(&ctx.state).await;
    let _consumer = ctx.start_consumer();

    let mut alice = common::connect_as(addr, 42, "STUDENT").await;
    let mut bob = common::connect_as(addr, 7, "TEACHER").await;

    // User 1000 has no connections.
    ctx.publisher()
        .to_users(&[42, 1000, 7], "announcement", &serde_json::json!({ "id": 3 }))
        .await
        .unwrap();

    assert_eq!(common::next_event(&mut alice).await["event"], "announcement");
    assert_eq!(common::next_event(&mut bob).await["event"], "announcement");
    common::eventually(|| ctx.pending() == 0).await;
}

#[tokio::test]
async fn room_event_reaches_subscribers_only() {
    let ctx = common::TestContext::new();
    let addr = common::start_server(&ctx.state).await;
    let _consumer = ctx.start_consumer();

    let mut member = common::connect_as(addr, 42, "STUDENT").await;
    let mut outsider = common::connect_as(addr, 7, "TEACHER").await;
    common::send_event(&mut member, "subscribe", serde_json::json!({ "topic": "course:9" })).await;
    assert_eq!(common::next_event(&mut member).await["event"], "subscribed");

    let publisher = ctx.publisher();
    publisher
        .to_room("course:9", "lesson_started", &serde_json::Value::Null)
        .await
        .unwrap();
    publisher
        .broadcast("marker", &serde_json::Value::Null)
        .await
        .unwrap();

    assert_eq!(common::next_event(&mut member).await["event"], "lesson_started");
    assert_eq!(common::next_event(&mut member).await["event"], "marker");
    assert_eq!(common::next_event(&mut outsider).await["event"], "marker");
}

#[tokio::test]
async fn role_room_receives_role_scoped_events() {
    let ctx = common::TestContext::new();
    let addr = common::start_server(&ctx.state).await;
    let _consumer = ctx.start_consumer();

    let mut teacher = common::connect_as(addr, 7, "TEACHER").await;

    ctx.publisher()
        .to_room("role_TEACHER_room", "staff_meeting", &serde_json::Value::Null)
        .await
        .unwrap();

    assert_eq!(common::next_event(&mut teacher).await["event"], "staff_meeting");
}

#[tokio::test]
async fn broadcast_reaches_unauthenticated_sockets() {
    let ctx = common::TestContext::new();
    let addr = common::start_server(&ctx.state).await;
    let _consumer = ctx.start_consumer();

    let mut anonymous = common::connect(addr).await;
    let mut authed = common::connect_as(addr, 42, "STUDENT").await;
    let gateway = ctx.state.gateway.clone();
    common::eventually(|| gateway.sockets().len() == 2).await;

    // Flat fields with an unrecognized target fall back to everyone.
    ctx.log
        .append(
            &ctx.state.config.stream.key,
            &strings(&[("target", "somewhere"), ("event", "maintenance")]),
        )
        .await
        .unwrap();

    assert_eq!(common::next_event(&mut anonymous).await["event"], "maintenance");
    assert_eq!(common::next_event(&mut authed).await["event"], "maintenance");
}

#[tokio::test]
async fn flat_field_entries_are_routed() {
    let ctx = common::TestContext::new();
    let addr = common::start_server(&ctx.state).await;
    let _consumer = ctx.start_consumer();

    let mut ws = common::connect_as(addr, 42, "STUDENT").await;

    ctx.log
        .append(
            &ctx.state.config.stream.key,
            &strings(&[
                ("target", "user"),
                ("userId", "42"),
                ("event", "notification"),
                ("data", r#"{"title":"Welcome"}"#),
            ]),
        )
        .await
        .unwrap();

    let event = common::next_event(&mut ws).await;
    assert_eq!(event["event"], "notification");
    assert_eq!(event["data"]["title"], "Welcome");
}

#[tokio::test]
async fn unacknowledged_entry_is_redelivered_after_restart() {
    let ctx = common::TestContext::new();
    let addr = common::start_server(&ctx.state).await;
    let stream = ctx.state.config.stream.clone();

    ctx.log.create_group(&stream.key, &stream.group).await.unwrap();
    ctx.publisher()
        .to_user(42, "resent", &serde_json::Value::Null)
        .await
        .unwrap();

    // A previous process read the entry and died before acknowledging it.
    let read = ctx
        .log
        .read_group(
            &stream.key,
            &stream.group,
            &stream.consumer,
            &ReadFrom::New,
            10,
            Duration::ZERO,
        )
        .await
        .unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(ctx.pending(), 1);

    let mut ws = common::connect_as(addr, 42, "STUDENT").await;
    let _consumer = ctx.start_consumer();

    assert_eq!(common::next_event(&mut ws).await["event"], "resent");
    common::eventually(|| ctx.pending() == 0).await;
}

#[tokio::test]
async fn consumer_stops_on_cancel() {
    let ctx = common::TestContext::new();
    let consumer = ctx.start_consumer();

    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.cancel.cancel();

    tokio::time::timeout(Duration::from_secs(2), consumer)
        .await
        .expect("consumer did not stop")
        .unwrap();
}
