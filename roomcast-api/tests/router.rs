//! Router tests for the HTTP surface
//!
//! Run with: cargo test -p roomcast-api --test router

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use mockall::mock;
use tower::ServiceExt;

use roomcast_api::{create_router, AppState};
use roomcast_cluster::Broker;
use roomcast_core::config::RoomSeed;
use roomcast_core::models::{ChatMessage, ChatRoom, CreateRoomRequest, RoomId, UserId};
use roomcast_core::service::{
    InMemoryMessageStore, InMemoryRoomDirectory, MessageStore, RoomDirectory,
};

mock! {
    pub Rooms {}

    #[async_trait::async_trait]
    impl RoomDirectory for Rooms {
        async fn is_member(&self, room_id: &RoomId, user_id: &UserId) -> roomcast_core::Result<bool>;
        async fn rooms_for_user(&self, user_id: &UserId) -> roomcast_core::Result<Vec<RoomId>>;
        async fn list_rooms(&self, user_id: &UserId) -> roomcast_core::Result<Vec<ChatRoom>>;
        async fn create_room(&self, owner: &UserId, request: CreateRoomRequest) -> roomcast_core::Result<ChatRoom>;
        async fn join_room(&self, room_id: &RoomId, user_id: &UserId) -> roomcast_core::Result<bool>;
        async fn leave_room(&self, room_id: &RoomId, user_id: &UserId) -> roomcast_core::Result<bool>;
    }
}

/// alice belongs to room1, nobody else belongs anywhere
fn alice_in_room1() -> MockRooms {
    let mut rooms = MockRooms::new();
    rooms
        .expect_is_member()
        .returning(|room, user| Ok(room.as_str() == "room1" && user.as_str() == "alice"));
    rooms.expect_rooms_for_user().returning(|user| {
        Ok(if user.as_str() == "alice" {
            vec![RoomId::from("room1")]
        } else {
            Vec::new()
        })
    });
    rooms
}

struct TestApp {
    router: Router,
    broker: Arc<Broker>,
    store: Arc<InMemoryMessageStore>,
}

/// Seeded directory: `lobby` holds alice, `quiet` is empty
fn seeded_directory() -> InMemoryRoomDirectory {
    InMemoryRoomDirectory::from_seeds(&[
        RoomSeed {
            id: "lobby".to_string(),
            members: vec!["alice".to_string()],
        },
        RoomSeed {
            id: "quiet".to_string(),
            members: vec![],
        },
    ])
}

fn create_test_app(rooms: impl RoomDirectory + 'static) -> TestApp {
    let broker = Arc::new(Broker::single_node("test_node"));
    let store = Arc::new(InMemoryMessageStore::new());
    let state = AppState::new(
        broker.clone(),
        Arc::new(rooms),
        store.clone(),
        &roomcast_core::Config::default(),
    );

    TestApp {
        router: create_router(state),
        broker,
        store,
    }
}

fn send_request(user: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/messages")
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn post_request(uri: &str, user: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-user-id", user)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

/// Open an event stream for `user` and consume its `connected` frame
async fn open_stream(router: &Router, user: &str) -> Body {
    let response = router
        .clone()
        .oneshot(get_request("/api/stream", user))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    assert!(next_frame(&mut body).await.contains("event: connected"));
    body
}

async fn body_json(body: Body) -> serde_json::Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn next_frame(body: &mut Body) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let data: Bytes = frame.into_data().unwrap();
    String::from_utf8(data.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app(MockRooms::new());

    let response = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_stats() {
    let app = create_test_app(MockRooms::new());
    let (_id, _rx) = app.broker.connect();

    let response = app
        .router
        .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["node_id"], "test_node");
    assert_eq!(json["connections"], 1);
    assert_eq!(json["relay_enabled"], false);
}

#[tokio::test]
async fn test_send_requires_identity() {
    let app = create_test_app(MockRooms::new());

    let response = app
        .router
        .oneshot(send_request(None, r#"{"roomId":"room1","content":"hi"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["status"], 401);
}

#[tokio::test]
async fn test_send_rejects_empty_content() {
    let app = create_test_app(alice_in_room1());

    let response = app
        .router
        .oneshot(send_request(Some("alice"), r#"{"roomId":"room1","content":"   "}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_rejects_non_member() {
    let app = create_test_app(alice_in_room1());
    let (id, mut rx) = app.broker.connect();
    app.broker.join(&id, RoomId::from("room1")).unwrap();

    let response = app
        .router
        .oneshot(send_request(Some("mallory"), r#"{"roomId":"room1","content":"hi"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(rx.try_recv().is_none());
}

#[tokio::test]
async fn test_send_fans_out_and_persists() {
    let app = create_test_app(alice_in_room1());
    let (id, mut rx) = app.broker.connect();
    app.broker.join(&id, RoomId::from("room1")).unwrap();

    let response = app
        .router
        .oneshot(send_request(Some("alice"), r#"{"roomId":"room1","content":"hello"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["delivered"], 1);
    assert_eq!(json["relayed"], false);
    assert_eq!(json["message"]["senderId"], "alice");

    let event = rx.try_recv().unwrap();
    assert_eq!(event.name(), "room1");
    let payload: serde_json::Value = serde_json::from_str(event.data()).unwrap();
    assert_eq!(payload["content"], "hello");
    assert_eq!(payload["roomId"], "room1");

    // persistence runs detached from the request
    for _ in 0..50 {
        if !app.store.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let saved = app.store.recent(&RoomId::from("room1"), 0, 10).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].content, "hello");
}

#[tokio::test]
async fn test_stream_lifecycle() {
    let app = create_test_app(alice_in_room1());

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/stream")
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let mut body = response.into_body();
    let connected = next_frame(&mut body).await;
    assert!(connected.contains("event: connected"));
    assert!(connected.contains("data: Connection: "));

    assert_eq!(app.broker.stats().connections, 1);
    assert_eq!(app.broker.local().member_count(&RoomId::from("room1")), 1);

    app.broker.send(&RoomId::from("room1"), r#"{"content":"hi"}"#);
    let frame = next_frame(&mut body).await;
    assert!(frame.contains("event: room1"));
    assert!(frame.contains(r#"data: {"content":"hi"}"#));

    // client goes away
    drop(body);
    assert_eq!(app.broker.stats().connections, 0);
    assert_eq!(app.broker.stats().groups, 0);
}

#[tokio::test]
async fn test_history_is_membership_gated() {
    let app = create_test_app(alice_in_room1());
    app.store
        .save(ChatMessage::new(
            RoomId::from("room1"),
            UserId::from("alice"),
            "earlier".to_string(),
        ))
        .await
        .unwrap();

    let forbidden = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/rooms/room1/messages")
                .header("x-user-id", "mallory")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/rooms/room1/messages?limit=10")
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response.into_body()).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["content"], "earlier");
}

#[tokio::test]
async fn test_connection_count() {
    let app = create_test_app(MockRooms::new());
    let (id, _rx) = app.broker.connect();
    app.broker.join(&id, RoomId::from("room1")).unwrap();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/rooms/room1/connections")
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["roomId"], "room1");
    assert_eq!(json["connections"], 1);
}

#[tokio::test]
async fn test_history_skip_pages_back() {
    let app = create_test_app(alice_in_room1());
    for content in ["first", "second", "third"] {
        app.store
            .save(ChatMessage::new(
                RoomId::from("room1"),
                UserId::from("alice"),
                content.to_string(),
            ))
            .await
            .unwrap();
    }

    let response = app
        .router
        .oneshot(get_request("/api/rooms/room1/messages?skip=1&limit=1", "alice"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response.into_body()).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["content"], "second");
}

#[tokio::test]
async fn test_list_rooms() {
    let mut rooms = MockRooms::new();
    rooms.expect_list_rooms().returning(|user| {
        Ok(vec![ChatRoom {
            id: RoomId::from("room1"),
            name: format!("{user}'s room"),
            description: None,
            created_at: chrono::Utc::now(),
            member_count: 1,
        }])
    });
    let app = create_test_app(rooms);

    let response = app
        .router
        .oneshot(get_request("/api/rooms", "alice"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response.into_body()).await;
    assert_eq!(json[0]["id"], "room1");
    assert_eq!(json[0]["name"], "alice's room");
    assert_eq!(json[0]["memberCount"], 1);
}

#[tokio::test]
async fn test_create_room_joins_open_streams() {
    let app = create_test_app(seeded_directory());
    let mut stream = open_stream(&app.router, "carol").await;

    let response = app
        .router
        .clone()
        .oneshot(post_request(
            "/api/rooms",
            "carol",
            r#"{"name":"General","description":"Everyone"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response.headers()["location"].to_str().unwrap().to_string();
    let json = body_json(response.into_body()).await;
    let room_id = RoomId::from(json["id"].as_str().unwrap());
    assert_eq!(location, format!("/api/rooms/{room_id}/messages"));
    assert_eq!(json["name"], "General");
    assert_eq!(json["memberCount"], 1);

    assert_eq!(app.broker.local().member_count(&room_id), 1);
    app.broker.send(&room_id, "welcome");
    let frame = next_frame(&mut stream).await;
    assert!(frame.contains(&format!("event: {room_id}")));
    assert!(frame.contains("data: welcome"));

    let listed = app
        .router
        .oneshot(get_request("/api/rooms", "carol"))
        .await
        .unwrap();
    let json = body_json(listed.into_body()).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_room_rejects_blank_name() {
    let app = create_test_app(seeded_directory());

    let response = app
        .router
        .oneshot(post_request("/api/rooms", "alice", r#"{"name":"  "}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_join_room_updates_open_stream() {
    let app = create_test_app(seeded_directory());
    let quiet = RoomId::from("quiet");
    let mut stream = open_stream(&app.router, "bob").await;
    assert_eq!(app.broker.local().member_count(&quiet), 0);

    let response = app
        .router
        .clone()
        .oneshot(post_request("/api/rooms/quiet/join", "bob", ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["roomId"], "quiet");
    assert_eq!(json["connections"], 1);

    // the already-open stream now receives the room without reconnecting
    assert_eq!(app.broker.send(&quiet, "hello bob").local_recipients, 1);
    let frame = next_frame(&mut stream).await;
    assert!(frame.contains("event: quiet"));
    assert!(frame.contains("data: hello bob"));

    let again = app
        .router
        .oneshot(post_request("/api/rooms/quiet/join", "bob", ""))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_join_unknown_room_is_not_found() {
    let app = create_test_app(seeded_directory());

    let response = app
        .router
        .oneshot(post_request("/api/rooms/nowhere/join", "bob", ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.broker.stats().groups, 0);
}

#[tokio::test]
async fn test_leave_room_stops_delivery() {
    let app = create_test_app(seeded_directory());
    let lobby = RoomId::from("lobby");
    let _stream = open_stream(&app.router, "alice").await;
    assert_eq!(app.broker.local().member_count(&lobby), 1);

    let response = app
        .router
        .clone()
        .oneshot(post_request("/api/rooms/lobby/leave", "alice", ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response.into_body()).await;
    assert_eq!(json["connections"], 1);

    assert!(!app.broker.local().contains_group(&lobby));
    assert_eq!(app.broker.send(&lobby, "gone").local_recipients, 0);
    assert_eq!(app.broker.stats().connections, 1);

    let again = app
        .router
        .oneshot(post_request("/api/rooms/lobby/leave", "alice", ""))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
}
