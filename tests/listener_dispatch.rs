// Message server dispatch over real mutual-TLS connections.

mod common;

use common::{start_server, test_settings, Call, Recorder, HOST, TIMEOUT};
use intentbridge::bridge::{Courier, Incoming, LinkCategory, LocalBridge, RouteDecision, RoutingPrefs};
use intentbridge::config::Settings;
use intentbridge::network::{
    ping, send, send_with, try_send, ClientOptions, Message, MessageServer, RoutingSnapshot, ServerPhase,
    SharePayload,
};
use intentbridge::security::connect_secure;
use intentbridge::{BridgeError, Role, TrustContext};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handoff_reaches_handler_without_routing() {
    let a = TrustContext::in_memory(Role::PersonalSpace);
    let b = TrustContext::in_memory(Role::PrivateSpace);
    let recorder = Arc::new(Recorder::default());
    let (server, port) = start_server(&b, recorder.clone(), Role::PrivateSpace).await;

    // exact wire line, no routing snapshot
    let mut channel = connect_secure(&a, HOST, port, TIMEOUT).await.unwrap();
    channel
        .write_line(r#"{"type":"handoff","uri":"https://example.com/x"}"#, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(channel.read_line(1024, TIMEOUT).await.unwrap(), None);

    let calls = recorder.wait_for(1).await;
    assert_eq!(
        calls,
        vec![Call::Handoff("https://example.com/x".into(), None)]
    );
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handoff_survives_bad_routing_entries() {
    let a = TrustContext::in_memory(Role::PersonalSpace);
    let b = TrustContext::in_memory(Role::PrivateSpace);
    let recorder = Arc::new(Recorder::default());
    let (server, port) = start_server(&b, recorder.clone(), Role::PrivateSpace).await;

    let mut channel = connect_secure(&a, HOST, port, TIMEOUT).await.unwrap();
    channel
        .write_line(
            r#"{"type":"handoff","uri":"https://example.com/x","routing":{"maps":null,"browser":"PRIVATE_SPACE"}}"#,
            TIMEOUT,
        )
        .await
        .unwrap();
    let _ = channel.close(TIMEOUT).await;

    let mut routing = RoutingSnapshot::new();
    routing.insert("browser".into(), "PRIVATE_SPACE".into());
    assert_eq!(
        recorder.wait_for(1).await,
        vec![Call::Handoff("https://example.com/x".into(), Some(routing))]
    );
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn share_at_line_limit_is_delivered_and_larger_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    std::fs::write(&path, vec![42u8; 6000]).unwrap();
    let files = [path];
    let limit = SharePayload::from_files(&files, None, Some("photo".into()), None, usize::MAX)
        .await
        .unwrap()
        .line_len()
        .unwrap();

    let a = TrustContext::in_memory(Role::PersonalSpace);
    let b = TrustContext::in_memory(Role::PrivateSpace);
    let recorder = Arc::new(Recorder::default());
    let settings = Settings {
        max_message_bytes: limit,
        ..test_settings()
    };
    let server = MessageServer::new(b.clone(), recorder.clone(), settings.clone());
    server.start(Role::PrivateSpace).await.unwrap();
    let port = server.local_port().unwrap();
    let opts = ClientOptions::from(&settings);

    let at_limit = SharePayload::from_files(&files, None, Some("photo".into()), None, limit)
        .await
        .unwrap();
    assert!(send_with(&a, HOST, port, &Message::Share(at_limit.clone()), &opts).await);
    assert_eq!(recorder.wait_for(1).await, vec![Call::Share(at_limit.clone())]);

    let refused = SharePayload::from_files(&files, None, Some("photo".into()), None, limit - 1)
        .await
        .unwrap_err();
    assert!(matches!(refused, BridgeError::ShareTooLarge { .. }));

    // a sender with a smaller limit does not claim success for a line the peer would drop
    let tight = ClientOptions {
        max_message_bytes: limit - 1,
        ..opts
    };
    let err = try_send(&a, HOST, port, &Message::Share(at_limit.clone()), &tight)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::MessageTooLarge { .. }));
    assert!(!send_with(&a, HOST, port, &Message::Share(at_limit), &tight).await);
    assert_eq!(recorder.calls().len(), 1);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_client_is_dropped_while_others_are_served() {
    let a = TrustContext::in_memory(Role::PersonalSpace);
    let b = TrustContext::in_memory(Role::PrivateSpace);
    let server = MessageServer::new(
        b.clone(),
        Arc::new(Recorder::default()),
        Settings {
            read_timeout: Duration::from_millis(300),
            write_timeout: Duration::from_millis(300),
            ..test_settings()
        },
    );
    server.start(Role::PrivateSpace).await.unwrap();
    let port = server.local_port().unwrap();

    // completes TLS, then never writes
    let mut silent = connect_secure(&a, HOST, port, TIMEOUT).await.unwrap();
    assert!(ping(&a, HOST, port, TIMEOUT).await.success);

    let started = Instant::now();
    let closed = silent.read_line(1024, Duration::from_secs(3)).await;
    assert!(!matches!(closed, Err(BridgeError::IoTimeout(_))), "{closed:?}");
    assert!(matches!(closed, Ok(None) | Err(_)));
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(ping(&a, HOST, port, TIMEOUT).await.success);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_message_kind_is_dispatched() {
    let a = TrustContext::in_memory(Role::PersonalSpace);
    let b = TrustContext::in_memory(Role::PrivateSpace);
    let recorder = Arc::new(Recorder::default());
    let (server, port) = start_server(&b, recorder.clone(), Role::PrivateSpace).await;

    assert!(send(&a, HOST, port, &Message::routing_pref("maps", "PERSONAL_SPACE"), TIMEOUT).await);
    recorder.wait_for(1).await;
    let share = SharePayload::text(Some("hello".into()), "body");
    assert!(send(&a, HOST, port, &Message::Share(share.clone()), TIMEOUT).await);

    let calls = recorder.wait_for(2).await;
    assert_eq!(
        calls,
        vec![
            Call::RoutingPref("maps".into(), "PERSONAL_SPACE".into()),
            Call::Share(share),
        ]
    );
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_input_is_dropped_and_server_survives() {
    let a = TrustContext::in_memory(Role::PersonalSpace);
    let b = TrustContext::in_memory(Role::PrivateSpace);
    let recorder = Arc::new(Recorder::default());
    let server = MessageServer::new(
        b.clone(),
        recorder.clone(),
        Settings {
            max_message_bytes: 256,
            ..test_settings()
        },
    );
    server.start(Role::PrivateSpace).await.unwrap();
    let port = server.local_port().unwrap();

    for line in [
        "this is not json".to_string(),
        r#"{"type":"teleport","to":"mars"}"#.to_string(),
        r#"{"uri":"https://no-type"}"#.to_string(),
        format!(r#"{{"type":"handoff","uri":"{}"}}"#, "x".repeat(1000)),
    ] {
        let mut channel = connect_secure(&a, HOST, port, TIMEOUT).await.unwrap();
        channel.write_line(&line, TIMEOUT).await.unwrap();
        // no error frame: the server just closes
        assert!(matches!(channel.read_line(1024, TIMEOUT).await, Ok(None) | Err(_)));
    }

    // raw TCP client that never starts TLS
    let raw = tokio::net::TcpStream::connect((HOST, port)).await.unwrap();
    drop(raw);

    assert!(ping(&a, HOST, port, TIMEOUT).await.success);
    assert!(recorder.calls().is_empty());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn courier_and_local_bridge_sync_routing() {
    let a = TrustContext::in_memory(Role::PersonalSpace);
    let b = TrustContext::in_memory(Role::PrivateSpace);
    let b_routing = Arc::new(RoutingPrefs::in_memory());
    let bridge = Arc::new(LocalBridge::new(b_routing.clone()));
    let mut incoming = bridge.subscribe();
    let (server, port) = start_server(&b, bridge.clone(), Role::PrivateSpace).await;

    let a_routing = Arc::new(RoutingPrefs::in_memory());
    let courier = Courier::new(
        a.clone(),
        Settings {
            private_port: port,
            ..test_settings()
        },
        a_routing.clone(),
    );
    assert!(courier
        .sync_routing_preference(LinkCategory::Youtube, Role::PrivateSpace)
        .await
        .unwrap());
    assert!(courier.handoff("https://example.com/watch").await);

    let first = tokio::time::timeout(Duration::from_secs(2), incoming.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        first,
        Incoming::Handoff { ref uri, routing_applied: true, .. } if uri == "https://example.com/watch"
    ));
    assert_eq!(b_routing.preferred_role(LinkCategory::Youtube), Role::PrivateSpace);
    assert_eq!(b_routing.snapshot(), a_routing.snapshot());

    assert!(courier.ping().await.success);
    assert_eq!(courier.shutdown(Duration::from_secs(1)).await, 0);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn route_hands_off_only_links_preferred_by_the_peer() {
    let a = TrustContext::in_memory(Role::PersonalSpace);
    let b = TrustContext::in_memory(Role::PrivateSpace);
    let bridge = Arc::new(LocalBridge::new(Arc::new(RoutingPrefs::in_memory())));
    let mut incoming = bridge.subscribe();
    let (server, port) = start_server(&b, bridge.clone(), Role::PrivateSpace).await;

    let courier = Courier::new(
        a.clone(),
        Settings {
            private_port: port,
            ..test_settings()
        },
        Arc::new(RoutingPrefs::in_memory()),
    );
    assert_eq!(courier.route("https://example.com/article").await, RouteDecision::Local);
    assert_eq!(
        courier.route("https://www.google.com/maps/place/Berlin").await,
        RouteDecision::Forwarded(true)
    );

    let received = tokio::time::timeout(Duration::from_secs(2), incoming.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        received,
        Incoming::Handoff { ref uri, .. } if uri == "https://www.google.com/maps/place/Berlin"
    ));
    assert!(incoming.try_recv().is_err());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_closes_the_port() {
    let a = TrustContext::in_memory(Role::PersonalSpace);
    let b = TrustContext::in_memory(Role::PrivateSpace);
    let (server, port) = start_server(&b, Arc::new(Recorder::default()), Role::PrivateSpace).await;
    assert_eq!(server.phase(), ServerPhase::Listening);

    // second start while running is a no-op
    server.start(Role::PrivateSpace).await.unwrap();
    assert_eq!(server.local_port(), Some(port));

    server.stop().await;
    assert!(!server.is_listening());
    assert_eq!(server.phase(), ServerPhase::Stopped);
    assert!(!ping(&a, HOST, port, Duration::from_millis(500)).await.success);

    // and can be started again
    server.start(Role::PrivateSpace).await.unwrap();
    assert!(server.is_listening());
    server.stop().await;
}
