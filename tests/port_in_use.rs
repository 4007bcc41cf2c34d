mod common;

use common::{test_settings, Recorder};
use intentbridge::config::Settings;
use intentbridge::network::{MessageServer, ServerPhase};
use intentbridge::{BridgeError, Role, TrustContext};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn occupied_port_reports_port_in_use() {
    let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = holder.local_addr().unwrap().port();

    let server = MessageServer::new(
        TrustContext::in_memory(Role::PersonalSpace),
        Arc::new(Recorder::default()),
        Settings {
            personal_port: port,
            ..test_settings()
        },
    );
    let err = server.start(Role::PersonalSpace).await.unwrap_err();
    assert!(matches!(err, BridgeError::PortInUse { port: p, .. } if p == port));
    assert!(!server.is_listening());
    assert_eq!(server.phase(), ServerPhase::Stopped);
    assert_eq!(server.local_port(), None);
    drop(holder);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_server_for_same_role_fails() {
    let first = MessageServer::new(
        TrustContext::in_memory(Role::PrivateSpace),
        Arc::new(Recorder::default()),
        test_settings(),
    );
    first.start(Role::PrivateSpace).await.unwrap();
    let port = first.local_port().unwrap();

    let second = MessageServer::new(
        TrustContext::in_memory(Role::PrivateSpace),
        Arc::new(Recorder::default()),
        Settings {
            private_port: port,
            ..test_settings()
        },
    );
    assert!(matches!(
        second.start(Role::PrivateSpace).await,
        Err(BridgeError::PortInUse { .. })
    ));
    assert!(!second.is_listening());
    assert!(first.is_listening());
    first.stop().await;
}
