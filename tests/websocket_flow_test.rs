//! `spec.md` §8 scenario 5: an `app_msg` sent on the application stream
//! while a WebSocket is attached arrives at the browser as a single binary
//! frame with exactly the declared bytes. This needs a real loopback
//! socket (WebSocket upgrades can't be driven through an in-process
//! `tower::Service::oneshot`), so it binds an ephemeral port and connects
//! with `tokio-tungstenite` as the browser side.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use browser_broker::coordinator::Coordinator;
use browser_broker::listener::router;
use browser_broker::proto::{frame, AppToBroker};

#[tokio::test]
async fn scenario_5_app_msg_forwards_to_attached_websocket() {
    let dir = tempfile::tempdir().unwrap();
    let tcp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp_listener.local_addr().unwrap();

    let (coordinator, _events) = Coordinator::new(dir.path().to_path_buf(), addr.port())
        .await
        .unwrap();

    let (mut app, broker_side) = tokio::io::duplex(8192);
    coordinator
        .admit("sid-scenario5".to_string(), broker_side)
        .await
        .unwrap();

    let http_router = router(coordinator.sessions());
    tokio::spawn(async move {
        axum::serve(tcp_listener, http_router).await.unwrap();
    });

    let ws_url = format!("ws://{addr}/sid-scenario5/ws");
    let (mut ws_stream, _response) = tokio_tungstenite::connect_async(ws_url)
        .await
        .expect("websocket upgrade");

    // Let the upgrade future attach the socket to the session actor before
    // the app side sends anything.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let control = AppToBroker::AppMsg { size: 3 };
    let body = control.encode().unwrap();
    frame::write_frame(&mut app, &body).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut app, b"hey")
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), ws_stream.next())
        .await
        .expect("timed out waiting for websocket message")
        .expect("websocket stream ended")
        .expect("websocket error");

    match received {
        WsMessage::Binary(bytes) => assert_eq!(bytes, vec![0x68, 0x65, 0x79]),
        other => panic!("expected a binary message, got {other:?}"),
    }
}
