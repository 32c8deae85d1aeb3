//! End-to-end test of the sync task against an in-process WebSocket server

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use labsync_core::sync::{ConnectionState, SyncHandle, SyncTaskConfig, SyncTaskEvent};
use labsync_core::{spawn_sync_task, EditScript, ExperimentState, MemorySessionStore, Phase};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

const RUNNING: &str = r##"{"cmd":"UPDATE_STATE","data":"{\"infos\":[{\"hint\":\"round\",\"value\":\"1/6\"},{\"hint\":\"#group\",\"value\":\"history\"},{\"hint\":\"r0\",\"value\":\"-\"}],\"images\":[],\"options\":{\"options\":[\"north\",\"south\"]},\"expStatus\":\"RUNNING\"}"}"##;

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client did not connect")
        .unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("no frame from client")
            .expect("client closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return text;
        }
    }
}

async fn next_update(handle: &mut SyncHandle) -> (ExperimentState, EditScript) {
    timeout(WAIT, async {
        loop {
            match handle.next_event().await {
                Some(SyncTaskEvent::Updated { state, script }) => return (state, script),
                Some(_) => continue,
                None => panic!("sync task exited"),
            }
        }
    })
    .await
    .expect("no state published")
}

async fn wait_for_status(handle: &mut SyncHandle, wanted: ConnectionState) {
    timeout(WAIT, handle.status_rx.wait_for(|state| *state == wanted))
        .await
        .expect("status never reached")
        .unwrap();
}

#[tokio::test]
async fn test_handshake_publish_submit_and_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = SyncTaskConfig {
        address: Some(format!("ws://127.0.0.1:{}/ws", port)),
        reconnect_delay: Duration::from_millis(100),
        ..SyncTaskConfig::default()
    };
    let mut handle = spawn_sync_task(config, MemorySessionStore::new());

    // Fresh install: empty session id, then the server assigns one
    let mut ws = accept(&listener).await;
    assert_eq!(next_text(&mut ws).await, r#"{"cmd":"CONNECT","data":""}"#);
    ws.send(Message::Text(r#"{"cmd":"CONNECT","data":"srv-1"}"#.to_string()))
        .await
        .unwrap();
    ws.send(Message::Text(RUNNING.to_string())).await.unwrap();

    let (state, script) = next_update(&mut handle).await;
    assert_eq!(state.phase, Phase::Running);
    assert_eq!(state.options.options, vec!["north", "south"]);
    // intel heading, field, group, choose heading, choices, spacer
    assert_eq!(script.len(), 6);

    handle.submit("south").await.unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"cmd":"SUBMIT_DECISION","data":"{\"uuid\":\"srv-1\",\"decision\":\"south\"}"}"#
    );

    assert!(handle.submit("east").await.is_err());

    // Server drops the socket; the client comes back with its assigned id
    ws.close(None).await.ok();
    drop(ws);

    let mut ws = accept(&listener).await;
    assert_eq!(next_text(&mut ws).await, r#"{"cmd":"CONNECT","data":"srv-1"}"#);
    wait_for_status(&mut handle, ConnectionState::Open).await;

    handle.teardown().await;
    wait_for_status(&mut handle, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn test_unreachable_server_keeps_retrying() {
    // Bind then drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = SyncTaskConfig {
        address: Some(format!("ws://127.0.0.1:{}/ws", port)),
        reconnect_delay: Duration::from_millis(500),
        ..SyncTaskConfig::default()
    };
    let mut handle = spawn_sync_task(config, MemorySessionStore::new());

    wait_for_status(&mut handle, ConnectionState::Reconnecting).await;
    assert!(matches!(
        handle.submit("north").await,
        Err(labsync_core::SyncError::InvalidChoice { .. })
    ));

    handle.teardown().await;
    wait_for_status(&mut handle, ConnectionState::Disconnected).await;
}
