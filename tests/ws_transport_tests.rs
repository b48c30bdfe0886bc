mod common;

use std::time::Duration;

use call_relay::{CloseReason, Phase, SessionHandle, SessionRegistry, Side};
use common::*;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

async fn registered(registry: &SessionRegistry, call_id: &str) -> SessionHandle {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(handle) = registry.get(call_id).await {
                return handle;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was never registered")
}

#[tokio::test]
async fn serves_media_streams_over_websocket() {
    let (connector, mut models) = MockConnector::new();
    let registry = SessionRegistry::new(config(), connector);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.serve(listener).await })
    };

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/media")).await.unwrap();
    ws.send(Message::Text(start("CA-ws").into())).await.unwrap();

    let mut model = next_model(&mut models).await;
    assert_eq!(recv_json(&mut model).await.unwrap()["type"], "session.update");
    model.send(session_updated()).await.unwrap();
    let handle = registered(&registry, "CA-ws").await;
    assert_eq!(handle.wait_for_phase(Phase::Streaming).await, Phase::Streaming);

    ws.send(Message::Binary(vec![0xC3, 0x28].into())).await.unwrap();
    ws.send(Message::Binary(media(&mulaw_chunk(0xFF)).into_bytes().into())).await.unwrap();
    let append = recv_json(&mut model).await.unwrap();
    assert_eq!(append["type"], "input_audio_buffer.append");
    assert_eq!(handle.stats().parse_errors, 1);

    model.send(audio_delta(&pcm_chunk(0))).await.unwrap();
    let reply = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let reply: Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(reply["event"], "media");
    assert_eq!(reply["streamSid"], "MZ-CA-ws");
    assert_eq!(reply["media"]["payload"], mulaw_chunk(0xFF));

    ws.close(None).await.unwrap();
    let report = tokio::time::timeout(WAIT, handle.wait()).await.unwrap().unwrap();
    assert_eq!(report.reason, CloseReason::PeerClosed(Side::Telephony));
    assert!(drain(&mut model).await.is_empty());

    server.abort();
}
