//! WebSocket endpoint for recorders and listeners

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::audio::block::SampleBlock;
use crate::codec::{FrameEncoder, SampleConverter, WavFormat};
use crate::protocol::{ConnectMode, ConnectParams, ControlMessage, StreamId};
use crate::relay::server::AppState;

/// Upgrade handler; the query string picks the role
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let mode = match ConnectMode::try_from(params) {
        Ok(mode) => mode,
        Err(e) => {
            tracing::warn!("Rejected connection: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match mode {
        ConnectMode::Record => ws.on_upgrade(move |socket| handle_record(socket, state)),
        ConnectMode::Listen { stream_id } => {
            ws.on_upgrade(move |socket| handle_listen(socket, state, stream_id))
        }
    }
}

/// Producer connection: announce the stream, then convert and fan out
/// every binary block until the socket closes.
async fn handle_record(mut socket: WebSocket, state: Arc<AppState>) {
    let session = state.registry.open_stream();
    let stream_id = session.id().clone();

    let announce = ControlMessage::RecordStart(stream_id.clone()).to_text();
    if socket.send(Message::Text(announce)).await.is_err() {
        state.registry.close_stream(&stream_id);
        return;
    }

    let sample_rate = state.config.sample_rate;
    tracing::info!("Stream {}: recording, frames declare {} Hz", stream_id, sample_rate);
    let encoder = FrameEncoder::new(WavFormat::mono16(sample_rate));
    let mut sequence: u32 = 0;

    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let block = match SampleBlock::from_le_bytes(&data, sample_rate, sequence) {
                    Ok(block) => block,
                    Err(e) => {
                        tracing::warn!("Stream {}: dropping block: {}", stream_id, e);
                        continue;
                    }
                };
                sequence = sequence.wrapping_add(1);

                let pcm = SampleConverter::convert(block);
                let frame = encoder.encode_block(&pcm);
                session.publish(frame.into_bytes());
            }
            Ok(Message::Text(text)) => {
                tracing::debug!("Stream {}: ignoring text message {:?}", stream_id, text);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Stream {}: recorder connection failed: {}", stream_id, e);
                break;
            }
        }
    }

    state.registry.close_stream(&stream_id);
}

/// Consumer connection: forward frames from the subscription in order
async fn handle_listen(mut socket: WebSocket, state: Arc<AppState>, stream_id: StreamId) {
    let Some(mut subscription) = state.registry.subscribe(&stream_id) else {
        tracing::info!("Listener asked for unknown stream {}", stream_id);
        let reason = ControlMessage::Error(format!("unknown stream {}", stream_id)).to_text();
        let _ = socket.send(Message::Text(reason)).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = subscription.recv() => match frame {
                Some(frame) => {
                    if sender.send(Message::Binary(frame.to_vec())).await.is_err() {
                        break;
                    }
                }
                None => {
                    tracing::debug!("Stream {} ended, closing listener {}", stream_id, subscription.listener_id());
                    break;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
