use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::IntoResponse,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use classchat_core::{ChatPipeline, ChatRequest, StatusSink, StatusUpdate};

use crate::service::AppContext;

/// Answer text is delivered in fixed-size chunks so the client can render
/// progressively
const CHUNK_SIZE: usize = 120;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(ctx): Extension<Arc<AppContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, ctx))
}

/// How one turn left the session
#[derive(Debug, PartialEq)]
enum Turn {
    Completed,
    Disconnected,
}

/// Outbound frame channel for one session
///
/// `Err` means the peer is gone; callers stop the turn and the session
/// loop ends. The seam exists so turns can run against a captured sink in
/// tests.
#[async_trait]
trait FrameSink: Send + Sync {
    async fn send(&self, frame: Value) -> Result<(), ()>;
}

struct SocketSink {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl FrameSink for SocketSink {
    async fn send(&self, frame: Value) -> Result<(), ()> {
        let mut guard = self.sender.lock().await;
        // A send on a closed socket is the one condition logged and
        // swallowed here; the caller ends the session.
        guard
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| {
                debug!(error = %e, "dropped frame for closed session");
            })
    }
}

/// One persistent chat session: each inbound frame is a full chat turn,
/// answered by `status* -> chunk* -> final`, or a single `error` frame.
/// The session survives failed turns and ends only on disconnect. A
/// disconnect mid-turn drops the pipeline future, abandoning its in-flight
/// calls; the pipeline's stats sample is still recorded.
async fn session(socket: WebSocket, ctx: Arc<AppContext>) {
    let (sender, mut receiver) = socket.split();
    let sink: Arc<dyn FrameSink> = Arc::new(SocketSink {
        sender: Mutex::new(sender),
    });
    info!("websocket session opened");

    loop {
        let Some(frame) = receiver.next().await else {
            break;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "websocket receive failed");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                let turn = handle_turn(&ctx.pipeline, sink.clone(), &text);
                tokio::pin!(turn);
                let outcome = tokio::select! {
                    outcome = &mut turn => outcome,
                    _ = closed_by_peer(&mut receiver) => {
                        debug!("client disconnected mid-turn, abandoning pipeline");
                        Turn::Disconnected
                    }
                };
                if outcome == Turn::Disconnected {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!("websocket session closed");
}

/// Resolves once the peer closes or the transport errors; other frames
/// arriving mid-turn are dropped
async fn closed_by_peer(receiver: &mut SplitStream<WebSocket>) {
    loop {
        match receiver.next().await {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => {}
        }
    }
}

async fn handle_turn(pipeline: &ChatPipeline, sink: Arc<dyn FrameSink>, text: &str) -> Turn {
    let request: ChatRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            let frame = json!({"type": "error", "detail": format!("Malformed request: {}", e)});
            return match sink.send(frame).await {
                Ok(()) => Turn::Completed,
                Err(()) => Turn::Disconnected,
            };
        }
    };

    let status_sink = ForwardingSink {
        sink: sink.clone(),
        closed: AtomicBool::new(false),
    };
    match pipeline.run(request, &status_sink).await {
        Ok(response) => {
            if status_sink.closed.load(Ordering::Relaxed) {
                // No partial answer for a caller that already left
                return Turn::Disconnected;
            }
            for delta in chunk_text(&response.response, CHUNK_SIZE) {
                if sink
                    .send(json!({"type": "chunk", "delta": delta}))
                    .await
                    .is_err()
                {
                    return Turn::Disconnected;
                }
            }
            match sink.send(final_frame(&response)).await {
                Ok(()) => Turn::Completed,
                Err(()) => Turn::Disconnected,
            }
        }
        Err(e) => {
            warn!(error = %e, "websocket turn failed");
            let frame = json!({"type": "error", "detail": e.to_string()});
            match sink.send(frame).await {
                Ok(()) => Turn::Completed,
                Err(()) => Turn::Disconnected,
            }
        }
    }
}

/// Forwards each pipeline status update as a frame, ahead of any chunk
struct ForwardingSink {
    sink: Arc<dyn FrameSink>,
    closed: AtomicBool,
}

#[async_trait]
impl StatusSink for ForwardingSink {
    async fn emit(&self, update: StatusUpdate) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        if self.sink.send(status_frame(&update)).await.is_err() {
            self.closed.store(true, Ordering::Relaxed);
        }
    }
}

fn status_frame(update: &StatusUpdate) -> Value {
    match update {
        StatusUpdate::Thinking => json!({"type": "status", "status": "thinking"}),
        StatusUpdate::Searching => json!({"type": "status", "status": "searching"}),
        StatusUpdate::SearchCompleted {
            query,
            cached,
            source_count,
        } => json!({
            "type": "status",
            "status": "searching",
            "query": query,
            "cached": cached,
            "sources": source_count,
        }),
        StatusUpdate::Generating => json!({"type": "status", "status": "generating"}),
    }
}

fn final_frame(response: &classchat_core::ChatResponse) -> Value {
    let mut frame = match serde_json::to_value(response) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    frame.insert("type".to_string(), Value::String("final".to_string()));
    Value::Object(frame)
}

/// Split text into chunks of at most `size` characters, char boundaries
/// respected
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}
