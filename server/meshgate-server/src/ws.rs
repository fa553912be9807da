//! MCP WebSocket transport: read pump dispatching messages concurrently,
//! a single writer pump preserving completion order, and the negotiated
//! binary framing (length-prefixed, optionally deflate-compressed).

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::Message;
use bytes::Bytes;
use futures_util::StreamExt;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use meshgate::dispatch::{Connection, PostAction};
use meshgate::server::GatewayServer;

use crate::context::{passthrough_token, user_context};

/// Frames smaller than this are sent uncompressed.
const COMPRESS_THRESHOLD: usize = 512;

const FLAG_PLAIN: u8 = 0;
const FLAG_DEFLATE: u8 = 1;

/// Binary frame layout: 1 flag byte, 4-byte big-endian payload length,
/// payload bytes.
pub fn encode_frame(payload: &str) -> Bytes {
    let raw = payload.as_bytes();
    let (flag, data) = if raw.len() > COMPRESS_THRESHOLD {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        match encoder.write_all(raw).and_then(|_| encoder.finish()) {
            Ok(compressed) if compressed.len() < raw.len() => (FLAG_DEFLATE, compressed),
            _ => (FLAG_PLAIN, raw.to_vec()),
        }
    } else {
        (FLAG_PLAIN, raw.to_vec())
    };

    let mut frame = Vec::with_capacity(5 + data.len());
    frame.push(flag);
    frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
    frame.extend_from_slice(&data);
    Bytes::from(frame)
}

pub fn decode_frame(frame: &[u8]) -> Option<String> {
    if frame.len() < 5 {
        return None;
    }
    let flag = frame[0];
    let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
    let data = frame.get(5..5 + len)?;
    match flag {
        FLAG_PLAIN => String::from_utf8(data.to_vec()).ok(),
        FLAG_DEFLATE => {
            let mut decoder = flate2::read::DeflateDecoder::new(data);
            let mut out = String::new();
            decoder.read_to_string(&mut out).ok()?;
            Some(out)
        }
        _ => None,
    }
}

struct Outbound {
    payload: String,
    post_action: Option<PostAction>,
}

/// `GET /mcp/ws` upgrade handler.
pub async fn mcp_ws(
    req: HttpRequest,
    body: web::Payload,
    server: web::Data<Arc<GatewayServer>>,
) -> actix_web::Result<HttpResponse> {
    let (response, mut session, mut stream) = actix_ws::handle(&req, body)?;

    let ctx = user_context(&req);
    let conn = Arc::new(Connection::with_passthrough(
        Uuid::new_v4().to_string(),
        Some(ctx.claims),
        passthrough_token(&req),
    ));
    let server = server.get_ref().clone();
    server.register_connection(conn.clone());
    tracing::info!(connection_id = %conn.id, tenant_id = ?conn.tenant_id(), "agent connected");

    let (tx, mut rx) = mpsc::channel::<Outbound>(64);

    // Writer pump: single owner of the session; responses go out in
    // completion order, and each post-action runs strictly after its
    // response frame is enqueued.
    let writer_conn = conn.clone();
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let sent = if writer_conn.binary_mode() {
                session.binary(encode_frame(&outbound.payload)).await
            } else {
                session.text(outbound.payload).await
            };
            if sent.is_err() {
                break;
            }
            if let Some(action) = outbound.post_action {
                action.execute();
            }
        }
        let _ = session.close(None).await;
    });

    // Read pump: each inbound request dispatches on its own task so
    // requests from one connection may be in flight concurrently. Dropping
    // the JoinSet on disconnect aborts whatever is still in flight.
    actix_web::rt::spawn(async move {
        let mut in_flight = tokio::task::JoinSet::new();
        while let Some(frame) = stream.next().await {
            while in_flight.try_join_next().is_some() {}
            let raw = match frame {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Binary(bytes)) => match decode_frame(&bytes) {
                    Some(raw) => raw,
                    None => {
                        tracing::debug!(connection_id = %conn.id, "undecodable binary frame");
                        continue;
                    }
                },
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Nop) => continue,
                Ok(Message::Continuation(_)) => continue,
                Ok(Message::Close(_)) | Err(_) => break,
            };

            let server = server.clone();
            let conn = conn.clone();
            let tx = tx.clone();
            in_flight.spawn_local(async move {
                let dispatcher = server.dispatcher.clone();
                let result = dispatcher.dispatch_raw(server, conn, &raw).await;
                let Some(response) = result.response else {
                    // Notification: run any post-action immediately.
                    if let Some(action) = result.post_action {
                        action.execute();
                    }
                    return;
                };
                match serde_json::to_string(&response) {
                    Ok(payload) => {
                        let _ = tx
                            .send(Outbound {
                                payload,
                                post_action: result.post_action,
                            })
                            .await;
                    }
                    Err(e) => tracing::error!("response serialisation failed: {e}"),
                }
            });
        }
        tracing::info!(connection_id = %conn.id, "agent disconnected");
        server.remove_connection(&conn.id);
    });

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_frames_stay_plain() {
        let frame = encode_frame("{\"ok\":true}");
        assert_eq!(frame[0], FLAG_PLAIN);
        assert_eq!(decode_frame(&frame).unwrap(), "{\"ok\":true}");
    }

    #[test]
    fn large_frames_compress_and_round_trip() {
        let payload = format!("{{\"data\":\"{}\"}}", "x".repeat(4096));
        let frame = encode_frame(&payload);
        assert_eq!(frame[0], FLAG_DEFLATE);
        assert!(frame.len() < payload.len());
        assert_eq!(decode_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        assert!(decode_frame(&[1, 0, 0]).is_none());
        let mut frame = encode_frame("hello").to_vec();
        frame.truncate(frame.len() - 1);
        assert!(decode_frame(&frame).is_none());
    }
}
