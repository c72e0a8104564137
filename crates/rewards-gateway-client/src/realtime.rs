//! Realtime change feed over the backend's Phoenix-channel websocket

use crate::error::{GatewayError, Result};
use crate::types::{ChangeEvent, ChangeFilter, ChangeType, GatewayConfig};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Interval between channel heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Outgoing/incoming channel frame
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    payload: serde_json::Value,
    #[serde(rename = "ref")]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    change_type: ChangeType,
    #[serde(default)]
    record: serde_json::Value,
    #[serde(default)]
    old_record: serde_json::Value,
}

/// Live channel; dropping it closes the socket task
pub struct ChannelHandle {
    topic: String,
    abort: AbortHandle,
}

impl ChannelHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop delivery now
    pub fn close(self) {}
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        debug!(topic = %self.topic, "Closing realtime channel");
        self.abort.abort();
    }
}

/// Opens change-feed channels, one socket per subscription
pub struct RealtimeClient {
    config: GatewayConfig,
}

impl RealtimeClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Join a channel for the given filter.
    ///
    /// Returns the event receiver and the handle controlling the channel's
    /// lifetime. The receiver yields `None` once the socket closes.
    pub async fn subscribe(
        &self,
        filter: &ChangeFilter,
        access_token: Option<String>,
    ) -> Result<(mpsc::UnboundedReceiver<ChangeEvent>, ChannelHandle)> {
        let url = self.config.realtime_url();
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| GatewayError::Realtime(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let topic = filter.topic();
        let join = join_frame(filter, &self.config.schema, access_token.as_deref());
        sink.send(Message::Text(serde_json::to_string(&join)?))
            .await
            .map_err(|e| GatewayError::Realtime(e.to_string()))?;

        info!(topic = %topic, "Joined realtime channel");

        let (tx, rx) = mpsc::unbounded_channel();
        let task_topic = topic.clone();
        let task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            let mut next_ref: u64 = 2;

            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        let frame = Frame {
                            topic: "phoenix".into(),
                            event: "heartbeat".into(),
                            payload: serde_json::json!({}),
                            reference: Some(next_ref.to_string()),
                        };
                        next_ref += 1;
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!(topic = %task_topic, "Realtime heartbeat failed: {}", e);
                            break;
                        }
                    }
                    message = stream.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) = parse_change(&text, &task_topic) {
                                    if tx.send(event).is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!(topic = %task_topic, "Realtime channel closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(topic = %task_topic, "Realtime socket error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok((
            rx,
            ChannelHandle {
                topic,
                abort: task.abort_handle(),
            },
        ))
    }
}

fn join_frame(filter: &ChangeFilter, schema: &str, access_token: Option<&str>) -> Frame {
    let mut change = serde_json::json!({
        "event": "*",
        "schema": schema,
        "table": filter.table,
    });
    if let Some(predicate) = filter.predicate() {
        change["filter"] = serde_json::Value::String(predicate);
    }

    let mut payload = serde_json::json!({
        "config": { "postgres_changes": [change] }
    });
    if let Some(token) = access_token {
        payload["access_token"] = serde_json::Value::String(token.to_string());
    }

    Frame {
        topic: filter.topic(),
        event: "phx_join".into(),
        payload,
        reference: Some("1".into()),
    }
}

/// Extract a row change from a raw frame addressed to `topic`
fn parse_change(text: &str, topic: &str) -> Option<ChangeEvent> {
    let frame: Frame = serde_json::from_str(text).ok()?;
    if frame.topic != topic || frame.event != "postgres_changes" {
        return None;
    }

    let payload: ChangePayload = serde_json::from_value(frame.payload).ok()?;
    let record = match payload.data.change_type {
        ChangeType::Delete => payload.data.old_record,
        _ => payload.data.record,
    };

    Some(ChangeEvent {
        table: payload.data.table,
        change_type: payload.data.change_type,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_frame_carries_filter() {
        let filter = ChangeFilter::table("users").with_eq("id", "u-1");
        let frame = join_frame(&filter, "public", Some("token"));

        assert_eq!(frame.event, "phx_join");
        assert_eq!(frame.topic, "realtime:users:id:u-1");
        let change = &frame.payload["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "users");
        assert_eq!(change["filter"], "id=eq.u-1");
        assert_eq!(frame.payload["access_token"], "token");
    }

    #[test]
    fn test_parse_insert_change() {
        let text = r#"{
            "topic": "realtime:referrals:user_id:u-1",
            "event": "postgres_changes",
            "payload": {"data": {"table": "referrals", "type": "INSERT", "record": {"user_id": "u-1", "points": 25}}},
            "ref": null
        }"#;

        let event = parse_change(text, "realtime:referrals:user_id:u-1").unwrap();
        assert_eq!(event.table, "referrals");
        assert_eq!(event.change_type, ChangeType::Insert);
        assert_eq!(event.record["points"], 25);
    }

    #[test]
    fn test_parse_ignores_other_topics_and_replies() {
        let reply = r#"{"topic":"realtime:users:id:u-1","event":"phx_reply","payload":{"status":"ok"},"ref":"1"}"#;
        assert!(parse_change(reply, "realtime:users:id:u-1").is_none());

        let other = r#"{"topic":"realtime:users:id:u-2","event":"postgres_changes","payload":{"data":{"table":"users","type":"UPDATE","record":{}}},"ref":null}"#;
        assert!(parse_change(other, "realtime:users:id:u-1").is_none());
    }

    #[test]
    fn test_parse_delete_uses_old_record() {
        let text = r#"{"topic":"t","event":"postgres_changes","payload":{"data":{"table":"referrals","type":"DELETE","record":{},"old_record":{"id":7}}},"ref":null}"#;
        let event = parse_change(text, "t").unwrap();
        assert_eq!(event.record["id"], 7);
    }
}
