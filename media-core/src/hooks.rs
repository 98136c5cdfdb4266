//! Async hook worker: a single background coroutine that serializes
//! outbound HTTP callbacks so a slow or unreachable hook endpoint never
//! backpressures the publisher's hot path (spec §4.8).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::identity::StreamIdentity;

/// Discriminant for a `HookPayload`'s `action` field. Kept as a plain enum
/// (rather than a `#[serde(tag = "action")]` variant-per-shape encoding) so
/// every event shares one flat envelope on the wire, matching spec §6's
/// `{action, client_id, ip, vhost, app, stream, [param], [file, duration]}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    OnPublish,
    OnUnpublish,
    OnPlay,
    OnStop,
    OnHls,
    OnDvr,
}

/// One event delivered to a configured hook URL. Field names match the
/// on-wire JSON shape external hook receivers are written against; optional
/// fields are omitted entirely rather than serialized as `null`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HookPayload {
    pub action: HookAction,
    pub vhost: String,
    pub app: String,
    pub stream: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl HookPayload {
    fn envelope(action: HookAction, identity: &StreamIdentity) -> Self {
        Self {
            action,
            vhost: identity.vhost.clone(),
            app: identity.app.clone(),
            stream: identity.stream.clone(),
            client_id: None,
            ip: None,
            param: None,
            file: None,
            duration: None,
        }
    }

    pub fn on_publish(identity: &StreamIdentity) -> Self {
        Self::envelope(HookAction::OnPublish, identity)
    }

    pub fn on_unpublish(identity: &StreamIdentity) -> Self {
        Self::envelope(HookAction::OnUnpublish, identity)
    }

    /// `client_id`/`ip` identify the subscriber; `param` carries any query
    /// string the player attached to the play request.
    pub fn on_play(
        identity: &StreamIdentity,
        client_id: Option<String>,
        ip: Option<String>,
        param: Option<String>,
    ) -> Self {
        Self {
            client_id,
            ip,
            param,
            ..Self::envelope(HookAction::OnPlay, identity)
        }
    }

    pub fn on_stop(identity: &StreamIdentity, client_id: Option<String>, ip: Option<String>) -> Self {
        Self {
            client_id,
            ip,
            ..Self::envelope(HookAction::OnStop, identity)
        }
    }

    /// Fired once a segmented packager closes a fragment, carrying its final
    /// path (spec §4.4).
    pub fn on_hls(identity: &StreamIdentity, file: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            ..Self::envelope(HookAction::OnHls, identity)
        }
    }

    /// Fired once a DVR session file is closed, carrying its final path and
    /// duration in seconds (spec §4.6).
    pub fn on_dvr(identity: &StreamIdentity, file: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            file: Some(file.into()),
            duration: Some(duration_secs),
            ..Self::envelope(HookAction::OnDvr, identity)
        }
    }
}

/// Single-consumer FIFO hook dispatcher. `enqueue` is synchronous and never
/// blocks the caller; delivery happens serially on a dedicated task so hook
/// ordering per-stream matches event ordering.
pub struct HookWorker {
    tx: mpsc::UnboundedSender<HookPayload>,
}

impl HookWorker {
    /// Spawn the worker task against `targets` (one POST per configured
    /// URL, per event). Returns immediately; the task runs until the
    /// returned handle (and every clone of the sender inside it) is dropped.
    pub fn spawn(targets: Vec<String>, timeout: Duration) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<HookPayload>();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                for target in &targets {
                    match client.post(target).json(&payload).send().await {
                        Ok(resp) if resp.status().is_success() => {
                            debug!(url = %target, "hook delivered");
                        }
                        Ok(resp) => {
                            warn!(url = %target, status = %resp.status(), "hook endpoint returned error status");
                        }
                        Err(err) => {
                            warn!(url = %target, error = %err, "hook delivery failed");
                        }
                    }
                }
            }
        });

        Arc::new(Self { tx })
    }

    /// Queue a hook event. Never blocks; silently dropped only if the
    /// worker task has already terminated (process shutdown).
    pub fn enqueue(&self, payload: HookPayload) {
        let _ = self.tx.send(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_flat_envelope() {
        let identity = StreamIdentity::default_vhost("live", "a");
        let payload = HookPayload::on_publish(&identity);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["action"], "on_publish");
        assert_eq!(json["stream"], "a");
        assert!(json.get("client_id").is_none(), "absent optional fields must be omitted, not null");
    }

    #[test]
    fn on_hls_carries_file_but_no_duration() {
        let identity = StreamIdentity::default_vhost("live", "a");
        let payload = HookPayload::on_hls(&identity, "/var/hls/a-7.ts");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["action"], "on_hls");
        assert_eq!(json["file"], "/var/hls/a-7.ts");
        assert!(json.get("duration").is_none());
    }

    #[test]
    fn on_dvr_carries_file_and_duration() {
        let identity = StreamIdentity::default_vhost("live", "a");
        let payload = HookPayload::on_dvr(&identity, "/var/dvr/session-3.flv", 5.0);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["action"], "on_dvr");
        assert_eq!(json["file"], "/var/dvr/session-3.flv");
        assert_eq!(json["duration"], 5.0);
    }

    #[test]
    fn on_play_carries_client_identity_and_param() {
        let identity = StreamIdentity::default_vhost("live", "a");
        let payload = HookPayload::on_play(&identity, Some("c1".into()), Some("10.0.0.1".into()), Some("token=x".into()));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["client_id"], "c1");
        assert_eq!(json["ip"], "10.0.0.1");
        assert_eq!(json["param"], "token=x");
    }
}
