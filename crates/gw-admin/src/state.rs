use std::sync::Arc;

use gw_assembly::AssemblyService;
use gw_config::ConfigHandle;
use gw_credential::CredentialStore;
use gw_proxy::{TrafficSink, UpstreamTransport};
use gw_router::RoutingStrategy;
use gw_storage::Storage;
use serde::Serialize;
use tokio::sync::broadcast;

/// Operational events broadcast to `/logs/stream` subscribers (spec §2
/// "Event Hub"): credential cooldown transitions, refresh failures, and
/// plan apply/rollback, mirroring the teacher's `AppState.events` channel
/// consumed by `gproxy-admin`'s `events_ws`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    CooldownStarted { credential_id: String, strikes: u32 },
    CooldownCleared { credential_id: String },
    RefreshFailed { credential_id: String, reason: String },
    PlanApplied { plan: String },
    PlanRolledBack { plan: String },
}

/// External boundary for log streaming (spec §6 "[ADD] Ambient wiring
/// notes": `GET /logs/stream` is named as a boundary only, not implemented
/// end-to-end). The default sink simply forwards `GatewayEvent`s; a real
/// deployment could swap in a sink that also ships structured log lines.
pub trait LogStreamSink: Send + Sync {
    fn publish(&self, event: &GatewayEvent);
}

pub struct NoopLogStreamSink;

impl LogStreamSink for NoopLogStreamSink {
    fn publish(&self, _event: &GatewayEvent) {}
}

/// Everything a request handler needs, assembled once at startup in
/// `apps/gateway` and shared via axum's `State` extractor (spec §6 "[ADD]
/// Ambient wiring notes": one `Router` per surface, composed at the top of
/// `apps/gateway`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigHandle>,
    pub storage: Arc<dyn Storage>,
    pub credentials: Arc<CredentialStore>,
    pub router: Arc<RoutingStrategy>,
    pub assembly: Arc<AssemblyService>,
    pub transport: Arc<dyn UpstreamTransport>,
    pub traffic: Arc<dyn TrafficSink>,
    pub log_sink: Arc<dyn LogStreamSink>,
    pub events: broadcast::Sender<GatewayEvent>,
    pub started_at: i64,
}

impl AppState {
    pub fn emit(&self, event: GatewayEvent) {
        self.log_sink.publish(&event);
        let _ = self.events.send(event);
    }
}
