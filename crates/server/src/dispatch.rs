//! Per-event pipeline shared by every platform.
//!
//! One dispatcher serves one platform and owns that platform's dedup
//! window. The pipeline is: duplicate check → adapter prepare (filtering +
//! credential resolution) → upstream call → chunk → paced sends. Every
//! failure past verification is isolated here so one bad event never
//! affects the webhook response or subsequent events.

use omnirelay_core::chunk::chunk_reply;
use omnirelay_core::dedup::DedupWindow;
use omnirelay_core::metrics::MetricsStore;
use omnirelay_core::platform::PlatformAdapter;
use omnirelay_core::types::InboundEvent;
use omnirelay_upstream::ChatBackend;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{error, info};
use uuid::Uuid;

pub struct Dispatcher {
    backend: Arc<dyn ChatBackend>,
    metrics: Arc<MetricsStore>,
    dedup: Mutex<DedupWindow>,
    default_response: String,
    chunk_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        metrics: Arc<MetricsStore>,
        default_response: String,
        chunk_delay_ms: u64,
    ) -> Self {
        Self {
            backend,
            metrics,
            dedup: Mutex::new(DedupWindow::default()),
            default_response,
            chunk_delay: Duration::from_millis(chunk_delay_ms),
        }
    }

    /// Run one event through the pipeline. Never returns an error: the
    /// webhook response must stay 200 regardless of what happens here.
    pub async fn handle_event(&self, adapter: &dyn PlatformAdapter, event: &InboundEvent) {
        let platform = adapter.platform_name();
        self.metrics.inc_events_in();

        // Events without an identifier can't be deduplicated; process them
        // unconditionally.
        if let Some(id) = event.id.as_deref().filter(|s| !s.is_empty()) {
            if self.dedup.lock().await.is_duplicate(id) {
                info!(platform, id, "duplicate event; ignoring");
                self.metrics.inc_duplicates_skipped();
                return;
            }
        }

        let dispatch = match adapter.prepare(event).await {
            Ok(Some(dispatch)) => dispatch,
            Ok(None) => return,
            Err(e) => {
                error!(platform, error = %e, "failed to prepare event");
                return;
            }
        };

        let trace_id = Uuid::new_v4();
        info!(platform, %trace_id, sender = %event.sender_id, "dispatching to chat backend");

        let reply = match self.backend.respond(&dispatch.text, None).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(platform, %trace_id, error = %e, "upstream backend failed");
                self.metrics.inc_upstream_errors();
                // The end user still gets a reply.
                format!("{}\n\n(Error: {})", self.default_response, e)
            }
        };

        let chunks = chunk_reply(&reply, adapter.chunk_limit());
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            if let Err(e) = adapter.send(&dispatch, chunk).await {
                // Not retried; the platform response stays 200 either way.
                error!(platform, %trace_id, error = %e, "failed to send reply chunk");
                self.metrics.inc_send_errors();
                break;
            }
            self.metrics.inc_replies_out();
            if i + 1 < total {
                sleep(self.chunk_delay).await;
            }
        }
    }
}
