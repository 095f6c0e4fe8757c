use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use warp::Filter;

/// Serving-status flag shared between the server loop and the health route.
///
/// Flipped to not-serving at the start of graceful shutdown so orchestrator
/// probes stop routing new sessions here while existing rooms drain.
#[derive(Clone)]
pub struct HealthReporter {
    serving: Arc<AtomicBool>,
}

impl HealthReporter {
    pub fn new() -> Self {
        info!("Health service initialized - ready to serve health checks");
        HealthReporter {
            serving: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_serving(&self, serving: bool) {
        self.serving.store(serving, Ordering::Relaxed);
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::Relaxed)
    }

    /// `GET /healthz` — 200 while serving, 503 once draining.
    pub fn route(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let reporter = self.clone();
        warp::path("healthz").and(warp::get()).map(move || {
            if reporter.is_serving() {
                warp::reply::with_status("ok", warp::http::StatusCode::OK)
            } else {
                warp::reply::with_status("draining", warp::http::StatusCode::SERVICE_UNAVAILABLE)
            }
        })
    }
}

impl Default for HealthReporter {
    fn default() -> Self {
        Self::new()
    }
}
