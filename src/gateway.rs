//! Composition root: authentication, admission control and forwarding.
//!
//! Each route runs the same pipeline:
//! 1. Shared-secret check (`authenticate`)
//! 2. Rate-limit key extraction (`jobId`)
//! 3. Rate-limit check
//! 4. Remaining field validation
//! 5. Forward downstream
//!
//! Any rejection short-circuits before the downstream client is touched.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::auth::AuthenticationGate;
use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::forward::ForwardingClient;
use crate::metrics::TRACKED_KEYS;
use crate::models::{CreateRequest, CreateResponse, EditRequest};
use crate::rate_limit::{Decision, RateLimiter, spawn_sweeper};

pub struct Gateway {
    gate: AuthenticationGate,
    limiter: Arc<RateLimiter>,
    forwarder: ForwardingClient,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Builds a gateway whose rate limiter reads time from `clock`.
    pub fn with_clock(config: GatewayConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        let gate = AuthenticationGate::new(config.secret.as_deref());
        let limiter = Arc::new(RateLimiter::in_memory(config.rate_limit_policy(), clock));
        let forwarder = ForwardingClient::new(config.forwarding())?;

        Ok(Self {
            gate,
            limiter,
            forwarder,
            config,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Starts the idle-entry sweep on a cadence equal to the window.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        spawn_sweeper(Arc::clone(&self.limiter), self.config.window, shutdown)
    }

    /// First pipeline stage. Callers must run this before inspecting the
    /// request body.
    pub fn authenticate(&self, provided: Option<&str>) -> Result<()> {
        if self.gate.authenticate(provided) {
            Ok(())
        } else {
            Err(GatewayError::Unauthorized)
        }
    }

    /// Relays a new message for an authenticated caller.
    pub async fn create(&self, request: CreateRequest) -> Result<CreateResponse> {
        self.admit(request.job_id.as_deref())?;
        let payload = require_payload(request.payload)?;

        let message_id = self.forwarder.create(&payload).await?;
        Ok(CreateResponse {
            message_id: message_id.into_inner(),
        })
    }

    /// Relays an edit of an existing message for an authenticated caller.
    pub async fn edit(&self, request: EditRequest) -> Result<()> {
        self.admit(request.job_id.as_deref())?;

        let message_id = request
            .message_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GatewayError::validation("Missing messageId."))?;
        let payload = require_payload(request.payload)?;

        self.forwarder.edit(&message_id, &payload).await
    }

    fn admit(&self, job_id: Option<&str>) -> Result<()> {
        let key = job_id
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GatewayError::validation("Missing JobId."))?;

        let decision = self.limiter.check(key);
        TRACKED_KEYS.set(self.limiter.tracked_keys() as i64);

        match decision {
            Decision::Admit => Ok(()),
            Decision::Deny => {
                let count = self.limiter.entry(key).map_or(0, |e| e.count);
                warn!(job_id = key, count, "rate limit exceeded");
                Err(GatewayError::RateLimited {
                    key: key.to_string(),
                })
            }
        }
    }
}

fn require_payload(payload: Option<Value>) -> Result<Value> {
    payload.ok_or_else(|| GatewayError::validation("Missing payload."))
}
