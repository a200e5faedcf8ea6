//! Shared-secret authentication.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "x-secret-header";

/// Compares the caller's secret against the configured one.
///
/// Both sides are hashed before comparison so the check does not short
/// circuit on a shared prefix. A missing or empty configured secret denies
/// every request.
#[derive(Clone)]
pub struct AuthenticationGate {
    expected: Option<[u8; 32]>,
}

impl AuthenticationGate {
    pub fn new(expected: Option<&str>) -> Self {
        let expected = expected.filter(|s| !s.is_empty()).map(digest);
        if expected.is_none() {
            warn!("no shared secret configured, all requests will be rejected");
        }
        Self { expected }
    }

    pub fn is_configured(&self) -> bool {
        self.expected.is_some()
    }

    pub fn authenticate(&self, provided: Option<&str>) -> bool {
        let allowed = match (&self.expected, provided) {
            (Some(expected), Some(provided)) => digest(provided) == *expected,
            _ => false,
        };
        if !allowed {
            warn!(
                header_present = provided.is_some(),
                "rejected request with invalid shared secret"
            );
        }
        allowed
    }
}

impl std::fmt::Debug for AuthenticationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationGate")
            .field("configured", &self.is_configured())
            .finish()
    }
}

/// Pulls the shared secret out of the request headers.
pub fn extract_secret(headers: &HeaderMap) -> Option<&str> {
    headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok())
}

fn digest(value: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(value.as_bytes()));
    out
}
