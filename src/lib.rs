/*!
# Auth Risk Engine

Adaptive login-risk evaluation for authentication services: device
fingerprinting and trust, geographic and time-window access rules, additive
risk scoring with attack-pattern detection, and session anomaly diagnostics,
sequenced by a single orchestrator that fails open on infrastructure faults.

## Quick Start

```rust
use std::sync::Arc;
use auth_risk_engine::config::RiskEngineConfig;
use auth_risk_engine::fingerprint::{ClientAttributes, RequestContext};
use auth_risk_engine::models::GeoLocation;
use auth_risk_engine::orchestrator::{AuthenticatedUser, LoginRequest, LoginSecurityEngine};
use auth_risk_engine::storage::memory::InMemoryStore;

# #[tokio::main]
# async fn main() {
let store = Arc::new(InMemoryStore::new());
let engine = LoginSecurityEngine::new(
    RiskEngineConfig::default(),
    store.clone(),
    store.clone(),
    store.clone(),
    store,
);

let decision = engine
    .evaluate_login(&LoginRequest {
        user: AuthenticatedUser {
            id: uuid::Uuid::new_v4(),
            email: "driver@example.com".into(),
            role: "driver".into(),
        },
        request: RequestContext {
            user_agent: Some("Mozilla/5.0 (Windows NT 10.0) Chrome/120.0".into()),
            accept_language: Some("en-US".into()),
            accept_encoding: Some("gzip".into()),
            ip: Some("203.0.113.10".into()),
        },
        client: ClientAttributes::default(),
        location: GeoLocation {
            country: Some("US".into()),
            ..Default::default()
        },
        second_factor_verified: false,
    })
    .await;
assert!(decision.allowed);
# }
```

## Architecture

- [`fingerprint`]: request fingerprinting, drift detection, trust scoring
- [`rules`]: priority-ordered geographic/time access-rule evaluation
- [`risk`]: additive attempt scoring and advisory attack-pattern detectors
- [`session_anomaly`]: diagnostics over a user's concurrent sessions
- [`orchestrator`]: the per-login pipeline tying the above together
- [`storage`]: async persistence traits plus an in-memory implementation
*/

#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod models;
pub mod orchestrator;
pub mod risk;
pub mod rules;
pub mod session_anomaly;
pub mod storage;

pub use config::RiskEngineConfig;
pub use errors::{EngineError, Result};
pub use orchestrator::{AuthenticatedUser, LoginDecision, LoginRequest, LoginSecurityEngine};
