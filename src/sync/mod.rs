//! Hybrid sync core: the transport contract, compatibility policy,
//! circuit breaker, artifact integrity (checksum + signature), and the
//! client that ties them together.
//!
//! The local path is always authoritative: every remote failure mode
//! (timeout, rejection, incompatibility, corruption) degrades to
//! `mode=local_fallback` with a reason, never an error to the caller.

pub mod orchestrator;
pub mod reconcile;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::{SigningAlgorithm, SigningConfig};
use crate::error::{Error, Result};
use crate::models::{
    ArtifactBundle, IndexDelta, ARTIFACT_SCHEMA_VERSION, DELTA_SCHEMA_VERSION, TOOL_VERSION,
};
use crate::observability::canonical_json;

// ---------------------------------------------------------------------------
// Transport contract
// ---------------------------------------------------------------------------

/// Result of pushing one delta to the remote plane.
#[derive(Debug, Clone, Default)]
pub struct PushReceipt {
    pub accepted: bool,
    pub detail: HashMap<String, String>,
}

/// The contract the core consumes. Implementations live outside the
/// core (file-backed, HTTP, in-memory for tests).
pub trait SyncTransport: Send + Sync {
    fn push_delta(&self, delta: &IndexDelta) -> Result<PushReceipt>;

    fn pull_latest_artifact(
        &self,
        repo_id: &str,
        snapshot_id: &str,
        parent_snapshot: Option<&str>,
    ) -> Result<Option<ArtifactBundle>>;
}

// ---------------------------------------------------------------------------
// Artifact integrity
// ---------------------------------------------------------------------------

/// Checksum payload: the artifact's canonical JSON with the integrity
/// fields cleared.
fn integrity_payload(artifact: &ArtifactBundle) -> Result<String> {
    let mut value = serde_json::to_value(artifact)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("checksum");
        obj.remove("signature");
        obj.remove("signing_key_id");
    }
    Ok(canonical_json(&value))
}

/// SHA-256 hex over the canonical artifact serialisation.
pub fn build_artifact_checksum(artifact: &ArtifactBundle) -> Result<String> {
    let payload = integrity_payload(artifact)?;
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn validate_artifact_checksum(artifact: &ArtifactBundle) -> bool {
    match (&artifact.checksum, build_artifact_checksum(artifact)) {
        (Some(stored), Ok(expected)) => *stored == expected,
        _ => false,
    }
}

fn decode_hex(input: &str) -> Result<Vec<u8>> {
    if input.len() % 2 != 0 {
        return Err(Error::SignatureMismatch("odd-length hex key".to_string()));
    }
    (0..input.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&input[i..i + 2], 16)
                .map_err(|_| Error::SignatureMismatch("invalid hex key material".to_string()))
        })
        .collect()
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Sign an artifact's integrity payload with the configured key.
pub fn build_artifact_signature(artifact: &ArtifactBundle, config: &SigningConfig) -> Result<String> {
    let payload = integrity_payload(artifact)?;
    match config.algorithm {
        SigningAlgorithm::HmacSha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(config.key_material.as_bytes())
                .map_err(|e| Error::SignatureMismatch(e.to_string()))?;
            mac.update(payload.as_bytes());
            Ok(encode_hex(&mac.finalize().into_bytes()))
        }
        SigningAlgorithm::Ed25519 => {
            use ed25519_dalek::{Signer, SigningKey};
            let seed = decode_hex(config.key_material.trim())?;
            let seed: [u8; 32] = seed
                .try_into()
                .map_err(|_| Error::SignatureMismatch("ed25519 seed must be 32 bytes".into()))?;
            let key = SigningKey::from_bytes(&seed);
            Ok(encode_hex(&key.sign(payload.as_bytes()).to_bytes()))
        }
    }
}

/// Verify an artifact's signature against the configured key.
pub fn verify_artifact_signature(artifact: &ArtifactBundle, config: &SigningConfig) -> bool {
    let Some(signature) = &artifact.signature else {
        return false;
    };
    match config.algorithm {
        SigningAlgorithm::HmacSha256 => build_artifact_signature(artifact, config)
            .map(|expected| expected == *signature)
            .unwrap_or(false),
        SigningAlgorithm::Ed25519 => {
            use ed25519_dalek::{Signature, SigningKey, Verifier};
            let Ok(payload) = integrity_payload(artifact) else {
                return false;
            };
            let Ok(seed) = decode_hex(config.key_material.trim()) else {
                return false;
            };
            let seed: [u8; 32] = match seed.try_into() {
                Ok(seed) => seed,
                Err(_) => return false,
            };
            let Ok(raw) = decode_hex(signature) else {
                return false;
            };
            let raw: [u8; 64] = match raw.try_into() {
                Ok(raw) => raw,
                Err(_) => return false,
            };
            let verifying_key = SigningKey::from_bytes(&seed).verifying_key();
            verifying_key
                .verify(payload.as_bytes(), &Signature::from_bytes(&raw))
                .is_ok()
        }
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// Per-remote circuit breaker: closed → open after a failure threshold,
/// half-open after the reset timeout, closed again on success.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    failure_count: u32,
    opened_at: Option<Instant>,
    state: BreakerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(10))
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            failure_count: 0,
            opened_at: None,
            state: BreakerState::Closed,
        }
    }

    /// Rehydrate from persisted state. An open breaker restarts its
    /// reset window now rather than trusting a wall-clock string.
    pub fn from_persisted(state: &str, failure_count: i64) -> Self {
        let mut breaker = Self::default();
        breaker.failure_count = failure_count.max(0) as u32;
        breaker.state = match state {
            "open" => {
                breaker.opened_at = Some(Instant::now());
                BreakerState::Open
            }
            "half_open" => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        };
        breaker
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn allow_request(&mut self) -> bool {
        if self.state != BreakerState::Open {
            return true;
        }
        let elapsed = self
            .opened_at
            .map(|at| at.elapsed())
            .unwrap_or(self.reset_timeout);
        if elapsed >= self.reset_timeout {
            self.state = BreakerState::HalfOpen;
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.state = BreakerState::Closed;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.failure_count = self.failure_threshold;
        } else {
            self.failure_count += 1;
        }
        if self.failure_count >= self.failure_threshold {
            self.state = BreakerState::Open;
            self.opened_at = Some(Instant::now());
        }
    }
}

// ---------------------------------------------------------------------------
// Compatibility policy
// ---------------------------------------------------------------------------

/// Gates deltas and artifacts on schema version, tool major version, and
/// snapshot lineage.
#[derive(Debug, Clone)]
pub struct CompatibilityPolicy {
    pub tool_version: String,
    pub delta_schema_version: i64,
    pub artifact_schema_version: i64,
}

impl Default for CompatibilityPolicy {
    fn default() -> Self {
        Self {
            tool_version: TOOL_VERSION.to_string(),
            delta_schema_version: DELTA_SCHEMA_VERSION,
            artifact_schema_version: ARTIFACT_SCHEMA_VERSION,
        }
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

impl CompatibilityPolicy {
    pub fn evaluate_delta(&self, delta: &IndexDelta) -> (bool, &'static str) {
        if delta.header.schema_version != self.delta_schema_version {
            return (false, "delta_schema_mismatch");
        }
        if major(&delta.header.tool_version) != major(&self.tool_version) {
            return (false, "delta_tool_mismatch");
        }
        (true, "ok")
    }

    pub fn evaluate_artifact(
        &self,
        artifact: &ArtifactBundle,
        repo_id: &str,
        snapshot_id: &str,
        parent_snapshot: Option<&str>,
    ) -> (bool, &'static str) {
        if artifact.repo_id != repo_id {
            return (false, "repo_mismatch");
        }
        if artifact.schema_version != self.artifact_schema_version {
            return (false, "artifact_schema_mismatch");
        }
        if major(&artifact.tool_version) != major(&self.tool_version) {
            return (false, "artifact_tool_mismatch");
        }
        let mut lineage = vec![snapshot_id];
        if let Some(parent) = parent_snapshot {
            lineage.push(parent);
        }
        if lineage.contains(&artifact.snapshot_id.as_str()) {
            return (true, "ok");
        }
        if let Some(artifact_parent) = &artifact.parent_snapshot {
            if lineage.contains(&artifact_parent.as_str()) {
                return (true, "ok");
            }
        }
        (false, "lineage_mismatch")
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Outcome of one push attempt.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub ok: bool,
    pub mode: String,
    pub reason: String,
}

/// Outcome of one pull attempt, with the verified artifact on success.
#[derive(Debug)]
pub struct PullOutcome {
    pub artifact: Option<ArtifactBundle>,
    pub mode: String,
    pub reason: String,
}

/// Sync client: wraps a transport with per-call timeouts, the circuit
/// breaker, compatibility gating, quarantine, and integrity checks.
pub struct SyncClient {
    transport: Arc<dyn SyncTransport>,
    policy: CompatibilityPolicy,
    timeout: Duration,
    pub breaker: CircuitBreaker,
    quarantined: std::collections::HashSet<String>,
    quarantine_additions: Vec<(String, String)>,
    signing: Option<SigningConfig>,
}

impl SyncClient {
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        policy: CompatibilityPolicy,
        timeout_ms: u64,
        breaker: CircuitBreaker,
        quarantined: std::collections::HashSet<String>,
        signing: Option<SigningConfig>,
    ) -> Self {
        Self {
            transport,
            policy,
            timeout: Duration::from_millis(timeout_ms.max(10)),
            breaker,
            quarantined,
            quarantine_additions: Vec::new(),
            signing,
        }
    }

    /// Quarantine entries discovered during this client's lifetime, for
    /// the caller to persist.
    pub fn quarantine_additions(&self) -> &[(String, String)] {
        &self.quarantine_additions
    }

    fn call_with_timeout<T: Send + 'static>(
        &self,
        f: impl FnOnce() -> Result<T> + Send + 'static,
    ) -> Result<T> {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(f());
        });
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(_) => Err(Error::RemoteTimeout(self.timeout.as_millis() as u64)),
        }
    }

    pub fn push_delta(&mut self, delta: &IndexDelta) -> SyncOutcome {
        let (compatible, reason) = self.policy.evaluate_delta(delta);
        if !compatible {
            return SyncOutcome {
                ok: false,
                mode: "local_fallback".into(),
                reason: reason.into(),
            };
        }
        if !self.breaker.allow_request() {
            return SyncOutcome {
                ok: false,
                mode: "local_fallback".into(),
                reason: "circuit_open".into(),
            };
        }

        let transport = Arc::clone(&self.transport);
        let delta = delta.clone();
        match self.call_with_timeout(move || transport.push_delta(&delta)) {
            Err(Error::RemoteTimeout(_)) => {
                self.breaker.record_failure();
                SyncOutcome {
                    ok: false,
                    mode: "local_fallback".into(),
                    reason: "push_timeout".into(),
                }
            }
            Err(_) => {
                self.breaker.record_failure();
                SyncOutcome {
                    ok: false,
                    mode: "local_fallback".into(),
                    reason: "push_error".into(),
                }
            }
            Ok(receipt) if receipt.accepted => {
                self.breaker.record_success();
                SyncOutcome {
                    ok: true,
                    mode: "hybrid".into(),
                    reason: "pushed".into(),
                }
            }
            Ok(_) => {
                self.breaker.record_failure();
                SyncOutcome {
                    ok: false,
                    mode: "local_fallback".into(),
                    reason: "push_rejected".into(),
                }
            }
        }
    }

    pub fn pull_artifact(
        &mut self,
        repo_id: &str,
        snapshot_id: &str,
        parent_snapshot: Option<&str>,
    ) -> PullOutcome {
        if !self.breaker.allow_request() {
            return PullOutcome {
                artifact: None,
                mode: "local_fallback".into(),
                reason: "circuit_open".into(),
            };
        }

        let transport = Arc::clone(&self.transport);
        let repo = repo_id.to_string();
        let snapshot = snapshot_id.to_string();
        let parent = parent_snapshot.map(|p| p.to_string());
        let pulled = self.call_with_timeout(move || {
            transport.pull_latest_artifact(&repo, &snapshot, parent.as_deref())
        });

        let artifact = match pulled {
            Err(Error::RemoteTimeout(_)) => {
                self.breaker.record_failure();
                return PullOutcome {
                    artifact: None,
                    mode: "local_fallback".into(),
                    reason: "pull_timeout".into(),
                };
            }
            Err(_) => {
                self.breaker.record_failure();
                return PullOutcome {
                    artifact: None,
                    mode: "local_fallback".into(),
                    reason: "pull_error".into(),
                };
            }
            Ok(None) => {
                self.breaker.record_success();
                return PullOutcome {
                    artifact: None,
                    mode: "local_fallback".into(),
                    reason: "no_artifact".into(),
                };
            }
            Ok(Some(artifact)) => artifact,
        };

        if self.quarantined.contains(&artifact.artifact_id) {
            return PullOutcome {
                artifact: None,
                mode: "local_fallback".into(),
                reason: "artifact_quarantined".into(),
            };
        }

        let (compatible, reason) =
            self.policy
                .evaluate_artifact(&artifact, repo_id, snapshot_id, parent_snapshot);
        if !compatible {
            // Incompatible artifacts are skipped, never quarantined.
            self.breaker.record_success();
            return PullOutcome {
                artifact: None,
                mode: "local_fallback".into(),
                reason: reason.into(),
            };
        }

        if !validate_artifact_checksum(&artifact) {
            self.breaker.record_failure();
            self.quarantine(&artifact.artifact_id, "checksum_mismatch");
            return PullOutcome {
                artifact: None,
                mode: "local_fallback".into(),
                reason: "checksum_mismatch".into(),
            };
        }

        if let Some(config) = &self.signing {
            if !verify_artifact_signature(&artifact, config) {
                self.breaker.record_failure();
                self.quarantine(&artifact.artifact_id, "signature_mismatch");
                return PullOutcome {
                    artifact: None,
                    mode: "local_fallback".into(),
                    reason: "signature_mismatch".into(),
                };
            }
        }

        self.breaker.record_success();
        PullOutcome {
            artifact: Some(artifact),
            mode: "remote_artifact".into(),
            reason: "pulled".into(),
        }
    }

    fn quarantine(&mut self, artifact_id: &str, reason: &str) {
        self.quarantined.insert(artifact_id.to_string());
        self.quarantine_additions
            .push((artifact_id.to_string(), reason.to_string()));
    }
}

// ---------------------------------------------------------------------------
// In-memory transport (reference implementation of the contract)
// ---------------------------------------------------------------------------

/// In-memory transport: accepts deltas, promotes them to artifacts, and
/// serves the latest artifact per repo. Useful for tests and as the
/// minimal reference for the contract.
#[derive(Default)]
pub struct InMemoryTransport {
    artifacts: parking_lot::Mutex<HashMap<String, ArtifactBundle>>,
    pub signing: Option<SigningConfig>,
}

impl InMemoryTransport {
    pub fn new(signing: Option<SigningConfig>) -> Self {
        Self {
            artifacts: parking_lot::Mutex::new(HashMap::new()),
            signing,
        }
    }

    /// Plant an artifact directly (for corruption/quarantine tests).
    pub fn plant_artifact(&self, artifact: ArtifactBundle) {
        self.artifacts
            .lock()
            .insert(artifact.repo_id.clone(), artifact);
    }
}

impl SyncTransport for InMemoryTransport {
    fn push_delta(&self, delta: &IndexDelta) -> Result<PushReceipt> {
        let promotion = reconcile::promote_delta(
            delta,
            &format!("artifact-{}", delta.header.local_snapshot),
            &delta.header.local_snapshot,
            &reconcile::PromotionPolicy::default(),
        )?;
        let mut detail = HashMap::new();
        detail.insert(
            "artifact_promoted".to_string(),
            promotion.promoted.to_string(),
        );
        if let Some(mut artifact) = promotion.artifact {
            if let Some(config) = &self.signing {
                artifact.signature = Some(build_artifact_signature(&artifact, config)?);
                artifact.signing_key_id = Some(config.key_id.clone());
            }
            self.artifacts
                .lock()
                .insert(artifact.repo_id.clone(), artifact);
        }
        Ok(PushReceipt {
            accepted: true,
            detail,
        })
    }

    fn pull_latest_artifact(
        &self,
        repo_id: &str,
        _snapshot_id: &str,
        _parent_snapshot: Option<&str>,
    ) -> Result<Option<ArtifactBundle>> {
        Ok(self.artifacts.lock().get(repo_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
