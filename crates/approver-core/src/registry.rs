//! Process-wide, name-unique store of registered approvers.
//!
//! The registry is written once at process init (built-ins plus whatever
//! plugin approvers the host links in) and read-only thereafter. Tests
//! construct their own [`Registry`] rather than reaching for the global
//! one, so approver composition can be exercised without process-wide
//! state.
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::model::{CertificateRequest, CertificateRequestPolicy, ParsedCsr};

/// Outcome of a single approver evaluating a single policy against a
/// single request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApproverResult {
    NotDenied,
    Denied(String),
}

/// A field-level error produced by webhook (admission-time) validation of
/// a policy, e.g. a malformed CEL rule or an out-of-range constraint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Capability bundle every approver — built-in or plugin — must implement.
/// `evaluate` runs per-request; `validate` runs once, at policy admission
/// time, and never raises to end users — it reports field errors that
/// block admission instead.
pub trait Approver: Send + Sync {
    /// Unique, stable name this approver is registered under.
    fn name(&self) -> &'static str;

    /// Runs once at process startup, before any request is evaluated.
    /// Built-ins have nothing to prepare; plugins may use this to warm a
    /// cache or dial a backing service.
    fn prepare(&self) {}

    /// Whether the approver is ready to evaluate requests. The manager
    /// does not currently gate on this (readiness is modelled at the
    /// policy level, via `CertificateRequestPolicy::is_ready`), but plugin
    /// approvers may use it for their own startup/liveness bookkeeping.
    fn ready(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        request: &CertificateRequest,
        parsed: &ParsedCsr,
        policy: &CertificateRequestPolicy,
    ) -> anyhow::Result<ApproverResult>;

    /// Webhook-time validation of a candidate policy. An empty result
    /// means the policy passes this approver's admission checks.
    fn validate(&self, policy: &CertificateRequestPolicy) -> Vec<FieldError>;
}

#[derive(Default)]
pub struct Registry {
    approvers: std::sync::Mutex<BTreeMap<&'static str, Arc<dyn Approver>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `approver`. Panics if another approver already holds the
    /// same name — a duplicate registration is a programmer error caught
    /// at process init, not something callers recover from.
    pub fn store(&self, approver: Arc<dyn Approver>) {
        let name = approver.name();
        let mut approvers = self.approvers.lock().unwrap();
        if approvers.contains_key(name) {
            panic!("approver already registered: {name}");
        }
        approver.prepare();
        approvers.insert(name, approver);
    }

    /// All registered approvers, in a stable (name-lexicographic) order.
    pub fn approvers(&self) -> Vec<Arc<dyn Approver>> {
        self.approvers.lock().unwrap().values().cloned().collect()
    }

    /// Same as [`Registry::approvers`]: every registered approver
    /// implements `Evaluate`, so this crate has no narrower evaluator-only
    /// subset to expose.
    pub fn evaluators(&self) -> Vec<Arc<dyn Approver>> {
        self.approvers()
    }

    /// Same as [`Registry::approvers`]: every registered approver also
    /// implements `Validate`.
    pub fn webhook_validators(&self) -> Vec<Arc<dyn Approver>> {
        self.approvers()
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry, lazily populated with the built-in
/// approvers on first access. Prefer constructing an explicit
/// [`Registry`] in tests and host code that wires its own plugin set;
/// this global exists for the common case of "just the built-ins".
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(|| {
        let registry = Registry::new();
        registry.store(Arc::new(crate::approvers::allowed::Allowed::new(
            crate::cel::Cache::new(),
        )));
        registry.store(Arc::new(crate::approvers::constraints::Constraints));
        registry
    })
}
