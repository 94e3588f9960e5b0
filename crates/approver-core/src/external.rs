//! Collaborator traits the host process implements and hands to
//! [`crate::manager::Manager`]. The core never reads a filesystem, talks to
//! Kubernetes, or calls an RBAC service directly — it only ever sees these
//! four seams, the same separation between evaluation and callback host
//! used elsewhere in this codebase.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::model::CertificateRequestPolicy;

/// Snapshot of every policy currently in the store. Implementations are
/// free to cache, poll, or watch — the core only ever asks for a fresh
/// snapshot once per review.
pub trait PolicyStore: Send + Sync {
    fn list(&self) -> anyhow::Result<Vec<CertificateRequestPolicy>>;
}

/// Whether the subject identified by `username`/`groups`/`uid`/`extra` may
/// use `policy_name` to sign requests in `namespace`.
pub trait RbacChecker: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn check(
        &self,
        namespace: &str,
        username: &str,
        groups: &[String],
        uid: &str,
        extra: &std::collections::BTreeMap<String, Vec<String>>,
        policy_name: &str,
    ) -> anyhow::Result<bool>;
}

/// Label lookup for namespace-scoped selectors.
pub trait NamespaceLabels: Send + Sync {
    fn get(&self, namespace: &str) -> anyhow::Result<std::collections::BTreeMap<String, String>>;
}

/// Wall-clock access, seamed out so tests can fix "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> time::OffsetDateTime;
}

/// Cooperative cancellation signal threaded through a review. Checked at
/// points where the manager is about to do more than negligible work (the
/// per-policy approver fan-out); never checked mid-approver, since
/// approvers are expected to be fast and side-effect-free.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
