//! The orchestration layer: selects which policies bind a request, runs
//! every registered approver against each surviving policy, and composes
//! the results into a single [`Decision`].
use itertools::Itertools;
use rayon::prelude::*;
use tracing::instrument;

use crate::csr;
use crate::errors::Error;
use crate::external::{CancellationToken, Clock, NamespaceLabels, PolicyStore, RbacChecker};
use crate::model::{CertificateRequest, CertificateRequestPolicy};
use crate::predicates::{Predicate, Ready, RbacBound, SelectorIssuerRef, SelectorNamespace};
use crate::registry::{ApproverResult, Registry};

/// The outcome of a single `review` call. Exactly one variant is produced
/// per call; a `Denied` result is a normal, user-visible outcome, not an
/// error — only `InternalError` represents something gone wrong
/// below the policy layer.
#[derive(Debug)]
pub enum Decision {
    Approved { message: String },
    Denied { message: String },
    Unprocessed,
    InternalError(Error),
}

/// Whether an empty candidate set (no policy selected the request) maps
/// to `Unprocessed` (the default) or is promoted to `Approved` at the
/// boundary — a host-configurable escape hatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmptyPolicy {
    #[default]
    Unprocessed,
    ApproveWhenEmpty,
}

pub struct Manager<'a> {
    pub registry: &'a Registry,
    pub policy_store: &'a dyn PolicyStore,
    pub rbac: &'a dyn RbacChecker,
    pub namespace_labels: &'a dyn NamespaceLabels,
    pub clock: &'a dyn Clock,
    pub empty_policy: EmptyPolicy,
}

impl Manager<'_> {
    #[instrument(skip_all, fields(request = %request.name, namespace = %request.namespace))]
    pub fn review(&self, request: &CertificateRequest, cancel: &CancellationToken) -> Decision {
        match self.try_review(request, cancel) {
            Ok(decision) => decision,
            Err(e) => Decision::InternalError(e),
        }
    }

    /// Same as [`Manager::review`], but for hosts that have already decoded
    /// the CSR themselves (e.g. an admission layer that parses once and
    /// reuses the result across several checks) and want to skip a second
    /// decode.
    #[instrument(skip_all, fields(request = %request.name, namespace = %request.namespace))]
    pub fn review_parsed(
        &self,
        request: &CertificateRequest,
        parsed: &crate::model::ParsedCsr,
        cancel: &CancellationToken,
    ) -> Decision {
        match self.decide(request, parsed, cancel) {
            Ok(decision) => decision,
            Err(e) => Decision::InternalError(e),
        }
    }

    fn try_review(
        &self,
        request: &CertificateRequest,
        cancel: &CancellationToken,
    ) -> Result<Decision, Error> {
        let parsed = csr::parse(request.request.as_bytes())?;
        self.decide(request, &parsed, cancel)
    }

    /// The part of `review` downstream of CSR decoding: policy selection,
    /// per-policy evaluation, and composition.
    fn decide(
        &self,
        request: &CertificateRequest,
        parsed: &crate::model::ParsedCsr,
        cancel: &CancellationToken,
    ) -> Result<Decision, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let policies = self
            .policy_store
            .list()
            .map_err(Error::PolicyStore)?;

        let candidates = self.select(request, policies, cancel)?;
        if candidates.is_empty() {
            return Ok(match self.empty_policy {
                EmptyPolicy::Unprocessed => Decision::Unprocessed,
                EmptyPolicy::ApproveWhenEmpty => Decision::Approved {
                    message: "no policies configured".to_string(),
                },
            });
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let approvers = self.registry.evaluators();
        let mut outcomes: Vec<(String, Result<ApproverResult, Error>)> = candidates
            .par_iter()
            .map(|policy| {
                let outcome = self.evaluate_policy(request, parsed, policy, &approvers);
                (policy.name.clone(), outcome)
            })
            .collect();
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, outcome) in &outcomes {
            if let Err(e) = outcome {
                return Err(clone_error(e));
            }
        }

        for (name, outcome) in &outcomes {
            if matches!(outcome, Ok(ApproverResult::NotDenied)) {
                return Ok(Decision::Approved {
                    message: format!("ApprovedBy('{name}')"),
                });
            }
        }

        let message = outcomes
            .into_iter()
            .map(|(name, outcome)| match outcome {
                Ok(ApproverResult::Denied(reason)) => format!("{name}: {reason}"),
                _ => unreachable!("approved outcomes are returned above"),
            })
            .join("; ");

        Ok(Decision::Denied { message })
    }

    fn select(
        &self,
        request: &CertificateRequest,
        policies: Vec<CertificateRequestPolicy>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CertificateRequestPolicy>, Error> {
        let selector_namespace = SelectorNamespace {
            namespace_labels: self.namespace_labels,
        };
        let rbac_bound = RbacBound { rbac: self.rbac };

        let mut candidates = Vec::new();
        for policy in policies {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if !Ready.keep(request, &policy).map_err(Error::PolicyStore)? {
                continue;
            }
            if !SelectorIssuerRef.keep(request, &policy).map_err(Error::PolicyStore)? {
                continue;
            }
            if !selector_namespace
                .keep(request, &policy)
                .map_err(Error::NamespaceLabels)?
            {
                continue;
            }
            if !rbac_bound.keep(request, &policy).map_err(Error::Rbac)? {
                continue;
            }
            candidates.push(policy);
        }
        Ok(candidates)
    }

    fn evaluate_policy(
        &self,
        request: &CertificateRequest,
        parsed: &crate::model::ParsedCsr,
        policy: &CertificateRequestPolicy,
        approvers: &[std::sync::Arc<dyn crate::registry::Approver>],
    ) -> Result<ApproverResult, Error> {
        let mut denials = Vec::new();
        for approver in approvers {
            match approver.evaluate(request, parsed, policy) {
                Ok(ApproverResult::NotDenied) => {}
                Ok(ApproverResult::Denied(reason)) => denials.push(reason),
                Err(source) => {
                    return Err(Error::Evaluation {
                        approver: approver.name().to_string(),
                        source,
                    });
                }
            }
        }
        if denials.is_empty() {
            Ok(ApproverResult::NotDenied)
        } else {
            Ok(ApproverResult::Denied(denials.into_iter().join(", ")))
        }
    }
}

fn clone_error(e: &Error) -> Error {
    match e {
        Error::Cancelled => Error::Cancelled,
        other => Error::Evaluation {
            approver: "manager".to_string(),
            source: anyhow::anyhow!(other.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Allowed, AllowedStringSlice, ConditionStatus, IssuerRef, PolicyCondition, PolicySpec,
        PolicyStatus,
    };
    use crate::registry::Registry;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FakeStore(Mutex<Vec<CertificateRequestPolicy>>);
    impl PolicyStore for FakeStore {
        fn list(&self) -> anyhow::Result<Vec<CertificateRequestPolicy>> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    struct AllowAllRbac;
    impl RbacChecker for AllowAllRbac {
        fn check(
            &self,
            _namespace: &str,
            _username: &str,
            _groups: &[String],
            _uid: &str,
            _extra: &BTreeMap<String, Vec<String>>,
            _policy_name: &str,
        ) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    struct EmptyLabels;
    impl NamespaceLabels for EmptyLabels {
        fn get(&self, _namespace: &str) -> anyhow::Result<BTreeMap<String, String>> {
            Ok(BTreeMap::new())
        }
    }

    struct FixedClock;
    impl Clock for FixedClock {
        fn now(&self) -> time::OffsetDateTime {
            time::OffsetDateTime::UNIX_EPOCH
        }
    }

    fn request() -> CertificateRequest {
        CertificateRequest {
            name: "cr".into(),
            namespace: "default".into(),
            username: "alice".into(),
            groups: Vec::new(),
            uid: String::new(),
            extra: Default::default(),
            request: String::new(),
            issuer_ref: IssuerRef::default(),
            duration: None,
            is_ca: false,
            usages: Vec::new(),
        }
    }

    fn parsed() -> crate::model::ParsedCsr {
        crate::model::ParsedCsr {
            dns_names: vec!["bar.default.svc".into()],
            ..Default::default()
        }
    }

    fn ready_policy(name: &str, spec: PolicySpec) -> CertificateRequestPolicy {
        CertificateRequestPolicy {
            name: name.into(),
            generation: 1,
            spec,
            status: PolicyStatus {
                conditions: vec![PolicyCondition {
                    condition_type: "Ready".into(),
                    status: ConditionStatus::True,
                    reason: None,
                    message: None,
                    last_transition_time: None,
                    observed_generation: 1,
                }],
            },
        }
    }

    fn manager<'a>(
        registry: &'a Registry,
        store: &'a FakeStore,
        rbac: &'a AllowAllRbac,
        labels: &'a EmptyLabels,
        clock: &'a FixedClock,
    ) -> Manager<'a> {
        Manager {
            registry,
            policy_store: store,
            rbac,
            namespace_labels: labels,
            clock,
            empty_policy: EmptyPolicy::Unprocessed,
        }
    }

    #[test]
    fn no_policies_is_unprocessed() {
        let registry = Registry::new();
        let store = FakeStore(Mutex::new(Vec::new()));
        let rbac = AllowAllRbac;
        let labels = EmptyLabels;
        let clock = FixedClock;
        let mgr = manager(&registry, &store, &rbac, &labels, &clock);
        let decision = mgr.review_parsed(&request(), &parsed(), &CancellationToken::new());
        assert!(matches!(decision, Decision::Unprocessed));
    }

    #[test]
    fn empty_policy_set_can_be_configured_to_approve() {
        let registry = Registry::new();
        let store = FakeStore(Mutex::new(Vec::new()));
        let rbac = AllowAllRbac;
        let labels = EmptyLabels;
        let clock = FixedClock;
        let mut mgr = manager(&registry, &store, &rbac, &labels, &clock);
        mgr.empty_policy = EmptyPolicy::ApproveWhenEmpty;
        let decision = mgr.review_parsed(&request(), &parsed(), &CancellationToken::new());
        assert!(matches!(decision, Decision::Approved { .. }));
    }

    #[test]
    fn bound_allow_all_policy_approves() {
        let registry = Registry::new();
        registry.store(std::sync::Arc::new(crate::approvers::allowed::Allowed::new(
            crate::cel::Cache::new(),
        )));
        let store = FakeStore(Mutex::new(vec![ready_policy(
            "allow-all",
            PolicySpec {
                allowed: Some(Allowed {
                    dns_names: Some(AllowedStringSlice {
                        values: Some(vec!["*".into()]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )]));
        let rbac = AllowAllRbac;
        let labels = EmptyLabels;
        let clock = FixedClock;
        let mgr = manager(&registry, &store, &rbac, &labels, &clock);
        let decision = mgr.review_parsed(&request(), &parsed(), &CancellationToken::new());
        assert!(matches!(decision, Decision::Approved { .. }));
    }

    #[test]
    fn dns_name_outside_allowed_list_is_denied_citing_policy_name() {
        let registry = Registry::new();
        registry.store(std::sync::Arc::new(crate::approvers::allowed::Allowed::new(
            crate::cel::Cache::new(),
        )));
        let store = FakeStore(Mutex::new(vec![ready_policy(
            "dns-restricted",
            PolicySpec {
                allowed: Some(Allowed {
                    dns_names: Some(AllowedStringSlice {
                        values: Some(vec!["only.allowed.svc".into()]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )]));
        let rbac = AllowAllRbac;
        let labels = EmptyLabels;
        let clock = FixedClock;
        let mgr = manager(&registry, &store, &rbac, &labels, &clock);
        let decision = mgr.review_parsed(&request(), &parsed(), &CancellationToken::new());
        match decision {
            Decision::Denied { message } => assert!(message.contains("dns-restricted")),
            other => panic!("expected Denied, got {other:?}"),
        }
    }

    #[test]
    fn decode_failure_is_internal_error_not_denied() {
        let registry = Registry::new();
        let store = FakeStore(Mutex::new(vec![ready_policy("any", PolicySpec::default())]));
        let rbac = AllowAllRbac;
        let labels = EmptyLabels;
        let clock = FixedClock;
        let mgr = manager(&registry, &store, &rbac, &labels, &clock);
        let mut bad_request = request();
        bad_request.request = "not a csr".to_string();
        let decision = mgr.review(&bad_request, &CancellationToken::new());
        assert!(matches!(decision, Decision::InternalError(_)));
    }
}
