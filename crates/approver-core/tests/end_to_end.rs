//! Exercises `Manager` end to end against the numbered scenarios, using
//! in-memory fakes for the external collaborators and a hand-built
//! `ParsedCsr` in place of a real decoded certificate (CSR decoding itself
//! is covered by `csr::parse`'s own unit tests).
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use approver_core::approvers::allowed::Allowed;
use approver_core::approvers::constraints::Constraints;
use approver_core::cel::Cache;
use approver_core::external::{CancellationToken, Clock, NamespaceLabels, PolicyStore, RbacChecker};
use approver_core::manager::{Decision, EmptyPolicy, Manager};
use approver_core::model::{
    AllowedStringSlice, Allowed as AllowedSpec, CertificateRequest, CertificateRequestPolicy,
    ConditionStatus, Constraints as ConstraintsSpec, IssuerRef, IssuerRefSelector, ParsedCsr,
    PolicyCondition, PolicySpec, PolicyStatus, PrivateKeyConstraints, PublicKeyAlgorithm, Selector,
    Subject,
};
use approver_core::registry::Registry;

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
        _extra: &std::collections::BTreeMap<String, Vec<String>>,
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

fn registry_with_builtins() -> Registry {
    let registry = Registry::new();
    registry.store(Arc::new(Allowed::new(Cache::new())));
    registry.store(Arc::new(Constraints));
    registry
}

fn request(namespace: &str, dns_names: Vec<&str>) -> (CertificateRequest, ParsedCsr) {
    let req = CertificateRequest {
        name: "cr-1".into(),
        namespace: namespace.into(),
        username: "alice".into(),
        groups: Vec::new(),
        uid: String::new(),
        extra: BTreeMap::new(),
        request: String::new(),
        issuer_ref: IssuerRef {
            name: "my-issuer".into(),
            kind: String::new(),
            group: String::new(),
        },
        duration: None,
        is_ca: false,
        usages: Vec::new(),
    };
    let parsed = ParsedCsr {
        subject: Subject::default(),
        dns_names: dns_names.into_iter().map(str::to_string).collect(),
        public_key_algorithm: PublicKeyAlgorithm::Rsa,
        public_key_size: 2048,
        ..Default::default()
    };
    (req, parsed)
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

fn allow_all_dns_policy(name: &str) -> CertificateRequestPolicy {
    ready_policy(
        name,
        PolicySpec {
            allowed: Some(AllowedSpec {
                dns_names: Some(AllowedStringSlice {
                    values: Some(vec!["*".into()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    )
}

#[test]
fn scenario_1_no_policies_is_unprocessed() {
    let registry = registry_with_builtins();
    let store = FakeStore(Mutex::new(Vec::new()));
    let rbac = AllowAllRbac;
    let labels = EmptyLabels;
    let clock = FixedClock;
    let manager = Manager {
        registry: &registry,
        policy_store: &store,
        rbac: &rbac,
        namespace_labels: &labels,
        clock: &clock,
        empty_policy: EmptyPolicy::Unprocessed,
    };
    let (req, parsed) = request("default", vec!["foo"]);
    let decision = manager.review_parsed(&req, &parsed, &CancellationToken::new());
    assert!(matches!(decision, Decision::Unprocessed));
}

#[test]
fn scenario_2_unbound_policy_is_unprocessed() {
    let registry = registry_with_builtins();
    let store = FakeStore(Mutex::new(vec![allow_all_dns_policy("allow-all")]));
    struct DenyAllRbac;
    impl RbacChecker for DenyAllRbac {
        fn check(
            &self,
            _namespace: &str,
            _username: &str,
            _groups: &[String],
            _uid: &str,
            _extra: &std::collections::BTreeMap<String, Vec<String>>,
            _policy_name: &str,
        ) -> anyhow::Result<bool> {
            Ok(false)
        }
    }
    let rbac = DenyAllRbac;
    let labels = EmptyLabels;
    let clock = FixedClock;
    let manager = Manager {
        registry: &registry,
        policy_store: &store,
        rbac: &rbac,
        namespace_labels: &labels,
        clock: &clock,
        empty_policy: EmptyPolicy::Unprocessed,
    };
    let (req, parsed) = request("default", vec!["foo"]);
    let decision = manager.review_parsed(&req, &parsed, &CancellationToken::new());
    assert!(matches!(decision, Decision::Unprocessed));
}

#[test]
fn scenario_3_bound_allow_all_approves() {
    let registry = registry_with_builtins();
    let store = FakeStore(Mutex::new(vec![allow_all_dns_policy("allow-all")]));
    let rbac = AllowAllRbac;
    let labels = EmptyLabels;
    let clock = FixedClock;
    let manager = Manager {
        registry: &registry,
        policy_store: &store,
        rbac: &rbac,
        namespace_labels: &labels,
        clock: &clock,
        empty_policy: EmptyPolicy::Unprocessed,
    };
    let (req, parsed) = request("default", vec!["foo"]);
    let decision = manager.review_parsed(&req, &parsed, &CancellationToken::new());
    assert!(matches!(decision, Decision::Approved { .. }));
}

#[test]
fn scenario_3_selector_only_policy_approves_request_with_no_allowed_block() {
    let registry = registry_with_builtins();
    let policy = ready_policy(
        "allow-all",
        PolicySpec {
            selector: Some(Selector {
                issuer_ref: Some(IssuerRefSelector::default()),
                namespace: None,
            }),
            ..Default::default()
        },
    );
    let store = FakeStore(Mutex::new(vec![policy]));
    let rbac = AllowAllRbac;
    let labels = EmptyLabels;
    let clock = FixedClock;
    let manager = Manager {
        registry: &registry,
        policy_store: &store,
        rbac: &rbac,
        namespace_labels: &labels,
        clock: &clock,
        empty_policy: EmptyPolicy::Unprocessed,
    };
    let (mut req, mut parsed) = request("default", vec![]);
    req.username = "alice".into();
    parsed.subject.common_name = Some("x".into());
    let decision = manager.review_parsed(&req, &parsed, &CancellationToken::new());
    assert!(
        matches!(decision, Decision::Approved { .. }),
        "expected approval, got {decision:?}"
    );
}

#[test]
fn scenario_4_dns_mismatch_is_denied_with_message() {
    let registry = registry_with_builtins();
    let store = FakeStore(Mutex::new(vec![ready_policy(
        "dns-restricted",
        PolicySpec {
            allowed: Some(AllowedSpec {
                dns_names: Some(AllowedStringSlice {
                    values: Some(vec!["foo.example.com".into()]),
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
    let manager = Manager {
        registry: &registry,
        policy_store: &store,
        rbac: &rbac,
        namespace_labels: &labels,
        clock: &clock,
        empty_policy: EmptyPolicy::Unprocessed,
    };
    let (req, parsed) = request("default", vec!["bar.example.com"]);
    let decision = manager.review_parsed(&req, &parsed, &CancellationToken::new());
    match decision {
        Decision::Denied { message } => assert!(message.contains("dns-restricted")),
        other => panic!("expected Denied, got {other:?}"),
    }
}

#[test]
fn scenario_5_dns_match_approves() {
    let registry = registry_with_builtins();
    let store = FakeStore(Mutex::new(vec![ready_policy(
        "dns-restricted",
        PolicySpec {
            allowed: Some(AllowedSpec {
                dns_names: Some(AllowedStringSlice {
                    values: Some(vec!["foo.example.com".into()]),
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
    let manager = Manager {
        registry: &registry,
        policy_store: &store,
        rbac: &rbac,
        namespace_labels: &labels,
        clock: &clock,
        empty_policy: EmptyPolicy::Unprocessed,
    };
    let (req, parsed) = request("default", vec!["foo.example.com"]);
    let decision = manager.review_parsed(&req, &parsed, &CancellationToken::new());
    assert!(matches!(decision, Decision::Approved { .. }));
}

#[test]
fn scenario_6_cel_guarded_dns_pass_and_fail() {
    let registry = registry_with_builtins();
    let policy = ready_policy(
        "cel-guarded",
        PolicySpec {
            allowed: Some(AllowedSpec {
                dns_names: Some(AllowedStringSlice {
                    validations: Some(vec![approver_core::model::ValidationRule {
                        rule: "self.endsWith(cr.namespace + '.svc')".into(),
                        message: None,
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    let store = FakeStore(Mutex::new(vec![policy]));
    let rbac = AllowAllRbac;
    let labels = EmptyLabels;
    let clock = FixedClock;
    let manager = Manager {
        registry: &registry,
        policy_store: &store,
        rbac: &rbac,
        namespace_labels: &labels,
        clock: &clock,
        empty_policy: EmptyPolicy::Unprocessed,
    };

    let (req_ok, parsed_ok) = request("foo", vec!["bar.foo.svc"]);
    let decision = manager.review_parsed(&req_ok, &parsed_ok, &CancellationToken::new());
    assert!(matches!(decision, Decision::Approved { .. }));

    let (req_bad, parsed_bad) = request("foo", vec!["bar.other.svc"]);
    let decision = manager.review_parsed(&req_bad, &parsed_bad, &CancellationToken::new());
    match decision {
        Decision::Denied { message } => {
            assert!(message.contains("failed rule: self.endsWith(cr.namespace + '.svc')"))
        }
        other => panic!("expected Denied, got {other:?}"),
    }
}

#[test]
fn scenario_7_key_algorithm_mismatch_cites_both_reasons() {
    let registry = registry_with_builtins();
    let store = FakeStore(Mutex::new(vec![ready_policy(
        "rsa-only",
        PolicySpec {
            constraints: Some(ConstraintsSpec {
                private_key: Some(PrivateKeyConstraints {
                    algorithm: Some(PublicKeyAlgorithm::Ecdsa),
                    min_size: Some(4096),
                    max_size: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    )]));
    let rbac = AllowAllRbac;
    let labels = EmptyLabels;
    let clock = FixedClock;
    let manager = Manager {
        registry: &registry,
        policy_store: &store,
        rbac: &rbac,
        namespace_labels: &labels,
        clock: &clock,
        empty_policy: EmptyPolicy::Unprocessed,
    };
    let (req, parsed) = request("default", vec![]);
    let decision = manager.review_parsed(&req, &parsed, &CancellationToken::new());
    match decision {
        Decision::Denied { message } => {
            assert!(message.contains("algorithm"));
            assert!(message.contains("minSize"));
        }
        other => panic!("expected Denied, got {other:?}"),
    }
}

#[test]
fn approved_outcome_names_exactly_one_policy() {
    let registry = registry_with_builtins();
    let store = FakeStore(Mutex::new(vec![
        allow_all_dns_policy("a-first"),
        allow_all_dns_policy("z-last"),
    ]));
    let rbac = AllowAllRbac;
    let labels = EmptyLabels;
    let clock = FixedClock;
    let manager = Manager {
        registry: &registry,
        policy_store: &store,
        rbac: &rbac,
        namespace_labels: &labels,
        clock: &clock,
        empty_policy: EmptyPolicy::Unprocessed,
    };
    let (req, parsed) = request("default", vec!["foo"]);
    let decision = manager.review_parsed(&req, &parsed, &CancellationToken::new());
    match decision {
        Decision::Approved { message } => assert!(message.contains("a-first")),
        other => panic!("expected Approved, got {other:?}"),
    }
}

/// Demonstrates the plugin extension point: a third-party approver is
/// nothing more than an `Approver` impl registered
/// through `Registry::store`. It composes with the built-ins exactly like
/// `allowed` or `constraints` does — the manager has no special knowledge
/// of either.
struct EchoApprover;

impl approver_core::registry::Approver for EchoApprover {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn evaluate(
        &self,
        _request: &CertificateRequest,
        _parsed: &ParsedCsr,
        policy: &CertificateRequestPolicy,
    ) -> anyhow::Result<approver_core::registry::ApproverResult> {
        match policy.spec.plugins.get("echo").and_then(|cfg| cfg.get("deny")) {
            Some(reason) => Ok(approver_core::registry::ApproverResult::Denied(reason.clone())),
            None => Ok(approver_core::registry::ApproverResult::NotDenied),
        }
    }

    fn validate(&self, _policy: &CertificateRequestPolicy) -> Vec<approver_core::registry::FieldError> {
        Vec::new()
    }
}

#[test]
fn plugin_approver_composes_through_manager() {
    let registry = registry_with_builtins();
    registry.store(Arc::new(EchoApprover));

    let mut plugins = BTreeMap::new();
    let mut echo_cfg = BTreeMap::new();
    echo_cfg.insert("deny".to_string(), "echo plugin said no".to_string());
    plugins.insert("echo".to_string(), echo_cfg);

    let store = FakeStore(Mutex::new(vec![ready_policy(
        "echo-denied",
        PolicySpec {
            allowed: Some(AllowedSpec {
                dns_names: Some(AllowedStringSlice {
                    values: Some(vec!["*".into()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            plugins,
            ..Default::default()
        },
    )]));
    let rbac = AllowAllRbac;
    let labels = EmptyLabels;
    let clock = FixedClock;
    let manager = Manager {
        registry: &registry,
        policy_store: &store,
        rbac: &rbac,
        namespace_labels: &labels,
        clock: &clock,
        empty_policy: EmptyPolicy::Unprocessed,
    };
    let (req, parsed) = request("default", vec!["foo"]);
    let decision = manager.review_parsed(&req, &parsed, &CancellationToken::new());
    match decision {
        Decision::Denied { message } => assert!(message.contains("echo plugin said no")),
        other => panic!("expected Denied, got {other:?}"),
    }
}
