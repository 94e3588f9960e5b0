//! Composable predicates that filter the policy store down to the
//! candidates a request is actually bound by. Order matters: cheap,
//! purely-local checks run before the one predicate that calls out to a
//! collaborator (`RBACBound`), so a request with no locally-matching
//! policies never reaches the RBAC checker at all.
use crate::external::RbacChecker;
use crate::model::{CertificateRequest, CertificateRequestPolicy};
use crate::wildcard;

pub trait Predicate {
    fn keep(&self, request: &CertificateRequest, policy: &CertificateRequestPolicy) -> anyhow::Result<bool>;
}

/// Only policies whose `status.conditions` report `Ready=True` at the
/// current generation are eligible.
pub struct Ready;

impl Predicate for Ready {
    fn keep(&self, _request: &CertificateRequest, policy: &CertificateRequestPolicy) -> anyhow::Result<bool> {
        Ok(policy.is_ready())
    }
}

/// Matches `policy.spec.selector.issuerRef` against the request's issuer,
/// with the same `kind`/`group` defaulting as [`CertificateRequest`]
/// itself. A policy with no `issuerRef` selector matches any issuer.
pub struct SelectorIssuerRef;

impl Predicate for SelectorIssuerRef {
    fn keep(&self, request: &CertificateRequest, policy: &CertificateRequestPolicy) -> anyhow::Result<bool> {
        let Some(selector) = policy.spec.selector.as_ref().and_then(|s| s.issuer_ref.as_ref()) else {
            return Ok(true);
        };

        let name_ok = selector
            .name
            .as_deref()
            .is_none_or(|pattern| wildcard::matches(pattern, &request.issuer_ref.name));
        let kind_ok = selector
            .kind
            .as_deref()
            .is_none_or(|pattern| wildcard::matches(pattern, request.issuer_kind()));
        let group_ok = selector
            .group
            .as_deref()
            .is_none_or(|pattern| wildcard::matches(pattern, request.issuer_group()));

        Ok(name_ok && kind_ok && group_ok)
    }
}

/// Matches `policy.spec.selector.namespace` against the request's
/// namespace. `matchNames` is checked first since it never needs a
/// collaborator call; `matchLabels` is only consulted once `matchNames`
/// has already passed (or is itself absent), avoiding a namespace lookup
/// for policies that were never going to apply anyway.
pub struct SelectorNamespace<'a> {
    pub namespace_labels: &'a dyn crate::external::NamespaceLabels,
}

impl Predicate for SelectorNamespace<'_> {
    fn keep(&self, request: &CertificateRequest, policy: &CertificateRequestPolicy) -> anyhow::Result<bool> {
        let Some(selector) = policy.spec.selector.as_ref().and_then(|s| s.namespace.as_ref()) else {
            return Ok(true);
        };

        if let Some(names) = &selector.match_names {
            let matched = names.is_empty() || wildcard::subset(&[request.namespace.as_str()], names.as_slice())
                || names.iter().any(|pattern| wildcard::matches(pattern, &request.namespace));
            if !matched {
                return Ok(false);
            }
        }

        if let Some(required) = &selector.match_labels {
            if required.is_empty() {
                return Ok(true);
            }
            let actual = self.namespace_labels.get(&request.namespace)?;
            let matched = required
                .iter()
                .all(|(k, v)| actual.get(k).is_some_and(|actual_v| actual_v == v));
            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// The final gate: the request's author must be RBAC-bound to use this
/// named policy. Exactly one collaborator call per surviving policy.
pub struct RbacBound<'a> {
    pub rbac: &'a dyn RbacChecker,
}

impl Predicate for RbacBound<'_> {
    fn keep(&self, request: &CertificateRequest, policy: &CertificateRequestPolicy) -> anyhow::Result<bool> {
        self.rbac.check(
            &request.namespace,
            &request.username,
            &request.groups,
            &request.uid,
            &request.extra,
            &policy.name,
        )
    }
}
