use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::model::request::{KeyUsage, PublicKeyAlgorithm};

/// Cluster-scoped policy resource. `name` is unique across the store — the
/// core assumes the snapshot handed to it by [`crate::external::PolicyStore`]
/// already upholds that invariant; it is a store-side concern, not
/// re-validated here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestPolicy {
    pub name: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub spec: PolicySpec,
    #[serde(default)]
    pub status: PolicyStatus,
}

impl CertificateRequestPolicy {
    /// `Ready=True` observed at the current `generation`; anything else
    /// (missing condition, `False`/`Unknown`, or a stale `observedGeneration`)
    /// is "not ready".
    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == "Ready")
            .map(|c| {
                c.status == ConditionStatus::True && c.observed_generation >= self.generation
            })
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default)]
    pub allowed: Option<Allowed>,
    #[serde(default)]
    pub constraints: Option<Constraints>,
    /// Opaque plugin configuration, keyed by plugin name. The core never
    /// interprets these values; it hands them, unexamined, to whichever
    /// registered [`crate::registry::Approver`] matches the key.
    #[serde(default)]
    pub plugins: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub selector: Option<Selector>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default)]
    pub issuer_ref: Option<IssuerRefSelector>,
    #[serde(default)]
    pub namespace: Option<NamespaceSelector>,
}

impl Selector {
    /// The stricter selector rule: at least one subfield must be set.
    /// Checked at admission (webhook) time, never silently tolerated at
    /// runtime even if storage contains one.
    pub fn is_empty(&self) -> bool {
        self.issuer_ref.is_none() && self.namespace.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRefSelector {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default)]
    pub match_names: Option<Vec<String>>,
    #[serde(default)]
    pub match_labels: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_transition_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub observed_generation: i64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Rules describing what the request is allowed to carry. Every attribute
/// *present* in the request must be permitted here, and every attribute
/// marked `required` must actually be present — see
/// [`crate::approvers::allowed`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allowed {
    #[serde(default)]
    pub common_name: Option<AllowedString>,
    #[serde(default)]
    pub subject: Option<AllowedX509Subject>,
    #[serde(default)]
    pub dns_names: Option<AllowedStringSlice>,
    #[serde(default)]
    pub ip_addresses: Option<AllowedStringSlice>,
    #[serde(default)]
    pub uris: Option<AllowedStringSlice>,
    #[serde(default)]
    pub email_addresses: Option<AllowedStringSlice>,
    #[serde(default)]
    pub is_ca: Option<bool>,
    #[serde(default)]
    pub usages: Option<Vec<KeyUsage>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedX509Subject {
    #[serde(default)]
    pub organizations: Option<AllowedStringSlice>,
    #[serde(default)]
    pub countries: Option<AllowedStringSlice>,
    #[serde(default)]
    pub organizational_units: Option<AllowedStringSlice>,
    #[serde(default)]
    pub localities: Option<AllowedStringSlice>,
    #[serde(default)]
    pub provinces: Option<AllowedStringSlice>,
    #[serde(default)]
    pub street_addresses: Option<AllowedStringSlice>,
    #[serde(default)]
    pub postal_codes: Option<AllowedStringSlice>,
    #[serde(default)]
    pub serial_number: Option<AllowedString>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedString {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub validations: Option<Vec<ValidationRule>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedStringSlice {
    #[serde(default)]
    pub values: Option<Vec<String>>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub validations: Option<Vec<ValidationRule>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub rule: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Mandatory bounds on the request, independent of anything `allowed` says.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, with = "crate::time_ser")]
    pub min_duration: Option<Duration>,
    #[serde(default, with = "crate::time_ser")]
    pub max_duration: Option<Duration>,
    #[serde(default)]
    pub private_key: Option<PrivateKeyConstraints>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKeyConstraints {
    #[serde(default)]
    pub algorithm: Option<PublicKeyAlgorithm>,
    #[serde(default)]
    pub min_size: Option<u32>,
    #[serde(default)]
    pub max_size: Option<u32>,
}
