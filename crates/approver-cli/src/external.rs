//! File-backed implementations of `approver_core::external`'s four
//! collaborator traits — concrete, swappable stand-ins for the
//! Kubernetes-backed collaborators a real control plane would use.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use approver_core::external::{Clock, NamespaceLabels, PolicyStore, RbacChecker};
use approver_core::model::CertificateRequestPolicy;
use approver_core::wildcard;

/// Reads every `*.yaml`/`*.yml` file in a directory as a
/// `CertificateRequestPolicy`.
pub struct FilePolicyStore {
    dir: PathBuf,
}

impl FilePolicyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl PolicyStore for FilePolicyStore {
    fn list(&self) -> Result<Vec<CertificateRequestPolicy>> {
        let mut policies = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading policies directory {:?}", self.dir))?;
        for entry in entries {
            let path = entry?.path();
            if !is_yaml(&path) {
                continue;
            }
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading policy file {path:?}"))?;
            let policy: CertificateRequestPolicy = serde_yaml::from_str(&contents)
                .with_context(|| format!("parsing policy file {path:?}"))?;
            policies.push(policy);
        }
        Ok(policies)
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// A `{policy, namespace, username}` (or `{policy, namespace, group}`)
/// allow-list, each field a wildcard pattern. A request that matches no
/// rule at all is treated as unbound: no request passes its check.
pub struct AllowListRbacChecker {
    rules: Vec<AllowListRule>,
}

#[derive(Clone, Debug, serde::Deserialize)]
struct AllowListRule {
    policy: String,
    #[serde(default = "wildcard_any")]
    namespace: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    group: Option<String>,
}

fn wildcard_any() -> String {
    "*".to_string()
}

impl AllowListRbacChecker {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading RBAC allow-list {path:?}"))?;
        let rules = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing RBAC allow-list {path:?}"))?;
        Ok(Self { rules })
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }
}

impl RbacChecker for AllowListRbacChecker {
    fn check(
        &self,
        namespace: &str,
        username: &str,
        groups: &[String],
        _uid: &str,
        _extra: &BTreeMap<String, Vec<String>>,
        policy_name: &str,
    ) -> Result<bool> {
        let matched = self.rules.iter().any(|rule| {
            wildcard::matches(&rule.policy, policy_name) && wildcard::matches(&rule.namespace, namespace) && (
                rule.username.as_deref().is_some_and(|pattern| wildcard::matches(pattern, username))
                    || rule
                        .group
                        .as_deref()
                        .is_some_and(|pattern| groups.iter().any(|g| wildcard::matches(pattern, g)))
            )
        });
        Ok(matched)
    }
}

/// A namespace → labels map, loaded once from a YAML file.
pub struct FileNamespaceLabels {
    labels: BTreeMap<String, BTreeMap<String, String>>,
}

impl FileNamespaceLabels {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading namespace labels {path:?}"))?;
        let labels = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing namespace labels {path:?}"))?;
        Ok(Self { labels })
    }

    pub fn empty() -> Self {
        Self {
            labels: BTreeMap::new(),
        }
    }
}

impl NamespaceLabels for FileNamespaceLabels {
    fn get(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.labels.get(namespace).cloned().unwrap_or_default())
    }
}

/// Wraps `std::time::SystemTime` as the injectable clock `review` uses.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> time::OffsetDateTime {
        time::OffsetDateTime::now_utc()
    }
}
