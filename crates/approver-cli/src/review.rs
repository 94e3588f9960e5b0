use anyhow::{Context, Result};
use approver_core::external::CancellationToken;
use approver_core::manager::{Decision, EmptyPolicy, Manager};
use approver_core::model::CertificateRequest;
use approver_core::registry;
use tracing::info;

use crate::cli::ReviewArgs;
use crate::external::{AllowListRbacChecker, FileNamespaceLabels, FilePolicyStore, SystemClock};

pub fn run(args: &ReviewArgs, cancel: &CancellationToken) -> Result<()> {
    let contents = std::fs::read_to_string(&args.request)
        .with_context(|| format!("reading request file {:?}", args.request))?;
    let request: CertificateRequest = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing request file {:?}", args.request))?;

    let policy_store = FilePolicyStore::new(&args.policies_dir);
    let rbac = match &args.rbac_allowlist {
        Some(path) => AllowListRbacChecker::load(path)?,
        None => AllowListRbacChecker::empty(),
    };
    let namespace_labels = match &args.namespace_labels {
        Some(path) => FileNamespaceLabels::load(path)?,
        None => FileNamespaceLabels::empty(),
    };
    let clock = SystemClock;

    let manager = Manager {
        registry: registry::global(),
        policy_store: &policy_store,
        rbac: &rbac,
        namespace_labels: &namespace_labels,
        clock: &clock,
        empty_policy: if args.approve_when_empty {
            EmptyPolicy::ApproveWhenEmpty
        } else {
            EmptyPolicy::Unprocessed
        },
    };

    info!(request = %request.name, namespace = %request.namespace, "reviewing certificate request");
    let decision = manager.review(&request, cancel);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&as_json(&decision))?);
    } else {
        println!("{}", describe(&decision));
    }

    match decision {
        Decision::Approved { .. } => Ok(()),
        Decision::Denied { .. } | Decision::Unprocessed => std::process::exit(1),
        Decision::InternalError(e) => Err(e.into()),
    }
}

fn describe(decision: &Decision) -> String {
    match decision {
        Decision::Approved { message } => format!("Approved: {message}"),
        Decision::Denied { message } => format!("Denied: {message}"),
        Decision::Unprocessed => "Unprocessed: no policy selected this request".to_string(),
        Decision::InternalError(e) => format!("InternalError: {e}"),
    }
}

fn as_json(decision: &Decision) -> serde_json::Value {
    match decision {
        Decision::Approved { message } => serde_json::json!({"result": "Approved", "message": message}),
        Decision::Denied { message } => serde_json::json!({"result": "Denied", "message": message}),
        Decision::Unprocessed => serde_json::json!({"result": "Unprocessed"}),
        Decision::InternalError(e) => serde_json::json!({"result": "InternalError", "message": e.to_string()}),
    }
}
