use anyhow::{Context, Result};
use approver_core::registry;

use crate::cli::ValidateArgs;
use crate::external::FilePolicyStore;

pub fn run(args: &ValidateArgs) -> Result<()> {
    use approver_core::external::PolicyStore;

    let store = FilePolicyStore::new(&args.policies_dir);
    let policies = store
        .list()
        .with_context(|| format!("reading policies directory {:?}", args.policies_dir))?;

    let mut failed = false;
    for policy in &policies {
        let mut errors = Vec::new();
        for approver in registry::global().webhook_validators() {
            errors.extend(approver.validate(policy));
        }
        if errors.is_empty() {
            println!("{}: ok", policy.name);
        } else {
            failed = true;
            println!("{}: {} error(s)", policy.name, errors.len());
            for e in errors {
                println!("  {}: {}", e.field, e.message);
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
