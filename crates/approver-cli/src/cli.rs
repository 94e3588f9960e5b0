use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "approver-cli", about = "Exercise certificate-request approval policies locally")]
pub struct Cli {
    /// Enable debug-level logging.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a certificate request against a directory of policies and print
    /// the resulting decision.
    Review(ReviewArgs),
    /// Validate every policy file in a directory against the built-in
    /// approvers' webhook-validation rules, without evaluating any request.
    Validate(ValidateArgs),
}

#[derive(Parser)]
pub struct ReviewArgs {
    /// Path to a YAML file describing the certificate request (see
    /// `CertificateRequest`'s field names).
    #[arg(long)]
    pub request: PathBuf,

    /// Directory containing `*.yaml`/`*.yml` policy files.
    #[arg(long)]
    pub policies_dir: PathBuf,

    /// YAML file mapping policy name to the list of usernames/groups
    /// bound to it. A policy with no entry is treated as unbound.
    #[arg(long)]
    pub rbac_allowlist: Option<PathBuf>,

    /// YAML file mapping namespace name to its labels.
    #[arg(long)]
    pub namespace_labels: Option<PathBuf>,

    /// Treat an empty (or entirely filtered-out) policy set as Approved
    /// rather than Unprocessed.
    #[arg(long)]
    pub approve_when_empty: bool,

    /// Print the decision as JSON instead of plain text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ValidateArgs {
    #[arg(long)]
    pub policies_dir: PathBuf,
}
