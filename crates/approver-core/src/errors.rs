use thiserror::Error;

use crate::csr::DecodeError;

/// Internal-error taxonomy: decode failures, approver-internal faults,
/// CEL internal errors, and external-collaborator failures all fold into
/// this enum and surface through [`crate::manager::Decision::InternalError`].
/// Policy-violation ("Denied") results are *not* errors — see
/// [`crate::manager::Decision`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("decoding certificate signing request: {0}")]
    Decode(#[from] DecodeError),

    #[error("evaluating approver {approver:?}: {source}")]
    Evaluation {
        approver: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("compiling CEL expression: {0}")]
    Cel(#[from] crate::cel::CompileError),

    #[error("listing policies: {0}")]
    PolicyStore(anyhow::Error),

    #[error("checking RBAC permission: {0}")]
    Rbac(anyhow::Error),

    #[error("looking up namespace labels: {0}")]
    NamespaceLabels(anyhow::Error),

    #[error("review cancelled")]
    Cancelled,
}
