//! The `constraints` built-in: mandatory bounds on duration, key algorithm,
//! and key size — independent of anything `allowed` says.
use itertools::Itertools;

use crate::model::{CertificateRequest, CertificateRequestPolicy, ParsedCsr, PublicKeyAlgorithm};
use crate::registry::{ApproverResult, Approver, FieldError};

pub struct Constraints;

impl Approver for Constraints {
    fn name(&self) -> &'static str {
        "constraints"
    }

    fn evaluate(
        &self,
        request: &CertificateRequest,
        parsed: &ParsedCsr,
        policy: &CertificateRequestPolicy,
    ) -> anyhow::Result<ApproverResult> {
        let mut errors = Vec::new();
        let Some(constraints) = &policy.spec.constraints else {
            return Ok(ApproverResult::NotDenied);
        };

        if constraints.min_duration.is_some() || constraints.max_duration.is_some() {
            match request.duration {
                None => errors.push("spec.constraints.minDuration: nil".to_string()),
                Some(requested) => {
                    if let Some(min) = constraints.min_duration {
                        if requested < min {
                            errors.push(format!(
                                "spec.constraints.minDuration: {requested} is less than the minimum duration of {min}"
                            ));
                        }
                    }
                    if let Some(max) = constraints.max_duration {
                        if requested > max {
                            errors.push(format!(
                                "spec.constraints.maxDuration: {requested} is greater than the maximum duration of {max}"
                            ));
                        }
                    }
                }
            }
        }

        if let Some(pk) = &constraints.private_key {
            if let Some(algorithm) = pk.algorithm {
                if algorithm != parsed.public_key_algorithm {
                    errors.push(format!(
                        "spec.constraints.privateKey.algorithm: {} does not match the required algorithm {algorithm}",
                        parsed.public_key_algorithm
                    ));
                }
            }
            if let Some(min_size) = pk.min_size {
                if parsed.public_key_size < min_size {
                    errors.push(format!(
                        "spec.constraints.privateKey.minSize: key size {} is smaller than the minimum of {min_size}",
                        parsed.public_key_size
                    ));
                }
            }
            if let Some(max_size) = pk.max_size {
                if parsed.public_key_size > max_size {
                    errors.push(format!(
                        "spec.constraints.privateKey.maxSize: key size {} is larger than the maximum of {max_size}",
                        parsed.public_key_size
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(ApproverResult::NotDenied)
        } else {
            Ok(ApproverResult::Denied(errors.into_iter().join(", ")))
        }
    }

    fn validate(&self, policy: &CertificateRequestPolicy) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let Some(constraints) = &policy.spec.constraints else {
            return errors;
        };

        if let (Some(min), Some(max)) = (constraints.min_duration, constraints.max_duration) {
            if max < min {
                errors.push(FieldError::new(
                    "spec.constraints.maxDuration",
                    "must be greater than or equal to minDuration",
                ));
            }
        }
        if constraints.min_duration.is_some_and(|d| d.is_negative())
            || constraints.max_duration.is_some_and(|d| d.is_negative())
        {
            errors.push(FieldError::new(
                "spec.constraints",
                "duration bounds must not be negative",
            ));
        }

        if let Some(pk) = &constraints.private_key {
            for (field, size) in [
                ("spec.constraints.privateKey.minSize", pk.min_size),
                ("spec.constraints.privateKey.maxSize", pk.max_size),
            ] {
                if let Some(size) = size {
                    if size == 0 || size > 8192 {
                        errors.push(FieldError::new(field, "must be in (0, 8192]"));
                    }
                }
            }
            if let (Some(min), Some(max)) = (pk.min_size, pk.max_size) {
                if min > max {
                    errors.push(FieldError::new(
                        "spec.constraints.privateKey.maxSize",
                        "must be greater than or equal to minSize",
                    ));
                }
            }
            if pk.algorithm == Some(PublicKeyAlgorithm::Ed25519)
                && (pk.min_size.is_some() || pk.max_size.is_some())
            {
                errors.push(FieldError::new(
                    "spec.constraints.privateKey",
                    "minSize/maxSize must not be set when algorithm is Ed25519",
                ));
            }
        }

        errors
    }
}
