//! The `allowed` built-in: every attribute present in the request must be
//! permitted by the policy's `allowed` block, and every attribute the
//! policy marks `required` must be present.
use itertools::Itertools;

use crate::cel::{Cache, RequestContext};
use crate::model::{
    AllowedString, AllowedStringSlice, CertificateRequest, CertificateRequestPolicy, ParsedCsr,
};
use crate::registry::{ApproverResult, Approver, FieldError};
use crate::wildcard;

pub struct Allowed {
    cel: Cache,
}

impl Allowed {
    pub fn new(cel: Cache) -> Self {
        Self { cel }
    }

    fn request_context(request: &CertificateRequest) -> RequestContext {
        RequestContext {
            name: request.name.clone(),
            namespace: request.namespace.clone(),
            username: request.username.clone(),
        }
    }

    fn check_scalar(
        &self,
        field: &str,
        allowed: Option<&AllowedString>,
        value: Option<&str>,
        cr: &RequestContext,
        errors: &mut Vec<String>,
    ) {
        match value {
            None => {
                if matches!(allowed, Some(a) if a.required == Some(true)) {
                    errors.push(format!("{field}: required"));
                }
            }
            Some(v) => match allowed {
                None => errors.push(format!("{field}: not allowed")),
                Some(a) => {
                    if a.value.is_none() && a.validations.is_none() {
                        errors.push(format!(
                            "{field}: must define either a value or validations"
                        ));
                        return;
                    }
                    if let Some(expected) = &a.value {
                        if !wildcard::matches(expected, v) {
                            errors.push(format!(
                                "{field}.value: {v:?} must match {expected:?}"
                            ));
                        }
                    }
                    self.check_validations(field, a.validations.as_deref(), &[v.to_string()], cr, errors);
                }
            },
        }
    }

    fn check_slice(
        &self,
        field: &str,
        allowed: Option<&AllowedStringSlice>,
        values: &[String],
        cr: &RequestContext,
        errors: &mut Vec<String>,
    ) {
        if values.is_empty() {
            if matches!(allowed, Some(a) if a.required == Some(true)) {
                errors.push(format!("{field}: required"));
            }
            return;
        }

        match allowed {
            None => errors.push(format!("{field}: not allowed")),
            Some(a) => {
                if a.values.is_none() && a.validations.is_none() {
                    errors.push(format!(
                        "{field}: must define either values or validations"
                    ));
                    return;
                }
                if let Some(patterns) = &a.values {
                    if !wildcard::subset(patterns, values) {
                        errors.push(format!(
                            "{field}.values: {:?} is not a subset of {:?}",
                            values, patterns
                        ));
                    }
                }
                self.check_validations(field, a.validations.as_deref(), values, cr, errors);
            }
        }
    }

    fn check_validations(
        &self,
        field: &str,
        validations: Option<&[crate::model::ValidationRule]>,
        values: &[String],
        cr: &RequestContext,
        errors: &mut Vec<String>,
    ) {
        let Some(rules) = validations else { return };
        for rule in rules {
            let program = match self.cel.get_or_compile(&rule.rule) {
                Ok(p) => p,
                Err(_) => {
                    // Malformed rules are caught at webhook validation time;
                    // at evaluation time a broken rule never matches.
                    errors.push(format!(
                        "{field}.validations: {}",
                        rule.message.clone().unwrap_or_else(|| format!("failed rule: {}", rule.rule))
                    ));
                    continue;
                }
            };
            for value in values {
                match self.cel.validate(&program, value, cr) {
                    Ok(true) => {}
                    Ok(false) | Err(_) => {
                        errors.push(format!(
                            "{field}.validations: {}",
                            rule.message.clone().unwrap_or_else(|| format!("failed rule: {}", rule.rule))
                        ));
                    }
                }
            }
        }
    }

    fn check_is_ca(&self, allowed_is_ca: Option<bool>, requested: bool, errors: &mut Vec<String>) {
        if !requested {
            return;
        }
        match allowed_is_ca {
            None => errors.push("spec.allowed.isCA: not allowed".to_string()),
            Some(false) => errors.push("spec.allowed.isCA: not allowed".to_string()),
            Some(true) => {}
        }
    }

    fn check_usages(
        &self,
        allowed_usages: Option<&[crate::model::KeyUsage]>,
        requested: &[crate::model::KeyUsage],
        errors: &mut Vec<String>,
    ) {
        if requested.is_empty() {
            return;
        }
        let patterns: Vec<String> = allowed_usages
            .unwrap_or_default()
            .iter()
            .map(|u| u.to_string())
            .collect();
        let members: Vec<String> = requested.iter().map(|u| u.to_string()).collect();
        if !wildcard::subset(&patterns, &members) {
            errors.push(format!(
                "spec.allowed.usages: {:?} is not a subset of {:?}",
                members, patterns
            ));
        }
    }
}

impl Approver for Allowed {
    fn name(&self) -> &'static str {
        "allowed"
    }

    fn evaluate(
        &self,
        request: &CertificateRequest,
        parsed: &ParsedCsr,
        policy: &CertificateRequestPolicy,
    ) -> anyhow::Result<ApproverResult> {
        let Some(allowed) = policy.spec.allowed.clone() else {
            return Ok(ApproverResult::NotDenied);
        };
        let cr = Self::request_context(request);
        let subject_rules = allowed.subject.clone().unwrap_or_default();
        let mut errors = Vec::new();

        self.check_scalar(
            "spec.allowed.commonName",
            allowed.common_name.as_ref(),
            parsed.subject.common_name.as_deref(),
            &cr,
            &mut errors,
        );
        self.check_scalar(
            "spec.allowed.subject.serialNumber",
            subject_rules.serial_number.as_ref(),
            parsed.subject.serial_number.as_deref(),
            &cr,
            &mut errors,
        );

        self.check_slice(
            "spec.allowed.dnsNames",
            allowed.dns_names.as_ref(),
            &parsed.dns_names,
            &cr,
            &mut errors,
        );
        self.check_slice(
            "spec.allowed.ipAddresses",
            allowed.ip_addresses.as_ref(),
            &parsed.ip_addresses,
            &cr,
            &mut errors,
        );
        self.check_slice(
            "spec.allowed.uris",
            allowed.uris.as_ref(),
            &parsed.uris,
            &cr,
            &mut errors,
        );
        self.check_slice(
            "spec.allowed.emailAddresses",
            allowed.email_addresses.as_ref(),
            &parsed.email_addresses,
            &cr,
            &mut errors,
        );

        self.check_slice(
            "spec.allowed.subject.organizations",
            subject_rules.organizations.as_ref(),
            &parsed.subject.organizations,
            &cr,
            &mut errors,
        );
        self.check_slice(
            "spec.allowed.subject.countries",
            subject_rules.countries.as_ref(),
            &parsed.subject.countries,
            &cr,
            &mut errors,
        );
        self.check_slice(
            "spec.allowed.subject.organizationalUnits",
            subject_rules.organizational_units.as_ref(),
            &parsed.subject.organizational_units,
            &cr,
            &mut errors,
        );
        self.check_slice(
            "spec.allowed.subject.localities",
            subject_rules.localities.as_ref(),
            &parsed.subject.localities,
            &cr,
            &mut errors,
        );
        self.check_slice(
            "spec.allowed.subject.provinces",
            subject_rules.provinces.as_ref(),
            &parsed.subject.provinces,
            &cr,
            &mut errors,
        );
        self.check_slice(
            "spec.allowed.subject.streetAddresses",
            subject_rules.street_addresses.as_ref(),
            &parsed.subject.street_addresses,
            &cr,
            &mut errors,
        );
        self.check_slice(
            "spec.allowed.subject.postalCodes",
            subject_rules.postal_codes.as_ref(),
            &parsed.subject.postal_codes,
            &cr,
            &mut errors,
        );

        self.check_is_ca(allowed.is_ca, request.is_ca, &mut errors);
        self.check_usages(allowed.usages.as_deref(), &request.usages, &mut errors);

        if errors.is_empty() {
            Ok(ApproverResult::NotDenied)
        } else {
            Ok(ApproverResult::Denied(errors.into_iter().join(", ")))
        }
    }

    fn validate(&self, policy: &CertificateRequestPolicy) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let Some(allowed) = &policy.spec.allowed else {
            return errors;
        };

        validate_scalar("spec.allowed.commonName", allowed.common_name.as_ref(), &self.cel, &mut errors);
        if let Some(subject) = &allowed.subject {
            validate_scalar(
                "spec.allowed.subject.serialNumber",
                subject.serial_number.as_ref(),
                &self.cel,
                &mut errors,
            );
            for (field, slice) in [
                ("spec.allowed.subject.organizations", &subject.organizations),
                ("spec.allowed.subject.countries", &subject.countries),
                (
                    "spec.allowed.subject.organizationalUnits",
                    &subject.organizational_units,
                ),
                ("spec.allowed.subject.localities", &subject.localities),
                ("spec.allowed.subject.provinces", &subject.provinces),
                (
                    "spec.allowed.subject.streetAddresses",
                    &subject.street_addresses,
                ),
                ("spec.allowed.subject.postalCodes", &subject.postal_codes),
            ] {
                validate_slice(field, slice.as_ref(), &self.cel, &mut errors);
            }
        }

        for (field, slice) in [
            ("spec.allowed.dnsNames", &allowed.dns_names),
            ("spec.allowed.ipAddresses", &allowed.ip_addresses),
            ("spec.allowed.uris", &allowed.uris),
            ("spec.allowed.emailAddresses", &allowed.email_addresses),
        ] {
            validate_slice(field, slice.as_ref(), &self.cel, &mut errors);
        }

        errors
    }
}

fn validate_scalar(
    field: &str,
    allowed: Option<&AllowedString>,
    cel: &Cache,
    errors: &mut Vec<FieldError>,
) {
    let Some(a) = allowed else { return };
    if a.required == Some(true) && a.value.is_none() && a.validations.is_none() {
        errors.push(FieldError::new(
            field,
            "required field must define a value or validations",
        ));
    }
    validate_rules(field, a.validations.as_deref(), cel, errors);
}

fn validate_slice(
    field: &str,
    allowed: Option<&AllowedStringSlice>,
    cel: &Cache,
    errors: &mut Vec<FieldError>,
) {
    let Some(a) = allowed else { return };
    if a.required == Some(true) && a.values.is_none() && a.validations.is_none() {
        errors.push(FieldError::new(
            field,
            "required field must define values or validations",
        ));
    }
    validate_rules(field, a.validations.as_deref(), cel, errors);
}

fn validate_rules(
    field: &str,
    validations: Option<&[crate::model::ValidationRule]>,
    cel: &Cache,
    errors: &mut Vec<FieldError>,
) {
    let Some(rules) = validations else { return };
    for rule in rules {
        if let Err(e) = cel.get_or_compile(&rule.rule) {
            errors.push(FieldError::new(
                format!("{field}.validations"),
                format!("rule {:?} does not compile: {e}", rule.rule),
            ));
        }
    }
}
