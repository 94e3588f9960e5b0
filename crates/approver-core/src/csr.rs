//! Decodes a PEM-wrapped PKCS#10 certificate signing request into the
//! [`ParsedCsr`] shape the rest of the engine consumes. Pure and
//! deterministic: the same bytes always produce the same result, and
//! nothing here touches I/O or shared state.

use thiserror::Error;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::x509::X509Name;

use crate::model::{ParsedCsr, PublicKeyAlgorithm, Subject};

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_ED25519: &str = "1.3.101.112";

const OID_STREET_ADDRESS: &str = "2.5.4.9";
const OID_POSTAL_CODE: &str = "2.5.4.17";
const OID_SERIAL_NUMBER: &str = "2.5.4.5";

const OID_CURVE_P256: &str = "1.2.840.10045.3.1.7";
const OID_CURVE_P384: &str = "1.3.132.0.34";
const OID_CURVE_P521: &str = "1.3.132.0.35";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed PEM block: {0}")]
    InvalidPem(#[from] pem::PemError),

    #[error("expected a \"CERTIFICATE REQUEST\" PEM block, got {0:?}")]
    WrongPemTag(String),

    #[error("malformed DER payload: {0}")]
    InvalidDer(String),

    #[error("unsupported public-key type: {0}")]
    UnsupportedPublicKey(String),
}

/// Decode `pem_bytes` (an ASCII PEM document) into its subject, SANs, and
/// public-key shape. The only expected PEM tag is `CERTIFICATE REQUEST`.
pub fn parse(pem_bytes: &[u8]) -> Result<ParsedCsr, DecodeError> {
    let block = pem::parse(pem_bytes)?;
    if block.tag() != "CERTIFICATE REQUEST" {
        return Err(DecodeError::WrongPemTag(block.tag().to_string()));
    }

    let (_, csr) = X509CertificationRequest::from_der(block.contents())
        .map_err(|e| DecodeError::InvalidDer(e.to_string()))?;

    let info = &csr.certification_request_info;
    let subject = parse_subject(&info.subject);

    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();
    let mut uris = Vec::new();
    let mut email_addresses = Vec::new();

    for ext in csr.requested_extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext {
            for name in &san.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = format_ip(bytes) {
                            ip_addresses.push(ip);
                        }
                    }
                    GeneralName::URI(uri) => uris.push(canonicalize_uri(uri)),
                    GeneralName::RFC822Name(email) => email_addresses.push(email.to_string()),
                    _ => {}
                }
            }
        }
    }

    let (public_key_algorithm, public_key_size) = parse_public_key(&info.subject_pki)?;

    Ok(ParsedCsr {
        subject,
        dns_names,
        ip_addresses,
        uris,
        email_addresses,
        public_key_algorithm,
        public_key_size,
    })
}

fn parse_subject(name: &X509Name) -> Subject {
    Subject {
        common_name: name.iter_common_name().next().and_then(|a| a.as_str().ok()).map(str::to_string),
        organizations: strs_for(name, name.iter_organization()),
        countries: strs_for(name, name.iter_country()),
        organizational_units: strs_for(name, name.iter_organizational_unit()),
        localities: strs_for(name, name.iter_locality()),
        provinces: strs_for(name, name.iter_state_or_province()),
        street_addresses: attrs_by_oid(name, OID_STREET_ADDRESS),
        postal_codes: attrs_by_oid(name, OID_POSTAL_CODE),
        serial_number: attrs_by_oid(name, OID_SERIAL_NUMBER).into_iter().next(),
    }
}

fn strs_for<'a, I>(_name: &X509Name, iter: I) -> Vec<String>
where
    I: Iterator<Item = &'a x509_parser::x509::AttributeTypeAndValue<'a>>,
{
    iter.filter_map(|a| a.as_str().ok()).map(str::to_string).collect()
}

fn attrs_by_oid(name: &X509Name, oid: &str) -> Vec<String> {
    name.iter()
        .flat_map(|rdn| rdn.iter())
        .filter(|atv| atv.attr_type().to_string() == oid)
        .filter_map(|atv| atv.as_str().ok())
        .map(str::to_string)
        .collect()
}

fn format_ip(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => Some(std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string()),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Some(std::net::Ipv6Addr::from(octets).to_string())
        }
        _ => None,
    }
}

/// Round-trip the URI through `url::Url` so e.g. default ports and trailing
/// slashes come out in canonical form; values `url` cannot parse (some
/// custom schemes) pass through unchanged rather than failing the whole CSR.
fn canonicalize_uri(uri: &str) -> String {
    url::Url::parse(uri)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| uri.to_string())
}

fn parse_public_key(
    spki: &x509_parser::x509::SubjectPublicKeyInfo,
) -> Result<(PublicKeyAlgorithm, u32), DecodeError> {
    let algorithm_oid = spki.algorithm.algorithm.to_string();

    match algorithm_oid.as_str() {
        OID_RSA_ENCRYPTION => {
            let key = spki
                .parsed()
                .map_err(|e| DecodeError::InvalidDer(e.to_string()))?;
            match key {
                x509_parser::public_key::PublicKey::RSA(rsa) => {
                    Ok((PublicKeyAlgorithm::Rsa, rsa.key_size() as u32))
                }
                _ => Err(DecodeError::UnsupportedPublicKey(algorithm_oid)),
            }
        }
        OID_EC_PUBLIC_KEY => {
            let curve_oid = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|p| p.as_oid().ok())
                .map(|oid| oid.to_string())
                .ok_or_else(|| DecodeError::UnsupportedPublicKey("EC key with no curve".into()))?;
            let bits = match curve_oid.as_str() {
                OID_CURVE_P256 => 256,
                OID_CURVE_P384 => 384,
                OID_CURVE_P521 => 521,
                other => return Err(DecodeError::UnsupportedPublicKey(format!("EC curve {other}"))),
            };
            Ok((PublicKeyAlgorithm::Ecdsa, bits))
        }
        OID_ED25519 => Ok((PublicKeyAlgorithm::Ed25519, 256)),
        other => Err(DecodeError::UnsupportedPublicKey(other.to_string())),
    }
}
