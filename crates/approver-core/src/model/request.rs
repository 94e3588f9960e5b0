use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Duration;

/// A certificate-signing request submitted to the control plane, together
/// with the identity of whoever submitted it.
///
/// `request` carries the raw PEM bytes; everything under "derived by the
/// parser" below is *not* part of this struct. It is produced on demand by
/// [`crate::csr::parse`] and threaded through a single [`Manager::review`]
/// call rather than stored here, since it is a pure function of `request`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    pub name: String,
    pub namespace: String,

    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,

    /// PEM-encoded PKCS#10 bytes.
    pub request: String,

    pub issuer_ref: IssuerRef,

    #[serde(default, with = "crate::time_ser")]
    pub duration: Option<Duration>,

    #[serde(default)]
    pub is_ca: bool,

    #[serde(default)]
    pub usages: Vec<KeyUsage>,
}

impl CertificateRequest {
    /// `issuer_ref.kind`, defaulted per spec: empty means `Issuer`.
    pub fn issuer_kind(&self) -> &str {
        if self.issuer_ref.kind.is_empty() {
            "Issuer"
        } else {
            &self.issuer_ref.kind
        }
    }

    /// `issuer_ref.group`, defaulted per spec: empty means `cert-manager.io`.
    pub fn issuer_group(&self) -> &str {
        if self.issuer_ref.group.is_empty() {
            "cert-manager.io"
        } else {
            &self.issuer_ref.group
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub group: String,
}

/// Parsed PKCS#10 payload, derived from `CertificateRequest.request`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedCsr {
    pub subject: Subject,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub email_addresses: Vec<String>,
    pub public_key_algorithm: PublicKeyAlgorithm,
    pub public_key_size: u32,
}

/// Subject DN. `common_name` and `serial_number` are single-valued in
/// practice but RFC 5280 allows repeats, so the parser takes the first
/// occurrence for each — matching how cert-manager's own CSR decoding
/// treats the subject.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub organizational_units: Vec<String>,
    #[serde(default)]
    pub localities: Vec<String>,
    #[serde(default)]
    pub provinces: Vec<String>,
    #[serde(default)]
    pub street_addresses: Vec<String>,
    #[serde(default)]
    pub postal_codes: Vec<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicKeyAlgorithm {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "ECDSA")]
    Ecdsa,
    #[serde(rename = "Ed25519")]
    Ed25519,
}

impl Default for PublicKeyAlgorithm {
    fn default() -> Self {
        PublicKeyAlgorithm::Rsa
    }
}

impl fmt::Display for PublicKeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublicKeyAlgorithm::Rsa => "RSA",
            PublicKeyAlgorithm::Ecdsa => "ECDSA",
            PublicKeyAlgorithm::Ed25519 => "Ed25519",
        };
        f.write_str(s)
    }
}

/// Key-usage tags, carrying their exact wire spelling (including spaces),
/// so a manual `Serialize`/`Deserialize` pair is used instead of serde's
/// `rename_all`, which cannot express "client auth" from a `ClientAuth`
/// variant name cleanly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyUsage {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    CertSign,
    CrlSign,
    EncipherOnly,
    DecipherOnly,
    Any,
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    SMime,
    IpsecEndSystem,
    IpsecTunnel,
    IpsecUser,
    Timestamping,
    OcspSigning,
    MicrosoftSgc,
    NetscapeSgc,
}

impl KeyUsage {
    const ALL: &'static [(KeyUsage, &'static str)] = &[
        (KeyUsage::DigitalSignature, "digital signature"),
        (KeyUsage::ContentCommitment, "content commitment"),
        (KeyUsage::KeyEncipherment, "key encipherment"),
        (KeyUsage::DataEncipherment, "data encipherment"),
        (KeyUsage::KeyAgreement, "key agreement"),
        (KeyUsage::CertSign, "cert sign"),
        (KeyUsage::CrlSign, "crl sign"),
        (KeyUsage::EncipherOnly, "encipher only"),
        (KeyUsage::DecipherOnly, "decipher only"),
        (KeyUsage::Any, "any"),
        (KeyUsage::ServerAuth, "server auth"),
        (KeyUsage::ClientAuth, "client auth"),
        (KeyUsage::CodeSigning, "code signing"),
        (KeyUsage::EmailProtection, "email protection"),
        (KeyUsage::SMime, "s/mime"),
        (KeyUsage::IpsecEndSystem, "ipsec end system"),
        (KeyUsage::IpsecTunnel, "ipsec tunnel"),
        (KeyUsage::IpsecUser, "ipsec user"),
        (KeyUsage::Timestamping, "timestamping"),
        (KeyUsage::OcspSigning, "ocsp signing"),
        (KeyUsage::MicrosoftSgc, "microsoft sgc"),
        (KeyUsage::NetscapeSgc, "netscape sgc"),
    ];
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = Self::ALL
            .iter()
            .find(|(usage, _)| usage == self)
            .map(|(_, s)| *s)
            .unwrap_or("unknown");
        f.write_str(s)
    }
}

impl FromStr for KeyUsage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(usage, _)| *usage)
            .ok_or_else(|| format!("unknown key usage: {s}"))
    }
}

impl Serialize for KeyUsage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for KeyUsage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        KeyUsage::from_str(&s).map_err(serde::de::Error::custom)
    }
}
