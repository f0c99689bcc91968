//! PKCS#10 request construction

use std::net::IpAddr;

use rcgen::string::{Ia5String, PrintableString};
use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, DnValue, SanType};
use sha2::{Digest, Sha256, Sha384, Sha512};
use yasna::models::ObjectIdentifier;

use super::{KeyAlgorithm, KeyMaterial, PkiError, Result};

/// PKCS#9 emailAddress attribute
pub const EMAIL_ADDRESS_OID: &[u64] = &[1, 2, 840, 113549, 1, 9, 1];

const BASIC_CONSTRAINTS_OID: &[u64] = &[2, 5, 29, 19];

/// DER of `BasicConstraints { cA: FALSE, pathLenConstraint: absent }`.
/// `cA` carries DEFAULT FALSE so DER omits it, leaving an empty SEQUENCE.
const NOT_A_CA: &[u8] = &[0x30, 0x00];

/// Signature scheme of the CSR, selected by name
///
/// Unknown or empty selectors fall back to SHA-256 with RSA.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// PKCS#1 v1.5 with SHA-256
    #[default]
    Sha256WithRsa,
    /// PKCS#1 v1.5 with SHA-384
    Sha384WithRsa,
    /// PKCS#1 v1.5 with SHA-512
    Sha512WithRsa,
    /// ECDSA with SHA-256
    EcdsaWithSha256,
    /// ECDSA with SHA-384
    EcdsaWithSha384,
    /// ECDSA with SHA-512
    EcdsaWithSha512,
}

impl SignatureAlgorithm {
    /// Resolve a selector such as `SHA384WithRSA`
    pub fn from_selector(selector: &str) -> Self {
        match selector {
            "SHA256WithRSA" => Self::Sha256WithRsa,
            "SHA384WithRSA" => Self::Sha384WithRsa,
            "SHA512WithRSA" => Self::Sha512WithRsa,
            "ECDSAWithSHA256" => Self::EcdsaWithSha256,
            "ECDSAWithSHA384" => Self::EcdsaWithSha384,
            "ECDSAWithSHA512" => Self::EcdsaWithSha512,
            _ => Self::default(),
        }
    }

    /// How a request for `key` is signed under this scheme
    ///
    /// RSA schemes need an RSA key and ECDSA schemes an EC key. Any ECDSA
    /// digest works with any curve.
    fn for_key(self, key: KeyAlgorithm) -> Result<Signing> {
        use KeyAlgorithm::*;
        use Signing::{Native, Resigned};

        let on_p256 = &rcgen::PKCS_ECDSA_P256_SHA256;
        let on_p384 = &rcgen::PKCS_ECDSA_P384_SHA384;

        let signing = match (self, key) {
            (Self::Sha256WithRsa, Rsa2048 | Rsa4096 | Rsa8192) => Native(&rcgen::PKCS_RSA_SHA256),
            (Self::Sha384WithRsa, Rsa2048 | Rsa4096 | Rsa8192) => Native(&rcgen::PKCS_RSA_SHA384),
            (Self::Sha512WithRsa, Rsa2048 | Rsa4096 | Rsa8192) => Native(&rcgen::PKCS_RSA_SHA512),

            (Self::EcdsaWithSha256, EcdsaP256) => Native(on_p256),
            (Self::EcdsaWithSha384, EcdsaP256) => Resigned {
                encoding: on_p256,
                digest: EcdsaDigest::Sha384,
            },
            (Self::EcdsaWithSha512, EcdsaP256) => Resigned {
                encoding: on_p256,
                digest: EcdsaDigest::Sha512,
            },

            (Self::EcdsaWithSha256, EcdsaP384) => Resigned {
                encoding: on_p384,
                digest: EcdsaDigest::Sha256,
            },
            (Self::EcdsaWithSha384, EcdsaP384) => Native(on_p384),
            (Self::EcdsaWithSha512, EcdsaP384) => Resigned {
                encoding: on_p384,
                digest: EcdsaDigest::Sha512,
            },

            // aws-lc signs every digest on P-521
            (Self::EcdsaWithSha256, EcdsaP521) => Native(&rcgen::PKCS_ECDSA_P521_SHA256),
            (Self::EcdsaWithSha384, EcdsaP521) => Native(&rcgen::PKCS_ECDSA_P521_SHA384),
            (Self::EcdsaWithSha512, EcdsaP521) => Native(&rcgen::PKCS_ECDSA_P521_SHA512),

            (signature, key) => return Err(PkiError::UnsupportedCombination { signature, key }),
        };
        Ok(signing)
    }
}

/// Digest of an ECDSA signature scheme
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EcdsaDigest {
    Sha256,
    Sha384,
    Sha512,
}

impl EcdsaDigest {
    /// ecdsa-with-SHA* from RFC 5758
    fn oid(self) -> &'static [u64] {
        match self {
            Self::Sha256 => &[1, 2, 840, 10045, 4, 3, 2],
            Self::Sha384 => &[1, 2, 840, 10045, 4, 3, 3],
            Self::Sha512 => &[1, 2, 840, 10045, 4, 3, 4],
        }
    }

    fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Signing plan for one request
enum Signing {
    /// rcgen signs with a scheme it supports directly
    Native(&'static rcgen::SignatureAlgorithm),
    /// rcgen encodes with the curve's own scheme, then the request info is
    /// signed again with `digest`
    Resigned {
        encoding: &'static rcgen::SignatureAlgorithm,
        digest: EcdsaDigest,
    },
}

impl Signing {
    fn encoding(&self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            Self::Native(alg) => *alg,
            Self::Resigned { encoding, .. } => *encoding,
        }
    }
}

/// Identity attributes embedded in the CSR
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadIdentity {
    /// Subject common name
    pub common_name: String,
    /// Optional PKCS#9 email attribute
    pub email_address: Option<String>,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
    /// Pod IP subject alternative name
    pub pod_ip: IpAddr,
    /// Signature scheme for the request
    pub signature_algorithm: SignatureAlgorithm,
}

fn encoding_error(what: &str, e: impl std::fmt::Display) -> PkiError {
    PkiError::CsrEncodingFailed(format!("{}: {}", what, e))
}

fn printable(value: &str) -> Result<DnValue> {
    PrintableString::try_from(value)
        .map(DnValue::PrintableString)
        .map_err(|e| encoding_error("subject attribute", e))
}

fn subject(identity: &WorkloadIdentity) -> Result<DistinguishedName> {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, printable("US")?);
    dn.push(DnType::StateOrProvinceName, printable("California")?);
    dn.push(DnType::LocalityName, printable("San Francisco")?);
    dn.push(DnType::OrganizationName, printable("Tigera")?);
    dn.push(DnType::OrganizationalUnitName, printable("Engineering")?);
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(identity.common_name.clone()),
    );

    if let Some(email) = &identity.email_address {
        let email = Ia5String::try_from(email.as_str())
            .map_err(|e| encoding_error("invalid email address", e))?;
        dn.push(
            DnType::CustomDnType(EMAIL_ADDRESS_OID.to_vec()),
            DnValue::Ia5String(email),
        );
    }

    Ok(dn)
}

/// Build a PEM-encoded PKCS#10 request for `identity`, signed by `key`
pub fn build_csr(identity: &WorkloadIdentity, key: &KeyMaterial) -> Result<String> {
    let signing = identity.signature_algorithm.for_key(key.algorithm())?;
    let key_pair = key.signing_key(signing.encoding())?;

    let mut params = CertificateParams::default();
    params.distinguished_name = subject(identity)?;

    let mut subject_alt_names = Vec::with_capacity(identity.dns_names.len() + 1);
    for name in &identity.dns_names {
        let dns = Ia5String::try_from(name.as_str())
            .map_err(|e| encoding_error(&format!("invalid DNS name {:?}", name), e))?;
        subject_alt_names.push(SanType::DnsName(dns));
    }
    subject_alt_names.push(SanType::IpAddress(identity.pod_ip));
    params.subject_alt_names = subject_alt_names;

    let mut basic_constraints =
        CustomExtension::from_oid_content(BASIC_CONSTRAINTS_OID, NOT_A_CA.to_vec());
    basic_constraints.set_criticality(true);
    params.custom_extensions = vec![basic_constraints];

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| encoding_error("failed to create CSR", e))?;

    match signing {
        Signing::Native(_) => csr
            .pem()
            .map_err(|e| encoding_error("failed to serialize CSR", e)),
        Signing::Resigned { digest, .. } => {
            let der = resign(csr.der(), key, digest)?;
            let pem = pem::Pem::new("CERTIFICATE REQUEST", der);
            Ok(pem::encode_config(
                &pem,
                pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
            ))
        }
    }
}

/// Replace the signature of a DER request with one over `digest`
///
/// The request info, including the subject public key, is kept byte for
/// byte; only the signature algorithm and value change.
fn resign(request: &[u8], key: &KeyMaterial, digest: EcdsaDigest) -> Result<Vec<u8>> {
    let info = yasna::parse_der(request, |reader| {
        reader.read_sequence(|reader| {
            let info = reader.next().read_der()?;
            reader.next().read_der()?;
            reader.next().read_bitvec_bytes()?;
            Ok(info)
        })
    })
    .map_err(|e| encoding_error("failed to decode CSR", e))?;

    let signature = key.sign_prehash(&digest.hash(&info))?;
    let oid = ObjectIdentifier::from_slice(digest.oid());

    Ok(yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_der(&info);
            writer
                .next()
                .write_sequence(|writer| writer.next().write_oid(&oid));
            writer
                .next()
                .write_bitvec_bytes(&signature, signature.len() * 8);
        })
    }))
}
