//! Private key generation

use std::fmt;

use p256::ecdsa::signature::hazmat::PrehashSigner;
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use rcgen::KeyPair;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::RsaPrivateKey;

use super::{PkiError, Result};

/// Key algorithm and size, selected by name
///
/// Unknown or empty selectors fall back to RSA-2048.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA, 2048-bit modulus
    #[default]
    Rsa2048,
    /// RSA, 4096-bit modulus
    Rsa4096,
    /// RSA, 8192-bit modulus
    Rsa8192,
    /// ECDSA on NIST P-256
    EcdsaP256,
    /// ECDSA on NIST P-384
    EcdsaP384,
    /// ECDSA on NIST P-521
    EcdsaP521,
}

/// Algorithm family of a key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFamily {
    /// RSA
    Rsa,
    /// Elliptic curve
    Ec,
}

impl KeyAlgorithm {
    /// Resolve a selector such as `ECDSAWithCurve384`
    pub fn from_selector(selector: &str) -> Self {
        match selector {
            "RSAWithSize2048" => Self::Rsa2048,
            "RSAWithSize4096" => Self::Rsa4096,
            "RSAWithSize8192" => Self::Rsa8192,
            "ECDSAWithCurve256" => Self::EcdsaP256,
            "ECDSAWithCurve384" => Self::EcdsaP384,
            "ECDSAWithCurve521" => Self::EcdsaP521,
            _ => Self::default(),
        }
    }

    /// Family of this algorithm
    pub fn family(self) -> KeyFamily {
        match self {
            Self::Rsa2048 | Self::Rsa4096 | Self::Rsa8192 => KeyFamily::Rsa,
            Self::EcdsaP256 | Self::EcdsaP384 | Self::EcdsaP521 => KeyFamily::Ec,
        }
    }

    /// PEM block tag of the serialized private key
    pub fn pem_tag(self) -> &'static str {
        match self.family() {
            KeyFamily::Rsa => "RSA PRIVATE KEY",
            KeyFamily::Ec => "EC PRIVATE KEY",
        }
    }
}

/// A generated private key
///
/// Holds the traditional PEM form written to disk (PKCS#1 for RSA, SEC1 for
/// EC) and a PKCS#8 form used to sign the CSR.
pub struct KeyMaterial {
    algorithm: KeyAlgorithm,
    private_key_pem: String,
    pkcs8_pem: String,
}

fn key_error(algorithm: KeyAlgorithm, e: impl fmt::Display) -> PkiError {
    PkiError::KeyGenerationFailed(format!("failed to generate {:?} key: {}", algorithm, e))
}

macro_rules! generate_ec {
    ($curve:ident, $algorithm:expr) => {{
        let key = $curve::SecretKey::random(&mut OsRng);
        let private_key_pem = key
            .to_sec1_pem(LineEnding::LF)
            .map_err(|e| key_error($algorithm, e))?
            .to_string();
        let pkcs8_pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| key_error($algorithm, e))?
            .to_string();
        (private_key_pem, pkcs8_pem)
    }};
}

macro_rules! sign_prehash_ec {
    ($curve:ident, $pem:expr, $prehash:expr) => {{
        let key = $curve::ecdsa::SigningKey::from_pkcs8_pem($pem).map_err(signing_error)?;
        let signature: $curve::ecdsa::Signature =
            key.sign_prehash($prehash).map_err(signing_error)?;
        signature.to_der().as_bytes().to_vec()
    }};
}

fn signing_error(e: impl fmt::Display) -> PkiError {
    PkiError::CsrEncodingFailed(format!("failed to sign CSR: {}", e))
}

impl KeyMaterial {
    /// Generate a new key pair
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        let (private_key_pem, pkcs8_pem) = match algorithm {
            KeyAlgorithm::Rsa2048 => generate_rsa(algorithm, 2048)?,
            KeyAlgorithm::Rsa4096 => generate_rsa(algorithm, 4096)?,
            KeyAlgorithm::Rsa8192 => generate_rsa(algorithm, 8192)?,
            KeyAlgorithm::EcdsaP256 => generate_ec!(p256, algorithm),
            KeyAlgorithm::EcdsaP384 => generate_ec!(p384, algorithm),
            KeyAlgorithm::EcdsaP521 => generate_ec!(p521, algorithm),
        };

        Ok(Self {
            algorithm,
            private_key_pem,
            pkcs8_pem,
        })
    }

    /// Algorithm this key was generated with
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Private key in its traditional PEM encoding
    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    /// Load a signing key pair bound to the given signature algorithm
    pub(crate) fn signing_key(&self, alg: &'static rcgen::SignatureAlgorithm) -> Result<KeyPair> {
        KeyPair::from_pkcs8_pem_and_sign_algo(&self.pkcs8_pem, alg)
            .map_err(|e| PkiError::CsrEncodingFailed(format!("failed to load signing key: {}", e)))
    }

    /// ECDSA-sign an already computed digest, returning the DER signature
    ///
    /// Digests longer than the curve order are truncated; only P-256 and
    /// P-384 keys sign this way.
    pub(crate) fn sign_prehash(&self, prehash: &[u8]) -> Result<Vec<u8>> {
        Ok(match self.algorithm {
            KeyAlgorithm::EcdsaP256 => sign_prehash_ec!(p256, &self.pkcs8_pem, prehash),
            KeyAlgorithm::EcdsaP384 => sign_prehash_ec!(p384, &self.pkcs8_pem, prehash),
            other => return Err(signing_error(format!("{:?} keys do not sign digests", other))),
        })
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn generate_rsa(algorithm: KeyAlgorithm, bits: usize) -> Result<(String, String)> {
    let key = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| key_error(algorithm, e))?;
    let private_key_pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| key_error(algorithm, e))?
        .to_string();
    let pkcs8_pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| key_error(algorithm, e))?
        .to_string();
    Ok((private_key_pem, pkcs8_pem))
}
