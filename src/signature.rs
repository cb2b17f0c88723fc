//! Webhook signature verification

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error};

use crate::error::{DeployError, Result};

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Digest algorithms accepted in a signature header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl FromStr for DigestAlgorithm {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(DeployError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

/// Parsed `<algo>=<hex>` signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub algorithm: DigestAlgorithm,
    pub digest: String,
}

impl SignatureHeader {
    pub fn parse(value: &str) -> Result<Self> {
        let (algo, digest) = value.split_once('=').unwrap_or((value, ""));
        let algorithm = algo.trim().parse()?;
        Ok(Self {
            algorithm,
            digest: digest.trim().to_string(),
        })
    }

    /// Constant-time check of the digest against the keyed hash of `body`.
    fn matches(&self, secret: &str, body: &[u8]) -> bool {
        let Ok(expected) = hex::decode(&self.digest) else {
            debug!("Signature digest is not valid hex");
            return false;
        };

        match self.algorithm {
            DigestAlgorithm::Sha256 => verify_with::<Hmac<Sha256>>(secret, body, &expected),
            DigestAlgorithm::Sha384 => verify_with::<Hmac<Sha384>>(secret, body, &expected),
            DigestAlgorithm::Sha512 => verify_with::<Hmac<Sha512>>(secret, body, &expected),
        }
    }
}

fn verify_with<M: Mac + hmac::digest::KeyInit>(secret: &str, body: &[u8], expected: &[u8]) -> bool {
    let Ok(mut mac) = <M as hmac::digest::KeyInit>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(expected).is_ok()
}

/// Verifies the signature header against the raw request body.
///
/// Must run on the exact bytes received, before the body is parsed.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<()> {
    let header = header
        .filter(|h| !h.is_empty())
        .ok_or(DeployError::MissingSignature)?;
    let signature = SignatureHeader::parse(header)?;

    if signature.matches(secret, body) {
        Ok(())
    } else {
        error!(algorithm = %signature.algorithm, "Signature verification failed");
        Err(DeployError::SignatureMismatch)
    }
}
