use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine};
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::PKey;
use openssl::stack::Stack;
use openssl::x509::X509;
use tracing::debug;

/// MIME header lines preceding the base64 body in the S/MIME output of an
/// attached PKCS#7 signature.
pub const SMIME_HEADER_LINES: usize = 4;

/// Signing oracle for login ticket requests. Implementations return the
/// bare base64 CMS payload expected by the WSAA login endpoint.
pub trait TraSigner: Send + Sync {
    fn sign(&self, document: &[u8]) -> Result<String>;
}

/// PKCS#7 signer backed by an X.509 certificate and private key on disk.
#[derive(Debug, Clone)]
pub struct CmsSigner {
    key_file: PathBuf,
    cert_file: PathBuf,
    passphrase: String,
}

impl CmsSigner {
    pub fn new(
        key_file: impl Into<PathBuf>,
        cert_file: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            key_file: key_file.into(),
            cert_file: cert_file.into(),
            passphrase: passphrase.into(),
        }
    }
}

impl TraSigner for CmsSigner {
    fn sign(&self, document: &[u8]) -> Result<String> {
        let key_pem = fs::read(&self.key_file)
            .with_context(|| format!("reading private key {}", self.key_file.display()))?;
        let pkey = if self.passphrase.is_empty() {
            PKey::private_key_from_pem(&key_pem).context("parsing private key")?
        } else {
            PKey::private_key_from_pem_passphrase(&key_pem, self.passphrase.as_bytes())
                .context("parsing private key with passphrase")?
        };
        let cert_pem = fs::read(&self.cert_file)
            .with_context(|| format!("reading certificate {}", self.cert_file.display()))?;
        let cert = X509::from_pem(&cert_pem).context("parsing certificate")?;
        let extra_certs = Stack::new().context("allocating certificate stack")?;

        // Attached signature: WSAA expects the TRA embedded in the envelope.
        let envelope = Pkcs7::sign(&cert, &pkey, &extra_certs, document, Pkcs7Flags::empty())
            .context("producing pkcs7 signature")?;
        let smime = envelope
            .to_smime(document, Pkcs7Flags::empty())
            .context("serializing pkcs7 envelope")?;
        debug!(bytes = smime.len(), "signed login ticket request");
        strip_smime_framing(&smime)
    }
}

/// Drop the MIME transport framing from an S/MIME blob, leaving the bare
/// base64 payload. The framing is a fixed block of header lines; sending
/// it along corrupts every login attempt, so the remainder is also
/// checked to decode as base64.
pub fn strip_smime_framing(smime: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(smime).context("smime output is not utf-8")?;
    let payload: String = text
        .lines()
        .skip(SMIME_HEADER_LINES)
        .flat_map(|line| line.chars())
        .filter(|c| !c.is_whitespace())
        .collect();
    if payload.is_empty() {
        return Err(anyhow!("smime output has no payload after the header block"));
    }
    general_purpose::STANDARD
        .decode(&payload)
        .context("smime payload is not valid base64")?;
    Ok(payload)
}
