//! VAPID credentials for Web Push (RFC 8292).
//!
//! The server identity is a P-256 key pair held as base64url text: the raw
//! 32-byte private scalar and the 65-byte uncompressed public point. Every
//! credential is an ES256 JWT signed from the raw scalar and presented as
//! `vapid t=<jwt>, k=<public key>`.

use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::errors::PushError;
use crate::notification::encoding::{b64url_decode, b64url_encode, der_to_raw, SCALAR_LEN};

/// Credential validity window.
pub const TOKEN_LIFETIME_HOURS: i64 = 12;

/// `0x04 || X || Y`
pub const UNCOMPRESSED_POINT_LEN: usize = 65;

#[derive(Serialize)]
struct JwtHeader {
    typ: &'static str,
    alg: &'static str,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

// ── Key Pair ──────────────────────────────────────────────────

/// Process-wide VAPID identity, loaded once at startup.
#[derive(Clone)]
pub struct VapidKeyPair {
    public_key: String,
    private_key: Zeroizing<String>,
    subject: String,
}

impl std::fmt::Debug for VapidKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidKeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("subject", &self.subject)
            .finish()
    }
}

impl VapidKeyPair {
    /// Validate configured key material.
    ///
    /// The public key must be the point derived from the private scalar.
    pub fn from_base64url(
        public_key: &str,
        private_key: &str,
        subject: &str,
    ) -> Result<Self, PushError> {
        let public_bytes = b64url_decode(public_key)
            .map_err(|e| PushError::Configuration(format!("VAPID public key: {}", e)))?;
        if public_bytes.len() != UNCOMPRESSED_POINT_LEN || public_bytes[0] != 0x04 {
            return Err(PushError::Configuration(
                "VAPID public key must be a 65-byte uncompressed P-256 point".into(),
            ));
        }

        let signing_key = signing_key_from_scalar(private_key)
            .map_err(|e| PushError::Configuration(format!("VAPID private key: {}", e)))?;
        let derived = signing_key.verifying_key().to_encoded_point(false);
        if derived.as_bytes() != public_bytes.as_slice() {
            return Err(PushError::Configuration(
                "VAPID public key does not match the private key".into(),
            ));
        }

        validate_subject(subject)?;

        Ok(Self {
            public_key: b64url_encode(derived.as_bytes()),
            private_key: Zeroizing::new(private_key.trim().to_string()),
            subject: subject.to_string(),
        })
    }

    /// Generate a fresh random key pair.
    pub fn generate(subject: &str) -> Result<Self, PushError> {
        validate_subject(subject)?;
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let public = signing_key.verifying_key().to_encoded_point(false);
        Ok(Self {
            public_key: b64url_encode(public.as_bytes()),
            private_key: Zeroizing::new(b64url_encode(signing_key.to_bytes())),
            subject: subject.to_string(),
        })
    }

    /// Base64url uncompressed public key, handed to browsers as `applicationServerKey`.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Base64url raw private scalar.
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Build an `Authorization` header value for `audience`, valid for 12 hours.
    pub fn authorization(&self, audience: &str) -> Result<String, PushError> {
        sign(audience, &self.subject, &self.private_key)
    }
}

fn validate_subject(subject: &str) -> Result<(), PushError> {
    if subject.starts_with("mailto:") || subject.starts_with("https://") {
        Ok(())
    } else {
        Err(PushError::Configuration(format!(
            "VAPID subject must be a mailto: or https: URL, got '{}'",
            subject
        )))
    }
}

// ── Signing ──────────────────────────────────────────────────

/// Rebuild a signing key from the raw base64url scalar.
///
/// The public point is `d·G`, computed by the curve library when the key is built.
fn signing_key_from_scalar(private_key: &str) -> Result<SigningKey, PushError> {
    let scalar = Zeroizing::new(
        b64url_decode(private_key).map_err(|e| PushError::Signing(e.to_string()))?,
    );
    if scalar.len() != SCALAR_LEN {
        return Err(PushError::Signing(format!(
            "private key must be a {}-byte scalar, got {} bytes",
            SCALAR_LEN,
            scalar.len()
        )));
    }
    SigningKey::from_slice(&scalar)
        .map_err(|_| PushError::Signing("private key is not a valid P-256 scalar".into()))
}

/// Sign a VAPID credential expiring 12 hours from now.
pub fn sign(audience: &str, subject: &str, private_key: &str) -> Result<String, PushError> {
    sign_at(audience, subject, private_key, Utc::now())
}

/// Sign a VAPID credential with an explicit issue instant.
///
/// Returns `vapid t=<header>.<claims>.<signature>, k=<public key>`.
pub fn sign_at(
    audience: &str,
    subject: &str,
    private_key: &str,
    issued_at: DateTime<Utc>,
) -> Result<String, PushError> {
    let header = serde_json::to_vec(&JwtHeader {
        typ: "JWT",
        alg: "ES256",
    })
    .map_err(|e| PushError::Encoding(e.to_string()))?;
    let claims = serde_json::to_vec(&JwtClaims {
        aud: audience,
        exp: (issued_at + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp(),
        sub: subject,
    })
    .map_err(|e| PushError::Encoding(e.to_string()))?;

    let signing_input = format!("{}.{}", b64url_encode(header), b64url_encode(claims));

    let signing_key = signing_key_from_scalar(private_key)?;
    let public = signing_key.verifying_key().to_encoded_point(false);

    let signature: Signature = signing_key
        .try_sign(signing_input.as_bytes())
        .map_err(|e| PushError::Signing(e.to_string()))?;
    let raw = der_to_raw(signature.to_der().as_bytes())?;

    Ok(format!(
        "vapid t={}.{}, k={}",
        signing_input,
        b64url_encode(raw),
        b64url_encode(public.as_bytes())
    ))
}

// ── Tests ─────────────────────────────────────────────────────
