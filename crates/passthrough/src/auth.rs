//! Two-layer authentication.
//!
//! Layer 1: callers present a bearer credential, checked by [`CredentialValidator`].
//! Layer 2: the gateway's own [`ServiceToken`] for the console, only ever read by the upstream
//! client through an explicit [`AuthContext`].

use crate::error::{PassthroughError, Result};
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret as _, SecretString};
use sha2::{Digest as _, Sha256};
use subtle::ConstantTimeEq as _;

/// Checks presented client credentials against the configured one.
///
/// Both sides are hashed first and the digests compared in constant time, so neither the
/// content nor the length of the expected credential leaks through timing.
pub struct CredentialValidator {
    expected_digest: [u8; 32],
}

impl CredentialValidator {
    /// # Errors
    ///
    /// Returns an error if the expected credential is empty.
    pub fn new(expected: &SecretString) -> Result<Self> {
        let expected = expected.expose_secret();
        if expected.is_empty() {
            return Err(PassthroughError::Config(
                "client credential must not be empty".to_string(),
            ));
        }
        let mut expected_digest = [0u8; 32];
        expected_digest.copy_from_slice(&Sha256::digest(expected.as_bytes()));
        Ok(Self { expected_digest })
    }

    /// Returns `true` only for a non-empty credential equal to the expected one.
    #[must_use]
    pub fn validate(&self, presented: Option<&str>) -> bool {
        let Some(presented) = presented.filter(|p| !p.is_empty()) else {
            return false;
        };
        let digest = Sha256::digest(presented.as_bytes());
        digest.as_slice().ct_eq(self.expected_digest.as_slice()).into()
    }
}

impl std::fmt::Debug for CredentialValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialValidator").finish_non_exhaustive()
    }
}

/// The gateway's credential for the SIEM console.
#[derive(Debug)]
pub struct ServiceToken(SecretString);

impl ServiceToken {
    /// # Errors
    ///
    /// Returns an error if the token is empty or cannot be sent as an HTTP header value.
    pub fn new(token: SecretString) -> Result<Self> {
        let raw = token.expose_secret();
        if raw.is_empty() {
            return Err(PassthroughError::Config(
                "upstream service token must not be empty".to_string(),
            ));
        }
        if HeaderValue::from_str(raw).is_err() {
            return Err(PassthroughError::Config(
                "upstream service token contains characters not allowed in an HTTP header"
                    .to_string(),
            ));
        }
        Ok(Self(token))
    }

    pub(crate) fn header_value(&self) -> Result<HeaderValue> {
        let mut value = HeaderValue::from_str(self.0.expose_secret()).map_err(|_| {
            PassthroughError::Config("upstream service token is not a valid header value".into())
        })?;
        value.set_sensitive(true);
        Ok(value)
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// Per-call authentication context.
///
/// `client_credential` is transient and scoped to one call; `service_token` is process-wide.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    pub client_credential: Option<&'a str>,
    pub service_token: &'a ServiceToken,
}

impl AuthContext<'_> {
    /// Secret strings that must never appear in caller-visible messages.
    pub(crate) fn secrets(&self) -> Vec<&str> {
        let mut out = vec![self.service_token.expose()];
        if let Some(c) = self.client_credential.filter(|c| !c.is_empty()) {
            out.push(c);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(expected: &str) -> CredentialValidator {
        CredentialValidator::new(&SecretString::from(expected.to_string())).expect("validator")
    }

    #[test]
    fn accepts_only_exact_credential() {
        let v = validator("s3cret-key");
        assert!(v.validate(Some("s3cret-key")));
        assert!(!v.validate(Some("s3cret-kez")));
        assert!(!v.validate(Some("s3cret-key ")));
        assert!(!v.validate(Some("s3cret")));
        assert!(!v.validate(Some("s3cret-key-and-more")));
    }

    #[test]
    fn missing_or_empty_credential_is_rejected() {
        let v = validator("s3cret-key");
        assert!(!v.validate(None));
        assert!(!v.validate(Some("")));
    }

    #[test]
    fn empty_expected_credential_is_a_config_error() {
        let err = CredentialValidator::new(&SecretString::from(String::new())).unwrap_err();
        assert!(matches!(err, PassthroughError::Config(_)));
    }

    #[test]
    fn service_token_debug_is_redacted() {
        let token = ServiceToken::new(SecretString::from("tok-123".to_string())).expect("token");
        let dbg = format!("{token:?}");
        assert!(!dbg.contains("tok-123"));
        let header = token.header_value().expect("header");
        assert!(header.is_sensitive());
    }

    #[test]
    fn service_token_rejects_header_breaking_values() {
        assert!(ServiceToken::new(SecretString::from("a\nb".to_string())).is_err());
        assert!(ServiceToken::new(SecretString::from(String::new())).is_err());
    }

    #[test]
    fn secrets_include_client_credential_when_present() {
        let token = ServiceToken::new(SecretString::from("tok".to_string())).expect("token");
        let ctx = AuthContext {
            client_credential: Some("client"),
            service_token: &token,
        };
        assert_eq!(ctx.secrets(), vec!["tok", "client"]);
    }
}
