//! HMAC-SHA256 request signing, per the exchange's published auth scheme.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs the JSON body of a request using the API secret as the HMAC key.
pub fn sign_request(body: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Reads `EXCHANGE_API_KEY` / `EXCHANGE_API_SECRET` (§10.3).
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let api_key = std::env::var("EXCHANGE_API_KEY")?;
        let api_secret = std::env::var("EXCHANGE_API_SECRET")?;
        Ok(Self::new(api_key, api_secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }

    pub fn sign(&self, body: &str) -> String {
        sign_request(body, &self.api_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_request_is_hex_sha256() {
        let signature = sign_request(r#"{"timestamp":1234567890}"#, "test_secret");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_consistency() {
        let body = r#"{"timestamp":1234567890}"#;
        assert_eq!(sign_request(body, "s"), sign_request(body, "s"));
    }

    #[test]
    fn test_different_secrets_differ() {
        let body = r#"{"timestamp":1234567890}"#;
        assert_ne!(sign_request(body, "secret1"), sign_request(body, "secret2"));
    }

    #[test]
    fn test_credentials_sign_matches_free_function() {
        let creds = Credentials::new("key", "secret");
        let body = r#"{"timestamp":1}"#;
        assert_eq!(creds.sign(body), sign_request(body, "secret"));
    }
}
