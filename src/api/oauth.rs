// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OAuth 1.0a request signing (HMAC-SHA1).

use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::config::Secrets;
use crate::error::ApiError;

type HmacSha1 = Hmac<Sha1>;

/// Percent-encode per RFC 3986: everything except unreserved characters.
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Signs requests on behalf of the bot account.
#[derive(Clone)]
pub struct OAuthSigner {
    secrets: Secrets,
}

impl OAuthSigner {
    pub fn new(secrets: Secrets) -> Self {
        Self { secrets }
    }

    /// Build the `Authorization` header for a request.
    ///
    /// `url` must not contain a query string; query and form parameters go in
    /// `params`. Multipart and JSON bodies are not signed.
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<String, ApiError> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_header_with(method, url, params, &nonce, &timestamp)
    }

    pub(crate) fn authorization_header_with(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, String)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, ApiError> {
        let oauth_params = [
            ("oauth_consumer_key", self.secrets.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp),
            ("oauth_token", self.secrets.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        let signature = self.signature(method, url, params, &oauth_params)?;

        let mut header_params: Vec<(String, String)> = oauth_params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        header_params.push(("oauth_signature".to_string(), signature));
        header_params.sort();

        let fields: Vec<String> = header_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect();
        Ok(format!("OAuth {}", fields.join(", ")))
    }

    fn signature(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, String)],
        oauth_params: &[(&str, &str)],
    ) -> Result<String, ApiError> {
        let mut encoded: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (percent_encode(k), percent_encode(v)))
            .chain(
                oauth_params
                    .iter()
                    .map(|(k, v)| (percent_encode(k), percent_encode(v))),
            )
            .collect();
        encoded.sort();

        let parameter_string = encoded
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let base = format!(
            "{}&{}&{}",
            method.to_ascii_uppercase(),
            percent_encode(url),
            percent_encode(&parameter_string)
        );
        let key = format!(
            "{}&{}",
            percent_encode(&self.secrets.consumer_secret),
            percent_encode(&self.secrets.access_token_secret)
        );

        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| ApiError::Signing(e.to_string()))?;
        mac.update(base.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> OAuthSigner {
        OAuthSigner::new(Secrets {
            consumer_key: "xvz1evFS4wEEPTGEFPHBog".to_string(),
            consumer_secret: "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw".to_string(),
            access_token: "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb".to_string(),
            access_token_secret: "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE".to_string(),
        })
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("Ladies + Gentlemen"), "Ladies%20%2B%20Gentlemen");
        assert_eq!(percent_encode("An encoded string!"), "An%20encoded%20string%21");
        assert_eq!(percent_encode("Dogs, Cats & Mice"), "Dogs%2C%20Cats%20%26%20Mice");
        assert_eq!(percent_encode("☃"), "%E2%98%83");
        assert_eq!(percent_encode("a-b.c_d~e"), "a-b.c_d~e");
    }

    #[test]
    fn test_reference_signature() {
        let header = signer()
            .authorization_header_with(
                "POST",
                "https://api.twitter.com/1.1/statuses/update.json",
                &[
                    ("include_entities", "true".to_string()),
                    (
                        "status",
                        "Hello Ladies + Gentlemen, a signed OAuth request!".to_string(),
                    ),
                ],
                "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
                "1318622958",
            )
            .unwrap();

        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\""));
        assert!(header.contains("oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\""));
    }

    #[test]
    fn test_fresh_nonce_per_request() {
        let signer = signer();
        let a = signer.authorization_header("GET", "https://x/y", &[]).unwrap();
        let b = signer.authorization_header("GET", "https://x/y", &[]).unwrap();
        assert_ne!(a, b);
    }
}
