//! Per-venue request signing (`spec.md` §4.A, §6).
//!
//! Each function is pure: `(secret, request) -> signature`. None of them log
//! their `secret` argument, and none echo it through a returned `Result`.
//! Keeping signing as free functions makes the literal wire-format rules
//! independently unit-testable without constructing a full adapter or
//! performing I/O.

use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Binance: HMAC-SHA256 over the canonical query string (which must already
/// include `timestamp` and `recvWindow`). Returns the lowercase hex digest to
/// append as the `signature` query parameter.
#[must_use]
pub fn sign_binance(secret: &[u8], query_string: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(query_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// OKX: prehash = `timestamp + method + request_path + body`, HMAC-SHA256,
/// base64-encoded. `timestamp` must already be ISO-8601 with milliseconds.
#[must_use]
pub fn sign_okx(secret: &[u8], timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
    let prehash = format!("{timestamp}{method}{request_path}{body}");
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(prehash.as_bytes());
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, mac.finalize().into_bytes())
}

/// Bybit V5: prehash = `timestamp + api_key + recv_window + params`
/// (`params` is the query string for GET, the JSON body for POST),
/// HMAC-SHA256, lowercase hex.
#[must_use]
pub fn sign_bybit(secret: &[u8], timestamp_ms: u64, api_key: &str, recv_window_ms: u64, params: &str) -> String {
    let prehash = format!("{timestamp_ms}{api_key}{recv_window_ms}{params}");
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(prehash.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Coinbase Advanced Trade claims, per-request.
#[derive(Serialize)]
struct CoinbaseClaims<'a> {
    sub: &'a str,
    iss: &'static str,
    nbf: u64,
    exp: u64,
    uri: &'a str,
}

/// Coinbase Advanced: a JWT per request, alg ES256, `sub = api_key`,
/// `uri = method + " " + host + path`, 2-minute expiry.
///
/// `ec_pem` is the PKCS#8 EC private key PEM for the API key's secret.
///
/// # Errors
/// Returns the underlying `jsonwebtoken` error if the PEM cannot be parsed or
/// encoding fails — never if the key is merely expired, since expiry is
/// computed internally.
pub fn sign_coinbase_jwt(
    ec_pem: &[u8],
    api_key: &str,
    method: &str,
    host: &str,
    path: &str,
    now_unix_secs: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let uri = format!("{method} {host}{path}");
    let claims = CoinbaseClaims {
        sub: api_key,
        iss: "coinbase-cloud",
        nbf: now_unix_secs,
        exp: now_unix_secs + 120,
        uri: &uri,
    };
    let key = EncodingKey::from_ec_pem(ec_pem)?;
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(api_key.to_string());
    jsonwebtoken::encode(&header, &claims, &key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_signature_is_deterministic_hex() {
        let sig1 = sign_binance(b"secret", "symbol=BTCUSDT&timestamp=1&recvWindow=5000");
        let sig2 = sign_binance(b"secret", "symbol=BTCUSDT&timestamp=1&recvWindow=5000");
        assert_eq!(sig1, sig2);
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig1.len(), 64);
    }

    #[test]
    fn binance_signature_changes_with_query() {
        let sig1 = sign_binance(b"secret", "symbol=BTCUSDT&timestamp=1");
        let sig2 = sign_binance(b"secret", "symbol=ETHUSDT&timestamp=1");
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn okx_signature_is_base64() {
        let sig = sign_okx(b"secret", "2024-01-01T00:00:00.000Z", "GET", "/api/v5/account/balance", "");
        assert!(base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &sig).is_ok());
    }

    #[test]
    fn bybit_signature_is_hex() {
        let sig = sign_bybit(b"secret", 1_700_000_000_000, "api_key", 5000, "category=spot");
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig.len(), 64);
    }

    #[test]
    fn signing_functions_never_include_secret_in_output() {
        let secret = b"super-secret-value";
        let sig = sign_binance(secret, "timestamp=1");
        assert!(!sig.contains("super-secret-value"));
    }
}
