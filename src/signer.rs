// src/signer.rs
//! HMAC-SHA256 URL signing for the Spark WebSocket endpoint.
//!
//! The server authenticates the handshake from three query parameters:
//! `authorization`, `date` and `host`. The signature covers the host, the
//! RFC1123 date and the request line, so a signed URL is only good for a
//! short window after it is produced.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::error::{Result, SparkError};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "hmac-sha256";
const SIGNED_HEADERS: &str = "host date request-line";

/// RFC1123 timestamp, e.g. `Tue, 14 May 2024 08:30:00 GMT`
pub fn rfc1123(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Canonical string fed to the HMAC
pub fn signing_string(host: &str, date: &str, path: &str) -> String {
    format!("host: {}\ndate: {}\nGET {} HTTP/1.1", host, date, path)
}

/// Base64 HMAC-SHA256 of the signing string
pub fn signature(api_secret: &str, host: &str, date: &str, path: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .map_err(|e| SparkError::Signing(e.to_string()))?;
    mac.update(signing_string(host, date, path).as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Base64 of the `api_key=..., algorithm=..., headers=..., signature=...` header
pub fn authorization(api_key: &str, signature: &str) -> String {
    let origin = format!(
        r#"api_key="{}", algorithm="{}", headers="{}", signature="{}""#,
        api_key, ALGORITHM, SIGNED_HEADERS, signature
    );
    BASE64.encode(origin)
}

/// Sign `base_url` using the current wall-clock time
pub fn sign_url(api_key: &str, api_secret: &str, base_url: &str) -> Result<Url> {
    sign_url_at(api_key, api_secret, base_url, Utc::now())
}

/// Sign `base_url` as of `at`. Any query or fragment on the input is dropped.
pub fn sign_url_at(
    api_key: &str,
    api_secret: &str,
    base_url: &str,
    at: DateTime<Utc>,
) -> Result<Url> {
    let parsed = Url::parse(base_url)?;

    match parsed.scheme() {
        "wss" | "ws" => {}
        other => {
            return Err(SparkError::Signing(format!(
                "unsupported scheme '{}', expected wss",
                other
            )));
        }
    }

    let host = request_host(&parsed)?;
    let path = parsed.path().to_string();
    let date = rfc1123(&at);

    let signature = signature(api_secret, &host, &date, &path)?;
    let authorization = authorization(api_key, &signature);

    let mut signed = Url::parse(&format!("{}://{}{}", parsed.scheme(), host, path))?;
    signed
        .query_pairs_mut()
        .append_pair("authorization", &authorization)
        .append_pair("date", &date)
        .append_pair("host", &host);

    Ok(signed)
}

/// Host as it appears in the `Host` header (port only when non-default)
fn request_host(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| SparkError::Signing(format!("URL has no host: {}", url)))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Printable form of a signed URL with the authorization value elided
pub fn redacted(url: &Url) -> String {
    let mut copy = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "authorization" {
                "<redacted>".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();

    copy.query_pairs_mut().clear().extend_pairs(pairs);
    copy.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const URL: &str = "wss://spark-api.xf-yun.com/v3.5/chat";

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 14, 8, 30, 0).unwrap()
    }

    fn query_value(url: &Url, key: &str) -> String {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[test]
    fn test_rfc1123_format() {
        assert_eq!(rfc1123(&fixed_time()), "Tue, 14 May 2024 08:30:00 GMT");
    }

    #[test]
    fn test_signing_string_layout() {
        let date = "Tue, 14 May 2024 08:30:00 GMT";
        let s = signing_string("spark-api.xf-yun.com", date, "/v3.5/chat");
        assert_eq!(
            s,
            concat!(
                "host: spark-api.xf-yun.com\n",
                "date: Tue, 14 May 2024 08:30:00 GMT\n",
                "GET /v3.5/chat HTTP/1.1"
            )
        );
    }

    #[test]
    fn test_signature_known_vector() {
        // HMAC-SHA256(key="key", msg="The quick brown fox jumps over the lazy dog")
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(b"The quick brown fox jumps over the lazy dog");
        let hex: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        assert_eq!(
            hex,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_signed_url_has_three_params() {
        let url = sign_url_at("key", "secret", URL, fixed_time()).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("spark-api.xf-yun.com"));
        assert_eq!(url.path(), "/v3.5/chat");

        let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(keys, vec!["authorization", "date", "host"]);
        assert_eq!(query_value(&url, "date"), "Tue, 14 May 2024 08:30:00 GMT");
        assert_eq!(query_value(&url, "host"), "spark-api.xf-yun.com");
    }

    #[test]
    fn test_authorization_decodes_to_header() {
        let url = sign_url_at("my-key", "secret", URL, fixed_time()).unwrap();
        let decoded = BASE64.decode(query_value(&url, "authorization")).unwrap();
        let header = String::from_utf8(decoded).unwrap();

        let expected_sig = signature(
            "secret",
            "spark-api.xf-yun.com",
            "Tue, 14 May 2024 08:30:00 GMT",
            "/v3.5/chat",
        )
        .unwrap();

        assert_eq!(
            header,
            format!(
                concat!(
                    r#"api_key="my-key", algorithm="hmac-sha256", "#,
                    r#"headers="host date request-line", signature="{}""#
                ),
                expected_sig
            )
        );
    }

    #[test]
    fn test_signing_is_deterministic() {
        let a = sign_url_at("key", "secret", URL, fixed_time()).unwrap();
        let b = sign_url_at("key", "secret", URL, fixed_time()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_any_input_change_changes_signature() {
        let base = sign_url_at("key", "secret", URL, fixed_time()).unwrap();
        let auth = |u: &Url| query_value(u, "authorization");

        let other_key = sign_url_at("key2", "secret", URL, fixed_time()).unwrap();
        let other_secret = sign_url_at("key", "secret2", URL, fixed_time()).unwrap();
        let other_url =
            sign_url_at("key", "secret", "wss://spark-api.xf-yun.com/v3.1/chat", fixed_time())
                .unwrap();
        let later = fixed_time() + chrono::Duration::seconds(1);
        let other_time = sign_url_at("key", "secret", URL, later).unwrap();

        assert_ne!(auth(&base), auth(&other_key));
        assert_ne!(auth(&base), auth(&other_secret));
        assert_ne!(auth(&base), auth(&other_url));
        assert_ne!(auth(&base), auth(&other_time));
    }

    #[test]
    fn test_non_default_port_is_signed() {
        let base = "ws://127.0.0.1:9001/v3.1/chat";
        let url = sign_url_at("key", "secret", base, fixed_time()).unwrap();
        assert_eq!(query_value(&url, "host"), "127.0.0.1:9001");
        assert_eq!(url.port(), Some(9001));
    }

    #[test]
    fn test_existing_query_is_dropped() {
        let base = "wss://example.com/v3.5/chat?foo=bar";
        let url = sign_url_at("key", "secret", base, fixed_time()).unwrap();
        assert!(url.query_pairs().all(|(k, _)| k != "foo"));
    }

    #[test]
    fn test_unparseable_url_is_signing_error() {
        let err = sign_url_at("key", "secret", "not a url", fixed_time()).unwrap_err();
        assert!(matches!(err, SparkError::Signing(_)));
    }

    #[test]
    fn test_http_scheme_rejected() {
        let base = "https://example.com/v3.5/chat";
        let err = sign_url_at("key", "secret", base, fixed_time()).unwrap_err();
        assert!(matches!(err, SparkError::Signing(_)));
    }

    #[test]
    fn test_redacted_hides_authorization() {
        let url = sign_url_at("key", "secret", URL, fixed_time()).unwrap();
        let printed = redacted(&url);
        assert!(printed.contains("authorization=%3Credacted%3E"));
        assert!(!printed.contains(&query_value(&url, "authorization")));
    }
}
