//! Outbound webhook helpers shared by the dispatcher and the notifier

use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;
use std::net::IpAddr;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the HMAC signature of the request body
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Header carrying the routing transaction id
pub const TRANSACTION_HEADER: &str = "X-Transaction-Id";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),
    #[error("Webhook URL scheme '{0}' is not allowed. Only http and https are permitted.")]
    Scheme(String),
    #[error("Webhook URL host '{0}' is not allowed (internal/private address)")]
    PrivateHost(String),
    #[error("Invalid HMAC key: {0}")]
    Key(String),
}

/// `sha256=<hex>` HMAC-SHA256 of `body`
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Key(e.to_string()))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Validate a webhook URL against SSRF targets.
///
/// Only http and https are accepted. Unless `allow_private` is set, loopback,
/// private, link-local and well-known internal hosts are refused.
pub fn validate_webhook_url(url_str: &str, allow_private: bool) -> Result<Url, WebhookError> {
    let url = Url::parse(url_str).map_err(|e| WebhookError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(WebhookError::Scheme(scheme.to_string())),
    }

    let host = url
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("no host".to_string()))?
        .to_string();

    if allow_private {
        return Ok(url);
    }

    let lower_host = host.to_lowercase();
    if lower_host == "localhost"
        || lower_host.ends_with(".local")
        || lower_host.ends_with(".internal")
    {
        return Err(WebhookError::PrivateHost(host));
    }

    // IPv6 hosts come back bracketed
    let bare = lower_host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(WebhookError::PrivateHost(host));
        }
    }

    Ok(url)
}

/// Whether an IP address is in a private/reserved range
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                // 100.64.0.0/10 (CGNAT)
                || ipv4.octets()[0] == 100 && (ipv4.octets()[1] & 0xC0) == 64
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                // fc00::/7 (ULA)
                || (ipv6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 (link-local)
                || (ipv6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
