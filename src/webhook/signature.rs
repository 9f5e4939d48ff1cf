use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header malformed")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
    #[error("signature timestamp outside tolerance")]
    Expired,
}

/// Checks `x-payment-signature: t=<unix>,s=<hex>` against an HMAC-SHA256 of
/// `"<t>.<raw body>"`.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
    tolerance_secs: Option<i64>,
}

fn mac_for(secret: &str, timestamp: &str, body: &[u8]) -> Result<Hmac<Sha256>, SignatureError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

fn split_header(header: &str) -> Result<(&str, &str), SignatureError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("s=") {
            signature = Some(s);
        }
    }
    match (timestamp, signature) {
        (Some(t), Some(s)) if !t.is_empty() && !s.is_empty() => Ok((t, s)),
        _ => Err(SignatureError::Malformed),
    }
}

impl SignatureVerifier {
    /// An empty secret counts as none. `tolerance_secs` of `None` accepts any timestamp.
    pub fn new(secret: Option<String>, tolerance_secs: Option<i64>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            tolerance_secs,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(&self, header: Option<&str>, body: &[u8], now_secs: i64) -> Result<(), SignatureError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        let (timestamp, signature) = split_header(header.ok_or(SignatureError::Missing)?)?;
        let sig_bytes = hex::decode(signature).map_err(|_| SignatureError::Malformed)?;
        mac_for(secret, timestamp, body)?
            .verify_slice(&sig_bytes)
            .map_err(|_| SignatureError::Mismatch)?;

        if let Some(tolerance) = self.tolerance_secs {
            let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
            if (now_secs - ts).abs() > tolerance {
                return Err(SignatureError::Expired);
            }
        }
        Ok(())
    }
}

/// Header value a sender with `secret` would attach to `body` at time `t`.
pub fn sign(secret: &str, t: i64, body: &[u8]) -> String {
    let timestamp = t.to_string();
    let tag = match mac_for(secret, &timestamp, body) {
        Ok(mac) => hex::encode(mac.finalize().into_bytes()),
        Err(_) => String::new(),
    };
    format!("t={timestamp},s={tag}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"data":{"id":"evt_1"}}"#;

    #[test]
    fn accepts_valid_signature() {
        let v = SignatureVerifier::new(Some("whsec".into()), Some(300));
        let header = sign("whsec", 1_700_000_000, BODY);
        assert_eq!(v.verify(Some(&header), BODY, 1_700_000_100), Ok(()));
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let v = SignatureVerifier::new(Some("whsec".into()), None);
        let header = sign("whsec", 1_700_000_000, BODY);
        assert_eq!(v.verify(Some(&header), b"{}", 0), Err(SignatureError::Mismatch));

        let forged = sign("other", 1_700_000_000, BODY);
        assert_eq!(v.verify(Some(&forged), BODY, 0), Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_missing_and_malformed_headers() {
        let v = SignatureVerifier::new(Some("whsec".into()), None);
        assert_eq!(v.verify(None, BODY, 0), Err(SignatureError::Missing));
        assert_eq!(v.verify(Some("t=1"), BODY, 0), Err(SignatureError::Malformed));
        assert_eq!(v.verify(Some("t=1,s=zz"), BODY, 0), Err(SignatureError::Malformed));
    }

    #[test]
    fn enforces_timestamp_tolerance() {
        let v = SignatureVerifier::new(Some("whsec".into()), Some(300));
        let header = sign("whsec", 1_700_000_000, BODY);
        assert_eq!(v.verify(Some(&header), BODY, 1_700_000_301), Err(SignatureError::Expired));
    }

    #[test]
    fn no_secret_skips_verification() {
        let v = SignatureVerifier::new(Some(String::new()), Some(300));
        assert!(!v.is_enabled());
        assert_eq!(v.verify(None, BODY, 0), Ok(()));
    }
}
