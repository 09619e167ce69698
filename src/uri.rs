//! Out-of-band PSK exchange URI.
//!
//! `algochat-psk://v1?addr=<address>&psk=<base64url(32 bytes)>[&label=<label>]`
//!
//! The URI travels over a side channel (QR code, secure messenger), never
//! over the chain. Parsing is strict: wrong scheme, wrong version token,
//! missing or empty `addr`, missing or non-32-byte `psk` are all rejected.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use thiserror::Error;
use url::Url;

pub const PSK_URI_SCHEME: &str = "algochat-psk";
pub const PSK_URI_VERSION: &str = "v1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PskUriError {
    #[error("not a valid URI: {0}")]
    Malformed(String),
    #[error("unexpected scheme {0:?}")]
    WrongScheme(String),
    #[error("unexpected version token {0:?}")]
    WrongVersion(String),
    #[error("missing or empty addr parameter")]
    MissingAddress,
    #[error("missing psk parameter")]
    MissingPsk,
    #[error("psk must decode to exactly 32 bytes")]
    InvalidPsk,
}

/// A parsed PSK exchange URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskUri {
    pub address: String,
    pub psk: [u8; 32],
    pub label: Option<String>,
}

impl PskUri {
    pub fn new(address: String, psk: [u8; 32], label: Option<String>) -> Self {
        PskUri { address, psk, label }
    }

    pub fn parse(input: &str) -> Result<Self, PskUriError> {
        let url = Url::parse(input).map_err(|e| PskUriError::Malformed(e.to_string()))?;

        if url.scheme() != PSK_URI_SCHEME {
            return Err(PskUriError::WrongScheme(url.scheme().to_string()));
        }
        let version = url.host_str().unwrap_or_default();
        if version != PSK_URI_VERSION {
            return Err(PskUriError::WrongVersion(version.to_string()));
        }

        let mut address = None;
        let mut psk = None;
        let mut label = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "addr" => address = Some(value.into_owned()),
                "psk" => psk = Some(value.into_owned()),
                "label" => label = Some(value.into_owned()),
                _ => {}
            }
        }

        let address = address.filter(|a| !a.is_empty()).ok_or(PskUriError::MissingAddress)?;
        let psk_b64 = psk.ok_or(PskUriError::MissingPsk)?;
        let psk_bytes = URL_SAFE_NO_PAD
            .decode(psk_b64.as_bytes())
            .map_err(|_| PskUriError::InvalidPsk)?;
        let psk: [u8; 32] = psk_bytes.try_into().map_err(|_| PskUriError::InvalidPsk)?;

        Ok(PskUri { address, psk, label })
    }
}

impl std::fmt::Display for PskUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{PSK_URI_SCHEME}://{PSK_URI_VERSION}?addr={}&psk={}",
            self.address,
            URL_SAFE_NO_PAD.encode(self.psk)
        )?;
        if let Some(label) = &self.label {
            let encoded: String = url::form_urlencoded::byte_serialize(label.as_bytes()).collect();
            write!(f, "&label={encoded}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PSK: [u8; 32] = [0xAB; 32];

    #[test]
    fn roundtrip() {
        let uri = PskUri::new("PEERADDRESS".into(), PSK, Some("alice home".into()));
        let text = uri.to_string();
        assert!(text.starts_with("algochat-psk://v1?addr=PEERADDRESS&psk="));
        assert_eq!(PskUri::parse(&text).unwrap(), uri);
    }

    #[test]
    fn roundtrip_without_label() {
        let uri = PskUri::new("PEERADDRESS".into(), PSK, None);
        assert_eq!(PskUri::parse(&uri.to_string()).unwrap(), uri);
    }

    #[test]
    fn wrong_scheme() {
        let text = format!("https://v1?addr=A&psk={}", URL_SAFE_NO_PAD.encode(PSK));
        assert!(matches!(PskUri::parse(&text), Err(PskUriError::WrongScheme(_))));
    }

    #[test]
    fn wrong_version_token() {
        let text = format!("algochat-psk://v2?addr=A&psk={}", URL_SAFE_NO_PAD.encode(PSK));
        assert!(matches!(PskUri::parse(&text), Err(PskUriError::WrongVersion(_))));
    }

    #[test]
    fn missing_or_empty_addr() {
        let psk = URL_SAFE_NO_PAD.encode(PSK);
        assert_eq!(
            PskUri::parse(&format!("algochat-psk://v1?psk={psk}")),
            Err(PskUriError::MissingAddress)
        );
        assert_eq!(
            PskUri::parse(&format!("algochat-psk://v1?addr=&psk={psk}")),
            Err(PskUriError::MissingAddress)
        );
    }

    #[test]
    fn missing_psk() {
        assert_eq!(
            PskUri::parse("algochat-psk://v1?addr=A"),
            Err(PskUriError::MissingPsk)
        );
    }

    #[test]
    fn short_psk_rejected() {
        let short = URL_SAFE_NO_PAD.encode([1u8; 16]);
        assert_eq!(
            PskUri::parse(&format!("algochat-psk://v1?addr=A&psk={short}")),
            Err(PskUriError::InvalidPsk)
        );
    }

    #[test]
    fn garbage_rejected() {
        assert!(PskUri::parse("not a uri").is_err());
    }
}
