//! SIP INFO DTMF bodies: `application/dtmf-relay` (Signal=/Duration= pairs)
//! and `application/dtmf` (bare digit).

use crate::error::{Error, Result};

const VALID_DIGITS: &str = "0123456789*#ABCD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtmfInfo {
    pub signal: char,
    pub duration_ms: u32,
}

/// Strips `;charset=...`-style parameters and lowercases for comparison.
fn content_type_base(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

pub fn parse_dtmf_info(content_type: &str, body: &str) -> Result<DtmfInfo> {
    match content_type_base(content_type).as_str() {
        "application/dtmf-relay" => parse_dtmf_relay(body),
        "application/dtmf" => parse_dtmf_bare(body),
        other => Err(Error::UnsupportedContentType(other.to_string())),
    }
}

fn parse_dtmf_relay(body: &str) -> Result<DtmfInfo> {
    let mut signal: Option<char> = None;
    let mut duration_ms: u32 = 0;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match key.as_str() {
            "signal" => {
                signal = Some(normalize_digit(value)?);
            }
            "duration" => {
                duration_ms = value.parse().unwrap_or(0);
            }
            _ => {}
        }
    }

    let signal = signal.ok_or_else(|| Error::InvalidDtmfInfo("missing Signal".to_string()))?;
    Ok(DtmfInfo { signal, duration_ms })
}

fn parse_dtmf_bare(body: &str) -> Result<DtmfInfo> {
    let trimmed = body.trim();
    if trimmed.chars().count() != 1 {
        return Err(Error::InvalidDtmfInfo(format!(
            "expected exactly one digit, got {trimmed:?}"
        )));
    }
    let signal = normalize_digit(trimmed)?;
    Ok(DtmfInfo { signal, duration_ms: 0 })
}

fn normalize_digit(raw: &str) -> Result<char> {
    let upper = raw.trim().to_ascii_uppercase();
    let mut chars = upper.chars();
    let digit = chars.next().ok_or_else(|| Error::InvalidDtmfInfo("empty signal".to_string()))?;
    if chars.next().is_some() || !VALID_DIGITS.contains(digit) {
        return Err(Error::InvalidDtmfInfo(format!("invalid dtmf signal: {raw:?}")));
    }
    Ok(digit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtmf_relay_parses_signal_and_duration() {
        let info = parse_dtmf_info("application/dtmf-relay; charset=utf-8", "Signal=9\r\nDuration=200\r\n").unwrap();
        assert_eq!(info, DtmfInfo { signal: '9', duration_ms: 200 });
    }

    #[test]
    fn dtmf_relay_rejects_invalid_signal() {
        let err = parse_dtmf_info("application/dtmf-relay", "Signal=X\r\n").unwrap_err();
        assert!(matches!(err, Error::InvalidDtmfInfo(_)));
    }

    #[test]
    fn dtmf_relay_defaults_duration_when_missing() {
        let info = parse_dtmf_info("application/dtmf-relay", "Signal=*\r\n").unwrap();
        assert_eq!(info.duration_ms, 0);
    }

    #[test]
    fn dtmf_relay_keys_are_case_insensitive() {
        let info = parse_dtmf_info("application/dtmf-relay", "signal=5\r\nDURATION=100\r\n").unwrap();
        assert_eq!(info, DtmfInfo { signal: '5', duration_ms: 100 });
    }

    #[test]
    fn bare_dtmf_requires_single_digit() {
        let info = parse_dtmf_info("application/dtmf", " 7 ").unwrap();
        assert_eq!(info.signal, '7');
        assert!(parse_dtmf_info("application/dtmf", "77").is_err());
    }

    #[test]
    fn unsupported_content_type_is_rejected() {
        let err = parse_dtmf_info("text/plain", "hello").unwrap_err();
        assert!(matches!(err, Error::UnsupportedContentType(_)));
    }
}
