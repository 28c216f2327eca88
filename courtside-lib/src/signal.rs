use base64::{
    Engine as _,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::STANDARD},
};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Accepts tokens whose trailing `=` got lost while copying.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors returned while turning a pasted token back into a payload.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("malformed signal: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed signal: token is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("malformed signal: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which half of the handshake a payload carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Offer => f.write_str("offer"),
            SignalKind::Answer => f.write_str("answer"),
        }
    }
}

/// One network path candidate, in the shape browsers produce from
/// `RTCIceCandidate.toJSON()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Description plus gathered candidates, exchanged out-of-band.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPayload {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sdp: String,
    #[serde(rename = "ice", default, deserialize_with = "usable_candidates")]
    pub ice_candidates: Vec<IceCandidate>,
}

/// A `null` sdp reads as missing; the session decides what that means.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Anything but an array carries no candidates, and entries that are not
/// candidates are skipped.
fn usable_candidates<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<IceCandidate>, D::Error> {
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    let candidates = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                warn!("Skipping unreadable ICE candidate: {}", e);
                None
            }
        })
        .collect();
    Ok(candidates)
}

impl SignalPayload {
    pub fn new(kind: SignalKind, sdp: impl Into<String>, ice_candidates: Vec<IceCandidate>) -> Self {
        Self { kind, sdp: sdp.into(), ice_candidates }
    }
}

/// Serialize a payload into a copy/paste and QR safe token.
pub fn encode(payload: &SignalPayload) -> String {
    // A derived Serialize over strings and integers cannot fail.
    let json = serde_json::to_vec(payload).unwrap_or_default();
    STANDARD.encode(json)
}

/// Inverse of [`encode`], tolerant of whitespace and URL-safe alphabet
/// substitutions picked up in transit.
pub fn decode(token: &str) -> Result<SignalPayload, SignalError> {
    let cleaned: String = token
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let bytes = LENIENT.decode(cleaned.as_bytes())?;
    let json = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SignalPayload {
        SignalPayload::new(
            SignalKind::Offer,
            "v=0\r\no=- 4611 2 IN IP4 127.0.0.1\r\ns=Spielfeld ü\r\n",
            vec![
                IceCandidate {
                    candidate: "candidate:1 1 udp 2130706431 192.168.1.20 50000 typ host".into(),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                    username_fragment: Some("abcd".into()),
                },
                IceCandidate {
                    candidate: "candidate:1 1 udp 2130706431 192.168.1.20 50000 typ host".into(),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                    username_fragment: None,
                },
            ],
        )
    }

    #[test]
    fn round_trip_keeps_kind_sdp_and_candidate_order() {
        let payload = sample();
        let decoded = decode(&encode(&payload)).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn token_uses_only_base64_characters() {
        let token = encode(&sample());
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || "+/=".contains(c)));
    }

    #[test]
    fn decode_tolerates_whitespace_url_safe_alphabet_and_lost_padding() {
        let payload = sample();
        let token = encode(&payload);
        let mangled: String = token
            .trim_end_matches('=')
            .replace('+', "-")
            .replace('/', "_")
            .as_bytes()
            .chunks(40)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join("\n  ");
        assert_eq!(decode(&format!("  {mangled}\n")).unwrap(), payload);
    }

    #[test]
    fn decode_reads_browser_shaped_json() {
        let json = r#"{"type":"answer","sdp":"v=0","ice":[{"candidate":"candidate:2 1 udp 1 10.0.0.2 9 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":null}]}"#;
        let decoded = decode(&STANDARD.encode(json)).unwrap();
        assert_eq!(decoded.kind, SignalKind::Answer);
        assert_eq!(decoded.ice_candidates.len(), 1);
        assert_eq!(decoded.ice_candidates[0].sdp_mline_index, Some(0));
        assert_eq!(decoded.ice_candidates[0].username_fragment, None);
    }

    #[test]
    fn missing_sdp_and_ice_are_left_to_the_session() {
        let decoded = decode(&STANDARD.encode(r#"{"type":"offer"}"#)).unwrap();
        assert!(decoded.sdp.is_empty());
        assert!(decoded.ice_candidates.is_empty());
    }

    #[test]
    fn null_sdp_and_odd_ice_fields_still_decode() {
        let decoded = decode(&STANDARD.encode(r#"{"type":"answer","sdp":null,"ice":null}"#)).unwrap();
        assert_eq!(decoded.kind, SignalKind::Answer);
        assert!(decoded.sdp.is_empty());
        assert!(decoded.ice_candidates.is_empty());

        let decoded = decode(&STANDARD.encode(r#"{"type":"offer","sdp":"v=0","ice":"none"}"#)).unwrap();
        assert!(decoded.ice_candidates.is_empty());

        let json = r#"{"type":"offer","sdp":"v=0","ice":[42,{"candidate":"candidate:1 1 udp 1 10.0.0.3 9 typ host"}]}"#;
        let decoded = decode(&STANDARD.encode(json)).unwrap();
        assert_eq!(decoded.ice_candidates.len(), 1);
        assert_eq!(decoded.ice_candidates[0].sdp_mid, None);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let token = encode(&sample());
        let cases = [
            token[..token.len() / 2].to_string(),
            "not*base64!".to_string(),
            STANDARD.encode("this is not json"),
            STANDARD.encode([0xff, 0xfe, 0xfd]),
            STANDARD.encode(r#"{"sdp":"v=0","ice":[]}"#),
            STANDARD.encode(r#"{"type":"pranswer","sdp":"v=0"}"#),
            String::new(),
        ];
        for case in cases {
            assert!(decode(&case).is_err(), "accepted {case:?}");
        }
    }

    #[test]
    fn error_messages_name_the_malformed_signal() {
        let err = decode("%%%").unwrap_err();
        assert!(err.to_string().starts_with("malformed signal"));
    }
}
