//! Payload encoding for peripheral commands and expected responses

use crate::workflow::types::{Encoding, Terminator};

/// Strip the separators people type into hex strings ("AA 55", "AA-55", "0xAA")
fn hex_candidate(payload: &str) -> String {
    payload
        .trim()
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// Decode a hex string into bytes; `None` if it is not valid hex
pub fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let clean = hex_candidate(text);
    if clean.is_empty() || clean.len() % 2 != 0 || !clean.is_ascii() {
        return None;
    }
    (0..clean.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&clean[i..i + 2], 16).ok())
        .collect()
}

/// Render bytes as upper-case hex for logs
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Encode a command payload according to its encoding, then append the terminator
pub fn encode_payload(
    payload: &str,
    encoding: Encoding,
    terminator: Terminator,
) -> Result<Vec<u8>, String> {
    let text = payload.trim();
    let mut bytes = match encoding {
        Encoding::Hex => {
            decode_hex(text).ok_or_else(|| format!("payload '{}' is not a valid hex string", text))?
        }
        Encoding::Ascii => ascii_bytes(text)?,
        Encoding::Auto => {
            let candidate = hex_candidate(text);
            let looks_hex = candidate.len() >= 2
                && candidate.len() % 2 == 0
                && candidate.chars().all(|c| c.is_ascii_hexdigit());
            match looks_hex.then(|| decode_hex(text)).flatten() {
                Some(binary) => {
                    tracing::debug!("🔧 [AUTO] payload '{}' detected as hex binary", text);
                    binary
                }
                None => ascii_bytes(text)?,
            }
        }
    };
    bytes.extend_from_slice(terminator.bytes());
    Ok(bytes)
}

fn ascii_bytes(text: &str) -> Result<Vec<u8>, String> {
    if text.is_ascii() {
        Ok(text.as_bytes().to_vec())
    } else {
        Err(format!("payload '{}' contains non-ASCII characters", text))
    }
}

/// Resolve the expected response configured on a peripheral wait
///
/// ASCII takes precedence over hex; an undecodable value is an error so the
/// wait is rejected when the step is built rather than silently ignored.
/// An empty expected value accepts any response.
pub fn expected_bytes(
    expected_ascii: Option<&str>,
    expected_hex: Option<&str>,
) -> Result<Option<Vec<u8>>, String> {
    let expected = match (expected_ascii, expected_hex) {
        (Some(ascii), _) => ascii_bytes(ascii)?,
        (None, Some(hex)) if hex_candidate(hex).is_empty() => return Ok(None),
        (None, Some(hex)) => decode_hex(hex)
            .ok_or_else(|| format!("expected_hex '{}' is not a valid hex string", hex))?,
        (None, None) => return Ok(None),
    };
    Ok(Some(expected).filter(|bytes| !bytes.is_empty()))
}
