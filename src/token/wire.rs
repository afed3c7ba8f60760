//! Binary wire encoding for tokens.
//!
//! `version:u8 ‖ id:[32]u8 ‖ caveat_count:varint ‖ (caveat_len:varint ‖
//! caveat_bytes)* ‖ signature:[32]u8`, framed as base64-URL without
//! padding. Varints are standard LEB128, unsigned.

use super::Token;
use super::caveat::{Caveat, CaveatParseError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

pub const WIRE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum TokenWireError {
    #[error("token is not valid base64url")]
    Base64(#[from] base64::DecodeError),
    #[error("token bytes are truncated")]
    Truncated,
    #[error("unsupported token version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid caveat: {0}")]
    Caveat(#[from] CaveatParseError),
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, TokenWireError> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *buf.get(*pos).ok_or(TokenWireError::Truncated)?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

/// Encodes a token's raw bytes (pre-base64). Exposed separately from
/// [`encode`] so the chain-HMAC signature can be computed over the same
/// caveat byte representation used on the wire.
pub fn encode_bytes(token: &Token) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(WIRE_VERSION);
    buf.extend_from_slice(&token.id);
    write_varint(&mut buf, token.caveats.len() as u64);
    for caveat in &token.caveats {
        let bytes = caveat.to_bytes();
        write_varint(&mut buf, bytes.len() as u64);
        buf.extend_from_slice(&bytes);
    }
    buf.extend_from_slice(&token.signature);
    buf
}

pub fn decode_bytes(buf: &[u8]) -> Result<Token, TokenWireError> {
    let mut pos = 0usize;
    let version = *buf.first().ok_or(TokenWireError::Truncated)?;
    pos += 1;
    if version != WIRE_VERSION {
        return Err(TokenWireError::UnsupportedVersion(version));
    }
    let id_slice = buf.get(pos..pos + 32).ok_or(TokenWireError::Truncated)?;
    let mut id = [0u8; 32];
    id.copy_from_slice(id_slice);
    pos += 32;

    let count = read_varint(buf, &mut pos)?;
    let mut caveats = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = read_varint(buf, &mut pos)? as usize;
        let caveat_bytes = buf.get(pos..pos + len).ok_or(TokenWireError::Truncated)?;
        caveats.push(Caveat::parse(caveat_bytes)?);
        pos += len;
    }

    let sig_slice = buf.get(pos..pos + 32).ok_or(TokenWireError::Truncated)?;
    let mut signature = [0u8; 32];
    signature.copy_from_slice(sig_slice);
    pos += 32;

    if pos != buf.len() {
        return Err(TokenWireError::Truncated);
    }

    Ok(Token {
        id,
        caveats,
        signature,
    })
}

/// Base64url-no-pad encodes a token for the `Authorization: LSAT` header.
pub fn encode(token: &Token) -> String {
    URL_SAFE_NO_PAD.encode(encode_bytes(token))
}

pub fn decode(s: &str) -> Result<Token, TokenWireError> {
    let bytes = URL_SAFE_NO_PAD.decode(s)?;
    decode_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> Token {
        Token {
            id: [7u8; 32],
            caveats: vec![
                Caveat::new("services", "paid:0"),
                Caveat::new("payment_hash", "abcd"),
            ],
            signature: [9u8; 32],
        }
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let token = sample_token();
        let encoded = encode(&token);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(token, decoded);
    }

    #[test]
    fn decode_rejects_bad_version() {
        let mut bytes = encode_bytes(&sample_token());
        bytes[0] = 99;
        let reencoded = URL_SAFE_NO_PAD.encode(bytes);
        assert!(matches!(
            decode(&reencoded),
            Err(TokenWireError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let bytes = encode_bytes(&sample_token());
        let truncated = URL_SAFE_NO_PAD.encode(&bytes[..bytes.len() - 5]);
        assert!(decode(&truncated).is_err());
    }

    #[test]
    fn varint_round_trips_large_count() {
        let mut token = sample_token();
        token.caveats = (0..300)
            .map(|i| Caveat::new("capabilities", format!("cap{i}")))
            .collect();
        let encoded = encode(&token);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.caveats.len(), 300);
    }
}
