//! The capability credential: a macaroon-like token bound to an invoice
//! and signed with a chain-HMAC over its caveat list.
//!
//! The signing secret is never part of this struct — it lives only in
//! the secret store (C1) and is looked up by `id` at verify time.

pub mod caveat;
pub mod wire;

pub use caveat::Caveat;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A token as it travels on the wire: identifier, ordered caveats, and
/// the chain-HMAC signature over both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: [u8; 32],
    pub caveats: Vec<Caveat>,
    pub signature: [u8; 32],
}

/// Computes the chain-HMAC signature for a secret and caveat list.
///
/// `sig_0 = HMAC(secret, "")`, `sig_{i+1} = HMAC(sig_i, caveat_i_bytes)`.
/// The final link is the signature. Nested (chained) HMAC, not a flat
/// HMAC over the concatenated list, is what makes attenuation safe:
/// appending a caveat and re-deriving from the last preserved link
/// yields a new valid signature without the secret ever leaving C1.
pub fn chain_signature(secret: &[u8; 32], caveats: &[Caveat]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(b"");
    let mut link: [u8; 32] = mac.finalize().into_bytes().into();

    for caveat in caveats {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&link).expect("hmac accepts any key length");
        mac.update(&caveat.to_bytes());
        link = mac.finalize().into_bytes().into();
    }
    link
}

impl Token {
    /// Builds and signs a new token from an id, caveat list, and secret.
    pub fn sign(id: [u8; 32], caveats: Vec<Caveat>, secret: &[u8; 32]) -> Self {
        let signature = chain_signature(secret, &caveats);
        Token {
            id,
            caveats,
            signature,
        }
    }

    /// Recomputes the chain signature from `secret` and compares it
    /// against the token's stored signature in constant time.
    pub fn signature_valid(&self, secret: &[u8; 32]) -> bool {
        let expected = chain_signature(secret, &self.caveats);
        use subtle::ConstantTimeEq;
        expected.ct_eq(&self.signature).into()
    }

    pub fn caveat(&self, key: &str) -> Option<&Caveat> {
        self.caveats.iter().find(|c| c.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let secret = [1u8; 32];
        let caveats = vec![Caveat::new("services", "paid:0")];
        let token = Token::sign([2u8; 32], caveats, &secret);
        assert!(token.signature_valid(&secret));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let secret = [1u8; 32];
        let other_secret = [2u8; 32];
        let token = Token::sign([2u8; 32], vec![Caveat::new("services", "paid:0")], &secret);
        assert!(!token.signature_valid(&other_secret));
    }

    #[test]
    fn appending_caveat_and_resigning_from_chain_yields_valid_token() {
        let secret = [5u8; 32];
        let base = vec![Caveat::new("services", "paid:0")];
        let token = Token::sign([3u8; 32], base.clone(), &secret);

        let mut extended = base;
        extended.push(Caveat::new("valid_until", "9999999999"));
        let extended_token = Token::sign(token.id, extended, &secret);
        assert!(extended_token.signature_valid(&secret));
    }

    #[test]
    fn reordering_caveats_invalidates_signature() {
        let secret = [5u8; 32];
        let caveats = vec![
            Caveat::new("services", "paid:0"),
            Caveat::new("price", "1000"),
        ];
        let token = Token::sign([3u8; 32], caveats.clone(), &secret);

        let mut reordered = token.clone();
        reordered.caveats.swap(0, 1);
        assert!(!reordered.signature_valid(&secret));
    }

    #[test]
    fn removing_a_caveat_invalidates_signature() {
        let secret = [5u8; 32];
        let caveats = vec![
            Caveat::new("services", "paid:0"),
            Caveat::new("price", "1000"),
        ];
        let token = Token::sign([3u8; 32], caveats, &secret);

        let mut truncated = token.clone();
        truncated.caveats.pop();
        assert!(!truncated.signature_valid(&secret));
    }
}
