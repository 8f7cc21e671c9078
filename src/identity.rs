//! Identity service: secret key decoding, event signing and verification.
//!
//! The cryptographic heavy lifting lives in `secp256k1` and `bech32`; this
//! module only wires them to the event model. Callers hand a [`Signer`] to the
//! broadcast and upload layers so those never see key material directly.

use anyhow::{anyhow, Result};
use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::event::{Event, EventTemplate};

/// Errors from local credential parsing. These fail fast, before any network
/// activity.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key format: expected 64 hex chars or an nsec1 string")]
    InvalidFormat,
    #[error("invalid public key format: expected 64 hex chars or an npub1 string")]
    InvalidPubkeyFormat,
}

/// Anything that can derive a public key and sign an event template.
pub trait Signer: Send + Sync {
    /// X-only public key, hex encoded.
    fn public_key(&self) -> String;
    /// Sign `template`, filling in `id`, `pubkey` and `sig`.
    fn sign(&self, template: &EventTemplate) -> Result<Event>;
}

/// Schnorr keypair parsed from a hex or bech32 (`nsec1...`) secret key.
pub struct Keys {
    secret: SecretKey,
    pubkey_hex: String,
}

impl Keys {
    /// Parse a secret key from its textual encoding.
    ///
    /// Only the surface shape (prefix and approximate length) is checked here;
    /// deep validation is left to the decoding libraries.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let input = input.trim();
        let bytes: Vec<u8> = if input.starts_with("nsec1") {
            if !(60..=70).contains(&input.len()) {
                return Err(KeyError::InvalidFormat);
            }
            let (hrp, data) = bech32::decode(input).map_err(|_| KeyError::InvalidFormat)?;
            if hrp.as_str() != "nsec" {
                return Err(KeyError::InvalidFormat);
            }
            data
        } else if input.len() == 64 && input.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(input).map_err(|_| KeyError::InvalidFormat)?
        } else {
            return Err(KeyError::InvalidFormat);
        };
        let secret = SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidFormat)?;
        let secp = Secp256k1::new();
        let (xonly, _parity) = secret.x_only_public_key(&secp);
        Ok(Keys {
            secret,
            pubkey_hex: hex::encode(xonly.serialize()),
        })
    }
}

impl Signer for Keys {
    fn public_key(&self) -> String {
        self.pubkey_hex.clone()
    }

    fn sign(&self, template: &EventTemplate) -> Result<Event> {
        let mut ev = Event {
            id: String::new(),
            pubkey: self.pubkey_hex.clone(),
            kind: template.kind,
            created_at: template.created_at,
            tags: template.tags.clone(),
            content: template.content.clone(),
            sig: String::new(),
        };
        let hash = event_hash(&ev)?;
        ev.id = hex::encode(hash);
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &self.secret);
        let msg = Message::from_digest_slice(&hash)?;
        let sig = secp.sign_schnorr_no_aux_rand(&msg, &keypair);
        ev.sig = hex::encode(sig.serialize());
        Ok(ev)
    }
}

/// Decode a public key from hex or bech32 (`npub1...`) into hex form.
pub fn decode_pubkey(input: &str) -> Result<String, KeyError> {
    let input = input.trim();
    if input.starts_with("npub1") {
        if !(60..=70).contains(&input.len()) {
            return Err(KeyError::InvalidPubkeyFormat);
        }
        let (hrp, data) = bech32::decode(input).map_err(|_| KeyError::InvalidPubkeyFormat)?;
        if hrp.as_str() != "npub" || data.len() != 32 {
            return Err(KeyError::InvalidPubkeyFormat);
        }
        Ok(hex::encode(data))
    } else if input.len() == 64 && input.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(input.to_ascii_lowercase())
    } else {
        Err(KeyError::InvalidPubkeyFormat)
    }
}

/// Canonical SHA-256 hash of an event's signable form.
pub(crate) fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// Verify an event's ID and Schnorr signature.
pub fn verify_event(ev: &Event) -> Result<()> {
    let hash = event_hash(ev)?;
    let calc_id = hex::encode(hash);
    if calc_id != ev.id {
        return Err(anyhow!("id mismatch"));
    }
    let sig = Signature::from_slice(&hex::decode(&ev.sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey)?)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(&hash)?;
    secp.verify_schnorr(&sig, &msg, &pk)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Tag, KIND_NOTE};
    use bech32::{Bech32, Hrp};

    const SK_HEX: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn parse_hex_secret_key() {
        let keys = Keys::parse(SK_HEX).unwrap();
        assert_eq!(keys.public_key().len(), 64);
    }

    #[test]
    fn parse_nsec_matches_hex() {
        let hrp = Hrp::parse("nsec").unwrap();
        let nsec = bech32::encode::<Bech32>(hrp, &[1u8; 32]).unwrap();
        let from_nsec = Keys::parse(&nsec).unwrap();
        let from_hex = Keys::parse(SK_HEX).unwrap();
        assert_eq!(from_nsec.public_key(), from_hex.public_key());
    }

    #[test]
    fn parse_rejects_bad_shapes() {
        assert!(matches!(Keys::parse("nsec1short"), Err(KeyError::InvalidFormat)));
        assert!(matches!(Keys::parse("deadbeef"), Err(KeyError::InvalidFormat)));
        assert!(matches!(
            Keys::parse(&"zz".repeat(32)),
            Err(KeyError::InvalidFormat)
        ));
        // npub-prefixed input is not a secret key
        let hrp = Hrp::parse("npub").unwrap();
        let npub = bech32::encode::<Bech32>(hrp, &[1u8; 32]).unwrap();
        assert!(Keys::parse(&npub).is_err());
    }

    #[test]
    fn decode_pubkey_forms() {
        let hex_pk = Keys::parse(SK_HEX).unwrap().public_key();
        assert_eq!(decode_pubkey(&hex_pk).unwrap(), hex_pk);
        let hrp = Hrp::parse("npub").unwrap();
        let npub = bech32::encode::<Bech32>(hrp, &hex::decode(&hex_pk).unwrap()).unwrap();
        assert_eq!(decode_pubkey(&npub).unwrap(), hex_pk);
        assert!(decode_pubkey("not-a-key").is_err());
    }

    #[test]
    fn signed_event_verifies() {
        let keys = Keys::parse(SK_HEX).unwrap();
        let template = EventTemplate {
            kind: KIND_NOTE,
            created_at: 1700000000,
            tags: vec![Tag::new(["t", "test"])],
            content: "hello".into(),
        };
        let ev = keys.sign(&template).unwrap();
        assert_eq!(ev.pubkey, keys.public_key());
        assert_eq!(ev.kind, KIND_NOTE);
        verify_event(&ev).unwrap();
    }

    #[test]
    fn tampered_event_fails_verification() {
        let keys = Keys::parse(SK_HEX).unwrap();
        let template = EventTemplate {
            kind: KIND_NOTE,
            created_at: 1,
            tags: vec![],
            content: "hello".into(),
        };
        let mut ev = keys.sign(&template).unwrap();
        ev.content = "tampered".into();
        assert!(verify_event(&ev).is_err());
    }
}
