//! The Envelope Codec: seals a Protocol Message into a Sealed Envelope
//! only the stated recipient can open, and the inverse.

use crypto_box::aead::{generic_array::GenericArray, Aead};
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::crypto::identity::{peer_id_to_montgomery, Identity};
use crate::error::{Error, Result};
use crate::protocol::{
    ProtocolMessage, SealedEnvelope, ENVELOPE_NONCE_SIZE, EPHEMERAL_KEY_SIZE,
};

/// Stateless codec built from one identity's long-term encryption scalar.
/// Holds no session state — every `encrypt` call generates a fresh
/// ephemeral key pair, giving forward secrecy independent of any other
/// envelope.
pub struct EnvelopeCodec {
    local_secret: SecretKey,
}

impl EnvelopeCodec {
    pub fn new(identity: &Identity) -> Self {
        Self {
            local_secret: SecretKey::from(*identity.encryption_scalar()),
        }
    }

    /// Seal `message` so that only `recipient` can open it.
    pub fn encrypt(
        &self,
        recipient: &crate::protocol::PeerId,
        sender: &crate::protocol::PeerId,
        message: &ProtocolMessage,
    ) -> Result<SealedEnvelope> {
        let plaintext = message.to_canonical_bytes()?;

        let recipient_montgomery = peer_id_to_montgomery(recipient)?;
        let recipient_public = PublicKey::from(recipient_montgomery);

        let ephemeral_secret = SecretKey::generate(&mut OsRng);
        let ephemeral_public = ephemeral_secret.public_key();

        let mut nonce_bytes = [0u8; ENVELOPE_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let sealer = SalsaBox::new(&recipient_public, &ephemeral_secret);
        let ciphertext = sealer
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| Error::CryptoFailed)?;

        let message_id = message.message_id.unwrap_or_else(Uuid::new_v4);

        Ok(SealedEnvelope {
            recipient_id: *recipient,
            sender_id: *sender,
            ephemeral_key: ephemeral_public.as_bytes().to_vec(),
            nonce: nonce_bytes.to_vec(),
            ciphertext,
            message_id,
            trade_id: message.trade_id.clone(),
        })
    }

    /// Open an envelope addressed to this codec's identity.
    pub fn decrypt(
        &self,
        local_id: &crate::protocol::PeerId,
        envelope: &SealedEnvelope,
    ) -> Result<ProtocolMessage> {
        if &envelope.recipient_id != local_id {
            return Err(Error::NotForUs);
        }
        if envelope.ephemeral_key.len() != EPHEMERAL_KEY_SIZE {
            return Err(Error::Malformed(format!(
                "ephemeral key length {} != {}",
                envelope.ephemeral_key.len(),
                EPHEMERAL_KEY_SIZE
            )));
        }
        if envelope.nonce.len() != ENVELOPE_NONCE_SIZE {
            return Err(Error::Malformed(format!(
                "nonce length {} != {}",
                envelope.nonce.len(),
                ENVELOPE_NONCE_SIZE
            )));
        }

        let mut ephemeral_bytes = [0u8; EPHEMERAL_KEY_SIZE];
        ephemeral_bytes.copy_from_slice(&envelope.ephemeral_key);
        let ephemeral_public = PublicKey::from(ephemeral_bytes);

        let nonce = GenericArray::from_slice(&envelope.nonce);

        let opener = SalsaBox::new(&ephemeral_public, &self.local_secret);
        let plaintext = opener
            .decrypt(nonce, envelope.ciphertext.as_slice())
            .map_err(|_| Error::CryptoFailed)?;

        ProtocolMessage::from_canonical_bytes(&plaintext)
            .map_err(|_| Error::Malformed("envelope plaintext was not a valid message".into()))
    }

    /// Cheap routing predicate: compares the recipient id to ours without
    /// touching the ciphertext.
    pub fn is_for_us(local_id: &crate::protocol::PeerId, envelope: &SealedEnvelope) -> bool {
        envelope.is_for_us(local_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::identity::Identity;
    use crate::protocol::MessageKind;

    fn sample_message(sender: crate::protocol::PeerId, trade_id: &str) -> ProtocolMessage {
        ProtocolMessage {
            kind: MessageKind::PubkeyExchange,
            trade_id: trade_id.to_string(),
            order_id: None,
            sender_id: sender,
            payload: vec![9, 9, 9],
            timestamp: 1_700_000_000,
            message_id: Some(Uuid::new_v4()),
            sequence_num: Some(1),
            requires_ack: true,
            swap_expiry: 1_700_003_600,
        }
    }

    #[test]
    fn round_trip_encrypt_decrypt() {
        let alice = Identity::generate();
        let bob = Identity::generate();

        let bob_codec = EnvelopeCodec::new(&bob);
        let alice_codec = EnvelopeCodec::new(&alice);

        let msg = sample_message(alice.peer_id(), "trade-1");
        let envelope = alice_codec
            .encrypt(&bob.peer_id(), &alice.peer_id(), &msg)
            .unwrap();

        assert!(EnvelopeCodec::is_for_us(&bob.peer_id(), &envelope));
        assert!(!EnvelopeCodec::is_for_us(&alice.peer_id(), &envelope));

        let opened = bob_codec.decrypt(&bob.peer_id(), &envelope).unwrap();
        assert_eq!(opened.trade_id, msg.trade_id);
        assert_eq!(opened.payload, msg.payload);
    }

    #[test]
    fn wrong_recipient_is_rejected_before_crypto() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let eve = Identity::generate();

        let alice_codec = EnvelopeCodec::new(&alice);
        let msg = sample_message(alice.peer_id(), "trade-1");
        let envelope = alice_codec
            .encrypt(&bob.peer_id(), &alice.peer_id(), &msg)
            .unwrap();

        let eve_codec = EnvelopeCodec::new(&eve);
        let err = eve_codec.decrypt(&eve.peer_id(), &envelope).unwrap_err();
        assert!(matches!(err, Error::NotForUs));
    }

    #[test]
    fn wrong_key_fails_with_crypto_failed_not_malformed() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let eve = Identity::generate();

        let alice_codec = EnvelopeCodec::new(&alice);
        let msg = sample_message(alice.peer_id(), "trade-1");
        let mut envelope = alice_codec
            .encrypt(&bob.peer_id(), &alice.peer_id(), &msg)
            .unwrap();
        // Pretend eve is the addressed recipient so decrypt gets past the
        // is_for_us check and actually attempts the authenticated open.
        envelope.recipient_id = eve.peer_id();

        let eve_codec = EnvelopeCodec::new(&eve);
        let err = eve_codec.decrypt(&eve.peer_id(), &envelope).unwrap_err();
        assert!(matches!(err, Error::CryptoFailed));
    }

    #[test]
    fn malformed_ephemeral_key_length_is_rejected() {
        let bob = Identity::generate();
        let mut envelope = SealedEnvelope {
            recipient_id: bob.peer_id(),
            sender_id: bob.peer_id(),
            ephemeral_key: vec![0u8; 31],
            nonce: vec![0u8; ENVELOPE_NONCE_SIZE],
            ciphertext: vec![],
            message_id: Uuid::new_v4(),
            trade_id: "t".into(),
        };
        let codec = EnvelopeCodec::new(&bob);
        let err = codec.decrypt(&bob.peer_id(), &envelope).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));

        envelope.ephemeral_key = vec![0u8; EPHEMERAL_KEY_SIZE];
        envelope.nonce = vec![0u8; 23];
        let err = codec.decrypt(&bob.peer_id(), &envelope).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }
}
