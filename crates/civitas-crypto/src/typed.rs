//! Typed messages and their verification.
//!
//! A typed message is what a voter, multisig signer or privileged caller
//! actually signs. The signing hash is
//! `blake3(len(domain) || domain || chain_id || borsh(message))`, so a
//! signature for one message kind, or for another chain, never verifies as
//! a different message.

use crate::ed25519::{verify_envelope, Keypair};
use crate::error::CryptoError;
use crate::hash::{domain, hash_for_chain};
use borsh::{BorshDeserialize, BorshSerialize};
use civitas_types::{Address, Hash, SignatureEnvelope, Support};

/// Gasless ballot.
///
/// `weight` is the quadratic vote count on quadratic proposals and ignored
/// (zero) on linear ones, where the snapshot power is used instead.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VoteMessage {
    pub proposal_id: u64,
    pub support: Support,
    pub nonce: u64,
    pub deadline: u64,
    pub weight: u128,
}

/// Multisig approval of a registered operation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ApprovalMessage {
    pub operation_hash: Hash,
    pub nonce: u64,
}

/// Privileged timelock actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TimelockAction {
    Execute,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimelockActionMessage {
    pub operation_hash: Hash,
    pub action: TimelockAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedMessage {
    Vote(VoteMessage),
    Approval(ApprovalMessage),
    TimelockAction(TimelockActionMessage),
}

impl TypedMessage {
    fn domain(&self) -> &'static str {
        match self {
            TypedMessage::Vote(_) => domain::VOTE,
            TypedMessage::Approval(_) => domain::APPROVAL,
            TypedMessage::TimelockAction(_) => domain::TIMELOCK_ACTION,
        }
    }

    /// Canonical borsh encoding of the message body.
    pub fn encode(&self) -> Result<Vec<u8>, CryptoError> {
        let encoded = match self {
            TypedMessage::Vote(m) => borsh::to_vec(m)?,
            TypedMessage::Approval(m) => borsh::to_vec(m)?,
            TypedMessage::TimelockAction(m) => borsh::to_vec(m)?,
        };
        Ok(encoded)
    }

    pub fn signing_hash(&self, chain_id: u64) -> Result<Hash, CryptoError> {
        Ok(hash_for_chain(&self.encode()?, self.domain(), chain_id))
    }

    /// Sign this message for `chain_id`.
    pub fn sign(&self, keypair: &Keypair, chain_id: u64) -> Result<SignatureEnvelope, CryptoError> {
        let digest = self.signing_hash(chain_id)?;
        Ok(keypair.sign_envelope(digest.as_bytes()))
    }
}

impl From<VoteMessage> for TypedMessage {
    fn from(m: VoteMessage) -> Self {
        TypedMessage::Vote(m)
    }
}

impl From<ApprovalMessage> for TypedMessage {
    fn from(m: ApprovalMessage) -> Self {
        TypedMessage::Approval(m)
    }
}

impl From<TimelockActionMessage> for TypedMessage {
    fn from(m: TimelockActionMessage) -> Self {
        TypedMessage::TimelockAction(m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    BadSignature,
    AddressMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid(InvalidReason),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid)
    }
}

/// Checks typed-message signatures for one chain.
#[derive(Debug, Clone, Copy)]
pub struct SignatureVerifier {
    chain_id: u64,
}

impl SignatureVerifier {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Verify that `envelope` signs `message` and that the signer is
    /// `claimed`. The signer address is derived from the envelope's public
    /// key only after the signature itself verifies.
    pub fn verify(
        &self,
        message: &TypedMessage,
        envelope: &SignatureEnvelope,
        claimed: &Address,
    ) -> Verification {
        let digest = match message.signing_hash(self.chain_id) {
            Ok(d) => d,
            Err(_) => return Verification::Invalid(InvalidReason::BadSignature),
        };

        if verify_envelope(envelope, digest.as_bytes()).is_err() {
            return Verification::Invalid(InvalidReason::BadSignature);
        }

        if envelope.signer() != *claimed {
            return Verification::Invalid(InvalidReason::AddressMismatch);
        }

        Verification::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(nonce: u64) -> TypedMessage {
        VoteMessage {
            proposal_id: 1,
            support: Support::For,
            nonce,
            deadline: 1_700_003_600,
            weight: 0,
        }
        .into()
    }

    #[test]
    fn test_valid_vote_signature() {
        let voter = Keypair::from_seed(&[0xaa; 32]);
        let verifier = SignatureVerifier::new(7);
        let msg = ballot(1);
        let sig = msg.sign(&voter, 7).unwrap();
        assert_eq!(verifier.verify(&msg, &sig, &voter.address()), Verification::Valid);
    }

    #[test]
    fn test_tampered_message_is_bad_signature() {
        let voter = Keypair::generate();
        let verifier = SignatureVerifier::new(7);
        let sig = ballot(1).sign(&voter, 7).unwrap();
        assert_eq!(
            verifier.verify(&ballot(2), &sig, &voter.address()),
            Verification::Invalid(InvalidReason::BadSignature)
        );
    }

    #[test]
    fn test_other_signer_is_address_mismatch() {
        let voter = Keypair::generate();
        let impostor = Keypair::generate();
        let verifier = SignatureVerifier::new(7);
        let msg = ballot(1);
        let sig = msg.sign(&impostor, 7).unwrap();
        assert_eq!(
            verifier.verify(&msg, &sig, &voter.address()),
            Verification::Invalid(InvalidReason::AddressMismatch)
        );
    }

    #[test]
    fn test_wrong_chain_rejected() {
        let voter = Keypair::generate();
        let msg = ballot(1);
        let sig = msg.sign(&voter, 1).unwrap();
        assert!(!SignatureVerifier::new(2)
            .verify(&msg, &sig, &voter.address())
            .is_valid());
    }

    #[test]
    fn test_kinds_are_domain_separated() {
        let hash = Hash::compute(b"op");
        let approval: TypedMessage = ApprovalMessage { operation_hash: hash, nonce: 0 }.into();
        let action: TypedMessage = TimelockActionMessage {
            operation_hash: hash,
            action: TimelockAction::Execute,
        }
        .into();
        assert_ne!(approval.signing_hash(1).unwrap(), action.signing_hash(1).unwrap());
    }

    #[test]
    fn test_garbage_public_key_is_bad_signature() {
        let voter = Keypair::generate();
        let msg = ballot(1);
        let mut sig = msg.sign(&voter, 1).unwrap();
        sig.public_key = civitas_types::Ed25519PublicKey::from_bytes([0xff; 32]);
        assert_eq!(
            SignatureVerifier::new(1).verify(&msg, &sig, &voter.address()),
            Verification::Invalid(InvalidReason::BadSignature)
        );
    }

    #[test]
    fn test_claimed_address_from_bech32_matches() {
        let voter = Keypair::generate();
        let msg = ballot(3);
        let sig = msg.sign(&voter, 1).unwrap();
        let claimed: Address = voter.address().to_bech32().unwrap().parse().unwrap();
        assert!(SignatureVerifier::new(1).verify(&msg, &sig, &claimed).is_valid());
    }

    proptest::proptest! {
        #[test]
        fn prop_signature_binds_chain_and_content(
            proposal_id in 1u64..10_000,
            nonce in 1u64..u64::MAX,
            weight in proptest::prelude::any::<u128>(),
            chain_id in 1u64..1_000,
        ) {
            let voter = Keypair::from_seed(&[0x42; 32]);
            let msg: TypedMessage = VoteMessage {
                proposal_id,
                support: Support::Against,
                nonce,
                deadline: 1_700_000_000,
                weight,
            }
            .into();
            let sig = msg.sign(&voter, chain_id).unwrap();

            proptest::prop_assert!(
                SignatureVerifier::new(chain_id).verify(&msg, &sig, &voter.address()).is_valid()
            );
            proptest::prop_assert!(
                !SignatureVerifier::new(chain_id + 1).verify(&msg, &sig, &voter.address()).is_valid()
            );
        }
    }
}
