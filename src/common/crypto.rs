use ed25519_dalek::{ed25519::{self, signature::Signer}, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

pub type Digest = [u8; 64];

/*
    Channels are assumed point-to-point and authenticated: a process
    receives a message from another process only if the latter sent it.
    Every wire message is signed by its source so the receiving node can
    check that the claimed source matches the key registered for it.
*/

pub struct Keypair {
    pubkey: Pubkey,
    dalek_signer: SigningKey,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Pubkey {
    pub key: [u8; 32],
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Signature {
    pub signer: Pubkey,
    pub sig: [u8; 64],
}

impl Keypair {
    pub fn new_pair() -> Self {
        let mut csprng = OsRng;
        Self::from_signing_key(SigningKey::generate(&mut csprng))
    }

    /// Deterministic keypair, for simulations and tests.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(dalek_signer: SigningKey) -> Self {
        let pubkey = Pubkey::from(&dalek_signer.verifying_key().to_bytes());
        Keypair {
            pubkey,
            dalek_signer,
        }
    }

    pub fn sign(&self, digest: &Digest) -> Signature {
        let sig = self.dalek_signer.sign(digest).to_bytes();

        Signature {
            signer: self.pubkey,
            sig,
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.key
    }
}

impl From<&[u8; 32]> for Pubkey {
    fn from(bytes: &[u8; 32]) -> Self {
        Pubkey { key: *bytes }
    }
}

impl Signature {
    pub fn verify(&self, digest: &Digest) -> bool {
        let dalek_sig = ed25519::Signature::from_bytes(&self.sig);
        match VerifyingKey::from_bytes(&self.signer.key) {
            Ok(dalek_pubkey) => dalek_pubkey.verify_strict(digest, &dalek_sig).is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = Keypair::new_pair();
        let digest: Digest = [4; 64];
        let signature = keypair.sign(&digest);

        assert_eq!(signature.signer, keypair.pubkey);
        assert!(signature.verify(&digest));
    }

    #[test]
    fn test_verify_rejects_other_digest() {
        let keypair = Keypair::from_seed([7; 32]);
        let signature = keypair.sign(&[1; 64]);

        assert!(!signature.verify(&[2; 64]));
    }

    #[test]
    fn test_seeded_keys_are_stable() {
        let a = Keypair::from_seed([9; 32]);
        let b = Keypair::from_seed([9; 32]);
        assert_eq!(a.pubkey(), b.pubkey());
    }
}
