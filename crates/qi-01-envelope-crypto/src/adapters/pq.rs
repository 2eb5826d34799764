//! # Post-Quantum Primitive Adapters
//!
//! ML-KEM-768 decapsulation and ML-DSA-65 verification behind the outbound
//! ports.

use crate::ports::outbound::{KemDecapsulator, PrimitiveError, SignaturePrimitive};
use ml_dsa::signature::Verifier as _;
use ml_dsa::{MlDsa65, Signature as MlDsaSig, VerifyingKey as MlDsaVk};
use ml_kem::kem::{Decapsulate as _, DecapsulationKey};
use ml_kem::{Encoded, EncodedSizeUser, MlKem768, MlKem768Params};

/// ML-KEM-768 decapsulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlKem768Decapsulator;

impl MlKem768Decapsulator {
    fn decapsulation_key(
        secret_key: &[u8],
    ) -> Result<DecapsulationKey<MlKem768Params>, PrimitiveError> {
        let enc = Encoded::<DecapsulationKey<MlKem768Params>>::try_from(secret_key).map_err(|_| {
            PrimitiveError::InvalidKey(format!(
                "ML-KEM-768 secret key has unexpected length {}",
                secret_key.len()
            ))
        })?;
        Ok(DecapsulationKey::from_bytes(&enc))
    }
}

impl KemDecapsulator for MlKem768Decapsulator {
    fn decapsulate(&self, ciphertext: &[u8], secret_key: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        let dk = Self::decapsulation_key(secret_key)?;
        let ct = ml_kem::Ciphertext::<MlKem768>::try_from(ciphertext).map_err(|_| {
            PrimitiveError::InvalidInput(format!(
                "ML-KEM-768 ciphertext has unexpected length {}",
                ciphertext.len()
            ))
        })?;
        let ss = dk
            .decapsulate(&ct)
            .map_err(|_| PrimitiveError::Failure("ML-KEM-768 decapsulation".into()))?;
        Ok(ss.as_slice().to_vec())
    }
}

/// ML-DSA-65 signature verification.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlDsa65Verifier;

impl SignaturePrimitive for MlDsa65Verifier {
    fn verify(
        &self,
        signature: &[u8],
        message: &[u8],
        public_key: &[u8],
    ) -> Result<bool, PrimitiveError> {
        let enc = ml_dsa::EncodedVerifyingKey::<MlDsa65>::try_from(public_key).map_err(|_| {
            PrimitiveError::InvalidKey(format!(
                "ML-DSA-65 public key has unexpected length {}",
                public_key.len()
            ))
        })?;
        let vk = MlDsaVk::<MlDsa65>::decode(&enc);
        let sig = MlDsaSig::<MlDsa65>::try_from(signature)
            .map_err(|_| PrimitiveError::InvalidInput("malformed ML-DSA-65 signature".into()))?;
        Ok(vk.verify(message, &sig).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kem_rejects_short_secret_key() {
        let err = MlKem768Decapsulator
            .decapsulate(&[0u8; 1088], &[0u8; 10])
            .unwrap_err();
        assert!(matches!(err, PrimitiveError::InvalidKey(_)));
    }

    #[test]
    fn test_dsa_rejects_short_public_key() {
        let err = MlDsa65Verifier.verify(&[0u8; 8], b"msg", &[0u8; 8]).unwrap_err();
        assert!(matches!(err, PrimitiveError::InvalidKey(_)));
    }
}
