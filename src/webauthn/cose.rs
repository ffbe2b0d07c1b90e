//! COSE public-key parsing and signature verification.
//!
//! Supports the three algorithms passkey authenticators actually emit:
//! ES256 (-7), EdDSA (-8) and RS256 (-257).

use ciborium::value::Value as CborValue;
use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey as P256VerifyingKey};
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::{BigUint, RsaPublicKey};
use sha2::Sha256;
use std::io::Cursor;

use crate::error::{Error, Result};

pub const ALG_ES256: i64 = -7;
pub const ALG_EDDSA: i64 = -8;
pub const ALG_RS256: i64 = -257;

/// Algorithms advertised in registration options, in preference order.
pub const SUPPORTED_ALGORITHMS: [i64; 3] = [ALG_ES256, ALG_EDDSA, ALG_RS256];

const KTY_OKP: i128 = 1;
const KTY_EC2: i128 = 2;
const KTY_RSA: i128 = 3;
const CRV_P256: i128 = 1;
const CRV_ED25519: i128 = 6;

/// A parsed credential public key.
#[derive(Debug, Clone)]
pub enum PublicKey {
    Es256(P256VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
    Rs256(RsaPublicKey),
}

impl PublicKey {
    /// Verify `signature` over `signed_data`.
    pub fn verify(&self, signed_data: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            PublicKey::Es256(key) => {
                let signature =
                    P256Signature::from_der(signature).map_err(|_| Error::SignatureInvalid)?;
                key.verify(signed_data, &signature)
                    .map_err(|_| Error::SignatureInvalid)
            }
            PublicKey::Ed25519(key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| Error::SignatureInvalid)?;
                key.verify(signed_data, &signature)
                    .map_err(|_| Error::SignatureInvalid)
            }
            PublicKey::Rs256(key) => {
                // RS256: RSASSA-PKCS1-v1_5 with SHA-256
                let verifying_key = RsaVerifyingKey::<Sha256>::new(key.clone());
                let signature =
                    RsaSignature::try_from(signature).map_err(|_| Error::SignatureInvalid)?;
                verifying_key
                    .verify(signed_data, &signature)
                    .map_err(|_| Error::SignatureInvalid)
            }
        }
    }
}

/// Parse a COSE_Key structure into a verifying key.
pub fn parse_public_key(cose_key_bytes: &[u8]) -> Result<PublicKey> {
    let value: CborValue = ciborium::de::from_reader(Cursor::new(cose_key_bytes))
        .map_err(|_| invalid_key("not valid CBOR"))?;
    let map = value.as_map().ok_or_else(|| invalid_key("not a map"))?;

    let kty = map_get_int(map, 1).ok_or_else(|| invalid_key("missing kty"))?;
    let alg = map_get_int(map, 3).ok_or_else(|| invalid_key("missing alg"))?;

    match (kty, i64::try_from(alg).unwrap_or(0)) {
        (KTY_EC2, ALG_ES256) => {
            let crv = map_get_int(map, -1).ok_or_else(|| invalid_key("missing crv"))?;
            if crv != CRV_P256 {
                return Err(invalid_key("unsupported curve"));
            }
            let x = map_get_bytes(map, -2).ok_or_else(|| invalid_key("missing x coordinate"))?;
            let y = map_get_bytes(map, -3).ok_or_else(|| invalid_key("missing y coordinate"))?;
            if x.len() != 32 || y.len() != 32 {
                return Err(invalid_key("bad coordinate length"));
            }

            // Uncompressed SEC1 point: 0x04 || x || y
            let mut encoded = Vec::with_capacity(65);
            encoded.push(0x04);
            encoded.extend_from_slice(x);
            encoded.extend_from_slice(y);

            let key = P256VerifyingKey::from_sec1_bytes(&encoded)
                .map_err(|_| invalid_key("point not on curve"))?;
            Ok(PublicKey::Es256(key))
        }
        (KTY_OKP, ALG_EDDSA) => {
            let crv = map_get_int(map, -1).ok_or_else(|| invalid_key("missing crv"))?;
            if crv != CRV_ED25519 {
                return Err(invalid_key("unsupported curve"));
            }
            let x = map_get_bytes(map, -2).ok_or_else(|| invalid_key("missing x coordinate"))?;
            let bytes: [u8; 32] = x
                .as_slice()
                .try_into()
                .map_err(|_| invalid_key("bad key length"))?;
            let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map_err(|_| invalid_key("not a valid ed25519 point"))?;
            Ok(PublicKey::Ed25519(key))
        }
        (KTY_RSA, ALG_RS256) => {
            let n = map_get_bytes(map, -1).ok_or_else(|| invalid_key("missing modulus"))?;
            let e = map_get_bytes(map, -2).ok_or_else(|| invalid_key("missing exponent"))?;
            let key = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
                .map_err(|_| invalid_key("invalid RSA key"))?;
            Ok(PublicKey::Rs256(key))
        }
        (kty, alg) => Err(invalid_key(&format!(
            "unsupported algorithm (kty={kty}, alg={alg})"
        ))),
    }
}

fn invalid_key(detail: &str) -> Error {
    Error::InvalidAttestation(format!("credential public key rejected: {detail}"))
}

fn map_get_int(map: &[(CborValue, CborValue)], key: i128) -> Option<i128> {
    map.iter().find_map(|(k, v)| match (k, v) {
        (CborValue::Integer(k), CborValue::Integer(v)) if i128::from(*k) == key => {
            Some(i128::from(*v))
        }
        _ => None,
    })
}

fn map_get_bytes(map: &[(CborValue, CborValue)], key: i128) -> Option<&Vec<u8>> {
    map.iter().find_map(|(k, v)| match (k, v) {
        (CborValue::Integer(k), CborValue::Bytes(v)) if i128::from(*k) == key => Some(v),
        _ => None,
    })
}

/// Encode an ES256 verifying key as a COSE_Key.
#[cfg(test)]
pub(crate) fn encode_es256_key(key: &P256VerifyingKey) -> Vec<u8> {
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    let point = key.to_encoded_point(false);
    let entries = vec![
        (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
        (CborValue::Integer(3.into()), CborValue::Integer((-7).into())),
        (
            CborValue::Integer((-1).into()),
            CborValue::Integer(1.into()),
        ),
        (
            CborValue::Integer((-2).into()),
            CborValue::Bytes(point.x().unwrap().to_vec()),
        ),
        (
            CborValue::Integer((-3).into()),
            CborValue::Bytes(point.y().unwrap().to_vec()),
        ),
    ];
    let mut out = Vec::new();
    ciborium::ser::into_writer(&CborValue::Map(entries), &mut out).unwrap();
    out
}
