//! Parsing of the authenticator-data byte layout.
//!
//! Layout: rpIdHash (32) || flags (1) || signCount (4, big endian) ||
//! optional attested credential data (aaguid 16 || idLen 2 || id ||
//! COSE key, CBOR).

use ciborium::value::Value as CborValue;
use std::io::Cursor;

use crate::error::{Error, Result};

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;

#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub credential_id: Option<Vec<u8>>,
    pub credential_public_key: Option<Vec<u8>>,
}

impl AuthenticatorData {
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }
}

pub fn parse(data: &[u8], expect_attested_data: bool) -> Result<AuthenticatorData> {
    if data.len() < 37 {
        return Err(Error::Payload("authenticator data too short".to_string()));
    }

    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&data[..32]);
    let flags = data[32];
    let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

    let mut credential_id = None;
    let mut credential_public_key = None;
    if expect_attested_data || flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0 {
        if flags & FLAG_ATTESTED_CREDENTIAL_DATA == 0 {
            return Err(Error::Payload(
                "attested credential data missing".to_string(),
            ));
        }
        let mut offset = 37usize;
        if data.len() < offset + 18 {
            return Err(Error::Payload(
                "attested credential data truncated".to_string(),
            ));
        }
        offset += 16; // aaguid
        let cred_len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
        offset += 2;

        if data.len() < offset + cred_len {
            return Err(Error::Payload("credential id truncated".to_string()));
        }
        credential_id = Some(data[offset..offset + cred_len].to_vec());
        offset += cred_len;

        // The COSE key has no length prefix; decode once to learn how many
        // bytes it occupies and keep the raw slice.
        let mut cursor = Cursor::new(&data[offset..]);
        let _key: CborValue = ciborium::de::from_reader(&mut cursor)
            .map_err(|_| Error::Payload("credential public key is not valid CBOR".to_string()))?;
        let used = usize::try_from(cursor.position())
            .map_err(|_| Error::Payload("credential public key is not valid CBOR".to_string()))?;
        if used == 0 || offset + used > data.len() {
            return Err(Error::Payload(
                "credential public key is not valid CBOR".to_string(),
            ));
        }
        credential_public_key = Some(data[offset..offset + used].to_vec());
    }

    Ok(AuthenticatorData {
        rp_id_hash,
        flags,
        sign_count,
        credential_id,
        credential_public_key,
    })
}
