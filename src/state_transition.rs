//! Signed state transition envelope
//!
//! Every transition serializes as `varint(protocolVersion) || canonicalEncode(body)`, and
//! an unskipped buffer is followed by the canonical encoding of its signature fields.
//! Signing and hashing always cover the skip-signature form.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::execution_context::ExecutionContext;
use crate::hashing::{self, canonical_decode_from, canonical_encode, prefix_with_protocol_version};
use crate::identity::{IdentityPublicKey, KeyType, Purpose, SecurityLevel};
use crate::identity_create::IdentityCreateTransition;
use crate::identity_top_up::IdentityTopUpTransition;
use crate::identity_update::IdentityUpdateTransition;
use crate::signature::scheme_for;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateTransitionType {
    IdentityCreate = 2,
    IdentityTopUp = 3,
    IdentityUpdate = 5,
}

impl TryFrom<u8> for StateTransitionType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(StateTransitionType::IdentityCreate),
            3 => Ok(StateTransitionType::IdentityTopUp),
            5 => Ok(StateTransitionType::IdentityUpdate),
            other => Err(ProtocolError::InvalidStateTransitionType(other)),
        }
    }
}

/// Behaviour shared by every state transition
pub trait StateTransitionLike {
    fn protocol_version(&self) -> u32;

    fn transition_type(&self) -> StateTransitionType;

    fn signature(&self) -> Option<&[u8]>;

    fn set_signature(&mut self, signature: Option<ByteString>);

    /// Identity that pays for and owns the effects of the transition
    fn owner_id(&self) -> Identifier;

    /// Canonical encoding of everything after the protocol version prefix
    fn encode_body(&self, skip_signature: bool) -> Result<ByteString>;

    fn to_json(&self, skip_signature: bool) -> Result<serde_json::Value>;

    fn execution_context(&self) -> &ExecutionContext;

    fn execution_context_mut(&mut self) -> &mut ExecutionContext;

    fn set_execution_context(&mut self, execution_context: ExecutionContext) {
        *self.execution_context_mut() = execution_context;
    }

    fn to_buffer(&self, skip_signature: bool) -> Result<ByteString> {
        let body = self.encode_body(skip_signature)?;
        Ok(prefix_with_protocol_version(self.protocol_version(), &body))
    }

    fn hash(&self, skip_signature: bool) -> Result<Hash> {
        Ok(hashing::hash(&self.to_buffer(skip_signature)?))
    }

    /// Sign the skip-signature buffer with the scheme selected by `key_type`
    fn sign_by_private_key(&mut self, private_key: &[u8], key_type: KeyType) -> Result<()> {
        let scheme = scheme_for(key_type)?;
        let payload = self.to_buffer(true)?;
        let signature = scheme.sign(&payload, private_key)?;
        self.set_signature(Some(signature));
        Ok(())
    }

    /// `public_key` is the key data for `key_type`: a raw key, or a HASH160 for hash keys
    fn verify_by_public_key(&self, public_key: &[u8], key_type: KeyType) -> Result<bool> {
        let signature = self.signature().ok_or(ProtocolError::StateTransitionIsNotSigned)?;
        let scheme = scheme_for(key_type)?;
        let payload = self.to_buffer(true)?;
        scheme.verify(&payload, signature, public_key)
    }
}

/// Transitions signed by one of the owner identity's keys
pub trait IdentitySignedStateTransition: StateTransitionLike {
    fn signature_public_key_id(&self) -> Option<KeyId>;

    fn set_signature_public_key_id(&mut self, key_id: Option<KeyId>);

    fn security_level_requirement(&self) -> &'static [SecurityLevel] {
        &[SecurityLevel::Master]
    }

    /// Sign with `private_key` on behalf of identity key `key`.
    ///
    /// Rejects before signing when the key cannot authorize this transition or does not
    /// correspond to `private_key`.
    fn sign(&mut self, key: &IdentityPublicKey, private_key: &[u8]) -> Result<()> {
        check_key_level_and_purpose(key, self.security_level_requirement())?;
        check_key_is_enabled(key)?;

        let scheme = scheme_for(key.key_type)?;
        let derived = scheme.public_key_data(private_key)?;
        if derived != key.data {
            return Err(ProtocolError::InvalidSignaturePublicKey { public_key: key.data.clone() });
        }

        self.set_signature_public_key_id(Some(key.id));
        self.sign_by_private_key(private_key, key.key_type)
    }

    fn verify_signature(&self, key: &IdentityPublicKey) -> Result<bool> {
        if self.signature().is_none() {
            return Err(ProtocolError::StateTransitionIsNotSigned);
        }

        if self.signature_public_key_id() != Some(key.id) {
            return Err(ProtocolError::PublicKeyMismatch {
                signature_public_key_id: self.signature_public_key_id(),
                public_key_id: key.id,
            });
        }

        check_key_level_and_purpose(key, self.security_level_requirement())?;
        check_key_is_enabled(key)?;

        self.verify_by_public_key(&key.data, key.key_type)
    }
}

fn check_key_level_and_purpose(key: &IdentityPublicKey, required: &[SecurityLevel]) -> Result<()> {
    if key.purpose != Purpose::Authentication {
        return Err(ProtocolError::WrongPublicKeyPurpose {
            public_key_purpose: key.purpose,
            key_purpose_requirement: Purpose::Authentication,
        });
    }

    if !required.contains(&key.security_level) {
        return Err(ProtocolError::InvalidSignaturePublicKeySecurityLevel {
            public_key_security_level: key.security_level,
            required_security_levels: required.to_vec(),
        });
    }

    Ok(())
}

fn check_key_is_enabled(key: &IdentityPublicKey) -> Result<()> {
    if key.is_disabled() {
        return Err(ProtocolError::PublicKeyIsDisabled { public_key_id: key.id });
    }
    Ok(())
}

/// `canonicalEncode(body) [|| canonicalEncode(signature fields)]`
pub(crate) fn encode_with_signature<B, S>(body: &B, signature_fields: &S, skip_signature: bool) -> Result<ByteString>
where
    B: Serialize + ?Sized,
    S: Serialize + ?Sized,
{
    let mut buffer = canonical_encode(body)?;
    if !skip_signature {
        buffer.extend(canonical_encode(signature_fields)?);
    }
    Ok(buffer)
}

/// Signature fields following a body; absent when the buffer was produced with skip-signature
pub(crate) fn decode_signature_fields<S: DeserializeOwned + Default>(cursor: &mut &[u8]) -> Result<S> {
    if cursor.is_empty() {
        return Ok(S::default());
    }

    let fields = canonical_decode_from(cursor)?;
    if !cursor.is_empty() {
        return Err(ProtocolError::Serialization(format!(
            "{} trailing bytes after state transition",
            cursor.len()
        )));
    }
    Ok(fields)
}

pub(crate) fn public_keys_for_encoding(
    public_keys: &[IdentityPublicKey],
    skip_signature: bool,
) -> Vec<IdentityPublicKey> {
    if skip_signature {
        public_keys.iter().map(IdentityPublicKey::without_signature).collect()
    } else {
        public_keys.to_vec()
    }
}

pub(crate) fn to_json_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateTransition {
    IdentityCreate(IdentityCreateTransition),
    IdentityTopUp(IdentityTopUpTransition),
    IdentityUpdate(IdentityUpdateTransition),
}

impl StateTransition {
    /// Decode any transition, dispatching on the type tag that opens the body
    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        let (protocol_version, mut cursor) = hashing::split_protocol_version(buffer)?;
        let tag: u8 = canonical_decode_from(&mut cursor)?;

        let transition = match StateTransitionType::try_from(tag)? {
            StateTransitionType::IdentityCreate => StateTransition::IdentityCreate(
                IdentityCreateTransition::decode_body(protocol_version, &mut cursor)?,
            ),
            StateTransitionType::IdentityTopUp => StateTransition::IdentityTopUp(
                IdentityTopUpTransition::decode_body(protocol_version, &mut cursor)?,
            ),
            StateTransitionType::IdentityUpdate => StateTransition::IdentityUpdate(
                IdentityUpdateTransition::decode_body(protocol_version, &mut cursor)?,
            ),
        };
        Ok(transition)
    }

    pub fn as_transition(&self) -> &dyn StateTransitionLike {
        match self {
            StateTransition::IdentityCreate(transition) => transition,
            StateTransition::IdentityTopUp(transition) => transition,
            StateTransition::IdentityUpdate(transition) => transition,
        }
    }

    pub fn as_transition_mut(&mut self) -> &mut dyn StateTransitionLike {
        match self {
            StateTransition::IdentityCreate(transition) => transition,
            StateTransition::IdentityTopUp(transition) => transition,
            StateTransition::IdentityUpdate(transition) => transition,
        }
    }

    pub fn transition_type(&self) -> StateTransitionType {
        self.as_transition().transition_type()
    }

    pub fn owner_id(&self) -> Identifier {
        self.as_transition().owner_id()
    }

    pub fn to_buffer(&self, skip_signature: bool) -> Result<ByteString> {
        self.as_transition().to_buffer(skip_signature)
    }

    pub fn hash(&self, skip_signature: bool) -> Result<Hash> {
        self.as_transition().hash(skip_signature)
    }

    pub fn execution_context(&self) -> &ExecutionContext {
        self.as_transition().execution_context()
    }

    pub fn execution_context_mut(&mut self) -> &mut ExecutionContext {
        self.as_transition_mut().execution_context_mut()
    }
}

impl From<IdentityCreateTransition> for StateTransition {
    fn from(transition: IdentityCreateTransition) -> Self {
        StateTransition::IdentityCreate(transition)
    }
}

impl From<IdentityTopUpTransition> for StateTransition {
    fn from(transition: IdentityTopUpTransition) -> Self {
        StateTransition::IdentityTopUp(transition)
    }
}

impl From<IdentityUpdateTransition> for StateTransition {
    fn from(transition: IdentityUpdateTransition) -> Self {
        StateTransition::IdentityUpdate(transition)
    }
}
