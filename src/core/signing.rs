//! Deferred signatures for witness producers.
//!
//! A [`SigningContext`] maps the key identifiers used in `<sig:ID>`
//! placeholders to keys. An identifier mapped to empty bytes gets a fresh
//! random key the first time it is used; that key is then cached for the
//! lifetime of the context, so rewinding and replaying a session signs with
//! the same key again.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{rand, All, Keypair, Message, Secp256k1, SecretKey};
use bitcoin::sighash::TapSighashType;
use bitcoin::taproot;

use crate::core::assembler::WitnessProducer;
use crate::core::spend::SpendContext;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("private key {0} not known")]
    UnknownKey(String),
    #[error("invalid private key {id}: {reason}")]
    InvalidKey { id: String, reason: String },
    #[error("invalid key table entry '{0}', expected '<id>:<hex>'")]
    InvalidTable(String),
    #[error("signature for {0} requested before a transaction context exists")]
    NoContext(String),
    #[error("signing with {id}: {reason}")]
    Sign { id: String, reason: String },
}

/// Key generation and signing, the cryptographic side of a signing context.
pub trait Signer {
    type Key: Clone + fmt::Debug;

    fn key_from_bytes(&self, bytes: &[u8]) -> Result<Self::Key, String>;

    fn generate_key(&self) -> Self::Key;

    /// Hex encoding of the key's public half, for display.
    fn public_key_hex(&self, key: &Self::Key) -> String;

    /// Sign the context's input. Errors are reported as text and wrapped by
    /// the caller with the key identifier.
    fn sign(&self, key: &Self::Key, spend: &SpendContext) -> Result<Vec<u8>, String>;
}

/// BIP-340 signatures over the BIP-341 tapscript sighash (SIGHASH_DEFAULT).
///
/// Signing uses no auxiliary randomness, so the same key and transaction
/// always produce the same 64-byte signature.
pub struct SchnorrSigner {
    secp: Secp256k1<All>,
}

impl SchnorrSigner {
    pub fn new() -> Self {
        SchnorrSigner {
            secp: Secp256k1::new(),
        }
    }
}

impl Default for SchnorrSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer for SchnorrSigner {
    type Key = Keypair;

    fn key_from_bytes(&self, bytes: &[u8]) -> Result<Keypair, String> {
        let secret = SecretKey::from_slice(bytes).map_err(|e| e.to_string())?;
        Ok(Keypair::from_secret_key(&self.secp, &secret))
    }

    fn generate_key(&self) -> Keypair {
        Keypair::new(&self.secp, &mut rand::thread_rng())
    }

    fn public_key_hex(&self, key: &Keypair) -> String {
        hex::encode(key.x_only_public_key().0.serialize())
    }

    fn sign(&self, key: &Keypair, spend: &SpendContext) -> Result<Vec<u8>, String> {
        let leaf_hash = spend
            .leaf_hash
            .ok_or_else(|| "no tapscript leaf to commit to".to_string())?;
        let sighash = spend
            .script_spend_sighash(leaf_hash, TapSighashType::Default)
            .map_err(|e| e.to_string())?;
        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = self.secp.sign_schnorr_no_aux_rand(&msg, key);
        Ok(taproot::Signature {
            signature,
            sighash_type: TapSighashType::Default,
        }
        .to_vec())
    }
}

/// Key material by identifier, as given on the command line:
/// `alice:<hex>,bob:` (empty hex = generate on first use).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTable(BTreeMap<String, Vec<u8>>);

impl KeyTable {
    pub fn new() -> Self {
        KeyTable::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, key: Vec<u8>) {
        self.0.insert(id.into(), key);
    }

    pub fn get(&self, id: &str) -> Option<&[u8]> {
        self.0.get(id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for KeyTable {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut table = KeyTable::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, key_hex) = entry
                .split_once(':')
                .filter(|(id, _)| !id.is_empty())
                .ok_or_else(|| SigningError::InvalidTable(entry.to_string()))?;
            let key = hex::decode(key_hex).map_err(|e| SigningError::InvalidKey {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
            table.insert(id, key);
        }
        Ok(table)
    }
}

/// Resolves witness producers into concrete bytes.
pub struct SigningContext<S: Signer = SchnorrSigner> {
    signer: S,
    table: KeyTable,
    keys: HashMap<String, S::Key>,
}

impl<S: Signer> SigningContext<S> {
    pub fn new(signer: S, table: KeyTable) -> Self {
        SigningContext {
            signer,
            table,
            keys: HashMap::new(),
        }
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    /// The key for `id`, parsing or generating it on first use.
    pub fn key(&mut self, id: &str) -> Result<&S::Key, SigningError> {
        if !self.keys.contains_key(id) {
            let bytes = self
                .table
                .get(id)
                .ok_or_else(|| SigningError::UnknownKey(id.to_string()))?;
            let key = if bytes.is_empty() {
                log::debug!("generating random key for '{}'", id);
                self.signer.generate_key()
            } else {
                self.signer
                    .key_from_bytes(bytes)
                    .map_err(|reason| SigningError::InvalidKey {
                        id: id.to_string(),
                        reason,
                    })?
            };
            self.keys.insert(id.to_string(), key);
        }
        Ok(&self.keys[id])
    }

    /// Keys that have been parsed or generated so far, by identifier.
    pub fn resolved_keys(&self) -> impl Iterator<Item = (&str, &S::Key)> {
        self.keys.iter().map(|(id, key)| (id.as_str(), key))
    }

    /// Produce every witness element, in order.
    ///
    /// Signature producers need a transaction context; without one they
    /// fail with [`SigningError::NoContext`].
    pub fn resolve(
        &mut self,
        producers: &[WitnessProducer],
        spend: Option<&SpendContext>,
    ) -> Result<Vec<Vec<u8>>, SigningError> {
        producers
            .iter()
            .map(|producer| match producer {
                WitnessProducer::Literal(data) => Ok(data.clone()),
                WitnessProducer::Empty => Ok(vec![]),
                WitnessProducer::Signature(id) => {
                    let spend = spend.ok_or_else(|| SigningError::NoContext(id.clone()))?;
                    let key = self.key(id)?.clone();
                    log::trace!("signing input {} with '{}'", spend.input_index, id);
                    self.signer
                        .sign(&key, spend)
                        .map_err(|reason| SigningError::Sign {
                            id: id.clone(),
                            reason,
                        })
                }
            })
            .collect()
    }
}
