//! Transaction context for the input being debugged.
//!
//! A [`SpendContext`] is either taken from an existing transaction
//! ([`SpendContext::from_tx`]) or generated around a set of tapscript leaves
//! ([`TapscriptSpend::build`]). Either way it is fixed before any witness
//! element is signed or any opcode runs.

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::consensus;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::key::{TapTweak, TweakedPublicKey};
use bitcoin::secp256k1::{rand, Keypair, Secp256k1, Signing, XOnlyPublicKey};
use bitcoin::sighash::{Annex, Prevouts, SighashCache, TapSighash, TapSighashType};
use bitcoin::taproot::{LeafVersion, TapLeafHash, TapNodeHash, TaprootBuilder};
use bitcoin::transaction::Version;
use bitcoin::{Amount, Script, ScriptBuf, Transaction, TxIn, TxOut, Witness};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpendError {
    #[error("number of prevouts ({prevouts}) does not match number of inputs ({inputs})")]
    PrevoutCount { prevouts: usize, inputs: usize },
    #[error("input index {index} out of range ({inputs} inputs)")]
    InputIndex { index: usize, inputs: usize },
    #[error("script index {index} out of range ({scripts} scripts)")]
    ScriptIndex { index: usize, scripts: usize },
    #[error("taproot tree: {0}")]
    Tree(String),
    #[error("decoding {what}: {reason}")]
    Decode { what: &'static str, reason: String },
    #[error("sighash: {0}")]
    Sighash(String),
}

/// A taproot output to pay to: `<x-only key hex>:<sats>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutput {
    pub output_key: XOnlyPublicKey,
    pub value: Amount,
}

impl FromStr for TxOutput {
    type Err = SpendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decode = |reason: String| SpendError::Decode {
            what: "output",
            reason,
        };
        let (key, value) = s
            .split_once(':')
            .ok_or_else(|| decode(format!("expected '<pubkey>:<value>', got '{}'", s)))?;
        let output_key = parse_xonly(key)?;
        let sats: u64 = value
            .parse()
            .map_err(|e| decode(format!("value '{}': {}", value, e)))?;
        Ok(TxOutput {
            output_key,
            value: Amount::from_sat(sats),
        })
    }
}

/// Parse a 32-byte x-only public key from hex.
pub fn parse_xonly(s: &str) -> Result<XOnlyPublicKey, SpendError> {
    let bytes = hex::decode(s).map_err(|e| SpendError::Decode {
        what: "public key",
        reason: e.to_string(),
    })?;
    XOnlyPublicKey::from_slice(&bytes).map_err(|e| SpendError::Decode {
        what: "public key",
        reason: e.to_string(),
    })
}

fn random_xonly<C: Signing>(secp: &Secp256k1<C>) -> XOnlyPublicKey {
    Keypair::new(secp, &mut rand::thread_rng())
        .x_only_public_key()
        .0
}

/// The transaction, its prevouts, and which input is being authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendContext {
    pub tx: Transaction,
    pub prevouts: Vec<TxOut>,
    pub input_index: usize,
    /// Leaf committed to by script-path signatures, when known.
    pub leaf_hash: Option<TapLeafHash>,
}

impl SpendContext {
    pub fn new(
        tx: Transaction,
        prevouts: Vec<TxOut>,
        input_index: usize,
    ) -> Result<Self, SpendError> {
        if prevouts.len() != tx.input.len() {
            return Err(SpendError::PrevoutCount {
                prevouts: prevouts.len(),
                inputs: tx.input.len(),
            });
        }
        if input_index >= tx.input.len() {
            return Err(SpendError::InputIndex {
                index: input_index,
                inputs: tx.input.len(),
            });
        }
        Ok(SpendContext {
            tx,
            prevouts,
            input_index,
            leaf_hash: None,
        })
    }

    /// Existing-transaction mode: consensus-encoded transaction and
    /// prevouts, all hex. The witness under test is the input's own.
    pub fn from_tx(
        tx_hex: &str,
        prevouts_hex: &[&str],
        input_index: usize,
    ) -> Result<Self, SpendError> {
        let tx: Transaction = decode_consensus("transaction", tx_hex)?;
        let prevouts = prevouts_hex
            .iter()
            .map(|p| decode_consensus("prevout", p))
            .collect::<Result<Vec<TxOut>, _>>()?;
        SpendContext::new(tx, prevouts, input_index)
    }

    pub fn with_leaf(mut self, leaf_hash: TapLeafHash) -> Self {
        self.leaf_hash = Some(leaf_hash);
        self
    }

    pub fn prevout(&self) -> &TxOut {
        &self.prevouts[self.input_index]
    }

    pub fn input(&self) -> &TxIn {
        &self.tx.input[self.input_index]
    }

    pub fn script_sig(&self) -> &Script {
        &self.input().script_sig
    }

    /// Witness currently attached to the input.
    pub fn input_witness(&self) -> Vec<Vec<u8>> {
        self.input().witness.to_vec()
    }

    /// Copy of the context with `witness` attached to the input.
    pub fn with_witness(&self, witness: &[Vec<u8>]) -> SpendContext {
        let mut spend = self.clone();
        spend.tx.input[spend.input_index].witness = Witness::from_slice(witness);
        spend
    }

    /// BIP-341 script-path sighash for this input.
    pub fn script_spend_sighash(
        &self,
        leaf_hash: TapLeafHash,
        sighash_type: TapSighashType,
    ) -> Result<TapSighash, SpendError> {
        SighashCache::new(&self.tx)
            .taproot_script_spend_signature_hash(
                self.input_index,
                &Prevouts::All(&self.prevouts),
                leaf_hash,
                sighash_type,
            )
            .map_err(|e| SpendError::Sighash(e.to_string()))
    }

    /// BIP-341 key-path sighash for this input.
    pub fn key_spend_sighash(&self, sighash_type: TapSighashType) -> Result<TapSighash, SpendError> {
        SighashCache::new(&self.tx)
            .taproot_key_spend_signature_hash(
                self.input_index,
                &Prevouts::All(&self.prevouts),
                sighash_type,
            )
            .map_err(|e| SpendError::Sighash(e.to_string()))
    }

    /// BIP-341 sighash with every commitment the interpreter tracks: the
    /// annex, if any, and for script spends the leaf plus the position of the
    /// last executed OP_CODESEPARATOR (`u32::MAX` when none ran).
    pub fn taproot_sighash(
        &self,
        annex: Option<&[u8]>,
        leaf: Option<(TapLeafHash, u32)>,
        sighash_type: TapSighashType,
    ) -> Result<TapSighash, SpendError> {
        let annex = annex
            .map(Annex::new)
            .transpose()
            .map_err(|e| SpendError::Sighash(e.to_string()))?;
        SighashCache::new(&self.tx)
            .taproot_signature_hash(
                self.input_index,
                &Prevouts::All(&self.prevouts),
                annex,
                leaf,
                sighash_type,
            )
            .map_err(|e| SpendError::Sighash(e.to_string()))
    }
}

fn decode_consensus<T: consensus::Decodable>(what: &'static str, s: &str) -> Result<T, SpendError> {
    let bytes = hex::decode(s.trim()).map_err(|e| SpendError::Decode {
        what,
        reason: e.to_string(),
    })?;
    consensus::deserialize(&bytes).map_err(|e| SpendError::Decode {
        what,
        reason: e.to_string(),
    })
}

/// A generated script-path spend of one leaf out of a taproot tree.
#[derive(Debug, Clone)]
pub struct TapscriptSpend {
    pub context: SpendContext,
    /// Appended after the user witness: `[leaf script, control block]`.
    pub trailer: Vec<Vec<u8>>,
    pub internal_key: XOnlyPublicKey,
    pub output_key: XOnlyPublicKey,
    pub merkle_root: Option<TapNodeHash>,
}

impl TapscriptSpend {
    /// Commit `scripts` to a taproot tree and build a transaction spending
    /// `scripts[script_index]` at input `input_index`.
    ///
    /// Missing keys are generated at random. With no `outputs`, the
    /// transaction pays 1 BTC to a random key.
    pub fn build(
        scripts: &[ScriptBuf],
        script_index: usize,
        input_index: usize,
        internal_key: Option<XOnlyPublicKey>,
        outputs: &[TxOutput],
    ) -> Result<Self, SpendError> {
        let leaf_script = scripts
            .get(script_index)
            .cloned()
            .ok_or(SpendError::ScriptIndex {
                index: script_index,
                scripts: scripts.len(),
            })?;

        let secp = Secp256k1::new();
        let internal_key = internal_key.unwrap_or_else(|| random_xonly(&secp));

        let spend_info = TaprootBuilder::with_huffman_tree(scripts.iter().cloned().map(|s| (1, s)))
            .map_err(|e| SpendError::Tree(e.to_string()))?
            .finalize(&secp, internal_key)
            .map_err(|_| SpendError::Tree("tree is not complete".to_string()))?;

        let control_block = spend_info
            .control_block(&(leaf_script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| SpendError::Tree("leaf missing from tree".to_string()))?;
        let output_key = spend_info.output_key();

        let outputs = if outputs.is_empty() {
            vec![TxOutput {
                output_key: random_xonly(&secp),
                value: Amount::ONE_BTC,
            }]
        } else {
            outputs.to_vec()
        };

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: (0..=input_index).map(|_| TxIn::default()).collect(),
            output: outputs
                .iter()
                .map(|o| TxOut {
                    value: o.value,
                    script_pubkey: ScriptBuf::new_p2tr_tweaked(
                        TweakedPublicKey::dangerous_assume_tweaked(o.output_key),
                    ),
                })
                .collect(),
        };
        let prevout = TxOut {
            value: Amount::ONE_BTC,
            script_pubkey: ScriptBuf::new_p2tr_tweaked(output_key),
        };
        let prevouts = vec![prevout; input_index + 1];

        let leaf_hash = TapLeafHash::from_script(&leaf_script, LeafVersion::TapScript);
        let context = SpendContext::new(tx, prevouts, input_index)?.with_leaf(leaf_hash);

        Ok(TapscriptSpend {
            context,
            trailer: vec![leaf_script.to_bytes(), control_block.serialize()],
            internal_key,
            output_key: output_key.to_inner(),
            merkle_root: spend_info.merkle_root(),
        })
    }
}

// ─── Commitment tweaks ──────────────────────────────────────────────────────

/// Keys and hashes of a two-stage tweak: the internal key is first tweaked
/// with `sha256(leaf root || merkle root)`, then with the leaf root as a
/// regular taproot commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentTweak {
    pub internal_key: XOnlyPublicKey,
    /// Root of a tree holding the single leaf `script`.
    pub taproot_root: TapNodeHash,
    pub merkle_root: Vec<u8>,
    pub commitment: sha256::Hash,
    pub tweaked_key: XOnlyPublicKey,
    pub output_key: XOnlyPublicKey,
}

impl CommitmentTweak {
    /// Commit `merkle_root` into the key that spends `script`. A random
    /// internal key is used when none is given.
    pub fn compute(
        script: &Script,
        merkle_root: &[u8],
        internal_key: Option<XOnlyPublicKey>,
    ) -> CommitmentTweak {
        let secp = Secp256k1::new();
        let internal_key = internal_key.unwrap_or_else(|| random_xonly(&secp));
        let taproot_root =
            TapNodeHash::from(TapLeafHash::from_script(script, LeafVersion::TapScript));

        let mut data = taproot_root.to_byte_array().to_vec();
        data.extend_from_slice(merkle_root);
        let commitment = sha256::Hash::hash(&data);

        let commitment_node = TapNodeHash::from_byte_array(commitment.to_byte_array());
        let (tweaked, _) = internal_key.tap_tweak(&secp, Some(commitment_node));
        let (output, _) = tweaked.to_inner().tap_tweak(&secp, Some(taproot_root));
        log::debug!("tweaked {} with commitment {}", internal_key, commitment);

        CommitmentTweak {
            internal_key,
            taproot_root,
            merkle_root: merkle_root.to_vec(),
            commitment,
            tweaked_key: tweaked.to_inner(),
            output_key: output.to_inner(),
        }
    }
}

impl std::fmt::Display for CommitmentTweak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "inner internal key: {}", self.internal_key)?;
        writeln!(f, "taproot: {}", self.taproot_root)?;
        writeln!(f, "merkle root: {}", hex::encode(&self.merkle_root))?;
        writeln!(f, "commitment (taproot:merkle): {}", self.commitment)?;
        writeln!(f, "tweaked key: {}", self.tweaked_key)?;
        write!(f, "taproot output key: {}", self.output_key)
    }
}
