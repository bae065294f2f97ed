//! Reference taproot interpreter.
//!
//! Evaluates a P2TR input the way a node with standard policy flags would:
//! the scriptSig must be empty, the prevout must be a v1 witness program,
//! and the witness is either a key-path signature or a script-path spend
//! (`<stack...> <leaf script> <control block> [annex]`). Script-path spends
//! run under BIP-342 tapscript rules.
//!
//! Sub-script indices reported to the step callback: 0 scriptSig, 1 the
//! prevout scriptPubKey, 2 the leaf script.

use bitcoin::consensus::encode;
use bitcoin::hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash};
use bitcoin::secp256k1::{schnorr, Message, Secp256k1, VerifyOnly, XOnlyPublicKey};
use bitcoin::sighash::TapSighashType;
use bitcoin::taproot::{ControlBlock, LeafVersion, TapLeafHash};
use bitcoin::{Script, Witness};

use crate::core::interpreter::{
    Engine, Interpreter, InterpreterError, ScriptExecError, ScriptPhase, StepControl, StepInfo,
};
use crate::core::opcode::{decode_script, Opcode, ScriptInstruction};
use crate::core::spend::SpendContext;
use crate::core::stack::{StackItem, MAX_SCRIPT_NUM_LEN};

const MAX_ELEMENT_SIZE: usize = 520;
const MAX_STACK_SIZE: usize = 1000;
const VALIDATION_WEIGHT_PER_SIGOP: i64 = 50;
const VALIDATION_WEIGHT_OFFSET: i64 = 50;
const ANNEX_TAG: u8 = 0x50;
const LOCKTIME_THRESHOLD: i64 = 500_000_000;
const SEQUENCE_FINAL: u32 = 0xffff_ffff;
const SEQUENCE_DISABLE_FLAG: i64 = 1 << 31;
const SEQUENCE_TYPE_FLAG: i64 = 1 << 22;
const SEQUENCE_MASK: i64 = 0x0000_ffff;

const SCRIPT_SIG: usize = 0;
const SCRIPT_PUBKEY: usize = 1;
const WITNESS_SCRIPT: usize = 2;

/// Reference [`Interpreter`] for taproot spends.
#[derive(Clone)]
pub struct TapscriptInterpreter {
    secp: Secp256k1<VerifyOnly>,
}

impl TapscriptInterpreter {
    pub fn new() -> Self {
        TapscriptInterpreter {
            secp: Secp256k1::verification_only(),
        }
    }
}

impl Default for TapscriptInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter for TapscriptInterpreter {
    type Engine = TapscriptEngine;

    fn setup(
        &self,
        spend: &SpendContext,
        witness: &[Vec<u8>],
    ) -> Result<TapscriptEngine, InterpreterError> {
        if !spend.prevout().script_pubkey.is_p2tr() {
            return Err(InterpreterError::Setup(format!(
                "prevout {} is not a taproot output",
                spend.input_index
            )));
        }
        Ok(TapscriptEngine {
            spend: spend.with_witness(witness),
            witness: witness.to_vec(),
            secp: self.secp.clone(),
        })
    }
}

/// One prepared taproot input evaluation.
pub struct TapscriptEngine {
    spend: SpendContext,
    witness: Vec<Vec<u8>>,
    secp: Secp256k1<VerifyOnly>,
}

impl Engine for TapscriptEngine {
    fn execute(
        self,
        on_step: &mut dyn FnMut(&StepInfo<'_>) -> StepControl,
    ) -> Result<(), InterpreterError> {
        let script_sig = self.spend.script_sig().as_bytes().to_vec();
        let script_pubkey = self.spend.prevout().script_pubkey.as_bytes().to_vec();

        let mut sigs = SigChecker {
            spend: &self.spend,
            secp: &self.secp,
            annex: None,
            leaf_hash: None,
            budget: 0,
        };

        // Both run on throwaway stacks: the scriptSig has to be empty and
        // the program only pushes its version and key.
        Machine::new(Vec::new(), &mut sigs).run(SCRIPT_SIG, &script_sig, on_step)?;
        if !script_sig.is_empty() {
            return Err(fail(ScriptExecError::WitnessMalleated, SCRIPT_SIG, 0));
        }
        Machine::new(Vec::new(), &mut sigs).run(SCRIPT_PUBKEY, &script_pubkey, on_step)?;

        let program_fail = |error| fail(error, SCRIPT_PUBKEY, 2);
        let output_key = XOnlyPublicKey::from_slice(&script_pubkey[2..])
            .map_err(|_| program_fail(ScriptExecError::WitnessProgramMismatch))?;

        let mut witness = self.witness.clone();
        if witness.is_empty() {
            return Err(program_fail(ScriptExecError::WitnessProgramWitnessEmpty));
        }
        if witness.len() >= 2 && witness.last().and_then(|w| w.first()) == Some(&ANNEX_TAG) {
            sigs.annex = witness.pop();
        }

        if witness.len() == 1 {
            log::debug!("key path spend");
            let ok = sigs
                .verify(&witness[0], &output_key.serialize(), None)
                .map_err(program_fail)?;
            return if ok {
                Ok(())
            } else {
                Err(program_fail(ScriptExecError::SchnorrSig))
            };
        }

        let control_bytes = witness.pop().unwrap_or_default();
        let leaf_script = witness.pop().unwrap_or_default();
        if control_bytes.len() < 33 || (control_bytes.len() - 33) % 32 != 0 {
            return Err(program_fail(ScriptExecError::TaprootWrongControlSize));
        }
        let control = ControlBlock::decode(&control_bytes)
            .map_err(|_| program_fail(ScriptExecError::TaprootWrongControlSize))?;
        if !control.verify_taproot_commitment(
            &self.secp,
            output_key,
            Script::from_bytes(&leaf_script),
        ) {
            return Err(program_fail(ScriptExecError::WitnessProgramMismatch));
        }
        if control.leaf_version != LeafVersion::TapScript {
            return Err(program_fail(ScriptExecError::DiscourageUpgradableTaprootVersion));
        }

        // OP_SUCCESSx anywhere in the leaf makes it unconditionally valid;
        // standard policy refuses to relay such spends.
        for (pc, instr) in decode_script(&leaf_script).iter().enumerate() {
            if instr.truncated {
                return Err(fail(ScriptExecError::BadOpcode, WITNESS_SCRIPT, pc));
            }
            if is_op_success(instr.opcode.to_byte()) {
                return Err(fail(ScriptExecError::DiscourageOpSuccess, WITNESS_SCRIPT, pc));
            }
        }

        if witness.iter().any(|w| w.len() > MAX_ELEMENT_SIZE) {
            return Err(fail(ScriptExecError::PushSize, WITNESS_SCRIPT, 0));
        }

        let witness_size = encode::serialize(&Witness::from_slice(&self.witness)).len() as i64;
        sigs.budget = witness_size + VALIDATION_WEIGHT_OFFSET;
        sigs.leaf_hash = Some(TapLeafHash::from_script(
            Script::from_bytes(&leaf_script),
            LeafVersion::TapScript,
        ));

        let stack = witness.into_iter().map(StackItem).collect();
        let mut machine = Machine::new(stack, &mut sigs);
        machine.run(WITNESS_SCRIPT, &leaf_script, on_step)?;

        let end = decode_script(&leaf_script).len();
        match machine.stack.as_slice() {
            [top] if top.as_bool() => Ok(()),
            [] | [_] => Err(fail(ScriptExecError::EvalFalse, WITNESS_SCRIPT, end)),
            _ => Err(fail(ScriptExecError::CleanStack, WITNESS_SCRIPT, end)),
        }
    }
}

fn fail(error: ScriptExecError, script_index: usize, pc: usize) -> InterpreterError {
    InterpreterError::Script {
        error,
        phase: ScriptPhase::from_index(script_index),
        pc,
    }
}

/// BIP-342 OP_SUCCESSx byte values.
fn is_op_success(b: u8) -> bool {
    matches!(
        b,
        0x50 | 0x62 | 0x7e..=0x81 | 0x83..=0x86 | 0x89..=0x8a | 0x8d..=0x8e | 0x95..=0x99 | 0xbb..=0xfe
    )
}

/// Signature checks and the tapscript validation-weight budget.
struct SigChecker<'a> {
    spend: &'a SpendContext,
    secp: &'a Secp256k1<VerifyOnly>,
    annex: Option<Vec<u8>>,
    /// Set for script-path spends.
    leaf_hash: Option<TapLeafHash>,
    budget: i64,
}

impl SigChecker<'_> {
    /// Verify a BIP-340 signature over this input's sighash.
    ///
    /// An empty signature is a valid "no" and returns `Ok(false)`. Any other
    /// signature that fails to verify is an error.
    fn verify(
        &mut self,
        sig: &[u8],
        pubkey: &[u8],
        codesep_pos: Option<u32>,
    ) -> Result<bool, ScriptExecError> {
        if sig.is_empty() {
            return Ok(false);
        }
        if self.leaf_hash.is_some() {
            self.budget -= VALIDATION_WEIGHT_PER_SIGOP;
            if self.budget < 0 {
                return Err(ScriptExecError::TapscriptValidationWeight);
            }
        }
        if pubkey.len() != 32 {
            return Err(ScriptExecError::DiscourageUpgradablePubkeyType);
        }

        let sighash_type = match sig.len() {
            64 => TapSighashType::Default,
            65 if sig[64] != 0 => TapSighashType::from_consensus_u8(sig[64])
                .map_err(|_| ScriptExecError::SchnorrSigHashType)?,
            65 => return Err(ScriptExecError::SchnorrSigHashType),
            _ => return Err(ScriptExecError::SchnorrSigSize),
        };
        let leaf = self
            .leaf_hash
            .map(|leaf| (leaf, codesep_pos.unwrap_or(u32::MAX)));
        let sighash = self
            .spend
            .taproot_sighash(self.annex.as_deref(), leaf, sighash_type)
            .map_err(|_| ScriptExecError::SchnorrSigHashType)?;

        let signature =
            schnorr::Signature::from_slice(&sig[..64]).map_err(|_| ScriptExecError::SchnorrSig)?;
        let key = XOnlyPublicKey::from_slice(pubkey).map_err(|_| ScriptExecError::SchnorrSig)?;
        let msg = Message::from_digest(sighash.to_byte_array());
        self.secp
            .verify_schnorr(&signature, &msg, &key)
            .map(|_| true)
            .map_err(|_| ScriptExecError::SchnorrSig)
    }
}

/// Stack machine state for one sub-script.
struct Machine<'a, 'b> {
    stack: Vec<StackItem>,
    altstack: Vec<StackItem>,
    /// One entry per open OP_IF; false inside a branch that is skipped.
    conditions: Vec<bool>,
    codesep_pos: Option<u32>,
    sigs: &'b mut SigChecker<'a>,
}

impl<'a, 'b> Machine<'a, 'b> {
    fn new(stack: Vec<StackItem>, sigs: &'b mut SigChecker<'a>) -> Self {
        Machine {
            stack,
            altstack: Vec::new(),
            conditions: Vec::new(),
            codesep_pos: None,
            sigs,
        }
    }

    /// Run `script`, reporting the state before every instruction and once
    /// more after the last one.
    fn run(
        &mut self,
        script_index: usize,
        script: &[u8],
        on_step: &mut dyn FnMut(&StepInfo<'_>) -> StepControl,
    ) -> Result<(), InterpreterError> {
        let instructions = decode_script(script);
        for (pc, instr) in instructions.iter().enumerate() {
            self.report(script_index, pc, script, on_step)?;
            self.step(instr, pc)
                .map_err(|error| fail(error, script_index, pc))?;
        }
        self.report(script_index, instructions.len(), script, on_step)?;
        if !self.conditions.is_empty() {
            return Err(fail(
                ScriptExecError::UnbalancedConditional,
                script_index,
                instructions.len(),
            ));
        }
        Ok(())
    }

    fn report(
        &self,
        script_index: usize,
        pc: usize,
        script: &[u8],
        on_step: &mut dyn FnMut(&StepInfo<'_>) -> StepControl,
    ) -> Result<(), InterpreterError> {
        let info = StepInfo {
            script_index,
            pc,
            script,
            stack: &self.stack,
            altstack: &self.altstack,
        };
        match on_step(&info) {
            StepControl::Continue => Ok(()),
            StepControl::Abort => Err(InterpreterError::Aborted),
        }
    }

    fn executing(&self) -> bool {
        self.conditions.iter().all(|c| *c)
    }

    fn pop(&mut self) -> Result<StackItem, ScriptExecError> {
        self.stack
            .pop()
            .ok_or(ScriptExecError::InvalidStackOperation)
    }

    fn pop_num(&mut self) -> Result<i64, ScriptExecError> {
        let item = self.pop()?;
        num(&item, MAX_SCRIPT_NUM_LEN)
    }

    fn pop_bool(&mut self) -> Result<bool, ScriptExecError> {
        Ok(self.pop()?.as_bool())
    }

    fn push(&mut self, item: StackItem) {
        self.stack.push(item);
    }

    fn push_num(&mut self, n: i64) {
        self.push(StackItem::from_script_num(n));
    }

    fn push_bool(&mut self, b: bool) {
        self.push(StackItem::from_bool(b));
    }

    /// The item `depth` places below the top.
    fn peek(&self, depth: usize) -> Result<&StackItem, ScriptExecError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.stack.get(i))
            .ok_or(ScriptExecError::InvalidStackOperation)
    }

    fn require(&self, n: usize) -> Result<(), ScriptExecError> {
        if self.stack.len() < n {
            return Err(ScriptExecError::InvalidStackOperation);
        }
        Ok(())
    }

    fn step(&mut self, instr: &ScriptInstruction, pc: usize) -> Result<(), ScriptExecError> {
        let opcode = instr.opcode;

        if let Some(data) = &instr.push_data {
            if data.len() > MAX_ELEMENT_SIZE {
                return Err(ScriptExecError::PushSize);
            }
        }
        if matches!(opcode, Opcode::OpVerIf | Opcode::OpVerNotIf) {
            return Err(ScriptExecError::BadOpcode);
        }
        if matches!(
            opcode,
            Opcode::OpCheckMultiSig | Opcode::OpCheckMultiSigVerify
        ) {
            return Err(ScriptExecError::TapscriptCheckMultiSig);
        }

        let executing = self.executing();
        let is_conditional = matches!(
            opcode,
            Opcode::OpIf | Opcode::OpNotIf | Opcode::OpElse | Opcode::OpEndIf
        );
        if !executing && !is_conditional {
            return Ok(());
        }

        if let Some(data) = &instr.push_data {
            if instr.truncated {
                return Err(ScriptExecError::BadOpcode);
            }
            if !is_minimal_push(opcode, data) {
                return Err(ScriptExecError::MinimalData);
            }
            self.push(StackItem(data.clone()));
            return self.check_size();
        }

        match opcode {
            Opcode::Op1Negate => self.push_num(-1),
            Opcode::OpNum(n) => self.push_num(n as i64),

            Opcode::OpNop => {}
            Opcode::OpNop1
            | Opcode::OpNop4
            | Opcode::OpNop5
            | Opcode::OpNop6
            | Opcode::OpNop7
            | Opcode::OpNop8
            | Opcode::OpNop9
            | Opcode::OpNop10 => return Err(ScriptExecError::DiscourageUpgradableNops),
            Opcode::OpCheckLockTimeVerify => self.check_locktime()?,
            Opcode::OpCheckSequenceVerify => self.check_sequence()?,

            Opcode::OpIf | Opcode::OpNotIf => {
                let mut value = false;
                if executing {
                    let top = self.pop()?;
                    value = match top.as_bytes() {
                        [] => false,
                        [1] => true,
                        _ => return Err(ScriptExecError::TapscriptMinimalIf),
                    };
                    if opcode == Opcode::OpNotIf {
                        value = !value;
                    }
                }
                self.conditions.push(value);
            }
            Opcode::OpElse => {
                let last = self
                    .conditions
                    .last_mut()
                    .ok_or(ScriptExecError::UnbalancedConditional)?;
                *last = !*last;
            }
            Opcode::OpEndIf => {
                self.conditions
                    .pop()
                    .ok_or(ScriptExecError::UnbalancedConditional)?;
            }
            Opcode::OpVerify => {
                if !self.pop_bool()? {
                    return Err(ScriptExecError::Verify);
                }
            }
            Opcode::OpReturn => return Err(ScriptExecError::OpReturn),

            Opcode::OpToAltStack => {
                let item = self.pop()?;
                self.altstack.push(item);
            }
            Opcode::OpFromAltStack => {
                let item = self
                    .altstack
                    .pop()
                    .ok_or(ScriptExecError::InvalidAltstackOperation)?;
                self.push(item);
            }
            Opcode::Op2Drop => {
                self.require(2)?;
                self.stack.truncate(self.stack.len() - 2);
            }
            Opcode::Op2Dup => {
                let (a, b) = (self.peek(1)?.clone(), self.peek(0)?.clone());
                self.push(a);
                self.push(b);
            }
            Opcode::Op3Dup => {
                let (a, b, c) = (
                    self.peek(2)?.clone(),
                    self.peek(1)?.clone(),
                    self.peek(0)?.clone(),
                );
                self.push(a);
                self.push(b);
                self.push(c);
            }
            Opcode::Op2Over => {
                let (a, b) = (self.peek(3)?.clone(), self.peek(2)?.clone());
                self.push(a);
                self.push(b);
            }
            Opcode::Op2Rot => {
                self.require(6)?;
                let start = self.stack.len() - 6;
                let moved: Vec<StackItem> = self.stack.drain(start..start + 2).collect();
                self.stack.extend(moved);
            }
            Opcode::Op2Swap => {
                self.require(4)?;
                let len = self.stack.len();
                self.stack.swap(len - 4, len - 2);
                self.stack.swap(len - 3, len - 1);
            }
            Opcode::OpIfDup => {
                let top = self.peek(0)?.clone();
                if top.as_bool() {
                    self.push(top);
                }
            }
            Opcode::OpDepth => self.push_num(self.stack.len() as i64),
            Opcode::OpDrop => {
                self.pop()?;
            }
            Opcode::OpDup => {
                let top = self.peek(0)?.clone();
                self.push(top);
            }
            Opcode::OpNip => {
                self.require(2)?;
                let len = self.stack.len();
                self.stack.remove(len - 2);
            }
            Opcode::OpOver => {
                let item = self.peek(1)?.clone();
                self.push(item);
            }
            Opcode::OpPick | Opcode::OpRoll => {
                let n = self.pop_num()?;
                if n < 0 || n as usize >= self.stack.len() {
                    return Err(ScriptExecError::InvalidStackOperation);
                }
                let index = self.stack.len() - 1 - n as usize;
                let item = if opcode == Opcode::OpRoll {
                    self.stack.remove(index)
                } else {
                    self.stack[index].clone()
                };
                self.push(item);
            }
            Opcode::OpRot => {
                self.require(3)?;
                let len = self.stack.len();
                let item = self.stack.remove(len - 3);
                self.push(item);
            }
            Opcode::OpSwap => {
                self.require(2)?;
                let len = self.stack.len();
                self.stack.swap(len - 2, len - 1);
            }
            Opcode::OpTuck => {
                self.require(2)?;
                let top = self.peek(0)?.clone();
                let len = self.stack.len();
                self.stack.insert(len - 2, top);
            }
            Opcode::OpSize => {
                let size = self.peek(0)?.len() as i64;
                self.push_num(size);
            }

            Opcode::OpEqual | Opcode::OpEqualVerify => {
                let b = self.pop()?;
                let a = self.pop()?;
                if opcode == Opcode::OpEqualVerify {
                    if a != b {
                        return Err(ScriptExecError::EqualVerify);
                    }
                } else {
                    self.push_bool(a == b);
                }
            }

            Opcode::Op1Add
            | Opcode::Op1Sub
            | Opcode::OpNegate
            | Opcode::OpAbs
            | Opcode::OpNot
            | Opcode::Op0NotEqual => {
                let n = self.pop_num()?;
                let result = match opcode {
                    Opcode::Op1Add => n + 1,
                    Opcode::Op1Sub => n - 1,
                    Opcode::OpNegate => -n,
                    Opcode::OpAbs => n.abs(),
                    Opcode::OpNot => (n == 0) as i64,
                    _ => (n != 0) as i64,
                };
                self.push_num(result);
            }
            Opcode::OpAdd
            | Opcode::OpSub
            | Opcode::OpBoolAnd
            | Opcode::OpBoolOr
            | Opcode::OpNumEqual
            | Opcode::OpNumEqualVerify
            | Opcode::OpNumNotEqual
            | Opcode::OpLessThan
            | Opcode::OpGreaterThan
            | Opcode::OpLessThanOrEqual
            | Opcode::OpGreaterThanOrEqual
            | Opcode::OpMin
            | Opcode::OpMax => {
                let b = self.pop_num()?;
                let a = self.pop_num()?;
                let result = match opcode {
                    Opcode::OpAdd => a + b,
                    Opcode::OpSub => a - b,
                    Opcode::OpBoolAnd => (a != 0 && b != 0) as i64,
                    Opcode::OpBoolOr => (a != 0 || b != 0) as i64,
                    Opcode::OpNumEqual | Opcode::OpNumEqualVerify => (a == b) as i64,
                    Opcode::OpNumNotEqual => (a != b) as i64,
                    Opcode::OpLessThan => (a < b) as i64,
                    Opcode::OpGreaterThan => (a > b) as i64,
                    Opcode::OpLessThanOrEqual => (a <= b) as i64,
                    Opcode::OpGreaterThanOrEqual => (a >= b) as i64,
                    Opcode::OpMin => a.min(b),
                    _ => a.max(b),
                };
                if opcode == Opcode::OpNumEqualVerify {
                    if result == 0 {
                        return Err(ScriptExecError::NumEqualVerify);
                    }
                } else {
                    self.push_num(result);
                }
            }
            Opcode::OpWithin => {
                let max = self.pop_num()?;
                let min = self.pop_num()?;
                let x = self.pop_num()?;
                self.push_bool(min <= x && x < max);
            }

            Opcode::OpRipeMd160
            | Opcode::OpSha1
            | Opcode::OpSha256
            | Opcode::OpHash160
            | Opcode::OpHash256 => {
                let data = self.pop()?;
                let data = data.as_bytes();
                let digest = match opcode {
                    Opcode::OpRipeMd160 => ripemd160::Hash::hash(data).to_byte_array().to_vec(),
                    Opcode::OpSha1 => sha1::Hash::hash(data).to_byte_array().to_vec(),
                    Opcode::OpSha256 => sha256::Hash::hash(data).to_byte_array().to_vec(),
                    Opcode::OpHash160 => hash160::Hash::hash(data).to_byte_array().to_vec(),
                    _ => sha256d::Hash::hash(data).to_byte_array().to_vec(),
                };
                self.push(StackItem(digest));
            }
            Opcode::OpCodeSeparator => self.codesep_pos = Some(pc as u32),

            Opcode::OpCheckSig | Opcode::OpCheckSigVerify => {
                let pubkey = self.pop()?;
                let sig = self.pop()?;
                let ok = self.check_sig(&sig, &pubkey)?;
                if opcode == Opcode::OpCheckSigVerify {
                    if !ok {
                        return Err(ScriptExecError::CheckSigVerify);
                    }
                } else {
                    self.push_bool(ok);
                }
            }
            Opcode::OpCheckSigAdd => {
                let pubkey = self.pop()?;
                let n = self.pop_num()?;
                let sig = self.pop()?;
                let ok = self.check_sig(&sig, &pubkey)?;
                self.push_num(n + ok as i64);
            }

            _ => return Err(ScriptExecError::BadOpcode),
        }

        self.check_size()
    }

    fn check_size(&self) -> Result<(), ScriptExecError> {
        if self.stack.len() + self.altstack.len() > MAX_STACK_SIZE {
            return Err(ScriptExecError::StackSize);
        }
        Ok(())
    }

    fn check_sig(&mut self, sig: &StackItem, pubkey: &StackItem) -> Result<bool, ScriptExecError> {
        if pubkey.is_empty() {
            return Err(ScriptExecError::TapscriptEmptyPubkey);
        }
        let codesep_pos = self.codesep_pos;
        self.sigs
            .verify(sig.as_bytes(), pubkey.as_bytes(), codesep_pos)
    }

    fn check_locktime(&self) -> Result<(), ScriptExecError> {
        let locktime = num(self.peek(0)?, 5)?;
        if locktime < 0 {
            return Err(ScriptExecError::NegativeLocktime);
        }
        let tx_locktime = self.sigs.spend.tx.lock_time.to_consensus_u32() as i64;
        let same_kind = (locktime < LOCKTIME_THRESHOLD) == (tx_locktime < LOCKTIME_THRESHOLD);
        if !same_kind
            || locktime > tx_locktime
            || self.sigs.spend.input().sequence.0 == SEQUENCE_FINAL
        {
            return Err(ScriptExecError::UnsatisfiedLocktime);
        }
        Ok(())
    }

    fn check_sequence(&self) -> Result<(), ScriptExecError> {
        let sequence = num(self.peek(0)?, 5)?;
        if sequence < 0 {
            return Err(ScriptExecError::NegativeLocktime);
        }
        if sequence & SEQUENCE_DISABLE_FLAG != 0 {
            return Ok(());
        }
        let tx = &self.sigs.spend.tx;
        let tx_sequence = self.sigs.spend.input().sequence.0 as i64;
        if tx.version.0 < 2 || tx_sequence & SEQUENCE_DISABLE_FLAG != 0 {
            return Err(ScriptExecError::UnsatisfiedLocktime);
        }
        let mask = SEQUENCE_TYPE_FLAG | SEQUENCE_MASK;
        let (wanted, have) = (sequence & mask, tx_sequence & mask);
        let same_kind = (wanted & SEQUENCE_TYPE_FLAG) == (have & SEQUENCE_TYPE_FLAG);
        if !same_kind || wanted > have {
            return Err(ScriptExecError::UnsatisfiedLocktime);
        }
        Ok(())
    }
}

fn num(item: &StackItem, max_len: usize) -> Result<i64, ScriptExecError> {
    if !item.is_minimal_num() {
        return Err(ScriptExecError::MinimalData);
    }
    item.as_script_num(max_len)
        .ok_or(ScriptExecError::NumOverflow)
}

/// Whether `data` was pushed with the smallest possible encoding.
fn is_minimal_push(opcode: Opcode, data: &[u8]) -> bool {
    match data {
        [] => opcode == Opcode::Op0,
        [n @ 1..=16] => opcode == Opcode::OpNum(*n),
        [0x81] => opcode == Opcode::Op1Negate,
        _ if data.len() <= 75 => opcode == Opcode::PushBytes(data.len() as u8),
        _ if data.len() <= 255 => opcode == Opcode::PushData1,
        _ if data.len() <= 65535 => opcode == Opcode::PushData2,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spend::TapscriptSpend;
    use bitcoin::ScriptBuf;

    fn run(script: &[u8], stack: &[&[u8]]) -> (Result<(), InterpreterError>, Vec<(usize, usize)>) {
        let leaf = ScriptBuf::from_bytes(script.to_vec());
        let spend = TapscriptSpend::build(&[leaf], 0, 0, None, &[]).unwrap();
        let mut witness: Vec<Vec<u8>> = stack.iter().map(|s| s.to_vec()).collect();
        witness.extend(spend.trailer.iter().cloned());

        let engine = TapscriptInterpreter::new()
            .setup(&spend.context, &witness)
            .unwrap();
        let mut seen = Vec::new();
        let result = engine.execute(&mut |info: &StepInfo<'_>| {
            seen.push((info.script_index, info.pc));
            StepControl::Continue
        });
        (result, seen)
    }

    fn script_error(result: Result<(), InterpreterError>) -> Option<ScriptExecError> {
        result.err().and_then(|e| e.script_error())
    }

    #[test]
    fn test_true_script_succeeds() {
        let (result, seen) = run(&[0x51], &[]);
        assert_eq!(result, Ok(()));
        // Program: two pushes plus the end boundary; leaf: one opcode plus end.
        assert_eq!(seen, vec![(0, 0), (1, 0), (1, 1), (1, 2), (2, 0), (2, 1)]);
    }

    #[test]
    fn test_drop_witness_elements() {
        // OP_DROP OP_DROP OP_TRUE with two empty witness elements
        let (result, _) = run(&[0x75, 0x75, 0x51], &[&[], &[]]);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_clean_stack() {
        let (result, _) = run(&[0x51, 0x51], &[]);
        assert_eq!(script_error(result), Some(ScriptExecError::CleanStack));
        let (result, _) = run(&[0x00], &[]);
        assert_eq!(script_error(result), Some(ScriptExecError::EvalFalse));
    }

    #[test]
    fn test_hash_lock() {
        let preimage = b"tapstep";
        let digest = sha256::Hash::hash(preimage).to_byte_array();
        let mut script = vec![0xa8, 0x20];
        script.extend_from_slice(&digest);
        script.push(0x87);
        let (result, _) = run(&script, &[preimage]);
        assert_eq!(result, Ok(()));
        let (result, _) = run(&script, &[b"wrong"]);
        assert_eq!(script_error(result), Some(ScriptExecError::EvalFalse));
    }

    #[test]
    fn test_equalverify_failure_position() {
        // OP_1 OP_2 OP_EQUALVERIFY OP_1
        let (result, _) = run(&[0x51, 0x52, 0x88, 0x51], &[]);
        assert_eq!(
            result,
            Err(InterpreterError::Script {
                error: ScriptExecError::EqualVerify,
                phase: ScriptPhase::WitnessScript,
                pc: 2,
            })
        );
    }

    #[test]
    fn test_conditionals() {
        // IF 2 ELSE 3 ENDIF 3 EQUAL
        let script = [0x63, 0x52, 0x67, 0x53, 0x68, 0x53, 0x87];
        assert_eq!(run(&script, &[&[]]).0, Ok(()));
        assert_eq!(
            script_error(run(&script, &[&[1]]).0),
            Some(ScriptExecError::EvalFalse)
        );
        assert_eq!(
            script_error(run(&script, &[&[2]]).0),
            Some(ScriptExecError::TapscriptMinimalIf)
        );
        assert_eq!(
            script_error(run(&[0x51, 0x63, 0x51], &[]).0),
            Some(ScriptExecError::UnbalancedConditional)
        );
    }

    #[test]
    fn test_arithmetic_and_altstack() {
        // 2 3 ADD TOALTSTACK FROMALTSTACK 5 NUMEQUAL
        let script = [0x52, 0x53, 0x93, 0x6b, 0x6c, 0x55, 0x9c];
        assert_eq!(run(&script, &[]).0, Ok(()));
        assert_eq!(
            script_error(run(&[0x6c], &[]).0),
            Some(ScriptExecError::InvalidAltstackOperation)
        );
        assert_eq!(
            script_error(run(&[0x75], &[]).0),
            Some(ScriptExecError::InvalidStackOperation)
        );
    }

    #[test]
    fn test_non_minimal_push_rejected() {
        // OP_DATA_1 0x05 instead of OP_5
        assert_eq!(
            script_error(run(&[0x01, 0x05], &[]).0),
            Some(ScriptExecError::MinimalData)
        );
    }

    #[test]
    fn test_op_success_discouraged() {
        // OP_CAT is OP_SUCCESS126 in tapscript
        assert_eq!(
            script_error(run(&[0x7e], &[]).0),
            Some(ScriptExecError::DiscourageOpSuccess)
        );
        assert_eq!(
            script_error(run(&[0xae], &[]).0),
            Some(ScriptExecError::TapscriptCheckMultiSig)
        );
    }

    #[test]
    fn test_abort_stops_engine() {
        let leaf = ScriptBuf::from_bytes(vec![0x51]);
        let spend = TapscriptSpend::build(&[leaf], 0, 0, None, &[]).unwrap();
        let engine = TapscriptInterpreter::new()
            .setup(&spend.context, &spend.trailer)
            .unwrap();
        let mut calls = 0;
        let result = engine.execute(&mut |_: &StepInfo<'_>| {
            calls += 1;
            if calls == 2 {
                StepControl::Abort
            } else {
                StepControl::Continue
            }
        });
        assert_eq!(result, Err(InterpreterError::Aborted));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_wrong_leaf_fails_commitment() {
        let spend =
            TapscriptSpend::build(&[ScriptBuf::from_bytes(vec![0x51])], 0, 0, None, &[]).unwrap();
        let witness = vec![vec![0x52], spend.trailer[1].clone()];
        let engine = TapscriptInterpreter::new()
            .setup(&spend.context, &witness)
            .unwrap();
        let result = engine.execute(&mut |_: &StepInfo<'_>| StepControl::Continue);
        assert_eq!(
            script_error(result),
            Some(ScriptExecError::WitnessProgramMismatch)
        );
    }

    #[test]
    fn test_empty_witness() {
        let spend =
            TapscriptSpend::build(&[ScriptBuf::from_bytes(vec![0x51])], 0, 0, None, &[]).unwrap();
        let engine = TapscriptInterpreter::new().setup(&spend.context, &[]).unwrap();
        let result = engine.execute(&mut |_: &StepInfo<'_>| StepControl::Continue);
        assert_eq!(
            script_error(result),
            Some(ScriptExecError::WitnessProgramWitnessEmpty)
        );
    }

    #[test]
    fn test_minimal_push_rules() {
        assert!(is_minimal_push(Opcode::Op0, &[]));
        assert!(is_minimal_push(Opcode::OpNum(5), &[5]));
        assert!(!is_minimal_push(Opcode::PushBytes(1), &[5]));
        assert!(is_minimal_push(Opcode::PushBytes(1), &[0x11]));
        assert!(!is_minimal_push(Opcode::PushData1, &[0xaa; 10]));
        assert!(is_minimal_push(Opcode::PushData1, &[0xaa; 100]));
    }
}
