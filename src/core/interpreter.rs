//! The stack-machine boundary.
//!
//! The controller drives any [`Interpreter`]: it hands over a spend context
//! and a witness, gets back an [`Engine`], and runs it on a worker thread. The
//! engine reports the machine state before every opcode through a callback,
//! which may pause the thread or return [`StepControl::Abort`] to stop early.

use std::fmt;

use crate::core::spend::SpendContext;
use crate::core::stack::StackItem;

/// Which sub-script of the spend an engine is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptPhase {
    /// The input's scriptSig. Empty for witness spends.
    ScriptSig,
    /// The prevout scriptPubKey (the witness program).
    ScriptPubKey,
    /// The tapscript leaf revealed by the witness.
    WitnessScript,
    Other(usize),
}

impl ScriptPhase {
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => ScriptPhase::ScriptSig,
            1 => ScriptPhase::ScriptPubKey,
            2 => ScriptPhase::WitnessScript,
            n => ScriptPhase::Other(n),
        }
    }

    pub fn index(&self) -> usize {
        match self {
            ScriptPhase::ScriptSig => 0,
            ScriptPhase::ScriptPubKey => 1,
            ScriptPhase::WitnessScript => 2,
            ScriptPhase::Other(n) => *n,
        }
    }
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptPhase::ScriptSig => f.write_str("scriptSig"),
            ScriptPhase::ScriptPubKey => f.write_str("scriptPubKey"),
            ScriptPhase::WitnessScript => f.write_str("witness script"),
            ScriptPhase::Other(n) => write!(f, "script #{}", n),
        }
    }
}

/// Machine state at one opcode boundary, borrowed from the engine.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo<'a> {
    pub script_index: usize,
    /// Index of the next instruction in `script`.
    pub pc: usize,
    pub script: &'a [u8],
    /// Bottom to top.
    pub stack: &'a [StackItem],
    pub altstack: &'a [StackItem],
}

impl StepInfo<'_> {
    pub fn phase(&self) -> ScriptPhase {
        ScriptPhase::from_index(self.script_index)
    }
}

/// Returned by the step callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    Abort,
}

/// Why a script failed, following the consensus script-error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScriptExecError {
    #[error("false stack entry at end of script execution")]
    EvalFalse,
    #[error("script returned early")]
    OpReturn,
    #[error("element exceeds the 520-byte push limit")]
    PushSize,
    #[error("combined stack size exceeds 1000 elements")]
    StackSize,
    #[error("OP_VERIFY failed")]
    Verify,
    #[error("OP_EQUALVERIFY failed")]
    EqualVerify,
    #[error("OP_CHECKSIGVERIFY failed")]
    CheckSigVerify,
    #[error("OP_NUMEQUALVERIFY failed")]
    NumEqualVerify,
    #[error("attempt to execute an invalid or truncated opcode")]
    BadOpcode,
    #[error("not enough items on the stack")]
    InvalidStackOperation,
    #[error("not enough items on the alt stack")]
    InvalidAltstackOperation,
    #[error("conditional without matching OP_IF/OP_ENDIF")]
    UnbalancedConditional,
    #[error("negative lock time")]
    NegativeLocktime,
    #[error("lock time requirement not met")]
    UnsatisfiedLocktime,
    #[error("data push or number not minimally encoded")]
    MinimalData,
    #[error("stack must hold exactly one element after execution")]
    CleanStack,
    #[error("upgradable NOP executed")]
    DiscourageUpgradableNops,
    #[error("unknown taproot leaf version")]
    DiscourageUpgradableTaprootVersion,
    #[error("OP_SUCCESSx present in tapscript")]
    DiscourageOpSuccess,
    #[error("unknown public key type")]
    DiscourageUpgradablePubkeyType,
    #[error("witness program spent with an empty witness")]
    WitnessProgramWitnessEmpty,
    #[error("witness program does not commit to the revealed script")]
    WitnessProgramMismatch,
    #[error("native witness spend with a non-empty scriptSig")]
    WitnessMalleated,
    #[error("schnorr signature is not 64 or 65 bytes")]
    SchnorrSigSize,
    #[error("unknown sighash type on schnorr signature")]
    SchnorrSigHashType,
    #[error("schnorr signature verification failed")]
    SchnorrSig,
    #[error("control block has an invalid length")]
    TaprootWrongControlSize,
    #[error("signature operations exceed the validation weight budget")]
    TapscriptValidationWeight,
    #[error("OP_CHECKMULTISIG is disabled in tapscript")]
    TapscriptCheckMultiSig,
    #[error("OP_IF argument must be empty or 0x01")]
    TapscriptMinimalIf,
    #[error("zero-length public key")]
    TapscriptEmptyPubkey,
    #[error("number operand longer than 4 bytes")]
    NumOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpreterError {
    /// The step callback asked the engine to stop. Not a script failure.
    #[error("execution aborted")]
    Aborted,
    #[error("interpreter setup: {0}")]
    Setup(String),
    #[error("{phase} failed at opcode {pc}: {error}")]
    Script {
        error: ScriptExecError,
        phase: ScriptPhase,
        pc: usize,
    },
}

impl InterpreterError {
    pub fn script_error(&self) -> Option<ScriptExecError> {
        match self {
            InterpreterError::Script { error, .. } => Some(*error),
            _ => None,
        }
    }
}

/// A forward-only engine prepared for one spend.
pub trait Engine: Send + 'static {
    /// Run to completion, calling `on_step` before every opcode and once
    /// after the last opcode of each sub-script.
    ///
    /// Returns `Ok(())` only if the spend is valid.
    fn execute(
        self,
        on_step: &mut dyn FnMut(&StepInfo<'_>) -> StepControl,
    ) -> Result<(), InterpreterError>;
}

/// Builds engines. Shared by every session a controller starts.
pub trait Interpreter: Send + Sync + 'static {
    type Engine: Engine;

    /// Prepare an engine for `spend` with `witness` as the input's witness.
    fn setup(
        &self,
        spend: &SpendContext,
        witness: &[Vec<u8>],
    ) -> Result<Self::Engine, InterpreterError>;
}
