pub mod assembler;
pub mod interpreter;
pub mod merkle;
pub mod opcode;
pub mod render;
pub mod script_debug;
pub mod session;
pub mod signing;
pub mod spend;
pub mod stack;
pub mod tapscript;

pub use assembler::{
    compile_script, compile_witness, disassemble, read_source, CompiledScript, ParseError,
    ParseErrorKind, Position, WitnessProducer,
};
pub use interpreter::{
    Engine, Interpreter, InterpreterError, ScriptExecError, ScriptPhase, StepControl, StepInfo,
};
pub use merkle::{MerkleError, MerkleTree};
pub use opcode::{decode_script, Opcode, ScriptInstruction};
pub use render::{ConfigError, RenderConfig, Renderer, Tags};
pub use script_debug::{
    ControllerState, ExecutionPlan, Outcome, SessionError, StepController, StepSnapshot,
};
pub use session::{run_session, ByteKeys, KeyEvent, KeySource, SessionOptions, SessionResult};
pub use signing::{KeyTable, SchnorrSigner, Signer, SigningContext, SigningError};
pub use spend::{CommitmentTweak, SpendContext, SpendError, TapscriptSpend, TxOutput};
pub use stack::{decode_script_num, encode_script_num, ScriptNumError, StackItem};
pub use tapscript::TapscriptInterpreter;
