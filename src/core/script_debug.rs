//! Stepwise, rewindable script execution.
//!
//! This module provides:
//!
//! - [`StepSnapshot`]: the machine state at one visible step boundary.
//! - [`StepController`]: drives an [`Interpreter`] on a background worker
//!   thread one visible step at a time, and moves backwards by restarting
//!   the worker and replaying up to the requested step.
//!
//! # Worker protocol
//!
//! Each [`ExecutionSession`] owns exactly one worker thread and two channels.
//! The worker runs the engine; at the requested step boundary it sends a
//! snapshot over the result channel and blocks on the permission channel
//! until the controller sends [`Permit::Continue`] (or [`Permit::Abort`], or
//! drops the channel). When the engine returns, the worker sends its result
//! and exits. A session that is replaced or cancelled is dropped without
//! joining its thread.
//!
//! # Visibility
//!
//! Not every engine boundary is a visible step. The scriptSig is never
//! shown. The scriptPubKey is shown once, on entry, together with the full
//! witness; its remaining boundaries are suppressed. Every witness-script
//! boundary is shown, and the first one after entering it carries the
//! "witness program verified" marker.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread;

use crate::core::assembler::WitnessProducer;
use crate::core::interpreter::{
    Engine, Interpreter, InterpreterError, ScriptPhase, StepControl, StepInfo,
};
use crate::core::opcode::{decode_script, ScriptInstruction};
use crate::core::signing::{SchnorrSigner, Signer, SigningContext, SigningError};
use crate::core::spend::{SpendContext, TapscriptSpend};
use crate::core::stack::StackItem;

// ─── StepSnapshot ───────────────────────────────────────────────────────────

/// Machine state at one visible step boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSnapshot {
    /// Visible step number, starting at 1.
    pub step: usize,
    pub phase: ScriptPhase,
    /// Index of the next instruction in `script`; equal to the instruction
    /// count once the sub-script has finished.
    pub pc: usize,
    /// Raw bytes of the active sub-script.
    pub script: Vec<u8>,
    /// Bottom to top.
    pub stack: Vec<StackItem>,
    pub altstack: Vec<StackItem>,
    /// The full witness, set only on the scriptPubKey step.
    pub witness: Option<Vec<Vec<u8>>>,
    /// First step of the witness script: the witness program checked out.
    pub verified_marker: bool,
}

impl StepSnapshot {
    /// The instruction about to execute, or `None` at the end of the script.
    pub fn instruction(&self) -> Option<ScriptInstruction> {
        decode_script(&self.script).into_iter().nth(self.pc)
    }
}

/// Result of moving the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Paused at a step boundary.
    Step(StepSnapshot),
    /// The script ran to completion and the spend is valid.
    Done,
    Failed(InterpreterError),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    NotStarted,
    Paused { step: usize },
    Done,
    Failed(InterpreterError),
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("spawning worker thread: {0}")]
    Spawn(std::io::Error),
    #[error("terminal i/o: {0}")]
    Io(#[from] std::io::Error),
}

// ─── ExecutionPlan ──────────────────────────────────────────────────────────

/// What a controller executes: the spend, the witness producers, and the
/// fixed elements appended after them.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub spend: SpendContext,
    pub producers: Vec<WitnessProducer>,
    /// Appended verbatim after the produced witness, e.g. `[leaf, control]`.
    pub trailer: Vec<Vec<u8>>,
}

impl ExecutionPlan {
    /// Execute a generated tapscript spend with the given witness.
    pub fn tapscript(spend: TapscriptSpend, producers: Vec<WitnessProducer>) -> Self {
        ExecutionPlan {
            spend: spend.context,
            producers,
            trailer: spend.trailer,
        }
    }

    /// Execute an existing input with the witness it already carries.
    pub fn existing(spend: SpendContext) -> Self {
        let producers = spend
            .input_witness()
            .into_iter()
            .map(WitnessProducer::Literal)
            .collect();
        ExecutionPlan {
            spend,
            producers,
            trailer: vec![],
        }
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

/// Foreground to worker: may the engine go past this boundary?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Continue,
    Abort,
}

#[derive(Debug)]
enum WorkerEvent {
    Step(StepSnapshot),
    Finished(Result<(), InterpreterError>),
}

/// Maps engine boundaries to visible steps.
struct Visibility {
    current: Option<usize>,
    counter: usize,
    witness: Vec<Vec<u8>>,
}

struct Visible {
    step: usize,
    witness: Option<Vec<Vec<u8>>>,
    verified_marker: bool,
}

impl Visibility {
    fn new(witness: Vec<Vec<u8>>) -> Self {
        Visibility {
            current: None,
            counter: 0,
            witness,
        }
    }

    fn observe(&mut self, info: &StepInfo<'_>) -> Option<Visible> {
        let entering = self.current != Some(info.script_index);
        let mut visible = Visible {
            step: 0,
            witness: None,
            verified_marker: false,
        };
        match info.phase() {
            ScriptPhase::ScriptSig => {
                self.current = Some(info.script_index);
                return None;
            }
            ScriptPhase::ScriptPubKey => {
                if !entering {
                    return None;
                }
                visible.witness = Some(self.witness.clone());
            }
            ScriptPhase::WitnessScript => visible.verified_marker = entering,
            ScriptPhase::Other(_) => {}
        }
        self.counter += 1;
        self.current = Some(info.script_index);
        visible.step = self.counter;
        Some(visible)
    }
}

/// One running worker and its channel ends.
pub struct ExecutionSession {
    target: usize,
    permits: SyncSender<Permit>,
    events: Receiver<WorkerEvent>,
    /// The worker is blocked waiting for a permit.
    parked: bool,
    abort_requested: bool,
}

impl ExecutionSession {
    fn spawn<E: Engine>(
        engine: E,
        witness: Vec<Vec<u8>>,
        target: usize,
    ) -> Result<Self, SessionError> {
        let (permits, permit_rx) = sync_channel::<Permit>(1);
        let (event_tx, events) = sync_channel::<WorkerEvent>(1);

        thread::Builder::new()
            .name("tapstep-worker".to_string())
            .spawn(move || {
                log::trace!("worker started, target step {}", target);
                let mut visibility = Visibility::new(witness);
                let mut on_step = |info: &StepInfo<'_>| {
                    let Some(visible) = visibility.observe(info) else {
                        return StepControl::Continue;
                    };
                    if visible.step < target {
                        return StepControl::Continue;
                    }
                    let snapshot = StepSnapshot {
                        step: visible.step,
                        phase: info.phase(),
                        pc: info.pc,
                        script: info.script.to_vec(),
                        stack: info.stack.to_vec(),
                        altstack: info.altstack.to_vec(),
                        witness: visible.witness,
                        verified_marker: visible.verified_marker,
                    };
                    if event_tx.send(WorkerEvent::Step(snapshot)).is_err() {
                        return StepControl::Abort;
                    }
                    match permit_rx.recv() {
                        Ok(Permit::Continue) => StepControl::Continue,
                        Ok(Permit::Abort) | Err(_) => StepControl::Abort,
                    }
                };
                let result = engine.execute(&mut on_step);
                log::trace!("worker finished: {:?}", result);
                // The controller may already be gone.
                let _ = event_tx.send(WorkerEvent::Finished(result));
            })
            .map_err(SessionError::Spawn)?;

        Ok(ExecutionSession {
            target,
            permits,
            events,
            parked: false,
            abort_requested: false,
        })
    }

    /// Release a parked worker.
    fn permit(&mut self, permit: Permit) {
        if !self.parked {
            return;
        }
        self.parked = false;
        self.abort_requested |= permit == Permit::Abort;
        match self.permits.try_send(permit) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::warn!("worker already holds a permit"),
            Err(TrySendError::Disconnected(_)) => log::debug!("worker already exited"),
        }
    }

    fn receive(&mut self) -> Outcome {
        match self.events.recv() {
            Ok(WorkerEvent::Step(snapshot)) => {
                self.parked = true;
                Outcome::Step(snapshot)
            }
            Ok(WorkerEvent::Finished(Ok(()))) => Outcome::Done,
            // Stopped because we asked it to: the pipeline drained, nothing failed.
            Ok(WorkerEvent::Finished(Err(InterpreterError::Aborted))) if self.abort_requested => {
                Outcome::Cancelled
            }
            Ok(WorkerEvent::Finished(Err(err))) => Outcome::Failed(err),
            Err(_) => Outcome::Failed(InterpreterError::Setup(
                "worker exited without a result".to_string(),
            )),
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        self.permit(Permit::Abort);
    }
}

// ─── StepController ─────────────────────────────────────────────────────────

/// Cursor over the visible steps of one spend.
///
/// Forward moves release the running worker; backward moves discard it and
/// start a fresh one that silently replays to the requested step. Witness
/// producers are resolved at the start of every session through the same
/// [`SigningContext`], so generated keys survive a rewind.
pub struct StepController<I: Interpreter, S: Signer = SchnorrSigner> {
    interpreter: I,
    signing: SigningContext<S>,
    plan: ExecutionPlan,
    session: Option<ExecutionSession>,
    state: ControllerState,
    current: Option<StepSnapshot>,
}

impl<I: Interpreter, S: Signer> StepController<I, S> {
    pub fn new(interpreter: I, signing: SigningContext<S>, plan: ExecutionPlan) -> Self {
        StepController {
            interpreter,
            signing,
            plan,
            session: None,
            state: ControllerState::NotStarted,
            current: None,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// The last snapshot handed out, if any.
    pub fn current(&self) -> Option<&StepSnapshot> {
        self.current.as_ref()
    }

    /// Step number of the last snapshot, 0 before the first.
    pub fn current_step(&self) -> usize {
        self.current.as_ref().map_or(0, |s| s.step)
    }

    pub fn signing(&self) -> &SigningContext<S> {
        &self.signing
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Resolve the witness the interpreter will see.
    pub fn witness(&mut self) -> Result<Vec<Vec<u8>>, SigningError> {
        let mut witness = self
            .signing
            .resolve(&self.plan.producers, Some(&self.plan.spend))?;
        witness.extend(self.plan.trailer.iter().cloned());
        Ok(witness)
    }

    /// Move to the next visible step.
    pub fn advance(&mut self) -> Result<Outcome, SessionError> {
        if let Some(outcome) = self.terminal_outcome() {
            return Ok(outcome);
        }
        match self.session.as_mut() {
            Some(session) => session.permit(Permit::Continue),
            None => {
                let witness = self.witness()?;
                if let Some(outcome) = self.start(1, witness)? {
                    return Ok(outcome);
                }
            }
        }
        Ok(self.receive())
    }

    /// Move to visible step `step` (clamped to at least 1).
    ///
    /// Moving backwards restarts execution from the beginning. Seeking past
    /// the last step ends in [`Outcome::Done`] or [`Outcome::Failed`].
    pub fn seek(&mut self, step: usize) -> Result<Outcome, SessionError> {
        let step = step.max(1);
        if self.state == ControllerState::Cancelled {
            return Ok(Outcome::Cancelled);
        }
        if let (ControllerState::Paused { step: at }, Some(snapshot)) = (&self.state, &self.current)
        {
            if *at == step {
                return Ok(Outcome::Step(snapshot.clone()));
            }
        }

        if step <= self.current_step() {
            log::debug!("rewinding from step {} to {}", self.current_step(), step);
            // A signing failure leaves the current session in place.
            let witness = self.witness()?;
            self.reset();
            if let Some(outcome) = self.start(step, witness)? {
                return Ok(outcome);
            }
            return Ok(self.receive());
        }

        loop {
            match self.advance()? {
                Outcome::Step(snapshot) if snapshot.step < step => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Stop issuing permits and abandon the worker.
    pub fn cancel(&mut self) -> Outcome {
        if self.session.take().is_some() {
            log::debug!("session cancelled at step {}", self.current_step());
        }
        self.state = ControllerState::Cancelled;
        Outcome::Cancelled
    }

    fn terminal_outcome(&self) -> Option<Outcome> {
        match &self.state {
            ControllerState::Done => Some(Outcome::Done),
            ControllerState::Failed(err) => Some(Outcome::Failed(err.clone())),
            ControllerState::Cancelled => Some(Outcome::Cancelled),
            ControllerState::NotStarted | ControllerState::Paused { .. } => None,
        }
    }

    fn reset(&mut self) {
        self.session = None;
        self.current = None;
        self.state = ControllerState::NotStarted;
    }

    /// Start a session that pauses at `target`. Setup failures are terminal
    /// and come back as an outcome.
    fn start(
        &mut self,
        target: usize,
        witness: Vec<Vec<u8>>,
    ) -> Result<Option<Outcome>, SessionError> {
        log::debug!(
            "starting session for input {}, target step {}",
            self.plan.spend.input_index,
            target
        );
        let engine = match self.interpreter.setup(&self.plan.spend, &witness) {
            Ok(engine) => engine,
            Err(err) => {
                log::warn!("interpreter setup failed: {}", err);
                self.state = ControllerState::Failed(err.clone());
                return Ok(Some(Outcome::Failed(err)));
            }
        };
        self.session = Some(ExecutionSession::spawn(engine, witness, target)?);
        Ok(None)
    }

    fn receive(&mut self) -> Outcome {
        let Some(session) = self.session.as_mut() else {
            return Outcome::Cancelled;
        };
        let outcome = session.receive();
        match &outcome {
            Outcome::Step(snapshot) => {
                self.state = ControllerState::Paused {
                    step: snapshot.step,
                };
                self.current = Some(snapshot.clone());
            }
            Outcome::Done => {
                self.session = None;
                self.state = ControllerState::Done;
            }
            Outcome::Failed(err) => {
                self.session = None;
                self.state = ControllerState::Failed(err.clone());
            }
            Outcome::Cancelled => {
                self.session = None;
                self.state = ControllerState::Cancelled;
            }
        }
        outcome
    }
}
