//! Interactive driver around a [`StepController`].
//!
//! Draws each visible step as a table, redrawing in place when interactive,
//! and moves the cursor according to key events from a [`KeySource`]: the
//! terminal itself ([`console::Term`]) or any byte stream of raw key codes.

use std::io::{self, Read, Write};

use console::{Key, Term};

use crate::core::interpreter::{Interpreter, InterpreterError};
use crate::core::render::Renderer;
use crate::core::script_debug::{Outcome, SessionError, StepController};
use crate::core::signing::Signer;

const ESC: u8 = 0x1b;
const CTRL_C: u8 = 0x03;

/// Moves to the start of the line, clears it, moves up and clears that line.
const CLEAR_LINE_UP: &str = "\u{1b}[0G\u{1b}[2K\u{1b}[1A\u{1b}[2K";
const CLEAR_PROMPT: &str = "\u{1b}[0G\u{1b}[2K";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Up,
    Down,
    Right,
    Left,
    CtrlC,
}

impl KeyEvent {
    /// Decode one terminal key: `ESC [ A..D` for the arrows, or `0x03`.
    pub fn decode(bytes: &[u8]) -> Option<KeyEvent> {
        match bytes {
            [CTRL_C] => Some(KeyEvent::CtrlC),
            [ESC, b'[', b'A'] => Some(KeyEvent::Up),
            [ESC, b'[', b'B'] => Some(KeyEvent::Down),
            [ESC, b'[', b'C'] => Some(KeyEvent::Right),
            [ESC, b'[', b'D'] => Some(KeyEvent::Left),
            _ => None,
        }
    }

    /// Map a key read by [`console::Term::read_key`].
    pub fn from_console(key: &Key) -> Option<KeyEvent> {
        match key {
            Key::ArrowUp => Some(KeyEvent::Up),
            Key::ArrowDown => Some(KeyEvent::Down),
            Key::ArrowRight => Some(KeyEvent::Right),
            Key::ArrowLeft => Some(KeyEvent::Left),
            Key::CtrlC | Key::Char('\u{3}') => Some(KeyEvent::CtrlC),
            _ => None,
        }
    }
}

/// Where the driver gets its key events. `Ok(None)` means no more input.
pub trait KeySource {
    fn next_key(&mut self) -> io::Result<Option<KeyEvent>>;
}

impl KeySource for Term {
    fn next_key(&mut self) -> io::Result<Option<KeyEvent>> {
        loop {
            let key = self.read_key()?;
            match KeyEvent::from_console(&key) {
                Some(event) => return Ok(Some(event)),
                None => log::trace!("ignoring key {:?}", key),
            }
        }
    }
}

/// Raw terminal key codes from a byte stream.
pub struct ByteKeys<R>(pub R);

impl<R: Read> KeySource for ByteKeys<R> {
    fn next_key(&mut self) -> io::Result<Option<KeyEvent>> {
        read_key(&mut self.0)
    }
}

/// Read the next key from `events`. `Ok(None)` means end of input;
/// unrecognized bytes are skipped.
pub fn read_key(events: &mut impl Read) -> io::Result<Option<KeyEvent>> {
    loop {
        let mut first = [0u8; 1];
        if !read_full(events, &mut first)? {
            return Ok(None);
        }
        let key = if first[0] == ESC {
            let mut rest = [0u8; 2];
            if !read_full(events, &mut rest)? {
                return Ok(None);
            }
            KeyEvent::decode(&[ESC, rest[0], rest[1]])
        } else {
            KeyEvent::decode(&first)
        };
        match key {
            Some(key) => return Ok(Some(key)),
            None => log::trace!("ignoring input byte {:#04x}", first[0]),
        }
    }
}

fn read_full(events: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match events.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Wait for key events between steps and redraw in place.
    pub interactive: bool,
    /// Run to the end without drawing any step.
    pub no_step: bool,
    /// Seek to this step before the first prompt.
    pub skip_ahead: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResult {
    Verified,
    Failed(InterpreterError),
    Cancelled,
}

/// Run `controller` to a terminal result, drawing each step to `out`.
///
/// Non-interactive sessions advance one step at a time until the script
/// ends. Interactive sessions read keys from `keys`: right moves forward,
/// left moves back (never before step 1), up and down are ignored, and
/// Ctrl-C or end of input cancels.
pub fn run_session<I: Interpreter, S: Signer>(
    controller: &mut StepController<I, S>,
    renderer: &Renderer,
    keys: &mut impl KeySource,
    mut out: impl Write,
    options: &SessionOptions,
) -> Result<SessionResult, SessionError> {
    let interactive = options.interactive && !options.no_step;
    let newline = if interactive { "\r\n" } else { "\n" };
    // Lines of the last table, cleared before the next one is drawn.
    let mut drawn = 0;

    let mut outcome = if options.skip_ahead > 1 {
        controller.seek(options.skip_ahead)?
    } else {
        controller.advance()?
    };

    loop {
        let snapshot = match outcome {
            Outcome::Step(snapshot) => snapshot,
            Outcome::Done => return finish(&mut out, interactive, SessionResult::Verified),
            Outcome::Failed(err) => {
                return finish(&mut out, interactive, SessionResult::Failed(err))
            }
            Outcome::Cancelled => return finish(&mut out, interactive, SessionResult::Cancelled),
        };

        if !options.no_step {
            let table = renderer.render(&snapshot);
            if interactive {
                out.write_all(CLEAR_LINE_UP.repeat(drawn).as_bytes())?;
            }
            for line in table.split('\n') {
                write!(out, "{}{}", line, newline)?;
            }
            drawn = table.split('\n').count();
        }

        if !interactive {
            outcome = controller.advance()?;
            continue;
        }

        if snapshot.step > 1 {
            write!(out, "Script execution: \u{2190} back | next \u{2192} ")?;
        } else {
            write!(out, "Script execution: next \u{2192} ")?;
        }
        out.flush()?;

        outcome = loop {
            match keys.next_key()? {
                Some(KeyEvent::Right) => break controller.advance()?,
                Some(KeyEvent::Left) => break controller.seek(snapshot.step.saturating_sub(1))?,
                Some(KeyEvent::Up) | Some(KeyEvent::Down) => continue,
                Some(KeyEvent::CtrlC) | None => {
                    log::debug!("session cancelled at step {}", snapshot.step);
                    break controller.cancel();
                }
            }
        };
    }
}

fn finish(
    out: &mut impl Write,
    interactive: bool,
    result: SessionResult,
) -> Result<SessionResult, SessionError> {
    if interactive {
        out.write_all(CLEAR_PROMPT.as_bytes())?;
    }
    out.flush()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assembler::WitnessProducer;
    use crate::core::interpreter::{ScriptExecError, ScriptPhase};
    use crate::core::render::RenderConfig;
    use crate::core::script_debug::tests::{boundaries, plan, ScriptedInterpreter};
    use crate::core::script_debug::ControllerState;
    use crate::core::signing::{KeyTable, SchnorrSigner, SigningContext};

    const RIGHT: &[u8] = b"\x1b[C";
    const LEFT: &[u8] = b"\x1b[D";
    const UP: &[u8] = b"\x1b[A";

    fn controller(result: Result<(), InterpreterError>) -> StepController<ScriptedInterpreter> {
        let interpreter = ScriptedInterpreter {
            boundaries: boundaries(),
            result,
        };
        let signing = SigningContext::new(SchnorrSigner::new(), KeyTable::new());
        StepController::new(interpreter, signing, plan(vec![WitnessProducer::Empty]))
    }

    fn run(
        ctl: &mut StepController<ScriptedInterpreter>,
        keys: &[&[u8]],
        options: SessionOptions,
    ) -> (SessionResult, String) {
        let events = keys.concat();
        let mut out = Vec::new();
        let renderer = Renderer::new(RenderConfig::default());
        let mut events = ByteKeys(events.as_slice());
        let result = run_session(ctl, &renderer, &mut events, &mut out, &options).unwrap();
        (result, String::from_utf8(out).unwrap())
    }

    fn interactive() -> SessionOptions {
        SessionOptions {
            interactive: true,
            ..SessionOptions::default()
        }
    }

    #[test]
    fn test_decode_keys() {
        assert_eq!(KeyEvent::decode(b"\x1b[A"), Some(KeyEvent::Up));
        assert_eq!(KeyEvent::decode(b"\x1b[B"), Some(KeyEvent::Down));
        assert_eq!(KeyEvent::decode(RIGHT), Some(KeyEvent::Right));
        assert_eq!(KeyEvent::decode(LEFT), Some(KeyEvent::Left));
        assert_eq!(KeyEvent::decode(&[3]), Some(KeyEvent::CtrlC));
        assert_eq!(KeyEvent::decode(b"q"), None);
        assert_eq!(KeyEvent::decode(b"\x1b[Z"), None);
    }

    #[test]
    fn test_console_keys() {
        assert_eq!(KeyEvent::from_console(&Key::ArrowRight), Some(KeyEvent::Right));
        assert_eq!(KeyEvent::from_console(&Key::ArrowLeft), Some(KeyEvent::Left));
        assert_eq!(KeyEvent::from_console(&Key::ArrowUp), Some(KeyEvent::Up));
        assert_eq!(KeyEvent::from_console(&Key::CtrlC), Some(KeyEvent::CtrlC));
        assert_eq!(KeyEvent::from_console(&Key::Char('\u{3}')), Some(KeyEvent::CtrlC));
        assert_eq!(KeyEvent::from_console(&Key::Enter), None);
        assert_eq!(KeyEvent::from_console(&Key::Char('q')), None);
    }

    #[test]
    fn test_read_key_skips_noise() {
        let mut input: &[u8] = b"xy\x1b[C\x03";
        assert_eq!(read_key(&mut input).unwrap(), Some(KeyEvent::Right));
        assert_eq!(read_key(&mut input).unwrap(), Some(KeyEvent::CtrlC));
        assert_eq!(read_key(&mut input).unwrap(), None);
    }

    #[test]
    fn test_non_interactive_runs_to_end() {
        let mut ctl = controller(Ok(()));
        let (result, out) = run(&mut ctl, &[], SessionOptions::default());
        assert_eq!(result, SessionResult::Verified);
        assert_eq!(out.matches("script").count(), 5);
        assert!(!out.contains("Script execution"));
        assert!(!out.contains('\u{1b}'));
    }

    #[test]
    fn test_no_step_draws_nothing() {
        let mut ctl = controller(Ok(()));
        let options = SessionOptions {
            no_step: true,
            interactive: true,
            ..SessionOptions::default()
        };
        let (result, out) = run(&mut ctl, &[], options);
        assert_eq!(result, SessionResult::Verified);
        assert!(out.is_empty());
    }

    #[test]
    fn test_interactive_back_and_forth() {
        let mut ctl = controller(Ok(()));
        let (result, out) = run(&mut ctl, &[RIGHT, LEFT, LEFT, &[3]], interactive());
        assert_eq!(result, SessionResult::Cancelled);
        assert_eq!(ctl.state(), &ControllerState::Cancelled);
        // Steps 1, 2, 1, 1: a left on step 1 stays there.
        assert_eq!(out.matches("Script execution: next").count(), 3);
        assert_eq!(out.matches("\u{2190} back").count(), 1);
        assert!(out.contains(CLEAR_LINE_UP));
        assert!(out.contains("\r\n"));
    }

    #[test]
    fn test_arrows_up_down_are_ignored() {
        let mut ctl = controller(Ok(()));
        let mut keys: Vec<&[u8]> = vec![UP];
        keys.extend([RIGHT; 5]);
        let (result, out) = run(&mut ctl, &keys, interactive());
        assert_eq!(result, SessionResult::Verified);
        assert_eq!(out.matches("script ").count(), 5);
        assert!(out.ends_with(CLEAR_PROMPT));
    }

    #[test]
    fn test_end_of_input_cancels() {
        let mut ctl = controller(Ok(()));
        let (result, _) = run(&mut ctl, &[RIGHT], interactive());
        assert_eq!(result, SessionResult::Cancelled);
        assert_eq!(ctl.current_step(), 2);
    }

    #[test]
    fn test_skip_ahead() {
        let mut ctl = controller(Ok(()));
        let options = SessionOptions {
            skip_ahead: 3,
            ..interactive()
        };
        let (_, out) = run(&mut ctl, &[], options);
        assert_eq!(ctl.current_step(), 3);
        assert_eq!(out.matches("script ").count(), 1);
    }

    #[test]
    fn test_failure_is_returned() {
        let err = InterpreterError::Script {
            error: ScriptExecError::EqualVerify,
            phase: ScriptPhase::WitnessScript,
            pc: 2,
        };
        let mut ctl = controller(Err(err.clone()));
        let (result, _) = run(&mut ctl, &[], SessionOptions::default());
        assert_eq!(result, SessionResult::Failed(err));
    }
}
