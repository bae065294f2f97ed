#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Once;

    use tapstep::{
        compile_script, compile_witness, disassemble, read_source, run_session, ByteKeys, Engine,
        ExecutionPlan, Interpreter, InterpreterError, KeyTable, Outcome, ParseErrorKind,
        RenderConfig, Renderer, SchnorrSigner, ScriptExecError, ScriptPhase, SessionOptions,
        SessionResult, Signer, SigningContext, SpendContext, StackItem, StepControl,
        StepController, StepInfo, StepSnapshot, TapscriptInterpreter, TapscriptSpend,
        WitnessProducer,
    };
    use tempdir::TempDir;

    static START: Once = Once::new();

    fn setup_logging() {
        START.call_once(|| {
            let _ = env_logger::Builder::from_default_env()
                .is_test(true)
                .try_init();
        });
    }

    fn plan(script: &str, witness: &str) -> ExecutionPlan {
        let leaf = compile_script(script).unwrap().to_script_buf();
        let spend = TapscriptSpend::build(&[leaf], 0, 0, None, &[]).unwrap();
        ExecutionPlan::tapscript(spend, compile_witness(witness).unwrap())
    }

    fn signing(table: &str) -> SigningContext {
        SigningContext::new(SchnorrSigner::new(), table.parse::<KeyTable>().unwrap())
    }

    fn run_to_end<I: Interpreter>(ctl: &mut StepController<I>) -> (Vec<StepSnapshot>, Outcome) {
        let mut steps = Vec::new();
        loop {
            match ctl.advance().unwrap() {
                Outcome::Step(snapshot) => steps.push(snapshot),
                outcome => return (steps, outcome),
            }
        }
    }

    fn expect_step(outcome: Outcome) -> StepSnapshot {
        match outcome {
            Outcome::Step(snapshot) => snapshot,
            other => panic!("expected a step, got {:?}", other),
        }
    }

    /// Public key hex of `id`, generating the key if the table leaves it
    /// empty.
    fn public_key(signing: &mut SigningContext, id: &str) -> String {
        let key = signing.key(id).unwrap().clone();
        signing.signer().public_key_hex(&key)
    }

    /// Reports every boundary of the output program and the leaf with an
    /// empty stack, then accepts the spend.
    #[derive(Clone)]
    struct NullInterpreter;

    struct NullEngine {
        leaf: Vec<u8>,
    }

    impl Interpreter for NullInterpreter {
        type Engine = NullEngine;

        fn setup(
            &self,
            _spend: &SpendContext,
            witness: &[Vec<u8>],
        ) -> Result<NullEngine, InterpreterError> {
            match witness {
                [.., leaf, _control] => Ok(NullEngine { leaf: leaf.clone() }),
                _ => Err(InterpreterError::Setup("no leaf in witness".to_string())),
            }
        }
    }

    impl Engine for NullEngine {
        fn execute(
            self,
            on_step: &mut dyn FnMut(&StepInfo<'_>) -> StepControl,
        ) -> Result<(), InterpreterError> {
            let program = [0x51u8];
            let scripts: [(usize, &[u8]); 2] = [(1, &program), (2, &self.leaf)];
            for (script_index, script) in scripts {
                for pc in 0..=tapstep::decode_script(script).len() {
                    let info = StepInfo {
                        script_index,
                        pc,
                        script,
                        stack: &[],
                        altstack: &[],
                    };
                    if on_step(&info) == StepControl::Abort {
                        return Err(InterpreterError::Aborted);
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_p2pkh_style_script_first_step() {
        setup_logging();
        let hash = "89abcdef".repeat(5);
        let script = format!("OP_DUP OP_HASH160 {} OP_EQUALVERIFY OP_CHECKSIG", hash);
        let mut ctl = StepController::new(
            TapscriptInterpreter::new(),
            signing("alice:"),
            plan(&script, "<sig:alice> 02aabb"),
        );

        let first = expect_step(ctl.advance().unwrap());
        assert_eq!(first.step, 1);
        assert!(first.stack.is_empty());
        assert!(first.altstack.is_empty());
        assert_eq!(ctl.signing().resolved_keys().count(), 1);

        let leaf = expect_step(ctl.advance().unwrap());
        assert_eq!(leaf.phase, ScriptPhase::WitnessScript);
        let tokens = disassemble(&leaf.script);
        assert_eq!(tokens.join(" "), script);

        let renderer = Renderer::new(RenderConfig {
            column_width: 60,
            ..RenderConfig::default()
        });
        let table = renderer.render(&leaf);
        for token in &tokens {
            assert!(table.contains(token.as_str()), "missing {}", token);
        }
        assert!(table.contains("> OP_DUP"));
    }

    #[test]
    fn test_empty_elements_end_to_end() {
        setup_logging();
        let script = compile_script("OP_TRUE OP_FALSE").unwrap();
        assert_eq!(script.as_bytes(), &[0x51, 0x00]);
        let producers = compile_witness("<> <>").unwrap();
        assert_eq!(producers, vec![WitnessProducer::Empty, WitnessProducer::Empty]);

        let mut ctl = StepController::new(
            NullInterpreter,
            signing(""),
            plan("OP_TRUE OP_FALSE", "<> <>"),
        );
        let (steps, outcome) = run_to_end(&mut ctl);
        assert_eq!(outcome, Outcome::Done);
        let witness = steps[0].witness.as_ref().unwrap();
        assert_eq!(&witness[..2], &[Vec::<u8>::new(), Vec::new()]);
        assert!(steps.last().unwrap().stack.is_empty());
        // Output program entry, then pc 0..=2 of the leaf.
        assert_eq!(steps.len(), 4);
    }

    #[test]
    fn test_empty_elements_reference_interpreter() {
        setup_logging();
        let mut ctl = StepController::new(
            TapscriptInterpreter::new(),
            signing(""),
            plan("OP_DROP OP_DROP OP_TRUE", "<> <>"),
        );
        let mut out = Vec::new();
        let result = run_session(
            &mut ctl,
            &Renderer::default(),
            &mut ByteKeys(std::io::empty()),
            &mut out,
            &SessionOptions::default(),
        )
        .unwrap();
        assert_eq!(result, SessionResult::Verified);
        assert!(String::from_utf8(out).unwrap().contains("witness program verified OK"));

        let mut ctl = StepController::new(
            TapscriptInterpreter::new(),
            signing(""),
            plan("OP_TRUE OP_FALSE", "<> <>"),
        );
        let (_, outcome) = run_to_end(&mut ctl);
        match outcome {
            Outcome::Failed(err) => assert_eq!(err.script_error(), Some(ScriptExecError::CleanStack)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_misspelled_opcode() {
        let err = compile_script("OP_DUP OP_CHEKCSIG").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownOpcode);
        assert_eq!(err.token, "OP_CHEKCSIG");
    }

    #[test]
    fn test_forward_and_seek_render_identically() {
        setup_logging();
        let table = format!("alice:{}", "01".repeat(32));
        let mut keys = signing(&table);
        let script = format!("{} OP_CHECKSIG", public_key(&mut keys, "alice"));
        let plan = plan(&script, "<sig:alice>");
        let renderer = Renderer::default();

        let mut ctl = StepController::new(TapscriptInterpreter::new(), keys, plan.clone());
        let (forward, outcome) = run_to_end(&mut ctl);
        assert_eq!(outcome, Outcome::Done);
        let forward: Vec<String> = forward.iter().map(|s| renderer.render(s)).collect();
        assert_eq!(forward.len(), 4);

        for k in (1..=forward.len()).rev() {
            let rewound = expect_step(ctl.seek(k).unwrap());
            assert_eq!(renderer.render(&rewound), forward[k - 1]);

            let mut fresh =
                StepController::new(TapscriptInterpreter::new(), signing(&table), plan.clone());
            let direct = expect_step(fresh.seek(k).unwrap());
            assert_eq!(renderer.render(&direct), forward[k - 1]);
        }
    }

    #[test]
    fn test_visible_steps_are_monotonic() {
        setup_logging();
        let script = "OP_DUP OP_TOALTSTACK OP_1ADD OP_FROMALTSTACK OP_ADD OP_3 OP_EQUAL";
        let mut ctl = StepController::new(
            TapscriptInterpreter::new(),
            signing(""),
            plan(script, "01"),
        );
        let (steps, outcome) = run_to_end(&mut ctl);
        assert_eq!(outcome, Outcome::Done);

        let instructions = compile_script(script).unwrap().disassemble().len();
        assert_eq!(steps.len(), instructions + 2);
        for (i, snapshot) in steps.iter().enumerate() {
            assert_eq!(snapshot.step, i + 1);
            assert_ne!(snapshot.phase, ScriptPhase::ScriptSig);
        }
        assert_eq!(steps[0].phase, ScriptPhase::ScriptPubKey);
        assert!(steps[1..].iter().all(|s| s.phase == ScriptPhase::WitnessScript));
        assert_eq!(steps.iter().filter(|s| s.witness.is_some()).count(), 1);

        // After OP_DUP OP_TOALTSTACK: one copy on each stack.
        assert_eq!(steps[3].stack, vec![StackItem(vec![0x01])]);
        assert_eq!(steps[3].altstack, vec![StackItem(vec![0x01])]);
    }

    #[test]
    fn test_generated_key_is_stable_across_rewind() {
        setup_logging();
        let mut ctl = StepController::new(
            TapscriptInterpreter::new(),
            signing("a:"),
            plan("OP_DROP OP_TRUE OP_TRUE OP_DROP", "<sig:a>"),
        );
        let first = expect_step(ctl.advance().unwrap());
        assert_eq!(expect_step(ctl.seek(3).unwrap()).step, 3);
        let key_before = ctl.signing().resolved_keys().next().map(|(_, k)| *k);

        let rewound = expect_step(ctl.seek(1).unwrap());
        assert_eq!(expect_step(ctl.seek(5).unwrap()).step, 5);
        let key_after = ctl.signing().resolved_keys().next().map(|(_, k)| *k);

        assert_eq!(ctl.signing().resolved_keys().count(), 1);
        assert_eq!(key_before, key_after);
        assert_eq!(first.witness, rewound.witness);
        assert_eq!(first.witness.as_ref().map(|w| w[0].len()), Some(64));
    }

    #[test]
    fn test_wrong_signer_fails() {
        setup_logging();
        let mut keys = signing("alice:,bob:");
        let script = format!("{} OP_CHECKSIG", public_key(&mut keys, "alice"));
        let mut ctl = StepController::new(
            TapscriptInterpreter::new(),
            keys,
            plan(&script, "<sig:bob>"),
        );
        let mut out = Vec::new();
        let options = SessionOptions {
            no_step: true,
            ..SessionOptions::default()
        };
        let result = run_session(&mut ctl, &Renderer::default(), &mut ByteKeys(std::io::empty()), &mut out, &options)
            .unwrap();
        match result {
            SessionResult::Failed(InterpreterError::Script { error, phase, pc }) => {
                assert_eq!(error, ScriptExecError::SchnorrSig);
                assert_eq!(phase, ScriptPhase::WitnessScript);
                assert_eq!(pc, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(out.is_empty());
    }

    #[test]
    fn test_hash_lock_failure_position() {
        setup_logging();
        let mut ctl = StepController::new(
            TapscriptInterpreter::new(),
            signing(""),
            plan("OP_SHA256 00112233 OP_EQUALVERIFY OP_TRUE", "aa"),
        );
        let (steps, outcome) = run_to_end(&mut ctl);
        match outcome {
            Outcome::Failed(err) => {
                assert_eq!(err.script_error(), Some(ScriptExecError::EqualVerify));
                assert_eq!(
                    err,
                    InterpreterError::Script {
                        error: ScriptExecError::EqualVerify,
                        phase: ScriptPhase::WitnessScript,
                        pc: 2,
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        // The last visible step is the failing OP_EQUALVERIFY.
        assert_eq!(steps.last().map(|s| s.pc), Some(2));
    }

    #[test]
    fn test_sources_from_files() {
        setup_logging();
        let dir = TempDir::new("tapstep_sources").unwrap();
        let script_path = dir.path().join("lock.tap");
        fs::write(
            &script_path,
            "# hash lock\nOP_SHA256\n  2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824 # sha256(hello)\nOP_EQUAL\n",
        )
        .unwrap();
        let witness_path = dir.path().join("unlock.wit");
        fs::write(&witness_path, "68656c6c6f # hello\n").unwrap();

        let script_text = read_source(script_path.to_str().unwrap());
        let witness_text = read_source(witness_path.to_str().unwrap());
        assert_eq!(
            compile_script(&script_text).unwrap(),
            compile_script(
                "OP_SHA256 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824 OP_EQUAL"
            )
            .unwrap()
        );

        let mut ctl = StepController::new(
            TapscriptInterpreter::new(),
            signing(""),
            plan(&script_text, &witness_text),
        );
        let (_, outcome) = run_to_end(&mut ctl);
        assert_eq!(outcome, Outcome::Done);
    }

    #[test]
    fn test_existing_transaction_plan() {
        setup_logging();
        let generated = plan("OP_DROP OP_TRUE", "aa");
        let mut witness = vec![vec![0xaa]];
        witness.extend(generated.trailer.iter().cloned());

        let mut tx = generated.spend.tx.clone();
        tx.input[0].witness = bitcoin::Witness::from_slice(&witness);
        let tx_hex = bitcoin::consensus::encode::serialize_hex(&tx);
        let prevout_hex = bitcoin::consensus::encode::serialize_hex(generated.spend.prevout());

        let spend = SpendContext::from_tx(&tx_hex, &[prevout_hex.as_str()], 0).unwrap();
        let existing = ExecutionPlan::existing(spend);
        assert_eq!(existing.producers.len(), 3);

        let mut ctl = StepController::new(TapscriptInterpreter::new(), signing(""), existing);
        let (steps, outcome) = run_to_end(&mut ctl);
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(steps[0].witness.as_ref(), Some(&witness));
    }
}
