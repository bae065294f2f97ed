use tapstep::{
    compile_script, compile_witness, ExecutionPlan, KeyTable, Outcome, Renderer, SchnorrSigner,
    SigningContext, StepController, StepSnapshot, TapscriptInterpreter, TapscriptSpend,
};

fn print_step(snapshot: &StepSnapshot) {
    println!("\nStep {} ({}, pc {}):", snapshot.step, snapshot.phase, snapshot.pc);
    match snapshot.instruction() {
        Some(instruction) => println!("  next: {}", instruction.opcode),
        None => println!("  next: <end of script>"),
    }
    println!("Main Stack ({} items, top last):", snapshot.stack.len());
    if snapshot.stack.is_empty() {
        println!("  <empty>");
    }
    for (i, item) in snapshot.stack.iter().enumerate() {
        println!("  {}: {}", i, item);
    }
    if !snapshot.altstack.is_empty() {
        println!("Alt Stack ({} items, top last):", snapshot.altstack.len());
        for (i, item) in snapshot.altstack.iter().enumerate() {
            println!("  {}: {}", i, item);
        }
    }
}

fn main() {
    env_logger::Builder::from_default_env().init();

    // A hash lock that also needs alice's signature. Alice's key is the
    // secret 1, so her public key is the generator point.
    let script = compile_script(
        "OP_SHA256 \
         b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9 \
         OP_EQUALVERIFY \
         OP_SIZE OP_TOALTSTACK \
         79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798 \
         OP_CHECKSIGVERIFY \
         OP_FROMALTSTACK 40 OP_EQUAL",
    )
    .expect("script compiles");
    let witness = compile_witness("<sig:alice> 68656c6c6f20776f726c64").expect("witness compiles");

    let spend = TapscriptSpend::build(&[script.to_script_buf()], 0, 0, None, &[])
        .expect("taproot spend");
    let table: KeyTable = format!("alice:{:064x}", 1)
        .parse()
        .expect("key table");
    let signing = SigningContext::new(SchnorrSigner::new(), table);
    let mut controller = StepController::new(
        TapscriptInterpreter::new(),
        signing,
        ExecutionPlan::tapscript(spend, witness),
    );

    loop {
        match controller.advance().expect("session") {
            Outcome::Step(snapshot) => print_step(&snapshot),
            Outcome::Done => {
                println!("\nscript execution verified");
                break;
            }
            Outcome::Failed(err) => {
                println!("\nscript execution failed: {}", err);
                break;
            }
            Outcome::Cancelled => break,
        }
    }

    // Rewinding restarts the interpreter and replays up to the step.
    if let Outcome::Step(snapshot) = controller.seek(3).expect("session") {
        println!("\nRewound to step {}:", snapshot.step);
        println!("{}", Renderer::default().render(&snapshot));
    }
}
