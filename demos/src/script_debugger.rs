use std::io::{self, IsTerminal};
use std::path::PathBuf;

use bitcoin::secp256k1::Keypair;
use bitcoin::Amount;
use clap::{ArgGroup, Parser, Subcommand};
use colored::Colorize;
use console::Term;

use tapstep::core::render::{DEFAULT_COLUMN_WIDTH, DEFAULT_MAX_ROWS};
use tapstep::core::spend::parse_xonly;
use tapstep::{
    compile_script, compile_witness, decode_script_num, encode_script_num, merkle, read_source,
    ByteKeys, CommitmentTweak, Error, ExecutionPlan, KeyTable, RenderConfig, Renderer,
    SchnorrSigner, SessionOptions, SessionResult, Signer, SigningContext, SpendContext,
    StepController, Tags, TapscriptInterpreter, TapscriptSpend, TxOutput,
};

// ─── CLI ────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tapstep", about = "Step-by-step, rewindable tapscript debugger")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a script and print its bytes as hex
    Parse {
        /// Script file, or the script itself
        #[arg(value_name = "FILE|TEXT")]
        script: String,
    },
    /// Execute a spend step by step
    Execute(ExecuteArgs),
    /// Print the SHA-256 commitment tree over a set of leaves, root first
    Merkle {
        /// Space separated leaves (power of two). Group values in one leaf
        /// with (val1,val2)
        #[arg(short, long)]
        leaves: String,
    },
    /// Generate key pairs, printed as 'privkey,xonly-pubkey'
    Keys {
        #[arg(short = 'n', long = "num", default_value_t = 1)]
        num: usize,
    },
    /// Tweak a key with sha256(taproot root || merkle root), then with the
    /// taproot root of the script
    Tweak {
        /// Internal key (x-only hex), random if not given
        #[arg(short, long, value_name = "HEX")]
        key: Option<String>,
        /// Leaf script: a file, or the script itself
        #[arg(long, value_name = "FILE|TEXT")]
        script: String,
        /// Merkle root to commit to: a file, or the root itself (hex)
        #[arg(long, value_name = "FILE|HEX")]
        merkle: String,
    },
    /// Convert an integer (decimal or 0x hex) to minimal script-number bytes
    Scriptnum {
        #[arg(required_unless_present = "from", allow_hyphen_values = true)]
        value: Option<String>,
        /// Decode script-number bytes (hex) back to an integer
        #[arg(long, value_name = "HEX", conflicts_with = "value")]
        from: Option<String>,
    },
}

#[derive(clap::Args)]
#[command(group(ArgGroup::new("source").required(true).args(["script", "scripts", "tx"])))]
struct ExecuteArgs {
    /// Leaf script to spend: a file, or the script itself
    #[arg(long, value_name = "FILE|TEXT")]
    script: Option<String>,

    /// Leaf scripts to assemble into a taproot tree
    #[arg(long, value_delimiter = ',', value_name = "FILE,...")]
    scripts: Vec<String>,

    /// Index of the leaf from --scripts to spend
    #[arg(long, default_value_t = 0, value_name = "N")]
    script_index: usize,

    /// Existing transaction to execute (hex)
    #[arg(long, value_name = "HEX")]
    tx: Option<String>,

    /// Serialized prevouts of --tx, in input order
    #[arg(long, value_delimiter = ',', value_name = "HEX,...")]
    prevouts: Vec<String>,

    /// Index of the input to execute
    #[arg(long, default_value_t = 0, value_name = "N")]
    input_index: usize,

    /// Witness stack: a file, or the witness itself
    #[arg(long, default_value = "", value_name = "FILE|TEXT")]
    witness: String,

    /// Private keys as 'id1:<hex>,id2:<hex>'; an empty <hex> generates a key
    #[arg(long, default_value = "", value_name = "KEYS")]
    privkeys: String,

    /// Internal key of the spent output (x-only hex)
    #[arg(long, value_name = "HEX", conflicts_with = "tx")]
    inputkey: Option<String>,

    /// Pay 1 BTC to this output key (x-only hex)
    #[arg(long, value_name = "HEX", conflicts_with = "outputs")]
    outputkey: Option<String>,

    /// Taproot outputs as '<pubkey>:<sats>,...'
    #[arg(long, value_delimiter = ',', value_name = "KEY:SATS,...")]
    outputs: Vec<String>,

    /// JSON map from hex values to display labels
    #[arg(long, value_name = "FILE")]
    tagfile: Option<PathBuf>,

    /// Column width of the execution table
    #[arg(long, default_value_t = DEFAULT_COLUMN_WIDTH)]
    colwidth: usize,

    /// Maximum rows of the execution table
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS)]
    rows: usize,

    /// Skip ahead to this step
    #[arg(long, default_value_t = 0, value_name = "STEP")]
    skip: usize,

    /// Print every step without waiting for input
    #[arg(long, visible_alias = "ni")]
    non_interactive: bool,

    /// Don't show the steps, only validate
    #[arg(long, visible_alias = "ns")]
    no_step: bool,
}

// ─── helpers ─────────────────────────────────────────────────────────────────

// Mimics cargo's right-aligned bold label style, e.g. "   Compiling foo"
fn label(tag: &str, content: &str) {
    println!("{:>12}  {}", tag.bold().green(), content);
}

// ─── commands ────────────────────────────────────────────────────────────────

fn parse(script: &str) -> Result<(), Error> {
    let compiled = compile_script(&read_source(script))?;
    label("Parsed", &compiled.to_hex());
    Ok(())
}

fn keys(num: usize) -> Result<(), Error> {
    if num < 1 {
        return Err(Error::Usage("number of keys must be positive".to_string()));
    }
    let signer = SchnorrSigner::new();
    for _ in 0..num {
        let key: Keypair = signer.generate_key();
        println!("{},{}", hex::encode(key.secret_bytes()), signer.public_key_hex(&key));
    }
    Ok(())
}

fn plan(args: &ExecuteArgs) -> Result<ExecutionPlan, Error> {
    if let Some(tx) = &args.tx {
        let prevouts: Vec<&str> = args.prevouts.iter().map(String::as_str).collect();
        let spend = SpendContext::from_tx(tx, &prevouts, args.input_index)?;
        label("Executing", &format!("input #{} of {}", args.input_index, spend.tx.compute_txid()));
        return Ok(ExecutionPlan::existing(spend));
    }

    let sources: Vec<String> = match &args.script {
        Some(script) => vec![read_source(script)],
        None => args.scripts.iter().map(|s| read_source(s)).collect(),
    };
    let scripts = sources
        .iter()
        .map(|text| compile_script(text).map(|c| c.to_script_buf()))
        .collect::<Result<Vec<_>, _>>()?;
    let witness_text = read_source(&args.witness);
    let producers = compile_witness(&witness_text)?;

    let internal_key = args.inputkey.as_deref().map(parse_xonly).transpose()?;
    let outputs = match &args.outputkey {
        Some(key) => vec![TxOutput {
            output_key: parse_xonly(key)?,
            value: Amount::ONE_BTC,
        }],
        None => args
            .outputs
            .iter()
            .map(|o| o.parse())
            .collect::<Result<Vec<TxOutput>, _>>()?,
    };

    if let Some(leaf) = scripts.get(args.script_index) {
        label("Script", &tapstep::disassemble(leaf.as_bytes()).join(" "));
    }
    label(
        "Witness",
        &producers.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "),
    );

    let spend = TapscriptSpend::build(
        &scripts,
        args.script_index,
        args.input_index,
        internal_key,
        &outputs,
    )?;
    label("Internal key", &spend.internal_key.to_string());
    label("Output key", &spend.output_key.to_string());
    if let Some(root) = spend.merkle_root {
        label("Merkle root", &root.to_string());
    }
    Ok(ExecutionPlan::tapscript(spend, producers))
}

fn execute(args: ExecuteArgs) -> Result<SessionResult, Error> {
    let tags = match &args.tagfile {
        Some(path) => Tags::load(path)?,
        None => Tags::default(),
    };
    let renderer = Renderer::new(RenderConfig {
        column_width: args.colwidth,
        max_rows: args.rows,
        tags,
    });
    let options = SessionOptions {
        interactive: !args.non_interactive,
        no_step: args.no_step,
        skip_ahead: args.skip,
    };

    let table: KeyTable = args.privkeys.parse()?;
    let signing = SigningContext::new(SchnorrSigner::new(), table);
    let mut controller = StepController::new(TapscriptInterpreter::new(), signing, plan(&args)?);

    let result = if options.interactive && !options.no_step {
        let mut term = Term::stdout();
        if !term.is_term() || !io::stdin().is_terminal() {
            return Err(Error::Usage(
                "interactive stepping needs a terminal, use --non-interactive".to_string(),
            ));
        }
        tapstep::run_session(&mut controller, &renderer, &mut term, io::stdout(), &options)
    } else {
        let mut keys = ByteKeys(io::empty());
        tapstep::run_session(&mut controller, &renderer, &mut keys, io::stdout().lock(), &options)
    };

    for (id, key) in controller.signing().resolved_keys() {
        log::info!("key '{}': {}", id, controller.signing().signer().public_key_hex(key));
    }
    Ok(result?)
}

fn merkle_tree(leaves: &str) -> Result<(), Error> {
    println!("{}", merkle::build(leaves)?);
    Ok(())
}

fn tweak(key: Option<&str>, script: &str, merkle: &str) -> Result<(), Error> {
    let script = compile_script(&read_source(script))?;
    let merkle_root = hex::decode(read_source(merkle).trim())
        .map_err(|e| Error::Usage(format!("merkle root: {}", e)))?;
    let key = key.map(parse_xonly).transpose()?;
    println!("{}", CommitmentTweak::compute(&script.to_script_buf(), &merkle_root, key));
    Ok(())
}

fn script_num(value: Option<&str>, from: Option<&str>) -> Result<(), Error> {
    match (from, value) {
        (Some(hex), _) => println!("{}", decode_script_num(hex)?),
        (None, Some(value)) => println!("{}", encode_script_num(value)?.to_hex()),
        (None, None) => return Err(Error::Usage("expected a value or --from".to_string())),
    }
    Ok(())
}

// ─── main ─────────────────────────────────────────────────────────────────────

fn main() {
    env_logger::Builder::from_default_env().init();
    let args = Args::parse();

    let result = match args.command {
        Command::Parse { script } => parse(&script),
        Command::Keys { num } => keys(num),
        Command::Merkle { leaves } => merkle_tree(&leaves),
        Command::Tweak { key, script, merkle } => tweak(key.as_deref(), &script, &merkle),
        Command::Scriptnum { value, from } => script_num(value.as_deref(), from.as_deref()),
        Command::Execute(exec) => match execute(exec) {
            Ok(SessionResult::Verified) => {
                label("ok", "script execution verified");
                Ok(())
            }
            Ok(SessionResult::Failed(err)) => Err(err.into()),
            Ok(SessionResult::Cancelled) => {
                eprintln!("{:>12}  {}", "cancelled".bold().yellow(), "execution aborted");
                std::process::exit(130);
            }
            Err(err) => Err(err),
        },
    };

    if let Err(err) = result {
        eprintln!("{}: {}", "error".red().bold(), err);
        std::process::exit(1);
    }
}
