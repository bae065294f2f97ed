//! Script and witness assembler.
//!
//! Source text is a whitespace separated list of tokens. `#` starts a
//! comment that runs to the end of the line. A token is, in lookup order:
//!
//! - a registered opcode mnemonic (`OP_DUP`, `OP_TRUE`, ...)
//! - `<>`, the empty element
//! - `<sig:ID>`, a deferred signature by key `ID` (witness only)
//! - `(aa,bb,...)`, a grouped leaf: each element is SHA-256 hashed and the
//!   digests concatenated (witness only)
//! - an even-length hex literal
//!
//! Hex literals in scripts always get the smallest push prefix for their
//! length, but the assembler never rewrites a literal into a different
//! opcode: `01` stays `OP_DATA_1 01` rather than becoming `OP_1`, so
//! deliberately non-minimal scripts compile byte-for-byte as written.

use std::fmt;
use std::fs;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::ScriptBuf;

use crate::core::opcode::{decode_script, Opcode};

/// 1-based line and column of a token in its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("unknown opcode")]
    UnknownOpcode,
    #[error("invalid hex")]
    InvalidHex,
    #[error("odd-length hex")]
    OddLengthHex,
    #[error("malformed group: {0}")]
    MalformedGroup(String),
    #[error("malformed placeholder")]
    MalformedPlaceholder,
    #[error("not allowed in a script")]
    NotAllowedInScript,
    #[error("opcodes are not allowed in a witness")]
    OpcodeInWitness,
}

/// A token that could not be compiled. Always fatal to compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{position}: {kind}: '{token}'")]
pub struct ParseError {
    pub token: String,
    pub position: Position,
    pub kind: ParseErrorKind,
}

/// Classification of one source token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Opcode(Opcode),
    Hex(Vec<u8>),
    Empty,
    Group(Vec<Vec<u8>>),
    Signature(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: Position,
    pub kind: TokenKind,
}

/// Split source text into classified tokens, comments removed.
pub fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    words(text)
        .map(|(word, position)| {
            classify(word)
                .map(|kind| Token {
                    text: word.to_string(),
                    position,
                    kind,
                })
                .map_err(|kind| ParseError {
                    token: word.to_string(),
                    position,
                    kind,
                })
        })
        .collect()
}

fn words(text: &str) -> impl Iterator<Item = (&str, Position)> {
    text.lines().enumerate().flat_map(|(line_idx, line)| {
        let code = line.split('#').next().unwrap_or("");
        let mut found = Vec::new();
        let mut start: Option<(usize, usize)> = None;
        for (col, (byte_idx, ch)) in code.char_indices().enumerate() {
            match (ch.is_whitespace(), start) {
                (false, None) => start = Some((byte_idx, col)),
                (true, Some((s, c))) => {
                    found.push((&code[s..byte_idx], line_idx, c));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some((s, c)) = start {
            found.push((&code[s..], line_idx, c));
        }
        found.into_iter().map(|(word, line, col)| {
            (
                word,
                Position {
                    line: line + 1,
                    col: col + 1,
                },
            )
        })
    })
}

fn classify(word: &str) -> Result<TokenKind, ParseErrorKind> {
    // Opcode lookup strictly first, so a misspelled mnemonic is never
    // reported as bad hex.
    if let Some(op) = Opcode::from_name(word) {
        return Ok(TokenKind::Opcode(op));
    }
    if word == "<>" {
        return Ok(TokenKind::Empty);
    }
    if word.starts_with('<') {
        return match word.strip_prefix("<sig:").and_then(|s| s.strip_suffix('>')) {
            Some(id) if !id.is_empty() && !id.contains(|c: char| c == '<' || c == '>') => {
                Ok(TokenKind::Signature(id.to_string()))
            }
            _ => Err(ParseErrorKind::MalformedPlaceholder),
        };
    }
    if word.starts_with('(') {
        return parse_group(word).map(TokenKind::Group);
    }
    decode_hex(word).map(TokenKind::Hex)
}

fn parse_group(word: &str) -> Result<Vec<Vec<u8>>, ParseErrorKind> {
    let inner = word
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| ParseErrorKind::MalformedGroup("missing closing ')'".to_string()))?;

    // Every element counts, so `(,aa)` and `(aa,)` each hash an empty value.
    inner
        .split(',')
        .map(|part| {
            decode_hex(part).map_err(|e| ParseErrorKind::MalformedGroup(format!("'{}': {}", part, e)))
        })
        .collect()
}

fn decode_hex(word: &str) -> Result<Vec<u8>, ParseErrorKind> {
    if !word.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(if looks_like_mnemonic(word) {
            ParseErrorKind::UnknownOpcode
        } else {
            ParseErrorKind::InvalidHex
        });
    }
    if word.len() % 2 != 0 {
        return Err(ParseErrorKind::OddLengthHex);
    }
    hex::decode(word).map_err(|_| ParseErrorKind::InvalidHex)
}

fn looks_like_mnemonic(word: &str) -> bool {
    if word.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("OP_")) {
        return true;
    }
    word.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && word
            .chars()
            .any(|c| c.is_ascii_uppercase() && !c.is_ascii_hexdigit())
}

/// Grouped-leaf value: the concatenated SHA-256 digests of each element.
pub fn group_leaf(elements: &[Vec<u8>]) -> Vec<u8> {
    elements
        .iter()
        .flat_map(|el| sha256::Hash::hash(el).to_byte_array())
        .collect()
}

// ─── Scripts ────────────────────────────────────────────────────────────────

/// Compiled script bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledScript(Vec<u8>);

impl CompiledScript {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        CompiledScript(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn to_script_buf(&self) -> ScriptBuf {
        ScriptBuf::from_bytes(self.0.clone())
    }

    /// One token per instruction, see [`disassemble`].
    pub fn disassemble(&self) -> Vec<String> {
        disassemble(&self.0)
    }
}

/// Append `data` to `out` with the smallest push prefix for its length.
pub fn push_data(out: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < Opcode::PushData1.to_byte() as usize {
        out.push(len as u8);
    } else if len <= 0xff {
        out.extend([Opcode::PushData1.to_byte(), len as u8]);
    } else if len <= 0xffff {
        out.push(Opcode::PushData2.to_byte());
        out.extend((len as u16).to_le_bytes());
    } else {
        out.push(Opcode::PushData4.to_byte());
        out.extend((len as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
}

/// Compile script text to its byte-stream.
pub fn compile_script(text: &str) -> Result<CompiledScript, ParseError> {
    let mut out = Vec::new();
    for token in tokenize(text)? {
        match token.kind {
            TokenKind::Opcode(op) => out.push(op.to_byte()),
            TokenKind::Empty => out.push(Opcode::Op0.to_byte()),
            TokenKind::Hex(data) => push_data(&mut out, &data),
            TokenKind::Group(_) | TokenKind::Signature(_) => {
                return Err(ParseError {
                    token: token.text,
                    position: token.position,
                    kind: ParseErrorKind::NotAllowedInScript,
                })
            }
        }
    }
    Ok(CompiledScript(out))
}

/// Render raw script bytes as assembler tokens.
///
/// Non-push opcodes print as mnemonics, `OP_0` as `OP_0`, and data pushes
/// as lowercase hex. A push cut short by the end of the script is shown as
/// `[truncated:<hex>]`.
pub fn disassemble(script: &[u8]) -> Vec<String> {
    decode_script(script)
        .into_iter()
        .map(|ins| match (&ins.push_data, ins.opcode) {
            (_, Opcode::Op0) => Opcode::Op0.name(),
            (Some(data), _) if ins.truncated => format!("[truncated:{}]", hex::encode(data)),
            (Some(data), _) => hex::encode(data),
            (None, op) => op.name(),
        })
        .collect()
}

// ─── Witnesses ──────────────────────────────────────────────────────────────

/// Produces one witness element once a signing context is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessProducer {
    /// Fixed bytes.
    Literal(Vec<u8>),
    /// Zero-length element.
    Empty,
    /// Signature by the named key over the current input.
    Signature(String),
}

impl fmt::Display for WitnessProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WitnessProducer::Literal(data) => write!(f, "{}", hex::encode(data)),
            WitnessProducer::Empty => write!(f, "<>"),
            WitnessProducer::Signature(id) => write!(f, "<sig:{}>", id),
        }
    }
}

/// Compile witness text into an ordered list of element producers.
pub fn compile_witness(text: &str) -> Result<Vec<WitnessProducer>, ParseError> {
    tokenize(text)?
        .into_iter()
        .map(|token| match token.kind {
            TokenKind::Empty => Ok(WitnessProducer::Empty),
            TokenKind::Hex(data) => Ok(WitnessProducer::Literal(data)),
            TokenKind::Group(elements) => Ok(WitnessProducer::Literal(group_leaf(&elements))),
            TokenKind::Signature(id) => Ok(WitnessProducer::Signature(id)),
            TokenKind::Opcode(_) => Err(ParseError {
                token: token.text,
                position: token.position,
                kind: ParseErrorKind::OpcodeInWitness,
            }),
        })
        .collect()
}

// ─── Sources ────────────────────────────────────────────────────────────────

/// Source text for a `--script`/`--witness` style argument: the contents of
/// the named file, or the argument itself when it is not a readable file.
pub fn read_source(arg: &str) -> String {
    match fs::read_to_string(arg) {
        Ok(text) => {
            log::debug!("read {} bytes of source from {}", text.len(), arg);
            text
        }
        Err(_) => arg.to_string(),
    }
}
