//! Opcode table and raw script decoding.
//!
//! [`Opcode`] is generated from one table so that the byte value, the enum
//! variant and the mnemonic can never drift apart. Mnemonics follow Bitcoin
//! Core / btcd naming (`OP_CHECKLOCKTIMEVERIFY`, `OP_1`, `OP_DATA_20`), plus
//! the usual aliases (`OP_TRUE`, `OP_FALSE`, `OP_NOP2`, `OP_NOP3`).

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

macro_rules! opcode_table {
    ($($byte:literal => $variant:ident, $name:literal;)*) => {
        /// A decoded script opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            /// Direct push of the next 1..=75 bytes.
            PushBytes(u8),
            /// OP_1 ..= OP_16 (value 1..16).
            OpNum(u8),
            /// Unassigned byte (OP_SUCCESSx in tapscript).
            Unknown(u8),
            $($variant,)*
        }

        impl Opcode {
            /// Decode an opcode from its byte value.
            pub fn from_byte(b: u8) -> Opcode {
                match b {
                    0x01..=0x4b => Opcode::PushBytes(b),
                    0x51..=0x60 => Opcode::OpNum(b - 0x50),
                    $($byte => Opcode::$variant,)*
                    _ => Opcode::Unknown(b),
                }
            }

            /// The byte this opcode encodes to.
            pub fn to_byte(self) -> u8 {
                match self {
                    Opcode::PushBytes(n) => n,
                    Opcode::OpNum(n) => 0x50 + n,
                    Opcode::Unknown(b) => b,
                    $(Opcode::$variant => $byte,)*
                }
            }

            fn fixed_name(self) -> Option<&'static str> {
                match self {
                    $(Opcode::$variant => Some($name),)*
                    _ => None,
                }
            }
        }
    };
}

opcode_table! {
    0x00 => Op0, "OP_0";
    0x4c => PushData1, "OP_PUSHDATA1";
    0x4d => PushData2, "OP_PUSHDATA2";
    0x4e => PushData4, "OP_PUSHDATA4";
    0x4f => Op1Negate, "OP_1NEGATE";
    0x50 => OpReserved, "OP_RESERVED";
    0x61 => OpNop, "OP_NOP";
    0x62 => OpVer, "OP_VER";
    0x63 => OpIf, "OP_IF";
    0x64 => OpNotIf, "OP_NOTIF";
    0x65 => OpVerIf, "OP_VERIF";
    0x66 => OpVerNotIf, "OP_VERNOTIF";
    0x67 => OpElse, "OP_ELSE";
    0x68 => OpEndIf, "OP_ENDIF";
    0x69 => OpVerify, "OP_VERIFY";
    0x6a => OpReturn, "OP_RETURN";
    0x6b => OpToAltStack, "OP_TOALTSTACK";
    0x6c => OpFromAltStack, "OP_FROMALTSTACK";
    0x6d => Op2Drop, "OP_2DROP";
    0x6e => Op2Dup, "OP_2DUP";
    0x6f => Op3Dup, "OP_3DUP";
    0x70 => Op2Over, "OP_2OVER";
    0x71 => Op2Rot, "OP_2ROT";
    0x72 => Op2Swap, "OP_2SWAP";
    0x73 => OpIfDup, "OP_IFDUP";
    0x74 => OpDepth, "OP_DEPTH";
    0x75 => OpDrop, "OP_DROP";
    0x76 => OpDup, "OP_DUP";
    0x77 => OpNip, "OP_NIP";
    0x78 => OpOver, "OP_OVER";
    0x79 => OpPick, "OP_PICK";
    0x7a => OpRoll, "OP_ROLL";
    0x7b => OpRot, "OP_ROT";
    0x7c => OpSwap, "OP_SWAP";
    0x7d => OpTuck, "OP_TUCK";
    0x7e => OpCat, "OP_CAT";
    0x7f => OpSubStr, "OP_SUBSTR";
    0x80 => OpLeft, "OP_LEFT";
    0x81 => OpRight, "OP_RIGHT";
    0x82 => OpSize, "OP_SIZE";
    0x83 => OpInvert, "OP_INVERT";
    0x84 => OpAnd, "OP_AND";
    0x85 => OpOr, "OP_OR";
    0x86 => OpXor, "OP_XOR";
    0x87 => OpEqual, "OP_EQUAL";
    0x88 => OpEqualVerify, "OP_EQUALVERIFY";
    0x89 => OpReserved1, "OP_RESERVED1";
    0x8a => OpReserved2, "OP_RESERVED2";
    0x8b => Op1Add, "OP_1ADD";
    0x8c => Op1Sub, "OP_1SUB";
    0x8d => Op2Mul, "OP_2MUL";
    0x8e => Op2Div, "OP_2DIV";
    0x8f => OpNegate, "OP_NEGATE";
    0x90 => OpAbs, "OP_ABS";
    0x91 => OpNot, "OP_NOT";
    0x92 => Op0NotEqual, "OP_0NOTEQUAL";
    0x93 => OpAdd, "OP_ADD";
    0x94 => OpSub, "OP_SUB";
    0x95 => OpMul, "OP_MUL";
    0x96 => OpDiv, "OP_DIV";
    0x97 => OpMod, "OP_MOD";
    0x98 => OpLShift, "OP_LSHIFT";
    0x99 => OpRShift, "OP_RSHIFT";
    0x9a => OpBoolAnd, "OP_BOOLAND";
    0x9b => OpBoolOr, "OP_BOOLOR";
    0x9c => OpNumEqual, "OP_NUMEQUAL";
    0x9d => OpNumEqualVerify, "OP_NUMEQUALVERIFY";
    0x9e => OpNumNotEqual, "OP_NUMNOTEQUAL";
    0x9f => OpLessThan, "OP_LESSTHAN";
    0xa0 => OpGreaterThan, "OP_GREATERTHAN";
    0xa1 => OpLessThanOrEqual, "OP_LESSTHANOREQUAL";
    0xa2 => OpGreaterThanOrEqual, "OP_GREATERTHANOREQUAL";
    0xa3 => OpMin, "OP_MIN";
    0xa4 => OpMax, "OP_MAX";
    0xa5 => OpWithin, "OP_WITHIN";
    0xa6 => OpRipeMd160, "OP_RIPEMD160";
    0xa7 => OpSha1, "OP_SHA1";
    0xa8 => OpSha256, "OP_SHA256";
    0xa9 => OpHash160, "OP_HASH160";
    0xaa => OpHash256, "OP_HASH256";
    0xab => OpCodeSeparator, "OP_CODESEPARATOR";
    0xac => OpCheckSig, "OP_CHECKSIG";
    0xad => OpCheckSigVerify, "OP_CHECKSIGVERIFY";
    0xae => OpCheckMultiSig, "OP_CHECKMULTISIG";
    0xaf => OpCheckMultiSigVerify, "OP_CHECKMULTISIGVERIFY";
    0xb0 => OpNop1, "OP_NOP1";
    0xb1 => OpCheckLockTimeVerify, "OP_CHECKLOCKTIMEVERIFY";
    0xb2 => OpCheckSequenceVerify, "OP_CHECKSEQUENCEVERIFY";
    0xb3 => OpNop4, "OP_NOP4";
    0xb4 => OpNop5, "OP_NOP5";
    0xb5 => OpNop6, "OP_NOP6";
    0xb6 => OpNop7, "OP_NOP7";
    0xb7 => OpNop8, "OP_NOP8";
    0xb8 => OpNop9, "OP_NOP9";
    0xb9 => OpNop10, "OP_NOP10";
    0xba => OpCheckSigAdd, "OP_CHECKSIGADD";
    0xff => OpInvalidOpCode, "OP_INVALIDOPCODE";
}

/// Alternative spellings accepted by the assembler.
const ALIASES: &[(&str, u8)] = &[
    ("OP_FALSE", 0x00),
    ("OP_TRUE", 0x51),
    ("OP_NOP2", 0xb1),
    ("OP_NOP3", 0xb2),
];

impl Opcode {
    /// Mnemonic for the opcode. Every name returned here is accepted by
    /// [`Opcode::from_name`].
    pub fn name(&self) -> String {
        match self {
            Opcode::PushBytes(n) => format!("OP_DATA_{}", n),
            Opcode::OpNum(n) => format!("OP_{}", n),
            Opcode::Unknown(b) => format!("OP_UNKNOWN{}", b),
            other => other.fixed_name().unwrap_or("OP_UNKNOWN").to_string(),
        }
    }

    /// Look up a registered mnemonic. Lookup is case-sensitive.
    pub fn from_name(name: &str) -> Option<Opcode> {
        mnemonics().get(name).copied().map(Opcode::from_byte)
    }

    /// Whether the opcode consumes inline push data.
    pub fn is_push_data(&self) -> bool {
        matches!(
            self,
            Opcode::PushBytes(_) | Opcode::PushData1 | Opcode::PushData2 | Opcode::PushData4
        )
    }
}

fn mnemonics() -> &'static HashMap<String, u8> {
    static TABLE: OnceLock<HashMap<String, u8>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: HashMap<String, u8> = (0..=u8::MAX)
            .map(|b| (Opcode::from_byte(b).name(), b))
            .collect();
        for (alias, b) in ALIASES {
            table.insert((*alias).to_string(), *b);
        }
        table
    })
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ─── ScriptInstruction ──────────────────────────────────────────────────────

/// A decoded instruction from a raw script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInstruction {
    pub opcode: Opcode,
    /// Data pushed by `OP_0`, `OP_DATA_n` and `OP_PUSHDATAn`.
    pub push_data: Option<Vec<u8>>,
    pub byte_offset: usize,
    /// Opcode, length prefix and data.
    pub byte_length: usize,
    /// The script ended before the declared push length was available.
    pub truncated: bool,
}

/// Decode a raw script byte slice into a sequence of instructions.
///
/// Mirrors Bitcoin Core's `CScript::GetOp()`. A push whose declared length
/// runs past the end of the script yields a final instruction with
/// `truncated` set and whatever bytes remained.
pub fn decode_script(script: &[u8]) -> Vec<ScriptInstruction> {
    let mut instructions = Vec::new();
    let mut pos = 0;

    while pos < script.len() {
        let start = pos;
        let opcode = Opcode::from_byte(script[pos]);
        pos += 1;

        let len_bytes = match opcode {
            Opcode::PushData1 => 1,
            Opcode::PushData2 => 2,
            Opcode::PushData4 => 4,
            _ => 0,
        };

        let declared = match opcode {
            Opcode::Op0 => Some(0),
            Opcode::PushBytes(n) => Some(n as usize),
            Opcode::PushData1 | Opcode::PushData2 | Opcode::PushData4 => {
                if pos + len_bytes > script.len() {
                    instructions.push(ScriptInstruction {
                        opcode,
                        push_data: Some(vec![]),
                        byte_offset: start,
                        byte_length: script.len() - start,
                        truncated: true,
                    });
                    break;
                }
                let mut le = [0u8; 4];
                le[..len_bytes].copy_from_slice(&script[pos..pos + len_bytes]);
                pos += len_bytes;
                Some(u32::from_le_bytes(le) as usize)
            }
            _ => None,
        };

        let (push_data, truncated) = match declared {
            Some(n) => {
                let end = pos.saturating_add(n).min(script.len());
                let data = script[pos..end].to_vec();
                let truncated = end - pos < n;
                pos = end;
                (Some(data), truncated)
            }
            None => (None, false),
        };

        instructions.push(ScriptInstruction {
            opcode,
            push_data,
            byte_offset: start,
            byte_length: pos - start,
            truncated,
        });
    }

    instructions
}
