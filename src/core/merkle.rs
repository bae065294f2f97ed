//! SHA-256 commitment trees over witness-style leaves.
//!
//! Leaves use the witness token syntax: a hex value, `<>` for the empty
//! value, or a `(a,b,..)` group whose elements are hashed and concatenated.
//! Each leaf value is hashed once more, then neighbours are paired and
//! hashed up to a single root.

use std::fmt;

use bitcoin::hashes::{sha256, Hash, HashEngine};

use crate::core::assembler::{group_leaf, tokenize, ParseError, Position, TokenKind};

#[derive(Debug, thiserror::Error)]
pub enum MerkleError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("'{token}' at {position} is not a leaf value")]
    NotALeaf { token: String, position: Position },
    #[error("no leaves given")]
    Empty,
    #[error("invalid number of leaves: {0} is not a power of two")]
    LeafCount(usize),
}

/// A complete tree, stored level by level from the root down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<sha256::Hash>>,
}

impl MerkleTree {
    /// Levels from the root (one hash) down to the leaf hashes.
    pub fn levels(&self) -> &[Vec<sha256::Hash>] {
        &self.levels
    }

    pub fn root(&self) -> sha256::Hash {
        self.levels[0][0]
    }

    pub fn leaves(&self) -> &[sha256::Hash] {
        &self.levels[self.levels.len() - 1]
    }
}

impl fmt::Display for MerkleTree {
    /// One line per level, root first, hashes separated by spaces.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, level) in self.levels.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let line: Vec<String> = level.iter().map(|h| h.to_string()).collect();
            write!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

/// Build the tree committing to the whitespace-separated `leaves`.
pub fn build(leaves: &str) -> Result<MerkleTree, MerkleError> {
    let mut level = tokenize(leaves)?
        .into_iter()
        .map(|token| {
            let value = match token.kind {
                TokenKind::Hex(bytes) => bytes,
                TokenKind::Empty => vec![],
                TokenKind::Group(elements) => group_leaf(&elements),
                TokenKind::Opcode(_) | TokenKind::Signature(_) => {
                    return Err(MerkleError::NotALeaf {
                        token: token.text,
                        position: token.position,
                    })
                }
            };
            Ok(sha256::Hash::hash(&value))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if level.is_empty() {
        return Err(MerkleError::Empty);
    }
    if !level.len().is_power_of_two() {
        return Err(MerkleError::LeafCount(level.len()));
    }
    log::debug!("building commitment tree over {} leaves", level.len());

    let mut levels = vec![level.clone()];
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let mut engine = sha256::Hash::engine();
                engine.input(pair[0].as_byte_array());
                engine.input(pair[1].as_byte_array());
                sha256::Hash::from_engine(engine)
            })
            .collect();
        levels.push(level.clone());
    }
    levels.reverse();
    Ok(MerkleTree { levels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assembler::ParseErrorKind;

    fn h(data: &[u8]) -> sha256::Hash {
        sha256::Hash::hash(data)
    }

    fn pair(l: sha256::Hash, r: sha256::Hash) -> sha256::Hash {
        h(&[l.to_byte_array(), r.to_byte_array()].concat())
    }

    #[test]
    fn test_single_leaf() {
        let tree = build("aa").unwrap();
        assert_eq!(tree.levels().len(), 1);
        assert_eq!(tree.root(), h(&[0xaa]));
    }

    #[test]
    fn test_four_leaves() {
        let tree = build("01 02 <> (0a,0b)").unwrap();
        let leaves = [
            h(&[0x01]),
            h(&[0x02]),
            h(&[]),
            h(&[h(&[0x0a]).to_byte_array(), h(&[0x0b]).to_byte_array()].concat()),
        ];
        assert_eq!(tree.leaves(), &leaves);
        assert_eq!(
            tree.levels()[1],
            vec![pair(leaves[0], leaves[1]), pair(leaves[2], leaves[3])]
        );
        assert_eq!(
            tree.root(),
            pair(pair(leaves[0], leaves[1]), pair(leaves[2], leaves[3]))
        );

        let printed = tree.to_string();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], tree.root().to_string());
        assert_eq!(lines[2].split(' ').count(), 4);
    }

    #[test]
    fn test_group_with_empty_balance() {
        // A zero amount encodes as an empty element next to the key.
        let tree = build("(,aa) bb").unwrap();
        let group = [h(&[]).to_byte_array(), h(&[0xaa]).to_byte_array()].concat();
        assert_eq!(tree.leaves(), &[h(&group), h(&[0xbb])]);
        assert_eq!(tree.root(), pair(h(&group), h(&[0xbb])));
    }

    #[test]
    fn test_leaf_count_must_be_power_of_two() {
        assert!(matches!(build("01 02 03"), Err(MerkleError::LeafCount(3))));
        assert!(matches!(build("  # nothing\n"), Err(MerkleError::Empty)));
    }

    #[test]
    fn test_rejects_non_leaf_tokens() {
        assert!(matches!(
            build("01 OP_DUP"),
            Err(MerkleError::NotALeaf { ref token, .. }) if token == "OP_DUP"
        ));
        match build("01 0g") {
            Err(MerkleError::Parse(err)) => assert_eq!(err.kind, ParseErrorKind::InvalidHex),
            other => panic!("unexpected {:?}", other),
        }
    }
}
