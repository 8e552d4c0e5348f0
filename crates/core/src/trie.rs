//! Merkle-Patricia proof verification.
//!
//! A proof is the list of trie nodes on the path from the root to the value, each encoded as
//! RLP. Every node of the list is authenticated by its keccak256 digest, starting from the root
//! hash; children shorter than 32 bytes are embedded in their parent and carry no proof node of
//! their own.

use alloc::{
    format,
    string::{String, ToString as _},
    vec::Vec,
};
use alloy_primitives::{keccak256, Bytes, B256};
use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};
use rlp::Rlp;

use crate::ProofError;

enum Step {
    Value(Bytes),
    Hash { consumed: usize, hash: B256 },
    Inline { consumed: usize, node: Vec<u8> },
}

/// Returns the value bound to `path` under `root`.
///
/// `path` is the trie path, i.e. the already hashed key for secure tries.
pub fn verify_proof<K>(root: B256, path: K, proof: &[Bytes]) -> Result<Bytes, ProofError>
where
    K: AsRef<[u8]>,
{
    let path = Nibbles::unpack(path);
    let path = path.as_slice();

    if proof.is_empty() {
        return Err(if root == EMPTY_ROOT_HASH {
            ProofError::KeyNotFound
        } else {
            ProofError::EmptyProof
        });
    }

    let mut index = 0;
    let mut cursor = 0;
    let mut node = authenticate(index, root, &proof[index])?.to_vec();

    loop {
        match step(index, &node, &path[cursor..])? {
            Step::Value(value) => {
                let unused = proof.len() - index - 1;

                if unused > 0 {
                    return Err(ProofError::UnusedNodes { count: unused });
                }

                return Ok(value);
            }

            Step::Hash { consumed, hash } => {
                cursor += consumed;
                index += 1;

                let next = proof.get(index).ok_or(ProofError::Incomplete)?;

                node = authenticate(index, hash, next)?.to_vec();
            }

            Step::Inline {
                consumed,
                node: inline,
            } => {
                cursor += consumed;
                node = inline;
            }
        }
    }
}

fn authenticate(index: usize, expected: B256, node: &Bytes) -> Result<&Bytes, ProofError> {
    let got = keccak256(node);

    if got != expected {
        return Err(ProofError::HashMismatch {
            index,
            expected,
            got,
        });
    }

    Ok(node)
}

fn step(index: usize, node: &[u8], remaining: &[u8]) -> Result<Step, ProofError> {
    let malformed = |reason: String| ProofError::MalformedNode { index, reason };
    let rlp = Rlp::new(node);
    let count = rlp.item_count().map_err(|e| malformed(e.to_string()))?;

    match count {
        17 => match remaining.split_first() {
            None => {
                let value = rlp.at(16).map_err(|e| malformed(e.to_string()))?;
                let value = value.data().map_err(|e| malformed(e.to_string()))?;

                if value.is_empty() {
                    return Err(ProofError::KeyNotFound);
                }

                Ok(Step::Value(Bytes::copy_from_slice(value)))
            }

            Some((nibble, _)) => {
                let child = rlp
                    .at(*nibble as usize)
                    .map_err(|e| malformed(e.to_string()))?;

                reference(index, &child, 1)
            }
        },

        2 => {
            let encoded = rlp.at(0).map_err(|e| malformed(e.to_string()))?;
            let encoded = encoded.data().map_err(|e| malformed(e.to_string()))?;
            let (segment, leaf) = decode_path(encoded)
                .ok_or_else(|| malformed("invalid hex-prefix path".to_string()))?;

            if leaf {
                if segment.as_slice() != remaining {
                    return Err(ProofError::PathMismatch { index });
                }

                let value = rlp.at(1).map_err(|e| malformed(e.to_string()))?;
                let value = value.data().map_err(|e| malformed(e.to_string()))?;

                if value.is_empty() {
                    return Err(malformed("empty leaf value".to_string()));
                }

                return Ok(Step::Value(Bytes::copy_from_slice(value)));
            }

            if segment.is_empty() {
                return Err(malformed("empty extension path".to_string()));
            }

            if !remaining.starts_with(&segment) {
                return Err(ProofError::PathMismatch { index });
            }

            let child = rlp.at(1).map_err(|e| malformed(e.to_string()))?;

            reference(index, &child, segment.len())
        }

        n => Err(malformed(format!("unexpected item count {n}"))),
    }
}

fn reference(index: usize, child: &Rlp, consumed: usize) -> Result<Step, ProofError> {
    let malformed = |reason: String| ProofError::MalformedNode { index, reason };

    if child.is_list() {
        let node = child.as_raw();

        if node.len() >= 32 {
            return Err(malformed(format!(
                "embedded child of {} bytes must be referenced by hash",
                node.len()
            )));
        }

        return Ok(Step::Inline {
            consumed,
            node: node.to_vec(),
        });
    }

    let data = child.data().map_err(|e| malformed(e.to_string()))?;

    match data.len() {
        0 => Err(ProofError::KeyNotFound),
        32 => Ok(Step::Hash {
            consumed,
            hash: B256::from_slice(data),
        }),
        n => Err(malformed(format!("child reference of {n} bytes"))),
    }
}

/// Decodes a hex-prefix encoded path into its nibbles and the leaf flag.
fn decode_path(encoded: &[u8]) -> Option<(Vec<u8>, bool)> {
    let (&first, rest) = encoded.split_first()?;
    let flag = first >> 4;

    if flag > 3 {
        return None;
    }

    let leaf = flag & 0x02 != 0;
    let odd = flag & 0x01 != 0;

    if !odd && first & 0x0f != 0 {
        return None;
    }

    let mut nibbles = Vec::with_capacity(rest.len() * 2 + 1);

    if odd {
        nibbles.push(first & 0x0f);
    }

    for b in rest {
        nibbles.push(b >> 4);
        nibbles.push(b & 0x0f);
    }

    Some((nibbles, leaf))
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloy_primitives::{hex, U256};

    use super::*;
    use crate::{fixtures, AccountRecord};

    fn leaves(count: u8) -> Vec<(B256, Vec<u8>)> {
        (0..count)
            .map(|i| {
                let key = keccak256([i]);
                let value = alloy_rlp::encode(U256::from(i as u64 + 1) << 200);

                (key, value)
            })
            .collect()
    }

    #[test]
    fn resolves_every_key_of_a_trie() {
        let leaves = leaves(64);

        for (key, value) in &leaves {
            let trie = fixtures::trie_proof(leaves.clone(), *key);
            let proven = verify_proof(trie.root, key, &trie.proof).unwrap();

            assert!(trie.proof.len() > 1);
            assert_eq!(&proven[..], value.as_slice());
        }
    }

    #[test]
    fn resolves_single_leaf_trie() {
        let leaves = leaves(1);
        let (key, value) = &leaves[0];
        let trie = fixtures::trie_proof(leaves.clone(), *key);

        assert_eq!(trie.proof.len(), 1);
        assert_eq!(
            &verify_proof(trie.root, key, &trie.proof).unwrap()[..],
            value.as_slice()
        );
    }

    #[test]
    fn detects_any_single_byte_tampering() {
        let leaves = leaves(32);
        let (key, _) = &leaves[7];
        let trie = fixtures::trie_proof(leaves.clone(), *key);

        for (i, node) in trie.proof.iter().enumerate() {
            for at in [0, node.len() / 2, node.len() - 1] {
                let mut tampered = trie.proof.clone();
                let mut bytes = node.to_vec();
                bytes[at] ^= 0x01;
                tampered[i] = bytes.into();

                let err = verify_proof(trie.root, key, &tampered).unwrap_err();

                assert_eq!(
                    err,
                    ProofError::HashMismatch {
                        index: i,
                        expected: if i == 0 {
                            trie.root
                        } else {
                            keccak256(node)
                        },
                        got: keccak256(&tampered[i]),
                    }
                );
            }
        }
    }

    #[test]
    fn rejects_truncated_and_padded_proofs() {
        let leaves = leaves(32);
        let (key, _) = &leaves[3];
        let trie = fixtures::trie_proof(leaves.clone(), *key);

        let truncated = &trie.proof[..trie.proof.len() - 1];
        assert_eq!(
            verify_proof(trie.root, key, truncated).unwrap_err(),
            ProofError::Incomplete
        );

        let mut padded = trie.proof.clone();
        padded.push(trie.proof[0].clone());
        assert_eq!(
            verify_proof(trie.root, key, &padded).unwrap_err(),
            ProofError::UnusedNodes { count: 1 }
        );

        assert_eq!(
            verify_proof(trie.root, key, &[]).unwrap_err(),
            ProofError::EmptyProof
        );
    }

    #[test]
    fn rejects_wrong_root_and_wrong_key() {
        let leaves = leaves(16);
        let (key, _) = &leaves[0];
        let trie = fixtures::trie_proof(leaves.clone(), *key);

        assert!(matches!(
            verify_proof(B256::repeat_byte(0xaa), key, &trie.proof),
            Err(ProofError::HashMismatch { index: 0, .. })
        ));

        // a key absent from the trie may share the path only partially
        let absent = keccak256(b"absent");
        assert!(matches!(
            verify_proof(trie.root, absent, &trie.proof),
            Err(ProofError::PathMismatch { .. }
                | ProofError::KeyNotFound
                | ProofError::HashMismatch { .. })
        ));
    }

    #[test]
    fn empty_trie_holds_no_keys() {
        assert_eq!(
            verify_proof(EMPTY_ROOT_HASH, B256::ZERO, &[]).unwrap_err(),
            ProofError::KeyNotFound
        );
    }

    #[test]
    fn follows_embedded_children() {
        // branch with inline leaves at slots 1 and 2, each holding the single remaining nibble 0
        let leaf_one = hex!("c33081aa");
        let leaf_two = hex!("c33081bb");

        let mut payload = Vec::new();
        payload.push(0x80);
        payload.extend_from_slice(&leaf_one);
        payload.extend_from_slice(&leaf_two);
        payload.extend(vec![0x80; 14]);
        let mut branch = vec![0xc0 + payload.len() as u8];
        branch.extend(payload);

        let root = keccak256(&branch);
        let proof = [Bytes::from(branch)];

        // keys are bytes whose high nibble selects the branch slot, the low nibble is the leaf
        let value = verify_proof(root, [0x10u8], &proof).unwrap();
        assert_eq!(&value[..], &[0xaa_u8][..]);

        let value = verify_proof(root, [0x20u8], &proof).unwrap();
        assert_eq!(&value[..], &[0xbb_u8][..]);

        assert_eq!(
            verify_proof(root, [0x30u8], &proof).unwrap_err(),
            ProofError::KeyNotFound
        );
        assert_eq!(
            verify_proof(root, [0x11u8], &proof).unwrap_err(),
            ProofError::PathMismatch { index: 0 }
        );
    }

    #[test]
    fn returns_account_record_for_zero_balance_account() {
        let address = alloy_primitives::address!("1111111111111111111111111111111111111111");
        let record = AccountRecord {
            nonce: 0,
            balance: U256::ZERO,
            storage_root: B256::repeat_byte(0xbb),
            code_hash: B256::repeat_byte(0xcc),
        };

        let mut leaves = vec![(crate::key::account_path(address), record.to_rlp())];
        leaves.extend((1u8..8).map(|i| {
            let other = AccountRecord {
                nonce: i as u64,
                ..record
            };
            (
                crate::key::account_path(alloy_primitives::Address::with_last_byte(i)),
                other.to_rlp(),
            )
        }));

        let path = crate::key::account_path(address);
        let trie = fixtures::trie_proof(leaves, path);
        let value = verify_proof(trie.root, path, &trie.proof).unwrap();
        let proven = AccountRecord::from_rlp(&value).unwrap();

        assert_eq!(proven, record);
        assert_eq!(value[2], alloy_rlp::EMPTY_STRING_CODE);
        assert_eq!(value[3], alloy_rlp::EMPTY_STRING_CODE);
    }
}
