use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::{merge_bytes, sha256_digest};

/// Binary hash tree committing to an ordered list of leaf hashes.
///
/// Leaves are paired left to right. Whenever a level has an odd number of
/// nodes the last node is paired with itself, including a lone leaf, so the
/// root is always an internal node.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    root: MerkleNode,
    leaf_hashes: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    hash: Vec<u8>,
    left: Option<Box<MerkleNode>>,
    right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    fn leaf(hash: &[u8]) -> MerkleNode {
        MerkleNode {
            hash: hash.to_vec(),
            left: None,
            right: None,
        }
    }

    fn internal(left: MerkleNode, right: MerkleNode) -> MerkleNode {
        MerkleNode {
            hash: hash_pair(&left.hash, &right.hash),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_left(&self) -> Option<&MerkleNode> {
        self.left.as_deref()
    }

    pub fn get_right(&self) -> Option<&MerkleNode> {
        self.right.as_deref()
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Inclusion proof for one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_hash: Vec<u8>,
    pub leaf_index: usize,
    pub path: Vec<ProofElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofElement {
    /// Sibling hash
    pub hash: Vec<u8>,
    /// Direction: true if sibling is on the right, false if on the left
    pub is_right: bool,
}

impl MerkleProof {
    /// Recomputes the root from the leaf and path and compares it with `root`.
    pub fn verify(&self, root: &[u8]) -> bool {
        let computed = self
            .path
            .iter()
            .fold(self.leaf_hash.clone(), |current, element| {
                if element.is_right {
                    hash_pair(&current, &element.hash)
                } else {
                    hash_pair(&element.hash, &current)
                }
            });
        computed == root
    }
}

impl MerkleTree {
    pub fn build(leaf_hashes: &[Vec<u8>]) -> Result<MerkleTree> {
        if leaf_hashes.is_empty() {
            return Err(BlockchainError::EmptyInput);
        }

        let mut level: Vec<MerkleNode> = leaf_hashes.iter().map(|h| MerkleNode::leaf(h)).collect();
        loop {
            level = next_level(level);
            if level.len() == 1 {
                break;
            }
        }

        let root = level.pop().ok_or(BlockchainError::EmptyInput)?;
        Ok(MerkleTree {
            root,
            leaf_hashes: leaf_hashes.to_vec(),
        })
    }

    /// Tree over the ids of `transactions`, in block order.
    pub fn from_transactions(transactions: &[Transaction]) -> Result<MerkleTree> {
        let leaf_hashes: Vec<Vec<u8>> =
            transactions.iter().map(|tx| tx.get_id().to_vec()).collect();
        MerkleTree::build(&leaf_hashes)
    }

    pub fn root(&self) -> &MerkleNode {
        &self.root
    }

    pub fn root_hash(&self) -> &[u8] {
        self.root.get_hash()
    }

    pub fn leaf_hashes(&self) -> &[Vec<u8>] {
        self.leaf_hashes.as_slice()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_hashes.len()
    }

    pub fn proof(&self, leaf_index: usize) -> Result<MerkleProof> {
        let leaf_hash = self.leaf_hashes.get(leaf_index).ok_or_else(|| {
            BlockchainError::InvalidBlock(format!(
                "Leaf index {} out of bounds (leaves: {})",
                leaf_index,
                self.leaf_hashes.len()
            ))
        })?;

        let mut path = Vec::new();
        let mut level = self.leaf_hashes.clone();
        let mut index = leaf_index;
        loop {
            let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
            // odd level: the last node is its own sibling
            let sibling = level.get(sibling_index).unwrap_or(&level[index]);
            path.push(ProofElement {
                hash: sibling.clone(),
                is_right: index % 2 == 0,
            });

            level = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            index /= 2;
            if level.len() == 1 {
                break;
            }
        }

        Ok(MerkleProof {
            leaf_hash: leaf_hash.clone(),
            leaf_index,
            path,
        })
    }
}

fn next_level(nodes: Vec<MerkleNode>) -> Vec<MerkleNode> {
    let mut parents = Vec::with_capacity((nodes.len() + 1) / 2);
    let mut iter = nodes.into_iter();
    while let Some(left) = iter.next() {
        let right = match iter.next() {
            Some(right) => right,
            None => left.clone(),
        };
        parents.push(MerkleNode::internal(left, right));
    }
    parents
}

fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
    sha256_digest(&merge_bytes(&[left, right]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<Vec<u8>> {
        (0..n).map(|i| sha256_digest(&[i])).collect()
    }

    #[test]
    fn test_three_leaves_duplicate_last() {
        let hashes = leaves(3);
        let tree = MerkleTree::build(&hashes).unwrap();

        let left = hash_pair(&hashes[0], &hashes[1]);
        let right = hash_pair(&hashes[2], &hashes[2]);
        assert_eq!(tree.root_hash(), hash_pair(&left, &right).as_slice());

        let right_node = tree.root().get_right().unwrap();
        assert_eq!(right_node.get_left(), right_node.get_right());
        assert!(right_node.get_left().unwrap().is_leaf());
    }

    #[test]
    fn test_root_is_deterministic_and_order_sensitive() {
        let hashes = leaves(3);
        let first = MerkleTree::build(&hashes).unwrap();
        let second = MerkleTree::build(&hashes).unwrap();
        assert_eq!(first.root_hash(), second.root_hash());

        let permuted = vec![hashes[1].clone(), hashes[0].clone(), hashes[2].clone()];
        let other = MerkleTree::build(&permuted).unwrap();
        assert_ne!(first.root_hash(), other.root_hash());
    }

    #[test]
    fn test_single_leaf_is_paired_with_itself() {
        let hashes = leaves(1);
        let tree = MerkleTree::build(&hashes).unwrap();
        assert_eq!(tree.root_hash(), hash_pair(&hashes[0], &hashes[0]).as_slice());
        assert_eq!(tree.leaf_count(), 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            MerkleTree::build(&[]),
            Err(BlockchainError::EmptyInput)
        ));
    }

    #[test]
    fn test_changed_leaf_changes_root() {
        let mut hashes = leaves(4);
        let before = MerkleTree::build(&hashes).unwrap();
        hashes[3] = sha256_digest(b"changed");
        let after = MerkleTree::build(&hashes).unwrap();
        assert_ne!(before.root_hash(), after.root_hash());
    }

    #[test]
    fn test_proofs_verify_for_every_leaf() {
        for n in 1..=9u8 {
            let tree = MerkleTree::build(&leaves(n)).unwrap();
            for i in 0..n as usize {
                let proof = tree.proof(i).unwrap();
                assert!(proof.verify(tree.root_hash()), "leaf {i} of {n}");
            }
        }
    }

    #[test]
    fn test_proof_rejects_wrong_root_and_index() {
        let tree = MerkleTree::build(&leaves(5)).unwrap();
        let mut proof = tree.proof(2).unwrap();
        assert!(!proof.verify(&sha256_digest(b"not the root")));

        proof.leaf_hash = sha256_digest(b"forged");
        assert!(!proof.verify(tree.root_hash()));
        assert!(tree.proof(5).is_err());
    }
}
