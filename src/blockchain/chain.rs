use thiserror::Error;

use super::block::Block;
use super::crypto::compute_merkle_root;
use super::transaction::Transaction;

/// Reasons a candidate block is refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Link mismatch: previous id {got} does not extend tip {expected}")]
    LinkMismatch { expected: String, got: String },

    #[error("Merkle root mismatch: declared {declared}, recomputed {computed}")]
    MerkleRootMismatch { declared: String, computed: String },

    #[error("Content mismatch: declared id {declared}, recomputed {computed}")]
    ContentMismatch { declared: String, computed: String },

    #[error("Shared secret mismatch")]
    SecretMismatch,
}

/// In-memory, append-only sequence of validated blocks
#[derive(Debug, Clone, Default)]
pub struct ChainStore {
    blocks: Vec<Block>,
}

impl ChainStore {
    /// Creates an empty chain
    pub fn new() -> Self {
        ChainStore { blocks: Vec::new() }
    }

    /// Gets the chain tip
    pub fn last_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Id of the chain tip, empty when the chain is empty
    pub fn tip_id(&self) -> String {
        self.last_block().map(|block| block.id.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Whether the candidate extends the current tip; anything extends an empty chain
    pub fn is_link_valid(&self, candidate: &Block) -> bool {
        self.last_block().map_or(true, |tip| candidate.previous_id == tip.id)
    }

    /// Whether the candidate matches the transactions this node holds for its round
    ///
    /// The Merkle root is recomputed from `known_transactions` and must equal
    /// the declared one; the id must then match the block's own fields.
    pub fn is_content_valid(&self, candidate: &Block, known_transactions: &[Transaction]) -> bool {
        compute_merkle_root(known_transactions) == candidate.merkle_root && candidate.calculate_id() == candidate.id
    }

    /// Checks that the candidate extends the current tip
    pub fn check_link(&self, candidate: &Block) -> Result<(), ValidationError> {
        if self.is_link_valid(candidate) {
            return Ok(());
        }

        Err(ValidationError::LinkMismatch {
            expected: self.tip_id(),
            got: candidate.previous_id.clone(),
        })
    }

    /// Checks the candidate's content, naming the first mismatch
    pub fn check_content(&self, candidate: &Block, known_transactions: &[Transaction]) -> Result<(), ValidationError> {
        if self.is_content_valid(candidate, known_transactions) {
            return Ok(());
        }

        let merkle_root = compute_merkle_root(known_transactions);
        if merkle_root != candidate.merkle_root {
            return Err(ValidationError::MerkleRootMismatch {
                declared: candidate.merkle_root.clone(),
                computed: merkle_root,
            });
        }

        Err(ValidationError::ContentMismatch {
            declared: candidate.id.clone(),
            computed: candidate.calculate_id(),
        })
    }

    /// Validates a candidate and appends it on success
    ///
    /// # Arguments
    ///
    /// * `candidate` - The received block
    /// * `known_transactions` - This node's transactions for the block's round
    ///
    /// # Returns
    ///
    /// The new tip, or the first failing check. A refused block leaves the
    /// chain untouched.
    pub fn try_append(&mut self, candidate: Block, known_transactions: &[Transaction]) -> Result<&Block, ValidationError> {
        self.check_link(&candidate)?;
        self.check_content(&candidate, known_transactions)?;

        Ok(self.append(candidate))
    }

    fn append(&mut self, block: Block) -> &Block {
        self.blocks.push(block);
        &self.blocks[self.blocks.len() - 1]
    }

    /// Validates the whole chain
    ///
    /// # Returns
    ///
    /// true if every block links to its predecessor and its id matches its fields
    pub fn is_valid(&self) -> bool {
        for (i, block) in self.blocks.iter().enumerate() {
            if block.id != block.calculate_id() {
                return false;
            }

            if i > 0 && block.previous_id != self.blocks[i - 1].id {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::compute_block_id;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::net::{IpAddr, Ipv4Addr};

    fn transactions(query_id: &str, count: u32) -> Vec<Transaction> {
        (1..=count)
            .map(|order| {
                Transaction::new(
                    query_id,
                    order,
                    IpAddr::V4(Ipv4Addr::new(10, 12, 0, order as u8 * 5)),
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                )
            })
            .collect()
    }

    fn first_block() -> Block {
        let merkle_root = compute_merkle_root(&[]);
        Block {
            id: compute_block_id("", "7", 1000, &merkle_root),
            previous_id: String::new(),
            nonce: "7".to_string(),
            timestamp: 1000,
            query_id: "q1".to_string(),
            merkle_root,
            crypto_piece: String::new(),
        }
    }

    #[test]
    fn test_empty_chain_accepts_first_block() {
        let mut chain = ChainStore::new();
        assert!(chain.last_block().is_none());

        let block = first_block();
        assert!(chain.is_link_valid(&block));
        assert!(chain.is_content_valid(&block, &[]));

        chain.try_append(block.clone(), &[]).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.last_block(), Some(&block));
    }

    #[test]
    fn test_link_mismatch_is_rejected() {
        let mut chain = ChainStore::new();
        chain.try_append(first_block(), &[]).unwrap();

        let merkle_root = compute_merkle_root(&[]);
        let candidate = Block {
            id: compute_block_id("Y", "1", 2000, &merkle_root),
            previous_id: "Y".to_string(),
            nonce: "1".to_string(),
            timestamp: 2000,
            query_id: "q2".to_string(),
            merkle_root,
            crypto_piece: String::new(),
        };

        assert!(!chain.is_link_valid(&candidate));
        let err = chain.try_append(candidate, &[]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::LinkMismatch {
                expected: chain.tip_id(),
                got: "Y".to_string()
            }
        );
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_tampered_id_is_rejected_even_when_linked() {
        let mut chain = ChainStore::new();
        let mut block = first_block();
        block.id = "00".repeat(32);

        assert!(chain.is_link_valid(&block));
        let err = chain.try_append(block, &[]).unwrap_err();
        assert!(matches!(err, ValidationError::ContentMismatch { .. }));
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn test_merkle_root_recomputed_from_known_transactions() {
        let mut chain = ChainStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let held = transactions("q1", 3);
        let block = Block::mine(String::new(), "q1".to_string(), &held, 1000, String::new(), &mut rng);

        assert!(!chain.is_content_valid(&block, &held[..2]));
        let err = chain.check_content(&block, &held[..2]).unwrap_err();
        assert!(matches!(err, ValidationError::MerkleRootMismatch { .. }));

        chain.try_append(block, &held).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_chain_links_hold_after_many_appends() {
        let mut chain = ChainStore::new();
        let mut rng = StdRng::seed_from_u64(42);

        for round in 0..6 {
            let query_id = format!("q{}", round);
            let held = transactions(&query_id, round);
            let block = Block::mine(chain.tip_id(), query_id, &held, 1000 + round as i64, String::new(), &mut rng);
            chain.try_append(block, &held).unwrap();
        }

        assert_eq!(chain.len(), 6);
        assert!(chain.is_valid());
        for i in 1..chain.len() {
            assert_eq!(chain.blocks()[i].previous_id, chain.blocks()[i - 1].id);
        }
    }
}
