use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::crypto::{compute_block_id, compute_merkle_root};
use super::transaction::Transaction;

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Hash of the block's contents (hex)
    pub id: String,

    /// Id of the previous chain tip, empty for the first block
    #[serde(default)]
    pub previous_id: String,

    /// Opaque nonce
    pub nonce: String,

    /// Creation time in unix seconds
    pub timestamp: i64,

    /// Round that produced this block
    pub query_id: String,

    /// Merkle root of the round's transactions (hex)
    pub merkle_root: String,

    /// Shared secret presented by the miner
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub crypto_piece: String,
}

impl Block {
    /// Assembles a block from a round's transactions
    ///
    /// No difficulty target applies; the nonce is drawn once at random.
    ///
    /// # Arguments
    ///
    /// * `previous_id` - Id of the current chain tip, empty if the chain is empty
    /// * `query_id` - The round being closed
    /// * `transactions` - The round's transactions in ledger order
    /// * `timestamp` - Creation time in unix seconds
    /// * `crypto_piece` - Shared secret to present to validators
    /// * `rng` - Source of the nonce
    ///
    /// # Returns
    ///
    /// A block whose id matches its contents
    pub fn mine<R: Rng>(
        previous_id: String,
        query_id: String,
        transactions: &[Transaction],
        timestamp: i64,
        crypto_piece: String,
        rng: &mut R,
    ) -> Self {
        let nonce = rng.gen::<u32>().to_string();
        let merkle_root = compute_merkle_root(transactions);
        let id = compute_block_id(&previous_id, &nonce, timestamp, &merkle_root);

        Block {
            id,
            previous_id,
            nonce,
            timestamp,
            query_id,
            merkle_root,
            crypto_piece,
        }
    }

    /// Recomputes the id from the block's own declared fields
    pub fn calculate_id(&self) -> String {
        compute_block_id(&self.previous_id, &self.nonce, self.timestamp, &self.merkle_root)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{id: {}, previous: {}, nonce: {}, timestamp: {}, query: {}, merkle: {}}}",
            self.id, self.previous_id, self.nonce, self.timestamp, self.query_id, self.merkle_root
        )
    }
}
