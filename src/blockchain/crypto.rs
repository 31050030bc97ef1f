use sha2::{Digest, Sha256};

use super::transaction::Transaction;

/// Raw SHA-256 output
pub type Hash = [u8; 32];

/// Computes the SHA-256 digest of the given bytes
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes SHA-256 twice (digest of the digest) and hex-encodes the result
pub fn double_sha256_hex(data: &[u8]) -> String {
    let first = sha256(data);
    hex::encode(sha256(&first))
}

/// Derives the identifier of a block
///
/// The four fields are concatenated in their canonical string form
/// (the timestamp as a base-10 integer) and double hashed.
///
/// # Arguments
///
/// * `previous_id` - Id of the chain tip the block extends, empty for the first block
/// * `nonce` - The block nonce
/// * `timestamp` - Block creation time in unix seconds
/// * `merkle_root` - Hex-encoded Merkle root of the round's transactions
///
/// # Returns
///
/// The hex-encoded block id
pub fn compute_block_id(previous_id: &str, nonce: &str, timestamp: i64, merkle_root: &str) -> String {
    let mut concat = String::with_capacity(previous_id.len() + nonce.len() + 20 + merkle_root.len());
    concat.push_str(previous_id);
    concat.push_str(nonce);
    concat.push_str(&timestamp.to_string());
    concat.push_str(merkle_root);

    double_sha256_hex(concat.as_bytes())
}

/// Digest of a single transaction, used as a Merkle leaf
pub fn transaction_digest(transaction: &Transaction) -> Hash {
    let canonical = format!(
        "{}{}{}{}",
        transaction.query_id, transaction.order, transaction.actual_hop, transaction.previous_hop
    );
    sha256(canonical.as_bytes())
}

/// Computes the Merkle root over a round's transactions
///
/// Leaves are taken in the order given, which is the insertion order of the
/// per-query ledger. Each level pairs adjacent nodes and hashes their
/// concatenation; an odd node at the end of a level is paired with itself.
/// An empty set yields the digest of empty input, a single transaction
/// yields its own leaf digest.
///
/// # Returns
///
/// The hex-encoded root
pub fn compute_merkle_root(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return hex::encode(sha256(&[]));
    }

    let mut level: Vec<Hash> = transactions.iter().map(transaction_digest).collect();

    while level.len() > 1 {
        let mut next: Vec<Hash> = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };

            let mut hasher = Sha256::new();
            hasher.update(left);
            hasher.update(right);
            next.push(hasher.finalize().into());
        }
        level = next;
    }

    hex::encode(level[0])
}

/// Shared-secret ("crypto piece") gate for blocks
///
/// This is a simulation stand-in for authenticity, not a signature check:
/// anyone who knows the configured string passes. An empty configured
/// secret disables the gate.
pub fn secret_matches(configured: &str, presented: &str) -> bool {
    configured.is_empty() || configured == presented
}
