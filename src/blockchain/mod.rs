// Blockchain module
//
// This module contains the data model and pure logic of the node:
// - Hashing and Merkle utilities
// - Packet envelope and payload variants
// - Query and transaction records
// - Block structure and mining
// - Chain store
// - Query/transaction ledger

pub mod block;
pub mod chain;
pub mod crypto;
pub mod ledger;
pub mod packet;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{ChainStore, ValidationError};
pub use ledger::{Ledger, QueryRecord};
pub use packet::{Message, Packet};
pub use transaction::{Query, Transaction};
