use std::fmt;
use std::net::IpAddr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::block::Block;
use super::crypto::secret_matches;
use super::transaction::{Query, Transaction};

/// Errors that can occur while reading or writing packets
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Missing {0} payload")]
    MissingPayload(PacketType),
}

/// Kind of a packet on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    Query,
    Transaction,
    Block,
    LastBlock,
    Ping,
    Pong,
    ElectionLaunch,
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Envelope for every message on the wire
///
/// `packet_type` decides which payload field is meaningful; the others are
/// ignored. Use [`Packet::into_message`] to get the typed view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub id: String,

    #[serde(rename = "type")]
    pub packet_type: PacketType,

    pub source: IpAddr,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<IpAddr>,

    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,

    /// Transaction set carried by an election launch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<Transaction>,
}

/// Typed view of a packet's payload
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Query(Query),
    Transaction(Transaction),
    Block(Block),
    LastBlock(Block),
    Ping,
    Pong,
    ElectionLaunch { query: Query, transactions: Vec<Transaction> },
}

impl Packet {
    fn envelope(packet_type: PacketType, source: IpAddr) -> Self {
        Packet {
            id: Uuid::new_v4().to_string(),
            packet_type,
            source,
            destination: None,
            timestamp: Utc::now().timestamp(),
            query: None,
            transaction: None,
            block: None,
            transactions: Vec::new(),
        }
    }

    pub fn query(source: IpAddr, query: Query) -> Self {
        Packet {
            query: Some(query),
            ..Self::envelope(PacketType::Query, source)
        }
    }

    pub fn transaction(source: IpAddr, transaction: Transaction) -> Self {
        Packet {
            transaction: Some(transaction),
            ..Self::envelope(PacketType::Transaction, source)
        }
    }

    pub fn block(source: IpAddr, block: Block) -> Self {
        Packet {
            block: Some(block),
            ..Self::envelope(PacketType::Block, source)
        }
    }

    /// Announces a newly appended chain tip
    pub fn last_block(source: IpAddr, block: Block) -> Self {
        Packet {
            block: Some(block),
            ..Self::envelope(PacketType::LastBlock, source)
        }
    }

    #[cfg(test)]
    pub fn ping(source: IpAddr) -> Self {
        Self::envelope(PacketType::Ping, source)
    }

    pub fn pong(source: IpAddr, destination: IpAddr) -> Self {
        Packet {
            destination: Some(destination),
            ..Self::envelope(PacketType::Pong, source)
        }
    }

    /// Asks the round's leader to start mining
    pub fn election_launch(source: IpAddr, query: Query, transactions: Vec<Transaction>) -> Self {
        Packet {
            query: Some(query),
            transactions,
            ..Self::envelope(PacketType::ElectionLaunch, source)
        }
    }

    /// Parses a packet from its wire form
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        serde_json::from_slice(bytes).map_err(PacketError::Decode)
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        serde_json::to_vec(self).map_err(PacketError::Encode)
    }

    /// Shared-secret gate for block-carrying packets
    ///
    /// Other packet kinds always pass. A block packet without a block passes
    /// too and is refused by `into_message` as a missing payload.
    pub fn is_valid(&self, shared_secret: &str) -> bool {
        match self.packet_type {
            PacketType::Block | PacketType::LastBlock => self
                .block
                .as_ref()
                .map_or(true, |block| secret_matches(shared_secret, &block.crypto_piece)),
            _ => true,
        }
    }

    /// Extracts the payload matching the packet type
    ///
    /// A transaction with an empty query id counts as missing.
    pub fn into_message(self) -> Result<Message, PacketError> {
        let missing = PacketError::MissingPayload(self.packet_type);

        match self.packet_type {
            PacketType::Query => self.query.map(Message::Query).ok_or(missing),
            PacketType::Transaction => self
                .transaction
                .filter(|transaction| !transaction.query_id.is_empty())
                .map(Message::Transaction)
                .ok_or(missing),
            PacketType::Block => self.block.map(Message::Block).ok_or(missing),
            PacketType::LastBlock => self.block.map(Message::LastBlock).ok_or(missing),
            PacketType::Ping => Ok(Message::Ping),
            PacketType::Pong => Ok(Message::Pong),
            PacketType::ElectionLaunch => self
                .query
                .map(|query| Message::ElectionLaunch {
                    query,
                    transactions: self.transactions,
                })
                .ok_or(missing),
        }
    }
}
