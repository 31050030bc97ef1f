use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parameters of one consensus round
///
/// Created once by the round's root node and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Unique identifier of the round
    pub id: String,

    /// Round start time in unix seconds
    pub created_at: i64,

    /// Seconds after `created_at` at which the round force-closes
    pub time_limit: i64,

    /// Transaction count that force-closes the round
    pub number_limit: usize,

    /// Node that originates the next round
    pub next: IpAddr,

    /// Explicit hop path for this round, overriding the configured hop chain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<IpAddr>,
}

impl Query {
    /// Creates a new query with a fresh identifier
    ///
    /// # Arguments
    ///
    /// * `created_at` - Round start time in unix seconds
    /// * `time_limit` - Seconds until the round force-closes
    /// * `number_limit` - Transaction count that closes the round
    /// * `next` - The next leader
    ///
    /// # Returns
    ///
    /// A new Query instance with an empty explicit path
    pub fn new(created_at: i64, time_limit: i64, number_limit: usize, next: IpAddr) -> Self {
        Query {
            id: Uuid::new_v4().to_string(),
            created_at,
            time_limit,
            number_limit,
            next,
            path: Vec::new(),
        }
    }

    /// Sets an explicit hop path for the round
    pub fn with_path(mut self, path: Vec<IpAddr>) -> Self {
        self.path = path;
        self
    }

    /// Unix time at which the round closes by time
    pub fn deadline(&self) -> i64 {
        self.created_at.saturating_add(self.time_limit)
    }
}

/// One hop's attestation for a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Query this transaction answers
    pub query_id: String,

    /// 1-based position of the hop in the hop chain
    pub order: u32,

    /// Address of the attesting node
    pub actual_hop: IpAddr,

    /// Address of the preceding hop, unspecified for the first hop
    pub previous_hop: IpAddr,
}

impl Transaction {
    pub fn new(query_id: impl Into<String>, order: u32, actual_hop: IpAddr, previous_hop: IpAddr) -> Self {
        Transaction {
            query_id: query_id.into(),
            order,
            actual_hop,
            previous_hop,
        }
    }
}
