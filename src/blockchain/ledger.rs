use std::collections::{HashMap, HashSet};
use std::fmt;

use super::transaction::{Query, Transaction};

/// Outcome of recording a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRecord {
    /// First time this id is seen
    Inserted,
    /// Same id with identical parameters, already held
    Duplicate,
    /// Same id with different parameters; the held query is kept
    Conflict,
}

/// Why a round closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionReason {
    NumberLimit,
    TimeLimit,
}

impl fmt::Display for ElectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionReason::NumberLimit => write!(f, "transaction number limit reached"),
            ElectionReason::TimeLimit => write!(f, "time limit reached"),
        }
    }
}

/// Per-query transaction accumulation and the originating queries
#[derive(Debug, Default)]
pub struct Ledger {
    queries: HashMap<String, Query>,
    transactions: HashMap<String, Vec<Transaction>>,
    elections: HashSet<String>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a query by id
    ///
    /// A query id is never overwritten: a conflicting re-record is refused
    /// so that in-flight limits cannot change under a running round.
    pub fn record_query(&mut self, query: Query) -> QueryRecord {
        match self.queries.get(&query.id) {
            Some(held) if *held == query => QueryRecord::Duplicate,
            Some(_) => QueryRecord::Conflict,
            None => {
                self.queries.insert(query.id.clone(), query);
                QueryRecord::Inserted
            }
        }
    }

    /// Appends a transaction under its query id, returning the new count
    pub fn record_transaction(&mut self, transaction: Transaction) -> usize {
        let held = self.transactions.entry(transaction.query_id.clone()).or_default();
        held.push(transaction);
        held.len()
    }

    pub fn query(&self, query_id: &str) -> Option<&Query> {
        self.queries.get(query_id)
    }

    /// Transactions held for a query, in insertion order
    pub fn transactions(&self, query_id: &str) -> &[Transaction] {
        self.transactions.get(query_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct queries recorded so far
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    /// Evaluates the close criteria for a round
    ///
    /// The count check runs first, so it wins when both limits are met.
    /// Unknown queries never close.
    pub fn election_reason(&self, query_id: &str, now: i64) -> Option<ElectionReason> {
        let query = self.queries.get(query_id)?;

        if self.transactions(query_id).len() >= query.number_limit {
            Some(ElectionReason::NumberLimit)
        } else if now >= query.deadline() {
            Some(ElectionReason::TimeLimit)
        } else {
            None
        }
    }

    pub fn should_trigger_election(&self, query_id: &str, now: i64) -> bool {
        self.election_reason(query_id, now).is_some()
    }

    /// Marks the election for a query as launched
    ///
    /// # Returns
    ///
    /// true the first time, false if it was already launched
    pub fn mark_election(&mut self, query_id: &str) -> bool {
        self.elections.insert(query_id.to_string())
    }
}
