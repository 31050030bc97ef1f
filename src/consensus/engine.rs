use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rand::Rng;

use crate::blockchain::{
    Block, ChainStore, Ledger, Message, Packet, Query, QueryRecord, Transaction, ValidationError,
};
use crate::config::NodeConfig;

use super::topology::Topology;

/// Consensus state of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    AwaitingQuery,
    Resolving,
    AwaitingConsensus,
    Validating,
    Terminated,
}

/// Inputs processed by the engine, one at a time
#[derive(Debug, Clone)]
pub enum Event {
    /// A decoded packet from the network boundary
    Inbound(Packet),
    /// Time for the root node to open a round
    StartRound,
    /// A query's time limit has elapsed
    Deadline(String),
}

/// Outputs of handling an event, carried out by the runtime
#[derive(Debug, Clone)]
pub enum Effect {
    Send(Packet),
    SendAfter(Packet, Duration),
    /// Feed an event back into the engine after a delay
    Schedule(Event, Duration),
    Terminate,
}

/// Tunables the engine reads once at construction
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub me: IpAddr,
    pub root_node: IpAddr,
    pub crypto_piece: String,
    pub max_rounds: usize,
    pub query_time_limit_secs: i64,
    pub query_number_limit: usize,
    pub first_round_delay: Duration,
    pub next_round_delay: Duration,
    pub max_jitter_ms: u64,
    pub deadline_timer: bool,
    pub announce_hop_path: bool,
}

impl EngineSettings {
    pub fn from_config(config: &NodeConfig, me: IpAddr) -> Self {
        EngineSettings {
            me,
            root_node: config.root_node,
            crypto_piece: config.crypto_piece.clone(),
            max_rounds: config.max_rounds,
            query_time_limit_secs: config.query_time_limit_secs,
            query_number_limit: config.query_number_limit,
            first_round_delay: config.first_round_delay(),
            next_round_delay: config.next_round_delay(),
            max_jitter_ms: config.max_jitter_ms,
            deadline_timer: config.deadline_timer,
            announce_hop_path: config.announce_hop_path,
        }
    }
}

/// The node's consensus state machine
///
/// Sole owner of the chain, the query table and the transaction ledger.
/// Handling is synchronous and never sleeps; delays are returned as effects.
pub struct ConsensusEngine<R: Rng> {
    settings: EngineSettings,
    topology: Topology,
    chain: ChainStore,
    ledger: Ledger,
    state: NodeState,
    root_node: IpAddr,
    /// Round this node opened, with its start time in nanoseconds
    origin: Option<(String, i64)>,
    mined: HashSet<String>,
    rng: R,
}

impl<R: Rng> ConsensusEngine<R> {
    pub fn new(settings: EngineSettings, topology: Topology, rng: R) -> Self {
        let root_node = settings.root_node;
        ConsensusEngine {
            settings,
            topology,
            chain: ChainStore::new(),
            ledger: Ledger::new(),
            state: NodeState::Idle,
            root_node,
            origin: None,
            mined: HashSet::new(),
            rng,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn chain(&self) -> &ChainStore {
        &self.chain
    }

    /// Rounds seen so far, counted per distinct query
    pub fn rounds(&self) -> usize {
        self.ledger.query_count()
    }

    fn is_root(&self) -> bool {
        self.settings.me == self.root_node
    }

    /// Enters the protocol; the root node schedules the first round
    pub fn start(&mut self) -> Vec<Effect> {
        self.state = NodeState::AwaitingQuery;

        if self.is_root() {
            info!("Node {} is the root node, first round in {:?}", self.settings.me, self.settings.first_round_delay);
            vec![Effect::Schedule(Event::StartRound, self.settings.first_round_delay)]
        } else {
            Vec::new()
        }
    }

    /// Processes one event
    ///
    /// Per-packet failures are logged here and never returned.
    pub fn handle(&mut self, event: Event, now: DateTime<Utc>) -> Vec<Effect> {
        if self.state == NodeState::Terminated {
            debug!("Ignoring {:?} after termination", event);
            return Vec::new();
        }

        match event {
            Event::Inbound(packet) => self.handle_packet(packet, now),
            Event::StartRound => self.start_round(now),
            Event::Deadline(query_id) => self.on_deadline(&query_id, now),
        }
    }

    fn handle_packet(&mut self, packet: Packet, now: DateTime<Utc>) -> Vec<Effect> {
        if !packet.is_valid(&self.settings.crypto_piece) {
            warn!("Dropping packet {} from {}: {}", packet.id, packet.source, ValidationError::SecretMismatch);
            if let Some(block) = &packet.block {
                debug!("BLOCK_INVALID_{}=1", block.query_id);
            }
            return Vec::new();
        }

        let id = packet.id.clone();
        let source = packet.source;

        let message = match packet.into_message() {
            Ok(message) => message,
            Err(err) => {
                error!("Dropping packet {} from {}: {}", id, source, err);
                return Vec::new();
            }
        };

        match message {
            Message::Query(query) => {
                info!("Packet with Query {} from {}", query.id, source);
                self.on_query(query, now)
            }
            Message::Transaction(transaction) => {
                info!("Packet with Transaction for {} from {} (packet {})", transaction.query_id, source, id);
                self.on_transaction(transaction, now)
            }
            Message::Block(block) => {
                info!("Packet with Block {} (previous {}, nonce {})", block.id, block.previous_id, block.nonce);
                self.on_block(block, now)
            }
            Message::ElectionLaunch { query, transactions } => self.on_election_launch(query, transactions, now),
            Message::Ping => {
                info!("Receiving PING from {} with ID = {}", source, id);
                vec![Effect::Send(Packet::pong(self.settings.me, source))]
            }
            Message::Pong => {
                debug!("PONG from {}", source);
                Vec::new()
            }
            Message::LastBlock(block) => {
                debug!("Peer {} announced tip {}", source, block.id);
                Vec::new()
            }
        }
    }

    fn start_round(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if !self.is_root() {
            self.state = NodeState::AwaitingQuery;
            return Vec::new();
        }
        if self.rounds() >= self.settings.max_rounds {
            debug!("Round limit reached, not opening another round");
            return Vec::new();
        }

        let next = self.topology.choose_next_leader(self.settings.me, &mut self.rng);
        let mut query = Query::new(
            now.timestamp(),
            self.settings.query_time_limit_secs,
            self.settings.query_number_limit,
            next,
        );
        if self.settings.announce_hop_path {
            query = query.with_path(self.topology.hop_chain().to_vec());
        }

        let started = now.timestamp_nanos_opt().unwrap_or_default();
        self.origin = Some((query.id.clone(), started));
        info!("The leader has been chosen, {} opens round {} (next {})", self.settings.me, query.id, next);
        debug!("QUERY_START={}", started);

        let mut effects = vec![Effect::Send(Packet::query(self.settings.me, query.clone()))];
        effects.extend(self.on_query(query, now));
        effects
    }

    fn on_query(&mut self, query: Query, now: DateTime<Utc>) -> Vec<Effect> {
        match self.ledger.record_query(query.clone()) {
            QueryRecord::Inserted => {}
            QueryRecord::Duplicate => {
                debug!("Query {} already recorded", query.id);
                return Vec::new();
            }
            QueryRecord::Conflict => {
                warn!("Query {} re-sent with different parameters, keeping the first", query.id);
                return Vec::new();
            }
        }

        self.root_node = query.next;
        self.state = NodeState::Resolving;

        let mut effects = Vec::new();

        if self.settings.deadline_timer {
            // Peer-supplied times may sit at the edges of the i64 range
            let remaining = query.deadline().saturating_sub(now.timestamp()).max(0) as u64;
            effects.push(Effect::Schedule(Event::Deadline(query.id.clone()), Duration::from_secs(remaining)));
        }

        if let Some(effect) = self.resolve_query(&query) {
            effects.push(effect);
        }

        // Transactions may have outrun their query
        if !self.ledger.transactions(&query.id).is_empty() {
            effects.extend(self.evaluate_election(&query.id, now));
        }

        self.state = NodeState::AwaitingConsensus;
        effects
    }

    fn resolve_query(&mut self, query: &Query) -> Option<Effect> {
        let me = self.settings.me;
        let position = self.topology.hop_position(query, me)?;

        let transaction = Transaction::new(query.id.clone(), position.order, me, position.previous_hop);
        let delay = Duration::from_millis(self.rng.gen_range(0..=self.settings.max_jitter_ms));

        info!("Node {} reporting for duty as hop {}, answering in {:?}", me, position.order, delay);
        Some(Effect::SendAfter(Packet::transaction(me, transaction), delay))
    }

    fn on_transaction(&mut self, transaction: Transaction, now: DateTime<Utc>) -> Vec<Effect> {
        let query_id = transaction.query_id.clone();
        let count = self.ledger.record_transaction(transaction);

        match self.ledger.query(&query_id) {
            Some(query) => debug!("{} transactions for {} (limit {})", count, query_id, query.number_limit),
            None => {
                warn!("Transaction for unknown query {}, holding it", query_id);
                return Vec::new();
            }
        }

        self.evaluate_election(&query_id, now).into_iter().collect()
    }

    fn on_deadline(&mut self, query_id: &str, now: DateTime<Utc>) -> Vec<Effect> {
        if self.ledger.transactions(query_id).is_empty() {
            warn!("Round {} timed out without transactions", query_id);
            return Vec::new();
        }
        self.evaluate_election(query_id, now).into_iter().collect()
    }

    fn evaluate_election(&mut self, query_id: &str, now: DateTime<Utc>) -> Option<Effect> {
        let now = now.timestamp();
        if !self.ledger.should_trigger_election(query_id, now) {
            info!("Criteria has not been met for the election of {}", query_id);
            return None;
        }
        if !self.ledger.mark_election(query_id) {
            debug!("Election for {} already launched", query_id);
            return None;
        }

        let query = self.ledger.query(query_id)?.clone();
        if let Some(reason) = self.ledger.election_reason(query_id, now) {
            info!("Launching election for {}: {}", query_id, reason);
        }

        let transactions = self.ledger.transactions(query_id).to_vec();
        Some(Effect::Send(Packet::election_launch(self.settings.me, query, transactions)))
    }

    fn on_election_launch(&mut self, query: Query, carried: Vec<Transaction>, now: DateTime<Utc>) -> Vec<Effect> {
        if query.next != self.settings.me {
            debug!("Election for {} belongs to {}", query.id, query.next);
            return Vec::new();
        }
        if !self.mined.insert(query.id.clone()) {
            debug!("Already mined a block for {}", query.id);
            return Vec::new();
        }

        // With no transactions of its own, the leader records the carried set
        if self.ledger.transactions(&query.id).is_empty() {
            for transaction in carried.into_iter().filter(|t| t.query_id == query.id) {
                self.ledger.record_transaction(transaction);
            }
        }
        let transactions = self.ledger.transactions(&query.id);

        let block = Block::mine(
            self.chain.tip_id(),
            query.id.clone(),
            transactions,
            now.timestamp(),
            self.settings.crypto_piece.clone(),
            &mut self.rng,
        );

        info!("Mined block {} for {} over {} transactions", block.id, query.id, transactions.len());
        vec![Effect::Send(Packet::block(self.settings.me, block))]
    }

    fn on_block(&mut self, block: Block, now: DateTime<Utc>) -> Vec<Effect> {
        self.state = NodeState::Validating;
        let query_id = block.query_id.clone();

        let known = self.ledger.transactions(&query_id);
        let tip = match self.chain.try_append(block, known) {
            Ok(tip) => tip.clone(),
            Err(err) => {
                info!("Block for {} NOT valid: {}", query_id, err);
                debug!("BLOCK_INVALID_{}=1", query_id);
                self.state = NodeState::AwaitingConsensus;
                return Vec::new();
            }
        };

        info!("Block {} IS valid", tip.id);
        debug!("BLOCK_VALID_{}=1", query_id);
        self.measure_completion(&query_id, now);

        info!("----- This is the blockchain (valid: {})", self.chain.is_valid());
        for (index, block) in self.chain.blocks().iter().enumerate() {
            info!("{} {}", index, block);
        }
        info!("----- --------");

        let mut effects = vec![Effect::Send(Packet::last_block(self.settings.me, tip))];
        effects.extend(self.continuity());
        effects
    }

    fn measure_completion(&mut self, query_id: &str, now: DateTime<Utc>) {
        if let Some((origin_id, started)) = &self.origin {
            if origin_id == query_id {
                let elapsed = now.timestamp_nanos_opt().unwrap_or_default() - started;
                debug!("QUERY_COMPLETE={}", elapsed);
                self.origin = None;
            }
        }
    }

    fn continuity(&mut self) -> Vec<Effect> {
        let rounds = self.rounds();

        if rounds < self.settings.max_rounds {
            info!("New query, count = {}", rounds);
            self.state = NodeState::Idle;
            vec![Effect::Schedule(Event::StartRound, self.settings.next_round_delay)]
        } else {
            info!("Completed {} rounds, terminating", rounds);
            debug!("PLEASE_EXIT=1234");
            self.state = NodeState::Terminated;
            vec![Effect::Terminate]
        }
    }
}
