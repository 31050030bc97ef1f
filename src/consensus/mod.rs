// Consensus module
//
// The node's state machine and the policy it runs on:
// - Hop chain and leader selection
// - Packet dispatch, election trigger, block validation, round continuation
// - The single-writer loop that feeds it

pub mod driver;
pub mod engine;
pub mod topology;

pub use driver::drive;
pub use engine::{ConsensusEngine, EngineSettings, Event};
pub use topology::Topology;
