use std::net::{IpAddr, Ipv4Addr};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::blockchain::Query;

/// Previous hop recorded by the first node of a hop chain
pub const NULL_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Where a node sits in a round's hop chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopPosition {
    pub order: u32,
    pub previous_hop: IpAddr,
}

/// Hop chain and leader candidate set
///
/// A query's explicit `path` takes precedence over the configured chain. A
/// single-candidate set degenerates to a fixed leader for every round.
#[derive(Debug, Clone)]
pub struct Topology {
    hop_chain: Vec<IpAddr>,
    leader_candidates: Vec<IpAddr>,
}

impl Topology {
    pub fn new(hop_chain: Vec<IpAddr>, leader_candidates: Vec<IpAddr>) -> Self {
        Topology {
            hop_chain,
            leader_candidates,
        }
    }

    /// The configured hop chain, in hop order
    pub fn hop_chain(&self) -> &[IpAddr] {
        &self.hop_chain
    }

    /// Finds `me` in the hop chain that applies to `query`
    pub fn hop_position(&self, query: &Query, me: IpAddr) -> Option<HopPosition> {
        let chain = if query.path.is_empty() { &self.hop_chain } else { &query.path };
        let index = chain.iter().position(|hop| *hop == me)?;

        Some(HopPosition {
            order: index as u32 + 1,
            previous_hop: if index == 0 { NULL_HOST } else { chain[index - 1] },
        })
    }

    /// Draws the next leader uniformly from the candidate set
    ///
    /// Falls back to `current` when there are no candidates.
    pub fn choose_next_leader<R: Rng>(&self, current: IpAddr, rng: &mut R) -> IpAddr {
        self.leader_candidates.choose(rng).copied().unwrap_or(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 12, 0, last))
    }

    fn topology() -> Topology {
        Topology::new(vec![ip(5), ip(10), ip(15), ip(20)], vec![ip(1), ip(3), ip(7)])
    }

    #[test]
    fn test_static_hop_chain_positions() {
        let query = Query::new(0, 10, 4, ip(1));
        let topology = topology();

        assert_eq!(
            topology.hop_position(&query, ip(5)),
            Some(HopPosition { order: 1, previous_hop: NULL_HOST })
        );
        assert_eq!(
            topology.hop_position(&query, ip(15)),
            Some(HopPosition { order: 3, previous_hop: ip(10) })
        );
        assert_eq!(topology.hop_position(&query, ip(2)), None);
    }

    #[test]
    fn test_query_path_overrides_chain() {
        let query = Query::new(0, 10, 2, ip(1)).with_path(vec![ip(2), ip(5)]);
        let topology = topology();

        assert_eq!(
            topology.hop_position(&query, ip(5)),
            Some(HopPosition { order: 2, previous_hop: ip(2) })
        );
        assert_eq!(topology.hop_position(&query, ip(10)), None);
    }

    #[test]
    fn test_next_leader_drawn_from_candidates() {
        let topology = topology();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..50 {
            let leader = topology.choose_next_leader(ip(99), &mut rng);
            assert!([ip(1), ip(3), ip(7)].contains(&leader));
        }
    }

    #[test]
    fn test_single_candidate_keeps_leader() {
        let topology = Topology::new(vec![ip(5)], vec![ip(1)]);
        let mut rng = StdRng::seed_from_u64(3);

        assert_eq!(topology.choose_next_leader(ip(9), &mut rng), ip(1));
        assert_eq!(Topology::new(vec![], vec![]).choose_next_leader(ip(9), &mut rng), ip(9));
    }
}
