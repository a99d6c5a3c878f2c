//! Rarest-first assignment of pieces to holders.
use crate::entities::{Bitfield, PeerInfo};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

/// Which peers hold which pieces, as learned from their bitfields.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityMap {
    piece_count: u32,
    holders: BTreeMap<u32, Vec<PeerInfo>>,
}

impl AvailabilityMap {
    pub fn new(piece_count: u32) -> Self {
        Self {
            piece_count,
            holders: BTreeMap::new(),
        }
    }

    /// Records a peer's advertised pieces. Holders keep the order in which
    /// peers are recorded.
    pub fn record(&mut self, peer: &PeerInfo, bitfield: &Bitfield) {
        for index in bitfield.indices().filter(|i| *i < self.piece_count) {
            let holders = self.holders.entry(index).or_default();
            if !holders.iter().any(|h| h.peer_id == peer.peer_id) {
                holders.push(peer.clone());
            }
        }
    }

    pub fn holders(&self, index: u32) -> &[PeerInfo] {
        self.holders.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rarity(&self, index: u32) -> usize {
        self.holders(index).len()
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Held pieces ordered by ascending holder count, ties broken by index.
    pub fn rarest_first(&self) -> Vec<u32> {
        let mut order: Vec<u32> = self.holders.keys().copied().collect();
        order.sort_by_key(|index| (self.rarity(*index), *index));
        order
    }

    /// Pieces no probed peer advertised.
    pub fn unavailable(&self) -> Vec<u32> {
        (0..self.piece_count)
            .filter(|i| self.rarity(*i) == 0)
            .collect()
    }
}

/// First-choice holder for a piece, in transfer order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub index: u32,
    pub holder: PeerInfo,
}

#[derive(Default)]
struct SchedulerState {
    in_flight: HashMap<u32, PeerInfo>,
    tried: HashMap<u32, HashSet<String>>,
    completed: BTreeSet<u32>,
}

/// Hands out (piece, holder) pairs so that a piece is in flight from at most
/// one holder at a time and no holder is tried twice for the same piece.
pub struct PieceScheduler {
    availability: AvailabilityMap,
    state: Mutex<SchedulerState>,
}

impl PieceScheduler {
    pub fn new(availability: AvailabilityMap, already_held: impl IntoIterator<Item = u32>) -> Self {
        let state = SchedulerState {
            completed: already_held.into_iter().collect(),
            ..Default::default()
        };
        Self {
            availability,
            state: Mutex::new(state),
        }
    }

    pub fn availability(&self) -> &AvailabilityMap {
        &self.availability
    }

    /// Pieces still needed, in the order transfers should start.
    pub fn pending(&self) -> Vec<u32> {
        let completed = self.completed();
        self.availability
            .rarest_first()
            .into_iter()
            .filter(|i| !completed.contains(i))
            .collect()
    }

    /// The transfers this scheduler would start, without claiming them.
    pub fn plan(&self) -> Vec<Assignment> {
        self.pending()
            .into_iter()
            .filter_map(|index| {
                self.availability.holders(index).first().map(|holder| Assignment {
                    index,
                    holder: holder.clone(),
                })
            })
            .collect()
    }

    /// Claims the next untried holder for `index`. Returns `None` when the
    /// piece is done, already in flight, or every holder has been tried.
    pub fn next_holder(&self, index: u32) -> Option<PeerInfo> {
        let mut state = self.state.lock().ok()?;
        if state.completed.contains(&index) || state.in_flight.contains_key(&index) {
            return None;
        }

        let tried = state.tried.entry(index).or_default();
        let holder = self
            .availability
            .holders(index)
            .iter()
            .find(|h| !tried.contains(&h.peer_id))?
            .clone();
        tried.insert(holder.peer_id.clone());
        state.in_flight.insert(index, holder.clone());
        Some(holder)
    }

    pub fn complete(&self, index: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.in_flight.remove(&index);
            state.completed.insert(index);
        }
    }

    pub fn fail(&self, index: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.in_flight.remove(&index);
        }
    }

    pub fn completed(&self) -> BTreeSet<u32> {
        self.state
            .lock()
            .map(|state| state.completed.clone())
            .unwrap_or_default()
    }

    /// Indices in `0..piece_count` that are not yet held.
    pub fn missing(&self) -> Vec<u32> {
        let completed = self.completed();
        (0..self.availability.piece_count())
            .filter(|i| !completed.contains(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> PeerInfo {
        PeerInfo {
            peer_id: id.to_string(),
            ip: "127.0.0.1".to_string(),
            port: 6881,
        }
    }

    #[test]
    fn rarer_pieces_come_first() {
        let (a, b) = (peer("A"), peer("B"));
        let mut availability = AvailabilityMap::new(2);
        availability.record(&a, &Bitfield::from_indices([0, 1], 2));
        availability.record(&b, &Bitfield::from_indices([0], 2));

        let scheduler = PieceScheduler::new(availability, []);
        let plan = scheduler.plan();

        assert_eq!(plan[0], Assignment { index: 1, holder: a.clone() });
        assert_eq!(plan[1], Assignment { index: 0, holder: a });
    }

    #[test]
    fn ties_break_by_lower_index() {
        let a = peer("A");
        let mut availability = AvailabilityMap::new(4);
        availability.record(&a, &Bitfield::from_indices([3, 1, 2], 4));

        assert_eq!(availability.rarest_first(), vec![1, 2, 3]);
        assert_eq!(availability.unavailable(), vec![0]);
    }

    #[test]
    fn a_piece_is_in_flight_from_one_holder_at_a_time() {
        let (a, b) = (peer("A"), peer("B"));
        let mut availability = AvailabilityMap::new(1);
        availability.record(&a, &Bitfield::from_indices([0], 1));
        availability.record(&b, &Bitfield::from_indices([0], 1));
        let scheduler = PieceScheduler::new(availability, []);

        assert_eq!(scheduler.next_holder(0), Some(a));
        assert_eq!(scheduler.next_holder(0), None);

        scheduler.fail(0);
        assert_eq!(scheduler.next_holder(0), Some(b));

        scheduler.fail(0);
        assert_eq!(scheduler.next_holder(0), None);
        assert_eq!(scheduler.missing(), vec![0]);
    }

    #[test]
    fn already_held_pieces_are_not_scheduled() {
        let a = peer("A");
        let mut availability = AvailabilityMap::new(3);
        availability.record(&a, &Bitfield::from_indices([0, 1, 2], 3));
        let scheduler = PieceScheduler::new(availability, [1]);

        assert_eq!(scheduler.pending(), vec![0, 2]);
        assert_eq!(scheduler.next_holder(1), None);

        scheduler.complete(0);
        scheduler.complete(2);
        assert!(scheduler.missing().is_empty());
    }
}
