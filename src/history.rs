//! C11 — History Buffer: a circular log of TX/RX CAN frames, for the
//! optional buffer-dump command.

use crate::can_frame::CanMsgBuffer;

/// Which direction a [`HistoryEntry`] travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Adapter to ECU.
    Tx,
    /// ECU to adapter.
    Rx,
}

/// One logged frame.
#[derive(Debug, Clone, Copy)]
pub struct HistoryEntry {
    /// Direction the frame travelled.
    pub direction: Direction,
    /// CAN identifier.
    pub id: u32,
    /// Data bytes (only `dlc` are meaningful).
    pub data: [u8; 8],
    /// Data length code.
    pub dlc: u8,
    /// Sequence number assigned at insertion time.
    pub sequence: u32,
}

/// A fixed-capacity ring buffer of [`HistoryEntry`]; the oldest entry is
/// overwritten once full.
#[derive(Debug, Clone)]
pub struct History {
    capacity: usize,
    entries: Vec<HistoryEntry>,
    next_sequence: u32,
}

impl History {
    /// Builds an empty history with room for `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        History {
            capacity: capacity.max(1),
            entries: Vec::with_capacity(capacity),
            next_sequence: 0,
        }
    }

    /// Logs a CAN frame, assigning it the next sequence number.
    pub fn add(&mut self, direction: Direction, frame: &CanMsgBuffer) {
        let entry = HistoryEntry {
            direction,
            id: frame.id,
            data: frame.data,
            dlc: frame.dlc,
            sequence: self.next_sequence,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);
        if self.entries.len() == self.capacity {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    /// All currently-held entries, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Clears all entries without resetting the sequence counter.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest() {
        let mut h = History::new(2);
        h.add(Direction::Tx, &CanMsgBuffer::new(0x1, false, 1, &[]));
        h.add(Direction::Rx, &CanMsgBuffer::new(0x2, false, 1, &[]));
        h.add(Direction::Rx, &CanMsgBuffer::new(0x3, false, 1, &[]));
        let ids: Vec<u32> = h.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0x2, 0x3]);
    }

    #[test]
    fn sequence_numbers_increase_monotonically() {
        let mut h = History::new(4);
        h.add(Direction::Tx, &CanMsgBuffer::new(0x1, false, 1, &[]));
        h.add(Direction::Tx, &CanMsgBuffer::new(0x2, false, 1, &[]));
        let seqs: Vec<u32> = h.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1]);
    }
}
