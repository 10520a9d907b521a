//! Byte offset → (segment, slot, byte) decomposition

use std::fmt;

/// Location of a byte within the segment chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Segment index in the chain (0-based)
    pub segment: usize,
    /// Slot index within the segment
    pub slot: usize,
    /// Byte offset within the quantum
    pub byte: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "segment {} slot {} byte {}",
            self.segment, self.slot, self.byte
        )
    }
}

/// Translate a byte offset for a device laid out as `qset` quanta of
/// `quantum` bytes per segment.
///
/// `quantum` and `qset` must both be positive and their product must fit a
/// `u64`; `Sizing::item_size` checks this. Read and write share this
/// routine so they always agree on the layout.
pub fn translate(offset: u64, quantum: usize, qset: usize) -> Position {
    debug_assert!(quantum > 0 && qset > 0, "sizing must be positive");

    let quantum = quantum as u64;
    let item_size = quantum.saturating_mul(qset as u64);
    let rest = offset % item_size;

    Position {
        segment: (offset / item_size) as usize,
        slot: (rest / quantum) as usize,
        byte: (rest % quantum) as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_origin() {
        assert_eq!(
            translate(0, 4, 2),
            Position { segment: 0, slot: 0, byte: 0 }
        );
    }

    #[test]
    fn test_translate_small_layout() {
        // item size 8: [0..4) slot 0, [4..8) slot 1
        assert_eq!(translate(3, 4, 2), Position { segment: 0, slot: 0, byte: 3 });
        assert_eq!(translate(5, 4, 2), Position { segment: 0, slot: 1, byte: 1 });
        assert_eq!(translate(8, 4, 2), Position { segment: 1, slot: 0, byte: 0 });
        assert_eq!(translate(15, 4, 2), Position { segment: 1, slot: 1, byte: 3 });
    }

    #[test]
    fn test_translate_default_layout() {
        // 4000 * 1000 bytes per segment
        let pos = translate(4_000_000 + 4_001, 4000, 1000);
        assert_eq!(pos, Position { segment: 1, slot: 1, byte: 1 });
    }

    #[test]
    fn test_translate_recomposes() {
        let (quantum, qset) = (7usize, 3usize);
        for offset in 0..200u64 {
            let pos = translate(offset, quantum, qset);
            assert!(pos.slot < qset);
            assert!(pos.byte < quantum);
            let back = (pos.segment * quantum * qset + pos.slot * quantum + pos.byte) as u64;
            assert_eq!(back, offset);
        }
    }
}
