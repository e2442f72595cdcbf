use crate::geometry::Region;
use std::collections::VecDeque;

/// Number of past frames whose damage is remembered per output.
pub const DAMAGE_HISTORY_CAPACITY: usize = 10;

/// Newest-first log of the damage presented in past frames.
#[derive(Debug, Clone, Default)]
pub struct DamageHistory {
    entries: VecDeque<Region>,
}

impl DamageHistory {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(DAMAGE_HISTORY_CAPACITY),
        }
    }

    /// Records the damage of a presented frame, evicting the oldest entry at capacity.
    pub fn push(&mut self, damage: Region) {
        if self.entries.len() == DAMAGE_HISTORY_CAPACITY {
            self.entries.pop_back();
        }
        self.entries.push_front(damage);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry `index`, zero being the most recent frame.
    pub fn get(&self, index: usize) -> Option<&Region> {
        self.entries.get(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Union of the newest `age - 1` entries: everything that changed since a
    /// buffer of that age was last on screen.
    ///
    /// `None` when the history cannot tell: age zero (undefined contents) or an
    /// age beyond the recorded depth.
    pub fn accumulate(&self, age: u32) -> Option<Region> {
        let age = age as usize;
        if age == 0 || age > self.entries.len() {
            return None;
        }
        let mut region = Region::new();
        for entry in self.entries.iter().take(age - 1) {
            region.union_with(entry);
        }
        Some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use pretty_assertions::assert_eq;

    fn damage(x: i32) -> Region {
        Region::from_rect(Rect::new(x, 0, 10, 10))
    }

    #[test]
    fn accumulates_the_entries_newer_than_the_buffer() {
        let mut history = DamageHistory::new();
        history.push(damage(200));
        history.push(damage(100));
        history.push(damage(0));
        // [D1 = 0, D2 = 100, D3 = 200]
        assert_eq!(history.accumulate(3), Some(damage(0).union(&damage(100))));
        assert_eq!(history.accumulate(1), Some(Region::new()));
        assert_eq!(history.accumulate(0), None);
        assert_eq!(history.accumulate(4), None);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut history = DamageHistory::new();
        for i in 0..12 {
            history.push(damage(i * 10));
        }
        assert_eq!(history.len(), DAMAGE_HISTORY_CAPACITY);
        assert_eq!(history.get(0), Some(&damage(110)));
        assert_eq!(history.get(DAMAGE_HISTORY_CAPACITY - 1), Some(&damage(20)));
    }
}
