//! A handler's time-ordered sequence of revisions.

use crate::rid::Rid;

/// Ascending-by-`Rid` sequence of revisions for one handler path.
///
/// Insertion always finds the chronological position via binary search;
/// `Rid`'s total order (timestamp, then counter, then slug) keeps the
/// sequence strictly ordered even when two revisions share a second.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    rids: Vec<Rid>,
}

impl Timeline {
    pub fn new() -> Self {
        Self { rids: Vec::new() }
    }

    pub fn insert(&mut self, rid: Rid) {
        let pos = self.rids.partition_point(|r| r < &rid);
        self.rids.insert(pos, rid);
    }

    pub fn remove(&mut self, rid: &Rid) {
        if let Ok(pos) = self.rids.binary_search(rid) {
            self.rids.remove(pos);
        }
    }

    /// Latest revision whose embedded timestamp is <= `seconds`, or
    /// `None` if no revision qualifies.
    pub fn get_at(&self, seconds: u64) -> Option<&Rid> {
        let pos = self.rids.partition_point(|r| r.timestamp_seconds() <= seconds);
        if pos == 0 {
            None
        } else {
            self.rids.get(pos - 1)
        }
    }

    pub fn latest(&self) -> Option<&Rid> {
        self.rids.last()
    }

    pub fn contains(&self, rid: &Rid) -> bool {
        self.rids.binary_search(rid).is_ok()
    }

    pub fn is_sorted(&self) -> bool {
        self.rids.windows(2).all(|w| w[0] < w[1])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rid> {
        self.rids.iter()
    }

    pub fn len(&self) -> usize {
        self.rids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_chronological_order_regardless_of_insertion_order() {
        let mut tl = Timeline::new();
        tl.insert(Rid::new(300, "c", 0));
        tl.insert(Rid::new(100, "a", 0));
        tl.insert(Rid::new(200, "b", 0));

        let seconds: Vec<u64> = tl.iter().map(|r| r.timestamp_seconds()).collect();
        assert_eq!(seconds, vec![100, 200, 300]);
        assert!(tl.is_sorted());
    }

    #[test]
    fn get_at_returns_floor() {
        let mut tl = Timeline::new();
        let v1 = Rid::new(1732186200, "users", 1);
        let v2 = Rid::new(1732186300, "users", 2);
        let v3 = Rid::new(1732186400, "users", 3);
        tl.insert(v1.clone());
        tl.insert(v2.clone());
        tl.insert(v3.clone());

        assert_eq!(tl.get_at(1732186250), Some(&v1));
        assert_eq!(tl.get_at(1732186400), Some(&v3));
        assert_eq!(tl.get_at(0), None);
        assert_eq!(tl.get_at(u64::MAX), Some(&v3));
    }

    #[test]
    fn get_at_is_monotonic_in_query_timestamp() {
        let mut tl = Timeline::new();
        tl.insert(Rid::new(10, "a", 0));
        tl.insert(Rid::new(20, "b", 0));
        tl.insert(Rid::new(30, "c", 0));

        let at10 = tl.get_at(10).cloned();
        let at25 = tl.get_at(25).cloned();
        assert!(at10 <= at25);
    }
}
