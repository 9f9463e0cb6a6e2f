use std::cmp::Ordering;

/// Position of an entry in the pool.
///
/// Sorts by priority descending, then by admission sequence ascending, so a
/// forward walk of an ordered map yields drain order and ties keep FIFO.
#[derive(Debug, Clone, Copy)]
pub struct PriorityKey {
    pub priority: f64,
    pub seq: u64,
}

impl PriorityKey {
    pub fn new(priority: f64, seq: u64) -> Self {
        PriorityKey { priority, seq }
    }
}

impl PartialEq for PriorityKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityKey {}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_priority_first() {
        let mut keys = vec![
            PriorityKey::new(0.2, 0),
            PriorityKey::new(0.9, 3),
            PriorityKey::new(0.6, 1),
        ];
        keys.sort();
        let order: Vec<f64> = keys.iter().map(|k| k.priority).collect();
        assert_eq!(order, vec![0.9, 0.6, 0.2]);
    }

    #[test]
    fn test_ties_keep_admission_order() {
        let mut keys = vec![
            PriorityKey::new(0.5, 7),
            PriorityKey::new(0.5, 2),
            PriorityKey::new(0.5, 4),
        ];
        keys.sort();
        let order: Vec<u64> = keys.iter().map(|k| k.seq).collect();
        assert_eq!(order, vec![2, 4, 7]);
    }
}
