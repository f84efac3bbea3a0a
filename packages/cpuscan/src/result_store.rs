use crate::{Leaf, Registers, Subleaf};

/// All CPUID results captured from one logical processor, organized per leaf
/// and per subleaf.
///
/// Insertion order is preserved, which matters for the dump formats that
/// replay results in the order the hardware walk produced them. Sorted views
/// are available for the formats and reports that need numeric order instead.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResultStore {
    leaves: Vec<LeafResults>,
}

/// The subleaf results of one leaf, in insertion order.
#[derive(Clone, Debug, Eq, PartialEq)]
struct LeafResults {
    leaf: Leaf,
    subleaves: Vec<(Subleaf, Registers)>,
}

impl ResultStore {
    /// Creates an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self { leaves: Vec::new() }
    }

    /// Records the result of one query.
    ///
    /// Inserting the same leaf/subleaf pair again replaces the earlier value
    /// in place, keeping its original position.
    pub fn insert(&mut self, leaf: Leaf, subleaf: Subleaf, registers: Registers) {
        if let Some(existing) = self.leaves.iter_mut().find(|entry| entry.leaf == leaf) {
            if let Some(slot) = existing
                .subleaves
                .iter_mut()
                .find(|(existing_subleaf, _)| *existing_subleaf == subleaf)
            {
                slot.1 = registers;
            } else {
                existing.subleaves.push((subleaf, registers));
            }
        } else {
            self.leaves.push(LeafResults {
                leaf,
                subleaves: vec![(subleaf, registers)],
            });
        }
    }

    /// Returns the recorded result for the given leaf/subleaf pair, if any.
    #[must_use]
    pub fn get(&self, leaf: Leaf, subleaf: Subleaf) -> Option<Registers> {
        self.leaves
            .iter()
            .find(|entry| entry.leaf == leaf)?
            .subleaves
            .iter()
            .find(|(existing_subleaf, _)| *existing_subleaf == subleaf)
            .map(|(_, registers)| *registers)
    }

    /// Whether any subleaf of the given leaf was recorded.
    #[must_use]
    pub fn has_leaf(&self, leaf: Leaf) -> bool {
        self.leaves.iter().any(|entry| entry.leaf == leaf)
    }

    /// How many subleaves were recorded for the given leaf.
    #[must_use]
    pub fn subleaf_count(&self, leaf: Leaf) -> usize {
        self.leaves
            .iter()
            .find(|entry| entry.leaf == leaf)
            .map_or(0, |entry| entry.subleaves.len())
    }

    /// Total number of recorded leaf/subleaf pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves.iter().map(|entry| entry.subleaves.len()).sum()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Iterates all recorded results in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Leaf, Subleaf, Registers)> + '_ {
        self.leaves.iter().flat_map(|entry| {
            entry
                .subleaves
                .iter()
                .map(move |(subleaf, registers)| (entry.leaf, *subleaf, *registers))
        })
    }

    /// Iterates all recorded results ordered numerically by leaf, then subleaf.
    pub fn iter_sorted(&self) -> impl Iterator<Item = (Leaf, Subleaf, Registers)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by_key(|(leaf, subleaf, _)| (*leaf, *subleaf));
        entries.into_iter()
    }

    /// Returns the subleaves of the given leaf ordered numerically.
    #[must_use]
    pub fn subleaves_sorted(&self, leaf: Leaf) -> Vec<(Subleaf, Registers)> {
        let mut subleaves = self
            .leaves
            .iter()
            .find(|entry| entry.leaf == leaf)
            .map(|entry| entry.subleaves.clone())
            .unwrap_or_default();

        subleaves.sort_by_key(|(subleaf, _)| *subleaf);
        subleaves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut store = ResultStore::new();
        assert!(store.is_empty());

        store.insert(0x7, 0, Registers::new(1, 2, 3, 4));
        store.insert(0x7, 1, Registers::new(5, 6, 7, 8));
        store.insert(0x1, 0, Registers::new(9, 9, 9, 9));

        assert_eq!(store.get(0x7, 1), Some(Registers::new(5, 6, 7, 8)));
        assert_eq!(store.get(0x7, 2), None);
        assert_eq!(store.get(0x2, 0), None);

        assert!(store.has_leaf(0x1));
        assert!(!store.has_leaf(0x2));
        assert_eq!(store.subleaf_count(0x7), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut store = ResultStore::new();

        store.insert(0x7, 0, Registers::new(1, 1, 1, 1));
        store.insert(0xd, 0, Registers::new(2, 2, 2, 2));
        store.insert(0x7, 0, Registers::new(3, 3, 3, 3));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(0x7, 0), Some(Registers::new(3, 3, 3, 3)));

        // The replaced entry keeps its original position.
        let order: Vec<_> = store.iter().map(|(leaf, _, _)| leaf).collect();
        assert_eq!(order, vec![0x7, 0xd]);
    }

    #[test]
    fn iteration_orders() {
        let mut store = ResultStore::new();

        store.insert(0x8000_0000, 0, Registers::ZERO);
        store.insert(0x0, 0, Registers::ZERO);
        store.insert(0xb, 1, Registers::ZERO);
        store.insert(0xb, 0, Registers::ZERO);

        let insertion: Vec<_> = store.iter().map(|(leaf, subleaf, _)| (leaf, subleaf)).collect();
        assert_eq!(
            insertion,
            vec![(0x8000_0000, 0), (0x0, 0), (0xb, 1), (0xb, 0)]
        );

        let sorted: Vec<_> = store
            .iter_sorted()
            .map(|(leaf, subleaf, _)| (leaf, subleaf))
            .collect();
        assert_eq!(
            sorted,
            vec![(0x0, 0), (0xb, 0), (0xb, 1), (0x8000_0000, 0)]
        );

        let subleaves: Vec<_> = store
            .subleaves_sorted(0xb)
            .into_iter()
            .map(|(subleaf, _)| subleaf)
            .collect();
        assert_eq!(subleaves, vec![0, 1]);
    }
}
