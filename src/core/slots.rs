/*!
 * Fixed-Capacity Slot Table
 * Integer-indexed arena with first-free allocation
 */

/// Slot table with a capacity fixed at construction
///
/// Slots are handed out lowest-index first, so a freed index is the next
/// one reused. This mirrors how POSIX hands out descriptor numbers.
#[derive(Debug)]
pub struct Slots<T> {
    entries: Vec<Option<T>>,
    used: usize,
}

impl<T> Slots<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self { entries, used: 0 }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Store `value` in the lowest free slot; hands it back if the table is full
    pub fn insert(&mut self, value: T) -> Result<usize, T> {
        match self.entries.iter().position(Option::is_none) {
            Some(idx) => {
                self.entries[idx] = Some(value);
                self.used += 1;
                Ok(idx)
            }
            None => Err(value),
        }
    }

    /// Store `value` at a specific index; hands it back if out of range or occupied
    pub fn insert_at(&mut self, idx: usize, value: T) -> Result<(), T> {
        match self.entries.get_mut(idx) {
            Some(slot) if slot.is_none() => {
                *slot = Some(value);
                self.used += 1;
                Ok(())
            }
            _ => Err(value),
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.entries.get(idx).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.entries.get_mut(idx).and_then(Option::as_mut)
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        self.get(idx).is_some()
    }

    pub fn remove(&mut self, idx: usize) -> Option<T> {
        let value = self.entries.get_mut(idx).and_then(Option::take);
        if value.is_some() {
            self.used -= 1;
        }
        value
    }

    /// Occupied slots with their indices
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|v| (idx, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_mut().map(|v| (idx, v)))
    }
}
