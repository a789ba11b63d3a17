// id.rs — Unique identifiers handed out during one lowering run
//
// Allocated in walk order, so the same tree always receives the same ids.
// The allocator lives in the `LoweringContext` and is never shared between
// runs.

use std::fmt;

/// Suffix that makes an atom's handle unique (`__value_004`, `Osc_012`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomId(pub u32);

/// Identifier of an opened rate boundary; names its phase counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoundaryId(pub u32);

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl fmt::Display for BoundaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// Monotonic allocator for per-run identifiers.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_atom: u32,
    next_boundary: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_atom(&mut self) -> AtomId {
        let id = AtomId(self.next_atom);
        self.next_atom += 1;
        id
    }

    pub fn alloc_boundary(&mut self) -> BoundaryId {
        let id = BoundaryId(self.next_boundary);
        self.next_boundary += 1;
        id
    }

    /// Number of atoms allocated so far.
    pub fn atoms_allocated(&self) -> u32 {
        self.next_atom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_independent() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.alloc_atom(), AtomId(0));
        assert_eq!(ids.alloc_atom(), AtomId(1));
        assert_eq!(ids.alloc_boundary(), BoundaryId(0));
        assert_eq!(ids.alloc_atom(), AtomId(2));
        assert_eq!(ids.atoms_allocated(), 3);
    }

    #[test]
    fn display_pads_to_three_digits() {
        assert_eq!(AtomId(7).to_string(), "007");
        assert_eq!(BoundaryId(1234).to_string(), "1234");
    }
}
