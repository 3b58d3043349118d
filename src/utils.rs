use bitvec::vec::BitVec;

/// Allocates stable slot indices, preferring freed slots over growth.
///
/// Used for the page table and the resource table, where handles must stay
/// valid while other slots come and go.
#[derive(Default)]
pub struct IdAlloc {
    bits: BitVec,
}

impl IdAlloc {
    pub fn new() -> Self {
        Self {
            bits: BitVec::new(),
        }
    }

    pub fn alloc(&mut self) -> u32 {
        if let Some(index) = self.bits.first_zero() {
            self.bits.set(index, true);
            return index as u32;
        }
        let index = self.bits.len();
        self.bits.push(true);
        index as u32
    }

    /// # Panics
    /// Panics if `id` was never allocated.
    pub fn free(&mut self, id: u32) {
        assert!(
            self.bits.get(id as usize).map(|bit| *bit).unwrap_or(false),
            "freed an id that was not allocated"
        );
        self.bits.set(id as usize, false);
    }
}
