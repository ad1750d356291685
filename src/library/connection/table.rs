use crate::library::{
    connection::Connection,
    error::{Result, ToyError},
};
use tracing::trace;

/// Fixed-capacity slot array owning every live [`Connection`].
///
/// Slot indices, not addresses, travel through the kernel as completion tags.
pub struct ConnectionTable<S = ()> {
    slots: Vec<Option<Box<Connection<S>>>>,
    free: Vec<usize>,
}

impl<S> ConnectionTable<S> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            // Lowest index on top of the stack.
            free: (0..capacity).rev().collect(),
        }
    }

    /// Stores `conn` in a free slot and returns the slot index.
    pub fn allocate(&mut self, mut conn: Box<Connection<S>>) -> Result<usize> {
        let slot: usize = self.free.pop().ok_or(ToyError::SlotsExhausted {
            capacity: self.slots.len(),
        })?;
        conn.set_slot(Some(slot));
        self.slots[slot] = Some(conn);
        trace!("Allocated slot {slot}. Live: {}", self.len());
        Ok(slot)
    }

    /// Detaches the connection in `slot` and frees the slot. The socket stays open.
    pub fn release(&mut self, slot: usize) -> Result<Box<Connection<S>>> {
        let mut conn: Box<Connection<S>> = self
            .slots
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or(ToyError::EmptySlot(slot))?;
        conn.set_slot(None);
        self.free.push(slot);
        trace!("Released slot {slot}. Live: {}", self.len());
        Ok(conn)
    }

    #[inline(always)]
    pub fn get(&self, slot: usize) -> Option<&Connection<S>> {
        self.slots.get(slot)?.as_deref()
    }

    #[inline(always)]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Connection<S>> {
        self.slots.get_mut(slot)?.as_deref_mut()
    }

    #[inline(always)]
    pub fn is_occupied(&self, slot: usize) -> bool {
        self.get(slot).is_some()
    }

    /// Slots whose buffer is currently lent to the kernel.
    pub fn in_flight(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, conn)| match conn {
                Some(conn) if conn.is_in_flight() => Some(slot),
                _ => None,
            })
            .collect()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
