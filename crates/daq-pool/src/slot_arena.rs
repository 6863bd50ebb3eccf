#![allow(unsafe_code)]
//! Slot arena implementation.

use bytes::Bytes;
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use daq_core::{ArenaSettings, FrameDescriptor};

use crate::ArenaError;

/// Lifecycle state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Available for reserve/write.
    Free,
    /// Claimed by the producer, not yet visible to the reader.
    Reserved,
    /// Published in the FIFO, waiting for the reader.
    Committed,
    /// Handed to the reader, waiting for release.
    Taken,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotState::Free => "Free",
            SlotState::Reserved => "Reserved",
            SlotState::Committed => "Committed",
            SlotState::Taken => "Taken",
        };
        f.write_str(name)
    }
}

impl SlotState {
    fn can_become(self, next: SlotState) -> bool {
        matches!(
            (self, next),
            (SlotState::Free, SlotState::Reserved)
                | (SlotState::Reserved, SlotState::Committed)
                | (SlotState::Reserved, SlotState::Free)
                | (SlotState::Committed, SlotState::Taken)
                | (SlotState::Taken, SlotState::Free)
        )
    }
}

/// The single backing allocation, created once by `initialize`.
struct Backing {
    slot_size: usize,
    bytes: Box<[UnsafeCell<u8>]>,
}

impl Backing {
    fn new(n_slots: usize, slot_size: usize) -> Result<Self, ArenaError> {
        let total = n_slots
            .checked_mul(slot_size)
            .filter(|&total| total > 0)
            .ok_or(ArenaError::InvalidSlotSize { n_slots, slot_size })?;

        let bytes: Box<[UnsafeCell<u8>]> = std::iter::repeat_with(|| UnsafeCell::new(0u8))
            .take(total)
            .collect();

        Ok(Self { slot_size, bytes })
    }

    /// Start of slot `index`.
    ///
    /// The pointer carries the provenance of the whole allocation, so the
    /// caller may address `slot_size` bytes from it.
    fn slot_ptr(&self, index: usize) -> *mut u8 {
        let start = index * self.slot_size;
        debug_assert!(start + self.slot_size <= self.bytes.len());
        // SAFETY: `index < n_slots` for every caller (indices come from the
        // slot table), so `start` is within the allocation.
        UnsafeCell::raw_get(unsafe { self.bytes.as_ptr().add(start) })
    }
}

/// Slot bookkeeping guarded by one mutex.
struct SlotTable {
    states: Vec<SlotState>,
    /// Next index to probe when claiming; claims go round-robin.
    cursor: usize,
    /// Reserved + Committed + Taken.
    outstanding: usize,
}

impl SlotTable {
    /// Empty until `initialize` has validated the geometry.
    fn empty() -> Self {
        Self {
            states: Vec::new(),
            cursor: 0,
            outstanding: 0,
        }
    }

    fn transition(&mut self, slot: usize, to: SlotState) -> Result<(), ArenaError> {
        let from = self.states.get(slot).copied().ok_or(ArenaError::InvalidTransition {
            slot,
            from: SlotState::Free,
            to,
        })?;
        if !from.can_become(to) {
            return Err(ArenaError::InvalidTransition { slot, from, to });
        }
        self.states[slot] = to;
        match (from, to) {
            (SlotState::Free, _) => self.outstanding += 1,
            (_, SlotState::Free) => self.outstanding -= 1,
            _ => {}
        }
        Ok(())
    }

    /// Claim the next free slot at or after the cursor.
    fn claim(&mut self) -> Option<usize> {
        let n_slots = self.states.len();
        let index = (0..n_slots)
            .map(|probe| (self.cursor + probe) % n_slots)
            .find(|&i| self.states[i] == SlotState::Free)?;
        self.states[index] = SlotState::Reserved;
        self.outstanding += 1;
        self.cursor = (index + 1) % n_slots;
        Some(index)
    }
}

/// Fixed set of equally sized byte slots plus a FIFO of committed frames.
///
/// Designed for exactly one producer thread and one consumer thread. Share
/// it between them by reference (scoped threads) or through an `Arc`.
pub struct SlotArena {
    n_slots: usize,
    backing: OnceLock<Backing>,
    committed: Mutex<VecDeque<FrameDescriptor>>,
    table: Mutex<SlotTable>,
}

// SAFETY: Payload bytes live in `UnsafeCell`s and are only reachable through
// a `ReservedSlot` or `TakenSlot` guard. The slot table hands each index to at
// most one guard at a time (Reserved and Taken are exclusive states, and the
// index-level release is crate-private), so no two threads ever hold
// overlapping references into the backing allocation. All bookkeeping is
// behind mutexes.
unsafe impl Sync for SlotArena {}

impl fmt::Debug for SlotArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotArena")
            .field("n_slots", &self.n_slots)
            .field("slot_size", &self.slot_size())
            .field("free_slots", &self.free_slots())
            .field("committed", &self.committed_len())
            .finish()
    }
}

impl SlotArena {
    /// Create an arena with `n_slots` slots. No memory is allocated until
    /// [`initialize`](Self::initialize), which also rejects a bad geometry.
    #[must_use]
    pub fn new(n_slots: usize) -> Self {
        Self {
            n_slots,
            backing: OnceLock::new(),
            committed: Mutex::new(VecDeque::new()),
            table: Mutex::new(SlotTable::empty()),
        }
    }

    /// Create an arena from its settings section, allocating immediately if a
    /// slot size is configured.
    pub fn from_settings(settings: &ArenaSettings) -> Result<Self, ArenaError> {
        let arena = Self::new(settings.n_slots);
        if let Some(slot_size) = settings.slot_size {
            arena.initialize(slot_size)?;
        }
        Ok(arena)
    }

    /// Allocate `n_slots * slot_size` bytes. Valid exactly once.
    pub fn initialize(&self, slot_size: usize) -> Result<(), ArenaError> {
        if self.backing.get().is_some() {
            return Err(ArenaError::AlreadyInitialized);
        }
        let backing = Backing::new(self.n_slots, slot_size)?;
        // Held across `set` so a producer that sees the backing also sees
        // the filled slot table.
        let mut table = self.table.lock();
        self.backing
            .set(backing)
            .map_err(|_| ArenaError::AlreadyInitialized)?;
        table.states = vec![SlotState::Free; self.n_slots];
        drop(table);
        info!(
            n_slots = self.n_slots,
            slot_size,
            total_bytes = self.n_slots * slot_size,
            "Slot arena initialized"
        );
        Ok(())
    }

    /// Whether the backing allocation exists.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backing.get().is_some()
    }

    /// Number of slots.
    #[must_use]
    pub fn n_slots(&self) -> usize {
        self.n_slots
    }

    /// Slot size in bytes, once initialized.
    #[must_use]
    pub fn slot_size(&self) -> Option<usize> {
        self.backing.get().map(|b| b.slot_size)
    }

    /// Number of slots in the `Free` state.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.n_slots - self.table.lock().outstanding
    }

    /// Whether no committed frame is waiting for the reader.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.committed.lock().is_empty()
    }

    /// Number of committed frames waiting for the reader.
    #[must_use]
    pub fn committed_len(&self) -> usize {
        self.committed.lock().len()
    }

    /// Claim a free slot for in-place filling.
    ///
    /// Returns `Ok(None)` when every slot is outstanding. Dropping the guard
    /// without committing returns the slot to `Free`.
    pub fn reserve(&self) -> Result<Option<ReservedSlot<'_>>, ArenaError> {
        let backing = self.backing.get().ok_or(ArenaError::NotInitialized)?;
        let Some(index) = self.table.lock().claim() else {
            trace!(n_slots = self.n_slots, "No free slot");
            return Ok(None);
        };
        Ok(Some(ReservedSlot {
            arena: self,
            index,
            ptr: backing.slot_ptr(index),
            len: backing.slot_size,
            done: false,
        }))
    }

    /// Publish a reserved slot. Same as [`ReservedSlot::commit`].
    pub fn commit(
        &self,
        slot: ReservedSlot<'_>,
        descriptor: FrameDescriptor,
    ) -> Result<(), ArenaError> {
        slot.commit(descriptor)
    }

    /// Copy `bytes` into a free slot and commit it in one call.
    ///
    /// The descriptor's `byte_size` is set to `bytes.len()`. Returns the slot
    /// index, or `Ok(None)` when the arena is full.
    pub fn write(
        &self,
        mut descriptor: FrameDescriptor,
        bytes: &[u8],
    ) -> Result<Option<usize>, ArenaError> {
        let slot_size = self.slot_size().ok_or(ArenaError::NotInitialized)?;
        if bytes.len() > slot_size {
            return Err(ArenaError::FrameTooLarge {
                byte_size: bytes.len(),
                slot_size,
            });
        }
        let Some(mut slot) = self.reserve()? else {
            return Ok(None);
        };
        slot[..bytes.len()].copy_from_slice(bytes);
        descriptor.byte_size = bytes.len();
        let index = slot.index();
        slot.commit(descriptor)?;
        Ok(Some(index))
    }

    /// Take the oldest committed frame. Never blocks.
    #[must_use]
    pub fn read(&self) -> Option<TakenSlot<'_>> {
        let backing = self.backing.get()?;
        let descriptor = self.committed.lock().pop_front()?;
        let index = descriptor.slot_index;
        if let Err(e) = self.table.lock().transition(index, SlotState::Taken) {
            error!(slot = index, error = %e, "Committed frame in unexpected slot state");
            return None;
        }
        Some(TakenSlot {
            arena: self,
            ptr: backing.slot_ptr(index),
            descriptor,
            released: false,
        })
    }

    /// Call [`read`](Self::read) up to `attempts` times, sleeping `interval`
    /// between empty results.
    #[must_use]
    pub fn poll_read(&self, interval: Duration, attempts: usize) -> Option<TakenSlot<'_>> {
        for attempt in 0..attempts {
            if let Some(frame) = self.read() {
                return Some(frame);
            }
            if attempt + 1 < attempts {
                std::thread::sleep(interval);
            }
        }
        None
    }

    /// Return a `Taken` slot to `Free`.
    ///
    /// Only guards call this; exposing it would let a slot be reused while a
    /// `TakenSlot` still borrows its bytes.
    pub(crate) fn release_slot(&self, index: usize) -> Result<(), ArenaError> {
        self.table.lock().transition(index, SlotState::Free)
    }

    fn publish(&self, index: usize, mut descriptor: FrameDescriptor) -> Result<(), ArenaError> {
        descriptor.slot_index = index;
        self.table.lock().transition(index, SlotState::Committed)?;
        debug!(
            slot = index,
            frame_index = descriptor.frame_index,
            byte_size = descriptor.byte_size,
            "Frame committed"
        );
        self.committed.lock().push_back(descriptor);
        Ok(())
    }

    fn abandon(&self, index: usize) {
        if let Err(e) = self.table.lock().transition(index, SlotState::Free) {
            error!(slot = index, error = %e, "Failed to return abandoned slot");
        }
    }
}

/// A slot claimed by the producer and not yet committed.
///
/// Derefs to the slot's full `slot_size` bytes.
pub struct ReservedSlot<'a> {
    arena: &'a SlotArena,
    index: usize,
    /// SAFETY: Start of this slot in the backing allocation, valid for `len`
    /// bytes for `'a`. The slot is Reserved, so no other guard addresses it.
    ptr: *mut u8,
    len: usize,
    done: bool,
}

// SAFETY: The guard has exclusive access to its slot's bytes; moving it to
// another thread moves that exclusivity with it.
unsafe impl Send for ReservedSlot<'_> {}

impl ReservedSlot<'_> {
    /// Index of the reserved slot.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Publish the frame to the reader.
    ///
    /// `descriptor.slot_index` is overwritten with this slot's index. A
    /// descriptor whose `byte_size` exceeds the slot is rejected and the slot
    /// returns to `Free`.
    pub fn commit(mut self, descriptor: FrameDescriptor) -> Result<(), ArenaError> {
        if descriptor.byte_size > self.len {
            return Err(ArenaError::FrameTooLarge {
                byte_size: descriptor.byte_size,
                slot_size: self.len,
            });
        }
        self.done = true;
        self.arena.publish(self.index, descriptor)
    }
}

impl Deref for ReservedSlot<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: see `ptr`; the slot belongs to this guard alone.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for ReservedSlot<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `ptr`; `&mut self` rules out other borrows of the guard.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for ReservedSlot<'_> {
    fn drop(&mut self) {
        if !self.done {
            debug!(slot = self.index, "Reserved slot dropped without commit");
            self.arena.abandon(self.index);
        }
    }
}

/// A committed frame handed to the reader.
///
/// This guard is the arena's `release(index)`: the slot is returned to
/// `Free` by [`release`](Self::release) or when the guard is dropped. There
/// is no index-based release on [`SlotArena`], so a slot can never be reused
/// while its bytes are still borrowed.
pub struct TakenSlot<'a> {
    arena: &'a SlotArena,
    /// SAFETY: Start of this slot in the backing allocation. The slot is
    /// Taken, so the producer cannot claim it until this guard releases it.
    ptr: *mut u8,
    descriptor: FrameDescriptor,
    released: bool,
}

// SAFETY: Read-only access to a slot no other guard can reach.
unsafe impl Send for TakenSlot<'_> {}

impl TakenSlot<'_> {
    /// The committed descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }

    /// Index of the slot holding the frame.
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.descriptor.slot_index
    }

    /// The frame's valid bytes (`descriptor().byte_size` of them).
    #[must_use]
    pub fn data(&self) -> &[u8] {
        // SAFETY: see `ptr`; `byte_size <= slot_size` was checked on commit.
        unsafe { std::slice::from_raw_parts(self.ptr, self.descriptor.byte_size) }
    }

    /// Copy the frame out into an owned buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.data())
    }

    /// Return the slot to `Free`.
    pub fn release(mut self) -> Result<(), ArenaError> {
        self.released = true;
        self.arena.release_slot(self.descriptor.slot_index)
    }
}

impl Drop for TakenSlot<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.arena.release_slot(self.descriptor.slot_index) {
                warn!(slot = self.descriptor.slot_index, error = %e, "Release on drop failed");
            }
        }
    }
}
