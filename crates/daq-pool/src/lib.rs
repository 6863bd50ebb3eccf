//! Fixed-size slot arena for handing detector frames from receiver to storage.
//!
//! The arena owns one contiguous allocation split into `n_slots` slots of
//! `slot_size` bytes, plus a FIFO of committed [`FrameDescriptor`]s. It is
//! the only hand-off point between the receiver thread (producer) and the
//! storage thread (consumer).
//!
//! # Slot protocol
//!
//! Every slot moves through `Free -> Reserved -> Committed -> Taken -> Free`.
//! Transitions are checked; an out-of-order transition is an
//! [`ArenaError::InvalidTransition`] rather than silent corruption.
//!
//! - [`SlotArena::reserve`] claims a free slot and returns a [`ReservedSlot`]
//!   guard the producer fills in place (zero-copy path).
//! - [`ReservedSlot::commit`] publishes the descriptor to the FIFO.
//! - [`SlotArena::write`] copies a frame into a fresh slot and commits it in
//!   one call (copy path).
//! - [`SlotArena::read`] pops the oldest committed descriptor as a
//!   [`TakenSlot`] guard; releasing or dropping it returns the slot.
//!
//! A full arena (on reserve/write) and an empty FIFO (on read) are ordinary
//! `None` results. Callers retry with their own delay, see
//! [`SlotArena::poll_read`].
//!
//! # Locking
//!
//! Two `parking_lot` mutexes: one around the committed FIFO, one around the
//! slot state table. Payload bytes are not locked; the slot protocol keeps a
//! slot's bytes reachable from at most one guard at a time.
//!
//! # Example
//!
//! ```
//! use daq_core::{ElementType, FrameDescriptor};
//! use daq_pool::SlotArena;
//!
//! let arena = SlotArena::new(4);
//! arena.initialize(16).unwrap();
//!
//! // Producer: fill a slot in place and publish it
//! let mut slot = arena.reserve().unwrap().expect("arena has free slots");
//! slot[..4].copy_from_slice(&[1, 2, 3, 4]);
//! slot.commit(FrameDescriptor::new(0, ElementType::U8, vec![4])).unwrap();
//!
//! // Consumer: take the oldest frame, persist it, release the slot
//! let frame = arena.read().expect("one frame committed");
//! assert_eq!(frame.data(), &[1, 2, 3, 4]);
//! frame.release().unwrap();
//! assert_eq!(arena.free_slots(), 4);
//! ```

pub mod slot_arena;

pub use slot_arena::{ReservedSlot, SlotArena, SlotState, TakenSlot};

pub use daq_core::FrameDescriptor;

use thiserror::Error;

/// Errors raised by [`SlotArena`] for contract violations.
///
/// Running out of free slots or finding the FIFO empty is not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// Reserve or write before [`SlotArena::initialize`].
    #[error("slot arena is not initialized")]
    NotInitialized,

    /// [`SlotArena::initialize`] called a second time.
    #[error("slot arena is already initialized")]
    AlreadyInitialized,

    /// Zero slots, zero slot size, or a total size that overflows `usize`.
    #[error("invalid arena geometry: {n_slots} slots of {slot_size} bytes")]
    InvalidSlotSize {
        /// Configured slot count.
        n_slots: usize,
        /// Requested slot size in bytes.
        slot_size: usize,
    },

    /// A frame does not fit into one slot.
    #[error("frame of {byte_size} bytes does not fit into a {slot_size}-byte slot")]
    FrameTooLarge {
        /// Frame size in bytes.
        byte_size: usize,
        /// Slot size in bytes.
        slot_size: usize,
    },

    /// A slot was moved out of protocol order.
    #[error("slot {slot}: invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Slot index.
        slot: usize,
        /// State the slot was in.
        from: SlotState,
        /// State that was requested.
        to: SlotState,
    },
}
