//! Slot arena protocol tests: FIFO ordering, slot accounting, and a real
//! producer/consumer pair.

use daq_core::{ElementType, FrameDescriptor};
use daq_pool::{SlotArena, TakenSlot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const SLOT_SIZE: usize = 8;

fn descriptor(frame_index: u64) -> FrameDescriptor {
    FrameDescriptor::new(frame_index, ElementType::U64, vec![1])
}

/// Interleave commits, reads and releases at random and check that frames
/// come out in commit order and slot accounting always adds up.
#[test]
fn test_fifo_order_under_random_interleaving() {
    const N_SLOTS: usize = 7;
    const OPS: usize = 10_000;

    let arena = SlotArena::new(N_SLOTS);
    arena.initialize(SLOT_SIZE).unwrap();
    let mut rng = StdRng::seed_from_u64(0x5107_a7e7);

    let mut next_frame = 0u64;
    let mut expected = VecDeque::new();
    let mut held: Vec<TakenSlot<'_>> = Vec::new();

    for _ in 0..OPS {
        match rng.gen_range(0..4) {
            // Copy path
            0 => {
                let payload = next_frame.to_le_bytes();
                if arena.write(descriptor(next_frame), &payload).unwrap().is_some() {
                    expected.push_back(next_frame);
                    next_frame += 1;
                }
            }
            // Zero-copy path
            1 => {
                if let Some(mut slot) = arena.reserve().unwrap() {
                    slot[..SLOT_SIZE].copy_from_slice(&next_frame.to_le_bytes());
                    slot.commit(descriptor(next_frame)).unwrap();
                    expected.push_back(next_frame);
                    next_frame += 1;
                }
            }
            2 => match arena.read() {
                Some(taken) => {
                    let want = expected.pop_front().unwrap();
                    assert_eq!(taken.descriptor().frame_index, want);
                    assert_eq!(taken.data(), &want.to_le_bytes());
                    held.push(taken);
                }
                None => assert!(expected.is_empty()),
            },
            // Release one held frame, in random order
            _ => {
                if !held.is_empty() {
                    let victim = rng.gen_range(0..held.len());
                    held.swap_remove(victim).release().unwrap();
                }
            }
        }

        let outstanding = expected.len() + held.len();
        assert!(outstanding <= N_SLOTS);
        assert_eq!(arena.free_slots() + outstanding, N_SLOTS);
        assert_eq!(arena.committed_len(), expected.len());
    }

    assert!(next_frame > 1000, "too few frames went through: {next_frame}");

    for taken in held.drain(..) {
        taken.release().unwrap();
    }
    while let Some(taken) = arena.read() {
        assert_eq!(Some(taken.descriptor().frame_index), expected.pop_front());
    }
    assert_eq!(arena.free_slots(), N_SLOTS);
    assert!(arena.is_empty());
}

/// One receiver thread and one storage thread, retrying on full/empty the way
/// the acquisition loops do.
#[test]
fn test_producer_consumer_threads() {
    const FRAMES: u64 = 2_000;
    let retry = Duration::from_micros(50);

    let arena = SlotArena::new(4);
    arena.initialize(SLOT_SIZE).unwrap();
    let done = AtomicBool::new(false);

    let received = std::thread::scope(|scope| {
        scope.spawn(|| {
            for frame_index in 0..FRAMES {
                let payload = frame_index.to_le_bytes();
                while arena
                    .write(descriptor(frame_index), &payload)
                    .unwrap()
                    .is_none()
                {
                    std::thread::sleep(retry);
                }
            }
            done.store(true, Ordering::Release);
        });

        let consumer = scope.spawn(|| {
            let mut received = Vec::with_capacity(FRAMES as usize);
            loop {
                match arena.poll_read(retry, 10) {
                    Some(taken) => {
                        let bytes: [u8; SLOT_SIZE] = taken.data().try_into().unwrap();
                        assert_eq!(u64::from_le_bytes(bytes), taken.descriptor().frame_index);
                        received.push(taken.descriptor().frame_index);
                        taken.release().unwrap();
                    }
                    None if done.load(Ordering::Acquire) && arena.is_empty() => break,
                    None => {}
                }
            }
            received
        });

        consumer.join().unwrap()
    });

    assert_eq!(received, (0..FRAMES).collect::<Vec<_>>());
    assert_eq!(arena.free_slots(), 4);
}
