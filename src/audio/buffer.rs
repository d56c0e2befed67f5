//! Lock-free queue and block re-chunking
//!
//! [`RingBuffer`] hands decoded audio to the output device thread without
//! locks; [`BlockAssembler`] turns arbitrarily sized capture callbacks into
//! fixed-size blocks for the relay.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::block::SampleBlock;

/// Bounded lock-free queue for real-time audio
pub struct RingBuffer<T> {
    queue: ArrayQueue<T>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push an item. Returns false (and drops the item) when full.
    pub fn push(&self, item: T) -> bool {
        match self.queue.push(item) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop an item, counting an underrun when empty
    pub fn pop(&self) -> Option<T> {
        let item = self.queue.pop();
        if item.is_none() {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Drop everything queued
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer<T> = Arc<RingBuffer<T>>;

/// Create a new shared ring buffer
pub fn create_shared_buffer<T>(capacity: usize) -> SharedRingBuffer<T> {
    Arc::new(RingBuffer::new(capacity))
}

/// Accumulates captured samples and emits fixed-size blocks
pub struct BlockAssembler {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u32,
}

impl BlockAssembler {
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size * 2),
            next_sequence: 0,
        }
    }

    /// Append samples, returning every block completed by them
    pub fn push(&mut self, samples: &[f32]) -> Vec<SampleBlock> {
        self.pending.extend_from_slice(samples);

        let mut blocks = Vec::with_capacity(self.pending.len() / self.block_size);
        while self.pending.len() >= self.block_size {
            let samples: Vec<f32> = self.pending.drain(..self.block_size).collect();
            blocks.push(SampleBlock::new(samples, self.sample_rate, self.next_sequence));
            self.next_sequence = self.next_sequence.wrapping_add(1);
        }
        blocks
    }

    /// Samples waiting for a full block
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(2);

        assert!(buffer.push(vec![0.0f32; 4]));
        assert!(buffer.push(vec![1.0f32; 4]));
        assert!(!buffer.push(vec![2.0f32; 4]));
        assert_eq!(buffer.overflow_count(), 1);
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.pop().unwrap()[0], 0.0);
        assert_eq!(buffer.pop().unwrap()[0], 1.0);
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_clear() {
        let buffer = create_shared_buffer::<u32>(4);
        buffer.push(1);
        buffer.push(2);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.underrun_count(), 0);
    }

    #[test]
    fn test_assembler_rechunks() {
        let mut assembler = BlockAssembler::new(4, 48000);

        assert!(assembler.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(assembler.pending(), 3);

        let blocks = assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(blocks[1].samples, vec![0.5, 0.6, 0.7, 0.8]);
        assert_eq!(blocks[0].sequence, 0);
        assert_eq!(blocks[1].sequence, 1);
        assert_eq!(assembler.pending(), 1);
    }
}
