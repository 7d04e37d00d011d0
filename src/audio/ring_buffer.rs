//! Lock-free SPSC ring buffer between the cpal callback and the framing
//! thread.
//!
//! The cpal callback must never block or allocate on the hot path, so
//! samples are handed off through a `ringbuf` heap buffer. The framing
//! thread pops fixed-size frames out of the consumer half.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Default capacity: ~10 seconds of 16 kHz mono audio.
const DEFAULT_CAPACITY: usize = 160_000;

/// Producer half, owned by the cpal audio callback.
pub struct SampleProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Consumer half, owned by the framing thread.
pub struct SampleConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Create a matched producer/consumer pair backed by a lock-free ring buffer.
pub fn sample_ring_buffer(capacity: Option<usize>) -> (SampleProducer, SampleConsumer) {
    let cap = capacity.unwrap_or(DEFAULT_CAPACITY);
    let rb = HeapRb::<f32>::new(cap);
    let (prod, cons) = rb.split();
    (
        SampleProducer { inner: prod },
        SampleConsumer { inner: cons },
    )
}

impl SampleProducer {
    /// Push a slice of samples. Returns how many were actually written;
    /// anything beyond the free capacity is dropped by the caller.
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

// Safety: the ringbuf producer is designed to be used from a single thread.
// cpal callbacks run on a dedicated audio thread, so this is fine.
unsafe impl Send for SampleProducer {}

impl SampleConsumer {
    /// Number of samples currently buffered.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Pop exactly `out.len()` samples if that many are buffered.
    /// Returns false (and pops nothing) otherwise.
    pub fn pop_exact(&mut self, out: &mut [f32]) -> bool {
        if self.available() < out.len() {
            return false;
        }
        let read = self.inner.pop_slice(out);
        debug_assert_eq!(read, out.len());
        true
    }
}

unsafe impl Send for SampleConsumer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_exact_waits_for_full_frame() {
        let (mut prod, mut cons) = sample_ring_buffer(Some(16));
        prod.push_slice(&[1.0; 4]);

        let mut frame = [0.0f32; 8];
        assert!(!cons.pop_exact(&mut frame));
        assert_eq!(cons.available(), 4);

        prod.push_slice(&[2.0; 4]);
        assert!(cons.pop_exact(&mut frame));
        assert_eq!(cons.available(), 0);
        assert_eq!(&frame[..4], &[1.0; 4]);
        assert_eq!(&frame[4..], &[2.0; 4]);
    }

    #[test]
    fn producer_drops_overflow() {
        let (mut prod, _cons) = sample_ring_buffer(Some(8));
        assert_eq!(prod.push_slice(&[0.0; 12]), 8);
    }
}
