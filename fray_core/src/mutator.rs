use crate::frame::Frame;
use rand::Rng;

/// Number of bit positions a flip mutation will touch for a buffer of
/// `byte_len` bytes: `max(1, ceil(rate * 8 * byte_len))`, or zero when the
/// rate is zero (or the buffer is empty).
///
/// Positions are later drawn with replacement, so the count is "flip
/// operations", not "bits that end up different" — a position hit twice
/// cancels out.
pub fn flip_count(rate: f64, byte_len: usize) -> usize {
    if rate <= 0.0 || byte_len == 0 {
        return 0;
    }
    let bits = (byte_len * 8) as f64;
    ((rate * bits).ceil() as usize).max(1)
}

/// A `Mutator` perturbs a [`Frame`] in place to produce the next fuzz sample.
///
/// Mutators operate on the serialized byte form and leave their result as the
/// frame's raw override, so the transmitted bytes are exactly the mutated
/// ones regardless of what the layered headers say.
///
/// # Type Parameters
/// * `R`: The type of random number generator used for mutation decisions.
pub trait Mutator<R: Rng + ?Sized> {
    fn mutate(&self, frame: &mut Frame, rng: &mut R);
}

/// The core fuzzing mutator: flips `max(1, ceil(rate * bits))` uniformly
/// random bit positions across the serialized frame, with replacement.
///
/// At least one flip is guaranteed whenever `rate > 0`; a rate of zero
/// leaves the frame untouched.
#[derive(Debug, Clone, Copy)]
pub struct RandomBitFlipMutator {
    rate: f64,
}

impl RandomBitFlipMutator {
    /// Creates a mutator flipping the given fraction of the frame's bits
    /// per cycle (`0.01` = 1%).
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl<R: Rng + ?Sized> Mutator<R> for RandomBitFlipMutator {
    fn mutate(&self, frame: &mut Frame, rng: &mut R) {
        let mut bytes = frame.serialize();
        let flips = flip_count(self.rate, bytes.len());
        if flips == 0 {
            return;
        }
        let bit_count = bytes.len() * 8;
        for _ in 0..flips {
            let bit = rng.random_range(0..bit_count);
            bytes[bit / 8] ^= 1 << (bit % 8);
        }
        frame.set_override(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameTemplate};
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    fn test_frame(rng: &mut ChaCha8Rng) -> Frame {
        Frame::build(&FrameTemplate::default(), rng).expect("default template builds")
    }

    fn bit_diff(a: &[u8], b: &[u8]) -> u32 {
        assert_eq!(a.len(), b.len());
        a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
    }

    #[test]
    fn flip_count_scales_with_rate_and_length() {
        // 64 bytes = 512 bits at 1% -> ceil(5.12) = 6 flips.
        assert_eq!(flip_count(0.01, 64), 6);
        assert_eq!(flip_count(1.0, 1), 8);
        assert_eq!(flip_count(0.5, 10), 40);
    }

    #[test]
    fn flip_count_guarantees_at_least_one_flip_for_positive_rates() {
        assert_eq!(flip_count(0.0001, 4), 1);
        assert_eq!(flip_count(f64::MIN_POSITIVE, 1), 1);
    }

    #[test]
    fn flip_count_is_zero_for_zero_rate_or_empty_buffer() {
        assert_eq!(flip_count(0.0, 64), 0);
        assert_eq!(flip_count(-0.5, 64), 0);
        assert_eq!(flip_count(0.1, 0), 0);
    }

    #[test]
    fn zero_rate_leaves_frame_untouched() {
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);
        let mut frame = test_frame(&mut rng);
        let before = frame.serialize();
        RandomBitFlipMutator::new(0.0).mutate(&mut frame, &mut rng);
        assert!(!frame.has_override());
        assert_eq!(frame.serialize(), before);
    }

    #[test]
    fn single_flip_changes_exactly_one_bit() {
        // A rate small enough that flip_count clamps to 1 makes the outcome
        // exact: one flip with replacement cannot cancel itself.
        let mut rng = ChaCha8Rng::from_seed([2u8; 32]);
        let mut frame = test_frame(&mut rng);
        let before = frame.serialize();
        assert_eq!(flip_count(0.0001, before.len()), 1);

        RandomBitFlipMutator::new(0.0001).mutate(&mut frame, &mut rng);
        assert!(frame.has_override());
        let after = frame.serialize();
        assert_eq!(bit_diff(&before, &after), 1);
    }

    #[test]
    fn flip_parity_matches_flip_count() {
        // Each flip toggles one bit, so the number of differing bits has the
        // same parity as the flip count and never exceeds it.
        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        let mut frame = test_frame(&mut rng);
        let before = frame.serialize();
        let flips = flip_count(0.01, before.len()) as u32;

        RandomBitFlipMutator::new(0.01).mutate(&mut frame, &mut rng);
        let diff = bit_diff(&before, &frame.serialize());
        assert!(diff <= flips);
        assert_eq!(diff % 2, flips % 2);
    }

    #[test]
    fn mutation_result_is_stored_as_raw_override() {
        let mut rng = ChaCha8Rng::from_seed([4u8; 32]);
        let mut frame = test_frame(&mut rng);
        RandomBitFlipMutator::new(0.05).mutate(&mut frame, &mut rng);
        assert!(frame.has_override());

        // Clearing the override restores the pristine layered serialization.
        let mutated = frame.serialize();
        frame.clear_override();
        assert_ne!(frame.serialize(), mutated);
    }
}
