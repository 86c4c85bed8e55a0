use crate::frame::{Frame, FrameTemplate};
use crate::history::{History, PacketRecord};
use crate::link::LinkSender;
use crate::mutator::Mutator;
use crate::worker::{CancelToken, Worker, sleep_cancellable};
use chrono::Utc;
use log::{debug, warn};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// The mutation engine: builds a fresh frame from the template, mutates it,
/// records it, and puts it on the wire — forever, until cancelled.
///
/// Per-cycle state machine: `Build -> Mutate -> Track -> Transmit`. Every
/// cycle starts over from the template, so each transmitted frame is an
/// independent fuzz sample rather than a compounding walk through mutation
/// space.
///
/// Sole writer of the packet history. Owns its sequence counter; the
/// counter advances only on successful transmission.
pub struct Transmitter {
    template: FrameTemplate,
    mutator: Box<dyn Mutator<ChaCha8Rng> + Send>,
    link: Box<dyn LinkSender>,
    interface: String,
    cycle_delay: Duration,
    packets: History<PacketRecord>,
    sequence: u64,
    rng: ChaCha8Rng,
}

impl Transmitter {
    pub fn new(
        template: FrameTemplate,
        mutator: Box<dyn Mutator<ChaCha8Rng> + Send>,
        link: Box<dyn LinkSender>,
        interface: String,
        cycle_delay: Duration,
        packets: History<PacketRecord>,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            template,
            mutator,
            link,
            interface,
            cycle_delay,
            packets,
            sequence: 0,
            rng,
        }
    }

    /// Frames successfully put on the wire so far.
    pub fn packets_sent(&self) -> u64 {
        self.sequence
    }

    /// Runs one full fuzz cycle.
    ///
    /// A malformed template fails the build and skips the cycle (the only
    /// per-cycle fatal); a send failure is logged and leaves the sequence
    /// counter untouched. Neither stops the loop.
    pub fn cycle(&mut self) {
        let mut frame = match Frame::build(&self.template, &mut self.rng) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("transmitter: frame construction failed, skipping cycle: {e}");
                return;
            }
        };

        self.mutator.mutate(&mut frame, &mut self.rng);
        let bytes = frame.serialize();

        self.packets.push(PacketRecord {
            timestamp: Utc::now(),
            sequence: self.sequence,
            hex: hex::encode(&bytes),
        });

        match self.link.transmit(&bytes, &self.interface) {
            Ok(()) => self.sequence += 1,
            Err(e) => warn!("transmitter: send failed, sequence not advanced: {e}"),
        }
    }
}

impl Worker for Transmitter {
    fn name(&self) -> &'static str {
        "transmitter"
    }

    fn run(&mut self, cancel: &CancelToken) {
        while !cancel.is_cancelled() {
            self.cycle();
            if !self.cycle_delay.is_zero() {
                sleep_cancellable(cancel, self.cycle_delay);
            }
        }
        debug!("transmitter: {} frames sent", self.sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::test_utils::{FailingSender, RecordingSender};
    use crate::mutator::RandomBitFlipMutator;
    use rand_core::SeedableRng;

    fn transmitter_with(
        link: Box<dyn LinkSender>,
        packets: History<PacketRecord>,
    ) -> Transmitter {
        Transmitter::new(
            FrameTemplate::default(),
            Box::new(RandomBitFlipMutator::new(0.01)),
            link,
            "eth0".to_string(),
            Duration::ZERO,
            packets,
            ChaCha8Rng::from_seed([9u8; 32]),
        )
    }

    #[test]
    fn cycle_tracks_then_transmits_and_advances_sequence() {
        let packets = History::with_capacity(16);
        let mut transmitter = transmitter_with(Box::new(RecordingSender::default()), packets.clone());

        for _ in 0..3 {
            transmitter.cycle();
        }

        assert_eq!(transmitter.packets_sent(), 3);
        let records = packets.snapshot();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        // Hex text decodes back to a plausible TCP frame.
        let bytes = hex::decode(&records[0].hex).expect("valid hex");
        assert_eq!(bytes.len(), 54);
    }

    #[test]
    fn send_failure_is_tracked_but_does_not_advance_sequence() {
        let packets = History::with_capacity(16);
        let mut transmitter = transmitter_with(Box::new(FailingSender::default()), packets.clone());

        transmitter.cycle();
        transmitter.cycle();

        assert_eq!(transmitter.packets_sent(), 0);
        let records = packets.snapshot();
        assert_eq!(records.len(), 2, "tracking happens regardless of send outcome");
        assert!(records.iter().all(|r| r.sequence == 0));
    }

    #[test]
    fn malformed_template_skips_the_cycle() {
        let packets = History::with_capacity(16);
        let mut template = FrameTemplate::default();
        template.dst_mac = "junk".to_string();
        let mut transmitter = Transmitter::new(
            template,
            Box::new(RandomBitFlipMutator::new(0.01)),
            Box::new(RecordingSender::default()),
            "eth0".to_string(),
            Duration::ZERO,
            packets.clone(),
            ChaCha8Rng::from_seed([9u8; 32]),
        );

        transmitter.cycle();
        assert_eq!(transmitter.packets_sent(), 0);
        assert!(packets.is_empty());
    }

    #[test]
    fn each_cycle_mutates_an_independent_sample() {
        // Two recorded frames differ only by their own mutations (and the
        // random source MAC), never by compounding: both decode to the
        // template's full frame length.
        let packets = History::with_capacity(4);
        let mut transmitter = transmitter_with(Box::new(RecordingSender::default()), packets.clone());
        transmitter.cycle();
        transmitter.cycle();
        let records = packets.snapshot();
        assert_eq!(hex::decode(&records[0].hex).unwrap().len(), 54);
        assert_eq!(hex::decode(&records[1].hex).unwrap().len(), 54);
    }

    #[test]
    fn packet_history_evicts_oldest_at_capacity() {
        let packets = History::with_capacity(2);
        let mut transmitter = transmitter_with(Box::new(RecordingSender::default()), packets.clone());
        for _ in 0..5 {
            transmitter.cycle();
        }
        let records = packets.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 3);
        assert_eq!(records[1].sequence, 4);
    }
}
