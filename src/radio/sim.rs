//! In-process simulated radio link
//!
//! Both endpoints share one set of per-pipe queues. Sends can be lost or
//! delivered with a flipped bit, driven by a seeded ChaCha8 RNG so runs are
//! reproducible.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{PipeAddresses, Radio, RadioError, RadioResult};
use crate::protocol::{RawFrame, FRAME_SIZE};

/// Impairments applied to every send
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfig {
    /// Probability a send is lost and reported as failed [0.0, 1.0]
    pub loss_rate: f64,
    /// Probability a delivered frame has one bit flipped [0.0, 1.0]
    pub corrupt_rate: f64,
    /// Random seed for determinism
    pub seed: u64,
}

impl LinkConfig {
    /// No impairments
    pub fn perfect(seed: u64) -> Self {
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            seed,
        }
    }
}

/// Counters kept by the link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub lost: u64,
    pub corrupted: u64,
    pub delivered: u64,
}

#[derive(Debug)]
struct LinkState {
    config: LinkConfig,
    rng: ChaCha8Rng,
    queues: HashMap<u64, VecDeque<RawFrame>>,
    stats: LinkStats,
}

impl LinkState {
    fn transmit(&mut self, pipe: u64, frame: &RawFrame) -> bool {
        self.stats.sent += 1;

        if self.rng.gen_bool(self.config.loss_rate.clamp(0.0, 1.0)) {
            self.stats.lost += 1;
            return false;
        }

        let mut frame = *frame;
        if self.rng.gen_bool(self.config.corrupt_rate.clamp(0.0, 1.0)) {
            let bit = self.rng.gen_range(0..FRAME_SIZE * 8);
            frame[bit / 8] ^= 1 << (bit % 8);
            self.stats.corrupted += 1;
        }

        self.queues.entry(pipe).or_default().push_back(frame);
        self.stats.delivered += 1;
        true
    }
}

/// A shared medium that hands out radio endpoints
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    state: Arc<Mutex<LinkState>>,
}

impl SimulatedLink {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                config,
                rng: ChaCha8Rng::seed_from_u64(config.seed),
                queues: HashMap::new(),
                stats: LinkStats::default(),
            })),
        }
    }

    /// A new endpoint on this link; call `open` before use
    pub fn endpoint(&self) -> SimRadio {
        SimRadio {
            state: self.state.clone(),
            pipes: None,
        }
    }

    pub fn stats(&self) -> LinkStats {
        lock(&self.state).stats
    }

    /// Frames delivered but not yet received on any pipe
    pub fn in_flight(&self) -> usize {
        lock(&self.state).queues.values().map(VecDeque::len).sum()
    }
}

/// One endpoint of a `SimulatedLink`
#[derive(Debug)]
pub struct SimRadio {
    state: Arc<Mutex<LinkState>>,
    pipes: Option<PipeAddresses>,
}

impl Radio for SimRadio {
    fn open(&mut self, pipes: PipeAddresses) -> RadioResult<()> {
        if pipes.writing == pipes.reading {
            return Err(RadioError::SamePipes(pipes.writing));
        }
        self.pipes = Some(pipes);
        Ok(())
    }

    fn send(&mut self, frame: &RawFrame) -> bool {
        match self.pipes {
            Some(pipes) => lock(&self.state).transmit(pipes.writing, frame),
            None => false,
        }
    }

    fn poll(&mut self) -> bool {
        let Some(pipes) = self.pipes else {
            return false;
        };
        lock(&self.state)
            .queues
            .get(&pipes.reading)
            .is_some_and(|queue| !queue.is_empty())
    }

    fn receive(&mut self) -> Option<RawFrame> {
        let pipes = self.pipes?;
        lock(&self.state)
            .queues
            .get_mut(&pipes.reading)
            .and_then(VecDeque::pop_front)
    }
}

fn lock(state: &Mutex<LinkState>) -> MutexGuard<'_, LinkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    fn open_pair(link: &SimulatedLink) -> (SimRadio, SimRadio) {
        let mut tx = link.endpoint();
        let mut rx = link.endpoint();
        tx.open(PipeAddresses::default_for(Role::Transmitter)).unwrap();
        rx.open(PipeAddresses::default_for(Role::Receiver)).unwrap();
        (tx, rx)
    }

    #[test]
    fn test_perfect_link_preserves_order() {
        let link = SimulatedLink::new(LinkConfig::perfect(1));
        let (mut tx, mut rx) = open_pair(&link);

        for i in 0..5u8 {
            assert!(tx.send(&[i; FRAME_SIZE]));
        }
        assert_eq!(link.in_flight(), 5);

        for i in 0..5u8 {
            assert!(rx.poll());
            assert_eq!(rx.receive(), Some([i; FRAME_SIZE]));
        }
        assert!(!rx.poll());
        assert_eq!(rx.receive(), None);
        // nothing comes back to the transmitter's own reading pipe
        assert!(!tx.poll());
    }

    #[test]
    fn test_total_loss() {
        let link = SimulatedLink::new(LinkConfig {
            loss_rate: 1.0,
            corrupt_rate: 0.0,
            seed: 7,
        });
        let (mut tx, mut rx) = open_pair(&link);

        assert!(!tx.send(&[1; FRAME_SIZE]));
        assert!(!rx.poll());
        assert_eq!(
            link.stats(),
            LinkStats {
                sent: 1,
                lost: 1,
                corrupted: 0,
                delivered: 0
            }
        );
    }

    #[test]
    fn test_corruption_flips_one_bit() {
        let link = SimulatedLink::new(LinkConfig {
            loss_rate: 0.0,
            corrupt_rate: 1.0,
            seed: 3,
        });
        let (mut tx, mut rx) = open_pair(&link);

        let frame = [0u8; FRAME_SIZE];
        assert!(tx.send(&frame));
        let received = rx.receive().unwrap();
        let flipped: u32 = received.iter().map(|b| b.count_ones()).sum();
        assert_eq!(flipped, 1);
        assert_eq!(link.stats().corrupted, 1);
    }

    #[test]
    fn test_same_seed_same_losses() {
        let config = LinkConfig {
            loss_rate: 0.3,
            corrupt_rate: 0.0,
            seed: 99,
        };
        let run = || {
            let link = SimulatedLink::new(config);
            let (mut tx, _rx) = open_pair(&link);
            (0..50).map(|_| tx.send(&[0; FRAME_SIZE])).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_unopened_endpoint() {
        let link = SimulatedLink::new(LinkConfig::perfect(0));
        let mut radio = link.endpoint();
        assert!(!radio.send(&[0; FRAME_SIZE]));
        assert!(!radio.poll());
        assert_eq!(radio.receive(), None);
    }
}
