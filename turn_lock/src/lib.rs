use std::hint::spin_loop;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use log::trace;

pub struct TurnLock {
    turn: Arc<AtomicUsize>,
    index: usize,
    num_turns: usize,
}

impl TurnLock {
    pub fn new(num_turns: usize) -> Vec<Self> {
        let turn = Arc::new(AtomicUsize::new(0));
        let mut r = Vec::new();
        for i in 0..num_turns {
            r.push(TurnLock {
                turn: turn.clone(),
                index: i,
                num_turns,
            })
        }
        r
    }

    pub fn wait(&mut self) {
        while self.turn.load(Ordering::Acquire) != self.index {
            spin_loop();
        }
        assert_eq!(self.turn.load(Ordering::Relaxed), self.index);
    }

    pub fn next(&mut self) {
        assert_eq!(self.turn.load(Ordering::Relaxed), self.index);
        if self
            .turn
            .compare_exchange(
                self.index,
                (self.index + 1) % self.num_turns,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_err()
        {
            panic!("Released lock out of turn");
        }
    }

    pub fn current(&self) -> usize {
        self.turn.load(Ordering::SeqCst)
    }
}

/// Runs `f` once for every participant, each on a thread of its own, one
/// participant at a time in slice order.
///
/// A participant that is done keeps spinning until every other one is done
/// too, and this returns once they all left.
pub fn run_in_turns<T, F>(participants: &[T], f: F)
where
    T: Sync,
    F: Fn(&T) + Sync,
{
    if participants.is_empty() {
        return;
    }
    let total = participants.len();
    let finished = AtomicUsize::new(0);
    let f = &f;
    let finished = &finished;
    thread::scope(|s| {
        for (mut turn, participant) in TurnLock::new(total).into_iter().zip(participants) {
            s.spawn(move || {
                turn.wait();
                trace!("turn {} of {}", turn.index, total);
                f(participant);
                finished.fetch_add(1, Ordering::AcqRel);
                turn.next();
                while finished.load(Ordering::Acquire) != total {
                    spin_loop();
                }
            });
        }
    });
}
