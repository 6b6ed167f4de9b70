use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Spaces calls at least `interval` apart across every thread that shares
/// the throttle.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Blocks until the caller's reserved slot arrives.
    pub fn wait(&self) {
        let delay = {
            let mut next_slot = self
                .next_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let slot = match *next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            *next_slot = Some(slot + self.interval);
            slot - now
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn first_call_does_not_wait() {
        let throttle = Throttle::new(Duration::from_secs(5));
        let start = Instant::now();
        throttle.wait();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn concurrent_callers_are_spaced() {
        let throttle = Arc::new(Throttle::new(Duration::from_millis(50)));
        let start = Instant::now();
        let handles = (0..4)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                thread::spawn(move || {
                    throttle.wait();
                    Instant::now()
                })
            })
            .collect::<Vec<_>>();
        let mut finished = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>();
        finished.sort();

        assert!(finished[3].duration_since(start) >= Duration::from_millis(150));
    }
}
