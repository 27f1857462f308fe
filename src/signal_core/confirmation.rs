//! Confirmation Buffer
//!
//! Per-instrument debounce over raw signals. Only the committed value is
//! ever exposed; a new value must repeat `confirm_count` times in a row
//! before it replaces the committed one.

use serde::{Deserialize, Serialize};

use crate::types::Signal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationBuffer {
    committed: Signal,
    pending: Option<Signal>,
    count: u32,
    confirm_count: u32,
}

impl ConfirmationBuffer {
    pub fn new(confirm_count: u32) -> Self {
        Self {
            committed: Signal::Hold,
            pending: None,
            count: 0,
            confirm_count: confirm_count.max(1),
        }
    }

    pub fn committed(&self) -> Signal {
        self.committed
    }

    pub fn pending(&self) -> Option<(Signal, u32)> {
        self.pending.map(|s| (s, self.count))
    }

    /// Feed one raw signal, get back the committed signal
    pub fn update(&mut self, raw: Signal) -> Signal {
        if raw == self.committed {
            self.pending = None;
            self.count = 0;
            return self.committed;
        }

        if self.pending == Some(raw) {
            self.count += 1;
        } else {
            self.pending = Some(raw);
            self.count = 1;
        }

        if self.count >= self.confirm_count {
            self.committed = raw;
            self.pending = None;
            self.count = 0;
        }
        self.committed
    }
}

impl Default for ConfirmationBuffer {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Signal::{Buy, Hold, Sell};

    fn run(raw: &[Signal]) -> Vec<Signal> {
        let mut buf = ConfirmationBuffer::default();
        raw.iter().map(|s| buf.update(*s)).collect()
    }

    #[test]
    fn test_single_blip_never_flips() {
        assert_eq!(run(&[Buy, Hold, Sell, Hold, Buy]), vec![Hold; 5]);
    }

    #[test]
    fn test_two_in_a_row_commits() {
        assert_eq!(run(&[Buy, Buy, Buy]), vec![Hold, Buy, Buy]);
        assert_eq!(run(&[Buy, Buy, Sell, Buy, Sell, Sell]), vec![Hold, Buy, Buy, Buy, Buy, Sell]);
    }

    #[test]
    fn test_return_to_committed_clears_pending() {
        let mut buf = ConfirmationBuffer::default();
        buf.update(Buy);
        assert_eq!(buf.pending(), Some((Buy, 1)));
        buf.update(Hold);
        assert_eq!(buf.pending(), None);
        assert_eq!(buf.update(Buy), Hold);
    }

    #[test]
    fn test_exposed_signal_changes_only_after_repeat() {
        // Every possible 6-long sequence over three values
        let values = [Buy, Sell, Hold];
        for n in 0..3usize.pow(6) {
            let mut idx = n;
            let raw: Vec<Signal> = (0..6)
                .map(|_| {
                    let s = values[idx % 3];
                    idx /= 3;
                    s
                })
                .collect();
            let out = run(&raw);
            let mut prev = Hold;
            for (i, s) in out.iter().enumerate() {
                if *s != prev {
                    assert!(i >= 1 && raw[i] == *s && raw[i - 1] == *s, "{:?} -> {:?}", raw, out);
                }
                prev = *s;
            }
        }
    }

    #[test]
    fn test_confirm_count_one_is_passthrough() {
        let mut buf = ConfirmationBuffer::new(1);
        assert_eq!(buf.update(Sell), Sell);
        assert_eq!(buf.update(Buy), Buy);
        assert_eq!(ConfirmationBuffer::new(0).update(Buy), Buy);
    }
}
