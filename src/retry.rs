//! # Retry Controller
//!
//! Soft retry bookkeeping for the packet currently being transmitted.
//!
//! The transceiver already performs its own hardware retries (acknowledgement
//! wait and CSMA backoff, configured through `hard_retries`). A TX failure
//! interrupt therefore means the hardware gave up; this controller decides
//! whether the packet is sent again from the head of the TX queue or dropped
//! for good.
//!
//! - fast-fail packets are never retried
//! - otherwise up to `soft_retries` additional attempts are made
//! - any terminal outcome resets the counter for the next packet

use crate::status::TxOutcome;

/// What to do with a packet after a failed transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the packet back at the TX queue head; `attempt` is the retry count so far
    Retry { attempt: u8 },
    /// Terminal failure, the packet goes back to the pool
    GiveUp(TxOutcome),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryController {
    retry_number: u8,
}

impl RetryController {
    pub const fn new() -> Self {
        RetryController { retry_number: 0 }
    }

    pub fn on_tx_failure(&mut self, soft_retries: u8, fast_fail: bool) -> RetryDecision {
        if fast_fail {
            self.retry_number = 0;
            return RetryDecision::GiveUp(TxOutcome::FastFail);
        }
        if self.retry_number < soft_retries {
            self.retry_number += 1;
            RetryDecision::Retry { attempt: self.retry_number }
        } else {
            self.retry_number = 0;
            RetryDecision::GiveUp(TxOutcome::RetriesExhausted)
        }
    }

    pub fn on_tx_success(&mut self) {
        self.retry_number = 0;
    }

    pub fn reset(&mut self) {
        self.retry_number = 0;
    }

    pub fn retry_number(&self) -> u8 {
        self.retry_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_up_to_soft_limit() {
        let mut retry = RetryController::new();
        assert_eq!(retry.on_tx_failure(2, false), RetryDecision::Retry { attempt: 1 });
        assert_eq!(retry.on_tx_failure(2, false), RetryDecision::Retry { attempt: 2 });
        assert_eq!(retry.on_tx_failure(2, false), RetryDecision::GiveUp(TxOutcome::RetriesExhausted));
        assert_eq!(retry.retry_number(), 0);
    }

    #[test]
    fn zero_soft_retries_gives_up_immediately() {
        let mut retry = RetryController::new();
        assert_eq!(retry.on_tx_failure(0, false), RetryDecision::GiveUp(TxOutcome::RetriesExhausted));
    }

    #[test]
    fn fast_fail_never_retries() {
        let mut retry = RetryController::new();
        assert_eq!(retry.on_tx_failure(5, true), RetryDecision::GiveUp(TxOutcome::FastFail));
        assert_eq!(retry.retry_number(), 0);
    }

    #[test]
    fn success_clears_counter() {
        let mut retry = RetryController::new();
        retry.on_tx_failure(3, false);
        assert_eq!(retry.retry_number(), 1);
        retry.on_tx_success();
        assert_eq!(retry.retry_number(), 0);
    }
}
