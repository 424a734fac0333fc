//! [`BusRequest`]: a prepared master telegram plus its completion slot.

use crate::error::Error;
use crate::symbol::{MasterSymbols, SlaveSymbols};
use tokio::sync::oneshot;

/// Final outcome of a [`BusRequest`].
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// The exchange completed; `slave` is `Some` only for slave-destined
    /// (MS) telegrams.
    Success {
        /// The decoded slave response, if any.
        slave: Option<SlaveSymbols>,
    },
    /// The exchange failed after exhausting its retries.
    Failed(Error),
    /// The request was cancelled before the protocol thread reached it.
    Cancelled,
}

/// An active or poll-generated request to transmit a master telegram.
///
/// Mirrors upstream's `BusRequest`/`ActiveBusRequest` split: an active
/// request carries a completion channel the submitting client awaits on;
/// a poll-generated request has none and its result is simply folded into
/// the catalog cache.
pub struct BusRequest {
    master: MasterSymbols,
    arbitration_retries: u32,
    completion: Option<oneshot::Sender<RequestOutcome>>,
}

impl BusRequest {
    /// Build an active request whose outcome is reported on `completion`.
    pub fn active(master: MasterSymbols, completion: oneshot::Sender<RequestOutcome>) -> Self {
        Self {
            master,
            arbitration_retries: 0,
            completion: Some(completion),
        }
    }

    /// Build a poll-generated request with no completion channel.
    pub fn poll(master: MasterSymbols) -> Self {
        Self {
            master,
            arbitration_retries: 0,
            completion: None,
        }
    }

    /// The prepared master telegram.
    pub fn master(&self) -> &MasterSymbols {
        &self.master
    }

    /// Number of times arbitration has been lost for this request so far.
    pub fn arbitration_retries(&self) -> u32 {
        self.arbitration_retries
    }

    pub(super) fn record_arbitration_retry(&mut self) {
        self.arbitration_retries += 1;
    }

    /// Deliver the final outcome to the waiting client, if any (a
    /// poll-generated request simply discards it here; the caller is
    /// expected to have already folded it into the cache).
    pub fn complete(&mut self, outcome: RequestOutcome) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }

    /// Mark the request cancelled, notifying the waiting client if any.
    pub fn cancel(&mut self) {
        self.complete(RequestOutcome::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn active_request_delivers_outcome_to_completion_channel() {
        let (tx, rx) = oneshot::channel();
        let mut request = BusRequest::active(MasterSymbols::new(), tx);
        assert_eq!(request.arbitration_retries(), 0);
        request.record_arbitration_retry();
        assert_eq!(request.arbitration_retries(), 1);
        request.complete(RequestOutcome::Success { slave: None });
        match rx.await.unwrap() {
            RequestOutcome::Success { slave } => assert!(slave.is_none()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_request_completion_is_a_no_op() {
        let mut request = BusRequest::poll(MasterSymbols::new());
        request.complete(RequestOutcome::Success { slave: None });
    }

    #[tokio::test]
    async fn cancel_notifies_waiting_client() {
        let (tx, rx) = oneshot::channel();
        let mut request = BusRequest::active(MasterSymbols::new(), tx);
        request.cancel();
        assert!(matches!(rx.await.unwrap(), RequestOutcome::Cancelled));
    }
}
