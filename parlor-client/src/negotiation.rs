//! Per-remote-peer negotiation state for the perfect-negotiation pattern.
//!
//! Everything here is plain state bookkeeping; the browser glue in
//! `engine` consults it before touching the peer connection, which keeps
//! the glare rules testable off the browser.

use serde_json::Value;
use std::collections::VecDeque;

/// Deferred offers give up after this many attempts.
pub const MAX_OFFER_RETRIES: u8 = 8;

/// Delay before re-trying an offer against a non-stable connection.
pub const OFFER_RETRY_DELAY_MS: i32 = 250;

/// What to do with an incoming session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    /// No glare; apply it directly.
    Apply,
    /// Glare and we are polite: roll back the local offer, then apply.
    Rollback,
    /// Glare and we are impolite: drop it and latch `ignore_offer`.
    Ignore,
}

#[derive(Debug, Default)]
pub struct Negotiation {
    polite: bool,
    making_offer: bool,
    ignore_offer: bool,
    setting_remote_answer: bool,
    pending_candidates: VecDeque<Value>,
    offer_retries: u8,
}

/// The lexicographically smaller id yields on glare.
pub fn is_polite(self_id: &str, remote_id: &str) -> bool {
    self_id < remote_id
}

impl Negotiation {
    pub fn new(self_id: &str, remote_id: &str) -> Self {
        Self {
            polite: is_polite(self_id, remote_id),
            ..Self::default()
        }
    }

    pub fn polite(&self) -> bool {
        self.polite
    }

    /// Re-derives politeness, e.g. after a `welcome` assigned our id.
    pub fn set_polite(&mut self, self_id: &str, remote_id: &str) {
        self.polite = is_polite(self_id, remote_id);
    }

    /// Marks the start of a local offer. Returns false when one is already
    /// in flight.
    pub fn begin_offer(&mut self) -> bool {
        if self.making_offer {
            return false;
        }
        self.making_offer = true;
        true
    }

    pub fn finish_offer(&mut self) {
        self.making_offer = false;
    }

    /// Classifies an incoming description. `signaling_stable` is the live
    /// signaling state of the connection at receipt time.
    pub fn decide_offer(&mut self, incoming_offer: bool, signaling_stable: bool) -> OfferDecision {
        let collision = incoming_offer
            && (self.making_offer || !signaling_stable || self.setting_remote_answer);
        if !collision {
            return OfferDecision::Apply;
        }
        if self.polite {
            OfferDecision::Rollback
        } else {
            self.ignore_offer = true;
            OfferDecision::Ignore
        }
    }

    pub fn begin_remote_answer(&mut self) {
        self.setting_remote_answer = true;
    }

    /// A remote description was applied successfully: the glare latch
    /// clears, and an answer ends the answer-pending window.
    pub fn remote_description_applied(&mut self, was_answer: bool) {
        self.ignore_offer = false;
        if was_answer {
            self.setting_remote_answer = false;
        }
    }

    /// The answer apply failed; drop the pending window without touching
    /// the glare latch.
    pub fn abort_remote_answer(&mut self) {
        self.setting_remote_answer = false;
    }

    /// Candidates from a peer whose offer we ignored are dropped too.
    pub fn should_drop_candidate(&self) -> bool {
        self.ignore_offer
    }

    pub fn queue_candidate(&mut self, candidate: Value) {
        self.pending_candidates.push_back(candidate);
    }

    /// Hands back queued candidates in arrival order.
    pub fn drain_candidates(&mut self) -> Vec<Value> {
        self.pending_candidates.drain(..).collect()
    }

    /// Books another deferred-offer attempt, or `None` once the budget is
    /// spent.
    pub fn next_retry(&mut self) -> Option<u8> {
        if self.offer_retries >= MAX_OFFER_RETRIES {
            return None;
        }
        self.offer_retries += 1;
        Some(self.offer_retries)
    }

    pub fn reset_retries(&mut self) {
        self.offer_retries = 0;
    }
}
