//! The sequence-numbered replay layer that makes an unreliable channel
//! behave like exactly-once delivery.
//!
//! Each direction of the duplex link carries its own monotonically
//! increasing id. Outbound frames are retained until the peer's echoed
//! "next expected" acknowledges them; inbound frames with any id other than
//! the expected one are duplicates and are dropped silently.

use crate::error::Error;
use crate::protocol::control::{cresponses, crequests, CRequest, CResponse};
use crate::protocol::message::{DRequest, DResponse};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct Robustifier {
    next_outgoing_id: u64,
    next_expected_incoming_id: u64,
    unacknowledged_outgoing: VecDeque<(u64, String)>,
}

impl Robustifier {
    pub fn new() -> Robustifier {
        Robustifier::default()
    }

    /// Stamps the next outgoing id on a frame built by `build(id, ack)`,
    /// retains the serialized frame for replay, and returns it for sending.
    pub fn package(
        &mut self,
        build: impl FnOnce(u64, u64) -> Result<String, Error>,
    ) -> Result<String, Error> {
        let id = self.next_outgoing_id;
        let frame = build(id, self.next_expected_incoming_id)?;
        self.next_outgoing_id = id + 1;
        self.unacknowledged_outgoing.push_back((id, frame.clone()));
        Ok(frame)
    }

    /// Admits an incoming frame. False means duplicate or out-of-order:
    /// drop it silently. The peer's echoed next-expected-outgoing acts as an
    /// ack and trims the replay queue.
    pub fn note_incoming(&mut self, incoming_id: u64, peer_next_expected_outgoing: u64) -> bool {
        if incoming_id != self.next_expected_incoming_id {
            return false;
        }
        self.next_expected_incoming_id += 1;
        self.trim(peer_next_expected_outgoing);
        true
    }

    /// The frames a reconnecting peer has not confirmed, in order, with
    /// their original ids. Everything before the peer's next-expected is
    /// acknowledged and dropped.
    pub fn catchup_frames(&mut self, peer_next_expected_outgoing: u64) -> Vec<String> {
        self.trim(peer_next_expected_outgoing);
        self.unacknowledged_outgoing
            .iter()
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    fn trim(&mut self, peer_next_expected_outgoing: u64) {
        while let Some((id, _)) = self.unacknowledged_outgoing.front() {
            if *id < peer_next_expected_outgoing {
                self.unacknowledged_outgoing.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn next_outgoing_id(&self) -> u64 {
        self.next_outgoing_id
    }

    pub fn next_expected_incoming_id(&self) -> u64 {
        self.next_expected_incoming_id
    }

    #[cfg(test)]
    pub fn unacknowledged_len(&self) -> usize {
        self.unacknowledged_outgoing.len()
    }
}

/// The backend's view: receives requests, sends responses.
#[derive(Debug, Default)]
pub struct BackendRobustifier {
    rb: Robustifier,
}

impl BackendRobustifier {
    pub fn new() -> BackendRobustifier {
        BackendRobustifier::default()
    }

    pub fn package_response(&mut self, response: DResponse) -> Result<String, Error> {
        self.rb.package(move |id, ack| {
            let frame = CResponse::PackagedResponse(cresponses::PackagedResponse {
                response_id: id,
                next_expected_request_id: ack,
                response,
            });
            serde_json::to_string(&frame).map_err(|e| Error::from((e, file!(), line!())))
        })
    }

    pub fn note_incoming(&mut self, pr: &crequests::PackagedRequest) -> bool {
        self.rb.note_incoming(pr.request_id, pr.next_expected_response_id)
    }

    pub fn catchup_frames(&mut self, next_expected_response_id: u64) -> Vec<String> {
        self.rb.catchup_frames(next_expected_response_id)
    }

    pub fn next_expected_request_id(&self) -> u64 {
        self.rb.next_expected_incoming_id()
    }
}

/// The frontend's view: sends requests, receives responses. Lives here so
/// that tests (and any future native client) can drive a real server.
#[derive(Debug, Default)]
pub struct FrontendRobustifier {
    rb: Robustifier,
}

impl FrontendRobustifier {
    pub fn new() -> FrontendRobustifier {
        FrontendRobustifier::default()
    }

    pub fn package_request(&mut self, request: DRequest) -> Result<String, Error> {
        self.rb.package(move |id, ack| {
            let frame = CRequest::PackagedRequest(crequests::PackagedRequest {
                request_id: id,
                next_expected_response_id: ack,
                request,
            });
            serde_json::to_string(&frame).map_err(|e| Error::from((e, file!(), line!())))
        })
    }

    pub fn note_incoming(&mut self, pr: &cresponses::PackagedResponse) -> bool {
        self.rb.note_incoming(pr.response_id, pr.next_expected_request_id)
    }

    pub fn catchup_frames(&mut self, next_expected_request_id: u64) -> Vec<String> {
        self.rb.catchup_frames(next_expected_request_id)
    }

    pub fn next_expected_response_id(&self) -> u64 {
        self.rb.next_expected_incoming_id()
    }
}
