//! The wire protocol: line-delimited JSON frames, one logical frame per line.
//!
//! The outer envelope ([`control::CRequest`] / [`control::CResponse`]) handles
//! the session handshake and exactly-once sequencing; the inner payloads
//! ([`message::DRequest`] / [`message::DResponse`]) are the archive
//! operations themselves.

pub mod control;
pub mod message;

use serde::{Deserialize, Serialize};

/// One side's "how much more is there" report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    pub count: u64,
    pub exact: bool,
}

/// Estimates for both paging directions of a subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimates {
    pub front: Estimate,
    pub back: Estimate,
}

impl Estimates {
    pub fn create(front_size: u64, back_size: u64, front_is_exact: bool, back_is_exact: bool) -> Estimates {
        Estimates {
            front: Estimate {
                count: front_size,
                exact: front_is_exact,
            },
            back: Estimate {
                count: back_size,
                exact: back_is_exact,
            },
        }
    }
}
