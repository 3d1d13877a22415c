//! The data-plane payloads: what a subscribed client can ask for and what it
//! gets back.

use crate::protocol::Estimates;
use crate::zgram::{MetadataRecord, SearchOrigin, Zgram, ZgramCore, ZgramId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod drequests {
    use super::*;

    /// Parse-only echo of a query string.
    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CheckSyntax {
        pub query: String,
    }

    /// Open the standing query for this session.
    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct Subscribe {
        pub query: String,
        pub start_origin: SearchOrigin,
        pub page_size: u64,
        pub query_margin: u64,
    }

    /// Page in one direction.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GetMoreZgrams {
        /// true for the back (newer) side; false for the front (older) side.
        pub for_back_side: bool,
        /// Request at most this many zgrams (trimmed to the page size).
        pub count: u64,
    }

    /// Post new zgrams; each entry optionally names the zgram it refers to.
    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct PostZgrams {
        pub entries: Vec<(ZgramCore, Option<ZgramId>)>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct PostMetadata {
        pub metadata: Vec<MetadataRecord>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GetSpecificZgrams {
        pub zgram_ids: Vec<ZgramId>,
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Ping {
        pub cookie: u64,
    }
}

/// A data request, as carried inside a PackagedRequest.
#[derive(Clone, Debug, PartialEq)]
pub enum DRequest {
    CheckSyntax(drequests::CheckSyntax),
    Subscribe(drequests::Subscribe),
    GetMoreZgrams(drequests::GetMoreZgrams),
    PostZgrams(drequests::PostZgrams),
    PostMetadata(drequests::PostMetadata),
    GetSpecificZgrams(drequests::GetSpecificZgrams),
    Ping(drequests::Ping),
}
tagged_json!(DRequest {
    "CheckSyntax" => CheckSyntax,
    "Subscribe" => Subscribe,
    "GetMoreZgrams" => GetMoreZgrams,
    "PostZgrams" => PostZgrams,
    "PostMetadata" => PostMetadata,
    "GetSpecificZgrams" => GetSpecificZgrams,
    "Ping" => Ping,
});

pub mod dresponses {
    use super::*;

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AckSyntaxCheck {
        pub text: String,
        pub valid: bool,
        pub result: String,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct AckSubscribe {
        pub valid: bool,
        pub error: String,
        pub estimates: Estimates,
    }

    /// Zgram bodies are shared handles into the coordinator's cache; cloning
    /// a response does not copy message text.
    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct AckMoreZgrams {
        pub for_back: bool,
        pub zgrams: Vec<Arc<Zgram>>,
        pub estimates: Estimates,
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct EstimatesUpdate {
        pub estimates: Estimates,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct MetadataUpdate {
        pub records: Vec<Arc<MetadataRecord>>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct AckSpecificZgrams {
        pub zgrams: Vec<Arc<Zgram>>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct PlusPlusUpdate {
        pub entries: Vec<(ZgramId, String, i64)>,
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AckPing {
        pub cookie: u64,
    }

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GeneralError {
        pub message: String,
    }
}

/// A data response, as carried inside a PackagedResponse.
#[derive(Clone, Debug, PartialEq)]
pub enum DResponse {
    AckSyntaxCheck(dresponses::AckSyntaxCheck),
    AckSubscribe(dresponses::AckSubscribe),
    AckMoreZgrams(dresponses::AckMoreZgrams),
    EstimatesUpdate(dresponses::EstimatesUpdate),
    MetadataUpdate(dresponses::MetadataUpdate),
    AckSpecificZgrams(dresponses::AckSpecificZgrams),
    PlusPlusUpdate(dresponses::PlusPlusUpdate),
    AckPing(dresponses::AckPing),
    GeneralError(dresponses::GeneralError),
}
tagged_json!(DResponse {
    "AckSyntaxCheck" => AckSyntaxCheck,
    "AckSubscribe" => AckSubscribe,
    "AckMoreZgrams" => AckMoreZgrams,
    "EstimatesUpdate" => EstimatesUpdate,
    "MetadataUpdate" => MetadataUpdate,
    "AckSpecificZgrams" => AckSpecificZgrams,
    "PlusPlusUpdate" => PlusPlusUpdate,
    "AckPing" => AckPing,
    "GeneralError" => GeneralError,
});
