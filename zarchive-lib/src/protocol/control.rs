//! The control envelope: session handshake and the sequence-numbered
//! packaging that gives the channel exactly-once semantics.

use crate::protocol::message::{DRequest, DResponse};
use crate::zgram::Profile;
use serde::{Deserialize, Serialize};

pub mod crequests {
    use super::*;

    /// Must be the first frame on every new channel.
    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Hello {
        pub profile: Profile,
    }

    /// Second frame: start a brand new session.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CreateSession {}

    /// Second frame: rebind an existing session to this channel and replay
    /// everything at or after `next_expected_response_id`.
    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AttachToSession {
        pub existing_session_guid: String,
        pub next_expected_response_id: u64,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct PackagedRequest {
        pub request_id: u64,
        pub next_expected_response_id: u64,
        pub request: DRequest,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CRequest {
    Hello(crequests::Hello),
    CreateSession(crequests::CreateSession),
    AttachToSession(crequests::AttachToSession),
    PackagedRequest(crequests::PackagedRequest),
}
tagged_json!(CRequest {
    "Hello" => Hello,
    "CreateSession" => CreateSession,
    "AttachToSession" => AttachToSession,
    "PackagedRequest" => PackagedRequest,
});

pub mod cresponses {
    use super::*;

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SessionSuccess {
        pub assigned_session_guid: String,
        pub next_expected_request_id: u64,
        pub profile: Profile,
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SessionFailure {}

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct PackagedResponse {
        pub response_id: u64,
        pub next_expected_request_id: u64,
        pub response: DResponse,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CResponse {
    SessionSuccess(cresponses::SessionSuccess),
    SessionFailure(cresponses::SessionFailure),
    PackagedResponse(cresponses::PackagedResponse),
}
tagged_json!(CResponse {
    "SessionSuccess" => SessionSuccess,
    "SessionFailure" => SessionFailure,
    "PackagedResponse" => PackagedResponse,
});

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::message::drequests;

    #[test]
    fn test_crequest_round_trip() {
        let requests = vec![
            CRequest::Hello(crequests::Hello {
                profile: Profile::new("kosak", "Corey Kosak"),
            }),
            CRequest::CreateSession(crequests::CreateSession {}),
            CRequest::AttachToSession(crequests::AttachToSession {
                existing_session_guid: "guid-1234".to_string(),
                next_expected_response_id: 17,
            }),
            CRequest::PackagedRequest(crequests::PackagedRequest {
                request_id: 3,
                next_expected_response_id: 5,
                request: DRequest::Ping(drequests::Ping { cookie: 9 }),
            }),
        ];
        for req in requests {
            let text = serde_json::to_string(&req).unwrap();
            let back: CRequest = serde_json::from_str(&text).unwrap();
            assert_eq!(back, req);
        }
    }

    #[test]
    fn test_cresponse_round_trip() {
        let responses = vec![
            CResponse::SessionSuccess(cresponses::SessionSuccess {
                assigned_session_guid: "guid-1234".to_string(),
                next_expected_request_id: 0,
                profile: Profile::new("kosak", "Corey Kosak"),
            }),
            CResponse::SessionFailure(cresponses::SessionFailure {}),
            CResponse::PackagedResponse(cresponses::PackagedResponse {
                response_id: 11,
                next_expected_request_id: 4,
                response: DResponse::AckPing(crate::protocol::message::dresponses::AckPing {
                    cookie: 9,
                }),
            }),
        ];
        for resp in responses {
            let text = serde_json::to_string(&resp).unwrap();
            let back: CResponse = serde_json::from_str(&text).unwrap();
            assert_eq!(back, resp);
        }
    }

    #[test]
    fn test_hello_wire_shape() {
        let req = CRequest::Hello(crequests::Hello {
            profile: Profile::new("kosak", "Corey Kosak"),
        });
        let text = serde_json::to_string(&req).unwrap();
        assert_eq!(
            text,
            r#"["Hello",{"profile":{"user_id":"kosak","signature":"Corey Kosak"}}]"#
        );
    }
}
