//! A session: the durable identity of one client across any number of
//! channels. Owns the backend robustifier; replaced channels are shut down
//! and the replay queue is caught up on the new one.

use crate::comm::channel::{Channel, ChannelId};
use crate::comm::robustifier::BackendRobustifier;
use crate::error::Error;
use crate::protocol::control::crequests::PackagedRequest;
use crate::protocol::message::DResponse;
use crate::zgram::Profile;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

static NEXT_FREE_SESSION_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session{}", self.0)
    }
}

#[derive(Debug)]
struct SessionInner {
    robustifier: BackendRobustifier,
    channel: Arc<Channel>,
    last_activity: SystemTime,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    guid: String,
    profile: Arc<Profile>,
    // Touched from the communicator task (incoming) and the server task
    // (outgoing); never held across an await.
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn create(profile: Arc<Profile>, channel: Arc<Channel>) -> Arc<Session> {
        let id = SessionId(NEXT_FREE_SESSION_ID.fetch_add(1, Ordering::Relaxed));
        let guid = uuid::Uuid::new_v4().to_string();
        Arc::new(Session {
            id,
            guid,
            profile,
            inner: Mutex::new(SessionInner {
                robustifier: BackendRobustifier::new(),
                channel,
                last_activity: SystemTime::now(),
            }),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.profile
    }

    pub fn last_activity(&self) -> SystemTime {
        self.inner.lock().unwrap().last_activity
    }

    /// Robustifies and sends one response on the current channel. The frame
    /// stays queued for replay even if the channel is already gone.
    pub fn send_response(&self, response: DResponse) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let frame = inner.robustifier.package_response(response)?;
        let channel = inner.channel.clone();
        drop(inner);
        channel.send(frame)
    }

    /// Admits an incoming request; false means duplicate, drop it.
    pub fn note_incoming_request(&self, pr: &PackagedRequest) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.last_activity = SystemTime::now();
        inner.robustifier.note_incoming(pr)
    }

    /// Replays every unconfirmed response at or after the peer's
    /// next-expected id onto `channel`, in order, with original ids.
    pub fn catchup(&self, next_expected_response_id: u64, channel: &Channel) -> Result<(), Error> {
        let frames = {
            let mut inner = self.inner.lock().unwrap();
            inner.robustifier.catchup_frames(next_expected_response_id)
        };
        for frame in frames {
            channel.send(frame)?;
        }
        Ok(())
    }

    /// Binds the session to a new channel, returning the old one so the
    /// caller can shut it down.
    pub fn swap_channel(&self, new_channel: Arc<Channel>) -> Arc<Channel> {
        let mut inner = self.inner.lock().unwrap();
        inner.last_activity = SystemTime::now();
        std::mem::replace(&mut inner.channel, new_channel)
    }

    pub fn channel_id(&self) -> ChannelId {
        self.inner.lock().unwrap().channel.id()
    }

    pub fn next_expected_request_id(&self) -> u64 {
        self.inner.lock().unwrap().robustifier.next_expected_request_id()
    }
}
