//! The listener and the handshake router. One task accepts sockets and
//! spawns channel pairs; another owns the channel/session maps, walks each
//! channel through Hello → CreateSession/AttachToSession, unwraps packaged
//! requests, and hands (session, request) pairs to the server loop.

use crate::comm::channel::{Channel, ChannelEvent, ChannelId};
use crate::comm::session::Session;
use crate::error::Error;
use crate::protocol::control::{cresponses, crequests, CRequest, CResponse};
use crate::server::ServerEvent;
use crate::zgram::Profile;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Communicator {
    listen_port: u16,
    listener_handle: JoinHandle<()>,
    router_handle: JoinHandle<()>,
}

impl Communicator {
    /// Binds the port (0 picks an ephemeral one) and starts the listener
    /// and router tasks. Admitted requests flow out on `todo`.
    pub async fn start(
        requested_port: u16,
        todo: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<Communicator, Error> {
        let listener = TcpListener::bind(("0.0.0.0", requested_port))
            .await
            .map_err(|e| (e, file!(), line!()))?;
        let listen_port = listener
            .local_addr()
            .map_err(|e| (e, file!(), line!()))?
            .port();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let listener_handle = tokio::spawn(listen_forever(listener, events_tx));
        let router_handle = tokio::spawn(Router::new(todo).run(events_rx));

        Ok(Communicator {
            listen_port,
            listener_handle,
            router_handle,
        })
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn shutdown(&self) {
        self.listener_handle.abort();
        self.router_handle.abort();
    }
}

async fn listen_forever(listener: TcpListener, events: mpsc::UnboundedSender<ChannelEvent>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                tracing::info!("accepted connection from {peer}");
                Channel::spawn(socket, events.clone());
            }
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                return;
            }
        }
    }
}

/// Owns the handshake state. Single task, so no synchronization is needed
/// around the maps.
struct Router {
    todo: mpsc::UnboundedSender<ServerEvent>,
    channels: BTreeMap<ChannelId, Arc<Channel>>,
    pending_profiles: BTreeMap<ChannelId, Arc<Profile>>,
    channel_to_session: BTreeMap<ChannelId, Arc<Session>>,
    guid_to_session: BTreeMap<String, Arc<Session>>,
}

impl Router {
    fn new(todo: mpsc::UnboundedSender<ServerEvent>) -> Router {
        Router {
            todo,
            channels: BTreeMap::new(),
            pending_profiles: BTreeMap::new(),
            channel_to_session: BTreeMap::new(),
            guid_to_session: BTreeMap::new(),
        }
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Startup(channel) => {
                    self.channels.insert(channel.id(), channel);
                }
                ChannelEvent::Shutdown(channel) => {
                    self.channels.remove(&channel.id());
                    self.pending_profiles.remove(&channel.id());
                    // The session (if any) survives and awaits a reattach.
                    self.channel_to_session.remove(&channel.id());
                }
                ChannelEvent::Message(channel, request) => {
                    if let Err(e) = self.handle_request(&channel, request) {
                        tracing::warn!("{}: handshake error, closing: {e}", channel.id());
                        channel.request_shutdown();
                    }
                }
            }
        }
        tracing::debug!("router exiting");
    }

    fn handle_request(&mut self, channel: &Arc<Channel>, request: CRequest) -> Result<(), Error> {
        match request {
            CRequest::Hello(hello) => self.handle_hello(channel, hello),
            CRequest::CreateSession(_) => self.handle_create_session(channel),
            CRequest::AttachToSession(attach) => self.handle_attach(channel, attach),
            CRequest::PackagedRequest(pr) => self.handle_packaged_request(channel, pr),
        }
    }

    fn handle_hello(
        &mut self,
        channel: &Arc<Channel>,
        hello: crequests::Hello,
    ) -> Result<(), Error> {
        if self.pending_profiles.contains_key(&channel.id())
            || self.channel_to_session.contains_key(&channel.id())
        {
            return Err(crate::error::ErrorKind::DuplicateHello.into());
        }
        self.pending_profiles
            .insert(channel.id(), Arc::new(hello.profile));
        Ok(())
    }

    fn handle_create_session(&mut self, channel: &Arc<Channel>) -> Result<(), Error> {
        let Some(profile) = self.pending_profiles.remove(&channel.id()) else {
            return Err(crate::error::ErrorKind::MissingHello.into());
        };
        let session = Session::create(profile, channel.clone());
        self.guid_to_session
            .insert(session.guid().to_string(), session.clone());
        self.channel_to_session.insert(channel.id(), session.clone());

        let response = CResponse::SessionSuccess(cresponses::SessionSuccess {
            assigned_session_guid: session.guid().to_string(),
            next_expected_request_id: 0,
            profile: (*session.profile()).as_ref().clone(),
        });
        send_cresponse(&response, channel)
    }

    fn handle_attach(
        &mut self,
        channel: &Arc<Channel>,
        attach: crequests::AttachToSession,
    ) -> Result<(), Error> {
        let Some(profile) = self.pending_profiles.get(&channel.id()) else {
            return Err(crate::error::ErrorKind::MissingHello.into());
        };

        let session = match self.guid_to_session.get(&attach.existing_session_guid) {
            Some(session) if **session.profile() == **profile => session.clone(),
            _ => {
                // Unknown guid or profile mismatch: refuse, keep the channel.
                let response = CResponse::SessionFailure(cresponses::SessionFailure {});
                return send_cresponse(&response, channel);
            }
        };
        self.pending_profiles.remove(&channel.id());

        // Bind the session to this channel and retire the old one.
        let former = session.swap_channel(channel.clone());
        self.channel_to_session.remove(&former.id());
        former.request_shutdown();
        self.channel_to_session.insert(channel.id(), session.clone());

        let response = CResponse::SessionSuccess(cresponses::SessionSuccess {
            assigned_session_guid: attach.existing_session_guid.clone(),
            next_expected_request_id: session.next_expected_request_id(),
            profile: (*session.profile()).as_ref().clone(),
        });
        send_cresponse(&response, channel)?;
        session.catchup(attach.next_expected_response_id, channel)
    }

    fn handle_packaged_request(
        &mut self,
        channel: &Arc<Channel>,
        pr: crequests::PackagedRequest,
    ) -> Result<(), Error> {
        let Some(session) = self.channel_to_session.get(&channel.id()) else {
            // Stale message from a channel the session moved away from.
            tracing::warn!("{}: stale packaged request, dropping", channel.id());
            return Ok(());
        };
        if !session.note_incoming_request(&pr) {
            tracing::warn!("{}: duplicate request {}, dropping", channel.id(), pr.request_id);
            return Ok(());
        }
        self.todo
            .send(ServerEvent::Request(session.clone(), pr.request))
            .map_err(|_| Error::from(crate::error::ErrorKind::ShuttingDown))
    }
}

fn send_cresponse(response: &CResponse, channel: &Channel) -> Result<(), Error> {
    let frame = serde_json::to_string(response).map_err(|e| Error::from((e, file!(), line!())))?;
    channel.send(frame)
}
