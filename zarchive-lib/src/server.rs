//! The single event-loop task that ties everything together: it owns the
//! coordinator, drains the inbound queue, dispatches responses to the
//! sessions that should hear them, and drives the periodic reindexing and
//! purge timers.

use crate::comm::{Communicator, Session, SessionId};
use crate::coordinator::{Coordinator, CoordinatorResponse, SubscriptionId};
use crate::error::Error;
use crate::index::IndexBuilder;
use crate::logfiles::{list_log_keys, FileKey, FilePosition, InterFileRange};
use crate::magic;
use crate::protocol::message::{dresponses, DRequest, DResponse};
use crate::zgram::Profile;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

lazy_static! {
    /// The synthetic operator identity used for unattributed server posts.
    static ref ADMIN_PROFILE: Profile =
        Profile::new(magic::ZALEXA_ID, magic::ZALEXA_SIGNATURE);
}

/// What lands on the server's inbound queue.
#[derive(Debug)]
pub enum ServerEvent {
    /// An admitted (deduplicated) request from a session.
    Request(Arc<Session>, DRequest),
    /// Just wake the loop so periodic work runs promptly.
    Wake,
    Shutdown,
}

pub struct Server {
    listen_port: u16,
    todo: mpsc::UnboundedSender<ServerEvent>,
    communicator: Communicator,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Starts the listener, the handshake router, and the event loop.
    /// Port 0 requests an ephemeral port; see [`Server::listen_port`].
    pub async fn start(coordinator: Coordinator, requested_port: u16) -> Result<Arc<Server>, Error> {
        let (todo_tx, todo_rx) = mpsc::unbounded_channel();
        let communicator = Communicator::start(requested_port, todo_tx.clone()).await?;
        let listen_port = communicator.listen_port();

        let now = SystemTime::now();
        let server_loop = ServerLoop {
            coordinator,
            todo_tx: todo_tx.clone(),
            session_to_subscription: BTreeMap::new(),
            subscription_to_session: BTreeMap::new(),
            next_purge_time: now + magic::PURGE_INTERVAL,
            next_reindex_time: now + magic::REINDEXING_INTERVAL,
            reindexing: None,
        };
        let loop_handle = tokio::spawn(server_loop.run(todo_rx));

        tracing::info!("server listening on port {listen_port}");
        Ok(Arc::new(Server {
            listen_port,
            todo: todo_tx,
            communicator,
            loop_handle: Mutex::new(Some(loop_handle)),
        }))
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Signals shutdown; the loop observes it on its next wait.
    pub fn stop(&self) {
        let _ = self.todo.send(ServerEvent::Shutdown);
        self.communicator.shutdown();
    }

    /// Stops the server and waits for the loop to drain.
    pub async fn stop_and_join(&self) {
        self.stop();
        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

struct ReindexingState {
    done: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
    handle: JoinHandle<()>,
    /// Unlogged plaintext strictly before this is purged on success.
    unlogged_begin: FilePosition,
}

struct ServerLoop {
    coordinator: Coordinator,
    todo_tx: mpsc::UnboundedSender<ServerEvent>,
    session_to_subscription: BTreeMap<SessionId, SubscriptionId>,
    subscription_to_session: BTreeMap<SubscriptionId, Arc<Session>>,
    next_purge_time: SystemTime,
    next_reindex_time: SystemTime,
    reindexing: Option<ReindexingState>,
}

impl ServerLoop {
    async fn run(mut self, mut todo_rx: mpsc::UnboundedReceiver<ServerEvent>) {
        'outer: loop {
            let mut events = Vec::new();
            match tokio::time::timeout(magic::SERVER_TICK, todo_rx.recv()).await {
                Ok(Some(event)) => {
                    events.push(event);
                    while let Ok(event) = todo_rx.try_recv() {
                        events.push(event);
                    }
                }
                Ok(None) => break 'outer,
                Err(_elapsed) => {}
            }

            let now = SystemTime::now();
            for event in events {
                match event {
                    ServerEvent::Shutdown => {
                        tracing::info!("server: shutdown requested");
                        break 'outer;
                    }
                    ServerEvent::Wake => {}
                    ServerEvent::Request(session, request) => {
                        let mut responses = Vec::new();
                        self.handle_request(request, &session, now, &mut responses);
                        self.process_responses(responses, Some(&session));
                    }
                }
            }

            self.manage_reindexing(now);
            self.manage_purging(now);
        }

        // An in-flight reindex completes or errors out; join it before exit.
        if let Some(state) = self.reindexing.take() {
            tracing::info!("server: waiting for reindex worker before exit");
            let _ = state.handle.await;
        }
        tracing::info!("server: exiting");
    }

    fn handle_request(
        &mut self,
        request: DRequest,
        session: &Arc<Session>,
        now: SystemTime,
        responses: &mut Vec<CoordinatorResponse>,
    ) {
        // Subscribe takes the special path that binds session <-> subscription.
        let request = match request {
            DRequest::Subscribe(sub_req) => {
                self.handle_subscribe_request(sub_req, session, responses);
                return;
            }
            other => other,
        };

        let Some(sub_id) = self.session_to_subscription.get(&session.id()).copied() else {
            responses.push((
                None,
                DResponse::GeneralError(dresponses::GeneralError {
                    message: "Channel is not subscribed".to_string(),
                }),
            ));
            return;
        };

        let now_secs = epoch_secs(now);
        match request {
            DRequest::Subscribe(_) => unreachable!("handled above"),
            DRequest::CheckSyntax(req) => self.coordinator.check_syntax(sub_id, req, responses),
            DRequest::GetMoreZgrams(req) => {
                self.coordinator.get_more_zgrams(sub_id, req, responses)
            }
            DRequest::PostZgrams(req) => {
                self.coordinator.post_zgrams(sub_id, now_secs, req, responses)
            }
            DRequest::PostMetadata(req) => {
                self.coordinator.post_metadata(sub_id, now_secs, req, responses)
            }
            DRequest::GetSpecificZgrams(req) => {
                self.coordinator.get_specific_zgrams(sub_id, req, responses)
            }
            DRequest::Ping(req) => self.coordinator.ping(sub_id, req, responses),
        }
    }

    fn handle_subscribe_request(
        &mut self,
        req: crate::protocol::message::drequests::Subscribe,
        session: &Arc<Session>,
        responses: &mut Vec<CoordinatorResponse>,
    ) {
        if self.session_to_subscription.contains_key(&session.id()) {
            responses.push((
                None,
                DResponse::AckSubscribe(dresponses::AckSubscribe {
                    valid: false,
                    error: "session is already bound to a subscription".to_string(),
                    estimates: Default::default(),
                }),
            ));
            return;
        }
        let profile = session.profile().clone();
        if let Some(sub_id) = self.coordinator.subscribe(profile, req, responses) {
            self.session_to_subscription.insert(session.id(), sub_id);
            self.subscription_to_session.insert(sub_id, session.clone());
        }
    }

    /// Null-targeted responses go to the originating session; targeted ones
    /// go to whichever session currently holds that subscription.
    fn process_responses(
        &mut self,
        responses: Vec<CoordinatorResponse>,
        sender: Option<&Arc<Session>>,
    ) {
        for (target, response) in responses {
            let session = match target {
                None => sender.cloned(),
                Some(sub_id) => self.subscription_to_session.get(&sub_id).cloned(),
            };
            let Some(session) = session else {
                tracing::warn!("no session for response targeted at {target:?}, skipping");
                continue;
            };
            if let Err(e) = session.send_response(response) {
                // The channel is gone; the frame stays queued for catchup.
                tracing::debug!("{}: response queued, channel down: {e}", session.id());
            }
        }
    }

    fn manage_reindexing(&mut self, now: SystemTime) {
        if self.reindexing.is_none() {
            if now < self.next_reindex_time {
                return;
            }
            tracing::info!("starting the reindex process in the background");
            let now_secs = epoch_secs(now);

            // Snapshot: all of the logged tree, the retention window of the
            // unlogged tree. Records appended after this checkpoint stay in
            // the dynamic tier of the next index.
            let (logged_end, unlogged_end) = match self.coordinator.checkpoint(now_secs) {
                Ok(positions) => positions,
                Err(e) => {
                    tracing::error!("checkpoint failed, skipping reindex: {e}");
                    self.next_reindex_time = now + magic::REINDEXING_INTERVAL;
                    return;
                }
            };
            let unlogged_begin_secs =
                now_secs.saturating_sub(magic::UNLOGGED_LIFESPAN.as_secs());
            let unlogged_begin = match FileKey::from_timesecs(unlogged_begin_secs, false) {
                Ok(key) => FilePosition::new(key, 0),
                Err(e) => {
                    tracing::error!("bad unlogged begin key: {e}");
                    return;
                }
            };
            let logged_range = InterFileRange::new(FilePosition::zero(true), logged_end);
            let unlogged_range = InterFileRange::new(unlogged_begin, unlogged_end);

            let paths = self.coordinator.index().paths().clone();
            let done = Arc::new(AtomicBool::new(false));
            let error = Arc::new(Mutex::new(None));
            let todo = self.todo_tx.clone();
            let handle = {
                let done = done.clone();
                let error = error.clone();
                tokio::task::spawn_blocking(move || {
                    let result = IndexBuilder::clear_scratch(&paths)
                        .and_then(|_| IndexBuilder::build(&paths, &logged_range, &unlogged_range))
                        .and_then(|_| paths.publish_build());
                    if let Err(e) = result {
                        *error.lock().unwrap() = Some(e.to_string());
                    }
                    done.store(true, Ordering::Release);
                    let _ = todo.send(ServerEvent::Wake);
                })
            };
            self.reindexing = Some(ReindexingState {
                done,
                error,
                handle,
                unlogged_begin,
            });
            return;
        }

        // There is an active reindex worker.
        if !self
            .reindexing
            .as_ref()
            .map(|state| state.done.load(Ordering::Acquire))
            .unwrap_or(false)
        {
            return;
        }
        let state = self.reindexing.take().expect("checked above");
        let error = state.error.lock().unwrap().take();
        if let Some(error) = error {
            let message =
                format!("Reindexing failure. PLEASE NOTIFY THE ADMIN. This is very bad. {error}");
            tracing::error!("{message}");
            // Keep serving from the old index, but don't reindex any more.
            self.next_reindex_time = now + Duration::from_secs(1000 * 24 * 60 * 60);
            self.post_status_message(now, message);
            return;
        }

        self.next_reindex_time = now + magic::REINDEXING_INTERVAL;
        tracing::info!("reindexing complete");
        if let Err(e) = self.coordinator.reset_index() {
            tracing::error!("reset_index after reindex failed: {e}");
            return;
        }
        self.purge_unlogged_before(state.unlogged_begin);
    }

    /// Deletes unlogged plaintext files wholly before the new coverage.
    fn purge_unlogged_before(&self, begin: FilePosition) {
        let paths = self.coordinator.index().paths().clone();
        let keys = match list_log_keys(paths.log_dir(false), false) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("purge: cannot list unlogged logs: {e}");
                return;
            }
        };
        for key in keys {
            if key < begin.file_key {
                match paths.remove_plaintext(key) {
                    Ok(()) => tracing::info!("purged expired unlogged log {key}"),
                    Err(e) => tracing::warn!("purge of {key} failed: {e}"),
                }
            }
        }
    }

    /// The purge timer advances on schedule but takes no further action.
    fn manage_purging(&mut self, now: SystemTime) {
        if now < self.next_purge_time {
            return;
        }
        self.next_purge_time = now + magic::PURGE_INTERVAL;
    }

    /// Posts an operator status zgram under the zalexa identity. Status
    /// messages are graffiti, so they age out with the retention window.
    fn post_status_message(&mut self, now: SystemTime, message: String) {
        let core = crate::zgram::ZgramCore::new(
            "graffiti.ZSTATUS",
            message,
            crate::zgram::RenderStyle::Default,
        );
        let mut responses = Vec::new();
        if let Err(e) = self.coordinator.post_zgrams_with_profile(
            &ADMIN_PROFILE,
            epoch_secs(now),
            crate::protocol::message::drequests::PostZgrams {
                entries: vec![(core, None)],
            },
            &mut responses,
        ) {
            tracing::error!("failed to post status zgram: {e}");
            return;
        }
        self.process_responses(responses, None);
    }
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::message::drequests;
    use crate::testutil::{self, TestClient};
    use crate::zgram::{RenderStyle, SearchOrigin, ZgramCore};
    use std::time::Duration;

    const FULL_BACKWARD_ORDER: [u64; 29] = [
        72, 71, 70, 63, 62, 61, 60, 52, 51, 50, 42, 41, 40, 30, 23, 22, 21, 20, 15, 14, 13, 12,
        11, 10, 4, 3, 2, 1, 0,
    ];

    fn subscribe_request(query: &str, page_size: u64, query_margin: u64) -> DRequest {
        DRequest::Subscribe(drequests::Subscribe {
            query: query.to_string(),
            start_origin: SearchOrigin::End,
            page_size,
            query_margin,
        })
    }

    #[tokio::test]
    async fn test_fire_up_a_server() {
        let (_tmp, coordinator) = testutil::setup_coordinator();
        let server = Server::start(coordinator, 0).await.unwrap();
        let profile = testutil::kosak_profile();

        let mut client = TestClient::create(server.listen_port(), &profile).await.unwrap();
        client.send(subscribe_request("", 25, 10)).await.unwrap();
        assert!(client.await_subscribe_ack().await.unwrap());
        let ids = client.drain_zgrams().await.unwrap();
        assert_eq!(ids, FULL_BACKWARD_ORDER);

        server.stop_and_join().await;
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (_tmp, coordinator) = testutil::setup_coordinator();
        let server = Server::start(coordinator, 0).await.unwrap();
        let profile = testutil::kosak_profile();

        let mut client = TestClient::create(server.listen_port(), &profile).await.unwrap();
        client.send(subscribe_request("", 25, 10)).await.unwrap();
        assert!(client.await_subscribe_ack().await.unwrap());
        client
            .send(DRequest::Ping(drequests::Ping { cookie: 867_5309 }))
            .await
            .unwrap();
        loop {
            match client.recv(Duration::from_secs(10)).await.unwrap() {
                DResponse::AckPing(ack) => {
                    assert_eq!(ack.cookie, 867_5309);
                    break;
                }
                _ => continue,
            }
        }
        server.stop_and_join().await;
    }

    #[tokio::test]
    async fn test_request_without_subscription_is_an_error() {
        let (_tmp, coordinator) = testutil::setup_coordinator();
        let server = Server::start(coordinator, 0).await.unwrap();
        let profile = testutil::kosak_profile();

        let mut client = TestClient::create(server.listen_port(), &profile).await.unwrap();
        client
            .send(DRequest::Ping(drequests::Ping { cookie: 1 }))
            .await
            .unwrap();
        match client.recv(Duration::from_secs(10)).await.unwrap() {
            DResponse::GeneralError(e) => {
                assert!(e.message.contains("not subscribed"));
            }
            other => panic!("expected GeneralError, got {other:?}"),
        }
        server.stop_and_join().await;
    }

    #[tokio::test]
    async fn test_reconnect_replays_in_order() {
        let (_tmp, coordinator) = testutil::setup_coordinator();
        let server = Server::start(coordinator, 0).await.unwrap();
        let profile = testutil::kosak_profile();

        // First incarnation subscribes, asks for a page, and silently drops
        // everything the server says.
        let mut first = TestClient::create(server.listen_port(), &profile).await.unwrap();
        first.send(subscribe_request("", 25, 10)).await.unwrap();
        first
            .send(DRequest::GetMoreZgrams(drequests::GetMoreZgrams {
                for_back_side: true,
                count: 100,
            }))
            .await
            .unwrap();
        // Give the server a moment to generate responses into the void.
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Reattach on a fresh channel with next-expected-response 0: the
        // server must replay every response in original order, with
        // original ids, and then keep serving.
        let guid = first.session_guid.clone();
        let robustifier = std::mem::take(&mut first.robustifier);
        let mut second = TestClient::attach(server.listen_port(), &profile, guid, robustifier)
            .await
            .unwrap();
        assert!(second.await_subscribe_ack().await.unwrap());
        let ids = second.drain_zgrams().await.unwrap();
        assert_eq!(ids, FULL_BACKWARD_ORDER);

        server.stop_and_join().await;
    }

    #[tokio::test]
    async fn test_new_matching_zgram_is_delivered() {
        let (_tmp, coordinator) = testutil::setup_coordinator();
        let server = Server::start(coordinator, 0).await.unwrap();
        let profile = testutil::kosak_profile();

        let mut client = TestClient::create(server.listen_port(), &profile).await.unwrap();
        client.send(subscribe_request("cinnabon", 25, 10)).await.unwrap();
        assert!(client.await_subscribe_ack().await.unwrap());
        let ids = client.drain_zgrams().await.unwrap();
        assert_eq!(ids, vec![12, 11, 10]);

        client
            .send(DRequest::PostZgrams(drequests::PostZgrams {
                entries: vec![(
                    ZgramCore::new("so hungry", "WHERE is my Cinnabon?", RenderStyle::Default),
                    None,
                )],
            }))
            .await
            .unwrap();

        // The post triggers an estimates push; the drain then fetches the
        // new arrival.
        loop {
            match client.recv(Duration::from_secs(10)).await.unwrap() {
                DResponse::EstimatesUpdate(eu) => {
                    client.estimates = eu.estimates;
                    if client.estimates.back.count > 0 {
                        break;
                    }
                }
                _ => continue,
            }
        }
        let ids = client.drain_zgrams().await.unwrap();
        assert_eq!(ids, vec![73]);

        server.stop_and_join().await;
    }
}
