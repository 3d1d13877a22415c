//! Shared test fixtures: the canonical seed corpus (a week of archive
//! traffic exercising unicode, reactions, revisions, refers-to, zmojis and
//! plus-plus mentions), a coordinator-level paging driver, and a small
//! line-protocol client for driving a live server.

use crate::comm::FrontendRobustifier;
use crate::coordinator::{Coordinator, CoordinatorResponse, SubscriptionId};
use crate::error::{Error, ErrorKind};
use crate::index::{ConsolidatedIndex, IndexBuilder};
use crate::logfiles::{FileKey, InterFileRange};
use crate::paths::ArchivePaths;
use crate::protocol::control::{crequests, CRequest, CResponse};
use crate::protocol::message::{drequests, DRequest, DResponse};
use crate::protocol::Estimates;
use crate::zgram::{
    LogRecord, MetadataRecord, Profile, Reaction, RenderStyle, Zgram, ZgramCore, ZgramId,
    ZgramRevision, Zmojis,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// 2000-01-07T00:00:00Z, one day after the last frozen record.
pub const DYNAMIC_NOW: u64 = 947203200;

pub fn kosak_profile() -> Arc<Profile> {
    Arc::new(Profile::new("kosak", "Corey Kosak"))
}

fn zg(
    id: u64,
    timesecs: u64,
    sender: &str,
    signature: &str,
    logged: bool,
    instance: &str,
    body: &str,
) -> LogRecord {
    LogRecord::Zgram(Zgram {
        id: ZgramId(id),
        timesecs,
        sender: sender.to_string(),
        signature: signature.to_string(),
        logged,
        core: ZgramCore::new(instance, body, RenderStyle::Default),
    })
}

fn rx(id: u64, reaction: &str, creator: &str, present: bool) -> LogRecord {
    LogRecord::Metadata(MetadataRecord::Reaction(Reaction::new(
        ZgramId(id),
        reaction,
        creator,
        present,
    )))
}

fn zgrev(id: u64, instance: &str, body: &str) -> LogRecord {
    LogRecord::Metadata(MetadataRecord::Revision(ZgramRevision {
        zgram_id: ZgramId(id),
        core: ZgramCore::new(instance, body, RenderStyle::Default),
    }))
}

fn zmojis(user: &str, zmojis: &str) -> LogRecord {
    LogRecord::Metadata(MetadataRecord::Zmojis(Zmojis {
        user_id: user.to_string(),
        zmojis: zmojis.to_string(),
    }))
}

fn refers(id: u64, refers_to: u64) -> LogRecord {
    LogRecord::Metadata(MetadataRecord::RefersTo(crate::zgram::ZgramRefersTo {
        zgram_id: ZgramId(id),
        refers_to: ZgramId(refers_to),
        present: true,
    }))
}

fn write_log_file(paths: &ArchivePaths, key: FileKey, records: &[LogRecord]) {
    let mut file = std::fs::File::create(paths.plaintext_path(key)).unwrap();
    for record in records {
        let line = serde_json::to_string(record).unwrap();
        file.write_all(line.as_bytes()).unwrap();
        file.write_all(b"\n").unwrap();
    }
}

/// Writes the seed corpus into the log trees. Zgram ids have deliberate
/// gaps; timestamps are nondecreasing per day.
pub fn populate_test_files(paths: &ArchivePaths) {
    write_log_file(
        paths,
        FileKey::from_ymd(2000, 1, 1, true),
        &[
            zg(0, 946684800, "kosak", "Corey Kosak", true, "new-millennium", "Welcome to the new millennium!!!"),
            zg(1, 946684801, "kosak", "Corey Kosak", true, "new-millennium", "I have written a chat system for you. Do you like it?"),
            zg(2, 946684802, "kosh", "Kosh", true, "new-millennium", "You are not ready."),
            zg(3, 946684803, "kosak", "Corey Kosak", true, "new-millennium", "What?"),
            zg(4, 946684804, "kosh", "Kosh", true, "new-millennium", "kosak."),
            zg(10, 946684810, "kosak", "Corey Kosak", true, "feelings", "I love to eat pie and Cinnabon at the cafe"),
            zg(11, 946684811, "kosak", "Corey Kosak", true, "feelings.upper", "I LOVE TO EAT PIE AND CINNABON AT THE CAFE"),
            zg(12, 946684812, "kosak", "Corey Kosak", true, "feelings.unikodez", "I ❤ to eat π and 𝐂𝐈𝐍𝐍𝐀𝐁𝐎𝐍 at the café"),
            zg(13, 946684813, "kosak", "Corey Kosak", true, "feelings.unikodez.spelling.WTF", "🙀Cιηη🔥вση🙀"),
            zg(14, 946684814, "kosak", "Corey Kosak", true, "feelings.unikodez.spelling.WTF", "Why is the instance misspelled?"),
            zg(15, 946684815, "kosak", "Corey Kosak", true, "redact me", "Jenny: 867-5309"),
            zg(20, 946684807, "kosak", "Corey Kosak", true, "words", "What's with all the hurly-burly?"),
            zg(21, 946684808, "wilhelm", "Crown Prince Wilhelm", true, "words", "\"hurly-burly\"?"),
            zg(22, 946684809, "kosak", "Corey Kosak", true, "words", "\"\"hurly-burly\"\""),
            zg(23, 946684810, "kosak", "Corey Kosak", true, "words.Î", "You are just jealous of my élite C++ skills. And C#. And C*. And C?"),
        ],
    );

    write_log_file(
        paths,
        FileKey::from_ymd(2000, 1, 2, true),
        &[
            zg(30, 946771200, "kosak", "Starbuck 2000", true, "tv.wilhelm", "The reimagined Battlestar Galactica™ is the best thing ever"),
            rx(30, "👍", "kosak", true),
            rx(30, "👍", "wilhelm", true),
            rx(30, "👎", "simon", true),
            rx(1, "👎", "kosak", true),
            rx(0, "👍", "kosak", true),
            zgrev(14, "feelings.Unicode", "(fixed)"),
            zgrev(13, "feelings.Unicode", "🙀Cιηη🔥вση🙀"),
            zgrev(12, "feelings.Unicode", "I ❤ to eat π and 𝐂𝐈𝐍𝐍𝐀𝐁𝐎𝐍 at the café"),
        ],
    );

    write_log_file(
        paths,
        FileKey::from_ymd(2000, 1, 3, true),
        &[
            zg(40, 946857600, "simon", "Simon Eriksson", true, "tv.wilhelm.delayed", "I'm going to change my vote on Battlestar Galactica™"),
            rx(30, "👎", "simon", false),
            rx(30, "👍", "simon", true),
            zg(41, 946857603, "spock", "Spock (Unpronounceable)", true, "logic", "The next zgram is true."),
            zg(42, 946857604, "spock", "Spock (Unpronounceable)", true, "logic", "The previous zgram is false."),
            refers(42, 41),
            rx(41, "👍", "kosak", true),
            rx(41, "👍", "spock", true),
            rx(42, "👎", "spock", true),
        ],
    );

    write_log_file(
        paths,
        FileKey::from_ymd(2000, 1, 4, true),
        &[
            zg(50, 946944000, "august", "August Horn of Årnäs", true, "zarchive", "Let me be the first to say it. kosak++"),
            zg(51, 946944001, "kosak", "Corey Kosak", true, "zarchive", "This pain, no name."),
        ],
    );

    write_log_file(
        paths,
        FileKey::from_ymd(2000, 1, 4, false),
        &[zg(52, 946944002, "simon", "Simon Eriksson", false, "graffiti.zarchive", "FAIL")],
    );

    write_log_file(
        paths,
        FileKey::from_ymd(2000, 1, 5, true),
        &[
            zg(60, 947073600, "kosak", "Corey Kosak", true, "repetition", "the the zamboni the the"),
            zg(61, 947073601, "kosak", "Corey Kosak", true, "repetition", "the the the the the"),
            zg(62, 947073602, "kosak", "Corey Kosak", true, "relativity", "$ E=mc^2 $"),
            zg(63, 947073603, "kosak", "Corey Kosak", true, "test", "kosak)"),
            zmojis("kosak", "💕"),
            zmojis("kosak", "❦,❧,💕,💞,🙆,🙅,😂"),
            zmojis("simon", "☢"),
            rx(15, "k-wrong", "t'pring", true),
            rx(14, "k-wrong", "t'pring", true),
            rx(13, "k-wrong", "t'pring", true),
            rx(50, "k-wrong", "t'pring", true),
        ],
    );

    write_log_file(
        paths,
        FileKey::from_ymd(2000, 1, 6, true),
        &[
            zg(70, 947073600, "simon", "Simon Eriksson", true, "appreciation", "kosak++ blah kosak++"),
            zg(71, 947073601, "kosak", "Corey Kosak", true, "appreciation.anti", "kosak--"),
        ],
    );
}

/// Builds and publishes a frozen index over the seed corpus, opens the
/// consolidated index, then adds the dynamic tail: zgram 72 (posted live)
/// and simon's reaction churn.
pub fn setup_consolidated_index() -> (TempDir, Arc<ArchivePaths>, ConsolidatedIndex) {
    let tempdir = TempDir::new().unwrap();
    let paths = Arc::new(ArchivePaths::new(tempdir.path()).unwrap());
    populate_test_files(&paths);
    IndexBuilder::clear_scratch(&paths).unwrap();
    IndexBuilder::build(
        &paths,
        &InterFileRange::everything(true),
        &InterFileRange::everything(false),
    )
    .unwrap();
    paths.publish_build().unwrap();

    let mut index = ConsolidatedIndex::open(paths.clone()).unwrap();

    // This ends up being zgram id 72.
    let (zgrams, _) = index
        .add_zgrams(
            DYNAMIC_NOW,
            &kosak_profile(),
            vec![ZgramCore::new(
                "⒣⒲⒤⒯⒤⒜",
                "Hello, what is this instance about?",
                RenderStyle::Default,
            )],
        )
        .unwrap();
    assert_eq!(zgrams[0].id, ZgramId(72));

    // simon revokes his like of 30 and goes radioactive, on 30 and 12.
    index
        .add_metadata(
            DYNAMIC_NOW,
            vec![
                MetadataRecord::Reaction(Reaction::new(ZgramId(30), "👍", "simon", false)),
                MetadataRecord::Reaction(Reaction::new(ZgramId(30), "☢", "simon", true)),
                MetadataRecord::Reaction(Reaction::new(ZgramId(12), "☢", "simon", true)),
            ],
        )
        .unwrap();

    (tempdir, paths, index)
}

pub fn setup_coordinator() -> (TempDir, Coordinator) {
    let (tempdir, _paths, index) = setup_consolidated_index();
    (tempdir, Coordinator::new(index))
}

/// Drives a subscription by alternately paging both sides, mirroring how a
/// frontend drains its scrollback. Collects delivered ids and tracks the
/// latest estimates.
#[derive(Default)]
pub struct Pager {
    pub valid: bool,
    pub new_ids: Vec<u64>,
    pub estimates: Estimates,
}

impl Pager {
    pub fn new() -> Pager {
        Pager {
            valid: true,
            ..Default::default()
        }
    }

    pub fn process(&mut self, responses: &[CoordinatorResponse]) {
        for (_, response) in responses {
            match response {
                DResponse::AckSubscribe(ack) => {
                    if ack.valid {
                        self.estimates = ack.estimates;
                    } else {
                        self.valid = false;
                    }
                }
                DResponse::AckMoreZgrams(ack) => {
                    for zgram in &ack.zgrams {
                        self.new_ids.push(zgram.id.raw());
                    }
                    self.estimates = ack.estimates;
                }
                DResponse::EstimatesUpdate(eu) => {
                    self.estimates = eu.estimates;
                }
                DResponse::GeneralError(_) => {
                    self.valid = false;
                }
                _ => {}
            }
        }
    }

    /// Pages back then front, `count` at a time, until both sides report
    /// nothing available.
    pub fn drain(
        &mut self,
        coordinator: &mut Coordinator,
        sub_id: SubscriptionId,
        count: u64,
        mut responses: Vec<CoordinatorResponse>,
    ) {
        loop {
            self.process(&responses);
            assert!(self.valid, "response stream reported an error");
            responses.clear();
            let mut did_something = false;
            if self.estimates.back.count != 0 {
                coordinator.get_more_zgrams(
                    sub_id,
                    drequests::GetMoreZgrams {
                        for_back_side: true,
                        count,
                    },
                    &mut responses,
                );
                did_something = true;
            }
            if self.estimates.front.count != 0 {
                coordinator.get_more_zgrams(
                    sub_id,
                    drequests::GetMoreZgrams {
                        for_back_side: false,
                        count,
                    },
                    &mut responses,
                );
                did_something = true;
            }
            if !did_something {
                return;
            }
        }
    }

    /// Pages one side until it reports zero-and-exact, like the reactive
    /// frontend does after a push.
    pub fn drain_side(
        &mut self,
        coordinator: &mut Coordinator,
        sub_id: SubscriptionId,
        for_back_side: bool,
    ) {
        loop {
            let side = if for_back_side {
                self.estimates.back
            } else {
                self.estimates.front
            };
            if side.count == 0 && side.exact {
                return;
            }
            let mut responses = Vec::new();
            coordinator.get_more_zgrams(
                sub_id,
                drequests::GetMoreZgrams {
                    for_back_side,
                    count: 1000,
                },
                &mut responses,
            );
            self.process(&responses);
            assert!(self.valid);
        }
    }

    pub fn take_ids(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.new_ids)
    }
}

/// A minimal line-protocol client for exercising a live server end to end,
/// including reconnect/catchup.
pub struct TestClient {
    reader: tokio::io::BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    pub robustifier: FrontendRobustifier,
    pub session_guid: String,
    pub estimates: Estimates,
}

impl TestClient {
    async fn open_channel(
        port: u16,
        profile: &Profile,
    ) -> Result<
        (
            tokio::io::BufReader<tokio::net::tcp::OwnedReadHalf>,
            tokio::net::tcp::OwnedWriteHalf,
        ),
        Error,
    > {
        let stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .map_err(|e| (e, file!(), line!()))?;
        let (read_half, write_half) = stream.into_split();
        let reader = tokio::io::BufReader::new(read_half);
        let mut client_half = (reader, write_half);
        let hello = CRequest::Hello(crequests::Hello {
            profile: profile.clone(),
        });
        send_frame(&mut client_half.1, &serde_json::to_string(&hello).unwrap()).await?;
        Ok(client_half)
    }

    /// Hello + CreateSession.
    pub async fn create(port: u16, profile: &Profile) -> Result<TestClient, Error> {
        let (mut reader, mut writer) = Self::open_channel(port, profile).await?;
        let create = CRequest::CreateSession(crequests::CreateSession {});
        send_frame(&mut writer, &serde_json::to_string(&create).unwrap()).await?;
        let response = read_cresponse(&mut reader).await?;
        let CResponse::SessionSuccess(success) = response else {
            return Err(ErrorKind::General(format!("expected SessionSuccess, got {response:?}")).into());
        };
        Ok(TestClient {
            reader,
            writer,
            robustifier: FrontendRobustifier::new(),
            session_guid: success.assigned_session_guid,
            estimates: Estimates::default(),
        })
    }

    /// Hello + AttachToSession on a fresh channel, carrying over the
    /// robustifier (and hence the sequence numbers) of a previous client.
    pub async fn attach(
        port: u16,
        profile: &Profile,
        session_guid: String,
        robustifier: FrontendRobustifier,
    ) -> Result<TestClient, Error> {
        let (mut reader, mut writer) = Self::open_channel(port, profile).await?;
        let attach = CRequest::AttachToSession(crequests::AttachToSession {
            existing_session_guid: session_guid.clone(),
            next_expected_response_id: robustifier.next_expected_response_id(),
        });
        send_frame(&mut writer, &serde_json::to_string(&attach).unwrap()).await?;
        let response = read_cresponse(&mut reader).await?;
        let CResponse::SessionSuccess(_) = response else {
            return Err(ErrorKind::General(format!("expected SessionSuccess, got {response:?}")).into());
        };
        Ok(TestClient {
            reader,
            writer,
            robustifier,
            session_guid,
            estimates: Estimates::default(),
        })
    }

    pub async fn send(&mut self, request: DRequest) -> Result<(), Error> {
        let frame = self.robustifier.package_request(request)?;
        send_frame(&mut self.writer, &frame).await
    }

    /// Reads the next fresh (non-duplicate) data response.
    pub async fn recv(&mut self, timeout: Duration) -> Result<DResponse, Error> {
        loop {
            let response = tokio::time::timeout(timeout, read_cresponse(&mut self.reader))
                .await
                .map_err(|e| Error::from((e, file!(), line!())))??;
            let CResponse::PackagedResponse(pr) = response else {
                continue;
            };
            if !self.robustifier.note_incoming(&pr) {
                continue;
            }
            return Ok(pr.response);
        }
    }

    /// Waits for the subscribe ack and records its estimates.
    pub async fn await_subscribe_ack(&mut self) -> Result<bool, Error> {
        loop {
            match self.recv(Duration::from_secs(10)).await? {
                DResponse::AckSubscribe(ack) => {
                    self.estimates = ack.estimates;
                    return Ok(ack.valid);
                }
                _ => continue,
            }
        }
    }

    /// Pages one side to exhaustion, collecting delivered zgram ids.
    pub async fn drain_side(&mut self, for_back_side: bool, ids: &mut Vec<u64>) -> Result<(), Error> {
        loop {
            let side = if for_back_side {
                self.estimates.back
            } else {
                self.estimates.front
            };
            if side.count == 0 && side.exact {
                return Ok(());
            }
            self.send(DRequest::GetMoreZgrams(drequests::GetMoreZgrams {
                for_back_side,
                count: 1000,
            }))
            .await?;
            loop {
                match self.recv(Duration::from_secs(10)).await? {
                    DResponse::AckMoreZgrams(ack) => {
                        for zgram in &ack.zgrams {
                            ids.push(zgram.id.raw());
                        }
                        self.estimates = ack.estimates;
                        // A replayed ack for the other side (e.g. during
                        // catchup) is absorbed without ending this page.
                        if ack.for_back == for_back_side {
                            break;
                        }
                    }
                    DResponse::EstimatesUpdate(eu) => {
                        self.estimates = eu.estimates;
                    }
                    DResponse::GeneralError(e) => {
                        return Err(ErrorKind::General(e.message).into());
                    }
                    _ => {}
                }
            }
        }
    }

    /// Back side first, then front: the standard full drain.
    pub async fn drain_zgrams(&mut self) -> Result<Vec<u64>, Error> {
        let mut ids = Vec::new();
        self.drain_side(true, &mut ids).await?;
        self.drain_side(false, &mut ids).await?;
        Ok(ids)
    }
}

async fn send_frame(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    frame: &str,
) -> Result<(), Error> {
    use tokio::io::AsyncWriteExt;
    writer
        .write_all(frame.as_bytes())
        .await
        .map_err(|e| (e, file!(), line!()))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| Error::from((e, file!(), line!())))
}

async fn read_cresponse(
    reader: &mut tokio::io::BufReader<tokio::net::tcp::OwnedReadHalf>,
) -> Result<CResponse, Error> {
    use tokio::io::AsyncBufReadExt;
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| (e, file!(), line!()))?;
    if n == 0 {
        return Err(ErrorKind::ChannelClosed.into());
    }
    serde_json::from_str(line.trim_end_matches('\n')).map_err(|e| Error::from((e, file!(), line!())))
}
