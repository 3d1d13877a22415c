//! The coordinator: owns the consolidated index and every live
//! subscription, serializes all index mutations, and produces the exact
//! fan-out of per-subscription responses when anything changes.
//!
//! Every public operation returns a vector of `(target, response)` pairs. A
//! `None` target means "reply on the session that sent the request"; a
//! `Some(id)` target addresses whichever session currently holds that
//! subscription.

pub mod subscription;

pub use subscription::{PerSideStatus, Subscription, SubscriptionId};

use crate::error::Error;
use crate::index::consolidated::{ConsolidatedIndex, PpDeltaMap};
use crate::logfiles::LogLocation;
use crate::protocol::message::{drequests, dresponses, DResponse};
use crate::query;
use crate::zgram::{MetadataRecord, Profile, ZgramId, ZgramRefersTo, Zmojis};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type CoordinatorResponse = (Option<SubscriptionId>, DResponse);

pub struct Coordinator {
    index: ConsolidatedIndex,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
}

impl Coordinator {
    pub fn new(index: ConsolidatedIndex) -> Coordinator {
        Coordinator {
            index,
            subscriptions: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> &ConsolidatedIndex {
        &self.index
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    /// Creates a subscription. On success the AckSubscribe carries initial
    /// estimates and is followed by a MetadataUpdate holding the user's
    /// zmojis; on a parse failure no subscription is created.
    pub fn subscribe(
        &mut self,
        profile: Arc<Profile>,
        req: drequests::Subscribe,
        responses: &mut Vec<CoordinatorResponse>,
    ) -> Option<SubscriptionId> {
        let query_text = req.query.trim().to_string();
        let query = match query::parse(&query_text) {
            Ok(query) => query,
            Err(e) => {
                responses.push((
                    None,
                    DResponse::AckSubscribe(dresponses::AckSubscribe {
                        valid: false,
                        error: e.to_string(),
                        estimates: Default::default(),
                    }),
                ));
                return None;
            }
        };

        let mut sub = Subscription::create(
            &self.index,
            profile,
            query_text,
            query,
            &req.start_origin,
            req.page_size as usize,
            req.query_margin as usize,
        );
        let (estimates, _) = sub.update_estimates();
        let id = sub.id();
        let user_id = sub.profile().user_id.clone();
        self.subscriptions.insert(id, sub);

        responses.push((
            Some(id),
            DResponse::AckSubscribe(dresponses::AckSubscribe {
                valid: true,
                error: String::new(),
                estimates,
            }),
        ));

        let zmojis = self.index.get_zmojis(&user_id);
        responses.push((
            Some(id),
            DResponse::MetadataUpdate(dresponses::MetadataUpdate {
                records: vec![Arc::new(MetadataRecord::Zmojis(Zmojis {
                    user_id,
                    zmojis,
                }))],
            }),
        ));
        Some(id)
    }

    pub fn unsubscribe(&mut self, sub_id: SubscriptionId) {
        self.subscriptions.remove(&sub_id);
    }

    pub fn check_syntax(
        &mut self,
        sub_id: SubscriptionId,
        req: drequests::CheckSyntax,
        responses: &mut Vec<CoordinatorResponse>,
    ) {
        let (valid, result) = match query::parse(&req.query) {
            Ok(iterator) => (true, iterator.to_string()),
            Err(e) => (false, e.to_string()),
        };
        responses.push((
            Some(sub_id),
            DResponse::AckSyntaxCheck(dresponses::AckSyntaxCheck {
                text: req.query,
                valid,
                result,
            }),
        ));
    }

    /// Delivers up to a page of zgrams from one side, together with all the
    /// metadata and plus-plus counts the client needs to display them.
    pub fn get_more_zgrams(
        &mut self,
        sub_id: SubscriptionId,
        req: drequests::GetMoreZgrams,
        responses: &mut Vec<CoordinatorResponse>,
    ) {
        let index = &self.index;
        let Some(sub) = self.subscriptions.get_mut(&sub_id) else {
            tracing::warn!("get_more_zgrams for unknown {sub_id}");
            return;
        };

        // Trim the ask to the page size, then top up to trimmed + margin.
        let result_size = (req.count as usize).min(sub.page_size());
        let target_residual_size = result_size + sub.query_margin();
        sub.top_up_side(index, req.for_back_side, target_residual_size);

        let mut locators: Vec<(ZgramId, LogLocation)> = Vec::with_capacity(result_size);
        while locators.len() < result_size {
            let Some(off) = sub.side_mut(req.for_back_side).residual().pop_front() else {
                break;
            };
            let info = index.get_zgram_info(off);
            locators.push((info.zgram_id, info.location));
            sub.update_displayed(info.zgram_id);
        }
        let (estimates, _) = sub.update_estimates();

        let zgrams = match self.index.resolve_zgrams(&locators) {
            Ok(zgrams) => zgrams,
            Err(e) => {
                responses.push((
                    Some(sub_id),
                    DResponse::GeneralError(dresponses::GeneralError {
                        message: e.to_string(),
                    }),
                ));
                return;
            }
        };

        // Everything known about the delivered zgrams rides along.
        let mut metadata_records: Vec<MetadataRecord> = Vec::new();
        for zgram in &zgrams {
            self.index.get_metadata_for(zgram.id, &mut metadata_records);
        }

        let mut pp_entries: Vec<(ZgramId, String, i64)> = Vec::new();
        for zgram in &zgrams {
            for key in self.index.get_plus_plus_keys(zgram.id) {
                let count = self.index.get_plus_plus_count_after(zgram.id, &key);
                pp_entries.push((zgram.id, key, count));
            }
        }

        responses.push((
            Some(sub_id),
            DResponse::AckMoreZgrams(dresponses::AckMoreZgrams {
                for_back: req.for_back_side,
                zgrams,
                estimates,
            }),
        ));
        responses.push((
            Some(sub_id),
            DResponse::MetadataUpdate(dresponses::MetadataUpdate {
                records: metadata_records.into_iter().map(Arc::new).collect(),
            }),
        ));
        if !pp_entries.is_empty() {
            responses.push((
                Some(sub_id),
                DResponse::PlusPlusUpdate(dresponses::PlusPlusUpdate {
                    entries: pp_entries,
                }),
            ));
        }
    }

    pub fn post_zgrams(
        &mut self,
        sub_id: SubscriptionId,
        now_secs: u64,
        req: drequests::PostZgrams,
        responses: &mut Vec<CoordinatorResponse>,
    ) {
        let Some(sub) = self.subscriptions.get(&sub_id) else {
            tracing::warn!("post_zgrams for unknown {sub_id}");
            return;
        };
        let profile = sub.profile().clone();
        if let Err(e) = self.post_zgrams_with_profile(&profile, now_secs, req, responses) {
            responses.push((
                Some(sub_id),
                DResponse::GeneralError(dresponses::GeneralError {
                    message: e.to_string(),
                }),
            ));
        }
    }

    /// The profile-level entry point: also used by the server to post
    /// operator zgrams with no subscription attached.
    pub fn post_zgrams_with_profile(
        &mut self,
        profile: &Profile,
        now_secs: u64,
        req: drequests::PostZgrams,
        responses: &mut Vec<CoordinatorResponse>,
    ) -> Result<(), Error> {
        if req.entries.is_empty() {
            return Ok(());
        }
        let mut cores = Vec::with_capacity(req.entries.len());
        let mut refers_to_ids = Vec::with_capacity(req.entries.len());
        for (core, refers_to) in req.entries {
            cores.push(core);
            refers_to_ids.push(refers_to);
        }

        let (zgrams, delta_map) = self.index.add_zgrams(now_secs, profile, cores)?;

        let mut refers_to_metadata = Vec::new();
        for (zgram, refers_to) in zgrams.iter().zip(refers_to_ids) {
            if let Some(target) = refers_to {
                refers_to_metadata.push(MetadataRecord::RefersTo(ZgramRefersTo {
                    zgram_id: zgram.id,
                    refers_to: target,
                    present: true,
                }));
            }
        }

        self.notify_subscribers_about_estimates(responses);
        self.notify_subscribers_about_pp_changes(&delta_map, responses);
        self.post_metadata_with_profile(
            profile,
            now_secs,
            drequests::PostMetadata {
                metadata: refers_to_metadata,
            },
            responses,
        )
    }

    pub fn post_metadata(
        &mut self,
        sub_id: SubscriptionId,
        now_secs: u64,
        req: drequests::PostMetadata,
        responses: &mut Vec<CoordinatorResponse>,
    ) {
        let Some(sub) = self.subscriptions.get(&sub_id) else {
            tracing::warn!("post_metadata for unknown {sub_id}");
            return;
        };
        let profile = sub.profile().clone();
        if let Err(e) = self.post_metadata_with_profile(&profile, now_secs, req, responses) {
            responses.push((
                Some(sub_id),
                DResponse::GeneralError(dresponses::GeneralError {
                    message: e.to_string(),
                }),
            ));
        }
    }

    pub fn post_metadata_with_profile(
        &mut self,
        profile: &Profile,
        now_secs: u64,
        req: drequests::PostMetadata,
        responses: &mut Vec<CoordinatorResponse>,
    ) -> Result<(), Error> {
        if req.metadata.is_empty() {
            return Ok(());
        }
        let sanitized = self.sanitize(profile, req.metadata)?;
        let (moved, delta_map) = self.index.add_metadata(now_secs, sanitized)?;
        self.notify_subscribers_about_metadata(moved, responses);
        self.notify_subscribers_about_pp_changes(&delta_map, responses);
        Ok(())
    }

    pub fn get_specific_zgrams(
        &mut self,
        sub_id: SubscriptionId,
        req: drequests::GetSpecificZgrams,
        responses: &mut Vec<CoordinatorResponse>,
    ) {
        let mut locators = Vec::with_capacity(req.zgram_ids.len());
        for id in req.zgram_ids {
            let Some(off) = self.index.try_find(id) else {
                tracing::warn!("get_specific_zgrams: failed to find {id}");
                continue;
            };
            locators.push((id, self.index.get_zgram_info(off).location));
        }
        let zgrams = match self.index.resolve_zgrams(&locators) {
            Ok(zgrams) => zgrams,
            Err(e) => {
                tracing::warn!("get_specific_zgrams: lookup failed: {e}");
                return;
            }
        };
        responses.push((
            Some(sub_id),
            DResponse::AckSpecificZgrams(dresponses::AckSpecificZgrams { zgrams }),
        ));
    }

    pub fn ping(
        &mut self,
        sub_id: SubscriptionId,
        req: drequests::Ping,
        responses: &mut Vec<CoordinatorResponse>,
    ) {
        responses.push((
            Some(sub_id),
            DResponse::AckPing(dresponses::AckPing { cookie: req.cookie }),
        ));
    }

    /// Flushes the logs and returns the durable end positions of both
    /// trees, for the reindexer's snapshot.
    pub fn checkpoint(
        &mut self,
        now_secs: u64,
    ) -> Result<(crate::logfiles::FilePosition, crate::logfiles::FilePosition), Error> {
        self.index.checkpoint(now_secs)
    }

    /// Replaces the consolidated index wholesale (after a reindex published
    /// a new frozen tier) and rebinds every subscription to it.
    pub fn reset_index(&mut self) -> Result<(), Error> {
        let paths = self.index.paths().clone();
        let new_index = ConsolidatedIndex::open(paths)?;
        self.index = new_index;
        for sub in self.subscriptions.values_mut() {
            sub.reset_index(&self.index);
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Fan-out

    /// Sends each subscription the records relevant to it: those whose
    /// target zgram lies inside its displayed range, plus user-keyed records
    /// belonging to the subscription's own user (so zmoji changes reach
    /// every session of that user).
    fn notify_subscribers_about_metadata(
        &mut self,
        metadata: Vec<MetadataRecord>,
        responses: &mut Vec<CoordinatorResponse>,
    ) {
        if metadata.is_empty() {
            return;
        }
        let shared: Vec<Arc<MetadataRecord>> = metadata.into_iter().map(Arc::new).collect();
        for (id, sub) in &self.subscriptions {
            let (displayed_begin, displayed_end) = sub.displayed();
            let mut filtered = Vec::new();
            for record in &shared {
                if let Some(zgram_id) = record.zgram_id() {
                    if zgram_id >= displayed_begin && zgram_id < displayed_end {
                        filtered.push(record.clone());
                        continue;
                    }
                }
                if let Some(user_id) = record.user_id() {
                    if user_id == sub.profile().user_id {
                        filtered.push(record.clone());
                    }
                }
            }
            if !filtered.is_empty() {
                responses.push((
                    Some(*id),
                    DResponse::MetadataUpdate(dresponses::MetadataUpdate { records: filtered }),
                ));
            }
        }
    }

    /// For each changed key: report the new total at the first zgram that
    /// mentioned it (if displayed), then at every *dependent* zgram: a
    /// later displayed zgram that also mentions the key, whose running total
    /// therefore changed too.
    fn notify_subscribers_about_pp_changes(
        &mut self,
        delta_map: &PpDeltaMap,
        responses: &mut Vec<CoordinatorResponse>,
    ) {
        if delta_map.is_empty() {
            return;
        }
        let mut key_to_first_zgram: BTreeMap<&str, ZgramId> = BTreeMap::new();
        for (zgram_id, deltas) in delta_map {
            for key in deltas.keys() {
                key_to_first_zgram.entry(key).or_insert(*zgram_id);
            }
        }

        for (sub_id, sub) in &self.subscriptions {
            let (displayed_begin, displayed_end) = sub.displayed();
            let mut entries: Vec<(ZgramId, String, i64)> = Vec::new();
            for (key, first_zgram_id) in &key_to_first_zgram {
                // The primary zgram gets the new value; this also covers a
                // mention disappearing entirely after a revision.
                if *first_zgram_id >= displayed_begin && *first_zgram_id < displayed_end {
                    let count = self.index.get_plus_plus_count_after(*first_zgram_id, key);
                    entries.push((*first_zgram_id, key.to_string(), count));
                }

                let affected_begin = first_zgram_id.next().max(displayed_begin);
                let affected_end = displayed_end;
                if affected_begin >= affected_end {
                    continue;
                }
                for zgram_id in self.index.gather_pp_mentions(key, affected_begin, affected_end) {
                    let count = self.index.get_plus_plus_count_after(zgram_id, key);
                    entries.push((zgram_id, key.to_string(), count));
                }
            }
            if !entries.is_empty() {
                responses.push((
                    Some(*sub_id),
                    DResponse::PlusPlusUpdate(dresponses::PlusPlusUpdate { entries }),
                ));
            }
        }
    }

    /// Tops up both sides of every subscription and pushes an
    /// EstimatesUpdate to those whose numbers changed.
    fn notify_subscribers_about_estimates(&mut self, responses: &mut Vec<CoordinatorResponse>) {
        let index = &self.index;
        for (sub_id, sub) in self.subscriptions.iter_mut() {
            sub.top_up_both(index);
            let (estimates, changed) = sub.update_estimates();
            if changed {
                responses.push((
                    Some(*sub_id),
                    DResponse::EstimatesUpdate(dresponses::EstimatesUpdate { estimates }),
                ));
            }
        }
    }

    // ----------------------------------------------------------------------
    // Sanitization

    /// Drops records the posting profile may not apply: reactions must be
    /// authored by their creator, and revisions/refers-to must target a
    /// zgram the profile sent. Zmojis pass through under the session's
    /// profile. Rejected records are removed silently.
    fn sanitize(
        &mut self,
        profile: &Profile,
        records: Vec<MetadataRecord>,
    ) -> Result<Vec<MetadataRecord>, Error> {
        enum Disposition {
            Accept,
            Reject,
            // Must be sent by the target zgram's sender; resolve and check.
            Defer(ZgramId, LogLocation),
        }

        let mut dispositions = Vec::with_capacity(records.len());
        let mut locators = Vec::new();
        for record in &records {
            let disposition = match record {
                MetadataRecord::Reaction(r) => {
                    if r.creator == profile.user_id {
                        Disposition::Accept
                    } else {
                        Disposition::Reject
                    }
                }
                MetadataRecord::Zmojis(_) => Disposition::Accept,
                MetadataRecord::Revision(rev) => self
                    .defer_disposition(rev.zgram_id)
                    .map(|loc| Disposition::Defer(rev.zgram_id, loc))
                    .unwrap_or(Disposition::Reject),
                MetadataRecord::RefersTo(rt) => self
                    .defer_disposition(rt.zgram_id)
                    .map(|loc| Disposition::Defer(rt.zgram_id, loc))
                    .unwrap_or(Disposition::Reject),
            };
            if let Disposition::Defer(id, loc) = &disposition {
                locators.push((*id, *loc));
            }
            dispositions.push(disposition);
        }

        let resolved = self.index.resolve_zgrams(&locators)?;
        let mut resolved_iter = resolved.iter();
        let mut kept = Vec::with_capacity(records.len());
        for (record, disposition) in records.into_iter().zip(dispositions) {
            match disposition {
                Disposition::Accept => kept.push(record),
                Disposition::Reject => {}
                Disposition::Defer(..) => {
                    let zgram = resolved_iter
                        .next()
                        .expect("one resolved zgram per deferred record");
                    if zgram.sender == profile.user_id {
                        kept.push(record);
                    }
                }
            }
        }
        Ok(kept)
    }

    fn defer_disposition(&self, id: ZgramId) -> Option<LogLocation> {
        let off = self.index.try_find(id)?;
        Some(self.index.get_zgram_info(off).location)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{self, Pager};
    use crate::zgram::{Reaction, RenderStyle, SearchOrigin, ZgramCore};

    fn subscribe(
        coordinator: &mut Coordinator,
        query: &str,
        start: SearchOrigin,
        page_size: u64,
        query_margin: u64,
    ) -> (SubscriptionId, Vec<CoordinatorResponse>) {
        let mut responses = Vec::new();
        let sub_id = coordinator
            .subscribe(
                testutil::kosak_profile(),
                drequests::Subscribe {
                    query: query.to_string(),
                    start_origin: start,
                    page_size,
                    query_margin,
                },
                &mut responses,
            )
            .expect("subscription should be valid");
        (sub_id, responses)
    }

    #[test]
    fn test_page_everything_from_the_end() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (sub_id, responses) = subscribe(&mut coordinator, "", SearchOrigin::End, 25, 10);
        let mut pager = Pager::new();
        pager.drain(&mut coordinator, sub_id, 25, responses);
        let expected: Vec<u64> = vec![
            72, 71, 70, 63, 62, 61, 60, 52, 51, 50, 42, 41, 40, 30, 23, 22, 21, 20, 15, 14, 13,
            12, 11, 10, 4, 3, 2, 1, 0,
        ];
        assert_eq!(pager.new_ids, expected);
    }

    #[test]
    fn test_page_sender_kosak_forward_from_zero() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (sub_id, responses) = subscribe(
            &mut coordinator,
            "sender: kosak",
            SearchOrigin::ZgramId(ZgramId(0)),
            3,
            5,
        );
        let mut pager = Pager::new();
        pager.drain(&mut coordinator, sub_id, 3, responses);
        let expected: Vec<u64> = vec![
            0, 1, 3, 10, 11, 12, 13, 14, 15, 20, 22, 23, 30, 51, 60, 61, 62, 63, 71, 72,
        ];
        assert_eq!(pager.new_ids, expected);
    }

    #[test]
    fn test_page_sender_kosak_both_ways() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (sub_id, responses) = subscribe(
            &mut coordinator,
            "sender: kosak",
            SearchOrigin::ZgramId(ZgramId(13)),
            3,
            5,
        );
        let mut pager = Pager::new();
        pager.drain(&mut coordinator, sub_id, 3, responses);
        let expected: Vec<u64> = vec![
            13, 14, 15, 12, 11, 10, 20, 22, 23, 3, 1, 0, 30, 51, 60, 61, 62, 63, 71, 72,
        ];
        assert_eq!(pager.new_ids, expected);
    }

    #[test]
    fn test_deferred_new_match() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (sub_id, responses) = subscribe(
            &mut coordinator,
            "sender: kosak",
            SearchOrigin::ZgramId(ZgramId(13)),
            3,
            5,
        );
        let mut pager = Pager::new();
        pager.drain(&mut coordinator, sub_id, 3, responses);
        pager.take_ids();

        // A new matching zgram arrives after both sides went dry.
        let mut responses = Vec::new();
        coordinator.post_zgrams(
            sub_id,
            testutil::DYNAMIC_NOW + 60,
            drequests::PostZgrams {
                entries: vec![(
                    ZgramCore::new(
                        "kosak.STAT",
                        "No one will miss me when I'm gone.",
                        RenderStyle::Default,
                    ),
                    None,
                )],
            },
            &mut responses,
        );
        pager.drain(&mut coordinator, sub_id, 3, responses);
        assert_eq!(pager.new_ids, vec![73]);
    }

    #[test]
    fn test_reaction_changes_reach_an_open_subscription() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (sub_id, responses) = subscribe(
            &mut coordinator,
            "hasreaction(\"👍\")",
            SearchOrigin::ZgramId(ZgramId(30)),
            10,
            25,
        );
        let mut pager = Pager::new();
        pager.process(&responses);
        assert!(pager.valid);

        // We post that we like 50 and 2.
        let mut responses = Vec::new();
        coordinator.post_metadata(
            sub_id,
            testutil::DYNAMIC_NOW + 60,
            drequests::PostMetadata {
                metadata: vec![
                    MetadataRecord::Reaction(Reaction::new(ZgramId(50), "👍", "kosak", true)),
                    MetadataRecord::Reaction(Reaction::new(ZgramId(2), "👍", "kosak", true)),
                ],
            },
            &mut responses,
        );
        pager.process(&responses);

        // The back side still delivers what it had found; the already-passed
        // zgram 50 is not re-delivered (metadata does not grow the index).
        pager.drain_side(&mut coordinator, sub_id, true);
        assert_eq!(pager.take_ids(), vec![30, 41]);
        assert_eq!(pager.estimates.front.count, 1);
        assert_eq!(pager.estimates.back.count, 0);
        assert!(pager.estimates.back.exact);

        pager.drain_side(&mut coordinator, sub_id, false);
        assert_eq!(pager.take_ids(), vec![0]);
        assert_eq!(pager.estimates.front.count, 0);
        assert_eq!(pager.estimates.back.count, 0);
    }

    #[test]
    fn test_post_zgram_with_reply_to() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (sub_id, _responses) = subscribe(&mut coordinator, "", SearchOrigin::End, 10, 25);

        let mut responses = Vec::new();
        coordinator.post_zgrams(
            sub_id,
            testutil::DYNAMIC_NOW + 60,
            drequests::PostZgrams {
                entries: vec![(
                    ZgramCore::new("appreciation.anti.t", "tpnn", RenderStyle::Default),
                    Some(ZgramId(71)),
                )],
            },
            &mut responses,
        );

        let mut refers_to = Vec::new();
        coordinator
            .index()
            .get_refers_to_for(ZgramId(73), &mut refers_to);
        assert_eq!(refers_to.len(), 1);
        assert_eq!(refers_to[0].zgram_id, ZgramId(73));
        assert_eq!(refers_to[0].refers_to, ZgramId(71));
    }

    #[test]
    fn test_sanitization_drops_foreign_records() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (sub_id, _responses) = subscribe(&mut coordinator, "", SearchOrigin::End, 10, 25);

        // kosak may not react on simon's behalf, nor revise simon's zgram
        // 70; revising his own zgram 71 is fine.
        let mut responses = Vec::new();
        coordinator.post_metadata(
            sub_id,
            testutil::DYNAMIC_NOW + 60,
            drequests::PostMetadata {
                metadata: vec![
                    MetadataRecord::Reaction(Reaction::new(ZgramId(30), "👍", "simon", true)),
                    MetadataRecord::Revision(crate::zgram::ZgramRevision {
                        zgram_id: ZgramId(70),
                        core: ZgramCore::new("appreciation", "hijacked", RenderStyle::Default),
                    }),
                    MetadataRecord::Revision(crate::zgram::ZgramRevision {
                        zgram_id: ZgramId(71),
                        core: ZgramCore::new("appreciation.anti", "kosak-- kosak--", RenderStyle::Default),
                    }),
                ],
            },
            &mut responses,
        );

        let index = coordinator.index();
        // simon's reaction state on 30 is what the corpus left it: revoked.
        assert_eq!(index.reaction_net_count("👍", ZgramId(30)), 2);
        let mut revisions = Vec::new();
        index.get_revisions_for(ZgramId(70), &mut revisions);
        assert!(revisions.is_empty());
        let mut revisions = Vec::new();
        index.get_revisions_for(ZgramId(71), &mut revisions);
        assert_eq!(revisions.len(), 1);
        // The accepted revision moved the kosak counter: the original
        // "kosak--" was rescanned out and two new minus mentions added.
        assert_eq!(index.get_plus_plus_count_after(ZgramId(71), "kosak"), 1);
    }

    #[test]
    fn test_unsubscribe_removes_the_subscription() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (sub_id, _responses) = subscribe(&mut coordinator, "", SearchOrigin::End, 10, 25);
        assert!(coordinator.subscription(sub_id).is_some());
        coordinator.unsubscribe(sub_id);
        assert!(coordinator.subscription(sub_id).is_none());
        // Requests against the dead id are logged and dropped.
        let mut responses = Vec::new();
        coordinator.get_more_zgrams(
            sub_id,
            drequests::GetMoreZgrams {
                for_back_side: false,
                count: 10,
            },
            &mut responses,
        );
        assert!(responses.is_empty());
    }

    #[test]
    fn test_check_syntax() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (sub_id, _responses) = subscribe(&mut coordinator, "", SearchOrigin::End, 10, 25);

        let mut responses = Vec::new();
        coordinator.check_syntax(
            sub_id,
            drequests::CheckSyntax {
                query: "sender:kosak and not cinnabon".to_string(),
            },
            &mut responses,
        );
        match &responses[0].1 {
            DResponse::AckSyntaxCheck(ack) => {
                assert!(ack.valid);
                assert_eq!(ack.result, "and(sender:kosak, not(word(cinnabon)))");
            }
            other => panic!("expected AckSyntaxCheck, got {other:?}"),
        }

        let mut responses = Vec::new();
        coordinator.check_syntax(
            sub_id,
            drequests::CheckSyntax {
                query: "(oops".to_string(),
            },
            &mut responses,
        );
        match &responses[0].1 {
            DResponse::AckSyntaxCheck(ack) => assert!(!ack.valid),
            other => panic!("expected AckSyntaxCheck, got {other:?}"),
        }
    }

    #[test]
    fn test_get_specific_zgrams() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (sub_id, _responses) = subscribe(&mut coordinator, "", SearchOrigin::End, 10, 25);

        let mut responses = Vec::new();
        coordinator.get_specific_zgrams(
            sub_id,
            drequests::GetSpecificZgrams {
                // 5 does not exist and is skipped.
                zgram_ids: vec![ZgramId(4), ZgramId(5), ZgramId(52)],
            },
            &mut responses,
        );
        match &responses[0].1 {
            DResponse::AckSpecificZgrams(ack) => {
                let ids: Vec<u64> = ack.zgrams.iter().map(|zg| zg.id.raw()).collect();
                assert_eq!(ids, vec![4, 52]);
                assert_eq!(ack.zgrams[0].body(), "kosak.");
                assert_eq!(ack.zgrams[1].body(), "FAIL");
            }
            other => panic!("expected AckSpecificZgrams, got {other:?}"),
        }
    }

    #[test]
    fn test_subscribe_with_invalid_query() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let mut responses = Vec::new();
        let sub_id = coordinator.subscribe(
            testutil::kosak_profile(),
            drequests::Subscribe {
                query: "(unclosed".to_string(),
                start_origin: SearchOrigin::End,
                page_size: 10,
                query_margin: 5,
            },
            &mut responses,
        );
        assert!(sub_id.is_none());
        assert_eq!(responses.len(), 1);
        match &responses[0] {
            (None, DResponse::AckSubscribe(ack)) => {
                assert!(!ack.valid);
                assert!(!ack.error.is_empty());
            }
            other => panic!("expected a failed AckSubscribe, got {other:?}"),
        }
    }

    #[test]
    fn test_zmojis_arrive_on_subscribe() {
        let (_tmp, mut coordinator) = testutil::setup_coordinator();
        let (_sub_id, responses) = subscribe(&mut coordinator, "", SearchOrigin::End, 10, 25);
        let update = responses.iter().find_map(|(_, resp)| match resp {
            DResponse::MetadataUpdate(update) => Some(update),
            _ => None,
        });
        let update = update.expect("subscribe pushes a zmojis update");
        match update.records[0].as_ref() {
            MetadataRecord::Zmojis(zm) => {
                assert_eq!(zm.user_id, "kosak");
                assert_eq!(zm.zmojis, "❦,❧,💕,💞,🙆,🙅,😂");
            }
            other => panic!("expected zmojis, got {other:?}"),
        }
    }
}
