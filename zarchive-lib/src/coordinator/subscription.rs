//! A subscription: one client's standing query, with independent paging
//! state for each direction.

use crate::index::consolidated::ConsolidatedIndex;
use crate::index::types::ZgramOff;
use crate::iterators::{IteratorContext, IteratorState, ZgramIterator, ZgramRel};
use crate::magic;
use crate::protocol::Estimates;
use crate::zgram::{Profile, SearchOrigin, ZgramId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_FREE_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub{}", self.0)
    }
}

/// One direction's iterator state, residual buffer, and exhaustion marker.
///
/// Exhaustion is a version number rather than a flag: we record the zgram
/// count (in the direction of travel) at which the iterator ran dry. The
/// side is exhausted exactly while that count still equals the current one,
/// so growth on the forward side re-arms the search automatically. The back
/// side's count is pinned at 0, which can never grow.
#[derive(Debug)]
pub struct PerSideStatus {
    forward: bool,
    state: IteratorState,
    /// Matches pulled past what the client asked for, stored as absolute
    /// offsets (those stay valid as the index grows).
    residual: VecDeque<ZgramOff>,
    exhaust_version: u64,
}

impl PerSideStatus {
    /// Builds the side anchored at `record_id`: the forward side starts at
    /// the first zgram >= the anchor, the backward side strictly before it.
    pub fn create(
        index: &ConsolidatedIndex,
        query: &ZgramIterator,
        record_id: ZgramId,
        forward: bool,
        min_items: usize,
    ) -> PerSideStatus {
        let ctx = IteratorContext::new(index, forward);
        let off = index.lower_bound(record_id);
        let lower_bound = if forward {
            ZgramRel(off.0)
        } else {
            ZgramRel(ctx.end() - off.0)
        };
        let state = query.create_state(&ctx);
        let mut result = PerSideStatus {
            forward,
            state,
            residual: VecDeque::new(),
            exhaust_version: u64::MAX,
        };
        result.top_up(index, query, lower_bound, min_items);
        result
    }

    /// Pulls from the iterator in fixed-size chunks until the residual holds
    /// `min_items`, or the iterator runs dry and the side is marked
    /// exhausted at the current version.
    pub fn top_up(
        &mut self,
        index: &ConsolidatedIndex,
        query: &ZgramIterator,
        lower_bound: ZgramRel,
        min_items: usize,
    ) -> bool {
        let ctx = IteratorContext::new(index, self.forward);
        while self.residual.len() < min_items {
            if self.is_exhausted(index) {
                return false;
            }
            let mut items = [ZgramRel(0); magic::ITERATOR_CHUNK_SIZE];
            let count = query.get_more(&ctx, &mut self.state, lower_bound, &mut items);
            if count == 0 {
                self.set_exhausted(index);
                return false;
            }
            for item in &items[..count] {
                self.residual.push_back(ctx.rel_to_off(*item));
            }
        }
        true
    }

    fn current_version(&self, index: &ConsolidatedIndex) -> u64 {
        if self.forward {
            index.zgram_end_off().0 as u64
        } else {
            0
        }
    }

    pub fn is_exhausted(&self, index: &ConsolidatedIndex) -> bool {
        self.exhaust_version == self.current_version(index)
    }

    fn set_exhausted(&mut self, index: &ConsolidatedIndex) {
        self.exhaust_version = self.current_version(index);
    }

    pub fn residual(&mut self) -> &mut VecDeque<ZgramOff> {
        &mut self.residual
    }

    pub fn residual_len(&self) -> usize {
        self.residual.len()
    }
}

/// The standing query itself. Owned by the coordinator; a session refers to
/// it by id only.
pub struct Subscription {
    id: SubscriptionId,
    profile: Arc<Profile>,
    human_readable_text: String,
    query: ZgramIterator,
    page_size: usize,
    query_margin: usize,
    front: PerSideStatus,
    back: PerSideStatus,
    last_estimates: Estimates,
    /// The inclusive-exclusive range of ids the client has seen.
    displayed: (ZgramId, ZgramId),
}

impl Subscription {
    pub fn create(
        index: &ConsolidatedIndex,
        profile: Arc<Profile>,
        human_readable_text: String,
        query: ZgramIterator,
        start: &SearchOrigin,
        page_size: usize,
        query_margin: usize,
    ) -> Subscription {
        let anchor = match start {
            SearchOrigin::End => index.zgram_end(),
            SearchOrigin::Timestamp(ts) => {
                let off = index.lower_bound_timestamp(*ts);
                if off == index.zgram_end_off() {
                    index.zgram_end()
                } else {
                    index.get_zgram_info(off).zgram_id
                }
            }
            SearchOrigin::ZgramId(id) => *id,
        };

        let id = SubscriptionId(NEXT_FREE_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        let front = PerSideStatus::create(index, &query, anchor, false, query_margin);
        let back = PerSideStatus::create(index, &query, anchor, true, query_margin);
        Subscription {
            id,
            profile,
            human_readable_text,
            query,
            page_size,
            query_margin,
            front,
            back,
            last_estimates: Estimates::default(),
            displayed: (anchor, anchor),
        }
    }

    /// Rebinds both sides to a replacement index, anchored at the currently
    /// displayed range.
    pub fn reset_index(&mut self, new_index: &ConsolidatedIndex) {
        self.front = PerSideStatus::create(
            new_index,
            &self.query,
            self.displayed.0,
            false,
            self.query_margin,
        );
        self.back = PerSideStatus::create(
            new_index,
            &self.query,
            self.displayed.1,
            true,
            self.query_margin,
        );
    }

    /// Widens the displayed range to include `id`.
    pub fn update_displayed(&mut self, id: ZgramId) {
        self.displayed.0 = self.displayed.0.min(id);
        self.displayed.1 = self.displayed.1.max(id.next());
    }

    /// Recomputes both sides' estimates. An estimate is exact when the
    /// residual is smaller than the margin (the tail is fully known); at the
    /// margin it reads as "margin or more".
    pub fn update_estimates(&mut self) -> (Estimates, bool) {
        let front_size = self.front.residual_len().min(self.query_margin);
        let back_size = self.back.residual_len().min(self.query_margin);
        let new_estimates = Estimates::create(
            front_size as u64,
            back_size as u64,
            front_size < self.query_margin,
            back_size < self.query_margin,
        );
        let changed = self.last_estimates != new_estimates;
        self.last_estimates = new_estimates;
        (new_estimates, changed)
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.profile
    }

    pub fn human_readable_text(&self) -> &str {
        &self.human_readable_text
    }

    pub fn query(&self) -> &ZgramIterator {
        &self.query
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn query_margin(&self) -> usize {
        self.query_margin
    }

    pub fn displayed(&self) -> (ZgramId, ZgramId) {
        self.displayed
    }

    pub fn side_mut(&mut self, for_back_side: bool) -> &mut PerSideStatus {
        if for_back_side {
            &mut self.back
        } else {
            &mut self.front
        }
    }

    /// Tops up one side to hold at least `min_items`.
    pub fn top_up_side(&mut self, index: &ConsolidatedIndex, for_back_side: bool, min_items: usize) {
        let side = if for_back_side {
            &mut self.back
        } else {
            &mut self.front
        };
        side.top_up(index, &self.query, ZgramRel(0), min_items);
    }

    /// Tops up both sides to the query margin; used before estimate fan-out.
    pub fn top_up_both(&mut self, index: &ConsolidatedIndex) {
        self.front
            .top_up(index, &self.query, ZgramRel(0), self.query_margin);
        self.back
            .top_up(index, &self.query, ZgramRel(0), self.query_margin);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Subscription({}, user={}, query={}, pageSize={}, margin={}, displayed=[{}, {}))",
            self.id,
            self.profile.user_id,
            self.query,
            self.page_size,
            self.query_margin,
            self.displayed.0,
            self.displayed.1
        )
    }
}
