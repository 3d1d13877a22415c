//! The non-word leaf iterators: everything, hasreaction, and time ranges.

use crate::index::types::ZgramOff;
use crate::iterators::{IteratorContext, ScanState, ZgramRel};

/// Walks every zgram in direction order.
pub(super) fn get_more_everything(
    ctx: &IteratorContext,
    state: &mut ScanState,
    lower_bound: ZgramRel,
    out: &mut [ZgramRel],
) -> usize {
    let Some(mut candidate) = ctx.begin_scan(&mut state.consumed, lower_bound) else {
        return 0;
    };
    let mut count = 0;
    loop {
        state.consumed = Some(candidate);
        out[count] = ctx.off_to_rel(candidate);
        count += 1;
        if count == out.len() {
            return count;
        }
        match ctx.step(candidate) {
            Some(next) => candidate = next,
            None => return count,
        }
    }
}

/// Matches zgrams that currently carry at least one of `reaction`.
///
/// The candidate set is evaluated against the live metadata at each pull, so
/// a reaction added while the side is mid-page is picked up. But a side
/// that already scanned past a zgram will not go back for it (metadata does
/// not bump the zgram count, so exhaustion stands until new zgrams arrive).
#[derive(Clone, Debug, PartialEq)]
pub struct HasReactionIterator {
    pub reaction: String,
}

impl HasReactionIterator {
    pub fn get_more(
        &self,
        ctx: &IteratorContext,
        state: &mut ScanState,
        lower_bound: ZgramRel,
        out: &mut [ZgramRel],
    ) -> usize {
        let Some(start) = ctx.begin_scan(&mut state.consumed, lower_bound) else {
            return 0;
        };
        let index = ctx.index();
        let candidates: Vec<ZgramOff> = index
            .reaction_candidates(&self.reaction)
            .into_iter()
            .filter(|id| index.reaction_net_count(&self.reaction, *id) > 0)
            .filter_map(|id| index.try_find(id))
            .collect();

        let mut count = 0;
        if ctx.forward() {
            let from = candidates.partition_point(|off| *off < start);
            for off in &candidates[from..] {
                state.consumed = Some(*off);
                out[count] = ctx.off_to_rel(*off);
                count += 1;
                if count == out.len() {
                    return count;
                }
            }
        } else {
            let from = candidates.partition_point(|off| *off <= start);
            for off in candidates[..from].iter().rev() {
                state.consumed = Some(*off);
                out[count] = ctx.off_to_rel(*off);
                count += 1;
                if count == out.len() {
                    return count;
                }
            }
        }
        state.consumed = ctx.last_examined();
        count
    }
}

impl std::fmt::Display for HasReactionIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hasreaction(\"{}\")", self.reaction)
    }
}

/// Matches zgrams whose timestamp falls within [begin, end).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRangeIterator {
    pub begin: Option<u64>,
    pub end: Option<u64>,
}

impl TimeRangeIterator {
    pub fn get_more(
        &self,
        ctx: &IteratorContext,
        state: &mut ScanState,
        lower_bound: ZgramRel,
        out: &mut [ZgramRel],
    ) -> usize {
        let Some(candidate) = ctx.begin_scan(&mut state.consumed, lower_bound) else {
            return 0;
        };
        let index = ctx.index();
        let lo = match self.begin {
            Some(ts) => index.lower_bound_timestamp(ts).0,
            None => 0,
        };
        let hi = match self.end {
            Some(ts) => index.lower_bound_timestamp(ts).0,
            None => ctx.end(),
        };

        let mut count = 0;
        let mut candidate = candidate;
        loop {
            // Jump over the disallowed region instead of stepping through it.
            if ctx.forward() {
                if candidate.0 < lo {
                    candidate = ZgramOff(lo);
                }
                if candidate.0 >= hi || candidate.0 >= ctx.end() {
                    state.consumed = ctx.last_examined();
                    return count;
                }
            } else {
                if hi == 0 {
                    state.consumed = ctx.last_examined();
                    return count;
                }
                if candidate.0 > hi - 1 {
                    candidate = ZgramOff(hi - 1);
                }
                if candidate.0 < lo {
                    state.consumed = ctx.last_examined();
                    return count;
                }
            }
            state.consumed = Some(candidate);
            out[count] = ctx.off_to_rel(candidate);
            count += 1;
            if count == out.len() {
                return count;
            }
            match ctx.step(candidate) {
                Some(next) => candidate = next,
                None => {
                    state.consumed = ctx.last_examined();
                    return count;
                }
            }
        }
    }
}

impl std::fmt::Display for TimeRangeIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.begin, self.end) {
            (Some(b), Some(e)) => write!(f, "timerange({b}, {e})"),
            (Some(b), None) => write!(f, "timerange({b}, )"),
            (None, Some(e)) => write!(f, "timerange(, {e})"),
            (None, None) => write!(f, "timerange(, )"),
        }
    }
}
