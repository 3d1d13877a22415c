//! and / or / not over child iterators.

use crate::iterators::{AndState, IteratorContext, NotState, OrState, ZgramIterator, ZgramRel};

/// Leapfrog intersection: advance every child to a common candidate,
/// emitting when they all agree. Children are pulled one item at a time
/// with the candidate as the lower bound.
pub(super) fn get_more_and(
    children: &[ZgramIterator],
    st: &mut AndState,
    ctx: &IteratorContext,
    lower_bound: ZgramRel,
    out: &mut [ZgramRel],
) -> usize {
    if children.is_empty() {
        return 0;
    }
    let mut count = 0;
    let mut candidate = lower_bound;
    while count < out.len() {
        let mut max_rel = candidate;
        for i in 0..children.len() {
            let pending_rel = st.pending[i].map(|off| ctx.off_to_rel(off));
            let needs_pull = match pending_rel {
                Some(rel) => rel < candidate,
                None => true,
            };
            let rel = if needs_pull {
                let mut buf = [ZgramRel(0)];
                let n = children[i].get_more(ctx, &mut st.children[i], candidate, &mut buf);
                if n == 0 {
                    // This child has nothing at or after the candidate right
                    // now, so no further intersection is possible right now.
                    st.pending[i] = None;
                    return count;
                }
                st.pending[i] = Some(ctx.rel_to_off(buf[0]));
                buf[0]
            } else {
                pending_rel.unwrap()
            };
            if rel > max_rel {
                max_rel = rel;
            }
        }

        let all_equal = st
            .pending
            .iter()
            .all(|p| p.map(|off| ctx.off_to_rel(off)) == Some(max_rel));
        if all_equal {
            out[count] = max_rel;
            count += 1;
            for pending in st.pending.iter_mut() {
                *pending = None;
            }
            candidate = ZgramRel(max_rel.0 + 1);
        } else {
            candidate = max_rel;
        }
    }
    count
}

/// Sorted merge with dedup: peek one item per child, emit the smallest.
pub(super) fn get_more_or(
    children: &[ZgramIterator],
    st: &mut OrState,
    ctx: &IteratorContext,
    lower_bound: ZgramRel,
    out: &mut [ZgramRel],
) -> usize {
    let mut count = 0;
    while count < out.len() {
        let child_lb = match st.consumed {
            Some(off) => ZgramRel(lower_bound.0.max(ctx.off_to_rel(off).0 + 1)),
            None => lower_bound,
        };
        for i in 0..children.len() {
            if st.peeked[i].is_none() {
                let mut buf = [ZgramRel(0)];
                let n = children[i].get_more(ctx, &mut st.children[i], child_lb, &mut buf);
                if n > 0 {
                    st.peeked[i] = Some(ctx.rel_to_off(buf[0]));
                }
            }
        }

        let mut best: Option<(usize, ZgramRel)> = None;
        for (i, peeked) in st.peeked.iter().enumerate() {
            if let Some(off) = peeked {
                let rel = ctx.off_to_rel(*off);
                if best.map(|(_, b)| rel < b).unwrap_or(true) {
                    best = Some((i, rel));
                }
            }
        }
        let Some((bi, rel)) = best else {
            return count;
        };
        st.peeked[bi] = None;

        // Duplicates across children, or peeks left over from before the
        // lower bound moved, are dropped.
        let stale = rel < lower_bound
            || st
                .consumed
                .map(|off| rel <= ctx.off_to_rel(off))
                .unwrap_or(false);
        if stale {
            continue;
        }
        st.consumed = Some(ctx.rel_to_off(rel));
        out[count] = rel;
        count += 1;
    }
    count
}

/// Everything the inner iterator does not match.
pub(super) fn get_more_not(
    inner: &ZgramIterator,
    st: &mut NotState,
    ctx: &IteratorContext,
    lower_bound: ZgramRel,
    out: &mut [ZgramRel],
) -> usize {
    let Some(mut candidate) = ctx.begin_scan(&mut st.scan.consumed, lower_bound) else {
        return 0;
    };
    let mut count = 0;
    loop {
        let candidate_rel = ctx.off_to_rel(candidate);

        // Make sure the inner match we hold is at-or-after the candidate.
        let inner_stale = st
            .inner_next
            .map(|off| ctx.off_to_rel(off) < candidate_rel)
            .unwrap_or(true);
        if inner_stale {
            let mut buf = [ZgramRel(0)];
            let n = inner.get_more(ctx, &mut st.inner, candidate_rel, &mut buf);
            st.inner_next = if n > 0 {
                Some(ctx.rel_to_off(buf[0]))
            } else {
                // The inner side has no matches in the remaining range, so
                // every remaining candidate passes.
                None
            };
        }

        if st.inner_next == Some(candidate) {
            st.inner_next = None;
        } else {
            st.scan.consumed = Some(candidate);
            out[count] = candidate_rel;
            count += 1;
            if count == out.len() {
                return count;
            }
        }

        match ctx.step(candidate) {
            Some(next) => candidate = next,
            None => {
                st.scan.consumed = ctx.last_examined();
                return count;
            }
        }
    }
}
