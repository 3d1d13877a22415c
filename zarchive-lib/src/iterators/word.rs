//! Word iterators: literal and prefix matches, optionally masked to a
//! subset of fields.

use crate::index::consolidated::{OccurrenceList, WordMatcher};
use crate::index::types::{FieldMask, FieldTag, ZgramOff};
use crate::iterators::{IteratorContext, ScanState, ZgramRel};

#[derive(Clone, Debug, PartialEq)]
pub struct WordIterator {
    pub matcher: WordMatcher,
    pub mask: FieldMask,
}

impl WordIterator {
    pub fn literal(folded: String, mask: FieldMask) -> WordIterator {
        WordIterator {
            matcher: WordMatcher::Literal(folded),
            mask,
        }
    }

    pub fn prefix(folded: String, mask: FieldMask) -> WordIterator {
        WordIterator {
            matcher: WordMatcher::Prefix(folded),
            mask,
        }
    }

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

        let mut lists: Vec<OccurrenceList> = Vec::new();
        index.match_words(&self.matcher, &mut |list| {
            if !list.is_empty() {
                lists.push(list);
            }
        });

        // One cursor per occurrence list, positioned at the first occurrence
        // whose zgram is at-or-after `start` in the direction of travel.
        // Occurrence lists are sorted by word offset, and zgram offsets are
        // nondecreasing in word offset, so this is a binary search.
        let zgram_of = |list: &OccurrenceList, i: usize| index.get_word_info(list.get(i)).zgram_off();
        let mut cursors: Vec<i64> = Vec::with_capacity(lists.len());
        for list in &lists {
            let at_or_after = partition(list.len(), |i| zgram_of(list, i) < start);
            if ctx.forward() {
                cursors.push(at_or_after as i64);
            } else {
                let at_or_before = partition(list.len(), |i| zgram_of(list, i) <= start);
                cursors.push(at_or_before as i64 - 1);
            }
        }

        let mut count = 0;
        let mut last_emitted: Option<ZgramOff> = None;
        while count < out.len() {
            // Pick the next occurrence across all lists in direction order.
            let mut best: Option<(usize, ZgramOff)> = None;
            for (li, list) in lists.iter().enumerate() {
                let cur = cursors[li];
                if cur < 0 || cur as usize >= list.len() {
                    continue;
                }
                let zo = zgram_of(list, cur as usize);
                let better = match best {
                    None => true,
                    Some((_, best_zo)) => {
                        if ctx.forward() {
                            zo < best_zo
                        } else {
                            zo > best_zo
                        }
                    }
                };
                if better {
                    best = Some((li, zo));
                }
            }
            let Some((li, zo)) = best else {
                // Every list is exhausted: remember that we examined all the
                // way to the boundary so a later retry only sees new zgrams.
                state.consumed = ctx.last_examined();
                break;
            };

            let word_off = lists[li].get(if ctx.forward() {
                let c = cursors[li] as usize;
                cursors[li] += 1;
                c
            } else {
                let c = cursors[li] as usize;
                cursors[li] -= 1;
                c
            });

            let tag: FieldTag = index.get_word_info(word_off).field_tag();
            if !self.mask.contains(tag) {
                continue;
            }
            if last_emitted == Some(zo) {
                continue;
            }
            last_emitted = Some(zo);
            state.consumed = Some(zo);
            out[count] = ctx.off_to_rel(zo);
            count += 1;
        }
        count
    }
}

impl std::fmt::Display for WordIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.mask == FieldMask::ALL {
            return write!(f, "word({})", self.matcher);
        }
        let field = if self.mask == FieldMask::of(FieldTag::Sender) {
            "sender"
        } else if self.mask == FieldMask::of(FieldTag::Signature) {
            "signature"
        } else if self.mask == FieldMask::of(FieldTag::Instance) {
            "instance"
        } else if self.mask == FieldMask::of(FieldTag::Body) {
            "body"
        } else {
            "fields"
        };
        write!(f, "{field}:{}", self.matcher)
    }
}

fn partition(len: usize, pred: impl Fn(usize) -> bool) -> usize {
    let mut lo = 0;
    let mut hi = len;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
