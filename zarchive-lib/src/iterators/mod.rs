//! The iterator framework: forward/reverse cursors over the consolidated
//! index with out-of-band per-side state and chunked pull.
//!
//! Iterators exchange `ZgramRel` values (offsets in the direction of
//! iteration), so callers never branch on direction. Internally, state is
//! kept as absolute offsets: those stay valid while the index grows, whereas
//! backward rel values would shift. Returning 0 from a pull means "no more
//! at this moment"; the caller may retry after the index grows.

mod boolean;
mod special;
mod word;

pub use special::{HasReactionIterator, TimeRangeIterator};
pub use word::WordIterator;

use crate::index::consolidated::ConsolidatedIndex;
use crate::index::types::ZgramOff;

/// An offset in the direction of iteration: 0 is the first zgram the side
/// would deliver, regardless of which way it is walking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ZgramRel(pub u32);

/// Converts between rel and absolute coordinates for one (index, direction)
/// pair. Cheap to construct; make a fresh one per call so `end` is current.
#[derive(Clone, Copy)]
pub struct IteratorContext<'a> {
    index: &'a ConsolidatedIndex,
    forward: bool,
}

impl<'a> IteratorContext<'a> {
    pub fn new(index: &'a ConsolidatedIndex, forward: bool) -> IteratorContext<'a> {
        IteratorContext { index, forward }
    }

    pub fn index(&self) -> &'a ConsolidatedIndex {
        self.index
    }

    pub fn forward(&self) -> bool {
        self.forward
    }

    pub fn end(&self) -> u32 {
        self.index.zgram_info_size() as u32
    }

    pub fn rel_to_off(&self, rel: ZgramRel) -> ZgramOff {
        if self.forward {
            ZgramOff(rel.0)
        } else {
            ZgramOff(self.end() - 1 - rel.0)
        }
    }

    pub fn off_to_rel(&self, off: ZgramOff) -> ZgramRel {
        if self.forward {
            ZgramRel(off.0)
        } else {
            ZgramRel(self.end() - 1 - off.0)
        }
    }

    /// The first absolute offset at or after `lb` (rel space) and strictly
    /// beyond `consumed`, in this direction. None if the side has no
    /// candidate right now.
    pub fn first_candidate(&self, consumed: Option<ZgramOff>, lb: ZgramRel) -> Option<ZgramOff> {
        let end = self.end();
        if self.forward {
            let mut c = lb.0;
            if let Some(done) = consumed {
                c = c.max(done.0 + 1);
            }
            if c >= end {
                None
            } else {
                Some(ZgramOff(c))
            }
        } else {
            if end == 0 || lb.0 >= end {
                return None;
            }
            let mut c = end - 1 - lb.0;
            if let Some(done) = consumed {
                if done.0 == 0 {
                    return None;
                }
                c = c.min(done.0 - 1);
            }
            Some(ZgramOff(c))
        }
    }

    /// Like [`Self::first_candidate`], but when there is nothing to scan it
    /// records the skipped region as examined. Without this, a forward side
    /// whose anchored first pull found nothing would rescan from offset 0
    /// once the index grows and the lower bound relaxes to 0.
    pub fn begin_scan(&self, consumed: &mut Option<ZgramOff>, lb: ZgramRel) -> Option<ZgramOff> {
        if let Some(candidate) = self.first_candidate(*consumed, lb) {
            return Some(candidate);
        }
        if self.forward {
            let mut c = lb.0;
            if let Some(done) = *consumed {
                c = c.max(done.0 + 1);
            }
            if c > 0 {
                *consumed = Some(ZgramOff(c - 1));
            }
        }
        None
    }

    /// One step onward in this direction, or None at the boundary.
    pub fn step(&self, off: ZgramOff) -> Option<ZgramOff> {
        if self.forward {
            if off.0 + 1 < self.end() {
                Some(ZgramOff(off.0 + 1))
            } else {
                None
            }
        } else if off.0 > 0 {
            Some(ZgramOff(off.0 - 1))
        } else {
            None
        }
    }

    /// The last position this direction can examine right now. Recording it
    /// as "consumed" after an exhausted scan keeps a later retry from
    /// revisiting anything but genuinely new zgrams.
    pub fn last_examined(&self) -> Option<ZgramOff> {
        let end = self.end();
        if end == 0 {
            return None;
        }
        Some(if self.forward {
            ZgramOff(end - 1)
        } else {
            ZgramOff(0)
        })
    }
}

/// A query, compiled to a tree of iterators. The tree itself is reusable
/// across sides and index resets; all position state lives in
/// [`IteratorState`].
#[derive(Clone, Debug, PartialEq)]
pub enum ZgramIterator {
    /// Matches every zgram.
    Everything,
    Word(WordIterator),
    And(Vec<ZgramIterator>),
    Or(Vec<ZgramIterator>),
    Not(Box<ZgramIterator>),
    HasReaction(HasReactionIterator),
    TimeRange(TimeRangeIterator),
}

impl std::fmt::Display for ZgramIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZgramIterator::Everything => write!(f, "everything"),
            ZgramIterator::Word(w) => write!(f, "{w}"),
            ZgramIterator::And(children) => write_tree(f, "and", children),
            ZgramIterator::Or(children) => write_tree(f, "or", children),
            ZgramIterator::Not(inner) => write!(f, "not({inner})"),
            ZgramIterator::HasReaction(h) => write!(f, "{h}"),
            ZgramIterator::TimeRange(t) => write!(f, "{t}"),
        }
    }
}

fn write_tree(
    f: &mut std::fmt::Formatter<'_>,
    name: &str,
    children: &[ZgramIterator],
) -> std::fmt::Result {
    write!(f, "{name}(")?;
    for (i, child) in children.iter().enumerate() {
        if i != 0 {
            write!(f, ", ")?;
        }
        write!(f, "{child}")?;
    }
    write!(f, ")")
}

/// Per-side position state, owned by the side's PerSideStatus.
#[derive(Debug)]
pub enum IteratorState {
    Scan(ScanState),
    And(AndState),
    Or(OrState),
    Not(NotState),
}

/// State for the leaf iterators: the last absolute offset examined in the
/// direction of travel.
#[derive(Debug, Default)]
pub struct ScanState {
    pub consumed: Option<ZgramOff>,
}

#[derive(Debug)]
pub struct AndState {
    pub children: Vec<IteratorState>,
    /// Each child's last pulled-but-unmatched offset.
    pub pending: Vec<Option<ZgramOff>>,
}

#[derive(Debug)]
pub struct OrState {
    pub children: Vec<IteratorState>,
    /// Each child's peeked-but-unemitted offset.
    pub peeked: Vec<Option<ZgramOff>>,
    pub consumed: Option<ZgramOff>,
}

#[derive(Debug)]
pub struct NotState {
    pub scan: ScanState,
    pub inner: Box<IteratorState>,
    /// The inner iterator's next match, if we have peeked it.
    pub inner_next: Option<ZgramOff>,
}

impl ZgramIterator {
    pub fn create_state(&self, ctx: &IteratorContext) -> IteratorState {
        match self {
            ZgramIterator::Everything
            | ZgramIterator::Word(_)
            | ZgramIterator::HasReaction(_)
            | ZgramIterator::TimeRange(_) => IteratorState::Scan(ScanState::default()),
            ZgramIterator::And(children) => IteratorState::And(AndState {
                children: children.iter().map(|c| c.create_state(ctx)).collect(),
                pending: vec![None; children.len()],
            }),
            ZgramIterator::Or(children) => IteratorState::Or(OrState {
                children: children.iter().map(|c| c.create_state(ctx)).collect(),
                peeked: vec![None; children.len()],
                consumed: None,
            }),
            ZgramIterator::Not(inner) => IteratorState::Not(NotState {
                scan: ScanState::default(),
                inner: Box::new(inner.create_state(ctx)),
                inner_next: None,
            }),
        }
    }

    /// Pulls up to `out.len()` matches at or after `lower_bound` (rel
    /// space), in increasing rel order. Returns how many were produced;
    /// 0 means none are available right now.
    pub fn get_more(
        &self,
        ctx: &IteratorContext,
        state: &mut IteratorState,
        lower_bound: ZgramRel,
        out: &mut [ZgramRel],
    ) -> usize {
        if out.is_empty() {
            return 0;
        }
        match (self, state) {
            (ZgramIterator::Everything, IteratorState::Scan(scan)) => {
                special::get_more_everything(ctx, scan, lower_bound, out)
            }
            (ZgramIterator::Word(word), IteratorState::Scan(scan)) => {
                word.get_more(ctx, scan, lower_bound, out)
            }
            (ZgramIterator::HasReaction(h), IteratorState::Scan(scan)) => {
                h.get_more(ctx, scan, lower_bound, out)
            }
            (ZgramIterator::TimeRange(t), IteratorState::Scan(scan)) => {
                t.get_more(ctx, scan, lower_bound, out)
            }
            (ZgramIterator::And(children), IteratorState::And(st)) => {
                boolean::get_more_and(children, st, ctx, lower_bound, out)
            }
            (ZgramIterator::Or(children), IteratorState::Or(st)) => {
                boolean::get_more_or(children, st, ctx, lower_bound, out)
            }
            (ZgramIterator::Not(inner), IteratorState::Not(st)) => {
                boolean::get_more_not(inner, st, ctx, lower_bound, out)
            }
            (_, state) => {
                debug_assert!(false, "iterator state shape mismatch: {state:?}");
                0
            }
        }
    }
}
