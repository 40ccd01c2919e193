//! The per-pointer reference-count lattice.
//!
//! Every tracked object carries two independent states per region, one for
//! each direction of the sequence dataflow:
//!
//! - [`TopDownRefCountState`]: an increment reachable from the scope entry
//!   that no decrement has consumed yet. A later decrement of the same
//!   object completes the match.
//! - [`BottomUpRefCountState`]: the mirror, a decrement reachable backward
//!   from the scope exit, completed by an earlier increment.
//!
//! Both wrap the same three-level lattice [`RefCountState`]:
//!
//! ```text
//!            Top              (no information)
//!     Matched(S1) Matched(S2) (one per contributing instruction set)
//!           Unknown           (paths disagree, or something interfered)
//! ```
//!
//! Meet is strict: two `Matched` states only agree when their instruction
//! sets are identical. Anything weaker could report a pair as matched on a
//! path where it is not.

use std::fmt;

use smallvec::SmallVec;

use kiln_ir::InstrId;

use crate::alias::TrackedValue;
use crate::blot_map::BlotMapVector;

/// Sorted, deduplicated set of instruction addresses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct InstSet(SmallVec<[InstrId; 2]>);

impl InstSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(id: InstrId) -> Self {
        let mut set = SmallVec::new();
        set.push(id);
        Self(set)
    }

    /// Insert `id`, keeping the set sorted. Returns `false` if it was
    /// already present.
    pub fn insert(&mut self, id: InstrId) -> bool {
        match self.0.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.0.insert(pos, id);
                true
            }
        }
    }

    pub fn contains(&self, id: InstrId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[InstrId] {
        &self.0
    }
}

impl FromIterator<InstrId> for InstSet {
    fn from_iter<I: IntoIterator<Item = InstrId>>(iter: I) -> Self {
        let mut ids: SmallVec<[InstrId; 2]> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }
}

impl fmt::Display for InstSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}")?;
        }
        write!(f, "}}")
    }
}

/// Lattice element shared by both directions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum RefCountState {
    /// No information. Identity of [`meet`](Self::meet).
    #[default]
    Top,
    /// A still-valid match whose other half is the given instruction set.
    Matched(InstSet),
    /// Paths disagree or an invalidating instruction was seen.
    Unknown,
}

impl RefCountState {
    /// Greatest lower bound.
    #[must_use]
    pub fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (RefCountState::Top, x) | (x, RefCountState::Top) => x.clone(),
            (RefCountState::Matched(a), RefCountState::Matched(b)) if a == b => {
                RefCountState::Matched(a.clone())
            }
            _ => RefCountState::Unknown,
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(self, RefCountState::Top)
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, RefCountState::Matched(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, RefCountState::Unknown)
    }

    /// The contributing instructions of a `Matched` state.
    pub fn insts(&self) -> Option<&InstSet> {
        match self {
            RefCountState::Matched(set) => Some(set),
            RefCountState::Top | RefCountState::Unknown => None,
        }
    }
}

impl fmt::Display for RefCountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefCountState::Top => write!(f, "top"),
            RefCountState::Matched(set) => write!(f, "matched {set}"),
            RefCountState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Operations common to both directional states.
pub trait RefCountLattice: Clone + Default + PartialEq + fmt::Debug {
    fn state(&self) -> &RefCountState;

    fn from_state(state: RefCountState) -> Self;

    /// Lattice meet of the underlying states.
    #[must_use]
    fn meet(&self, other: &Self) -> Self {
        Self::from_state(self.state().meet(other.state()))
    }

    /// The bottom element.
    fn unknown() -> Self {
        Self::from_state(RefCountState::Unknown)
    }

    /// Drop to `Unknown`: an instruction interfered with the object.
    fn invalidate(&mut self) {
        *self = Self::unknown();
    }

    fn is_matched(&self) -> bool {
        self.state().is_matched()
    }

    fn is_unknown(&self) -> bool {
        self.state().is_unknown()
    }
}

/// Top-down state: an outstanding increment awaiting its decrement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct TopDownRefCountState {
    state: RefCountState,
}

impl TopDownRefCountState {
    /// Start tracking a match at increment `inc`.
    ///
    /// Returns `true` if an earlier increment of the same object was still
    /// outstanding (a nested retain). That earlier match is abandoned.
    pub fn init_with_increment(&mut self, inc: InstrId) -> bool {
        let nested = self.state.is_matched();
        self.state = RefCountState::Matched(InstSet::singleton(inc));
        nested
    }

    /// The increments a decrement seen now would pair with.
    pub fn increments(&self) -> Option<&InstSet> {
        self.state.insts()
    }

    /// The state to record for a decrement that completes this match, or
    /// `None` if nothing is outstanding or the match is broken.
    pub fn match_decrement(&self) -> Option<Self> {
        self.state.is_matched().then(|| self.clone())
    }
}

impl RefCountLattice for TopDownRefCountState {
    fn state(&self) -> &RefCountState {
        &self.state
    }

    fn from_state(state: RefCountState) -> Self {
        Self { state }
    }
}

/// Bottom-up state: an outstanding decrement awaiting its increment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct BottomUpRefCountState {
    state: RefCountState,
}

impl BottomUpRefCountState {
    /// Start tracking a match at decrement `dec`.
    ///
    /// Returns `true` if a later decrement of the same object was still
    /// outstanding (a nested release).
    pub fn init_with_decrement(&mut self, dec: InstrId) -> bool {
        let nested = self.state.is_matched();
        self.state = RefCountState::Matched(InstSet::singleton(dec));
        nested
    }

    /// The decrements an increment seen now would pair with.
    pub fn decrements(&self) -> Option<&InstSet> {
        self.state.insts()
    }

    /// The state to record for an increment that completes this match.
    pub fn match_increment(&self) -> Option<Self> {
        self.state.is_matched().then(|| self.clone())
    }
}

impl RefCountLattice for BottomUpRefCountState {
    fn state(&self) -> &RefCountState {
        &self.state
    }

    fn from_state(state: RefCountState) -> Self {
        Self { state }
    }
}

// ── Merging ─────────────────────────────────────────────────────────

/// One incoming edge of a merge.
#[derive(Debug)]
pub struct MergeEdge<'a, S> {
    /// State flowing along the edge. `None` for an edge that crosses the
    /// current scope, which carries nothing.
    pub map: Option<&'a BlotMapVector<TrackedValue, S>>,
    /// Absent pointers on this edge are ignored instead of forcing
    /// `Unknown`.
    pub allows_leaks: bool,
}

impl<'a, S> MergeEdge<'a, S> {
    pub fn new(map: &'a BlotMapVector<TrackedValue, S>) -> Self {
        Self {
            map: Some(map),
            allows_leaks: false,
        }
    }

    pub fn nonlocal(allows_leaks: bool) -> Self {
        Self {
            map: None,
            allows_leaks,
        }
    }

    #[must_use]
    pub fn with_allows_leaks(mut self, allows_leaks: bool) -> Self {
        self.allows_leaks = allows_leaks;
        self
    }
}

/// Join several incoming maps into `out` (cleared first).
///
/// Each pointer present on at least one edge gets the meet over all edges,
/// where an edge lacking the pointer contributes `Unknown` (or nothing, if
/// the edge allows leaks). Pointers absent from every edge stay absent.
/// Keys appear in first-seen order across the edges.
pub fn merge_edges<S: RefCountLattice>(
    edges: &[MergeEdge<'_, S>],
    out: &mut BlotMapVector<TrackedValue, S>,
) {
    out.clear();
    for edge in edges {
        let Some(map) = edge.map else {
            continue;
        };
        for &key in map.keys() {
            if out.contains_key(&key) {
                continue;
            }
            let merged = edges.iter().fold(S::default(), |acc, e| {
                match e.map.and_then(|m| m.get(&key)) {
                    Some(state) => acc.meet(state),
                    None if e.allows_leaks => acc,
                    None => S::unknown(),
                }
            });
            out.insert(key, merged);
        }
    }
}
