//! Rectangles over (offset × epoch) and the overlap classifier.
//!
//! A rectangle is the composite key of the tree: an inclusive byte-offset
//! range paired with an inclusive epoch range. Leaf entries compare with
//! [`classify`], which encodes the multi-version visibility rules, while
//! bounding rectangles of internal nodes compare with [`classify_mbr`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{EvtError, EvtResult};

/// The highest epoch, used as an open upper bound.
pub const EPOCH_MAX: u64 = u64::MAX;

/// An (offset range × epoch range) rectangle. All bounds are inclusive.
///
/// # Examples
///
/// ```rust
/// use evtree::{EvtRect, classify, OverlapKind};
///
/// // bytes [0, 4096) written at epoch 1, then rewritten at epoch 2
/// let old = EvtRect::at_epoch(0, 4095, 1);
/// let new = EvtRect::at_epoch(0, 4095, 2);
/// assert_eq!(classify(&old, &new), OverlapKind::Capping);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EvtRect {
    pub off_lo: u64,
    pub off_hi: u64,
    pub epc_lo: u64,
    pub epc_hi: u64,
}

impl fmt::Display for EvtRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epc_lo == self.epc_hi {
            write!(f, "[{}, {}]@{}", self.off_lo, self.off_hi, self.epc_lo)
        } else {
            write!(
                f,
                "[{}, {}]@[{}, {}]",
                self.off_lo, self.off_hi, self.epc_lo, self.epc_hi
            )
        }
    }
}

impl EvtRect {
    pub fn new(off_lo: u64, off_hi: u64, epc_lo: u64, epc_hi: u64) -> EvtRect {
        EvtRect {
            off_lo,
            off_hi,
            epc_lo,
            epc_hi,
        }
    }

    /// A rectangle covering a single epoch.
    pub fn at_epoch(off_lo: u64, off_hi: u64, epoch: u64) -> EvtRect {
        EvtRect::new(off_lo, off_hi, epoch, epoch)
    }

    pub fn is_valid(&self) -> bool {
        self.off_lo <= self.off_hi && self.epc_lo <= self.epc_hi
    }

    pub fn validate(&self) -> EvtResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            log::error!("Malformed rectangle {:?}", self);
            Err(EvtError::InvalidArgument(format!(
                "malformed rectangle {}",
                self
            )))
        }
    }

    /// Number of offsets covered, `off_hi - off_lo + 1`.
    pub fn width(&self) -> u128 {
        (self.off_hi - self.off_lo) as u128 + 1
    }

    /// Number of epochs covered.
    pub fn height(&self) -> u128 {
        (self.epc_hi - self.epc_lo) as u128 + 1
    }

    pub fn area(&self) -> u128 {
        self.width().saturating_mul(self.height())
    }

    pub fn offsets_overlap(&self, other: &EvtRect) -> bool {
        self.off_lo <= other.off_hi && other.off_lo <= self.off_hi
    }

    pub fn offsets_equal(&self, other: &EvtRect) -> bool {
        self.off_lo == other.off_lo && self.off_hi == other.off_hi
    }

    /// True when the offset range of `self` covers the one of `other`.
    pub fn offsets_cover(&self, other: &EvtRect) -> bool {
        self.off_lo <= other.off_lo && self.off_hi >= other.off_hi
    }

    pub fn epochs_equal(&self, other: &EvtRect) -> bool {
        self.epc_lo == other.epc_lo && self.epc_hi == other.epc_hi
    }

    /// Offsets intersect while neither range covers the other.
    pub fn offsets_partially_overlap(&self, other: &EvtRect) -> bool {
        self.offsets_overlap(other) && !self.offsets_cover(other) && !other.offsets_cover(self)
    }

    /// Containment in both dimensions.
    pub fn includes(&self, other: &EvtRect) -> bool {
        self.offsets_cover(other) && self.epc_lo <= other.epc_lo && self.epc_hi >= other.epc_hi
    }

    /// Intersection in both dimensions.
    pub fn intersects(&self, other: &EvtRect) -> bool {
        self.offsets_overlap(other) && self.epc_lo <= other.epc_hi && other.epc_lo <= self.epc_hi
    }

    /// Minimal rectangle containing both.
    pub fn merge(&self, other: &EvtRect) -> EvtRect {
        EvtRect {
            off_lo: self.off_lo.min(other.off_lo),
            off_hi: self.off_hi.max(other.off_hi),
            epc_lo: self.epc_lo.min(other.epc_lo),
            epc_hi: self.epc_hi.max(other.epc_hi),
        }
    }

    pub fn expand(&mut self, other: &EvtRect) {
        *self = self.merge(other);
    }

    /// Area that must be added to `self` to contain `other`.
    pub fn enlargement(&self, other: &EvtRect) -> u128 {
        self.merge(other).area().saturating_sub(self.area())
    }

    /// `self` restricted to the offsets of `other`, epochs untouched.
    pub fn clip_offsets(&self, other: &EvtRect) -> Option<EvtRect> {
        if !self.offsets_overlap(other) {
            return None;
        }
        Some(EvtRect {
            off_lo: self.off_lo.max(other.off_lo),
            off_hi: self.off_hi.min(other.off_hi),
            epc_lo: self.epc_lo,
            epc_hi: self.epc_hi,
        })
    }

    /// Minimal rectangle containing every rectangle of the slice.
    pub fn bounding<'a, I>(rects: I) -> Option<EvtRect>
    where
        I: IntoIterator<Item = &'a EvtRect>,
    {
        let mut iter = rects.into_iter();
        let first = *iter.next()?;
        Some(iter.fold(first, |acc, r| acc.merge(r)))
    }

    fn center_offset(&self) -> u128 {
        (self.off_lo as u128 + self.off_hi as u128) / 2
    }

    fn center_epoch(&self) -> u128 {
        (self.epc_lo as u128 + self.epc_hi as u128) / 2
    }

    pub(crate) fn center(&self) -> (u128, u128) {
        (self.center_offset(), self.center_epoch())
    }
}

/// Relation between two rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlapKind {
    /// One of the rectangles is malformed.
    Inval,
    /// Offset ranges are disjoint.
    No,
    /// Generic overlap, both rectangles keep existing.
    Yes,
    /// Same offsets and same lower epoch, an update within one write generation.
    Inplace,
    /// Exactly the same rectangle.
    Same,
    /// The candidate fully covers (overwrites) an existing rectangle of a lower epoch.
    Capping,
    /// The candidate is fully covered by an existing rectangle of a higher epoch.
    Capped,
    /// Bounding-rectangle relation: the candidate lies inside the existing rectangle.
    Included,
}

impl fmt::Display for OverlapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverlapKind::Inval => "inval",
            OverlapKind::No => "no",
            OverlapKind::Yes => "yes",
            OverlapKind::Inplace => "inplace",
            OverlapKind::Same => "same",
            OverlapKind::Capping => "capping",
            OverlapKind::Capped => "capped",
            OverlapKind::Included => "included",
        };
        f.write_str(name)
    }
}

/// Classifies a leaf-level candidate rectangle against an existing one.
///
/// Spatial relation decides first, epoch ordering second. Equal offsets with
/// an equal lower epoch are [`OverlapKind::Inplace`] (or [`OverlapKind::Same`]
/// when the upper epochs match as well), never capping.
pub fn classify(existing: &EvtRect, candidate: &EvtRect) -> OverlapKind {
    if !existing.is_valid() || !candidate.is_valid() {
        return OverlapKind::Inval;
    }
    if !existing.offsets_overlap(candidate) {
        return OverlapKind::No;
    }

    if existing.offsets_equal(candidate) {
        return if existing.epochs_equal(candidate) {
            OverlapKind::Same
        } else if existing.epc_lo == candidate.epc_lo {
            OverlapKind::Inplace
        } else if candidate.epc_lo > existing.epc_lo {
            OverlapKind::Capping
        } else {
            OverlapKind::Capped
        };
    }

    if candidate.offsets_cover(existing) && candidate.epc_lo > existing.epc_lo {
        return OverlapKind::Capping;
    }
    if existing.offsets_cover(candidate) && existing.epc_lo > candidate.epc_lo {
        return OverlapKind::Capped;
    }
    OverlapKind::Yes
}

/// Classifies a rectangle against the bounding rectangle of an internal node.
pub fn classify_mbr(mbr: &EvtRect, rect: &EvtRect) -> OverlapKind {
    if !mbr.is_valid() || !rect.is_valid() {
        return OverlapKind::Inval;
    }
    if !mbr.offsets_overlap(rect) {
        OverlapKind::No
    } else if mbr.includes(rect) {
        OverlapKind::Included
    } else {
        OverlapKind::Yes
    }
}
