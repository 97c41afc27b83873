use serde::Serialize;

use crate::model::Encoding;

/// Inclusive range where a zero on either side leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub min: i64,
    pub max: i64,
}

impl Bounds {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.min == 0 || value >= self.min) && (self.max == 0 || value <= self.max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionCriteria {
    /// Acceptable media types; empty accepts any.
    pub formats: Vec<String>,
    pub need_mobile: bool,
    pub bitrate: Bounds,
    pub width: Bounds,
    pub height: Bounds,
}

impl SelectionCriteria {
    pub fn accepts(&self, candidate: &Encoding) -> bool {
        if !self.formats.is_empty() && !self.formats.iter().any(|f| *f == candidate.media_type) {
            return false;
        }
        if self.need_mobile && !candidate.is_mobile {
            return false;
        }
        self.bitrate.contains(candidate.bitrate)
            && self.width.contains(candidate.width)
            && self.height.contains(candidate.height)
    }
}

/// Candidates arrive best-first, so the first acceptable one is the answer.
pub fn select_first<'a>(
    candidates: &'a [Encoding],
    criteria: &SelectionCriteria,
) -> Option<&'a Encoding> {
    candidates
        .iter()
        .find(|candidate| criteria.accepts(candidate))
}
