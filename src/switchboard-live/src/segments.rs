//! Layout of a run's text into tool-call delimited segments.

/// Split of a run's text for display.
///
/// Segment `i` is complete once segment `i + 1` exists, so every segment but
/// the last renders statically and only the last one is animated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentLayout {
    pub finalized: Vec<String>,
    pub active: Option<String>,
}

impl SegmentLayout {
    /// Lay out `committed` using `segments` when there is more than one.
    ///
    /// With zero or one segment the whole committed text is the active
    /// segment.
    pub fn from_run(committed: Option<&str>, segments: Option<&[String]>) -> Self {
        match segments {
            Some([finalized @ .., last]) if !finalized.is_empty() => Self {
                finalized: finalized.to_vec(),
                active: Some(last.clone()),
            },
            _ => Self {
                finalized: Vec::new(),
                active: committed.map(str::to_string),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && self.active.is_none()
    }

    /// Number of segments, counting the active one.
    pub fn len(&self) -> usize {
        self.finalized.len() + usize::from(self.active.is_some())
    }

    /// Index the active segment occupies.
    pub fn active_index(&self) -> usize {
        self.finalized.len()
    }
}
