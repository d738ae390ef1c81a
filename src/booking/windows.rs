use crate::model::Span;

/// First window that overlaps `span`, if any. Windows need not be sorted.
pub fn first_intersecting(windows: &[Span], span: &Span) -> Option<Span> {
    windows.iter().copied().find(|w| w.overlaps(span))
}

/// An empty window set never blocks.
pub fn intersects(windows: &[Span], span: &Span) -> bool {
    first_intersecting(windows, span).is_some()
}
