//! Verdict classification for comparison results

use crate::types::{DiffResult, Verdict, VerdictDetail};

/// Map a comparison result onto a verdict.
///
/// Any non-zero mismatch fails and carries the whole result as detail; a
/// zero mismatch passes with no detail.
pub fn classify(result: &DiffResult) -> (Verdict, Option<VerdictDetail>) {
    if result.mismatch_percentage > 0.0 {
        (Verdict::Failed, Some(VerdictDetail::Mismatch(result.clone())))
    } else {
        (Verdict::Passed, None)
    }
}

/// Render the mismatch block shown under a failed breakpoint
pub fn format_mismatch(result: &DiffResult) -> String {
    let b = &result.diff_bounds;
    let d = &result.dimension_difference;
    format!(
        "diffBounds: {{\n  top: {},\n  left: {},\n  bottom: {},\n  right: {}\n}},\n\
         dimensionDifference: {{\n  width: {},\n  height: {}\n}},\n\
         isSameDimensions: {},\n\
         misMatchPercentage: {}",
        b.top,
        b.left,
        b.bottom,
        b.right,
        d.width,
        d.height,
        result.is_same_dimensions,
        result.mismatch_percentage
    )
}
