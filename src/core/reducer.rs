//! Dominant-expression reduction.
//!
//! Turns a per-expression score vector into a single `(label, score)` pair.
//! Pure: no state, no side effects.

use crate::core::emotion::{ExpressionVector, Label};
use crate::detection::FaceDetection;

/// Return the dominant label and its score.
///
/// The score is the maximum value in the vector. When several labels share the
/// maximum, the one earliest in canonical [`Label`] order wins. Returns `None`
/// (the "Unknown" outcome) for an empty vector or one holding only `Unknown`.
pub fn reduce(vector: &ExpressionVector) -> Option<(Label, f64)> {
    let mut best: Option<(Label, f64)> = None;

    for (label, score) in vector.iter() {
        if !label.is_known() {
            continue;
        }
        // Strictly greater keeps the earliest label on ties.
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((label, score)),
        }
    }

    best
}

/// Reduce the primary face of a detection result.
///
/// The primary face is the one with the largest bounding box, the earliest
/// reported on equal areas. Zero faces yields `None`.
pub fn reduce_faces(faces: &[FaceDetection]) -> Option<(Label, f64)> {
    primary_face(faces).and_then(|face| reduce(&face.expressions))
}

fn primary_face(faces: &[FaceDetection]) -> Option<&FaceDetection> {
    let mut primary: Option<&FaceDetection> = None;
    for face in faces {
        match primary {
            Some(p) if face.region.area() <= p.region.area() => {}
            _ => primary = Some(face),
        }
    }
    primary
}
