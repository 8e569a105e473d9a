//! Face matching against enrolled students.
//!
//! Encodings and landmarks come from an external recognition library; this
//! module only compares them. Matching is a brute-force nearest-neighbour
//! scan, which is fine for class-sized rosters (a few hundred vectors).

use serde::Deserialize;
use thiserror::Error;

/// Length of the encodings produced by the recognition library.
pub const ENCODING_LEN: usize = 128;

/// Distance below which a detected face is accepted as an enrolled student.
pub const DEFAULT_TOLERANCE: f64 = 0.45;

#[derive(Debug, Error, PartialEq)]
pub enum FaceError {
    #[error("face encoding must have {expected} values, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("face encoding value at index {0} is not a finite number")]
    NonFinite(usize),
    #[error("face encoding is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceEncoding(Vec<f64>);

impl FaceEncoding {
    pub fn new(values: Vec<f64>) -> Result<Self, FaceError> {
        if values.len() != ENCODING_LEN {
            return Err(FaceError::WrongLength {
                expected: ENCODING_LEN,
                got: values.len(),
            });
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(FaceError::NonFinite(idx));
        }
        Ok(Self(values))
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, FaceError> {
        let Some(items) = value.as_array() else {
            return Err(FaceError::Malformed("expected an array of numbers".to_string()));
        };
        let mut values = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            match item.as_f64() {
                Some(v) => values.push(v),
                None => return Err(FaceError::NonFinite(idx)),
            }
        }
        Self::new(values)
    }

    /// Parses the JSON text stored in `students.face_encoding`.
    pub fn parse_stored(text: &str) -> Result<Self, FaceError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| FaceError::Malformed(e.to_string()))?;
        Self::from_json(&value)
    }

    pub fn to_stored(&self) -> String {
        serde_json::Value::from(self.0.clone()).to_string()
    }
}

/// Euclidean distance between two encodings.
pub fn face_distance(a: &FaceEncoding, b: &FaceEncoding) -> f64 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatch<'a> {
    pub student_id: &'a str,
    pub distance: f64,
}

/// Known encodings for one class.
#[derive(Debug, Default)]
pub struct FaceIndex {
    student_ids: Vec<String>,
    encodings: Vec<FaceEncoding>,
}

impl FaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, student_id: impl Into<String>, encoding: FaceEncoding) {
        self.student_ids.push(student_id.into());
        self.encodings.push(encoding);
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }

    /// Closest enrolled face regardless of tolerance. Ties keep the first entry.
    pub fn nearest(&self, unknown: &FaceEncoding) -> Option<FaceMatch<'_>> {
        let mut best: Option<FaceMatch<'_>> = None;
        for (id, known) in self.student_ids.iter().zip(self.encodings.iter()) {
            let distance = face_distance(known, unknown);
            if best.map(|b| distance < b.distance).unwrap_or(true) {
                best = Some(FaceMatch {
                    student_id: id,
                    distance,
                });
            }
        }
        best
    }

    /// Closest enrolled face, accepted only when strictly under `tolerance`.
    pub fn best_match(&self, unknown: &FaceEncoding, tolerance: f64) -> Option<FaceMatch<'_>> {
        self.nearest(unknown).filter(|m| m.distance < tolerance)
    }
}

/// Landmark points for one detected face, `[x, y]` in image pixels.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landmarks {
    #[serde(default, alias = "top_lip")]
    pub top_lip: Vec<[f64; 2]>,
    #[serde(default, alias = "bottom_lip")]
    pub bottom_lip: Vec<[f64; 2]>,
}

// Corners higher than the lip centre by this many pixels count as a smile.
const SMILE_CURVATURE_PX: f64 = 4.0;
const SMILE_WIDTH_RATIO: f64 = 2.5;

/// Liveness heuristic: the subject has to smile at the camera.
pub fn is_smiling(landmarks: &Landmarks) -> bool {
    let top = &landmarks.top_lip;
    let bottom = &landmarks.bottom_lip;
    if top.is_empty() || bottom.is_empty() {
        return false;
    }

    let left = first_extreme(top, |p| p[0], |a, b| a < b);
    let right = first_extreme(top, |p| p[0], |a, b| a > b);
    let mouth_top = first_extreme(top, |p| p[1], |a, b| a < b);
    let mouth_bottom = first_extreme(bottom, |p| p[1], |a, b| a > b);

    let width = right[0] - left[0];
    let height = mouth_bottom[1] - mouth_top[1];

    let lip_center_y = top[top.len() / 2][1];
    let avg_corner_y = (left[1] + right[1]) / 2.0;
    // Image y grows downward, so raised corners give a positive curvature.
    let curvature = lip_center_y - avg_corner_y;
    if curvature > SMILE_CURVATURE_PX {
        return true;
    }

    let denom = height + 1.0;
    if denom == 0.0 {
        return false;
    }
    width / denom > SMILE_WIDTH_RATIO
}

fn first_extreme(
    points: &[[f64; 2]],
    key: impl Fn(&[f64; 2]) -> f64,
    better: impl Fn(f64, f64) -> bool,
) -> [f64; 2] {
    let mut best = points[0];
    for p in &points[1..] {
        if better(key(p), key(&best)) {
            best = *p;
        }
    }
    best
}
