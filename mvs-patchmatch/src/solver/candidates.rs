use crate::{Error, FieldView, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Where propagation looks for hypotheses to adopt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    /// Twenty fixed offsets in a diamond around the pixel.
    Full,
    /// Eight fixed offsets along the axes.
    Fast,
    /// The best stored hypothesis of each of eight regions around the pixel.
    Asymmetric,
}

impl CandidateKind {
    pub fn name(self) -> &'static str {
        match self {
            CandidateKind::Full => "full",
            CandidateKind::Fast => "fast",
            CandidateKind::Asymmetric => "asymmetric",
        }
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CandidateKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            CandidateKind::Full,
            CandidateKind::Fast,
            CandidateKind::Asymmetric,
        ]
        .into_iter()
        .find(|kind| kind.name() == s)
        .ok_or_else(|| Error::UnknownPolicy(s.to_owned()))
    }
}

/// Offsets `(row, col)` of the full pattern.
#[rustfmt::skip]
pub const FULL_OFFSETS: [(isize, isize); 20] = [
    (-1, 0), (1, 0), (0, -1), (0, 1),
    (-3, 0), (3, 0), (0, -3), (0, 3),
    (-5, 0), (5, 0), (0, -5), (0, 5),
    (-1, -2), (-1, 2), (1, -2), (1, 2),
    (-2, -1), (-2, 1), (2, -1), (2, 1),
];

/// Offsets `(row, col)` of the fast pattern.
#[rustfmt::skip]
pub const FAST_OFFSETS: [(isize, isize); 8] = [
    (-1, 0), (1, 0), (0, -1), (0, 1),
    (-5, 0), (5, 0), (0, -5), (0, 5),
];

/// Length of the arms of the asymmetric pattern.
const ARM_LENGTH: isize = 21;

/// The regions propagation draws its candidates from, one candidate per region.
///
/// Every offset has an odd `|row| + |col|`, so a candidate always has the other
/// checkerboard color than the pixel it is proposed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePolicy {
    kind: CandidateKind,
    regions: Vec<Vec<(isize, isize)>>,
}

impl CandidatePolicy {
    pub fn new(kind: CandidateKind) -> Self {
        let regions = match kind {
            CandidateKind::Full => FULL_OFFSETS.iter().map(|&o| vec![o]).collect(),
            CandidateKind::Fast => FAST_OFFSETS.iter().map(|&o| vec![o]).collect(),
            CandidateKind::Asymmetric => asymmetric_regions(),
        };
        Self { kind, regions }
    }

    pub fn kind(&self) -> CandidateKind {
        self.kind
    }

    /// Number of candidates tried per pixel.
    pub fn slots(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> &[Vec<(isize, isize)>] {
        &self.regions
    }

    /// The pixel whose hypothesis is the `slot`-th candidate for `(row, col)`.
    ///
    /// Within a region, the pixel with the lowest stored cost wins, the first one on ties.
    /// Returns `None` when the whole region lies outside the field.
    pub fn candidate<V: FieldView + ?Sized>(
        &self,
        slot: usize,
        view: &V,
        row: usize,
        col: usize,
    ) -> Option<(usize, usize)> {
        let (height, width) = (view.height() as isize, view.width() as isize);
        let mut best: Option<((usize, usize), f64)> = None;
        for &(dr, dc) in &self.regions[slot] {
            let (r, c) = (row as isize + dr, col as isize + dc);
            if r < 0 || c < 0 || r >= height || c >= width {
                continue;
            }
            let (r, c) = (r as usize, c as usize);
            let cost = view.cost(r, c);
            match best {
                Some((_, best_cost)) if !(cost < best_cost) => {}
                _ => best = Some(((r, c), cost)),
            }
        }
        best.map(|(pixel, _)| pixel)
    }
}

/// Four V-shaped regions, one per quadrant, and four arms along the axes.
fn asymmetric_regions() -> Vec<Vec<(isize, isize)>> {
    let quadrant = |sr: isize, sc: isize| {
        let mut region = vec![];
        for a in 1..=4isize {
            for b in 1..=4isize {
                if (a + b) % 2 == 1 {
                    region.push((sr * a, sc * b));
                }
            }
        }
        region
    };
    let arm = |sr: isize, sc: isize| {
        (1..=ARM_LENGTH)
            .step_by(2)
            .map(|d| (sr * d, sc * d))
            .collect::<Vec<_>>()
    };
    vec![
        arm(-1, 0),
        arm(1, 0),
        arm(0, -1),
        arm(0, 1),
        quadrant(-1, -1),
        quadrant(-1, 1),
        quadrant(1, -1),
        quadrant(1, 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DepthField, FieldCell};
    use mvs_camera::Plane;

    fn field_with_costs(
        width: usize,
        height: usize,
        cost: impl Fn(usize, usize) -> f64,
    ) -> DepthField {
        DepthField::from_fn(width, height, |row, col| FieldCell {
            cost: cost(row, col),
            depth: 1.0,
            plane: Plane::fronto_parallel(1.0),
        })
    }

    #[test]
    fn offsets_change_color() {
        for kind in [CandidateKind::Full, CandidateKind::Fast, CandidateKind::Asymmetric] {
            let policy = CandidatePolicy::new(kind);
            for region in policy.regions() {
                assert!(region.iter().all(|&(dr, dc)| (dr.abs() + dc.abs()) % 2 == 1));
            }
        }
        assert_eq!(CandidatePolicy::new(CandidateKind::Full).slots(), 20);
        assert_eq!(CandidatePolicy::new(CandidateKind::Fast).slots(), 8);
        let asymmetric = CandidatePolicy::new(CandidateKind::Asymmetric);
        assert_eq!(asymmetric.slots(), 8);
        assert!(asymmetric.regions()[4..].iter().all(|region| region.len() == 8));
        assert!(asymmetric.regions()[..4].iter().all(|region| region.len() == 11));
    }

    #[test]
    fn out_of_bounds_candidates() {
        let field = field_with_costs(10, 10, |_, _| 1.0);
        let policy = CandidatePolicy::new(CandidateKind::Full);
        // The first slot looks one row up.
        assert_eq!(policy.candidate(0, &field, 0, 4), None);
        assert_eq!(policy.candidate(0, &field, 3, 4), Some((2, 4)));
    }

    #[test]
    fn asymmetric_picks_lowest_cost() {
        let field = field_with_costs(30, 30, |row, col| {
            if (row, col) == (15, 22) {
                0.1
            } else {
                1.0
            }
        });
        let policy = CandidatePolicy::new(CandidateKind::Asymmetric);
        // Right arm of (15, 10) reaches (15, 11), (15, 13), ... (15, 29).
        assert_eq!(policy.candidate(3, &field, 15, 10), Some((15, 11)));
        // From (15, 11) the arm passes through the cheap pixel.
        assert_eq!(policy.candidate(3, &field, 15, 11), Some((15, 22)));
    }
}
