/// Skill-check probability model.
///
/// A challenge compares a skill value against a target. `margin` is the
/// half-width of the transition zone around the target and `pivot` is the
/// success percentage exactly at the target.
use serde::{Deserialize, Serialize};

/// Direction of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeOp {
    /// `>>` / `>=`: succeed if high.
    High,
    /// `<<` / `<=`: succeed if low.
    Low,
    /// `><` / `==`: succeed near the target.
    Near,
    /// `<>` / `!=`: succeed away from the target.
    Far,
}

impl ChallengeOp {
    /// Map an operator symbol to a challenge direction. Plain comparison
    /// symbols are accepted; `>` and `<` map like `>=` and `<=`.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            ">>" | ">=" | ">" => Some(Self::High),
            "<<" | "<=" | "<" => Some(Self::Low),
            "><" | "==" => Some(Self::Near),
            "<>" | "!=" => Some(Self::Far),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::High => ">>",
            Self::Low => "<<",
            Self::Near => "><",
            Self::Far => "<>",
        }
    }
}

/// Curve parameters. Caps and pivot are percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChanceParams {
    pub margin: f64,
    pub min_cap: f64,
    pub max_cap: f64,
    pub pivot: f64,
}

impl ChanceParams {
    /// Default caps (0..100) and pivot (60) with the given margin.
    pub fn with_margin(margin: f64) -> Self {
        Self {
            margin,
            min_cap: 0.0,
            max_cap: 100.0,
            pivot: 60.0,
        }
    }
}

/// Success percentage in `[min_cap, max_cap]`.
///
/// Deterministic; the pass/fail roll happens elsewhere. A margin `<= 0`
/// degrades to a step function at the target.
pub fn chance(skill: f64, target: f64, op: ChallengeOp, params: &ChanceParams) -> f64 {
    let fraction = success_fraction(skill, target, op, params.margin, params.pivot);
    let (lo, hi) = if params.min_cap <= params.max_cap {
        (params.min_cap, params.max_cap)
    } else {
        (params.max_cap, params.min_cap)
    };
    if fraction.is_nan() {
        return lo;
    }
    (fraction * 100.0).clamp(lo, hi)
}

/// Unclamped success fraction in `[0, 1]`.
pub fn success_fraction(skill: f64, target: f64, op: ChallengeOp, margin: f64, pivot: f64) -> f64 {
    let pivot = (pivot / 100.0).clamp(0.0, 1.0);
    match op {
        ChallengeOp::High => rising(skill, target, margin, pivot),
        ChallengeOp::Low => 1.0 - rising(skill, target, margin, pivot),
        ChallengeOp::Near => near(skill, target, margin),
        ChallengeOp::Far => 1.0 - near(skill, target, margin),
    }
}

/// Sample the curve from `from` to `to` inclusive in steps of `step`.
pub fn curve(
    target: f64,
    op: ChallengeOp,
    params: &ChanceParams,
    from: f64,
    to: f64,
    step: f64,
) -> Vec<(f64, f64)> {
    let mut points = Vec::new();
    if step <= 0.0 || from > to {
        return points;
    }
    let mut skill = from;
    while skill <= to + f64::EPSILON {
        points.push((skill, chance(skill, target, op, params)));
        skill += step;
    }
    points
}

fn rising(skill: f64, target: f64, margin: f64, pivot: f64) -> f64 {
    if margin <= 0.0 {
        return if skill >= target { 1.0 } else { 0.0 };
    }
    let lower = target - margin;
    let upper = target + margin;
    if skill <= lower {
        0.0
    } else if skill >= upper {
        1.0
    } else if skill < target {
        let span = target - lower;
        if span <= 0.0 {
            0.5
        } else {
            (skill - lower) / span * pivot
        }
    } else {
        let span = upper - target;
        if span <= 0.0 {
            0.5
        } else {
            pivot + (skill - target) / span * (1.0 - pivot)
        }
    }
}

fn near(skill: f64, target: f64, margin: f64) -> f64 {
    let distance = (skill - target).abs();
    if margin <= 0.0 {
        return if distance == 0.0 { 1.0 } else { 0.0 };
    }
    if distance >= margin {
        0.0
    } else {
        1.0 - distance / margin
    }
}
