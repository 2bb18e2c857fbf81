/// Change descriptors produced by effect expressions, and their application.
use serde::{Deserialize, Serialize};

use crate::core::scope::Scope;
use crate::schema::quality::{QualityState, QualityStates, QualityValue, Value};

/// Mutation operator of an effect expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
    /// `+=`
    Add,
    /// `-=`
    Subtract,
    /// `=`
    Set,
    /// `++`
    Increment,
    /// `--`
    Decrement,
}

impl ChangeOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+=",
            Self::Subtract => "-=",
            Self::Set => "=",
            Self::Increment => "++",
            Self::Decrement => "--",
        }
    }
}

/// One computed change to one quality. `after` is what the effect step
/// should store; the engine never writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    /// `Local` or `World`; self references are resolved to `Local`.
    pub scope: Scope,
    pub quality_id: String,
    pub op: ChangeOp,
    pub amount: Value,
    pub before: QualityValue,
    pub after: QualityValue,
    pub description: Option<String>,
    pub source: Option<String>,
}

/// The changes produced by one effect block, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub changes: Vec<ChangeDescriptor>,
}

impl Effect {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingKind {
    /// `%schedule`: fire once after the duration.
    Schedule,
    /// `%reset`: replace any pending timer for the same qualities.
    Reset,
}

/// A timed effect for the external scheduler to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub kind: PendingKind,
    pub effect: Effect,
    pub duration_ms: u64,
}

/// Unit suffix of a duration such as `30m`, `2h` or `1d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationUnit {
    Minutes,
    Hours,
    Days,
}

impl DurationUnit {
    pub fn from_suffix(c: char) -> Option<Self> {
        match c {
            'm' => Some(Self::Minutes),
            'h' => Some(Self::Hours),
            'd' => Some(Self::Days),
            _ => None,
        }
    }

    pub fn millis(&self) -> u64 {
        match self {
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        }
    }

    /// Milliseconds in `amount` units. Negative amounts clamp to zero.
    pub fn to_millis(&self, amount: f64) -> u64 {
        if amount.is_nan() || amount <= 0.0 {
            return 0;
        }
        (amount * self.millis() as f64).round() as u64
    }
}

/// Compute the value a quality holds after `op amount`.
///
/// Pyramidal gains are change points (level `n` costs `n + 1`); losses drop
/// whole levels and clear progress. Items and equipables never go below
/// zero. Text qualities support `=` and `+=` (append).
pub fn next_value(before: &QualityValue, op: ChangeOp, amount: &Value) -> QualityValue {
    if let QualityValue::String { value } = before {
        let text = amount.to_string();
        let value = match op {
            ChangeOp::Set => text,
            ChangeOp::Add => format!("{}{}", value, text),
            _ => value.clone(),
        };
        return QualityValue::String { value };
    }

    let n = amount.as_number().unwrap_or(0.0).round() as i64;
    let delta = match op {
        ChangeOp::Set => return set_level(before, n),
        ChangeOp::Add => n,
        ChangeOp::Subtract => n.saturating_neg(),
        ChangeOp::Increment => 1,
        ChangeOp::Decrement => -1,
    };

    match before {
        QualityValue::Pyramidal {
            level,
            change_points,
        } => {
            if delta >= 0 {
                let (level, change_points) = gain_change_points(*level, *change_points, delta);
                QualityValue::Pyramidal {
                    level,
                    change_points,
                }
            } else {
                QualityValue::Pyramidal {
                    level: level.saturating_add(delta).max(0),
                    change_points: 0,
                }
            }
        }
        QualityValue::Counter { level } => QualityValue::Counter {
            level: level.saturating_add(delta),
        },
        QualityValue::Item { level } => QualityValue::Item {
            level: level.saturating_add(delta).max(0),
        },
        QualityValue::Equipable { level, bonus } => QualityValue::Equipable {
            level: level.saturating_add(delta).max(0),
            bonus: bonus.clone(),
        },
        QualityValue::String { .. } => before.clone(),
    }
}

fn set_level(before: &QualityValue, level: i64) -> QualityValue {
    match before {
        QualityValue::Pyramidal { .. } => QualityValue::Pyramidal {
            level: level.max(0),
            change_points: 0,
        },
        QualityValue::Counter { .. } => QualityValue::Counter { level },
        QualityValue::Item { .. } => QualityValue::Item {
            level: level.max(0),
        },
        QualityValue::Equipable { bonus, .. } => QualityValue::Equipable {
            level: level.max(0),
            bonus: bonus.clone(),
        },
        QualityValue::String { .. } => QualityValue::String {
            value: level.to_string(),
        },
    }
}

/// Spend change points on whole levels. Advancing `k` levels from `level`
/// costs `k * level + k * (k + 1) / 2`.
fn gain_change_points(level: i64, change_points: i64, gained: i64) -> (i64, i64) {
    let level = i128::from(level.max(0));
    let points = i128::from(change_points.max(0)) + i128::from(gained);
    let cost = |k: i128| k * level + k * (k + 1) / 2;

    // Positive root of k^2 / 2 + (level + 1/2) k = points, in the form that
    // stays accurate when level is large.
    let b = level as f64 + 0.5;
    let estimate = 2.0 * points as f64 / (b + (b * b + 2.0 * points as f64).sqrt());
    let mut k = estimate.floor().max(0.0) as i128;
    while k > 0 && cost(k) > points {
        k -= 1;
    }
    while cost(k + 1) <= points {
        k += 1;
    }

    (saturate(level + k), saturate(points - cost(k)))
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// Write every change of `effect` into the matching state map.
pub fn apply_changes(local: &mut QualityStates, world: &mut QualityStates, effect: &Effect) {
    for change in &effect.changes {
        let states = match change.scope {
            Scope::World => &mut *world,
            Scope::Local | Scope::SelfRef => &mut *local,
        };
        match states.get_mut(&change.quality_id) {
            Some(state) => {
                state.value = change.after.clone();
                if let Some(source) = &change.source {
                    state.sources.push(source.clone());
                }
            }
            None => {
                let mut state = QualityState::new(&change.quality_id, change.after.clone());
                state.sources.extend(change.source.clone());
                states.insert(state);
            }
        }
    }
}
