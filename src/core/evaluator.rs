/// Evaluation of block contents against an [`EvaluationContext`].
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::core::chance::{self, ChanceParams};
use crate::core::config::MarginPolicy;
use crate::core::context::{DiagnosticKind, EvaluationContext, Frame, SelfBinding};
use crate::core::effect::{next_value, ChangeDescriptor, Effect};
use crate::core::expr::{
    looks_like_script, parse_leaf, ArithOp, Block, Challenge, CompareOp, EffectExpr,
    EffectTarget, Expr,
};
use crate::core::scanner::Template;
use crate::core::scope::{resolve, Resolution, Scope, ScopedRef};
use crate::schema::quality::{QualityType, QualityValue, Value};

/// Whether a block is being substituted into text or evaluated on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Assignments display as nothing.
    Text,
    /// Assignments yield the bound value.
    Standalone,
}

/// A block's value. `settled` marks values whose templates were already
/// expanded, so the scanner must not re-scan them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outcome {
    pub value: Value,
    pub settled: bool,
}

impl Outcome {
    fn settled(value: Value) -> Self {
        Self {
            value,
            settled: true,
        }
    }
}

impl EvaluationContext<'_> {
    /// Evaluate the contents of one block (braces already stripped).
    pub(crate) fn evaluate_content(&mut self, content: &str, frame: &Frame, mode: Mode) -> Outcome {
        match Block::classify(content) {
            Block::Empty => Outcome::settled(Value::empty()),
            Block::Assign { alias, expr } => {
                let outcome = self.evaluate_content(&expr, frame, Mode::Standalone);
                self.bind_alias(&alias, outcome.value.clone());
                match mode {
                    Mode::Text => Outcome::settled(Value::empty()),
                    Mode::Standalone => outcome,
                }
            }
            Block::Conditional(branches) => {
                for branch in &branches {
                    let matched = match &branch.condition {
                        Some(condition) => self.evaluate_leaf(condition, frame).value.is_truthy(),
                        None => true,
                    };
                    if matched {
                        return self.evaluate_leaf(&branch.result, frame);
                    }
                }
                Outcome::settled(Value::empty())
            }
            Block::Choice(options) => match options.choose(&mut *self.rng).cloned() {
                Some(option) => self.evaluate_leaf(&option, frame),
                None => Outcome::settled(Value::empty()),
            },
            Block::Leaf(source) => self.evaluate_leaf(&source, frame),
        }
    }

    /// Evaluate a single expression. Text that does not parse is returned
    /// as a literal.
    pub(crate) fn evaluate_leaf(&mut self, source: &str, frame: &Frame) -> Outcome {
        let source = source.trim();

        if source.starts_with('{') {
            if let Some(inner) = Template::parse(source).ok().and_then(|t| {
                t.single_block().map(str::to_string)
            }) {
                return match self.descend(frame, source) {
                    Some(deeper) => self.evaluate_content(&inner, &deeper, Mode::Standalone),
                    None => Outcome::settled(Value::String(source.to_string())),
                };
            }
        }

        let expanded = if source.contains('{') {
            match self.descend(frame, source) {
                Some(deeper) => self.expand_inner(source, &deeper),
                None => source.to_string(),
            }
        } else {
            source.to_string()
        };

        match parse_leaf(&expanded) {
            Ok(expr) if expr.reads_as_prose() => Outcome::settled(Value::String(expanded)),
            Ok(expr) => {
                let settled = matches!(expr, Expr::Ref(_) | Expr::Literal(_));
                let value = self.eval(&expr, frame);
                Outcome { value, settled }
            }
            Err(err) => {
                if looks_like_script(&expanded) {
                    self.record(DiagnosticKind::ParseDegrade, err.to_string(), &expanded);
                }
                Outcome::settled(Value::String(expanded))
            }
        }
    }

    pub(crate) fn eval(&mut self, expr: &Expr, frame: &Frame) -> Value {
        match expr {
            Expr::Literal(Value::String(text)) if has_blocks(text) => {
                match self.descend(frame, text) {
                    Some(deeper) => Value::String(self.expand_text(text, &deeper)),
                    None => Value::String(text.clone()),
                }
            }
            Expr::Literal(value) => value.clone(),
            Expr::Ref(reference) => self.eval_ref(reference, frame),
            Expr::Alias(name) => match self.alias(name) {
                Some(value) => value.clone(),
                None => {
                    self.record(
                        DiagnosticKind::UnresolvedReference,
                        format!("alias @{} is not bound", name),
                        name,
                    );
                    Value::empty()
                }
            },
            Expr::Word(word) => match (word.as_str(), frame.target) {
                ("target", Some(target)) => Value::number(target),
                _ => Value::String(word.clone()),
            },
            Expr::Macro(call) => self.eval_macro(call, frame),
            Expr::Neg(inner) => Value::number(-self.number(inner, frame)),
            Expr::Not(inner) => Value::Bool(!self.eval(inner, frame).is_truthy()),
            Expr::Arith { op, lhs, rhs } => {
                let lhs = self.eval(lhs, frame);
                let rhs = self.eval(rhs, frame);
                self.arith(*op, &lhs, &rhs)
            }
            Expr::Compare { op, lhs, rhs } => {
                let lhs = self.eval(lhs, frame);
                let rhs = self.eval(rhs, frame);
                Value::Bool(compare(*op, &lhs, &rhs))
            }
            Expr::And(items) => {
                for item in items {
                    if !self.eval(item, frame).is_truthy() {
                        return Value::Bool(false);
                    }
                }
                Value::Bool(true)
            }
            Expr::Or(items) => {
                for item in items {
                    if self.eval(item, frame).is_truthy() {
                        return Value::Bool(true);
                    }
                }
                Value::Bool(false)
            }
            Expr::Challenge(challenge) => {
                let percent = self.challenge_percent(challenge, frame);
                if challenge.roll {
                    let draw: f64 = self.rng.gen_range(0.0..100.0);
                    Value::Bool(draw < percent)
                } else {
                    Value::Int(percent.round() as i64)
                }
            }
            Expr::Effect(effects) => Value::Effect(self.eval_effects(effects, frame)),
            Expr::Range { lo, hi } => {
                let lo = self.number(lo, frame).round() as i64;
                let hi = self.number(hi, frame).round() as i64;
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                Value::Int(self.rng.gen_range(lo..=hi))
            }
        }
    }

    /// Numeric view of an expression; non-numbers count as zero.
    pub(crate) fn number(&mut self, expr: &Expr, frame: &Frame) -> f64 {
        self.eval(expr, frame).as_number().unwrap_or(0.0)
    }

    fn eval_ref(&mut self, reference: &ScopedRef, frame: &Frame) -> Value {
        let resolved = resolve(
            reference,
            self.local,
            self.world,
            self.registry,
            frame.self_binding.as_ref(),
        );
        if resolved.unresolved {
            let snippet = reference.to_string();
            self.record(
                DiagnosticKind::UnresolvedReference,
                format!("no state or definition for {}", snippet),
                &snippet,
            );
        }
        match resolved.resolution {
            Resolution::Plain(value) => value,
            Resolution::Text { text, owner } => {
                if !text.contains('{') {
                    return Value::String(text);
                }
                match self.descend(frame, &text) {
                    Some(deeper) => Value::String(self.expand_text(&text, &deeper.rebind(owner))),
                    None => Value::String(text),
                }
            }
        }
    }

    fn arith(&mut self, op: ArithOp, lhs: &Value, rhs: &Value) -> Value {
        let (a, b) = match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => (a, b),
            _ if op == ArithOp::Add => return Value::String(format!("{}{}", lhs, rhs)),
            (a, b) => (a.unwrap_or(0.0), b.unwrap_or(0.0)),
        };
        match op {
            ArithOp::Add => Value::number(a + b),
            ArithOp::Sub => Value::number(a - b),
            ArithOp::Mul => Value::number(a * b),
            ArithOp::Div if b == 0.0 => {
                self.record(
                    DiagnosticKind::DivisionDegenerate,
                    "division by zero yields 0".to_string(),
                    &format!("{} / {}", lhs, rhs),
                );
                Value::Int(0)
            }
            ArithOp::Div => Value::number(a / b),
        }
    }

    /// Success percentage of a challenge, with author parameters falling
    /// back to the configured defaults.
    pub(crate) fn challenge_percent(&mut self, challenge: &Challenge, frame: &Frame) -> f64 {
        let skill = self.number(&challenge.subject, frame);
        let target = self.number(&challenge.target, frame);
        let target_frame = frame.with_target(target);
        let config = self.config;

        let margin = match &challenge.margin {
            Some(expr) => self.number(expr, &target_frame),
            None => self.default_margin(target, &target_frame),
        };
        let min_cap = match &challenge.min_cap {
            Some(expr) => self.number(expr, &target_frame),
            None => config.default_min_cap,
        };
        let max_cap = match &challenge.max_cap {
            Some(expr) => self.number(expr, &target_frame),
            None => config.default_max_cap,
        };
        let pivot = match &challenge.pivot {
            Some(expr) => self.number(expr, &target_frame),
            None => config.default_pivot,
        };

        if margin <= 0.0 {
            self.record(
                DiagnosticKind::DivisionDegenerate,
                format!("margin {} degrades to a step at the target", margin),
                &format!("{} {}", challenge.op.symbol(), target),
            );
        }

        let params = ChanceParams {
            margin,
            min_cap,
            max_cap,
            pivot,
        };
        chance::chance(skill, target, challenge.op, &params)
    }

    fn default_margin(&mut self, target: f64, frame: &Frame) -> f64 {
        let config = self.config;
        match &config.default_margin {
            MarginPolicy::Fixed(margin) => *margin,
            MarginPolicy::TargetMultiple(factor) => factor * target,
            MarginPolicy::Expression(source) => match parse_leaf(source) {
                Ok(expr) => self.number(&expr, frame),
                Err(err) => {
                    self.record(DiagnosticKind::ParseDegrade, err.to_string(), source);
                    MarginPolicy::DEFAULT_FACTOR * target
                }
            },
        }
    }

    /// Compute change descriptors without touching state. Later changes in
    /// the same block see the results of earlier ones.
    pub(crate) fn eval_effects(&mut self, effects: &[EffectExpr], frame: &Frame) -> Effect {
        let mut pending: FxHashMap<(Scope, String), QualityValue> = FxHashMap::default();
        let mut changes = Vec::new();

        for effect in effects {
            let amount = match &effect.amount {
                Some(expr) => self.eval(expr, frame),
                None => Value::Int(1),
            };
            let description = effect
                .meta
                .description
                .as_deref()
                .map(|d| self.expand_text(d, frame));

            for (scope, id, explicit) in self.effect_targets(&effect.target, frame) {
                let key = (scope, id.clone());
                let before = match pending.get(&key) {
                    Some(value) => value.clone(),
                    None => explicit.unwrap_or_else(|| self.current_value(scope, &id, &amount)),
                };
                let after = next_value(&before, effect.op, &amount);
                pending.insert(key, after.clone());
                changes.push(ChangeDescriptor {
                    scope,
                    quality_id: id,
                    op: effect.op,
                    amount: amount.clone(),
                    before,
                    after,
                    description: description.clone(),
                    source: effect.meta.source.clone(),
                });
            }
        }

        Effect { changes }
    }

    /// The qualities an effect writes to. Self references write to the
    /// local map and carry the bound state when there is one.
    fn effect_targets(
        &mut self,
        target: &EffectTarget,
        frame: &Frame,
    ) -> Vec<(Scope, String, Option<QualityValue>)> {
        match target {
            EffectTarget::Quality(reference) => match reference.scope {
                Scope::SelfRef => match &frame.self_binding {
                    Some(SelfBinding { id, state }) => vec![(
                        Scope::Local,
                        id.clone(),
                        state.as_ref().map(|s| s.value.clone()),
                    )],
                    None => {
                        self.record(
                            DiagnosticKind::UnresolvedReference,
                            "effect on $. with no quality bound".to_string(),
                            "$.",
                        );
                        Vec::new()
                    }
                },
                scope => vec![(scope, reference.id.clone(), None)],
            },
            EffectTarget::Category(category) => {
                let registry = self.registry;
                let members = registry.qualities_in_category(category);
                if members.is_empty() {
                    self.record(
                        DiagnosticKind::EmptySelection,
                        format!("no qualities in category {}", category),
                        category,
                    );
                }
                members
                    .into_iter()
                    .map(|d| (Scope::Local, d.id.clone(), None))
                    .collect()
            }
        }
    }

    /// Current value of a quality, or the zero value of its type. Without a
    /// state or a definition the type is inferred from the amount.
    fn current_value(&self, scope: Scope, id: &str, amount: &Value) -> QualityValue {
        let states = match scope {
            Scope::World => self.world,
            Scope::Local | Scope::SelfRef => self.local,
        };
        if let Some(state) = states.get(id) {
            return state.value.clone();
        }
        let kind = match self.registry.quality(id) {
            Some(definition) => definition.kind,
            None => match amount {
                Value::String(_) if amount.as_number().is_none() => QualityType::String,
                _ => QualityType::Counter,
            },
        };
        QualityValue::empty(kind)
    }
}

/// Numeric comparison when both sides are numbers, text comparison
/// otherwise.
fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> bool {
    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => match op {
            CompareOp::Gt => a > b,
            CompareOp::Lt => a < b,
            CompareOp::Ge => a >= b,
            CompareOp::Le => a <= b,
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
        },
        _ => {
            let (a, b) = (lhs.to_string(), rhs.to_string());
            match op {
                CompareOp::Gt => a > b,
                CompareOp::Lt => a < b,
                CompareOp::Ge => a >= b,
                CompareOp::Le => a <= b,
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
            }
        }
    }
}

fn has_blocks(text: &str) -> bool {
    text.contains('{')
        && Template::parse(text).is_ok_and(|template| template.blocks().next().is_some())
}
