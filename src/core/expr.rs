/// Block grammar - classifies block contents and parses leaf expressions
/// into typed instructions.
///
/// Top-level structure (aliases, `cond : result | ...` chains, `A | B`
/// choices) is found on raw text so nested blocks stay opaque. Everything
/// else is a *leaf*: tokenized and parsed into an [`Expr`], with `%macro[...]`
/// calls parsed into [`Macro`] values at tokenization time.
use thiserror::Error;

use crate::core::chance::ChallengeOp;
use crate::core::effect::{ChangeOp, DurationUnit, PendingKind};
use crate::core::scanner::{is_quote, opens_quote, previous_significant, quote_end};
use crate::core::scope::{is_ident_char, scan_ref, ScopedRef};
use crate::schema::quality::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated {0}")]
    Unterminated(&'static str),
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown macro %{0}")]
    UnknownMacro(String),
    #[error("invalid arguments for %{0}")]
    MacroArgs(String),
    #[error("invalid duration '{0}'")]
    Duration(String),
    #[error("too many challenge parameters")]
    ChallengeParams,
}

/// One `condition : result` segment of a conditional chain. A segment
/// without a condition always matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub condition: Option<String>,
    pub result: String,
}

/// The top-level shape of a block's contents, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Empty,
    /// `@name = expr`
    Assign { alias: String, expr: String },
    /// `c1 : r1 | c2 : r2 | default`
    Conditional(Vec<Branch>),
    /// `A | B | C`
    Choice(Vec<String>),
    /// Anything else: one expression.
    Leaf(String),
}

impl Block {
    pub fn classify(content: &str) -> Block {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Block::Empty;
        }

        if let Some((alias, expr)) = split_assignment(trimmed) {
            return Block::Assign {
                alias: alias.to_string(),
                expr: expr.trim().to_string(),
            };
        }

        let segments = split_top_level(trimmed, '|');
        let has_condition = segments
            .iter()
            .any(|s| !top_level_positions(s, ':').is_empty());

        if has_condition {
            let branches = segments
                .iter()
                .map(|segment| match top_level_positions(segment, ':').first() {
                    Some(&colon) => Branch {
                        condition: Some(segment[..colon].trim().to_string()),
                        result: segment[colon + 1..].trim().to_string(),
                    },
                    None => Branch {
                        condition: None,
                        result: segment.trim().to_string(),
                    },
                })
                .collect();
            return Block::Conditional(branches);
        }

        if segments.len() > 1 {
            return Block::Choice(segments.iter().map(|s| s.trim().to_string()).collect());
        }

        Block::Leaf(trimmed.to_string())
    }
}

/// `@name = rest` (but not `@name == rest`).
fn split_assignment(input: &str) -> Option<(&str, &str)> {
    let rest = input.strip_prefix('@')?;
    let ident_len = rest
        .char_indices()
        .find(|&(_, c)| !is_ident_char(c))
        .map_or(rest.len(), |(i, _)| i);
    if ident_len == 0 {
        return None;
    }
    let (alias, after) = rest.split_at(ident_len);
    let after = after.trim_start().strip_prefix('=')?;
    if after.starts_with('=') {
        return None;
    }
    Some((alias, after))
}

/// Byte offsets of `target` outside brackets, nested blocks and quotes.
/// For `|`, doubled `||` is skipped.
fn top_level_positions(input: &str, target: char) -> Vec<usize> {
    let indexed: Vec<(usize, char)> = input.char_indices().collect();
    let chars: Vec<char> = indexed.iter().map(|&(_, c)| c).collect();
    let mut positions = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth = depth.saturating_sub(1),
            q if is_quote(q) && opens_quote(previous_significant(&chars, i)) => {
                if let Some(end) = quote_end(&chars, i) {
                    i = end + 1;
                    continue;
                }
            }
            _ if c == target && depth == 0 => {
                let doubled = target == '|'
                    && (chars.get(i + 1) == Some(&'|') || (i > 0 && chars[i - 1] == '|'));
                if !doubled {
                    positions.push(indexed[i].0);
                }
            }
            _ => {}
        }
        i += 1;
    }
    positions
}

fn split_top_level(input: &str, separator: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for position in top_level_positions(input, separator) {
        pieces.push(&input[start..position]);
        start = position + separator.len_utf8();
    }
    pieces.push(&input[start..]);
    pieces
}

/// True when text that failed to parse was probably meant as script, as
/// opposed to plain words used as a literal result.
pub fn looks_like_script(input: &str) -> bool {
    let chars: Vec<char> = input.chars().collect();
    chars.iter().enumerate().any(|(i, &c)| match c {
        '$' | '#' | '@' | '%' | '=' | '<' | '>' | '&' | '~' | ';' => true,
        // `!` only negates when an operand follows; `Run!` is prose.
        '!' => matches!(chars.get(i + 1), Some('=' | '$' | '(')),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    /// The challenge direction this comparison means in challenge context.
    pub fn as_challenge(&self) -> ChallengeOp {
        match self {
            Self::Gt | Self::Ge => ChallengeOp::High,
            Self::Lt | Self::Le => ChallengeOp::Low,
            Self::Eq => ChallengeOp::Near,
            Self::Ne => ChallengeOp::Far,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Mutation metadata: `$gold[desc:Found coins, source:market] += 5`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    pub description: Option<String>,
    pub source: Option<String>,
}

impl Meta {
    fn parse(input: &str) -> Meta {
        let mut meta = Meta::default();
        for entry in split_top_level(input, ',') {
            let Some((key, value)) = entry.split_once(':') else {
                continue;
            };
            let value = Some(value.trim().to_string());
            match key.trim() {
                "desc" | "description" => meta.description = value,
                "source" => meta.source = value,
                _ => {}
            }
        }
        meta
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    pub subject: Box<Expr>,
    pub op: ChallengeOp,
    pub target: Box<Expr>,
    pub margin: Option<Box<Expr>>,
    pub min_cap: Option<Box<Expr>>,
    pub max_cap: Option<Box<Expr>>,
    pub pivot: Option<Box<Expr>>,
    /// `%` suffix: roll against the percentage and yield pass/fail.
    pub roll: bool,
}

impl Challenge {
    fn new(subject: Expr, op: ChallengeOp, target: Expr, roll: bool) -> Self {
        Self {
            subject: Box::new(subject),
            op,
            target: Box::new(target),
            margin: None,
            min_cap: None,
            max_cap: None,
            pivot: None,
            roll,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectTarget {
    Quality(ScopedRef),
    /// `%all[category]`: every quality in the category.
    Category(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectExpr {
    pub target: EffectTarget,
    pub meta: Meta,
    pub op: ChangeOp,
    /// `None` for `++` and `--`.
    pub amount: Option<Expr>,
}

/// How `%list` joins names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Comma,
    Pipe,
    Newline,
    Space,
    /// `a, b and c`
    And,
}

impl Separator {
    pub fn from_word(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "comma" => Some(Self::Comma),
            "pipe" => Some(Self::Pipe),
            "newline" => Some(Self::Newline),
            "space" => Some(Self::Space),
            "and" => Some(Self::And),
            _ => None,
        }
    }

    pub fn join(&self, items: &[String]) -> String {
        match self {
            Self::Comma => items.join(", "),
            Self::Pipe => items.join(" | "),
            Self::Newline => items.join("\n"),
            Self::Space => items.join(" "),
            Self::And => match items {
                [] => String::new(),
                [only] => only.clone(),
                [init @ .., last] => format!("{} and {}", init.join(", "), last),
            },
        }
    }
}

/// A typed `%name[args ; options]` instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Macro {
    Random {
        chance: Box<Expr>,
        invert: bool,
    },
    Pick {
        category: String,
        count: Option<Box<Expr>>,
        filter: Option<Box<Expr>>,
    },
    Roll {
        category: String,
        filter: Option<Box<Expr>>,
    },
    List {
        category: String,
        separator: Separator,
        filter: Option<Box<Expr>>,
    },
    All {
        category: String,
    },
    Schedule {
        kind: PendingKind,
        effect: Vec<EffectExpr>,
        amount: Box<Expr>,
        unit: DurationUnit,
    },
    Chance(Box<Challenge>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ref(ScopedRef),
    Alias(String),
    /// A bare word: a literal, or `target` inside a margin expression.
    Word(String),
    Macro(Macro),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Challenge(Challenge),
    Effect(Vec<EffectExpr>),
    /// `lo ~ hi`: uniform integer in the inclusive range.
    Range {
        lo: Box<Expr>,
        hi: Box<Expr>,
    },
}

impl Expr {
    /// True when the tree only parsed because ordinary prose happens to use
    /// operator characters: a bare word used as an arithmetic operand or a
    /// truth item, as in `well-dressed`, `Fine, thanks` or `yes/no`.
    pub fn reads_as_prose(&self) -> bool {
        match self {
            Expr::Arith { lhs, rhs, .. } => {
                lhs.is_bare_word()
                    || rhs.is_bare_word()
                    || lhs.reads_as_prose()
                    || rhs.reads_as_prose()
            }
            Expr::Neg(inner) => inner.is_bare_word() || inner.reads_as_prose(),
            Expr::Not(inner) => inner.reads_as_prose(),
            Expr::And(items) | Expr::Or(items) => items
                .iter()
                .any(|item| item.is_bare_word() || item.reads_as_prose()),
            Expr::Compare { lhs, rhs, .. } => lhs.reads_as_prose() || rhs.reads_as_prose(),
            _ => false,
        }
    }

    fn is_bare_word(&self) -> bool {
        matches!(self, Expr::Word(word) if word != "target")
    }
}

/// Parse one leaf expression.
pub fn parse_leaf(input: &str) -> Result<Expr, ExprError> {
    parse_with(input, false)
}

/// Parse a challenge, treating plain comparison operators as challenge
/// operators.
pub fn parse_challenge(input: &str) -> Result<Challenge, ExprError> {
    match parse_with(input, true)? {
        Expr::Challenge(challenge) => Ok(challenge),
        other => Err(ExprError::UnexpectedToken(format!("{:?}", other))),
    }
}

fn parse_with(input: &str, force_challenge: bool) -> Result<Expr, ExprError> {
    let mut tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(ExprError::UnexpectedEnd);
    }

    if let Some(semicolon) = tokens.iter().position(|t| *t == Token::Semicolon) {
        let mut params = tokens.split_off(semicolon + 1);
        tokens.pop();
        let mut roll = false;
        if params.last() == Some(&Token::Percent) {
            params.pop();
            roll = true;
        }
        let mut challenge = Parser::new(tokens, true).challenge_head()?;
        challenge.roll |= roll;

        let mut slots = [
            &mut challenge.margin,
            &mut challenge.min_cap,
            &mut challenge.max_cap,
            &mut challenge.pivot,
        ];
        let groups = split_tokens(params, &Token::Comma);
        if groups.len() > slots.len() {
            return Err(ExprError::ChallengeParams);
        }
        for (slot, group) in slots.iter_mut().zip(groups) {
            if group.is_empty() {
                continue;
            }
            let mut parser = Parser::new(group, false);
            let expr = parser.arith()?;
            parser.expect_end()?;
            **slot = Some(Box::new(expr));
        }
        return Ok(Expr::Challenge(challenge));
    }

    if tokens
        .iter()
        .any(|t| matches!(t, Token::Op(Op::Change(_))))
    {
        return parse_effects(tokens).map(Expr::Effect);
    }

    let mut parser = Parser::new(tokens, force_challenge);
    let expr = parser.range_or_expr()?;
    parser.expect_end()?;
    Ok(expr)
}

fn parse_effects(tokens: Vec<Token>) -> Result<Vec<EffectExpr>, ExprError> {
    let mut effects = Vec::new();
    for group in split_tokens(tokens, &Token::Comma) {
        let mut parser = Parser::new(group, false);
        let (target, meta) = match parser.next() {
            Some(Token::Ref(reference, meta)) => (EffectTarget::Quality(reference), meta),
            Some(Token::Macro(Macro::All { category })) => {
                (EffectTarget::Category(category), Meta::default())
            }
            Some(other) => return Err(ExprError::UnexpectedToken(format!("{:?}", other))),
            None => return Err(ExprError::UnexpectedEnd),
        };
        let op = match parser.next() {
            Some(Token::Op(Op::Change(op))) => op,
            Some(other) => return Err(ExprError::UnexpectedToken(format!("{:?}", other))),
            None => return Err(ExprError::UnexpectedEnd),
        };
        let amount = match op {
            ChangeOp::Increment | ChangeOp::Decrement => None,
            _ => Some(parser.or_expr()?),
        };
        parser.expect_end()?;
        effects.push(EffectExpr {
            target,
            meta,
            op,
            amount,
        });
    }
    Ok(effects)
}

fn split_tokens(tokens: Vec<Token>, separator: &Token) -> Vec<Vec<Token>> {
    let mut groups = vec![Vec::new()];
    for token in tokens {
        if token == *separator {
            groups.push(Vec::new());
        } else if let Some(group) = groups.last_mut() {
            group.push(token);
        }
    }
    groups
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Compare(CompareOp),
    Challenge(ChallengeOp),
    Change(ChangeOp),
    Arith(ArithOp),
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ref(ScopedRef, Meta),
    Alias(String),
    Word(String),
    Macro(Macro),
    Op(Op),
    Percent,
    Comma,
    Semicolon,
    Tilde,
    LParen,
    RParen,
}

const TWO_CHAR_OPS: &[(&str, Op)] = &[
    (">>", Op::Challenge(ChallengeOp::High)),
    ("<<", Op::Challenge(ChallengeOp::Low)),
    ("><", Op::Challenge(ChallengeOp::Near)),
    ("<>", Op::Challenge(ChallengeOp::Far)),
    (">=", Op::Compare(CompareOp::Ge)),
    ("<=", Op::Compare(CompareOp::Le)),
    ("==", Op::Compare(CompareOp::Eq)),
    ("!=", Op::Compare(CompareOp::Ne)),
    ("+=", Op::Change(ChangeOp::Add)),
    ("-=", Op::Change(ChangeOp::Subtract)),
    ("++", Op::Change(ChangeOp::Increment)),
    ("--", Op::Change(ChangeOp::Decrement)),
    ("&&", Op::And),
    ("||", Op::Or),
];

fn lex(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if is_quote(c) {
            let end = quote_end(&chars, i).ok_or(ExprError::Unterminated("string"))?;
            tokens.push(Token::Str(chars[i + 1..end].iter().collect()));
            i = end + 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while i < len && chars[i].is_ascii_digit() {
                i += 1;
            }
            let mut is_float = false;
            if i < len && chars[i] == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                is_float = true;
                i += 1;
                while i < len && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let token = match (is_float, text.parse::<i64>()) {
                (false, Ok(n)) => Token::Int(n),
                _ => Token::Float(
                    text.parse::<f64>()
                        .map_err(|_| ExprError::UnexpectedChar(c))?,
                ),
            };
            tokens.push(token);
            continue;
        }

        match c {
            '$' | '#' => {
                let (reference, end) = scan_ref(&chars, i).ok_or(ExprError::UnexpectedChar(c))?;
                i = end;
                let mut meta = Meta::default();
                if chars.get(i) == Some(&'[') {
                    let close = bracket_end(&chars, i).ok_or(ExprError::Unterminated("metadata"))?;
                    let raw: String = chars[i + 1..close].iter().collect();
                    meta = Meta::parse(&raw);
                    i = close + 1;
                }
                tokens.push(Token::Ref(reference, meta));
                continue;
            }
            '@' => {
                let end = ident_end(&chars, i + 1);
                if end == i + 1 {
                    return Err(ExprError::UnexpectedChar(c));
                }
                tokens.push(Token::Alias(chars[i + 1..end].iter().collect()));
                i = end;
                continue;
            }
            '%' if chars.get(i + 1).is_some_and(|n| n.is_alphabetic()) => {
                let name_end = ident_end(&chars, i + 1);
                let name: String = chars[i + 1..name_end].iter().collect();
                if chars.get(name_end) != Some(&'[') {
                    return Err(ExprError::MacroArgs(name));
                }
                let close =
                    bracket_end(&chars, name_end).ok_or(ExprError::Unterminated("macro"))?;
                let args: String = chars[name_end + 1..close].iter().collect();
                tokens.push(Token::Macro(parse_macro(&name, &args)?));
                i = close + 1;
                continue;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
                continue;
            }
            _ => {}
        }

        if c.is_alphabetic() || c == '_' {
            let end = ident_end(&chars, i);
            tokens.push(Token::Word(chars[i..end].iter().collect()));
            i = end;
            continue;
        }

        if i + 1 < len {
            let pair: String = chars[i..i + 2].iter().collect();
            if let Some((_, op)) = TWO_CHAR_OPS.iter().find(|(symbol, _)| *symbol == pair) {
                tokens.push(Token::Op(*op));
                i += 2;
                continue;
            }
        }

        let token = match c {
            '>' => Token::Op(Op::Compare(CompareOp::Gt)),
            '<' => Token::Op(Op::Compare(CompareOp::Lt)),
            '=' => Token::Op(Op::Change(ChangeOp::Set)),
            '+' => Token::Op(Op::Arith(ArithOp::Add)),
            '-' => Token::Op(Op::Arith(ArithOp::Sub)),
            '*' => Token::Op(Op::Arith(ArithOp::Mul)),
            '/' => Token::Op(Op::Arith(ArithOp::Div)),
            '!' => Token::Op(Op::Not),
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '~' => Token::Tilde,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => return Err(ExprError::UnexpectedChar(other)),
        };
        tokens.push(token);
        i += 1;
    }

    Ok(tokens)
}

fn ident_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    end
}

/// Index of the `]` matching the `[` at `open`, skipping nested brackets,
/// blocks and quoted strings.
fn bracket_end(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return (chars[i] == ']').then_some(i);
                }
            }
            q if is_quote(q) && opens_quote(previous_significant(chars, i)) => {
                if let Some(end) = quote_end(chars, i) {
                    i = end;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn parse_macro(name: &str, args: &str) -> Result<Macro, ExprError> {
    let semicolons = top_level_positions(args, ';');
    let (main, options) = match semicolons.first() {
        Some(&at) => (args[..at].trim(), &args[at + 1..]),
        None => (args.trim(), ""),
    };
    let options: Vec<&str> = split_top_level(options, ',')
        .into_iter()
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .collect();
    let filter_from = |opts: &[&str]| -> Result<Option<Box<Expr>>, ExprError> {
        if opts.is_empty() {
            Ok(None)
        } else {
            parse_leaf(&opts.join(", ")).map(|e| Some(Box::new(e)))
        }
    };
    let bad_args = || ExprError::MacroArgs(name.to_string());

    let parsed = match name.to_ascii_lowercase().as_str() {
        "random" => Macro::Random {
            chance: Box::new(parse_leaf(main)?),
            invert: options.iter().any(|o| o.eq_ignore_ascii_case("invert")),
        },
        "pick" => {
            let count = match options.first() {
                Some(first) => match parse_leaf(first) {
                    Ok(expr) if !is_condition(&expr) => Some(Box::new(expr)),
                    _ => None,
                },
                None => None,
            };
            let skip = usize::from(count.is_some());
            Macro::Pick {
                category: category(main).ok_or_else(bad_args)?,
                count,
                filter: filter_from(&options[skip..])?,
            }
        }
        "roll" => Macro::Roll {
            category: category(main).ok_or_else(bad_args)?,
            filter: filter_from(&options)?,
        },
        "list" => {
            let separator = options.first().and_then(|o| Separator::from_word(o));
            let skip = usize::from(separator.is_some());
            Macro::List {
                category: category(main).ok_or_else(bad_args)?,
                separator: separator.unwrap_or(Separator::Comma),
                filter: filter_from(&options[skip..])?,
            }
        }
        "all" => Macro::All {
            category: category(main).ok_or_else(bad_args)?,
        },
        "schedule" | "reset" => {
            let kind = if name.eq_ignore_ascii_case("reset") {
                PendingKind::Reset
            } else {
                PendingKind::Schedule
            };
            let colon = *top_level_positions(main, ':').first().ok_or_else(bad_args)?;
            let effect = match parse_leaf(&main[..colon])? {
                Expr::Effect(effect) => effect,
                _ => return Err(bad_args()),
            };
            let (amount, unit) = parse_duration(main[colon + 1..].trim())?;
            Macro::Schedule {
                kind,
                effect,
                amount: Box::new(amount),
                unit,
            }
        }
        "chance" => Macro::Chance(Box::new(parse_challenge(main)?)),
        _ => return Err(ExprError::UnknownMacro(name.to_string())),
    };
    Ok(parsed)
}

fn category(input: &str) -> Option<String> {
    let trimmed = input.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn is_condition(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Compare { .. } | Expr::And(_) | Expr::Or(_) | Expr::Not(_) | Expr::Challenge(_)
    )
}

/// `<amount><unit>` with unit `m`, `h` or `d`, e.g. `30m`, `@hours h`.
fn parse_duration(input: &str) -> Result<(Expr, DurationUnit), ExprError> {
    let invalid = || ExprError::Duration(input.to_string());
    let unit_char = input.chars().last().ok_or_else(invalid)?;
    let unit = DurationUnit::from_suffix(unit_char).ok_or_else(invalid)?;
    let amount = input[..input.len() - unit_char.len_utf8()].trim();
    if amount.is_empty() {
        return Err(invalid());
    }
    Ok((parse_leaf(amount)?, unit))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    force_challenge: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>, force_challenge: bool) -> Self {
        Self {
            tokens,
            pos: 0,
            force_challenge,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<(), ExprError> {
        match self.peek() {
            Some(token) => Err(ExprError::UnexpectedToken(format!("{:?}", token))),
            None => Ok(()),
        }
    }

    /// `subject op target [%]` with nothing after it.
    fn challenge_head(&mut self) -> Result<Challenge, ExprError> {
        let subject = self.arith()?;
        let op = match self.next() {
            Some(Token::Op(Op::Challenge(op))) => op,
            Some(Token::Op(Op::Compare(op))) => op.as_challenge(),
            Some(other) => return Err(ExprError::UnexpectedToken(format!("{:?}", other))),
            None => return Err(ExprError::UnexpectedEnd),
        };
        let target = self.arith()?;
        let roll = self.eat(&Token::Percent);
        self.expect_end()?;
        Ok(Challenge::new(subject, op, target, roll))
    }

    fn range_or_expr(&mut self) -> Result<Expr, ExprError> {
        let first = self.or_expr()?;
        if self.eat(&Token::Tilde) {
            let hi = self.arith()?;
            return Ok(Expr::Range {
                lo: Box::new(first),
                hi: Box::new(hi),
            });
        }
        Ok(first)
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut items = vec![self.and_expr()?];
        while self.eat(&Token::Op(Op::Or)) {
            items.push(self.and_expr()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Or(items)
        })
    }

    /// Commas join conditions like `&&`.
    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut items = vec![self.unary()?];
        while self.eat(&Token::Op(Op::And)) || self.eat(&Token::Comma) {
            items.push(self.unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::And(items)
        })
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Op(Op::Not)) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.arith()?;
        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            _ => return Ok(lhs),
        };
        match op {
            Op::Challenge(challenge_op) => {
                self.pos += 1;
                let target = self.arith()?;
                let roll = self.eat(&Token::Percent);
                Ok(Expr::Challenge(Challenge::new(lhs, challenge_op, target, roll)))
            }
            Op::Compare(compare_op) => {
                self.pos += 1;
                let rhs = self.arith()?;
                let roll = self.eat(&Token::Percent);
                if roll || self.force_challenge {
                    Ok(Expr::Challenge(Challenge::new(
                        lhs,
                        compare_op.as_challenge(),
                        rhs,
                        roll,
                    )))
                } else {
                    Ok(Expr::Compare {
                        op: compare_op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    })
                }
            }
            _ => Ok(lhs),
        }
    }

    fn arith(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(Op::Arith(op @ (ArithOp::Add | ArithOp::Sub)))) => *op,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Arith {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(Op::Arith(op @ (ArithOp::Mul | ArithOp::Div)))) => *op,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Arith {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Op(Op::Arith(ArithOp::Sub))) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Token::Op(Op::Arith(ArithOp::Add))) => self.factor(),
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::Int(n))),
            Some(Token::Float(x)) => Ok(Expr::Literal(Value::Float(x))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ref(reference, _)) => Ok(Expr::Ref(reference)),
            Some(Token::Alias(name)) => Ok(Expr::Alias(name)),
            Some(Token::Word(word)) => Ok(match word.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                _ => Expr::Word(word),
            }),
            Some(Token::Macro(m)) => Ok(Expr::Macro(m)),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(ExprError::Unterminated("parenthesis"));
                }
                Ok(inner)
            }
            Some(other) => Err(ExprError::UnexpectedToken(format!("{:?}", other))),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scope::{Property, Scope};

    #[test]
    fn classify_empty_and_leaf() {
        assert_eq!(Block::classify("   "), Block::Empty);
        assert_eq!(Block::classify(" $clues "), Block::Leaf("$clues".to_string()));
    }

    #[test]
    fn classify_assignment() {
        assert_eq!(
            Block::classify("@hero = $name.name"),
            Block::Assign {
                alias: "hero".to_string(),
                expr: "$name.name".to_string()
            }
        );
        assert_eq!(
            Block::classify("@hero == 'x'"),
            Block::Leaf("@hero == 'x'".to_string())
        );
    }

    #[test]
    fn classify_conditional_chain() {
        let block = Block::classify("$class == 'Warrior' : 10 | $class == 'Rogue' : 4 | 2");
        assert_eq!(
            block,
            Block::Conditional(vec![
                Branch {
                    condition: Some("$class == 'Warrior'".to_string()),
                    result: "10".to_string()
                },
                Branch {
                    condition: Some("$class == 'Rogue'".to_string()),
                    result: "4".to_string()
                },
                Branch {
                    condition: None,
                    result: "2".to_string()
                },
            ])
        );
    }

    #[test]
    fn classify_ignores_nested_and_quoted_separators() {
        assert_eq!(
            Block::classify("{$a : x | y}"),
            Block::Leaf("{$a : x | y}".to_string())
        );
        assert_eq!(
            Block::classify("$a > 1 : 'x | y'"),
            Block::Conditional(vec![Branch {
                condition: Some("$a > 1".to_string()),
                result: "'x | y'".to_string()
            }])
        );
        assert_eq!(
            Block::classify("$a > 1 || $b > 1"),
            Block::Leaf("$a > 1 || $b > 1".to_string())
        );
        assert!(matches!(
            Block::classify("%schedule[$a += 1 : 2h]"),
            Block::Leaf(_)
        ));
    }

    #[test]
    fn classify_choice() {
        assert_eq!(
            Block::classify("red | green | blue"),
            Block::Choice(vec![
                "red".to_string(),
                "green".to_string(),
                "blue".to_string()
            ])
        );
    }

    #[test]
    fn parse_reference_and_property() {
        let expr = parse_leaf("$clues.name").unwrap();
        assert_eq!(
            expr,
            Expr::Ref(ScopedRef {
                scope: Scope::Local,
                id: "clues".to_string(),
                property: Property::Name,
            })
        );
    }

    #[test]
    fn parse_comparison_chain() {
        let expr = parse_leaf("$a >= 5 && $b < 2 || !$c").unwrap();
        match expr {
            Expr::Or(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(&items[0], Expr::And(inner) if inner.len() == 2));
                assert!(matches!(&items[1], Expr::Not(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn commas_join_conditions() {
        assert!(matches!(parse_leaf("$a > 1, $b > 2").unwrap(), Expr::And(v) if v.len() == 2));
    }

    #[test]
    fn arithmetic_precedence() {
        let expr = parse_leaf("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Arith {
                op: ArithOp::Add,
                lhs: Box::new(Expr::Literal(Value::Int(1))),
                rhs: Box::new(Expr::Arith {
                    op: ArithOp::Mul,
                    lhs: Box::new(Expr::Literal(Value::Int(2))),
                    rhs: Box::new(Expr::Literal(Value::Int(3))),
                }),
            }
        );
    }

    #[test]
    fn parse_challenge_forms() {
        let Expr::Challenge(c) = parse_leaf("$investigation >> 30").unwrap() else {
            panic!("expected challenge");
        };
        assert_eq!(c.op, ChallengeOp::High);
        assert!(!c.roll);
        assert!(c.margin.is_none());

        let Expr::Challenge(c) = parse_leaf("$luck << 10 %").unwrap() else {
            panic!("expected challenge");
        };
        assert_eq!(c.op, ChallengeOp::Low);
        assert!(c.roll);

        let Expr::Challenge(c) = parse_leaf("$a >= 10; 5, 10, 90, 50").unwrap() else {
            panic!("expected challenge");
        };
        assert_eq!(c.op, ChallengeOp::High);
        assert!(c.margin.is_some() && c.min_cap.is_some());
        assert!(c.max_cap.is_some() && c.pivot.is_some());

        assert!(matches!(parse_leaf("$a >= 10").unwrap(), Expr::Compare { .. }));
        assert_eq!(parse_challenge("$a == 10").unwrap().op, ChallengeOp::Near);
        assert_eq!(
            parse_leaf("$a >> 1; 1, 2, 3, 4, 5"),
            Err(ExprError::ChallengeParams)
        );
    }

    #[test]
    fn parse_effects_with_meta() {
        let Expr::Effect(effects) =
            parse_leaf("$gold[desc:Found coins, source:market] += 5, $xp++").unwrap()
        else {
            panic!("expected effect");
        };
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0].op, ChangeOp::Add);
        assert_eq!(effects[0].meta.description.as_deref(), Some("Found coins"));
        assert_eq!(effects[0].meta.source.as_deref(), Some("market"));
        assert_eq!(effects[1].op, ChangeOp::Increment);
        assert!(effects[1].amount.is_none());
    }

    #[test]
    fn parse_batch_effect() {
        let Expr::Effect(effects) = parse_leaf("%all[Skills] += 1").unwrap() else {
            panic!("expected effect");
        };
        assert_eq!(effects[0].target, EffectTarget::Category("Skills".to_string()));
    }

    #[test]
    fn parse_macros() {
        assert!(matches!(
            parse_leaf("%random[30 ; invert]").unwrap(),
            Expr::Macro(Macro::Random { invert: true, .. })
        ));
        assert!(matches!(
            parse_leaf("%pick[Skills ; 2, $. > 0]").unwrap(),
            Expr::Macro(Macro::Pick { count: Some(_), filter: Some(_), .. })
        ));
        assert!(matches!(
            parse_leaf("%pick[Skills ; $. > 0]").unwrap(),
            Expr::Macro(Macro::Pick { count: None, filter: Some(_), .. })
        ));
        assert!(matches!(
            parse_leaf("%list[Skills ; and]").unwrap(),
            Expr::Macro(Macro::List { separator: Separator::And, filter: None, .. })
        ));
        assert!(matches!(
            parse_leaf("%roll[Rumours]").unwrap(),
            Expr::Macro(Macro::Roll { filter: None, .. })
        ));
        assert!(matches!(
            parse_leaf("%chance[$a >= 10]").unwrap(),
            Expr::Macro(Macro::Chance(_))
        ));
        assert_eq!(
            parse_leaf("%teleport[x]"),
            Err(ExprError::UnknownMacro("teleport".to_string()))
        );
    }

    #[test]
    fn parse_schedule() {
        let Expr::Macro(Macro::Schedule { kind, effect, unit, .. }) =
            parse_leaf("%reset[$energy = 10 : 2h]").unwrap()
        else {
            panic!("expected schedule");
        };
        assert_eq!(kind, PendingKind::Reset);
        assert_eq!(effect.len(), 1);
        assert_eq!(unit, DurationUnit::Hours);
        assert_eq!(
            parse_leaf("%schedule[$a++ : 2y]"),
            Err(ExprError::Duration("2y".to_string()))
        );
    }

    #[test]
    fn parse_range() {
        assert!(matches!(parse_leaf("1 ~ 6").unwrap(), Expr::Range { .. }));
    }

    #[test]
    fn plain_words_fail_to_parse() {
        assert!(parse_leaf("two words").is_err());
        assert!(parse_leaf("don't").is_err());
        assert!(matches!(parse_leaf("Warrior").unwrap(), Expr::Word(w) if w == "Warrior"));
    }

    #[test]
    fn separators_join() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(Separator::And.join(&items), "a, b and c");
        assert_eq!(Separator::And.join(&items[..1]), "a");
        assert_eq!(Separator::Pipe.join(&items[..2]), "a | b");
        assert_eq!(Separator::Comma.join(&[]), "");
    }

    #[test]
    fn script_heuristic() {
        assert!(looks_like_script("$a ?? 3"));
        assert!(looks_like_script("!$done"));
        assert!(looks_like_script("$a != 3"));
        assert!(!looks_like_script("just words"));
        assert!(!looks_like_script("Run!"));
    }

    #[test]
    fn prose_operands_are_detected() {
        for text in ["well-dressed", "Fine, thanks", "yes/no", "-foo", "$a > 1, ready"] {
            let expr = parse_leaf(text).unwrap();
            assert!(expr.reads_as_prose(), "{} should read as prose", text);
        }
        for text in ["$a - 1", "$a > 1, $b < 2", "target / 2", "$class != Rogue", "'a' + 'b'"] {
            let expr = parse_leaf(text).unwrap();
            assert!(!expr.reads_as_prose(), "{} should read as script", text);
        }
    }
}
