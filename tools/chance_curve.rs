/// Chance Curve - prints the success curve of a challenge.
///
/// Usage: chance_curve --target <n> [--op >>|<<|><|<>] [--margin <n>]
///                     [--pivot <n>] [--min <n>] [--max <n>]
///                     [--from <n>] [--to <n>] [--step <n>] [--config <file.ron>]
use std::env;
use std::path::Path;
use std::process;

use storylet_engine::core::chance::{self, ChallengeOp, ChanceParams};
use storylet_engine::{EngineConfig, MarginPolicy};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "Usage: chance_curve --target <n> [--op >>|<<|><|<>] [--margin <n>] \
[--pivot <n>] [--min <n>] [--max <n>] [--from <n>] [--to <n>] [--step <n>] [--config <file.ron>]";

const BAR_WIDTH: f64 = 50.0;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();

    let mut target = None;
    let mut op = ChallengeOp::High;
    let mut margin = None;
    let mut pivot = None;
    let mut min_cap = None;
    let mut max_cap = None;
    let mut from = None;
    let mut to = None;
    let mut step = None;
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--help" || flag == "-h" {
            println!("{}", USAGE);
            process::exit(0);
        }
        i += 1;
        let Some(value) = args.get(i) else {
            eprintln!("Error: {} needs a value", flag);
            process::exit(1);
        };
        match flag {
            "--target" => target = Some(number(flag, value)),
            "--op" => {
                op = ChallengeOp::from_symbol(value).unwrap_or_else(|| {
                    eprintln!("Error: unknown operator '{}'", value);
                    process::exit(1);
                })
            }
            "--margin" => margin = Some(number(flag, value)),
            "--pivot" => pivot = Some(number(flag, value)),
            "--min" => min_cap = Some(number(flag, value)),
            "--max" => max_cap = Some(number(flag, value)),
            "--from" => from = Some(number(flag, value)),
            "--to" => to = Some(number(flag, value)),
            "--step" => step = Some(number(flag, value)),
            "--config" => config_path = Some(value.clone()),
            other => {
                eprintln!("Unknown argument: {}", other);
                process::exit(1);
            }
        }
        i += 1;
    }

    let target: f64 = target.unwrap_or_else(|| {
        eprintln!("Error: --target is required");
        eprintln!("{}", USAGE);
        process::exit(1);
    });

    let config = match config_path {
        Some(path) => EngineConfig::load_from_ron(Path::new(&path)).unwrap_or_else(|e| {
            eprintln!("Error: failed to load config: {}", e);
            process::exit(1);
        }),
        None => EngineConfig::default(),
    };

    let margin = margin.unwrap_or_else(|| match &config.default_margin {
        MarginPolicy::Fixed(m) => *m,
        MarginPolicy::TargetMultiple(factor) => factor * target,
        MarginPolicy::Expression(expr) => {
            eprintln!(
                "Note: configured margin expression '{}' is not evaluated here; using {}x target",
                expr,
                MarginPolicy::DEFAULT_FACTOR
            );
            MarginPolicy::DEFAULT_FACTOR * target
        }
    });

    let params = ChanceParams {
        margin,
        min_cap: min_cap.unwrap_or(config.default_min_cap),
        max_cap: max_cap.unwrap_or(config.default_max_cap),
        pivot: pivot.unwrap_or(config.default_pivot),
    };
    let from = from.unwrap_or((target - margin * 1.25).floor().max(0.0));
    let to = to.unwrap_or((target + margin * 1.25).ceil());
    let step = step.unwrap_or_else(|| ((to - from) / 20.0).max(1.0).round());

    println!(
        "Challenge {} {}  margin {}  pivot {}%  caps {}..{}%\n",
        op.symbol(),
        target,
        params.margin,
        params.pivot,
        params.min_cap,
        params.max_cap
    );

    let points = chance::curve(target, op, &params, from, to, step);
    if points.is_empty() {
        eprintln!("Error: empty range (check --from, --to and --step)");
        process::exit(1);
    }

    for (skill, percent) in points {
        let bar = "#".repeat((percent / 100.0 * BAR_WIDTH).round() as usize);
        let marker = if (skill - target).abs() < step / 2.0 {
            " <- target"
        } else {
            ""
        };
        println!("{:>8.1} | {:>5.1}% {}{}", skill, percent, bar, marker);
    }
}

fn number(flag: &str, value: &str) -> f64 {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: {} must be a number", flag);
        process::exit(1);
    })
}
