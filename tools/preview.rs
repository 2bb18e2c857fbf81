/// Preview - interactive evaluation shell for testing content scripts.
///
/// Usage: preview --content <path> [--config <file.ron>] [--state <file.ron>] [--seed <n>]
///
/// Commands:
///   text <template>        - substitute every block
///   cond <condition>       - evaluate a condition
///   block <template>       - typed value of a single block
///   chance <challenge>     - skill-check percentage
///   render <quality>       - render a quality with itself bound as $.
///   event <id>             - check a storylet's requirements
///   choose <event> <opt>   - resolve an option and apply its effect
///   set <$id|#id> <value>  - set a quality level or text value
///   state                  - list quality states
///   seed <n>               - set RNG seed
///   help                   - list commands
///   quit                   - exit
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::{self, BufRead, Write};
use std::path::Path;
use storylet_engine::core::effect::apply_changes;
use storylet_engine::{
    ContentRegistry, Diagnostic, EngineConfig, EvalOptions, QualityState, QualityStates,
    QualityType, ScriptEngine, WorldState,
};
use storylet_engine::schema::quality::QualityValue;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let mut content_path = None;
    let mut config_path = None;
    let mut state_path = None;
    let mut seed: u64 = 42;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--content" if i + 1 < args.len() => {
                i += 1;
                content_path = Some(args[i].clone());
            }
            "--config" if i + 1 < args.len() => {
                i += 1;
                config_path = Some(args[i].clone());
            }
            "--state" if i + 1 < args.len() => {
                i += 1;
                state_path = Some(args[i].clone());
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse().unwrap_or(42);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let mut builder = ScriptEngine::builder();
    if let Some(ref path) = content_path {
        builder = builder.content_path(path);
    }
    if let Some(ref path) = config_path {
        builder = builder.config_path(path);
    } else {
        builder = builder.config(EngineConfig::default());
    }
    let engine = match builder.build() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    // Session state
    let mut local = match state_path {
        Some(ref path) => load_states(path),
        None => QualityStates::new(),
    };
    let mut world = QualityStates::new();
    let mut current_seed = seed;
    let mut rng = StdRng::seed_from_u64(current_seed);

    println!("Loaded {} local qualities", local.len());
    println!("Seed: {}", seed);
    println!("Type 'help' for commands.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("preview> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
            None => (line.to_lowercase(), ""),
        };
        let state = WorldState::new(&local).with_world(&world);

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => {
                print_help();
            }
            "text" => {
                let result = engine.evaluate_text(rest, &state, EvalOptions::default().rng(&mut rng));
                println!("{}", result.value);
                print_diagnostics(&result.diagnostics);
            }
            "cond" => {
                let result = engine.evaluate_condition(rest, &state, EvalOptions::default().rng(&mut rng));
                println!("{}", result.value);
                print_diagnostics(&result.diagnostics);
            }
            "block" => {
                let result = engine.evaluate_block(rest, &state, EvalOptions::default().rng(&mut rng));
                println!("{:?}", result.value);
                print_diagnostics(&result.diagnostics);
            }
            "chance" => {
                let result = engine.calculate_skill_check_chance(rest, &state, EvalOptions::default().rng(&mut rng));
                match result.value {
                    Some(percent) => println!("{}%", percent),
                    None => println!("Not a challenge: {}", rest),
                }
                print_diagnostics(&result.diagnostics);
            }
            "render" => {
                if rest.is_empty() {
                    println!("Usage: render <quality>");
                    continue;
                }
                let result = engine.render_quality_by_id(rest, &state, EvalOptions::default().rng(&mut rng));
                let rendered = &result.value;
                println!("\n--- {} ({}) ---", rendered.name, rendered.kind.label());
                println!("Level: {}  CP: {}", rendered.level, rendered.change_points);
                if !rendered.string_value.is_empty() {
                    println!("Value: {}", rendered.string_value);
                }
                if !rendered.description.is_empty() {
                    println!("{}", rendered.description);
                }
                for (key, text) in &rendered.text_variants {
                    println!("  {}: {}", key, text);
                }
                if !rendered.bonus.is_empty() {
                    println!("Bonus: {}", rendered.bonus);
                }
                println!("--- End ---\n");
                print_diagnostics(&result.diagnostics);
            }
            "event" => {
                if rest.is_empty() {
                    println!("Usage: event <id>");
                    continue;
                }
                let result = engine.is_event_available(rest, &state, EvalOptions::default().rng(&mut rng));
                match engine.registry().event(rest) {
                    Some(event) => {
                        println!(
                            "{}: {}",
                            event.name,
                            if result.value { "available" } else { "locked" }
                        );
                        for option in &event.options {
                            println!("  option {}: {}", option.id, option.name);
                        }
                    }
                    None => println!("Event '{}' not found.", rest),
                }
                print_diagnostics(&result.diagnostics);
            }
            "choose" => {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                if parts.len() < 2 {
                    println!("Usage: choose <event> <option>");
                    continue;
                }
                let result = engine.resolve_option(parts[0], parts[1], &state, EvalOptions::default().rng(&mut rng));
                print_diagnostics(&result.diagnostics);
                let Some(outcome) = result.value else {
                    println!("No option '{}' on event '{}'.", parts[1], parts[0]);
                    continue;
                };
                match outcome.chance {
                    Some(chance) => println!(
                        "{} ({}% chance)",
                        if outcome.passed { "Success" } else { "Failure" },
                        chance
                    ),
                    None => println!("No challenge."),
                }
                for change in &outcome.effect.changes {
                    println!(
                        "  {}{} {} {}: {:?} -> {:?}",
                        change.scope.marker(),
                        change.quality_id,
                        change.op.symbol(),
                        change.amount,
                        change.before,
                        change.after
                    );
                }
                for pending in &outcome.pending {
                    println!(
                        "  pending {:?} in {} ms ({} changes)",
                        pending.kind,
                        pending.duration_ms,
                        pending.effect.changes.len()
                    );
                }
                apply_changes(&mut local, &mut world, &outcome.effect);
            }
            "set" => {
                let Some((target, value)) = rest.split_once(char::is_whitespace) else {
                    println!("Usage: set <$id|#id> <value>");
                    continue;
                };
                let (states, id) = if let Some(id) = target.strip_prefix('#') {
                    (&mut world, id)
                } else {
                    (&mut local, target.trim_start_matches('$'))
                };
                let kind = states
                    .get(id)
                    .map(QualityState::kind)
                    .or_else(|| engine.registry().quality(id).map(|d| d.kind));
                let value = value.trim();
                let new_value = match (kind, value.parse::<i64>()) {
                    (Some(QualityType::String), _) | (None, Err(_)) => QualityValue::String {
                        value: value.to_string(),
                    },
                    (Some(kind), Ok(level)) => with_level(kind, level),
                    (None, Ok(level)) => QualityValue::Counter { level },
                    (Some(_), Err(_)) => {
                        println!("'{}' needs a number", id);
                        continue;
                    }
                };
                states.insert(QualityState::new(id, new_value));
                println!("Set {} = {}", target, value);
            }
            "state" => {
                let mut ids: Vec<&QualityState> = local.iter().collect();
                ids.sort_by(|a, b| a.quality_id.cmp(&b.quality_id));
                for state in ids {
                    println!("  ${} = {}", state.quality_id, state.value.to_value());
                }
                let mut ids: Vec<&QualityState> = world.iter().collect();
                ids.sort_by(|a, b| a.quality_id.cmp(&b.quality_id));
                for state in ids {
                    println!("  #{} = {}", state.quality_id, state.value.to_value());
                }
            }
            "seed" => {
                if rest.is_empty() {
                    println!("Current seed: {}", current_seed);
                    continue;
                }
                match rest.parse::<u64>() {
                    Ok(s) => {
                        current_seed = s;
                        rng = StdRng::seed_from_u64(current_seed);
                        println!("Seed set to {}", current_seed);
                    }
                    Err(_) => {
                        println!("Invalid seed: {}", rest);
                    }
                }
            }
            _ => {
                println!("Unknown command: '{}'. Type 'help' for available commands.", cmd);
            }
        }
    }
}

fn print_usage() {
    println!("Preview - interactive evaluation shell for testing content scripts.");
    println!();
    println!("Usage: preview --content <path> [--config <file.ron>] [--state <file.ron>] [--seed <n>]");
    println!();
    println!("  --content <path>   Path to a RON content file");
    println!("  --config <path>    Engine config file (optional)");
    println!("  --state <path>     RON map of quality id to state (optional)");
    println!("  --seed <n>         Initial RNG seed (default: 42)");
}

fn print_help() {
    println!("Commands:");
    println!("  text <template>        Substitute every block");
    println!("  cond <condition>       Evaluate a condition");
    println!("  block <template>       Typed value of a single block");
    println!("  chance <challenge>     Skill-check percentage");
    println!("  render <quality>       Render a quality");
    println!("  event <id>             Check a storylet's requirements");
    println!("  choose <event> <opt>   Resolve an option and apply its effect");
    println!("  set <$id|#id> <value>  Set a quality level or text value");
    println!("  state                  List quality states");
    println!("  seed <n>               Set RNG seed");
    println!("  help                   Show this help");
    println!("  quit                   Exit");
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        println!("[Diagnostic] {}", diagnostic);
    }
}

fn with_level(kind: QualityType, level: i64) -> QualityValue {
    match kind {
        QualityType::Pyramidal => QualityValue::Pyramidal {
            level,
            change_points: 0,
        },
        QualityType::Item => QualityValue::Item { level },
        QualityType::Equipable => QualityValue::Equipable { level, bonus: None },
        QualityType::Counter | QualityType::String => QualityValue::Counter { level },
    }
}

fn load_states(path: &str) -> QualityStates {
    let contents = match std::fs::read_to_string(Path::new(path)) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("ERROR reading state {}: {}", path, e);
            return QualityStates::new();
        }
    };
    match ron::from_str(&contents) {
        Ok(states) => states,
        Err(e) => {
            eprintln!("ERROR parsing state {}: {}", path, e);
            QualityStates::new()
        }
    }
}
