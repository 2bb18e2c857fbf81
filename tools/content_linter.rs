/// Content Linter - checks every script in a content set.
///
/// Usage: content_linter <content.ron | content_dir>
///
/// Reports unbalanced braces, blocks that fall back to literal text,
/// references to unknown qualities and challenges that do not parse.
use std::path::Path;
use std::process;

use rand::rngs::StdRng;
use rand::SeedableRng;
use storylet_engine::core::scanner::Template;
use storylet_engine::{
    ContentSet, DiagnosticKind, EvalOptions, Evaluation, QualityStates, ScriptEngine, WorldState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "error".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: content_linter <content.ron | content_dir>");
        process::exit(0);
    }

    let mut content = ContentSet::new();
    let content_path = Path::new(&args[1]);

    if content_path.is_file() {
        match ContentSet::load_from_ron(content_path) {
            Ok(set) => content.merge(set),
            Err(e) => {
                eprintln!("ERROR: Failed to load content file: {}", e);
                process::exit(1);
            }
        }
    } else if content_path.is_dir() {
        load_content_recursive(content_path, &mut content);
    } else {
        eprintln!("ERROR: Path '{}' does not exist", args[1]);
        process::exit(1);
    }

    println!(
        "Loaded {} qualities and {} events",
        content.qualities().len(),
        content.events().len()
    );

    let (errors, warnings) = lint_content(content);

    println!("\n=== Content Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn load_content_recursive(dir: &Path, content: &mut ContentSet) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                load_content_recursive(&path, content);
            } else if path.extension().and_then(|s| s.to_str()) == Some("ron") {
                match ContentSet::load_from_ron(&path) {
                    Ok(set) => {
                        println!("  Loaded: {}", path.display());
                        content.merge(set);
                    }
                    Err(e) => {
                        eprintln!("  ERROR loading {}: {}", path.display(), e);
                    }
                }
            }
        }
    }
}

/// What kind of script a field holds.
#[derive(Clone, Copy)]
enum Script {
    Text,
    Condition,
    Challenge,
    Effect,
}

fn lint_content(content: ContentSet) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Scripts to check: (owner, field, text, kind, self id)
    let mut scripts: Vec<(String, String, String, Script, Option<String>)> = Vec::new();
    for quality in content.qualities() {
        let owner = format!("quality '{}'", quality.id);
        let self_id = Some(quality.id.clone());
        scripts.push((owner.clone(), "name".into(), quality.name.clone(), Script::Text, self_id.clone()));
        scripts.push((
            owner.clone(),
            "description".into(),
            quality.description.clone(),
            Script::Text,
            self_id.clone(),
        ));
        scripts.push((owner.clone(), "bonus".into(), quality.bonus.clone(), Script::Text, self_id.clone()));
        if let Some(plural) = &quality.plural {
            scripts.push((owner.clone(), "plural".into(), plural.clone(), Script::Text, self_id.clone()));
        }
        for (key, variant) in &quality.text_variants {
            scripts.push((owner.clone(), key.clone(), variant.clone(), Script::Text, self_id.clone()));
        }
    }
    for event in content.events() {
        let owner = format!("event '{}'", event.id);
        scripts.push((owner.clone(), "name".into(), event.name.clone(), Script::Text, None));
        scripts.push((owner.clone(), "description".into(), event.description.clone(), Script::Text, None));
        for requirement in &event.requirements {
            scripts.push((owner.clone(), "requirement".into(), requirement.clone(), Script::Condition, None));
        }
        for option in &event.options {
            let owner = format!("event '{}' option '{}'", event.id, option.id);
            scripts.push((owner.clone(), "name".into(), option.name.clone(), Script::Text, None));
            scripts.push((owner.clone(), "description".into(), option.description.clone(), Script::Text, None));
            for requirement in &option.requirements {
                scripts.push((owner.clone(), "requirement".into(), requirement.clone(), Script::Condition, None));
            }
            if let Some(challenge) = &option.challenge {
                scripts.push((owner.clone(), "challenge".into(), challenge.clone(), Script::Challenge, None));
            }
            for effect in option.success_effects.iter().chain(&option.failure_effects) {
                scripts.push((owner.clone(), "effect".into(), effect.clone(), Script::Effect, None));
            }
        }
    }

    let engine = match ScriptEngine::builder().with_content(content).seed(0).build() {
        Ok(engine) => engine,
        Err(e) => {
            errors.push(format!("Failed to build engine: {}", e));
            return (errors, warnings);
        }
    };
    let local = QualityStates::new();
    let state = WorldState::new(&local);
    let mut rng = StdRng::seed_from_u64(0);

    for (owner, field, text, kind, self_id) in &scripts {
        if let Err(e) = Template::parse(text) {
            errors.push(format!("{} {}: {} in \"{}\"", owner, field, e, text));
        }

        let mut options = EvalOptions::default().rng(&mut rng);
        if let Some(id) = self_id {
            options = options.bind_self(id, None);
        }

        let diagnostics = match kind {
            Script::Text => engine.evaluate_text(text, &state, options).diagnostics,
            Script::Condition => engine.evaluate_condition(text, &state, options).diagnostics,
            Script::Effect => engine.evaluate_block(text, &state, options).diagnostics,
            Script::Challenge => {
                let Evaluation { value, diagnostics } =
                    engine.calculate_skill_check_chance(text, &state, options);
                if value.is_none() {
                    errors.push(format!("{} challenge is not a challenge: \"{}\"", owner, text));
                }
                diagnostics
            }
        };

        for diagnostic in diagnostics {
            let message = format!("{} {}: {}", owner, field, diagnostic);
            match diagnostic.kind {
                DiagnosticKind::UnbalancedBraces => {} // reported by the strict scan above
                DiagnosticKind::ParseDegrade | DiagnosticKind::RecursionLimitExceeded => {
                    errors.push(message)
                }
                DiagnosticKind::UnresolvedReference
                | DiagnosticKind::DivisionDegenerate
                | DiagnosticKind::AliasRebound
                | DiagnosticKind::EmptySelection => warnings.push(message),
            }
        }
    }

    (errors, warnings)
}
