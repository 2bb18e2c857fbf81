/// Investigation example: a short storylet loop driven by the script engine.
///
/// The player searches an archive until they hold enough clues to confront
/// the culprit. Each step renders text, checks availability, rolls the
/// option's challenge and applies the resulting effect.
///
/// Run with: cargo run --example investigation

use rand::rngs::StdRng;
use rand::SeedableRng;
use storylet_engine::core::effect::apply_changes;
use storylet_engine::{ContentSet, EvalOptions, QualityState, QualityStates, ScriptEngine, WorldState};

const CONTENT: &str = r#"(
    qualities: [
        (
            id: "investigation",
            name: "{$.level >= 5 : 'Keen Eye' | 'Investigation'}",
            kind: Pyramidal,
            category: "Skills",
            description: "You read rooms like ledgers. (Level {$.level}, {$.cp} towards the next.)",
        ),
        (id: "persuasion", name: "Persuasion", kind: Pyramidal, category: "Skills"),
        (id: "clues", name: "Clues", kind: Counter, category: "Progress"),
        (id: "suspicion", name: "Suspicion", kind: Counter, category: "Progress"),
        (id: "alias", name: "Alias", kind: String),
        (id: "night", name: "Night", kind: Counter),
    ],
    events: [
        (
            id: "archive",
            name: "The Archive",
            description: "{@me = $alias}{@me} slips between the shelves. {$clues} clues so far. {%random[50] : 'A clock ticks.' | 'Rain on the skylight.'}",
            options: [
                (
                    id: "search",
                    name: "Search the ledgers",
                    challenge: Some("$investigation >> 4"),
                    success_effects: ["$clues[desc:A page torn from the ledger] += 2, $investigation += 1"],
                    failure_effects: ["$suspicion++"],
                ),
            ],
        ),
        (
            id: "confrontation",
            name: "The Confrontation",
            description: "With {$clues} clues in hand, {@me = $alias}{@me} knocks. Night {#night}.",
            requirements: ["$clues >= 6", "$suspicion < 4"],
            options: [
                (
                    id: "accuse",
                    name: "Lay out the evidence",
                    challenge: Some("$persuasion >> 2; 3"),
                    success_effects: ["$clues = 0, #night++"],
                    failure_effects: ["$suspicion += 2"],
                ),
            ],
        ),
    ],
)"#;

fn main() {
    let content = ContentSet::parse_ron(CONTENT).expect("Failed to parse content");
    let engine = ScriptEngine::builder()
        .with_content(content)
        .seed(2026)
        .build()
        .expect("Failed to build engine");

    let mut local: QualityStates = [
        QualityState::pyramidal("investigation", 3, 0),
        QualityState::pyramidal("persuasion", 2, 0),
        QualityState::string("alias", "Inspector Vane"),
    ]
    .into_iter()
    .collect();
    let mut world = QualityStates::new();
    let mut rng = StdRng::seed_from_u64(2026);

    println!("=== Investigation ===\n");

    for turn in 1..=12 {
        let state = WorldState::new(&local).with_world(&world);
        let event_id = if engine
            .is_event_available("confrontation", &state, EvalOptions::default())
            .value
        {
            "confrontation"
        } else {
            "archive"
        };
        let Some(event) = engine.registry().event(event_id) else {
            break;
        };

        let text = engine.evaluate_text(&event.description, &state, EvalOptions::default().rng(&mut rng));
        println!("[{}] {}", turn, event.name);
        println!("  {}", text.value);
        for diagnostic in &text.diagnostics {
            println!("  [Diagnostic] {}", diagnostic);
        }

        let Some(option) = event.options.first() else {
            break;
        };
        let outcome = engine
            .resolve_option(event_id, &option.id, &state, EvalOptions::default().rng(&mut rng))
            .value
            .expect("option exists");
        println!(
            "  > {} ({}% chance): {}",
            option.name,
            outcome.chance.unwrap_or(100.0),
            if outcome.passed { "success" } else { "failure" }
        );
        for change in &outcome.effect.changes {
            match &change.description {
                Some(description) => println!("    {} ({})", description, change.quality_id),
                None => println!("    {} {} {}", change.quality_id, change.op.symbol(), change.amount),
            }
        }

        apply_changes(&mut local, &mut world, &outcome.effect);
        println!();

        if event_id == "confrontation" && outcome.passed {
            println!("The case is closed.");
            break;
        }
    }

    let state = WorldState::new(&local).with_world(&world);
    let skill = engine.render_quality_by_id("investigation", &state, EvalOptions::default());
    println!("--- {} ---", skill.value.name);
    println!("{}", skill.value.description);
}
