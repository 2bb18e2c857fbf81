/// Engine integration tests - content loaded from RON, evaluated end to end.

use rand::rngs::StdRng;
use rand::SeedableRng;
use storylet_engine::core::effect::{apply_changes, ChangeOp, PendingKind};
use storylet_engine::core::scope::Scope;
use storylet_engine::schema::quality::QualityValue;
use storylet_engine::{
    ContentRegistry, DiagnosticKind, EvalOptions, QualityState, QualityStates, ScriptEngine,
    Value, WorldState,
};

fn engine() -> ScriptEngine {
    ScriptEngine::builder()
        .content_path("tests/fixtures/content.ron")
        .seed(42)
        .build()
        .unwrap()
}

fn kinds(diagnostics: &[storylet_engine::Diagnostic]) -> Vec<DiagnosticKind> {
    diagnostics.iter().map(|d| d.kind).collect()
}

#[test]
fn counter_substitution() {
    let engine = engine();
    let local: QualityStates = [QualityState::counter("clues", 5)].into_iter().collect();
    let state = WorldState::new(&local);

    let result = engine.evaluate_text("{$clues} found", &state, EvalOptions::default());
    assert_eq!(result.value, "5 found");
    assert!(result.is_clean());
}

#[test]
fn condition_at_threshold() {
    let engine = engine();
    let five: QualityStates = [QualityState::counter("clues", 5)].into_iter().collect();
    let four: QualityStates = [QualityState::counter("clues", 4)].into_iter().collect();

    let passing = WorldState::new(&five);
    let failing = WorldState::new(&four);
    assert!(
        engine
            .evaluate_condition("$clues >= 5", &passing, EvalOptions::default())
            .value
    );
    assert!(
        !engine
            .evaluate_condition("{$clues >= 5}", &failing, EvalOptions::default())
            .value
    );
}

#[test]
fn skill_check_at_target_is_pivot() {
    let engine = engine();
    let local: QualityStates = [QualityState::pyramidal("investigation", 30, 0)]
        .into_iter()
        .collect();
    let state = WorldState::new(&local);

    let result = engine.calculate_skill_check_chance(
        "$investigation >> 30",
        &state,
        EvalOptions::default(),
    );
    assert_eq!(result.value, Some(60.0));

    let not_a_challenge =
        engine.calculate_skill_check_chance("$investigation + 1", &state, EvalOptions::default());
    assert_eq!(not_a_challenge.value, None);
}

#[test]
fn conditional_chain_picks_first_match() {
    let engine = engine();
    let template = "{$class == 'Warrior' : 10 | $class == 'Rogue' : 4 | 2}";

    let rogue: QualityStates = [QualityState::string("class", "Rogue")].into_iter().collect();
    let result = engine.evaluate_text(template, &WorldState::new(&rogue), EvalOptions::default());
    assert_eq!(result.value, "4");

    let mage: QualityStates = [QualityState::string("class", "Mage")].into_iter().collect();
    let result = engine.evaluate_text(template, &WorldState::new(&mage), EvalOptions::default());
    assert_eq!(result.value, "2");
}

#[test]
fn category_list_uses_expanded_names() {
    let engine = engine();
    let local: QualityStates = [
        QualityState::pyramidal("investigation", 2, 0),
        QualityState::pyramidal("stealth", 5, 0),
    ]
    .into_iter()
    .collect();
    let state = WorldState::new(&local);

    let result = engine.evaluate_text("Skills: {%list[Skills ; comma]}", &state, EvalOptions::default());
    assert_eq!(result.value, "Skills: Investigation, Persuasion, Shadow");
}

#[test]
fn ternary_text() {
    let engine = engine();
    let template = "You are {$gold < 10 : 'poor' | 'rich'}.";

    let poor: QualityStates = [QualityState::item("gold", 3)].into_iter().collect();
    let rich: QualityStates = [QualityState::item("gold", 30)].into_iter().collect();
    assert_eq!(
        engine
            .evaluate_text(template, &WorldState::new(&poor), EvalOptions::default())
            .value,
        "You are poor."
    );
    assert_eq!(
        engine
            .evaluate_text(template, &WorldState::new(&rich), EvalOptions::default())
            .value,
        "You are rich."
    );
}

#[test]
fn nested_block_evaluates_inner() {
    let engine = engine();
    let local: QualityStates = [QualityState::string("a", "x")].into_iter().collect();
    let state = WorldState::new(&local);
    assert_eq!(
        engine
            .evaluate_text("{ { $a } }", &state, EvalOptions::default())
            .value,
        "x"
    );
}

#[test]
fn plain_text_is_unchanged() {
    let engine = engine();
    let local = QualityStates::new();
    let state = WorldState::new(&local);
    for text in ["", "Nothing to see here.", "It's a dog's life", "a } stray brace"] {
        let result = engine.evaluate_text(text, &state, EvalOptions::default());
        assert_eq!(result.value, text);
        assert!(result.is_clean());
    }
}

#[test]
fn unbalanced_template_is_kept_and_reported() {
    let engine = engine();
    let local = QualityStates::new();
    let state = WorldState::new(&local);
    let result = engine.evaluate_text("Broken {$clues", &state, EvalOptions::default());
    assert_eq!(result.value, "Broken {$clues");
    assert_eq!(kinds(&result.diagnostics), vec![DiagnosticKind::UnbalancedBraces]);
}

#[test]
fn self_referential_description_terminates() {
    let engine = engine();
    let local = QualityStates::new();
    let state = WorldState::new(&local);

    let result = engine.evaluate_text("{$echo.description}", &state, EvalOptions::default());
    assert!(result.value.starts_with("Again: Again: "));
    assert!(kinds(&result.diagnostics).contains(&DiagnosticKind::RecursionLimitExceeded));

    let rendered = engine.render_quality_by_id("echo", &state, EvalOptions::default());
    assert!(rendered.value.description.starts_with("Again: "));
}

#[test]
fn unknown_reference_is_reported_not_fatal() {
    let engine = engine();
    let local = QualityStates::new();
    let state = WorldState::new(&local);
    let result = engine.evaluate_text("[{$ghost}]", &state, EvalOptions::default());
    assert_eq!(result.value, "[0]");
    assert_eq!(kinds(&result.diagnostics), vec![DiagnosticKind::UnresolvedReference]);
}

#[test]
fn aliases_bind_silently_in_text() {
    let engine = engine();
    let local: QualityStates = [QualityState::string("class", "Rogue")].into_iter().collect();
    let state = WorldState::new(&local);

    let result = engine.evaluate_text(
        "{@role = $class}The {@role} waits.",
        &state,
        EvalOptions::default(),
    );
    assert_eq!(result.value, "The Rogue waits.");
    assert!(result.is_clean());

    let rebound = engine.evaluate_text(
        "{@role = $class}{@role = 'Mage'}{@role}",
        &state,
        EvalOptions::default(),
    );
    assert_eq!(rebound.value, "Rogue");
    assert_eq!(kinds(&rebound.diagnostics), vec![DiagnosticKind::AliasRebound]);
}

#[test]
fn world_scope_reads_world_map() {
    let engine = engine();
    let local: QualityStates = [QualityState::counter("season", 1)].into_iter().collect();
    let world: QualityStates = [QualityState::counter("season", 3)].into_iter().collect();
    let state = WorldState::new(&local).with_world(&world);

    let result = engine.evaluate_text("{$season}/{#season}", &state, EvalOptions::default());
    assert_eq!(result.value, "1/3");

    let no_world = WorldState::new(&local);
    assert_eq!(
        engine
            .evaluate_text("{#season}", &no_world, EvalOptions::default())
            .value,
        "0"
    );
}

#[test]
fn effect_block_describes_changes_without_writing() {
    let engine = engine();
    let mut local: QualityStates = [QualityState::counter("clues", 5)].into_iter().collect();
    let mut world = QualityStates::new();

    let result = engine.evaluate_block(
        "{$clues += 2, $clues++, #season = 4}",
        &WorldState::new(&local).with_world(&world),
        EvalOptions::default(),
    );
    let Value::Effect(effect) = result.value else {
        panic!("expected an effect, got {:?}", result.value);
    };
    assert_eq!(effect.changes.len(), 3);
    assert_eq!(effect.changes[1].op, ChangeOp::Increment);
    assert_eq!(effect.changes[1].after, QualityValue::Counter { level: 8 });
    assert_eq!(effect.changes[2].scope, Scope::World);
    assert_eq!(local.level("clues"), 5);

    apply_changes(&mut local, &mut world, &effect);
    assert_eq!(local.level("clues"), 8);
    assert_eq!(world.level("season"), 4);
}

#[test]
fn effects_render_as_nothing_in_text() {
    let engine = engine();
    let local = QualityStates::new();
    let state = WorldState::new(&local);
    let result = engine.evaluate_text("Gain{$clues++}.", &state, EvalOptions::default());
    assert_eq!(result.value, "Gain.");
}

#[test]
fn render_quality_with_self_bound() {
    let engine = engine();
    let local: QualityStates = [
        QualityState::item("gold", 5),
        QualityState::pyramidal("stealth", 5, 2),
        QualityState::new(
            "lantern",
            QualityValue::Equipable {
                level: 2,
                bonus: Some("+{$.level} Stealth".to_string()),
            },
        ),
    ]
    .into_iter()
    .collect();
    let state = WorldState::new(&local);

    let gold = engine.render_quality_by_id("gold", &state, EvalOptions::default());
    assert_eq!(gold.value.description, "You have 5 coins. poor");
    assert_eq!(gold.value.categories, vec!["Currency".to_string()]);

    let stealth = engine.render_quality_by_id("stealth", &state, EvalOptions::default());
    assert_eq!(stealth.value.name, "Shadow");
    assert_eq!(stealth.value.plural, "Shadows");
    assert_eq!(stealth.value.change_points, 2);

    let lantern = engine.render_quality_by_id("lantern", &state, EvalOptions::default());
    assert_eq!(lantern.value.bonus, "+2 Stealth");
    assert_eq!(
        lantern.value.text_variants.get("possessive").map(String::as_str),
        Some("the lantern's")
    );
}

#[test]
fn render_quality_with_explicit_state() {
    let engine = engine();
    let local = QualityStates::new();
    let state = WorldState::new(&local);
    let definition = engine.registry().quality("class").unwrap().clone();
    let warrior = QualityState::string("class", "Warrior");

    let rendered = engine.render_quality(
        &definition,
        Some(&warrior),
        &state,
        EvalOptions::default(),
    );
    assert_eq!(rendered.value.description, "A Warrior by trade.");
    assert_eq!(rendered.value.string_value, "Warrior");
}

#[test]
fn render_unknown_quality_degrades() {
    let engine = engine();
    let local = QualityStates::new();
    let state = WorldState::new(&local);
    let rendered = engine.render_quality_by_id("ghost", &state, EvalOptions::default());
    assert_eq!(rendered.value.name, "ghost");
    assert!(rendered.value.description.is_empty());
    assert_eq!(rendered.value.level, 0);
}

#[test]
fn event_availability() {
    let engine = engine();
    let ready: QualityStates = [
        QualityState::counter("clues", 5),
        QualityState::item("gold", 12),
        QualityState::string("class", "Rogue"),
    ]
    .into_iter()
    .collect();
    let empty = QualityStates::new();

    let ready = WorldState::new(&ready);
    let empty = WorldState::new(&empty);
    assert!(engine.is_event_available("archive", &ready, EvalOptions::default()).value);
    assert!(engine.is_event_available("market", &ready, EvalOptions::default()).value);
    assert!(!engine.is_event_available("archive", &empty, EvalOptions::default()).value);
    assert!(!engine.is_event_available("market", &empty, EvalOptions::default()).value);
    assert!(engine.is_event_available("open_road", &empty, EvalOptions::default()).value);
    assert!(!engine.is_event_available("nowhere", &ready, EvalOptions::default()).value);
}

#[test]
fn resolve_option_success_and_failure() {
    let engine = engine();
    let mut rng = StdRng::seed_from_u64(7);

    // Target 30, margin 10: skill 40 and above always succeeds, 20 and below never does.
    let expert: QualityStates = [
        QualityState::counter("clues", 5),
        QualityState::pyramidal("investigation", 45, 0),
    ]
    .into_iter()
    .collect();
    let outcome = engine
        .resolve_option(
            "archive",
            "search",
            &WorldState::new(&expert),
            EvalOptions::default().rng(&mut rng),
        )
        .value
        .unwrap();
    assert!(outcome.passed);
    assert_eq!(outcome.chance, Some(100.0));
    assert_eq!(outcome.effect.changes.len(), 2);
    assert_eq!(outcome.effect.changes[0].after, QualityValue::Counter { level: 7 });
    assert_eq!(
        outcome.effect.changes[0].description.as_deref(),
        Some("Found a ledger")
    );
    assert_eq!(outcome.effect.changes[1].after, QualityValue::Item { level: 5 });

    let novice: QualityStates = [QualityState::counter("clues", 5)].into_iter().collect();
    let outcome = engine
        .resolve_option(
            "archive",
            "search",
            &WorldState::new(&novice),
            EvalOptions::default().rng(&mut rng),
        )
        .value
        .unwrap();
    assert!(!outcome.passed);
    assert_eq!(outcome.chance, Some(0.0));
    assert_eq!(outcome.effect.changes[0].after, QualityValue::Counter { level: 4 });
}

#[test]
fn resolve_option_world_and_pending_effects() {
    let engine = engine();
    let mut local = QualityStates::new();
    let mut world = QualityStates::new();

    let leave = engine
        .resolve_option(
            "archive",
            "leave",
            &WorldState::new(&local).with_world(&world),
            EvalOptions::default(),
        )
        .value
        .unwrap();
    assert!(leave.passed);
    assert_eq!(leave.chance, None);
    apply_changes(&mut local, &mut world, &leave.effect);
    assert_eq!(world.level("season"), 1);
    assert!(local.is_empty());

    let rest = engine
        .resolve_option(
            "archive",
            "rest",
            &WorldState::new(&local),
            EvalOptions::default(),
        )
        .value
        .unwrap();
    assert!(rest.effect.is_empty());
    assert_eq!(rest.pending.len(), 1);
    assert_eq!(rest.pending[0].kind, PendingKind::Schedule);
    assert_eq!(rest.pending[0].duration_ms, 1_800_000);

    assert!(engine
        .resolve_option("archive", "dance", &WorldState::new(&local), EvalOptions::default())
        .value
        .is_none());
}

#[test]
fn self_binding_via_options() {
    let engine = engine();
    let local: QualityStates = [QualityState::item("gold", 4)].into_iter().collect();
    let state = WorldState::new(&local);

    let result = engine.evaluate_text(
        "{$.name}: {$.}",
        &state,
        EvalOptions::default().bind_self("gold", None),
    );
    assert_eq!(result.value, "Gold: 4");
}

#[test]
fn unquoted_prose_results_stay_literal() {
    let engine = engine();
    let local: QualityStates = [QualityState::item("gold", 5)].into_iter().collect();
    let state = WorldState::new(&local);

    for (template, expected) in [
        ("You look {$gold > 1 : well-dressed | shabby}.", "You look well-dressed."),
        ("{$gold > 1 : Fine, thanks | Awful}", "Fine, thanks"),
        ("{$gold > 1 : yes/no | x}", "yes/no"),
        ("{$gold > 9 : Poor | Rich!}", "Rich!"),
    ] {
        let result = engine.evaluate_text(template, &state, EvalOptions::default());
        assert_eq!(result.value, expected);
        assert!(result.is_clean(), "{:?}", result.diagnostics);
    }
}

#[test]
fn huge_effect_amounts_do_not_overflow() {
    let engine = engine();
    let local: QualityStates = [
        QualityState::counter("gold", 5),
        QualityState::pyramidal("skill", 1, 1),
    ]
    .into_iter()
    .collect();
    let state = WorldState::new(&local);

    let result = engine.evaluate_block(
        "{$gold += 9223372036854775807, $skill += 9223372036854775807}",
        &state,
        EvalOptions::default(),
    );
    let Value::Effect(effect) = result.value else {
        panic!("expected an effect, got {:?}", result.value);
    };
    assert_eq!(effect.changes[0].after, QualityValue::Counter { level: i64::MAX });
    let QualityValue::Pyramidal { level, .. } = effect.changes[1].after else {
        panic!("expected pyramidal, got {:?}", effect.changes[1].after);
    };
    assert!(level > 4_000_000_000);
}

#[test]
fn rolled_challenge_replays_with_injected_rng() {
    let engine = engine();
    let local: QualityStates = [QualityState::pyramidal("investigation", 30, 0)]
        .into_iter()
        .collect();
    let state = WorldState::new(&local);

    let mut rng = StdRng::seed_from_u64(3);
    let sure = engine.evaluate_block("{$investigation >> 5; 5 %}", &state, EvalOptions::default().rng(&mut rng));
    assert_eq!(sure.value, Value::Bool(true));
    let hopeless = engine.evaluate_block("{$investigation >> 90; 10 %}", &state, EvalOptions::default().rng(&mut rng));
    assert_eq!(hopeless.value, Value::Bool(false));

    let roll = |seed: u64| {
        let mut rng = StdRng::seed_from_u64(seed);
        engine
            .evaluate_block("{$investigation >> 30 %}", &state, EvalOptions::default().rng(&mut rng))
            .value
    };
    for seed in 0..10 {
        assert_eq!(roll(seed), roll(seed));
    }
}
