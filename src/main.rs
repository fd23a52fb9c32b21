use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use wellness_coach::backend::HttpPoseBackend;
use wellness_coach::capture::DeviceCamera;
use wellness_coach::config::CoachConfig;
use wellness_coach::diet::{DietClient, DietConversation, QUICK_SUGGESTIONS};
use wellness_coach::nutrition::{FoodNutrition, MealLog, NutritionClient};
use wellness_coach::session::{BackendStatus, ExerciseKind, SessionController, SessionState};
use wellness_coach::speech::{CommandSpeech, ConsoleSpeech, SpeechSynthesizer};

const HELP: &str = "\
Commands:
  exercises                   list exercises
  select <kind>               choose bicep | pushup | squat | lunge | shoulder
  start | stop | reset        control the exercise session
  voice on|off                toggle spoken feedback
  status                      show the session state
  diet <query>                ask for meal recommendations
  suggestions                 show example diet queries
  ingredient add|remove <x>   manage ingredients on hand
  food <query>                look up nutrition for a food
  meal add|clear|totals       build up a meal from looked-up foods
  meal analyze                server-side totals for the current meal
  quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CoachConfig::from_env();
    let _log_guard = init_tracing(&config);
    config.validate()?;

    eprintln!("🏋️  Wellness Coach v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Pose backend: {}", config.pose_url);
    eprintln!("   Diet service: {}", config.diet_url);
    eprintln!("   Nutrition service: {}", config.nutrition_url);
    eprintln!("   Camera: {}", config.camera_device.display());
    eprintln!(
        "   Voice: {} ({})",
        if config.session.voice_enabled { "on" } else { "off" },
        config.tts_command.as_deref().unwrap_or("console")
    );

    // ── Session ──────────────────────────────────────────────────────────
    let backend = Arc::new(HttpPoseBackend::new(&config.pose_url, config.http_timeout)?);
    let camera = Arc::new(DeviceCamera::new(&config.camera_device));
    let speech: Arc<dyn SpeechSynthesizer> = match &config.tts_command {
        Some(program) => Arc::new(CommandSpeech::new(program)),
        None => Arc::new(ConsoleSpeech),
    };
    let controller = SessionController::new(backend, camera, speech, config.session.clone());

    match controller.check_backend().await {
        BackendStatus::Connected => eprintln!("   Backend: ✅ connected"),
        _ => eprintln!("   Backend: ❌ not reachable (start will fail until it is)"),
    }

    let mut rx = controller.subscribe();
    let watcher = tokio::spawn(async move {
        let mut last = rx.borrow_and_update().clone();
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            if state.phase != last.phase {
                eprintln!("\n   Session: {}", state.phase);
            }
            if state.rep_count != last.rep_count
                || state.stage != last.stage
                || state.feedback != last.feedback
            {
                eprintln!("\n   {}", progress_line(&state));
            }
            last = state;
        }
    });

    // ── Diet / nutrition ─────────────────────────────────────────────────
    let mut diet = DietConversation::new(DietClient::new(&config.diet_url, config.http_timeout)?);
    let nutrition = NutritionClient::new(&config.nutrition_url, config.http_timeout)?;
    let mut meal = MealLog::new();
    let mut last_food: Option<FoodNutrition> = None;

    eprintln!("   Type 'help' for commands.\n");
    eprint!("> ");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            eprint!("> ");
            continue;
        }
        let (cmd, rest) = line
            .split_once(' ')
            .map(|(c, r)| (c, r.trim()))
            .unwrap_or((line, ""));

        match cmd {
            "quit" | "exit" | "/quit" => break,
            "help" => eprintln!("{HELP}"),
            "exercises" => {
                for kind in ExerciseKind::ALL {
                    eprintln!("  {:<9} {}: {}", kind, kind.display_name(), kind.description());
                }
            }
            "select" => match rest.parse::<ExerciseKind>() {
                Ok(kind) => match controller.select_exercise(kind) {
                    Ok(()) => eprintln!("Selected {}", kind.display_name()),
                    Err(e) => eprintln!("❌ {e}"),
                },
                Err(e) => eprintln!("❌ {e}"),
            },
            "start" => match controller.start().await {
                Ok(()) => {
                    eprintln!("▶️  Session started");
                    if let Some(url) = controller.video_feed_url() {
                        eprintln!("   Processed video: {url}");
                    }
                }
                Err(e) => eprintln!("❌ {e}"),
            },
            "stop" => controller.stop(),
            "reset" => {
                controller.reset();
                eprintln!("Counters reset");
            }
            "voice" => match rest {
                "on" => controller.set_voice_enabled(true),
                "off" => controller.set_voice_enabled(false),
                _ => eprintln!("Usage: voice on|off"),
            },
            "status" => {
                let state = controller.snapshot();
                eprintln!(
                    "Phase: {} | Exercise: {} | Backend: {:?} | Voice: {}",
                    state.phase,
                    state.exercise.map(|k| k.display_name()).unwrap_or("none"),
                    state.backend_status,
                    if state.voice_enabled { "on" } else { "off" }
                );
                eprintln!("{}", progress_line(&state));
                if let Some(err) = &state.last_error {
                    eprintln!("Last error: {err}");
                }
            }
            "diet" => match diet.ask(rest).await {
                Ok(turn) => {
                    eprintln!("{}", turn.content);
                    if turn.fallback {
                        eprintln!("   (diet service offline, showing fallback meals)");
                    }
                    for meal in &turn.recommendations {
                        eprintln!(
                            "  • {}: {:.0} kcal, {:.0}g protein, {:.0} min",
                            meal.name, meal.calories, meal.protein, meal.prep_time
                        );
                    }
                }
                Err(e) => eprintln!("❌ {e}"),
            },
            "suggestions" => {
                for s in QUICK_SUGGESTIONS {
                    eprintln!("  {s}");
                }
            }
            "ingredient" => match rest.split_once(' ') {
                Some(("add", name)) => {
                    if diet.add_ingredient(name) {
                        eprintln!("Ingredients: {}", diet.ingredients().join(", "));
                    }
                }
                Some(("remove", name)) => {
                    diet.remove_ingredient(name);
                    eprintln!("Ingredients: {}", diet.ingredients().join(", "));
                }
                _ => eprintln!("Usage: ingredient add|remove <name>"),
            },
            "food" => match nutrition.search(rest).await {
                Ok(food) => {
                    eprintln!(
                        "{} ({}, {}): {:.0} kcal | protein {:.1}g | carbs {:.1}g | fat {:.1}g | fiber {:.1}g | sugar {:.1}g [{}]",
                        food.name,
                        food.category,
                        food.serving_size,
                        food.calories,
                        food.protein,
                        food.carbs,
                        food.fat,
                        food.fiber,
                        food.sugar,
                        food.source
                    );
                    eprintln!("   'meal add' to add it to your meal");
                    last_food = Some(food);
                }
                Err(e) => eprintln!("❌ {e}"),
            },
            "meal" => match rest {
                "add" => match last_food.take() {
                    Some(food) => {
                        eprintln!("Added {}", food.name);
                        meal.add(food);
                    }
                    None => eprintln!("Look up a food first with 'food <query>'"),
                },
                "clear" => {
                    meal.clear();
                    eprintln!("Meal cleared");
                }
                "totals" => {
                    let t = meal.totals();
                    eprintln!(
                        "{} items: {:.0} kcal | protein {:.1}g | carbs {:.1}g | fat {:.1}g | fiber {:.1}g | sugar {:.1}g",
                        meal.entries().len(),
                        t.calories,
                        t.protein,
                        t.carbs,
                        t.fat,
                        t.fiber,
                        t.sugar
                    );
                }
                "analyze" => {
                    let names: Vec<String> =
                        meal.entries().iter().map(|e| e.food.name.clone()).collect();
                    match nutrition.analyze_meal(&names).await {
                        Ok(analysis) => eprintln!(
                            "Server total for {} foods: {:.0} kcal",
                            analysis.food_count, analysis.total_nutrition.totals.calories
                        ),
                        Err(e) => eprintln!("❌ {e}"),
                    }
                }
                _ => eprintln!("Usage: meal add|clear|totals|analyze"),
            },
            other => eprintln!("Unknown command: {other}. Type 'help'."),
        }
        eprint!("> ");
    }

    controller.teardown();
    watcher.abort();
    Ok(())
}

fn progress_line(state: &SessionState) -> String {
    format!(
        "Reps: {} | Stage: {} | Angle: {:.0}° | Symmetry: {:.1} | {}",
        state.rep_count,
        state.stage.label(),
        state.joint_angle,
        state.symmetry_score,
        state.feedback.first().map(String::as_str).unwrap_or("-")
    )
}

fn init_tracing(config: &CoachConfig) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "wellness-coach.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
