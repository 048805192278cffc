use std::env;
use std::thread;
use std::time::Duration;

use serde_json::json;

use contracts::{ActorTypeId, AttackKind, DirectorConfig, Location, Vec3, WorldName};
use marionette_core::engine::{MarkerSpec, WorldAccess};
use marionette_core::NpcDirector;
use marionette_sim::{SimConfig, SimEngine};

fn print_usage() {
    println!("marionette-cli <command>");
    println!("commands:");
    println!("  demo");
    println!("    scripted tour: spawn, thinking indicator, walk, follow,");
    println!("    attack, respawn and zombie sweep, as json lines");
    println!("  walk <x> <z>");
    println!("    spawn one actor at the origin and walk it to (x, 0, z)");
}

fn parse_f64(value: Option<&String>, label: &str) -> Result<f64, String> {
    let raw = value.ok_or_else(|| format!("missing {}", label))?;
    raw.parse::<f64>()
        .map_err(|_| format!("invalid {}: {}", label, raw))
}

fn emit(line: serde_json::Value) {
    println!("{line}");
}

fn run_demo() -> Result<(), String> {
    let overworld = WorldName::new("overworld");
    let engine = SimEngine::start(SimConfig {
        worlds: vec![overworld.clone(), WorldName::new("hub")],
        ..SimConfig::default()
    });
    let keeper = ActorTypeId::new("web_keeper");
    engine.define_role(keeper.clone());

    let config = DirectorConfig {
        default_world: Some(overworld.clone()),
        respawn_check_interval_ms: 200,
        ..DirectorConfig::default()
    };
    let director = NpcDirector::new(engine.clone(), config);
    director.link_opened();

    // A player for the engagement commands to find.
    engine.run_on(&overworld, |state| {
        state.spawn_player("Explorer", Vec3::new(6.0, 0.0, 6.0));
    });

    let id = director
        .spawn(
            &keeper,
            "Keeper of Webs",
            Location {
                world: overworld.clone(),
                pos: Vec3::new(0.0, 0.0, 0.0),
            },
        )
        .map_err(|err| format!("spawn failed: {err}"))?;
    emit(json!({"event": "spawned", "actor": id, "world": &overworld}));

    director.show_thinking(&id);
    thread::sleep(Duration::from_millis(600));
    director.hide_thinking(&id);
    emit(json!({"event": "thinking_cycle_done", "actor": id}));

    let ticket = director
        .move_to(
            &id,
            Location {
                world: overworld.clone(),
                pos: Vec3::new(10.0, 0.0, 0.0),
            },
        )
        .map_err(|err| format!("walk failed to start: {err}"))?;
    let outcome = ticket.wait();
    emit(json!({"event": "walk_settled", "actor": id, "outcome": outcome}));

    director.rotate_toward(
        &id,
        Location {
            world: overworld.clone(),
            pos: Vec3::new(0.0, 0.0, 20.0),
        },
    );
    thread::sleep(Duration::from_millis(900)); // longer than the rotation budget

    let following = director.start_following(&id, "Explorer");
    emit(json!({"event": "following", "actor": id, "locked": following}));
    thread::sleep(Duration::from_millis(500));
    if let Some(location) = director.current_location(&id) {
        emit(json!({"event": "location", "actor": id, "at": location}));
    }
    director.stop_following(&id);

    let attacking = director.start_attacking(&id, "Explorer", AttackKind::Ranged);
    emit(json!({"event": "attacking", "actor": id, "locked": attacking}));
    director.stop_attacking(&id);

    director.schedule_respawn(keeper.clone(), Duration::from_millis(300));
    thread::sleep(Duration::from_millis(800));
    emit(json!({
        "event": "respawn_checked",
        "tracked": director.tracked_actors().len(),
        "pending": director.pending_respawns(),
    }));

    // An orphaned indicator marker, as a crashed run would leave behind.
    engine.run_on(&overworld, |state| {
        state.spawn_marker(MarkerSpec::labeled(Vec3::new(3.0, 2.0, 3.0), "Thinking .."));
    });
    let swept = director.sweep_zombie_indicators();
    emit(json!({"event": "swept_zombies", "removed": swept}));

    director.link_closed();
    director.shutdown();
    engine.stop();
    Ok(())
}

fn run_walk(args: &[String]) -> Result<(), String> {
    let x = parse_f64(args.get(2), "x")?;
    let z = parse_f64(args.get(3), "z")?;

    let overworld = WorldName::new("overworld");
    let engine = SimEngine::start(SimConfig {
        worlds: vec![overworld.clone()],
        ..SimConfig::default()
    });
    let walker = ActorTypeId::new("walker");
    engine.define_role(walker.clone());
    let director = NpcDirector::new(engine.clone(), DirectorConfig::default());

    let id = director
        .spawn(
            &walker,
            "Walker",
            Location {
                world: overworld.clone(),
                pos: Vec3::new(0.0, 0.0, 0.0),
            },
        )
        .map_err(|err| format!("spawn failed: {err}"))?;

    let ticket = director
        .move_to(
            &id,
            Location {
                world: overworld,
                pos: Vec3::new(x, 0.0, z),
            },
        )
        .map_err(|err| format!("walk failed to start: {err}"))?;
    let outcome = ticket.wait();
    emit(json!({"event": "walk_settled", "actor": id, "target": {"x": x, "z": z}, "outcome": outcome}));

    director.shutdown();
    engine.stop();
    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("demo") => {
            if let Err(err) = run_demo() {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
        Some("walk") => {
            if let Err(err) = run_walk(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        _ => {
            print_usage();
        }
    }
}
