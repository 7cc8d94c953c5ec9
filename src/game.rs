use std::fs;
use std::io::{self, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use arcweaver::export::to_mermaid;
use arcweaver::llm::LLM;
use arcweaver::persist::save_path;
use arcweaver::{EngineError, SceneView, SessionConfig, SessionStatus, StartOptions, StorySession};

const SAVE_DIR: &str = "saves";

// ---------------------------------------------------------------------------
// Input helpers
// ---------------------------------------------------------------------------

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn read_text(prompt: &str, default: &str) -> Result<String> {
    let input = read_line(&format!("{prompt} [{default}]: "))?;
    Ok(if input.is_empty() {
        default.to_string()
    } else {
        input
    })
}

fn read_number(prompt: &str, range: RangeInclusive<usize>, default: usize) -> Result<usize> {
    loop {
        let input = read_line(&format!(
            "{prompt} ({}-{}) [{default}]: ",
            range.start(),
            range.end()
        ))?;
        if input.is_empty() {
            return Ok(default);
        }
        match input.parse::<usize>() {
            Ok(n) if range.contains(&n) => return Ok(n),
            _ => println!(
                "  Please enter a number between {} and {}.",
                range.start(),
                range.end()
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn show_scene(view: &SceneView) {
    println!("\n----------------------------------------");
    if !view.scene.location.is_empty() {
        println!(
            "  {} | {} | {}",
            view.scene.location, view.scene.time_of_day, view.scene.weather
        );
    }
    if !view.path_label.is_empty() {
        println!("  ({})", view.path_label);
    }
    println!("----------------------------------------");
    println!("\n{}\n", view.story);
    if let Some(dialogue) = &view.dialogue {
        println!("  \"{dialogue}\"\n");
    }

    let others: Vec<String> = view
        .characters
        .iter()
        .filter(|(name, _)| name.as_str() != arcweaver::story::PLAYER_KEY)
        .map(|(name, c)| match &c.description {
            Some(desc) => format!("{name} ({desc})"),
            None => name.clone(),
        })
        .collect();
    if !others.is_empty() {
        println!("  Characters: {}", others.join(", "));
    }

    let inventory = if view.inventory.is_empty() {
        "empty".to_string()
    } else {
        view.inventory.join(", ")
    };
    println!(
        "  Health: {}/100 ({})   XP: {}   Inventory: {inventory}",
        view.health, view.mood, view.experience
    );

    if !view.choices.is_empty() {
        println!("\nWhat do you do?");
        for choice in &view.choices {
            let marker = if choice.can_backtrack { " (you may return)" } else { "" };
            println!("  {}. {}{marker}", choice.index + 1, choice.text);
        }
        println!("  [m] story map   [q] save and quit");
    }
}

// ---------------------------------------------------------------------------
// Game over screen
// ---------------------------------------------------------------------------

enum GameOutcome {
    Finished(SceneView),
    Quit,
}

fn show_game_over(outcome: &GameOutcome) {
    println!("\n========================================");
    println!("             GAME OVER");
    println!("========================================");

    match outcome {
        GameOutcome::Finished(view) => {
            match &view.status {
                SessionStatus::Dead { cause } => {
                    println!("  You died.");
                    println!("  Cause: {cause}");
                }
                SessionStatus::Ended { kind, reason } => {
                    println!("  Ending: {}", kind.label().to_uppercase());
                    println!("  {reason}");
                }
                SessionStatus::Active => {}
            }
            println!("  Final health: {}/100", view.health);
            println!("  Experience:   {}", view.experience);
            if !view.inventory.is_empty() {
                println!("  Carrying:     {}", view.inventory.join(", "));
            }
        }
        GameOutcome::Quit => {
            println!("  Your progress has been saved.");
        }
    }

    println!("========================================\n");
    println!("  [r] New game    [q] Quit\n");
}

/// Read the player's post-game choice. Returns `true` to restart, `false` to quit.
fn prompt_restart() -> Result<bool> {
    loop {
        match read_line("> ")?.to_lowercase().as_str() {
            "r" => return Ok(true),
            "q" => return Ok(false),
            _ => println!("  Press [r] to restart or [q] to quit."),
        }
    }
}

// ---------------------------------------------------------------------------
// Single game round
// ---------------------------------------------------------------------------

fn save(session: &StorySession<&mut LLM>, path: &Path) {
    if let Err(e) = session.save(path) {
        warn!("Could not save progress: {e}");
        println!("(Progress could not be saved: {e})");
    }
}

fn play_round(session: &mut StorySession<&mut LLM>, path: &Path) -> Result<GameOutcome> {
    loop {
        let view = session.view();
        show_scene(&view);
        if view.status.is_over() {
            // A finished story is not resumable.
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    warn!("Could not remove finished save {}: {e}", path.display());
                }
            }
            return Ok(GameOutcome::Finished(view));
        }

        let input = read_line("\n> ")?.to_lowercase();
        match input.as_str() {
            "" => continue,
            "q" | "quit" | "exit" => {
                save(session, path);
                return Ok(GameOutcome::Quit);
            }
            "m" | "map" => {
                println!(
                    "\n{}",
                    to_mermaid(session.graph(), &session.player().visited_node_ids)
                );
                continue;
            }
            _ => {}
        }

        let Ok(number) = input.parse::<usize>() else {
            println!("  Enter the number of a choice.");
            continue;
        };
        if number == 0 {
            println!("  Choices start at 1.");
            continue;
        }

        println!("\n(The story unfolds...)");
        match session.choose(number - 1) {
            Ok(_) => save(session, path),
            Err(EngineError::InvalidChoice { available, .. }) => {
                println!("  Pick a choice between 1 and {available}.");
            }
            Err(e) => return Err(e).context("choice failed"),
        }
    }
}

fn setup() -> Result<(StartOptions, PathBuf)> {
    println!("\nLet's set up your adventure.");
    let theme = read_text("Theme", "Fantasy")?;
    let depth = read_number("Story depth", 1..=8, 3)?;
    let choices = read_number("Choices per scene", 2..=4, 2)?;
    let name = read_text("Your name", "Traveller")?;

    let path = save_path(Path::new(SAVE_DIR), &name, &theme);
    let options = StartOptions {
        depth,
        branching_factor: choices,
        ..StartOptions::new(theme, name)
    };
    Ok((options, path))
}

// ---------------------------------------------------------------------------
// Public entry point: runs games in a loop until the player quits
// ---------------------------------------------------------------------------

pub fn run(model: &mut LLM) -> Result<()> {
    let mut fresh = false;
    loop {
        println!("\n========================================");
        println!("              ARCWEAVER");
        println!("========================================");
        println!("An adventure written as you play it.");

        let (options, path) = setup()?;
        if fresh && path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove old save {}", path.display()))?;
        }

        println!("\n(Weaving your story, this can take a while...)");
        let mut session =
            StorySession::load_or_start(&mut *model, &path, options, SessionConfig::default());
        info!(
            "Session ready: {} nodes, player at {}",
            session.graph().len(),
            session.player().current_node_id.short()
        );

        let outcome = play_round(&mut session, &path)?;
        show_game_over(&outcome);

        if !prompt_restart()? {
            println!("Thanks for playing!");
            break;
        }

        info!("Player chose to start a new game");
        fresh = true;
    }

    Ok(())
}
