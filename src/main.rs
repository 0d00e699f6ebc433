mod cli;
mod logging;

use ai_tutor::config::ProviderCatalog;
use ai_tutor::extraction::{score, FlowchartGenerator, QuizGenerator, QuizQuestion};
use ai_tutor::mode_detector::{detect_mode, should_suggest, DetectorConfig};
use ai_tutor::persistence::default_store_path;
use ai_tutor::persona::{all_personas, persona_for, TutorMode};
use ai_tutor::{
    CancellationToken, ChatTurn, FileKeyValueStore, Settings, StreamOrchestrator, TutorError,
};
use anyhow::{Context, Result};
use clap::Parser;
use cli::{Args, Command};
use futures::StreamExt;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::{debug, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    logging::setup_logging(args.verbose);

    let store_path = match &args.settings {
        Some(path) => path.clone(),
        None => default_store_path()?,
    };
    debug!("Using settings store {}", store_path.display());
    let mut store = FileKeyValueStore::new(store_path);

    let stored = Settings::load(&store).context("Failed to load settings")?;
    let detector = DetectorConfig::load(&store).context("Failed to load mode detector config")?;
    let with_overrides = apply_overrides(stored.clone(), &args);
    let settings = with_overrides.clone().with_env_keys();

    match args.command {
        Command::Chat { message } => run_chat(settings, &detector, message).await,
        Command::Quiz {
            transcript,
            count,
            interactive,
        } => run_quiz(settings, &transcript, count, interactive).await,
        Command::Flowchart {
            transcript,
            conversation_id,
            output,
        } => run_flowchart(settings, &transcript, conversation_id, output.as_deref()).await,
        Command::Detect { message } => {
            run_detect(&message, &settings, &detector);
            Ok(())
        }
        Command::Personas => {
            run_personas(&settings);
            Ok(())
        }
        Command::Config { set_key, save } => {
            let mut updated = if save {
                with_overrides
            } else {
                stored.clone()
            };
            for entry in &set_key {
                let (vendor, key) = entry
                    .split_once('=')
                    .with_context(|| format!("Expected VENDOR=KEY, got '{}'", entry))?;
                updated
                    .api_keys
                    .insert(vendor.trim().to_string(), key.trim().to_string());
            }
            if updated != stored {
                updated.save(&mut store).context("Failed to save settings")?;
                println!("Settings saved to {}", store.path().display());
            }
            show_settings(&updated.with_env_keys());
            Ok(())
        }
    }
}

fn apply_overrides(mut settings: Settings, args: &Args) -> Settings {
    if let Some(provider) = &args.provider {
        if *provider != settings.selected_provider {
            // A stored model belongs to the stored provider.
            settings.selected_model = None;
        }
        settings.selected_provider = provider.clone();
    }
    if let Some(model) = &args.model {
        settings.selected_model = Some(model.clone());
    }
    if let Some(mode) = &args.mode {
        if mode.parse::<TutorMode>().is_err() {
            warn!("Unknown mode '{}', the standard tutor will be used", mode);
        }
        settings.tutor_mode = mode.clone();
    }
    settings
}

fn load_transcript(path: &Path) -> Result<Vec<ChatTurn>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transcript {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Transcript {} is not a list of turns", path.display()))
}

async fn run_chat(
    settings: Settings,
    detector: &DetectorConfig,
    message: Option<String>,
) -> Result<()> {
    let orchestrator = StreamOrchestrator::new(settings);
    let active = TutorMode::from_id_or_default(&orchestrator.settings().tutor_mode);
    let mut turns: Vec<ChatTurn> = Vec::new();

    if let Some(message) = message {
        print_suggestion(&message, active, detector);
        send_turn(&orchestrator, &mut turns, message).await?;
        return Ok(());
    }

    println!(
        "{} ready. Ctrl+C stops a reply, /exit or Ctrl+D quits.",
        persona_for(active).display_name
    );
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" || line == "/quit" {
            break;
        }

        if turns.is_empty() {
            print_suggestion(line, active, detector);
        }
        if let Err(e) = send_turn(&orchestrator, &mut turns, line.to_string()).await {
            if e.is_configuration() {
                return Err(e.into());
            }
            eprintln!("Error: {}", e);
        }
    }
    Ok(())
}

/// Stream one reply; the turn pair is only kept if the send succeeded.
async fn send_turn(
    orchestrator: &StreamOrchestrator,
    turns: &mut Vec<ChatTurn>,
    message: String,
) -> std::result::Result<(), TutorError> {
    turns.push(ChatTurn::user(message));

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = stream_reply(orchestrator, turns, &cancel).await;
    ctrl_c.abort();

    match result {
        Ok(reply) => {
            turns.push(ChatTurn::assistant(reply));
            Ok(())
        }
        Err(e) => {
            turns.pop();
            Err(e)
        }
    }
}

async fn stream_reply(
    orchestrator: &StreamOrchestrator,
    turns: &[ChatTurn],
    cancel: &CancellationToken,
) -> std::result::Result<String, TutorError> {
    let mut fragments = orchestrator
        .generate_streaming_response(turns, cancel)
        .await?;

    let mut reply = String::new();
    let mut stdout = io::stdout();
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        print!("{}", fragment);
        let _ = stdout.flush();
        reply.push_str(&fragment);
    }
    println!();

    if cancel.is_cancelled() {
        eprintln!("[reply stopped]");
    }
    Ok(reply)
}

fn print_suggestion(message: &str, active: TutorMode, detector: &DetectorConfig) {
    if let Some(suggestion) = detect_mode(message, detector) {
        if should_suggest(&suggestion, active, detector) {
            eprintln!(
                "Tip: this sounds like a job for the {} (rerun with --mode {}).",
                persona_for(suggestion.mode).display_name,
                suggestion.mode
            );
        }
    }
}

fn option_letter(index: usize) -> char {
    (b'A' + index as u8) as char
}

fn ask_question(question: &mut QuizQuestion, number: usize) -> Result<()> {
    println!("\n{}. {}", number, question.question);
    for (index, option) in question.options.iter().enumerate() {
        println!("   {}) {}", option_letter(index), option);
    }

    let stdin = io::stdin();
    loop {
        print!("Your answer (A-D): ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let selected = match line.trim().to_ascii_uppercase().as_bytes() {
            [letter @ b'A'..=b'D'] => (letter - b'A') as usize,
            _ => continue,
        };
        match question.answer(selected) {
            Some(true) => println!("Correct!"),
            Some(false) => println!(
                "Not quite. The answer is {}) {}",
                option_letter(question.correct_index),
                question.correct_option()
            ),
            None => continue,
        }
        if !question.explanation.is_empty() {
            println!("{}", question.explanation);
        }
        return Ok(());
    }
}

async fn run_quiz(settings: Settings, transcript: &Path, count: usize, interactive: bool) -> Result<()> {
    let turns = load_transcript(transcript)?;
    let generator =
        QuizGenerator::new(StreamOrchestrator::new(settings)).with_question_count(count);
    let mut questions = generator
        .generate(&turns)
        .await
        .context("Quiz generation failed")?;

    if !interactive {
        println!("{}", serde_json::to_string_pretty(&questions)?);
        return Ok(());
    }

    for (index, question) in questions.iter_mut().enumerate() {
        ask_question(question, index + 1)?;
    }
    let result = score(&questions);
    println!(
        "\nScore: {}/{} ({}%)",
        result.correct,
        result.total,
        result.percentage()
    );
    Ok(())
}

async fn run_flowchart(
    settings: Settings,
    transcript: &Path,
    conversation_id: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    let turns = load_transcript(transcript)?;
    let generator = FlowchartGenerator::new(StreamOrchestrator::new(settings));
    let graph = generator.generate(&turns, conversation_id.as_deref()).await;
    let json = graph.export_json()?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Wrote \"{}\" ({} nodes, {} edges) to {}",
                graph.title,
                graph.nodes.len(),
                graph.edges.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_detect(message: &str, settings: &Settings, detector: &DetectorConfig) {
    let active = TutorMode::from_id_or_default(&settings.tutor_mode);
    match detect_mode(message, detector) {
        Some(suggestion) => {
            println!(
                "{} (confidence {:.2}, matched: {})",
                suggestion.mode,
                suggestion.confidence,
                suggestion.matched.join(", ")
            );
            if should_suggest(&suggestion, active, detector) {
                println!("Would suggest switching from {}.", active);
            } else {
                println!("Would not suggest a switch (active mode: {}).", active);
            }
        }
        None => println!("No mode detected."),
    }
}

fn run_personas(settings: &Settings) {
    let active = TutorMode::from_id_or_default(&settings.tutor_mode);
    for persona in all_personas() {
        let marker = if persona.mode == active { "*" } else { " " };
        println!(
            "{} {:<9} {:<18} {}",
            marker, persona.mode, persona.display_name, persona.description
        );
    }
}

fn show_settings(settings: &Settings) {
    println!("provider: {}", settings.selected_provider);
    println!(
        "model:    {}",
        settings.selected_model.as_deref().unwrap_or("(vendor default)")
    );
    println!("mode:     {}", settings.tutor_mode);
    for vendor in ProviderCatalog::builtin().vendors() {
        let status = if settings.api_key(vendor.id).is_some() {
            "configured"
        } else {
            "missing"
        };
        println!("key {:<7} {}", vendor.id, status);
    }
}
