use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use momento::annotate::{Orchestrator, RunOutcome};
use momento::config::Config;
use momento::db::Database;
use momento::logging;

enum Command {
    Add(PathBuf),
    Run(i64),
    Show(i64),
    Alias { alias: String, canonical: String },
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("momento {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    match parse_command(&positional) {
        Ok(command) => Args {
            config_path,
            command,
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    }
}

fn parse_command(positional: &[String]) -> Result<Command> {
    let parse_id = |s: &str| -> Result<i64> {
        s.parse()
            .with_context(|| format!("invalid photo id: {}", s))
    };

    match positional {
        [cmd, path] if cmd == "add" => Ok(Command::Add(PathBuf::from(path))),
        [cmd, id] if cmd == "run" => Ok(Command::Run(parse_id(id)?)),
        [cmd, id] if cmd == "show" => Ok(Command::Show(parse_id(id)?)),
        [cmd, alias, canonical] if cmd == "alias" => Ok(Command::Alias {
            alias: alias.clone(),
            canonical: canonical.clone(),
        }),
        [] => bail!("missing command"),
        other => bail!("unrecognized command: {}", other.join(" ")),
    }
}

fn print_help() {
    println!(
        r#"momento - photo annotation pipeline

USAGE:
    momento [OPTIONS] <COMMAND>

COMMANDS:
    add <IMAGE>                 Register an image as a new photo and annotate it
    run <PHOTO_ID>              Annotate a pending photo in the foreground
    show <PHOTO_ID>             Print a photo's annotation status, caption and tags
    alias <ALIAS> <CANONICAL>   Map a tag alias onto a canonical tag name

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    MOMENTO_CONFIG      Path to config file (overrides default location)
    MOMENTO_LOG         Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/momento/config.toml

With pipeline.runner = "queue", `add` only queues the photo; run
momento-daemon to process the queue."#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(None);

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    db.initialize().context("Failed to initialize database")?;

    match args.command {
        Command::Add(path) => add(&db, &config, path),
        Command::Run(id) => run(&db, &config, id),
        Command::Show(id) => show(&db, id),
        Command::Alias { alias, canonical } => {
            db.add_alias(&alias, &canonical)?;
            println!("{} -> {}", alias.trim(), canonical.trim());
            Ok(())
        }
    }
}

fn add(db: &Database, config: &Config, path: PathBuf) -> Result<()> {
    if !path.is_file() {
        bail!("{} is not a file", path.display());
    }
    let path = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", path.display()))?;

    let photo_id = db.insert_photo(&path)?;
    println!("Registered photo {} ({})", photo_id, path.display());

    let orchestrator = Orchestrator::from_config(db.clone(), config);
    orchestrator.submit(photo_id, &path);
    orchestrator.finish();
    if orchestrator.runner_name() == "queue" {
        println!("Queued for momento-daemon");
    }

    show(db, photo_id)
}

fn run(db: &Database, config: &Config, photo_id: i64) -> Result<()> {
    let photo = db
        .get_photo(photo_id)?
        .with_context(|| format!("No photo with id {}", photo_id))?;

    let orchestrator = Orchestrator::from_config(db.clone(), config);
    match orchestrator.run(photo_id, &PathBuf::from(&photo.storage_path)) {
        RunOutcome::Skipped => println!(
            "Photo {} is {}, nothing to do",
            photo_id, photo.ai_status
        ),
        RunOutcome::Completed { source } => {
            println!("Photo {} annotated from {} analysis", photo_id, source.as_str())
        }
        RunOutcome::Failed { error } => println!("Photo {} failed: {}", photo_id, error),
    }

    show(db, photo_id)
}

fn show(db: &Database, photo_id: i64) -> Result<()> {
    let photo = db
        .get_photo(photo_id)?
        .with_context(|| format!("No photo with id {}", photo_id))?;

    println!("Photo {}: {}", photo.id, photo.storage_path);
    println!("  status:  {}", photo.ai_status);
    if let Some(caption) = &photo.caption {
        println!("  caption: {}", caption);
    }
    if !photo.dominant_colors.is_empty() {
        println!("  colors:  {}", photo.dominant_colors.join(" "));
    }
    if let Some(error) = &photo.ai_error {
        println!("  error:   {}", error);
    }

    let tags = db.get_photo_tags(photo_id)?;
    if !tags.is_empty() {
        println!("  tags:");
        for tag in tags {
            println!(
                "    {:<20} {:>4.2}  {} ({})",
                tag.tag.name,
                tag.confidence,
                tag.source.as_str(),
                tag.tag.category
            );
        }
    }

    Ok(())
}
