use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eeg_insight::config::AppConfig;
use eeg_insight::models::{ConversationTurn, Role, VisualizationMode};
use eeg_insight::policy::QueryPolicy;
use eeg_insight::query_log::{LogStore, DEFAULT_TOP_QUERIES};
use eeg_insight::render::{self, table};
use eeg_insight::store::TabularStore;
use eeg_insight::{init_tracing, Orchestrator, Session, TurnReport};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};

const TABLE_PREVIEW_ROWS: usize = 25;
const PICK_RADIUS_PX: f64 = 8.0;

#[derive(Parser, Debug)]
#[command(name = "eeg-insight", version, about = "Ask questions about EEG feature tables in plain language")]
struct Cli {
    /// YAML config file (defaults to $EEG_INSIGHT_CONFIG, then ./eeg-insight.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a single question and render the chosen view
    Ask {
        question: String,
        /// table, scalp3d, topomap or cluster
        #[arg(long)]
        mode: Option<String>,
        /// Pin spatial views to one result row
        #[arg(long)]
        select: Option<usize>,
        /// Directory for SVG/JSON view artifacts
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Interactive session; `:help` lists commands
    Chat,
    /// Run a read-only statement directly against the tables
    Sql { statement: String },
    /// Aggregate the file query log
    Stats {
        #[arg(long, env = "EEG_INSIGHT_STATS_TOKEN")]
        token: String,
        #[arg(long, default_value_t = DEFAULT_TOP_QUERIES)]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    if let Err(error) = init_tracing(&config.log_dir) {
        eprintln!("logging disabled: {}", error);
    }

    match cli.command {
        Command::Ask {
            question,
            mode,
            select,
            out,
        } => {
            let session = Session::open(&config).await?;
            let report = session.orchestrator().submit(&question).await?;
            print_report(&report);
            if let Some(mode) = mode {
                session.orchestrator().set_mode(parse_mode(&mode)?)?;
            }
            if let Some(index) = select {
                session.orchestrator().select_row(index)?;
            }
            show_view(session.orchestrator(), out.as_deref())?;
            session.shutdown().await;
        }
        Command::Chat => {
            let session = Session::open(&config).await?;
            chat(session.orchestrator()).await?;
            session.shutdown().await;
        }
        Command::Sql { statement } => {
            let store = TabularStore::load(&config.tables, config.query.row_limit).await?;
            let statement = QueryPolicy::new().validate(&statement)?;
            let result = store.execute(&statement).await?;
            println!("{}", table::render_table(&result, usize::MAX, None));
            store.close();
        }
        Command::Stats { token, top } => {
            let secret = config.query_log.stats_secret();
            let store = LogStore::new(config.query_log.path.clone());
            let header = format!("Bearer {}", token);
            let summary = store.summary(Some(&header), secret.as_deref(), top)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

async fn chat(orchestrator: &Orchestrator) -> Result<()> {
    println!("Ask about the EEG features. :help lists commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(command) = line.strip_prefix(':') else {
            match orchestrator.submit(line).await {
                Ok(report) => {
                    print_report(&report);
                    if let Err(error) = show_view(orchestrator, None) {
                        eprintln!("{}", error);
                    }
                }
                Err(error) => eprintln!("{}", error),
            }
            continue;
        };

        let (name, argument) = command
            .split_once(char::is_whitespace)
            .map(|(name, rest)| (name, rest.trim()))
            .unwrap_or((command, ""));
        let outcome = match name {
            "quit" | "q" => break,
            "help" => {
                println!(":mode <table|scalp3d|topomap|cluster>  :select <row>  :clear  :render <dir>  :history  :quit");
                println!("cluster view: :pan <dx> <dy>  :zoom <factor> <x> <y>  :pick <x> <y> [radius]");
                Ok(())
            }
            "pan" => parse_numbers::<2>(argument)
                .and_then(|[dx, dy]| Ok(orchestrator.pan_view(dx, dy)?))
                .and_then(|_| show_view(orchestrator, None)),
            "zoom" => parse_numbers::<3>(argument)
                .and_then(|[factor, x, y]| Ok(orchestrator.zoom_view(factor, x, y)?))
                .and_then(|_| show_view(orchestrator, None)),
            "pick" => pick(orchestrator, argument),
            "mode" => parse_mode(argument)
                .and_then(|mode| Ok(orchestrator.set_mode(mode)?))
                .and_then(|_| show_view(orchestrator, None)),
            "select" => argument
                .parse::<usize>()
                .context("expected a row number")
                .and_then(|index| Ok(orchestrator.select_row(index)?))
                .and_then(|_| show_view(orchestrator, None)),
            "clear" => orchestrator
                .clear_selection()
                .map_err(anyhow::Error::from)
                .and_then(|_| show_view(orchestrator, None)),
            "render" if !argument.is_empty() => show_view(orchestrator, Some(Path::new(argument))),
            "history" => orchestrator.history().map_err(anyhow::Error::from).map(|turns| {
                for turn in &turns {
                    print_history_line(turn);
                }
            }),
            _ => Err(anyhow::anyhow!("unknown command ':{}'", command)),
        };
        if let Err(error) = outcome {
            eprintln!("{}", error);
        }
    }
    Ok(())
}

fn pick(orchestrator: &Orchestrator, argument: &str) -> Result<()> {
    let values = argument
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .context("expected <x> <y> [radius]")?;
    let (x, y, radius) = match values.as_slice() {
        [x, y] => (*x, *y, PICK_RADIUS_PX),
        [x, y, radius] => (*x, *y, *radius),
        _ => bail!("expected <x> <y> [radius]"),
    };
    match orchestrator.select_point(x, y, radius)? {
        Some(_) => show_view(orchestrator, None),
        None => {
            println!("no point within {} px of ({}, {})", radius, x, y);
            Ok(())
        }
    }
}

fn parse_numbers<const N: usize>(raw: &str) -> Result<[f64; N]> {
    let values = raw
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("expected {} numbers", N))?;
    values
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected {} numbers", N))
}

fn parse_mode(raw: &str) -> Result<VisualizationMode> {
    match VisualizationMode::parse(raw) {
        Some(mode) => Ok(mode),
        None => bail!("unknown view '{}'; use table, scalp3d, topomap or cluster", raw),
    }
}

fn print_report(report: &TurnReport) {
    let turn = &report.turn;
    if turn.role == Role::System {
        eprintln!("{}", turn.content);
        return;
    }
    if !turn.content.is_empty() {
        println!("{}\n", turn.content);
    }
    if let Some(sql) = &turn.sql {
        println!("SQL: {}\n", sql);
    }
    if let Some(narrative) = &turn.narrative {
        println!("{}\n", narrative);
    }
}

fn show_view(orchestrator: &Orchestrator, out: Option<&Path>) -> Result<()> {
    let Some(rendered) = orchestrator.render(TABLE_PREVIEW_ROWS)? else {
        return Ok(());
    };
    println!("[{}]", rendered.mode.as_str());
    println!("{}", rendered.text);
    if let Some(dir) = out {
        for path in render::write_artifacts(dir, &rendered.artifacts)? {
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

fn print_history_line(turn: &ConversationTurn) {
    let first_line = turn.content.lines().next().unwrap_or_default();
    let rows = turn
        .result
        .as_ref()
        .map(|result| format!(" ({} rows)", result.rows.len()))
        .unwrap_or_default();
    println!(
        "{} {:<9} {}{}",
        turn.timestamp.format("%H:%M:%S"),
        turn.role.as_str(),
        first_line,
        rows
    );
}
