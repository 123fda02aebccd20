mod args;
mod board;

use clap::Parser;
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::args::{Args, Command};
use crate::board::config_reader::*;
use crate::board::session::*;
use crate::board::store::StoreError;
use crate::board::summary::build_summary_js;
use crate::board::*;
use credit_ledger::batch::{BatchReport, RecordOutcome};
use credit_ledger::*;

fn print_report(
    session: &Session,
    report: &BatchReport<PlayerId, StoreError>,
) -> BoardResult<()> {
    let state = session.state()?;
    for (pid, outcome) in report.outcomes() {
        let name = state
            .snapshot
            .player(*pid)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| pid.to_string());
        match outcome {
            RecordOutcome::Applied => println!("{:<20} applied", name),
            RecordOutcome::Failed(e) => println!("{:<20} failed: {}", name, e),
            RecordOutcome::Skipped => println!("{:<20} skipped", name),
        }
    }
    Ok(())
}

fn run(args: &Args) -> BoardResult<()> {
    let (config, root) = match &args.config {
        Some(path) => {
            let p = Path::new(path.as_str());
            let root = p.parent().map(Path::to_path_buf).unwrap_or_default();
            (read_config(p)?, root)
        }
        None => (BoardConfig::in_memory(), PathBuf::from(".")),
    };
    let mut settings = validate_settings(&config.rules)?;
    if let Command::Log { limit: Some(limit) } = &args.command {
        settings.log_limit = *limit;
    }

    let provider = args.store.clone().unwrap_or_else(|| config.store.provider.clone());
    let file_path = args.path.clone().or_else(|| config.store.file_path.clone());
    let store = open_store(&provider, file_path.as_deref(), &root)?;
    let session = Session::open(store, settings)?;
    debug!("run: {:?} on {} store", args.command, provider);

    match &args.command {
        Command::Players => {
            for p in session.state()?.snapshot.players {
                println!(
                    "{:<20} {:>4} credits left",
                    p.name,
                    remaining_credits(&p.allocations)
                );
            }
        }
        Command::AddPlayer { name } => {
            let pid = session.add_player(name)?;
            println!("added player {}", pid);
        }
        Command::AddCharacter { name } => {
            let cid = session.add_character(name)?;
            println!("added character {}", cid);
        }
        Command::Vote {
            player,
            character,
            delta,
        } => {
            session.select_player_by_name(player)?;
            let cid = session.character_id(character)?;
            let applied = session.vote(cid, *delta)?;
            println!(
                "{} on {}: {} -> {} ({} credits left)",
                player,
                character,
                applied.previous_weight,
                applied.weight,
                remaining_credits(&applied.allocations)
            );
        }
        Command::Ranking { own, player } => {
            if let Some(name) = player {
                session.select_player_by_name(name)?;
            }
            if *own {
                session.set_ranking_mode(RankingMode::OwnScore)?;
            }
            for row in session.ranking()? {
                match row.own_score {
                    Some(weight) if *own => println!(
                        "{:>3}. {:<20} {:>5} (total {})",
                        row.rank, row.name, weight, row.total_score
                    ),
                    _ => println!("{:>3}. {:<20} {:>5}", row.rank, row.name, row.total_score),
                }
            }
        }
        Command::Favorites => {
            let show = |x: &Option<(String, i64)>| match x {
                Some((name, weight)) => format!("{} ({})", name, weight),
                None => "None".to_string(),
            };
            for row in session.favorites()? {
                println!(
                    "{:<20} favorite: {:<24} least favorite: {}",
                    row.player,
                    show(&row.favorite),
                    show(&row.least_favorite)
                );
            }
        }
        Command::Log { .. } => {
            for e in session.state()?.log {
                println!(
                    "{}  {:<20} {:<20} {:>+5}",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    e.player_name,
                    e.character_name,
                    e.amount
                );
            }
        }
        Command::Reset => {
            let report = session.reset_allocations()?;
            print_report(&session, &report)?;
            check_batch("reset", &report, &session.state()?.snapshot)?;
        }
        Command::Withdraw { character } => {
            let cid = session.character_id(character)?;
            let report = session.withdraw_character(cid)?;
            print_report(&session, &report)?;
            check_batch("withdraw", &report, &session.state()?.snapshot)?;
        }
        Command::Summary { out } => {
            let board_name = config.board_name.clone().unwrap_or_else(|| "board".to_string());
            let js = build_summary_js(
                &board_name,
                &session.state()?,
                &session.ranking()?,
                &session.favorites()?,
            );
            write_json(out, &js)?;
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    info!("args: {:?}", args);

    if let Err(e) = run(&args) {
        eprintln!("An error occured: {}", e);
        std::process::exit(1);
    }
}
