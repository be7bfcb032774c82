pub mod daemon_path;
pub mod process;
pub mod report;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::{Local, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use process::{restart_server, stop_server};
use report::{process_report_command, ReportCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    engine::{
        error::EngineError,
        rules::{ActivityRule, DurationCondition, Rating, RuleDraft, RulePredicate, TitleCondition},
        start_engine, EngineOptions, DEFAULT_USER,
    },
    storage::{
        category_store::{CategoryIndex, CategoryStore},
        entry_store::{TimeEntryStore, TimeEntryStoreImpl},
        rule_store::{RuleStore, RuleStoreImpl},
    },
    utils::{
        clock::SystemClock,
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
        time::format_duration,
    },
};

#[derive(Parser, Debug)]
#[command(name = "Focustrack", version, long_about = None)]
#[command(about = "Activity classifier with focus sessions and distraction blocking", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts the engine daemon for the application")]
    Init {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
    },
    #[command(
        about = "Run the engine directly in current console. Used for creating a daemon internally and for debugging"
    )]
    Serve {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
        #[arg(long, help = "Open a focus session as soon as the engine is up")]
        focus: bool,
        #[arg(long, help = "Description for the opened focus session")]
        description: Option<String>,
        #[arg(long = "target-minutes", help = "Target duration for the opened focus session")]
        target_minutes: Option<i64>,
        #[arg(long = "no-blocking", help = "Don't raise blocking prompts for distractions")]
        no_blocking: bool,
    },
    #[command(about = "Stop currently running engine daemon.")]
    Stop {},
    #[command(about = "Manage classification rules")]
    Rule {
        #[command(subcommand)]
        command: RuleCommands,
    },
    #[command(about = "Manage categories and their activity assignments")]
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },
    #[command(about = "Display time per category plus verdict totals")]
    Report {
        #[command(flatten)]
        command: ReportCommand,
    },
    #[command(about = "Inspect focus sessions")]
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Debug, clap::Args)]
struct RuleFields {
    #[arg(long = "title-condition", help = "How to compare the window title")]
    title_condition: Option<TitleCondition>,
    #[arg(long, help = "Title text the condition compares against")]
    title: Option<String>,
    #[arg(
        long = "duration-condition",
        help = "How to compare the sample duration"
    )]
    duration_condition: Option<DurationCondition>,
    #[arg(long, help = "Duration in seconds the condition compares against")]
    duration: Option<i64>,
    #[arg(long = "app", help = "Application name or bundle id to match")]
    app_name: Option<String>,
    #[arg(long, help = "Domain to match, for example youtube.com")]
    domain: Option<String>,
    #[arg(long, help = "Create the rule disabled")]
    inactive: bool,
}

impl RuleFields {
    fn into_draft(self, name: String, rating: Option<Rating>) -> RuleDraft {
        RuleDraft {
            name,
            title_condition: self.title_condition,
            title: self.title,
            duration_condition: self.duration_condition,
            duration: self.duration,
            app_name: self.app_name,
            domain: self.domain,
            rating,
            active: !self.inactive,
        }
    }
}

#[derive(Subcommand, Debug)]
enum RuleCommands {
    #[command(about = "Create a rule. A rule needs at least one predicate")]
    Add {
        name: String,
        #[arg(long, help = "Verdict the rule assigns")]
        rating: Rating,
        #[command(flatten)]
        fields: RuleFields,
    },
    #[command(about = "List all rules in matching order")]
    List {},
    #[command(about = "Replace a rule, keeping its place in matching order")]
    Update {
        id: u64,
        name: String,
        #[arg(long, help = "Verdict the rule assigns")]
        rating: Rating,
        #[command(flatten)]
        fields: RuleFields,
    },
    #[command(about = "Delete a rule")]
    Delete { id: u64 },
}

#[derive(Subcommand, Debug)]
enum CategoryCommands {
    #[command(about = "Create a category, optionally under a parent")]
    Add {
        name: String,
        #[arg(long, help = "Id of the parent category")]
        parent: Option<u64>,
    },
    #[command(about = "List all categories")]
    List {},
    #[command(about = "Point an activity signature (domain or app name) at a category")]
    Assign { signature: String, category_id: u64 },
}

#[derive(Subcommand, Debug)]
enum SessionCommands {
    #[command(about = "Show the currently open session, if any")]
    Status {},
    #[command(about = "List completed sessions")]
    History {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(
        CLI_PREFIX,
        &create_application_default_path()?,
        logging_level,
        args.log,
    )?;

    match args.commands {
        Commands::Init { .. } => {
            restart_server()?;
            Ok(())
        }
        Commands::Stop {} => {
            stop_server();
            Ok(())
        }
        Commands::Serve {
            dir,
            focus,
            description,
            target_minutes,
            no_blocking,
        } => {
            let dir = dir.map_or_else(create_application_default_path, Ok)?;
            start_engine(
                dir,
                EngineOptions {
                    start_focus_session: focus,
                    focus_description: description.map(Into::into),
                    focus_target_seconds: target_minutes.map(|v| v * 60),
                    blocking_enabled: !no_blocking,
                },
            )
            .await?;
            Ok(())
        }
        Commands::Rule { command } => process_rule_command(command).await,
        Commands::Category { command } => process_category_command(command).await,
        Commands::Report { command } => process_report_command(command).await,
        Commands::Session { command } => process_session_command(command).await,
    }
}

async fn process_rule_command(command: RuleCommands) -> Result<()> {
    let dir = create_application_default_path()?;
    let store = RuleStoreImpl::new(dir, Arc::new(SystemClock))?;

    match command {
        RuleCommands::Add {
            name,
            rating,
            fields,
        } => {
            let rule = store
                .create(DEFAULT_USER, fields.into_draft(name, Some(rating)))
                .await
                .map_err(surface_malformed_rule)?;
            println!("Created rule {}", rule.id);
            print_rule(&rule);
            Ok(())
        }
        RuleCommands::List {} => {
            let mut rules = store.list(DEFAULT_USER).await?;
            rules.sort_by_key(|rule| (rule.created_at, rule.id));
            for rule in rules {
                print_rule(&rule);
            }
            Ok(())
        }
        RuleCommands::Update {
            id,
            name,
            rating,
            fields,
        } => {
            let rule = store
                .update(DEFAULT_USER, id, fields.into_draft(name, Some(rating)))
                .await
                .map_err(surface_malformed_rule)?;
            print_rule(&rule);
            Ok(())
        }
        RuleCommands::Delete { id } => {
            if store.delete(DEFAULT_USER, id).await? {
                println!("Deleted rule {id}");
            } else {
                println!("No rule with id {id}");
            }
            Ok(())
        }
    }
}

/// Malformed drafts are user input problems, shown the way clap shows
/// validation failures.
fn surface_malformed_rule(error: anyhow::Error) -> anyhow::Error {
    match error.downcast_ref::<EngineError>() {
        Some(EngineError::MalformedRule(message)) => Args::command()
            .error(clap::error::ErrorKind::ValueValidation, message)
            .into(),
        _ => error,
    }
}

fn print_rule(rule: &ActivityRule) {
    let predicates = rule
        .predicates
        .iter()
        .map(describe_predicate)
        .collect::<Vec<_>>()
        .join(" and ");
    let state = if rule.active { "" } else { " (inactive)" };
    println!(
        "{}\t{}\t{}\t{}{}",
        rule.id, rule.name, rule.rating, predicates, state
    );
}

fn describe_predicate(predicate: &RulePredicate) -> String {
    match predicate {
        RulePredicate::Title { condition, needle } => {
            format!("title {condition:?} \"{needle}\"")
        }
        RulePredicate::Duration { condition, seconds } => {
            format!("duration {condition:?} {seconds}s")
        }
        RulePredicate::App { name } => format!("app is \"{name}\""),
        RulePredicate::Domain { domain } => format!("domain is {domain}"),
    }
}

async fn process_category_command(command: CategoryCommands) -> Result<()> {
    let dir = create_application_default_path()?;
    let store = CategoryStore::new(dir)?;

    match command {
        CategoryCommands::Add { name, parent } => {
            let category = store.add_category(&name, parent).await?;
            println!("Created category {} {}", category.id, category.name);
            Ok(())
        }
        CategoryCommands::List {} => {
            let index = CategoryIndex::load(&store).await?;
            for category in store.categories().await? {
                let path = index
                    .path_for(category.id)
                    .iter()
                    .map(|c| c.name.to_string())
                    .collect::<Vec<_>>()
                    .join(" / ");
                println!("{}\t{}", category.id, path);
            }
            Ok(())
        }
        CategoryCommands::Assign {
            signature,
            category_id,
        } => {
            store.assign(&signature, category_id).await?;
            println!("Assigned {signature} to category {category_id}");
            Ok(())
        }
    }
}

async fn process_session_command(command: SessionCommands) -> Result<()> {
    let dir = create_application_default_path()?;
    let store = TimeEntryStoreImpl::new(dir)?;

    match command {
        SessionCommands::Status {} => {
            match store.get_open(DEFAULT_USER).await? {
                Some(entry) => {
                    let elapsed = (Utc::now() - entry.start_time).num_seconds().max(0);
                    println!(
                        "Open session {} since {}",
                        entry.id,
                        entry.start_time.with_timezone(&Local).format("%x %H:%M:%S")
                    );
                    if let Some(description) = &entry.description {
                        println!("Description: {description}");
                    }
                    match entry.target_duration_seconds {
                        Some(target) => println!("{elapsed}s of {target}s elapsed"),
                        None => println!("{elapsed}s elapsed"),
                    }
                }
                None => println!("No open session"),
            }
            Ok(())
        }
        SessionCommands::History {} => {
            for entry in store.history(DEFAULT_USER).await? {
                if entry.is_open() {
                    continue;
                }
                let duration = chrono::Duration::seconds(entry.duration_seconds.unwrap_or(0));
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.start_time.with_timezone(&Local).format("%x %H:%M:%S"),
                    format_duration(duration),
                    if entry.is_focus_mode { "focus" } else { "plain" },
                    entry.description.as_deref().unwrap_or(""),
                );
            }
            Ok(())
        }
    }
}
