//! planner: command-line front end for the planner sync layer.
//!
//! Every invocation resumes the persisted identity, loads its data from the
//! remote directory, applies one command and pushes pending edits before
//! exiting.

use anyhow::{Result, bail};
use chrono::{Local, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use planner_cli::app::{self, CliSession, PlannerDirs};
use planner_sync::config::DEFAULT_DEBOUNCE_MS;
use planner_sync::model::{
    NewTask, Quadrant, QuestKind, Rating, ScheduleKind, ShopItem, SlotKey, Theme, TimeBlock,
};
use planner_sync::{Identity, SyncConfig, SyncStatus};

#[derive(Parser, Debug)]
#[command(name = "planner")]
#[command(about = "Planner with remote sync")]
struct Args {
    /// Directory for local storage (default: ~/.planner)
    #[arg(long, env = "PLANNER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory standing in for the remote database (default: <data-dir>/remote)
    #[arg(long, env = "PLANNER_REMOTE_DIR")]
    remote_dir: Option<PathBuf>,

    /// Quiet period before edits are pushed, in milliseconds
    #[arg(long, env = "PLANNER_DEBOUNCE_MS", default_value_t = DEFAULT_DEBOUNCE_MS)]
    debounce_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and load your data
    Login {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Stay logged in across sessions
        #[arg(long)]
        remember: bool,
    },
    /// Log out and forget local state
    Logout,
    #[command(flatten)]
    Planner(PlannerCommand),
}

/// Commands that need a logged-in identity.
#[derive(Subcommand, Debug)]
enum PlannerCommand {
    /// Show the current identity
    Whoami,
    /// Summary of the live snapshot and sync status
    Status,
    /// Push everything now
    Sync,
    #[command(subcommand)]
    Task(TaskCommand),
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    #[command(subcommand)]
    Card(CardCommand),
    #[command(subcommand)]
    Quest(QuestCommand),
    #[command(subcommand)]
    Shop(ShopCommand),
    /// Write the reflection for a day
    Reflect {
        text: String,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show or change settings
    Settings {
        #[arg(long)]
        theme: Option<Theme>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        sound: Option<bool>,
        #[arg(long)]
        notifications: Option<bool>,
        /// Daily reminder time, e.g. 20:30:00
        #[arg(long)]
        reminder: Option<NaiveTime>,
    },
    /// Write a JSON backup of the snapshot
    Export {
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    Add {
        title: String,
        #[arg(long, default_value = "do-first")]
        quadrant: Quadrant,
        #[arg(long)]
        effort: Option<u32>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        purpose: Option<String>,
        #[arg(long)]
        priority: bool,
    },
    Toggle {
        id: String,
    },
    Delete {
        id: String,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum ScheduleCommand {
    /// Put a block in a slot, e.g. `Tue-9-30`
    Assign {
        slot: SlotKey,
        label: String,
        #[arg(long, default_value = "focus")]
        category: String,
        /// Link the block to a task
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        minutes: Option<u32>,
        /// Use the current week instead of the ideal one
        #[arg(long)]
        current: bool,
    },
    Clear {
        slot: SlotKey,
        #[arg(long)]
        current: bool,
    },
    Show {
        #[arg(long)]
        current: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CardCommand {
    Add { question: String, answer: String },
    Review { id: String, rating: Rating },
    Delete { id: String },
    /// Cards due for review
    Due,
}

#[derive(Subcommand, Debug)]
enum QuestCommand {
    Set { kind: QuestKind, title: String },
    Toggle { kind: QuestKind },
    Show,
}

#[derive(Subcommand, Debug)]
enum ShopCommand {
    List,
    Add {
        title: String,
        #[arg(long)]
        cost: u32,
        #[arg(long, default_value = "gift")]
        icon: String,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        id: String,
    },
    Redeem {
        id: String,
    },
}

fn schedule_kind(current: bool) -> ScheduleKind {
    if current {
        ScheduleKind::Current
    } else {
        ScheduleKind::Ideal
    }
}

fn check(done: bool) -> &'static str {
    if done { "x" } else { " " }
}

async fn run(session: &mut CliSession, command: Command) -> Result<()> {
    match command {
        Command::Login {
            name,
            email,
            remember,
        } => {
            let identity = session.login(&name, &email, remember).await?;
            println!("Logged in as {} <{}>", identity.name, identity.email);
            Ok(())
        }
        Command::Logout => {
            session.logout().await?;
            println!("Logged out");
            Ok(())
        }
        Command::Planner(command) => {
            let Some(identity) = session.start().await? else {
                bail!("Not logged in. Run `planner login --name <NAME> --email <EMAIL>` first.");
            };
            run_planner(session, &identity, command).await
        }
    }
}

async fn run_planner(
    session: &CliSession,
    identity: &Identity,
    command: PlannerCommand,
) -> Result<()> {
    let store = session.store();
    let now = Utc::now();

    match command {
        PlannerCommand::Whoami => println!("{} <{}>", identity.name, identity.email),

        PlannerCommand::Status => {
            let snapshot = store.snapshot();
            let done = snapshot.tasks.iter().filter(|t| t.completed).count();
            println!("{} ({} points)", snapshot.name, snapshot.points);
            println!("Tasks: {}/{} done", done, snapshot.tasks.len());
            println!("Cards due: {}", snapshot.due_flashcards(now).count());
            println!("Reflections: {}", snapshot.reflections.len());
            println!("Sync: {}", session.status());
        }

        PlannerCommand::Sync => {
            let report = session.sync_now().await?;
            println!(
                "Pushed {} unit(s), {} failed, {} stale row(s) removed in {}ms",
                report.succeeded(),
                report.failed(),
                report.deleted(),
                report.duration_ms
            );
        }

        PlannerCommand::Task(command) => match command {
            TaskCommand::Add {
                title,
                quadrant,
                effort,
                tags,
                purpose,
                priority,
            } => {
                let id = store.add_task(
                    NewTask {
                        effort,
                        tags,
                        purpose,
                        priority,
                        ..NewTask::new(title, quadrant)
                    },
                    now,
                );
                println!("{}", id);
            }
            TaskCommand::Toggle { id } => match store.toggle_task(&id) {
                Some(balance) => println!("Balance: {} points", balance),
                None => warn!("No task with id {}", id),
            },
            TaskCommand::Delete { id } => {
                if !store.delete_task(&id) {
                    warn!("No task with id {}", id);
                }
            }
            TaskCommand::List => store.read(|s| {
                for task in &s.tasks {
                    println!(
                        "[{}] {} {:?} (effort {}) {}",
                        check(task.completed),
                        task.id,
                        task.quadrant,
                        task.effort,
                        task.title
                    );
                }
            }),
        },

        PlannerCommand::Schedule(command) => match command {
            ScheduleCommand::Assign {
                slot,
                label,
                category,
                task,
                minutes,
                current,
            } => store.assign_slot(
                schedule_kind(current),
                slot,
                TimeBlock {
                    category,
                    label,
                    task_id: task,
                    duration_minutes: minutes,
                },
            ),
            ScheduleCommand::Clear { slot, current } => {
                if !store.clear_slot(schedule_kind(current), slot) {
                    debug!("Slot {} was already empty", slot);
                }
            }
            ScheduleCommand::Show { current } => store.read(|s| {
                for (slot, block) in s.schedule.slots(schedule_kind(current)) {
                    println!("{:<9} {} [{}]", slot.to_string(), block.label, block.category);
                }
            }),
        },

        PlannerCommand::Card(command) => match command {
            CardCommand::Add { question, answer } => {
                println!("{}", store.add_flashcard(question, answer, now));
            }
            CardCommand::Review { id, rating } => match store.review_flashcard(&id, rating, now) {
                Some(card) => println!(
                    "Next review in {} day(s), on {}",
                    card.interval_days,
                    card.next_review.with_timezone(&Local).date_naive()
                ),
                None => warn!("No card with id {}", id),
            },
            CardCommand::Delete { id } => {
                if !store.delete_flashcard(&id) {
                    warn!("No card with id {}", id);
                }
            }
            CardCommand::Due => store.read(|s| {
                for card in s.due_flashcards(now) {
                    println!("{} {}", card.id, card.question);
                }
            }),
        },

        PlannerCommand::Quest(command) => match command {
            QuestCommand::Set { kind, title } => store.set_quest(kind, title),
            QuestCommand::Toggle { kind } => {
                store.toggle_quest(kind);
            }
            QuestCommand::Show => store.read(|s| {
                for kind in [QuestKind::Work, QuestKind::Health, QuestKind::Relationship] {
                    let quest = s.daily_quests.get(kind);
                    println!("[{}] {:?}: {}", check(quest.completed), kind, quest.title);
                }
            }),
        },

        PlannerCommand::Shop(command) => match command {
            ShopCommand::List => store.read(|s| {
                for item in &s.shop_items {
                    println!("{:<20} {:>4} pts  {}", item.id, item.cost, item.title);
                }
                println!("Balance: {} points", s.points);
            }),
            ShopCommand::Add {
                title,
                cost,
                icon,
                description,
            } => {
                let id = uuid::Uuid::new_v4().to_string();
                store.add_shop_item(ShopItem {
                    id: id.clone(),
                    title,
                    cost: cost.max(1),
                    icon,
                    description,
                    is_default: false,
                });
                println!("{}", id);
            }
            ShopCommand::Delete { id } => {
                if !store.delete_shop_item(&id) {
                    warn!("No reward with id {}", id);
                }
            }
            ShopCommand::Redeem { id } => {
                let balance = store.redeem_reward(&id)?;
                println!("Enjoy! Balance: {} points", balance);
            }
        },

        PlannerCommand::Reflect { text, date } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            store.save_reflection(date, serde_json::json!({ "text": text }));
        }

        PlannerCommand::Settings {
            theme,
            language,
            sound,
            notifications,
            reminder,
        } => {
            let settings = session.update_settings(|s| {
                if let Some(theme) = theme {
                    s.theme = theme;
                }
                if let Some(language) = language {
                    s.language = language;
                }
                if let Some(sound) = sound {
                    s.sound_enabled = sound;
                }
                if let Some(notifications) = notifications {
                    s.notifications_enabled = notifications;
                }
                if reminder.is_some() {
                    s.reminder_time = reminder;
                }
            })?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }

        PlannerCommand::Export { out } => {
            let path = app::write_export(session, &out).await?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout is for command output.
    let default_filter = if args.verbose {
        "debug,planner=debug"
    } else {
        "info,planner=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let dirs = PlannerDirs::resolve(args.data_dir, args.remote_dir)?;
    debug!("Data dir: {:?}, remote dir: {:?}", dirs.data, dirs.remote);

    let mut session = app::open_session(&dirs, SyncConfig::with_debounce_ms(args.debounce_ms));
    let engine = Arc::clone(session.engine());
    let _events = args.verbose.then(|| app::trace_events(&session));

    let result = run(&mut session, args.command).await;

    // Push whatever the command left pending before the process exits.
    session.shutdown().await;
    if let SyncStatus::Error(message) = engine.status() {
        warn!("Sync problem: {}", message);
    }
    info!("Done");

    result
}
