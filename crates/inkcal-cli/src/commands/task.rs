//! Task management commands for CLI.

use chrono::{Duration, Local};
use clap::Subcommand;
use inkcal_core::calendar::day_bounds;
use inkcal_core::{Quadrant, Task, TaskId, TaskStore};

use super::{local_hm, open_store, parse_date, parse_time, CliResult};

#[derive(Subcommand)]
pub enum TaskAction {
    /// Add a new task
    Add {
        /// Task title
        title: String,
        /// Start time (YYYY-MM-DD HH:MM or RFC 3339)
        #[arg(long)]
        start: String,
        /// End time (default: one hour after start)
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        note: Option<String>,
        /// Importance quadrant 1-4 (1 = urgent & important)
        #[arg(long)]
        importance: Option<i64>,
    },
    /// Get task details
    Get {
        /// Task ID
        id: i64,
    },
    /// Update a task
    Update {
        /// Task ID
        id: i64,
        /// New title
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        importance: Option<i64>,
        /// Set completed status
        #[arg(long)]
        completed: Option<bool>,
    },
    /// Delete a task
    Delete {
        /// Task ID
        id: i64,
    },
    /// List tasks
    List {
        /// First local date to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Last local date to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        /// Only tasks not yet completed
        #[arg(long)]
        incomplete: bool,
        /// Only tasks in this importance quadrant (1-4)
        #[arg(long)]
        importance: Option<i64>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn quadrant(level: i64) -> Result<Quadrant, String> {
    if (1..=4).contains(&level) {
        Ok(Quadrant::from_level(level))
    } else {
        Err(format!("importance must be 1-4, got {level}"))
    }
}

pub async fn run(action: TaskAction) -> CliResult {
    let store = open_store()?;
    let result = dispatch(&store, action).await;
    // flush deferred writes even if the command failed part-way
    store.shutdown().await;
    result
}

async fn dispatch(store: &TaskStore, action: TaskAction) -> CliResult {
    match action {
        TaskAction::Add {
            title,
            start,
            end,
            location,
            note,
            importance,
        } => {
            let start = parse_time(&start)?;
            let end = match end {
                Some(e) => parse_time(&e)?,
                None => start + Duration::hours(1),
            };
            let mut task = Task::new(title, start, end);
            task.location = location;
            task.note = note;
            if let Some(level) = importance {
                task.importance = quadrant(level)?;
            }

            let ticket = store.insert(task.clone())?;
            store.flush_pending().await;
            task.id = ticket.await?;
            println!("Task created: {}", task.id);
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskAction::Get { id } => match store.get_by_id(TaskId(id)).await? {
            Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
            None => return Err(format!("Task not found: {id}").into()),
        },
        TaskAction::Update {
            id,
            title,
            start,
            end,
            location,
            note,
            importance,
            completed,
        } => {
            let mut task = store
                .get_by_id(TaskId(id))
                .await?
                .ok_or(format!("Task not found: {id}"))?;

            if let Some(t) = title {
                task.title = t;
            }
            if let Some(s) = start {
                let shift = task.duration();
                task.start_time = parse_time(&s)?;
                task.end_time = task.start_time + shift;
            }
            if let Some(e) = end {
                task.end_time = parse_time(&e)?;
            }
            if let Some(l) = location {
                task.location = Some(l);
            }
            if let Some(n) = note {
                task.note = Some(n);
            }
            if let Some(level) = importance {
                task.importance = quadrant(level)?;
            }
            if let Some(c) = completed {
                task.completed = c;
            }

            let ticket = store.update(task.clone())?;
            store.flush_pending().await;
            ticket.await?;
            println!("Task updated:");
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskAction::Delete { id } => {
            if store.get_by_id(TaskId(id)).await?.is_none() {
                return Err(format!("Task not found: {id}").into());
            }
            let ticket = store.delete_by_id(TaskId(id))?;
            store.flush_pending().await;
            ticket.await?;
            println!("Task deleted: {id}");
        }
        TaskAction::List {
            from,
            to,
            incomplete,
            importance,
            json,
        } => {
            let mut tasks = match (from.as_deref(), to.as_deref()) {
                (None, None) => match importance {
                    Some(level) => store.get_by_importance(quadrant(level)?).await?,
                    None if incomplete => store.get_incomplete().await?,
                    None => store.get_all().await?,
                },
                (from, to) => {
                    let first = parse_date(from)?;
                    let last = match to {
                        Some(_) => parse_date(to)?,
                        None => first,
                    };
                    if last < first {
                        return Err(format!("--to {last} is before --from {first}").into());
                    }
                    let (start, _) = day_bounds(first, &Local);
                    let (_, end) = day_bounds(last, &Local);
                    store.get_by_range(start, end).await?
                }
            };
            if incomplete {
                tasks.retain(|t| !t.completed);
            }
            if let Some(level) = importance {
                let wanted = quadrant(level)?;
                tasks.retain(|t| t.importance == wanted);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks.");
            } else {
                for task in &tasks {
                    println!(
                        "{:>5}  {} {}-{}  [{}] {}{}",
                        task.id.0,
                        task.start_time.with_timezone(&Local).format("%Y-%m-%d"),
                        local_hm(task.start_time),
                        local_hm(task.end_time),
                        if task.completed { "x" } else { " " },
                        task.title,
                        task.location
                            .as_deref()
                            .map(|l| format!(" @ {l}"))
                            .unwrap_or_default(),
                    );
                }
            }
        }
    }
    Ok(())
}
