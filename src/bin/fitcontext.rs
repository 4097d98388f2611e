use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use fitcontext::{
    FitContext, HealthSnapshot, InsightCategory, InsightFilter, NutritionSnapshot, SnapshotField, TaskKind,
    TaskOutcome, WorkoutSnapshot,
};

#[derive(Parser)]
#[command(name = "fitcontext", about = "Daily fitness context store and insight scheduler")]
struct Cli {
    /// Data directory (default: $FITCONTEXT_DATA_DIR or ~/.fitcontext)
    #[arg(long)]
    data_dir: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store and scheduler status
    Status,
    /// Read or ingest daily snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Averages and target compliance over a recent window
    Metrics {
        /// Window length in days
        #[arg(long, default_value = "7")]
        days: u32,
        #[arg(long)]
        json: bool,
    },
    /// Monthly and yearly body-composition trends
    Trends {
        #[arg(long)]
        json: bool,
    },
    /// Browse and respond to generated insights
    Insights {
        #[command(subcommand)]
        action: InsightAction,
    },
    /// Run or inspect the background scheduler
    Scheduler {
        #[command(subcommand)]
        action: SchedulerAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Delete every snapshot and insight
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Show one day
    Get {
        /// Date (YYYY-MM-DD)
        date: String,
    },
    /// Show the last N days
    Recent {
        #[arg(long, default_value = "7")]
        days: u32,
    },
    /// Merge sections from a JSON file into one day
    Ingest {
        /// Date (YYYY-MM-DD)
        date: String,
        /// JSON object with any of `nutrition`, `health`, `workout`
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum InsightAction {
    /// List ranked insights
    List {
        /// correlation, trend, anomaly, milestone, nudge
        #[arg(long)]
        category: Option<String>,
        /// 1 (highest) to 5
        #[arg(long)]
        tier: Option<u8>,
        #[arg(long, default_value = "10")]
        limit: usize,
        /// Include dismissed insights
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show one insight in full
    Show { id: String },
    /// Record an engagement: viewed, tapped, dismissed, acted
    Engage {
        id: String,
        action: String,
        #[arg(long)]
        feedback: Option<String>,
    },
}

#[derive(Subcommand)]
enum SchedulerAction {
    /// Run the background loop until Ctrl-C
    Run,
    /// Show scheduler state
    Status,
    /// Run one task now (insights or sync)
    Trigger {
        task: String,
        /// Ignore the interval
        #[arg(long)]
        force: bool,
    },
    /// Set a task's interval in hours
    Interval { task: String, hours: u32 },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

/// File format for `snapshot ingest`.
#[derive(Deserialize)]
struct IngestFile {
    nutrition: Option<NutritionSnapshot>,
    health: Option<HealthSnapshot>,
    workout: Option<WorkoutSnapshot>,
}

impl IngestFile {
    fn into_fields(self) -> Vec<SnapshotField> {
        let mut fields = Vec::new();
        if let Some(n) = self.nutrition {
            fields.push(SnapshotField::Nutrition(n));
        }
        if let Some(h) = self.health {
            fields.push(SnapshotField::Health(h));
        }
        if let Some(w) = self.workout {
            fields.push(SnapshotField::Workout(w));
        }
        fields
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let data_dir = fitcontext::resolve_data_dir(cli.data_dir.as_deref())?;
    let mut ctx = FitContext::open(data_dir)?;

    match cli.command {
        Commands::Status => print_status(&ctx),
        Commands::Snapshot { action } => handle_snapshot(&ctx, action)?,
        Commands::Metrics { days, json } => handle_metrics(&ctx, days, json)?,
        Commands::Trends { json } => handle_trends(&ctx, json)?,
        Commands::Insights { action } => handle_insights(&ctx, action)?,
        Commands::Scheduler { action } => handle_scheduler(&ctx, action).await?,
        Commands::Config { action } => handle_config(&mut ctx, action)?,
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("Refusing to reset without --yes");
            }
            ctx.reset()?;
            println!("Context store cleared.");
        }
    }

    Ok(())
}

fn fmt_time(t: Option<chrono::DateTime<chrono::Utc>>) -> String {
    t.map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn print_status(ctx: &FitContext) {
    let stats = ctx.stats();
    let status = ctx.scheduler_status();

    println!("Context Store ({})", ctx.data_dir().display());
    println!("  Snapshots: {}", stats.snapshot_count);
    match (stats.first_date, stats.last_date) {
        (Some(first), Some(last)) => println!("  Span:      {first} to {last}"),
        _ => println!("  Span:      empty"),
    }
    println!(
        "  Insights:  {} ({} active)",
        stats.insight_count, stats.active_insight_count
    );
    println!("  Last sync: {}", fmt_time(stats.last_sync));
    println!();
    println!("Scheduler");
    println!(
        "  Insights: last {}, every {}h, {} today",
        fmt_time(status.last_insight_generation),
        status.insight_generation_interval_hours,
        status.insights_generated_today
    );
    if let Some(err) = &status.generation_error {
        println!("    error: {err}");
    }
    println!(
        "  Sync:     last {}, every {}h",
        fmt_time(status.last_hevy_sync),
        status.hevy_sync_interval_hours
    );
    if let Some(err) = &status.sync_error {
        println!("    error: {err}");
    }
}

fn handle_snapshot(ctx: &FitContext, action: SnapshotAction) -> anyhow::Result<()> {
    match action {
        SnapshotAction::Get { date } => {
            let date = fitcontext::date_util::parse_date(&date)?;
            match ctx.snapshot(date) {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => println!("No snapshot for {date}"),
            }
        }
        SnapshotAction::Recent { days } => {
            let snapshots = ctx.recent_snapshots(days);
            if snapshots.is_empty() {
                println!("No snapshots in the last {days} days");
            }
            for s in &snapshots {
                let weight = s
                    .health
                    .weight_lbs
                    .map(|w| format!("{w}lbs"))
                    .unwrap_or_else(|| "-".to_string());
                let sources: Vec<&str> = s.sources_synced.iter().map(|src| src.as_str()).collect();
                println!(
                    "{}  {:>5}cal {:>4}g protein  {:>8}  {} workouts  [{}]",
                    s.date,
                    s.nutrition.calories,
                    s.nutrition.protein,
                    weight,
                    s.workout.workout_count,
                    sources.join(", ")
                );
            }
        }
        SnapshotAction::Ingest { date, file } => {
            let date = fitcontext::date_util::parse_date(&date)?;
            let payload: IngestFile = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let snapshot = ctx.ingest_day(date, payload.into_fields())?;
            let sources: Vec<&str> = snapshot.sources_synced.iter().map(|s| s.as_str()).collect();
            println!("Updated {date} (sources: {})", sources.join(", "));
        }
    }
    Ok(())
}

fn handle_metrics(ctx: &FitContext, days: u32, json: bool) -> anyhow::Result<()> {
    let summary = ctx.context_summary(days);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Last {days} days ({} snapshots)", summary.snapshot_count);
    let Some(avg) = &summary.averages else {
        println!("  No data.");
        return Ok(());
    };
    println!(
        "  Nutrition: {}cal, {}g protein, {}g carbs, {}g fat ({} days tracked)",
        avg.avg_calories, avg.avg_protein, avg.avg_carbs, avg.avg_fat, avg.nutrition_days
    );
    if let Some(weight) = avg.avg_weight {
        let change = avg
            .weight_change
            .map(|c| format!(" ({c:+.1})"))
            .unwrap_or_default();
        println!("  Weight:    {weight}lbs{change}");
    }
    if let Some(sleep) = avg.avg_sleep {
        println!("  Sleep:     {sleep}h");
    }
    println!("  Steps:     {}", avg.avg_steps);
    println!(
        "  Workouts:  {} ({}kg avg volume)",
        avg.total_workouts, avg.avg_volume_per_workout
    );
    if let Some(c) = &summary.compliance {
        println!(
            "  Compliance: protein {:.0}% of days (target {}g), calories {:.0}% (target {})",
            c.protein_compliance * 100.0,
            summary.targets.protein,
            c.calorie_compliance * 100.0,
            summary.targets.calories
        );
    }
    Ok(())
}

fn handle_trends(ctx: &FitContext, json: bool) -> anyhow::Result<()> {
    let report = ctx.body_comp_trends();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (label, trends) in [("Monthly", &report.monthly), ("Yearly", &report.yearly)] {
        println!("{label}");
        if trends.is_empty() {
            println!("  Not enough readings.");
            continue;
        }
        for (name, trend) in [
            ("Weight", &trends.weight),
            ("Body fat", &trends.body_fat),
            ("Lean mass", &trends.lean_mass),
        ] {
            if let Some(t) = trend {
                println!(
                    "  {name:<10} {} ({:+.1}, {}, {} readings)",
                    t.current,
                    t.change,
                    t.direction.as_str(),
                    t.readings
                );
            }
        }
    }
    if let Some(rate) = ctx.weight_rate_per_30_days(90) {
        println!("Weight rate (90d regression): {rate:+.1}lbs per 30 days");
    }
    Ok(())
}

fn handle_insights(ctx: &FitContext, action: InsightAction) -> anyhow::Result<()> {
    match action {
        InsightAction::List {
            category,
            tier,
            limit,
            all,
            json,
        } => {
            let filter = InsightFilter {
                category: category
                    .as_deref()
                    .map(str::parse::<InsightCategory>)
                    .transpose()?,
                tier,
                include_dismissed: all,
            };
            let insights = ctx.insights(&filter, limit);
            if json {
                println!("{}", serde_json::to_string_pretty(&insights)?);
            } else if insights.is_empty() {
                println!("No insights.");
            } else {
                for i in &insights {
                    let dismissed = if i.is_dismissed() { " (dismissed)" } else { "" };
                    println!(
                        "  [{}] T{} {:.2}  {}{dismissed}",
                        i.category,
                        i.tier,
                        i.score(),
                        i.title
                    );
                    println!("    {}", i.id);
                }
            }
        }
        InsightAction::Show { id } => {
            let insight = ctx
                .insight(&id)
                .ok_or_else(|| anyhow::anyhow!("No insight with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&insight)?);
        }
        InsightAction::Engage {
            id,
            action,
            feedback,
        } => {
            let action: fitcontext::Engagement = action.parse()?;
            let insight = ctx.record_engagement(&id, action, feedback)?;
            println!("Recorded {action} on \"{}\".", insight.title);
        }
    }
    Ok(())
}

async fn handle_scheduler(ctx: &FitContext, action: SchedulerAction) -> anyhow::Result<()> {
    match action {
        SchedulerAction::Run => {
            let handle = ctx.start_scheduler()?;
            eprintln!("Scheduler running. Press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;
            eprintln!("Stopping...");
            handle.stop().await;
        }
        SchedulerAction::Status => {
            println!("{}", serde_json::to_string_pretty(&ctx.scheduler_status())?);
        }
        SchedulerAction::Trigger { task, force } => {
            let kind: TaskKind = task.parse()?;
            let outcome = ctx.trigger(kind, force).await;
            println!("{kind}: {outcome}");
            if let TaskOutcome::Failed { .. } = outcome {
                std::process::exit(1);
            }
        }
        SchedulerAction::Interval { task, hours } => {
            let kind: TaskKind = task.parse()?;
            ctx.set_interval(kind, hours).await?;
            println!("{kind} now runs every {hours}h.");
        }
    }
    Ok(())
}

fn handle_config(ctx: &mut FitContext, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match ctx.settings().get(&key)? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            ctx.set_setting(&key, &value)?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            for (k, v) in ctx.settings().list() {
                println!("{k} = {v}");
            }
        }
    }
    Ok(())
}
