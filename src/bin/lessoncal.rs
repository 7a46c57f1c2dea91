use anyhow::Result;
use chrono::Utc;
use lessoncal::cli::{self, Args, Command};
use lessoncal::client::{CalDavSource, CalendarSource};
use lessoncal::config::Config;
use lessoncal::context::{AppContext, StandardContext};
use lessoncal::directory::{LessonDirectory, LocalDirectory};
use lessoncal::jobs::JobContext;
use lessoncal::ledger::LocalLedger;
use lessoncal::logging;
use lessoncal::model::RecurrenceEngine;
use lessoncal::notifier::{self, Notifier};
use lessoncal::poller::Poller;
use lessoncal::runner::{LocalRunner, RetryPolicy};
use lessoncal::scheduler::Scheduler;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::parse(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    if args.command == Command::Help {
        cli::print_help("lessoncal");
        return Ok(());
    }

    let ctx = StandardContext::new(args.root.clone());
    let config = Config::load(&ctx);
    let level = config
        .as_ref()
        .map(Config::log_level)
        .unwrap_or(log::LevelFilter::Info);
    logging::init(&ctx, level)?;

    match args.command {
        Command::Students => {
            let dir = LocalDirectory::open(&ctx)?;
            for s in dir.list_students()? {
                println!("{:>4}  {:<30} {:>3} prepaid", s.id, s.name, s.paid_lessons);
            }
            Ok(())
        }
        Command::Balance { name, count } => {
            let s = LocalDirectory::open(&ctx)?.set_paid_lessons(&name, count)?;
            println!("'{}' now has {} prepaid lessons", s.name, s.paid_lessons);
            Ok(())
        }
        Command::Link { name, recipient } => {
            let link = LocalDirectory::open(&ctx)?.link_recipient(&name, &recipient)?;
            println!("Reminders for '{}' go to {}", name, link.recipient);
            Ok(())
        }
        Command::Paid { lesson_id, paid } => {
            let lesson = LocalDirectory::open(&ctx)?.set_lesson_paid(&lesson_id, paid)?;
            println!(
                "Lesson {} is {}",
                lesson.id,
                if lesson.is_paid { "paid" } else { "unpaid" }
            );
            Ok(())
        }
        command @ (Command::Run | Command::Once | Command::Preview) => {
            let config = match config {
                Ok(c) => c,
                Err(e) if Config::is_missing_config_error(&e) => {
                    let path = ctx.get_config_file_path()?;
                    eprintln!("No configuration found. Create {} with:", path.display());
                    eprintln!();
                    eprintln!("    url = \"https://caldav.example.com/\"");
                    eprintln!("    username = \"...\"");
                    eprintln!("    password = \"...\"");
                    std::process::exit(1);
                }
                Err(e) => return Err(e),
            };
            serve(&ctx, config, command).await
        }
        Command::Help => Ok(()),
    }
}

async fn serve(ctx: &StandardContext, config: Config, command: Command) -> Result<()> {
    let source = Arc::new(CalDavSource::new(&config)?);

    if command == Command::Preview {
        let now = Utc::now();
        let window_end = now + config.lookahead();
        let events = source.fetch(now, window_end).await?;
        let mut occurrences: Vec<_> = events
            .iter()
            .flat_map(|e| RecurrenceEngine::expand(e, now, window_end))
            .collect();
        occurrences.sort_by_key(|o| o.start);
        for occ in occurrences {
            println!(
                "{}  {}  {:<30} {}",
                occ.start.format("%Y-%m-%d %H:%M"),
                occ.end.format("%H:%M"),
                occ.summary,
                occ.id
            );
        }
        return Ok(());
    }

    let directory: Arc<dyn LessonDirectory> = Arc::new(LocalDirectory::open(ctx)?);
    let ledger = Arc::new(LocalLedger::open(ctx)?);
    let notifier: Arc<dyn Notifier> = Arc::from(notifier::from_config(&config)?);
    let jobs = Arc::new(JobContext::new(directory.clone(), notifier));

    let runner = Arc::new(LocalRunner::new(
        ctx,
        jobs,
        RetryPolicy::from_config(&config),
    )?);
    runner.start()?;

    let scheduler = Scheduler::new(
        directory,
        ledger.clone(),
        runner.clone(),
        config.notify_lead(),
    );
    // Discovery plus the REPORT, each bounded by the request timeout.
    let fetch_timeout = config.request_timeout() * 4;
    let poller = Poller::new(
        source,
        scheduler,
        ledger,
        config.lookahead(),
        config.poll_interval(),
        fetch_timeout,
    );

    match command {
        Command::Once => {
            poller.poll_once(Utc::now()).await?;
            let pending = runner.pending()?.len();
            if pending > 0 {
                log::info!("{} jobs pending; they will be re-armed on the next start", pending);
            }
            Ok(())
        }
        _ => poller.run().await,
    }
}
