use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use opwatch::application::poller::BoundedPoller;
use opwatch::application::scheduler::RefreshScheduler;
use opwatch::config::WatchConfig;
use opwatch::domain::command::{Command, CommandName};
use opwatch::domain::health::HealthSnapshot;
use opwatch::domain::session::{PollState, RefreshEvent, SubjectId};
use opwatch::domain::status::{CampaignJob, CheckoutSession, Classify};
use opwatch::interfaces::fixture::{HealthFixture, PollFixture, read_fixture};
use opwatch::interfaces::output::{EventWriter, SessionKind};
use opwatch::logging::init_logging;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON settings file with `poll` and `refresh` sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Poll a checkout session until it is paid, expires or times out
    Checkout {
        session_id: String,
        /// Fixture with the scripted status responses
        #[arg(long)]
        script: PathBuf,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Poll a creative-generation job until it settles
    Campaign {
        job_id: String,
        #[arg(long)]
        script: PathBuf,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Watch the healing dashboard for a number of refresh ticks
    Health {
        #[arg(long)]
        script: PathBuf,
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Refresh outcomes to observe before stopping
        #[arg(long, default_value_t = 3)]
        ticks: u32,
        /// Commands issued after the first refresh, in order
        #[arg(long = "command")]
        commands: Vec<CommandName>,
    },
}

#[derive(clap::Args)]
struct PollArgs {
    #[arg(long)]
    interval_ms: Option<u64>,
    #[arg(long)]
    max_attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    let mut config = match &cli.config {
        Some(path) => WatchConfig::load(path).into_diagnostic()?,
        None => WatchConfig::default(),
    };

    let stdout = io::stdout();
    let mut writer = EventWriter::new(stdout.lock());

    match cli.mode {
        Mode::Checkout {
            session_id,
            script,
            poll,
        } => {
            poll.apply(&mut config);
            let state =
                run_poll::<CheckoutSession, _>(&script, session_id, &config, &mut writer).await?;
            if state == PollState::TimedOut {
                eprintln!(
                    "WARNING: Payment not confirmed yet. A confirmation will be sent by email once it completes."
                );
            }
        }
        Mode::Campaign {
            job_id,
            script,
            poll,
        } => {
            poll.apply(&mut config);
            run_poll::<CampaignJob, _>(&script, job_id, &config, &mut writer).await?;
        }
        Mode::Health {
            script,
            interval_ms,
            ticks,
            commands,
        } => {
            if let Some(interval_ms) = interval_ms {
                config.refresh.interval_ms = interval_ms;
            }
            run_health(&script, &config, ticks, commands, &mut writer).await?;
        }
    }

    Ok(())
}

impl PollArgs {
    fn apply(&self, config: &mut WatchConfig) {
        if let Some(interval_ms) = self.interval_ms {
            config.poll.interval_ms = interval_ms;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.poll.max_attempts = max_attempts;
        }
    }
}

async fn run_poll<P, W>(
    script: &Path,
    subject: String,
    config: &WatchConfig,
    writer: &mut EventWriter<W>,
) -> Result<PollState>
where
    P: Classify + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    W: Write,
{
    let file = File::open(script).into_diagnostic()?;
    let fixture: PollFixture<P> = read_fixture(file).into_diagnostic()?;

    let mut poller = BoundedPoller::<P>::new(Arc::new(fixture.into_script()), config.poll)
        .into_diagnostic()?;
    let mut events = poller.start(SubjectId::new(subject)).into_diagnostic()?;

    let mut state = PollState::Checking;
    while let Some(event) = events.recv().await {
        state = event.state;
        writer
            .write_event(SessionKind::Poll, &event)
            .into_diagnostic()?;
    }
    poller.finish().await;

    Ok(state)
}

async fn run_health<W: Write>(
    script: &Path,
    config: &WatchConfig,
    ticks: u32,
    commands: Vec<CommandName>,
    writer: &mut EventWriter<W>,
) -> Result<()> {
    let file = File::open(script).into_diagnostic()?;
    let fixture: HealthFixture = read_fixture(file).into_diagnostic()?;
    let (fetcher, issuer) = fixture.into_backend();

    let mut scheduler = RefreshScheduler::<HealthSnapshot>::new(
        Arc::new(fetcher),
        Arc::new(issuer),
        config.refresh,
    )
    .into_diagnostic()?;
    let mut events = scheduler.start().into_diagnostic()?;

    let mut observed = 0;
    let mut pending_commands = commands.into_iter();
    while observed < ticks {
        let Some(event) = events.recv().await else {
            break;
        };
        writer
            .write_event(SessionKind::Refresh, &event)
            .into_diagnostic()?;

        if matches!(
            event,
            RefreshEvent::Snapshot { .. } | RefreshEvent::FetchFailed { .. }
        ) {
            observed += 1;
            if observed == 1 {
                for name in pending_commands.by_ref() {
                    if let Err(e) = scheduler.issue_command(Command::new(name)).await {
                        eprintln!("Error issuing command: {}", e);
                    }
                }
            }
        }
    }
    scheduler.stop();

    // Flush command events that were queued before the timer was disarmed.
    while let Some(event) = events.recv().await {
        writer
            .write_event(SessionKind::Refresh, &event)
            .into_diagnostic()?;
    }

    Ok(())
}
