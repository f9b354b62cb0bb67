//! `compete-worker`: job worker and operator commands for the registration
//! engine.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use compete_backend::domain::ports::{
    CompetitionLedger, FailedJobRepository, JobQueue, LockManager, Mailbox,
};
use compete_backend::domain::{
    CompetitionId, IdempotencyKey, IdempotencyService, JobState, JobWorker, JobWorkerPorts,
    JobWorkerRuntime, MaintenanceService, QueueName, RegistrationCoordinator,
    RegistrationCoordinatorPorts, RegistrationRequest, UserId,
};
use compete_backend::outbound::cache::RedisIdempotencyCache;
use compete_backend::outbound::lock::RedisLockManager;
use compete_backend::outbound::persistence::{
    DbPool, DieselCompetitionLedger, DieselFailedJobRepository, DieselIdempotencyRepository,
    DieselJobQueue, DieselMailbox, PoolConfig, run_pending_migrations,
};
use compete_backend::outbound::redis_pool::build_redis_pool;
use compete_backend::settings::EngineSettings;

/// `compete-worker` command arguments.
#[derive(Debug, Parser)]
#[command(
    name = "compete-worker",
    about = "Run the registration job worker and operate its queues",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply migrations, then process jobs and run periodic maintenance
    /// until Ctrl-C.
    Work,
    /// Delete expired idempotency records and stale dead letters.
    Sweep,
    /// Enqueue reminders for competitions starting within 24 hours.
    Remind,
    /// Print per-state job counts for a queue.
    Stats { queue: QueueName },
    /// Stop delivering jobs from a queue.
    Pause { queue: QueueName },
    Resume { queue: QueueName },
    /// Delete finished jobs older than the given age.
    Clean {
        queue: QueueName,
        #[arg(long, value_parser = parse_finished_state)]
        state: JobState,
        #[arg(long = "older-than-hours", default_value_t = 24)]
        older_than_hours: u32,
    },
    /// List the most recent dead-lettered jobs.
    DeadLetters {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Apply pending database migrations.
    Migrate,
    /// Register a user for a competition through the full coordinator path.
    Register {
        #[arg(long = "user", value_name = "uuid")]
        user_id: UserId,
        #[arg(long = "competition", value_name = "uuid")]
        competition_id: CompetitionId,
        #[arg(long = "idempotency-key", value_name = "key", value_parser = parse_idempotency_key)]
        idempotency_key: Option<IdempotencyKey>,
    },
}

fn parse_finished_state(raw: &str) -> Result<JobState, String> {
    match raw.parse::<JobState>() {
        Ok(state @ (JobState::Completed | JobState::Failed)) => Ok(state),
        Ok(other) => Err(format!("only completed or failed jobs can be cleaned, got {other}")),
        Err(error) => Err(error.to_string()),
    }
}

fn parse_idempotency_key(raw: &str) -> Result<IdempotencyKey, String> {
    IdempotencyKey::new(raw).map_err(|err| err.to_string())
}

/// PostgreSQL-backed ports shared by every command.
struct Persistence {
    ledger: Arc<dyn CompetitionLedger>,
    queue: Arc<dyn JobQueue>,
    failed_jobs: Arc<dyn FailedJobRepository>,
    mailbox: Arc<dyn Mailbox>,
    idempotency_records: Arc<DieselIdempotencyRepository>,
}

impl Persistence {
    async fn connect(settings: &EngineSettings) -> Result<Self> {
        let pool_size = u32::try_from(settings.worker_concurrency())
            .unwrap_or(u32::MAX)
            .saturating_mul(2)
            .saturating_add(4);
        let pool = DbPool::new(PoolConfig::new(settings.database_url()).with_max_size(pool_size))
            .await
            .wrap_err("create database pool")?;
        Ok(Self {
            ledger: Arc::new(
                DieselCompetitionLedger::new(pool.clone())
                    .with_statement_timeout(settings.transaction_timeout()),
            ),
            queue: Arc::new(DieselJobQueue::new(pool.clone())),
            failed_jobs: Arc::new(DieselFailedJobRepository::new(pool.clone())),
            mailbox: Arc::new(DieselMailbox::new(pool.clone())),
            idempotency_records: Arc::new(DieselIdempotencyRepository::new(pool)),
        })
    }
}

struct Engine {
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    persistence: Persistence,
    idempotency: IdempotencyService,
    locks: Arc<dyn LockManager>,
}

impl Engine {
    async fn connect(settings: EngineSettings) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
        let persistence = Persistence::connect(&settings).await?;
        let redis_size = u32::try_from(settings.worker_concurrency()).unwrap_or(u32::MAX);
        let redis = build_redis_pool(settings.redis_url(), redis_size.saturating_add(2))
            .await
            .wrap_err("create redis pool")?;
        let idempotency = IdempotencyService::new(
            Arc::new(RedisIdempotencyCache::new(redis.clone())),
            persistence.idempotency_records.clone(),
            clock.clone(),
            settings.idempotency_config(),
        );
        Ok(Self {
            locks: Arc::new(RedisLockManager::new(redis)),
            settings,
            clock,
            persistence,
            idempotency,
        })
    }

    fn worker(&self) -> JobWorker {
        JobWorker::new(
            JobWorkerPorts {
                queue: self.persistence.queue.clone(),
                failed_jobs: self.persistence.failed_jobs.clone(),
                ledger: self.persistence.ledger.clone(),
                mailbox: self.persistence.mailbox.clone(),
            },
            JobWorkerRuntime {
                clock: self.clock.clone(),
                ..JobWorkerRuntime::default()
            },
            self.settings.worker_config(),
        )
    }

    fn maintenance(&self) -> MaintenanceService {
        MaintenanceService::new(
            self.persistence.ledger.clone(),
            self.persistence.queue.clone(),
            self.persistence.failed_jobs.clone(),
            self.idempotency.clone(),
            self.clock.clone(),
            self.settings.maintenance_config(),
        )
    }

    fn coordinator(&self) -> RegistrationCoordinator {
        RegistrationCoordinator::new(
            RegistrationCoordinatorPorts {
                idempotency: self.idempotency.clone(),
                locks: self.locks.clone(),
                ledger: self.persistence.ledger.clone(),
                queue: self.persistence.queue.clone(),
            },
            self.clock.clone(),
            self.settings.coordinator_config(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let cli = Cli::parse();
    // Flags belong to clap; OrthoConfig reads only the environment and files.
    let settings = EngineSettings::load_from_iter([OsString::from("compete-worker")])
        .map_err(|err| eyre!("load settings: {err}"))?;

    if matches!(cli.command, Command::Migrate | Command::Work) {
        run_pending_migrations(settings.database_url())
            .await
            .wrap_err("apply migrations")?;
        if matches!(cli.command, Command::Migrate) {
            return Ok(());
        }
    }

    let engine = Engine::connect(settings).await?;
    match cli.command {
        Command::Work => work(&engine).await,
        Command::Sweep => {
            let report = engine.maintenance().sweep().await?;
            println!("idempotency_records={}", report.idempotency_records);
            println!("failed_jobs={}", report.failed_jobs);
            Ok(())
        }
        Command::Remind => {
            let enqueued = engine.maintenance().enqueue_upcoming_reminders().await?;
            println!("reminders_enqueued={enqueued}");
            Ok(())
        }
        Command::Stats { queue } => {
            let stats = engine.persistence.queue.stats(queue, engine.clock.utc()).await?;
            println!("queue={queue}");
            println!("waiting={}", stats.waiting);
            println!("active={}", stats.active);
            println!("delayed={}", stats.delayed);
            println!("completed={}", stats.completed);
            println!("failed={}", stats.failed);
            println!("total={}", stats.total());
            println!("paused={}", stats.paused);
            Ok(())
        }
        Command::Pause { queue } => {
            engine.persistence.queue.pause(queue).await?;
            info!(%queue, "queue paused");
            Ok(())
        }
        Command::Resume { queue } => {
            engine.persistence.queue.resume(queue).await?;
            info!(%queue, "queue resumed");
            Ok(())
        }
        Command::Clean {
            queue,
            state,
            older_than_hours,
        } => {
            let cutoff = engine.clock.utc() - TimeDelta::hours(i64::from(older_than_hours));
            let removed = engine.persistence.queue.clean(queue, state, cutoff).await?;
            println!("removed={removed}");
            Ok(())
        }
        Command::DeadLetters { limit } => {
            for job in engine.persistence.failed_jobs.list(limit).await? {
                println!(
                    "{} queue={} job={} attempts={} failed_at={} error={}",
                    job.job_id,
                    job.queue,
                    job.payload.job_name(),
                    job.attempts,
                    job.failed_at.to_rfc3339(),
                    job.error
                );
            }
            Ok(())
        }
        Command::Register {
            user_id,
            competition_id,
            idempotency_key,
        } => {
            let registration = engine
                .coordinator()
                .register(RegistrationRequest {
                    user_id,
                    competition_id,
                    idempotency_key,
                })
                .await
                .map_err(|err| eyre!("registration rejected ({:?}): {err}", err.code()))?;
            println!("{}", serde_json::to_string_pretty(&registration)?);
            Ok(())
        }
        Command::Migrate => Ok(()),
    }
}

async fn work(engine: &Engine) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Arc::new(engine.worker());
    let worker_task = tokio::spawn(worker.run(shutdown_rx.clone()));
    let maintenance_task = tokio::spawn(run_maintenance(
        engine.maintenance(),
        engine.settings.sweep_interval(),
        engine.settings.reminder_interval(),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await.wrap_err("listen for ctrl-c")?;
    info!("shutdown requested");
    shutdown_tx.send_replace(true);

    worker_task.await.wrap_err("join job worker")?;
    maintenance_task.await.wrap_err("join maintenance loop")?;
    Ok(())
}

async fn run_maintenance(
    maintenance: MaintenanceService,
    sweep_every: Duration,
    remind_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sweep_tick = tokio::time::interval(sweep_every);
    let mut remind_tick = tokio::time::interval(remind_every);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = sweep_tick.tick() => {
                if let Err(error) = maintenance.sweep().await {
                    warn!(error = %error, "maintenance sweep failed");
                }
            }
            _ = remind_tick.tick() => {
                if let Err(error) = maintenance.enqueue_upcoming_reminders().await {
                    warn!(error = %error, "reminder scan failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("completed", Ok(JobState::Completed))]
    #[case("failed", Ok(JobState::Failed))]
    fn finished_states_are_cleanable(#[case] raw: &str, #[case] expected: Result<JobState, String>) {
        assert_eq!(parse_finished_state(raw), expected);
    }

    #[rstest]
    #[case("waiting")]
    #[case("active")]
    #[case("sleeping")]
    fn other_states_are_rejected(#[case] raw: &str) {
        assert!(parse_finished_state(raw).is_err());
    }

    #[rstest]
    fn clean_command_parses_flags() {
        let cli = Cli::try_parse_from([
            "compete-worker",
            "clean",
            "registration",
            "--state",
            "failed",
            "--older-than-hours",
            "48",
        ])
        .expect("valid arguments");

        assert!(matches!(
            cli.command,
            Command::Clean {
                queue: QueueName::Registration,
                state: JobState::Failed,
                older_than_hours: 48,
            }
        ));
    }
}
