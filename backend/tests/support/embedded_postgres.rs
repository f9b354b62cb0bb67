//! Embedded PostgreSQL databases for the Diesel adapter suites.
//!
//! - One shared cluster per test binary; each test gets a fresh database
//!   cloned from a template that already carries the migrations.
//! - Seeding and inspection use `postgres` so they stay outside the adapters
//!   under test and outside any Diesel transaction.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use compete_backend::domain::{CompetitionId, RegistrationId, RegistrationStatus, UserId};
use compete_backend::outbound::persistence::{DbPool, PoolConfig};
use diesel::Connection;
use diesel::pg::PgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use pg_embedded_setup_unpriv::test_support::hash_directory;
use pg_embedded_setup_unpriv::{ClusterHandle, TemporaryDatabase};
use postgres::{Client, NoTls};
use tokio::runtime::Runtime;
use uuid::Uuid;

use super::format_postgres_error;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static TEMPLATE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const TEMPLATE_NAME_PREFIX: &str = "compete_template";
const PROVISION_RETRIES: usize = 5;
const PROVISION_RETRY_DELAY: Duration = Duration::from_millis(500);

fn migrations_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

fn template_database_name() -> Result<String, String> {
    let hash = hash_directory(migrations_dir()).map_err(|err| format!("hash migrations: {err}"))?;
    let short_hash = hash.get(..8).unwrap_or(&hash);
    Ok(format!("{TEMPLATE_NAME_PREFIX}_{short_hash}"))
}

/// Keeps `PG_PASSWORD` stable so a reused data directory still accepts it.
fn ensure_stable_password() {
    if std::env::var_os("PG_PASSWORD").is_none() {
        // SAFETY: runs before the cluster bootstrap spawns any threads, under
        // the library's singleton lock.
        unsafe {
            std::env::set_var("PG_PASSWORD", "compete_embedded_test");
        }
    }
}

/// Cluster shared by every test in this binary.
pub fn shared_cluster() -> Result<&'static ClusterHandle, String> {
    ensure_stable_password();
    let mut attempt = 1;
    loop {
        match pg_embedded_setup_unpriv::test_support::shared_cluster_handle() {
            Ok(handle) => return Ok(handle),
            Err(error) if attempt < PROVISION_RETRIES => {
                eprintln!("pg-embed: cluster bootstrap attempt {attempt} failed: {error:?}");
                std::thread::sleep(PROVISION_RETRY_DELAY);
                attempt += 1;
            }
            Err(error) => return Err(format!("{error:?}")),
        }
    }
}

/// Creates or reuses a template database with the latest migrations applied.
fn ensure_template_database(cluster: &ClusterHandle) -> Result<String, String> {
    let template_name = template_database_name()?;
    let _lock = TEMPLATE_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|err| err.into_inner());

    let exists = cluster
        .database_exists(template_name.as_str())
        .map_err(|err| format!("template check: {err:?}"))?;
    if !exists {
        cluster
            .create_database(template_name.as_str())
            .map_err(|err| format!("create template: {err:?}"))?;
        migrate_schema(&cluster.connection().database_url(&template_name))?;
    }
    Ok(template_name)
}

/// Runs all pending Diesel migrations against `url`.
pub fn migrate_schema(url: &str) -> Result<(), String> {
    let mut conn = PgConnection::establish(url).map_err(|err| format!("connect: {err:?}"))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| format!("migration: {err:?}"))?;
    Ok(())
}

fn clone_template(cluster: &ClusterHandle) -> Result<TemporaryDatabase, String> {
    let mut last_error = String::from("exhausted retries");
    for attempt in 1..=PROVISION_RETRIES {
        let cloned = ensure_template_database(cluster).and_then(|template| {
            cluster
                .temporary_database_from_template(
                    format!("test_{}", Uuid::new_v4().simple()).as_str(),
                    template.as_str(),
                )
                .map_err(|err| format!("create database from template: {err:?}"))
        });
        match cloned {
            Ok(database) => return Ok(database),
            Err(error) => last_error = format!("attempt {attempt}/{PROVISION_RETRIES}: {error}"),
        }
        if attempt < PROVISION_RETRIES {
            std::thread::sleep(PROVISION_RETRY_DELAY);
        }
    }
    Err(last_error)
}

/// A migrated database plus the runtime and pool that drive the adapters.
pub struct TestDatabase {
    /// Adapters run on this runtime; seeding stays outside it.
    pub runtime: Runtime,
    pub pool: DbPool,
    pub url: String,
    _database: TemporaryDatabase,
}

impl TestDatabase {
    /// Fresh `postgres` client for seeding and inspection.
    pub fn seeder(&self) -> Seeder {
        Seeder::connect(&self.url)
    }
}

/// Provision a database whose pool holds up to `pool_size` connections.
pub fn provision_test_database(pool_size: u32) -> Result<TestDatabase, String> {
    let cluster = shared_cluster()?;
    let database = clone_template(cluster)?;
    let url = database.url().to_string();
    let runtime = Runtime::new().map_err(|err| err.to_string())?;
    let config = PoolConfig::new(url.as_str())
        .with_max_size(pool_size)
        .with_min_idle(Some(1));
    let pool = runtime
        .block_on(DbPool::new(config))
        .map_err(|err| err.to_string())?;
    Ok(TestDatabase {
        runtime,
        pool,
        url,
        _database: database,
    })
}

/// Direct SQL access for arranging rows and reading them back.
pub struct Seeder {
    client: Client,
}

impl Seeder {
    fn connect(url: &str) -> Self {
        let client = Client::connect(url, NoTls)
            .unwrap_or_else(|err| panic!("seeder connects: {}", format_postgres_error(&err)));
        Self { client }
    }

    fn execute(&mut self, sql: &str, params: &[&(dyn postgres::types::ToSql + Sync)]) -> u64 {
        self.client
            .execute(sql, params)
            .unwrap_or_else(|err| panic!("{sql}: {}", format_postgres_error(&err)))
    }

    fn query_one(
        &mut self,
        sql: &str,
        params: &[&(dyn postgres::types::ToSql + Sync)],
    ) -> postgres::Row {
        self.client
            .query_one(sql, params)
            .unwrap_or_else(|err| panic!("{sql}: {}", format_postgres_error(&err)))
    }

    pub fn user(&mut self, name: &str) -> UserId {
        let id = Uuid::new_v4();
        let email = format!("{}.{}@example.com", name.to_lowercase(), id.simple());
        self.execute(
            "INSERT INTO users (id, name, email) VALUES ($1, $2, $3)",
            &[&id, &name, &email],
        );
        UserId::from_uuid(id)
    }

    pub fn competition(
        &mut self,
        title: &str,
        capacity: i32,
        reg_deadline: DateTime<Utc>,
        start_date: Option<DateTime<Utc>>,
    ) -> CompetitionId {
        let id = Uuid::new_v4();
        self.execute(
            "INSERT INTO competitions (id, title, capacity, seats_left, reg_deadline, start_date) \
             VALUES ($1, $2, $3, $3, $4, $5)",
            &[&id, &title, &capacity, &reg_deadline, &start_date],
        );
        CompetitionId::from_uuid(id)
    }

    /// `(seats_left, version)` of a competition.
    pub fn seats(&mut self, id: CompetitionId) -> (i32, i64) {
        let row = self.query_one(
            "SELECT seats_left, version FROM competitions WHERE id = $1",
            &[id.as_uuid()],
        );
        (row.get(0), row.get(1))
    }

    /// Registrations holding a seat, counted straight from the table.
    pub fn active_registrations(&mut self, id: CompetitionId) -> i64 {
        self.query_one(
            "SELECT count(*) FROM registrations \
             WHERE competition_id = $1 AND status <> 'CANCELLED'",
            &[id.as_uuid()],
        )
        .get(0)
    }

    pub fn set_registration_status(&mut self, id: RegistrationId, status: RegistrationStatus) {
        let updated = self.execute(
            "UPDATE registrations SET status = $2, updated_at = now() WHERE id = $1",
            &[id.as_uuid(), &status.as_str()],
        );
        assert_eq!(updated, 1, "registration {id} exists");
    }

    pub fn job_state(&mut self, id: Uuid) -> (String, i32) {
        let row = self.query_one("SELECT state, attempts FROM jobs WHERE id = $1", &[&id]);
        (row.get(0), row.get(1))
    }
}
