#![allow(dead_code)]

//! PostgreSQL test infrastructure module.
//!
//! Tests run against one shared PostGIS container, or against an existing server when
//! `TEST_DB_HOST` is set (`TEST_DB_PORT`, `TEST_DB_USER`, `TEST_DB_PASSWORD` and
//! `TEST_DB_SSLMODE` are honoured too). Every test gets its own freshly created database.

use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use postgres::Client;
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

use crate::config::{DatabaseConfig, DEFAULT_DATABASE};
use crate::testing::fixtures;

const TEST_ENV_PREFIX: &str = "TEST_DB";

const POSTGIS_IMAGE: &str = "postgis/postgis";
const POSTGIS_TAG: &str = "16-3.4";

const CONNECT_ATTEMPTS: u32 = 30;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Server settings plus the runtime that owns the container, if one was started.
struct TestServer {
    config: DatabaseConfig,
    _runtime: Option<tokio::runtime::Runtime>,
}

static TEST_SERVER: OnceLock<TestServer> = OnceLock::new();

fn test_server() -> &'static TestServer {
    TEST_SERVER.get_or_init(|| {
        {
            let _guard = crate::config::CURRENT_DIR_LOCK
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            crate::config::load_dotenv();
        }
        if std::env::var(format!("{}_HOST", TEST_ENV_PREFIX)).is_ok() {
            return TestServer {
                config: DatabaseConfig::from_env(TEST_ENV_PREFIX)
                    .expect("invalid TEST_DB_* settings"),
                _runtime: None,
            };
        }
        start_container()
    })
}

/// Start the shared PostGIS container. The container is leaked so it lives for the whole test run.
fn start_container() -> TestServer {
    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    let port = rt.block_on(async {
        let container = Postgres::default()
            .with_name(POSTGIS_IMAGE)
            .with_tag(POSTGIS_TAG)
            .start()
            .await
            .expect("failed to start postgis container");

        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("failed to get postgres port");

        std::mem::forget(container);
        port
    });

    TestServer {
        config: DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..DatabaseConfig::default()
        },
        _runtime: Some(rt),
    }
}

// The postgis image restarts the server once after running its init scripts
fn connect_with_retry(config: &DatabaseConfig) -> Client {
    let mut attempt = 1;
    loop {
        match config.connect() {
            Ok(client) => return client,
            Err(err) if attempt < CONNECT_ATTEMPTS => {
                eprintln!("waiting for test database ({}): {}", attempt, err);
                attempt += 1;
                thread::sleep(CONNECT_BACKOFF);
            }
            Err(err) => panic!(
                "failed to connect to test database at {}: {}",
                config.display_url(),
                err
            ),
        }
    }
}

/// Create a fresh PostgreSQL database with a unique name for isolated testing.
///
/// This function:
/// - Generates a unique database name using UUID
/// - Creates the database and installs PostGIS in it
/// - Returns a Client connected to the new database and the database name
pub fn fresh_postgres_db() -> (Client, String) {
    let server = test_server();

    let mut admin = connect_with_retry(&server.config.with_database(DEFAULT_DATABASE));

    // Lowercase, so no quoting surprises
    let db_name = format!("test_{}", Uuid::new_v4().simple());

    admin
        .batch_execute(&format!("CREATE DATABASE \"{}\"", db_name))
        .expect("failed to create test database");
    drop(admin);

    let mut client = connect_with_retry(&server.config.with_database(&db_name));
    fixtures::ensure_postgis(&mut client).expect("failed to install postgis");

    (client, db_name)
}

/// Get a client connected to a fresh, isolated database with PostGIS installed.
pub fn get_test_client() -> Client {
    let (client, _db_name) = fresh_postgres_db();
    client
}
