//! native-bridge - Awaitable calls into callback-driven native libraries
//!
//! Main CLI entry point for exercising the compute and database libraries.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use native_bridge::{BridgeConfig, BridgeRegistry, DatabaseBridge, SqlResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_PATH: &str = "./storage/test-encrypted.db";
const DEFAULT_DB_PASSWORD: &str = "your-secure-password-here";

#[derive(Parser)]
#[command(name = "nb")]
#[command(version)]
#[command(about = "Asynchronous bridge over callback-driven native libraries", long_about = None)]
struct Cli {
    /// Configuration file (default: native-bridge.toml searched upward)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fibonacci natively with the given number
    Fibonacci {
        /// Input, at least 1
        #[arg(default_value = "2", value_parser = clap::value_parser!(u32).range(1..))]
        n: u32,
    },

    /// Let the native side sleep while this process keeps working
    Sleep {
        /// Seconds to sleep
        #[arg(default_value = "1")]
        seconds: u64,
    },

    /// Run the database demonstration and concurrent query test
    Test {
        /// Database file, recreated on every run
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: PathBuf,

        /// Encryption credential
        #[arg(long, default_value = DEFAULT_DB_PASSWORD)]
        password: String,
    },

    /// Report whether a database file is encrypted
    Verify {
        /// Database file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = BridgeConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
        None => BridgeConfig::load_from_cwd().context("Failed to load native-bridge.toml")?,
    };

    init_logging(&config);

    let registry = BridgeRegistry::from_config(&config);

    let outcome = match cli.command {
        Commands::Fibonacci { n } => cmd_fibonacci(&registry, &config, n).await,
        Commands::Sleep { seconds } => cmd_sleep(&registry, &config, seconds).await,
        Commands::Test { db, password } => cmd_test(&registry, &config, &db, &password).await,
        Commands::Verify { path } => cmd_verify(&registry, &config, &path),
    };

    registry.shutdown_all();
    outcome
}

fn init_logging(config: &BridgeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_fibonacci(registry: &BridgeRegistry, config: &BridgeConfig, n: u32) -> Result<()> {
    let compute = registry.compute(&config.native.compute)?;
    let message = compute.fibonacci(n).await?;
    println!("{}", message.trim_end());
    Ok(())
}

async fn cmd_sleep(registry: &BridgeRegistry, config: &BridgeConfig, seconds: u64) -> Result<()> {
    let compute = registry.compute(&config.native.compute)?;

    println!(
        "Native side going to sleep for {} seconds, host keeps working  ({})",
        seconds,
        clock()
    );

    let sleeping = compute.sleep(seconds);
    tokio::pin!(sleeping);

    let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
    // The first tick completes immediately.
    heartbeat.tick().await;

    let message = loop {
        tokio::select! {
            message = &mut sleeping => break message?,
            _ = heartbeat.tick() => println!("   Host is working while the native side is still sleeping..."),
        }
    };

    println!("{}  ({})", message.trim_end(), clock());
    Ok(())
}

async fn cmd_test(
    registry: &BridgeRegistry,
    config: &BridgeConfig,
    db_path: &Path,
    password: &str,
) -> Result<()> {
    let db = registry.database(&config.native.database)?;
    let path = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;

    demonstrate(&db, db_path, path, password).await?;
    concurrent_queries(&db, path, password).await?;
    Ok(())
}

/// Walk one connection through schema, mutation, query and error paths.
async fn demonstrate(db: &DatabaseBridge, db_path: &Path, path: &str, password: &str) -> Result<()> {
    println!("Starting Async SQL Demonstration");

    match std::fs::remove_file(db_path) {
        Ok(()) => println!("Removed old database file."),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context("Failed to remove old database file"),
    }
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    println!("\nOpening encrypted database...");
    let conn = db.open(path, password)?;
    println!("✅ Database opened with connection ID: {}", conn.raw());

    println!("\nVerifying database encryption...");
    if db.verify_encryption(path)? {
        println!("✅ Database is properly encrypted!");
    } else {
        println!("❌ WARNING: Database is NOT encrypted!");
    }

    let outcome = run_statements(db, &conn).await;

    println!("\nClosing database connection...");
    if db.close(conn) {
        println!("✅ Connection closed");
    } else {
        println!("❌ Failed to close connection");
    }

    outcome?;
    println!("\nAsync SQL Demonstration Complete!");
    Ok(())
}

async fn run_statements(db: &DatabaseBridge, conn: &native_bridge::ConnectionHandle) -> Result<()> {
    println!("\nCreating tables...");
    let created = db
        .execute_sql(
            conn,
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                age INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .await?;
    if let Some(error) = created.error() {
        bail!("Failed to create table: {}", error);
    }
    println!("✅ Table created successfully");

    println!("\nInserting test data...");
    for statement in [
        "INSERT INTO users (name, email, age) VALUES ('Alice Johnson', 'alice@example.com', 28)",
        "INSERT INTO users (name, email, age) VALUES ('Bob Smith', 'bob@example.com', 35)",
        "INSERT INTO users (name, email, age) VALUES ('Charlie Brown', 'charlie@example.com', 42)",
    ] {
        let result = db.execute_sql(conn, statement).await?;
        match result.error() {
            None => println!(
                "✅ Inserted user with ID: {}",
                result.last_insert_rowid().unwrap_or_default()
            ),
            Some(error) => println!("❌ Insert failed: {}", error),
        }
    }

    println!("\nQuerying all users...");
    let users = db.execute_sql(conn, "SELECT * FROM users ORDER BY id").await?;
    match users.rows() {
        Some(rows) => {
            println!("✅ Found {} users:", users.count().unwrap_or(rows.len() as u64));
            for (index, user) in rows.iter().enumerate() {
                println!(
                    "   {}. {} ({}) - Age: {}",
                    index + 1,
                    field(user, "name"),
                    field(user, "email"),
                    field(user, "age")
                );
            }
        }
        None => println!("❌ Query failed: {}", users.error().unwrap_or_default()),
    }

    println!("\nUpdating user age...");
    let updated = db
        .execute_sql(conn, "UPDATE users SET age = 29 WHERE name = 'Alice Johnson'")
        .await?;
    report_changes(&updated, "Updated", "row(s)", "Update");

    println!("\nQuerying users over 30...");
    let seniors = db
        .execute_sql(
            conn,
            "SELECT name, email, age,
                    CASE
                      WHEN age >= 40 THEN 'Senior'
                      WHEN age >= 30 THEN 'Mid-level'
                      ELSE 'Junior'
                    END as category
             FROM users
             WHERE age > 30
             ORDER BY age DESC",
        )
        .await?;
    if let Some(rows) = seniors.rows() {
        println!("Users over 30 ({} found):", seniors.count().unwrap_or_default());
        for user in rows {
            println!(
                "   • {} ({}) - {}",
                field(user, "name"),
                field(user, "age"),
                field(user, "category")
            );
        }
    }

    println!("\nDeleting user...");
    let deleted = db
        .execute_sql(conn, "DELETE FROM users WHERE email = 'bob@example.com'")
        .await?;
    report_changes(&deleted, "Deleted", "user(s)", "Delete");

    println!("\nFinal user count...");
    let counted = db.execute_sql(conn, "SELECT COUNT(*) as total FROM users").await?;
    if let Some(first) = counted.rows().and_then(|rows| rows.first()) {
        println!("✅ Total users remaining: {}", field(first, "total"));
    }

    println!("\nTesting error handling...");
    let missing = db.execute_sql(conn, "SELECT * FROM non_existent_table").await?;
    match missing.error() {
        Some(error) => println!("✅ Error handling works: {}", error),
        None => println!("❌ Test failed: Expected a failed query but it succeeded."),
    }

    Ok(())
}

/// Issue ten SELECTs at once on a fresh connection and time them.
async fn concurrent_queries(db: &Arc<DatabaseBridge>, path: &str, password: &str) -> Result<()> {
    println!("\nPerformance Test: Multiple Async Queries");

    let conn = db.open(path, password)?;
    let start = Instant::now();

    let executions = (0..10)
        .map(|i| db.execute(&conn, &format!("SELECT {} as query_id, COUNT(*) as count FROM users", i)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut results = Vec::with_capacity(executions.len());
    for execution in executions {
        results.push(execution.await?);
    }

    let elapsed = start.elapsed();
    println!(
        "Executed {} concurrent queries in {:.2}ms",
        results.len(),
        elapsed.as_secs_f64() * 1000.0
    );
    println!(
        "All queries successful: {}",
        results.iter().all(SqlResult::is_success)
    );

    db.close(conn);
    Ok(())
}

fn cmd_verify(registry: &BridgeRegistry, config: &BridgeConfig, path: &Path) -> Result<()> {
    let db = registry.database(&config.native.database)?;
    let path = path.to_str().context("Database path must be valid UTF-8")?;

    if db.verify_encryption(path)? {
        println!("✅ {} is encrypted", path);
    } else {
        println!("❌ {} is NOT encrypted", path);
    }
    Ok(())
}

fn report_changes(result: &SqlResult, verb: &str, unit: &str, action: &str) {
    match result.error() {
        None => println!("✅ {} {} {}", verb, result.rows_affected(), unit),
        Some(error) => println!("❌ {} failed: {}", action, error),
    }
}

/// Render a row column for display, without JSON string quotes.
fn field(row: &serde_json::Value, column: &str) -> String {
    match row.get(column) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => "null".to_string(),
    }
}

/// Local time of day as HH:MM:SS
fn clock() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
