use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use runway_access::audit::SqliteAuditStore;
use runway_access::cache::MemoryCacheStore;
use runway_access::models::{DomainType, OverrideEffect};
use runway_access::store::{AccessStore, SqliteAccessStore};
use runway_access::{CheckContext, EngineConfig, PermissionResolver};

#[derive(Parser, Debug)]
#[command(author, version, about = "runway-access admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Resolve a permission for a user and print the decision
    Check {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        tenant: Option<Uuid>,
        /// Require tenant context (check_domain_permission semantics)
        #[arg(long)]
        tenant_domain: bool,
        permission: String,
    },
    /// Print the resolved effective permission set with provenance
    Effective {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        tenant: Option<Uuid>,
    },
    /// Create a per-user grant override
    Grant {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        tenant: Option<Uuid>,
        #[arg(long)]
        expires_in_mins: Option<i64>,
        pattern: String,
    },
    /// Create a per-user deny override (deny always wins)
    Deny {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        tenant: Option<Uuid>,
        #[arg(long)]
        expires_in_mins: Option<i64>,
        pattern: String,
    },
    /// Remove an override by id
    RevokeOverride { id: Uuid },
    /// Create a time-boxed emergency access grant
    Emergency {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        tenant: Option<Uuid>,
        #[arg(long)]
        granted_by: Uuid,
        #[arg(long, default_value_t = 60)]
        minutes: u64,
        #[arg(long)]
        reason: String,
        pattern: String,
    },
    /// Delete expired emergency access records
    PurgeEmergency,
    /// List the permission catalog
    Catalog,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may
    // differ, so fall back to the crate-local `.env`.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator
                .undo(&pool, 1)
                .await
                .context("no migrations were rolled back")?;
            println!("Rolled back last migration");
        }
        Commands::Check {
            user,
            tenant,
            tenant_domain,
            permission,
        } => {
            let resolver = build_resolver().await?;
            let mut ctx = CheckContext::new(user);
            if let Some(tenant) = tenant {
                ctx = ctx.with_tenant(tenant);
            }
            let decision = if tenant_domain {
                resolver
                    .check_domain_permission(&ctx, &permission, DomainType::Tenant)
                    .await
            } else {
                resolver.has_permission(&ctx, &permission, None).await
            };
            resolver.flush_audit().await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Commands::Effective { user, tenant } => {
            let resolver = build_resolver().await?;
            let mut ctx = CheckContext::new(user);
            if let Some(tenant) = tenant {
                ctx = ctx.with_tenant(tenant);
            }
            let effective = resolver.effective_permissions(&ctx).await?;
            println!("{}", serde_json::to_string_pretty(&effective)?);
        }
        Commands::Grant {
            user,
            tenant,
            expires_in_mins,
            pattern,
        } => {
            let resolver = build_resolver().await?;
            let expires_at = expires_in_mins.map(|mins| Utc::now() + ChronoDuration::minutes(mins));
            let record = resolver
                .add_override(user, tenant, &pattern, OverrideEffect::Grant, expires_at, None)
                .await?;
            resolver.flush_audit().await;
            println!("Grant override created: {}", record.id);
        }
        Commands::Deny {
            user,
            tenant,
            expires_in_mins,
            pattern,
        } => {
            let resolver = build_resolver().await?;
            let expires_at = expires_in_mins.map(|mins| Utc::now() + ChronoDuration::minutes(mins));
            let record = resolver
                .add_override(user, tenant, &pattern, OverrideEffect::Deny, expires_at, None)
                .await?;
            resolver.flush_audit().await;
            println!("Deny override created: {}", record.id);
        }
        Commands::RevokeOverride { id } => {
            let resolver = build_resolver().await?;
            match resolver.remove_override(id).await? {
                Some(record) => {
                    resolver.flush_audit().await;
                    println!("Removed {} override on {}", record.effect.as_str(), record.pattern);
                }
                None => println!("No override with id {}", id),
            }
        }
        Commands::Emergency {
            user,
            tenant,
            granted_by,
            minutes,
            reason,
            pattern,
        } => {
            let resolver = build_resolver().await?;
            let record = resolver
                .grant_emergency(
                    user,
                    tenant,
                    &pattern,
                    &reason,
                    granted_by,
                    Duration::from_secs(minutes * 60),
                )
                .await?;
            resolver.flush_audit().await;
            println!(
                "Emergency access {} granted until {}",
                record.id, record.expires_at
            );
        }
        Commands::PurgeEmergency => {
            let resolver = build_resolver().await?;
            let removed = resolver.purge_expired_emergency().await?;
            println!("Removed {} expired emergency records", removed);
        }
        Commands::Catalog => {
            let pool = runway_access::db::init().await?;
            let store = SqliteAccessStore::new(pool);
            let reference = store.load_reference_data().await?;
            println!("{:<40} {:<9} {}", "Pattern", "Wildcard", "Description");
            for permission in &reference.permissions {
                println!(
                    "{:<40} {:<9} {}",
                    permission.pattern.as_str(),
                    if permission.is_wildcard() { "yes" } else { "no" },
                    permission.description.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}

async fn build_resolver() -> anyhow::Result<PermissionResolver> {
    let pool = runway_access::db::init().await?;
    let store = Arc::new(SqliteAccessStore::new(pool.clone()));
    let cache = Arc::new(MemoryCacheStore::new());
    let audit = Arc::new(SqliteAuditStore::new(pool));
    let resolver = PermissionResolver::new(store, cache, audit, EngineConfig::from_env()).await?;
    Ok(resolver)
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sanitized = sanitize_name(name);
    let filename = format!("{}_{}.sql", timestamp, sanitized);
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter()
            .filter_map(|row| row.try_get::<i64, _>("version").ok())
            .collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let applied = applied_versions.contains(&version);
        let status = if applied { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if !desc.is_empty() { desc } else { "unknown" };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Try local ./migrations first (when running from repo root). If that
    // doesn't exist (common in containers where CWD differs), fall back to
    // the crate-local migrations folder determined by CARGO_MANIFEST_DIR.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
