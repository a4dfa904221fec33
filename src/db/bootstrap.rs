// Schema Bootstrap
// Idempotent database creation, DDL and seed data. Authored directly in T-SQL;
// none of this goes through the `?` translation layer.

use crate::config::AdminSeed;
use crate::db::connection::PoolManager;
use crate::db::drivers::MssqlDriver;
use crate::db::errors::AdapterError;
use crate::db::params::SqlParam;
use crate::db::traits::{Backend, Record};
use crate::db::translate::TranslatedStatement;
use crate::security::{self, PasswordError};
use std::sync::Arc;
use thiserror::Error;

/// Created through dynamic SQL so the name can be passed as a parameter and quoted server-side
const CREATE_DATABASE: &str = r#"
IF DB_ID(@P1) IS NULL
BEGIN
    DECLARE @ddl NVARCHAR(MAX) = N'CREATE DATABASE ' + QUOTENAME(@P1);
    EXEC (@ddl);
END
"#;

/// (object name, DDL) in dependency order
const SCHEMA: &[(&str, &str)] = &[
    (
        "sections",
        r#"
IF NOT EXISTS (SELECT * FROM sys.objects WHERE object_id = OBJECT_ID(N'[dbo].[sections]') AND type in (N'U'))
BEGIN
    CREATE TABLE sections (
        id INT IDENTITY(1,1) PRIMARY KEY,
        name NVARCHAR(100) NOT NULL UNIQUE,
        description NVARCHAR(MAX),
        created_at DATETIME DEFAULT GETDATE()
    )
END
"#,
    ),
    (
        "users",
        r#"
IF NOT EXISTS (SELECT * FROM sys.objects WHERE object_id = OBJECT_ID(N'[dbo].[users]') AND type in (N'U'))
BEGIN
    CREATE TABLE users (
        id INT IDENTITY(1,1) PRIMARY KEY,
        name NVARCHAR(100) NOT NULL,
        email NVARCHAR(100) NOT NULL UNIQUE,
        password_hash NVARCHAR(255) NOT NULL,
        role NVARCHAR(20) NOT NULL DEFAULT 'student' CHECK (role IN ('admin', 'student')),
        created_at DATETIME DEFAULT GETDATE(),
        updated_at DATETIME DEFAULT GETDATE()
    )
END
"#,
    ),
    (
        "user_sections",
        r#"
IF NOT EXISTS (SELECT * FROM sys.objects WHERE object_id = OBJECT_ID(N'[dbo].[user_sections]') AND type in (N'U'))
BEGIN
    CREATE TABLE user_sections (
        id INT IDENTITY(1,1) PRIMARY KEY,
        user_id INT NOT NULL,
        section_id INT NOT NULL,
        assigned_at DATETIME DEFAULT GETDATE(),
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
        FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE,
        CONSTRAINT unique_user_section UNIQUE (user_id, section_id)
    )
END
"#,
    ),
    (
        "videos",
        r#"
IF NOT EXISTS (SELECT * FROM sys.objects WHERE object_id = OBJECT_ID(N'[dbo].[videos]') AND type in (N'U'))
BEGIN
    CREATE TABLE videos (
        id INT IDENTITY(1,1) PRIMARY KEY,
        title NVARCHAR(255) NOT NULL,
        section_id INT NOT NULL,
        s3_key NVARCHAR(500) NOT NULL,
        s3_url NVARCHAR(MAX),
        uploaded_by INT NOT NULL,
        created_at DATETIME DEFAULT GETDATE(),
        updated_at DATETIME DEFAULT GETDATE(),
        FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE,
        FOREIGN KEY (uploaded_by) REFERENCES users(id) ON DELETE CASCADE
    )
END
"#,
    ),
    (
        "trg_users_updated_at",
        r#"
IF NOT EXISTS (SELECT * FROM sys.triggers WHERE name = 'trg_users_updated_at')
BEGIN
    EXEC('
        CREATE TRIGGER trg_users_updated_at ON users AFTER UPDATE AS
        BEGIN
            SET NOCOUNT ON;
            UPDATE users SET updated_at = GETDATE()
            FROM users u INNER JOIN inserted i ON u.id = i.id
        END
    ')
END
"#,
    ),
    (
        "trg_videos_updated_at",
        r#"
IF NOT EXISTS (SELECT * FROM sys.triggers WHERE name = 'trg_videos_updated_at')
BEGIN
    EXEC('
        CREATE TRIGGER trg_videos_updated_at ON videos AFTER UPDATE AS
        BEGIN
            SET NOCOUNT ON;
            UPDATE videos SET updated_at = GETDATE()
            FROM videos v INNER JOIN inserted i ON v.id = i.id
        END
    ')
END
"#,
    ),
];

const DEFAULT_SECTIONS: &[(&str, &str)] = &[
    ("Physics", "Physics lectures and materials"),
    ("Chemistry", "Chemistry lectures and materials"),
    ("Biology", "Biology lectures and materials"),
];

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Bootstrap step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: AdapterError,
    },

    #[error("Failed to hash default admin password: {0}")]
    PasswordHash(#[from] PasswordError),
}

/// Outcome of the create-database step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStep {
    /// Database existed or was created
    Ensured,
    /// The login may not create databases; assumed to exist already
    SkippedPermissionDenied,
}

/// What `initialize` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub database: DatabaseStep,
    pub schema_objects_checked: usize,
    pub admin_created: bool,
    pub sections_seeded: usize,
}

async fn run(
    backend: &dyn Backend,
    step: &'static str,
    sql: &str,
    params: Vec<SqlParam>,
) -> Result<Vec<Record>, BootstrapError> {
    let wrap = |source: AdapterError| BootstrapError::Step { step, source };

    if !backend.is_connected() {
        backend
            .connect()
            .await
            .map_err(|e| wrap(AdapterError::from(e)))?;
    }

    backend
        .run(&TranslatedStatement::raw(sql, params))
        .await
        .map_err(|e| wrap(AdapterError::from(e)))
}

/// Best-effort CREATE DATABASE. Permission denied is tolerated, anything else is fatal.
async fn ensure_database(master: &dyn Backend, database: &str) -> Result<DatabaseStep, BootstrapError> {
    match run(master, "create database", CREATE_DATABASE, vec![SqlParam::from(database)]).await {
        Ok(_) => {
            tracing::info!(%database, "Database checked/created");
            Ok(DatabaseStep::Ensured)
        }
        Err(BootstrapError::Step { source, .. }) if source.is_permission_denied() => {
            tracing::warn!(
                %database,
                "Database creation skipped (permission denied); assuming it exists"
            );
            Ok(DatabaseStep::SkippedPermissionDenied)
        }
        Err(e) => Err(e),
    }
}

async fn ensure_schema(app: &dyn Backend) -> Result<usize, BootstrapError> {
    for (name, ddl) in SCHEMA {
        run(app, "schema", ddl, Vec::new()).await?;
        tracing::debug!(object = %name, "Schema object ensured");
    }
    Ok(SCHEMA.len())
}

async fn ensure_admin(app: &dyn Backend, admin: &AdminSeed) -> Result<bool, BootstrapError> {
    let existing = run(
        app,
        "admin lookup",
        "SELECT id FROM users WHERE email = @P1",
        vec![SqlParam::from(&admin.email)],
    )
    .await?;
    if !existing.is_empty() {
        return Ok(false);
    }

    let password_hash = security::hash_password(&admin.password).await?;
    run(
        app,
        "admin insert",
        "INSERT INTO users (name, email, password_hash, role) VALUES (@P1, @P2, @P3, @P4)",
        vec![
            SqlParam::from(&admin.name),
            SqlParam::from(&admin.email),
            SqlParam::from(password_hash),
            SqlParam::from("admin"),
        ],
    )
    .await?;

    tracing::info!(email = %admin.email, "Default admin user created");
    Ok(true)
}

async fn ensure_sections(app: &dyn Backend) -> Result<usize, BootstrapError> {
    let rows = run(app, "section count", "SELECT COUNT(*) AS count FROM sections", Vec::new()).await?;
    let count = rows
        .first()
        .and_then(|row| row.get("count"))
        .and_then(|value| value.as_i64())
        .unwrap_or(0);
    if count > 0 {
        return Ok(0);
    }

    for (name, description) in DEFAULT_SECTIONS {
        run(
            app,
            "section insert",
            "INSERT INTO sections (name, description) VALUES (@P1, @P2)",
            vec![SqlParam::from(*name), SqlParam::from(*description)],
        )
        .await?;
    }

    tracing::info!(count = DEFAULT_SECTIONS.len(), "Default sections created");
    Ok(DEFAULT_SECTIONS.len())
}

/// Bring a store up to the expected schema. Safe to re-run: every step checks before it creates.
///
/// `master` must be a server-level connection (used only for CREATE DATABASE);
/// `app` is connected to `database` itself.
pub async fn initialize(
    master: &dyn Backend,
    app: &dyn Backend,
    database: &str,
    admin: &AdminSeed,
) -> Result<BootstrapReport, BootstrapError> {
    let database_step = ensure_database(master, database).await?;
    let schema_objects_checked = ensure_schema(app).await?;
    let admin_created = ensure_admin(app, admin).await?;
    let sections_seeded = ensure_sections(app).await?;

    tracing::info!(%database, "Database initialized");
    Ok(BootstrapReport {
        database: database_step,
        schema_objects_checked,
        admin_created,
        sections_seeded,
    })
}

/// Run [`initialize`] against SQL Server, using a short-lived single-connection pool on `master`
pub async fn initialize_mssql(
    pool_manager: Arc<PoolManager>,
    admin: &AdminSeed,
) -> Result<BootstrapReport, BootstrapError> {
    let mut master_config = pool_manager.config().for_database("master");
    master_config.pool_min = 0;
    master_config.pool_max = 1;
    let master_pool = Arc::new(PoolManager::new(master_config));

    let database = pool_manager.config().database.clone();
    let master = MssqlDriver::new(Arc::clone(&master_pool));
    let app = MssqlDriver::new(pool_manager);

    let result = initialize(&master, &app, &database, admin).await;
    master_pool.shutdown().await;
    result
}
