use clap::Args;

/// Relational store arguments.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct DatabaseArgs {
    /// PostgreSQL connection string.
    #[arg(long = "database-url", env = "DATABASE_URL")]
    pub url: String,
    /// Maximum pool connections. Defaults to the sum of the pipeline stage widths plus headroom.
    #[arg(long = "db.max-connections", env = "DB_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,
    /// Create missing tables and indexes before starting the workers.
    #[arg(long = "db.init-schema", env = "DB_INIT_SCHEMA")]
    pub init_schema: bool,
}
