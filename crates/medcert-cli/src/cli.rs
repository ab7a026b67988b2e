use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "medcert")]
#[command(about = "Look up ICD-11 (CID) codes through the WHO API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// ICD API base URL
    #[arg(long, global = true, env = "OMS_API_BASE")]
    pub api_base: Option<String>,

    /// OAuth2 token endpoint
    #[arg(long, global = true, env = "OMS_TOKEN_URL")]
    pub token_url: Option<String>,

    #[arg(long, global = true, env = "OMS_CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    #[arg(long, global = true, env = "OMS_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// ICD-11 release to query
    #[arg(long, global = true, default_value = "2024-01")]
    pub release: String,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log upstream calls to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Free-text search (e.g. "ansiedade")
    Search(SearchArgs),
    /// Exact code lookup (e.g. 6B00)
    Code(CodeArgs),
}

#[derive(clap::Args)]
pub struct SearchArgs {
    /// Search term
    pub term: String,
    /// Result language
    #[arg(short, long, default_value = "pt")]
    pub locale: String,
}

#[derive(clap::Args)]
pub struct CodeArgs {
    /// ICD code, case-insensitive
    pub code: String,
    /// Result language
    #[arg(short, long, default_value = "pt")]
    pub locale: String,
}
