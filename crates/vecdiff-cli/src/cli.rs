use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vecdiff_config::{MatchPolicy, NarrativeProviderKind, SettingsOverrides};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Args)]
pub struct CompareArgs {
    #[arg(long, help = "Namespace shared by both stores, e.g. owner/repo")]
    pub namespace: Option<String>,

    #[arg(
        long = "pr-number",
        visible_alias = "identifier",
        help = "Value of the match field to look up in both stores"
    )]
    pub identifier: Option<String>,

    #[arg(long, help = "Top-level metadata key to match on (default: pr_number)")]
    pub field: Option<String>,

    #[arg(
        long,
        value_parser = parse_match_policy,
        help = "Record chosen when several match: first, most-recently-updated, or reject-ambiguous"
    )]
    pub match_policy: Option<MatchPolicy>,

    #[arg(long, help = "Report file path (default: comparison.md in the workspace)")]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "URL", help = "Connection string of store A")]
    pub prod: Option<String>,

    #[arg(long, value_name = "URL", help = "Connection string of store B")]
    pub dev: Option<String>,

    #[arg(
        long,
        value_parser = parse_provider,
        help = "Narrative provider: auto, mock, anthropic, or gemini"
    )]
    pub provider: Option<NarrativeProviderKind>,

    #[arg(long, help = "Model id for narrative generation")]
    pub model: Option<String>,

    #[arg(long, help = "Maximum output tokens for the narrative")]
    pub max_tokens: Option<u32>,

    #[arg(long, help = "Sampling temperature for the narrative (0.0..=1.0)")]
    pub temperature: Option<f32>,

    #[arg(long, help = "Environment variable holding the provider API key")]
    pub api_key_env: Option<String>,
}

impl CompareArgs {
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            prod_connection_string: self.prod.clone(),
            dev_connection_string: self.dev.clone(),
            provider: self.provider,
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            api_key_env: self.api_key_env.clone(),
            match_field: self.field.clone(),
            match_policy: self.match_policy,
            report_path: self.output.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct InitConfigArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Commands {
    /// Compare one decision vector across the two configured stores
    Compare(CompareArgs),
    /// Write a default .vecdiff/config.toml
    InitConfig(InitConfigArgs),
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "vecdiff",
    author,
    version,
    about = "Compare decision vectors between two environments"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .vecdiff/ and the report"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        help = "Config file path (default: <workspace>/.vecdiff/config.toml)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_match_policy(value: &str) -> Result<MatchPolicy, String> {
    value.parse()
}

fn parse_provider(value: &str) -> Result<NarrativeProviderKind, String> {
    value.parse()
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}
