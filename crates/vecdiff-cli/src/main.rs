use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Context, Result};
use vecdiff_analysis::ComparisonRequest;
use vecdiff_cli::cli::{Cli, Commands, CompareArgs, parse_cli};
use vecdiff_cli::commands::{print_summary, run_compare, run_init_config};
use vecdiff_cli::logging::init_logging;
use vecdiff_cli::prompt::value_or_prompt;

fn main() -> Result<()> {
    let cli = parse_cli();
    init_logging(cli.log_format)?;
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| vecdiff_config::config_path(&workspace));

    match &cli.command {
        Commands::InitConfig(args) => {
            run_init_config(&config_path, args.force, &mut std::io::stdout())
        }
        Commands::Compare(args) => compare(&workspace, &config_path, args),
    }
}

fn compare(workspace: &Path, config_path: &Path, args: &CompareArgs) -> Result<()> {
    let interactive = std::io::stdin().is_terminal();
    let mut input = std::io::stdin().lock();
    let mut prompt_out = std::io::stderr();
    let namespace = value_or_prompt(
        args.namespace.as_deref(),
        "Enter namespace",
        "--namespace",
        interactive,
        &mut input,
        &mut prompt_out,
    )?;
    let identifier = value_or_prompt(
        args.identifier.as_deref(),
        "Enter PR number",
        "--pr-number",
        interactive,
        &mut input,
        &mut prompt_out,
    )?;
    let request = ComparisonRequest::new(namespace, identifier);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime for comparison")?;
    let outcome = runtime.block_on(run_compare(workspace, config_path, args, &request))?;

    print_summary(&outcome, &mut std::io::stdout())
}
