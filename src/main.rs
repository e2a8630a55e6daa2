//! ITSM gateway CLI - inspect and invoke tools from the command line.
//!
//! - `tools`: print the tool descriptions enabled by a profile
//! - `call`: invoke one tool and print its envelope
//! - `config-schema`: print the JSON schema of the gateway configuration
//!
//! Backend connection settings come from `SERVICENOW_*` environment variables.

use clap::{Parser, Subcommand};
use itsm_gateway::tools::ToolPackages;
use itsm_gateway::types::{config_schema, DEFAULT_PROFILE};
use itsm_gateway::{itsm, BackendClient, Config, Result};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "itsm-gateway", version, about = "Schema-validated tools over an ITSM table API.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print descriptions of the tools enabled by a profile.
    Tools {
        /// Deployment profile.
        #[arg(long, env = "MCP_TOOL_PACKAGE", default_value = DEFAULT_PROFILE)]
        profile: String,
        /// YAML package mapping; the built-in packages are used when unset.
        #[arg(long, env = "TOOL_PACKAGE_CONFIG_PATH", value_name = "FILE")]
        packages: Option<PathBuf>,
    },
    /// Invoke a tool and print the resulting envelope.
    Call {
        /// Tool name.
        tool: String,
        /// Parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
        /// Deployment profile.
        #[arg(long)]
        profile: Option<String>,
    },
    /// Print the configuration JSON schema.
    ConfigSchema,
}

#[tokio::main]
async fn main() -> ExitCode {
    itsm_gateway::observability::init_tracing();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, code = err.error_code(), "command failed");
            let _ = writeln!(std::io::stderr(), "error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Tools { profile, packages } => {
            let registry = itsm::builtin_registry()?;
            let packages = load_packages(packages.as_deref())?;
            packages.validate(&registry)?;
            let view = packages.resolve_profile(&profile, &registry)?;
            print_json(&serde_json::to_value(view.describe_all())?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Call {
            tool,
            params,
            profile,
        } => {
            let config = Config::from_env()?;
            let raw: Value = serde_json::from_str(&params)?;
            let profile = profile.unwrap_or_else(|| config.packages.profile.clone());

            let registry = itsm::builtin_registry()?;
            let packages = load_packages(config.packages.path.as_deref())?;
            packages.validate(&registry)?;
            let view = packages.resolve_profile(&profile, &registry)?;

            let client = BackendClient::from_config(config.server)?;
            let envelope = view.invoke(&tool, &raw, &client).await?;
            print_json(&envelope.to_value())?;
            Ok(if envelope.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::ConfigSchema => {
            print_json(&config_schema())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_packages(path: Option<&Path>) -> Result<ToolPackages> {
    match path {
        Some(path) => ToolPackages::from_path(path),
        None => ToolPackages::builtin(),
    }
}

fn print_json(value: &Value) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
