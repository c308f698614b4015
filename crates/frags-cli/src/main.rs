//! Frags CLI: run LLM plans from the command line.
//!
//! Reuses the plan runtime (frags-core) and the web surface (frags-server).

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use frags_cli::commands;
use frags_core::config::{DEFAULT_CONFIG_FILE, DEFAULT_LOG_FILTER};
use frags_core::output::OutputFormat;
use frags_core::{Settings, ToolsConfig};
use frags_server::ServeMode;

const DEBUG_LOG_FILTER: &str = "frags_core=debug,frags_server=debug,frags_cli=debug";

/// Frags CLI: Structured LLM plan runner
#[derive(Parser)]
#[command(name = "frags", version, about = "Frags CLI: Structured LLM plan runner")]
pub struct Cli {
    /// Settings file (.env format)
    #[arg(long, global = true, env = "FRAGS_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Debug logging and runner events on stderr
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
    Template,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Yaml => OutputFormat::Yaml,
            Format::Json => OutputFormat::Json,
            Format::Template => OutputFormat::Template,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan file
    Run {
        /// Plan YAML file
        plan: PathBuf,
        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "yaml")]
        format: Format,
        /// Template file for `-f template`
        #[arg(short = 't', long)]
        template: Option<PathBuf>,
        /// Write output to a file instead of stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        /// Plan parameter as key=value (repeatable)
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
        /// Tools file (MCP servers and collections, JSON)
        #[arg(long, env = "FRAGS_TOOLS")]
        tools: Option<PathBuf>,
    },

    /// Send a single prompt to the configured model
    Ask {
        prompt: String,
        /// System prompt
        #[arg(long)]
        system: Option<String>,
    },

    /// Show the resolved settings
    Config,

    /// Render a saved output file through a template
    Render {
        /// YAML or JSON output of a previous run
        data: PathBuf,
        /// Template file
        #[arg(short = 't', long)]
        template: PathBuf,
    },

    /// Run a transformer script
    Script {
        file: PathBuf,
        /// Script arguments as JSON
        #[arg(long)]
        args: Option<String>,
    },

    /// Serve plans over HTTP
    Web {
        #[command(subcommand)]
        mode: WebMode,
    },
}

#[derive(Subcommand)]
enum WebMode {
    /// Serve /execute and /run/{file}
    Execute {
        #[command(flatten)]
        bind: Bind,
    },
    /// Serve /run/{file} and the MCP endpoint
    Run {
        #[command(flatten)]
        bind: Bind,
    },
}

#[derive(clap::Args)]
struct Bind {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Tools file (MCP servers and collections, JSON)
    #[arg(long, env = "FRAGS_TOOLS")]
    tools: Option<PathBuf>,
}

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Settings for commands that talk to a model. A missing file is reported with help.
fn settings_or_exit(cli: &Cli) -> Settings {
    match commands::load_settings(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            Cli::command().print_help().ok();
            std::process::exit(1);
        }
    }
}

fn load_tools(path: Option<&PathBuf>) -> Result<ToolsConfig, String> {
    match path {
        Some(path) => ToolsConfig::from_file(path).map_err(|e| e.to_string()),
        None => Ok(ToolsConfig::default()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let Some(command) = cli.command.as_ref() else {
        // No subcommand, show help
        Cli::command().print_help().ok();
        println!();
        return;
    };

    let needs_settings = matches!(
        command,
        Commands::Run { .. } | Commands::Ask { .. } | Commands::Config | Commands::Web { .. }
    );
    let settings = needs_settings.then(|| settings_or_exit(&cli));
    let filter = match (&settings, cli.debug) {
        (_, true) => DEBUG_LOG_FILTER.to_string(),
        (Some(settings), false) => settings.log_filter.clone(),
        (None, false) => DEFAULT_LOG_FILTER.to_string(),
    };
    init_tracing(&filter);

    let result = match (command, settings) {
        (
            Commands::Run {
                plan,
                format,
                template,
                output,
                params,
                tools,
            },
            Some(settings),
        ) => {
            let run = async {
                let options = commands::run::RunOptions {
                    plan: plan.clone(),
                    format: (*format).into(),
                    template: template.clone(),
                    output: output.clone(),
                    params: commands::parse_params(params)?,
                    tools: tools.clone(),
                    verbose: cli.debug,
                    timeout: settings.timeout,
                };
                let runner = commands::build_runner(&settings, commands::ai_factory(&settings)?);
                commands::run::run(&runner, options).await
            };
            run.await
        }

        (Commands::Ask { prompt, system }, Some(settings)) => {
            match commands::ai_factory(&settings) {
                Ok(factory) => commands::ask::ask(factory.as_ref(), prompt, system.as_deref())
                    .await
                    .map(|reply| println!("{}", reply)),
                Err(e) => Err(e),
            }
        }

        (Commands::Config, Some(settings)) => commands::config::show(&cli.config, &settings),

        (Commands::Render { data, template }, _) => {
            commands::render::render(data, template).map(|out| println!("{}", out))
        }

        (Commands::Script { file, args }, _) => commands::script::run_script(file, args.as_deref())
            .await
            .map(|value| commands::print_json(&value)),

        (Commands::Web { mode }, Some(settings)) => {
            let (mode, bind) = match mode {
                WebMode::Execute { bind } => (ServeMode::Execute, bind),
                WebMode::Run { bind } => (ServeMode::Run, bind),
            };
            match (commands::ai_factory(&settings), load_tools(bind.tools.as_ref())) {
                (Ok(factory), Ok(tools)) => {
                    let runner = commands::build_runner(&settings, factory);
                    commands::web::run(&settings, runner, tools, mode, bind.host.clone(), bind.port)
                        .await
                }
                (Err(e), _) | (_, Err(e)) => Err(e),
            }
        }

        (_, None) => Err("Settings were not loaded".to_string()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
