//! Schema-checked document generation CLI.
//!
//! Renders a template's document from source files, either in one shot with
//! validation-repair retries or through a bounded analysis conversation that
//! calls research agents (`--agent`).

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docgen::core::params::parse_override;
use docgen::errors::diagnostic_report;
use docgen::exit_codes;
use docgen::generate::{GenerateRequest, GenerationMode, Generator};
use docgen::io::agents::AgentRegistry;
use docgen::io::cache::ArtifactCache;
use docgen::io::cancel::CancelToken;
use docgen::io::config::{DEFAULT_CONFIG_FILE, DocgenConfig, load_config, write_config};
use docgen::io::model::OpenAiChatModel;
use docgen::io::templates::TemplateStore;
use docgen::logging;

#[derive(Parser)]
#[command(
    name = "docgen",
    version,
    about = "Generate schema-checked documents with an LLM and research agents"
)]
struct Cli {
    /// Config file; missing means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a document from a template and source locations.
    Generate {
        /// Template name (see `docgen templates`).
        template: String,
        /// Source files or directories.
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Research agent for an analysis session (see `docgen agents`).
        #[arg(long)]
        agent: Option<String>,
        /// Template/agent parameter as key=value; repeatable.
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Output file.
        #[arg(short, long, default_value = "document.html")]
        output: PathBuf,
        /// Overwrite an existing output file.
        #[arg(short, long)]
        force: bool,
        /// Print the rendered document instead of writing it.
        #[arg(long)]
        dry_run: bool,
        /// Override `analysis.max_turns`.
        #[arg(long)]
        max_turns: Option<u32>,
    },
    /// List available templates.
    Templates,
    /// List discovered research agents and their tools.
    Agents,
    /// Remove cached agent artifacts older than 24 hours.
    Clean,
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    parse_override(raw).ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            if let Some(report) = diagnostic_report(&err) {
                eprintln!("{report}");
            }
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate {
            template,
            sources,
            agent,
            params,
            output,
            force,
            dry_run,
            max_turns,
        } => {
            let request = GenerateRequest {
                template,
                sources,
                agent,
                params: params.into_iter().collect::<BTreeMap<_, _>>(),
                output,
                force,
                dry_run,
                max_turns,
            };
            cmd_generate(&cli.config, &request)
        }
        Command::Templates => cmd_templates(&cli.config),
        Command::Agents => cmd_agents(&cli.config),
        Command::Clean => cmd_clean(&cli.config),
        Command::Init { force } => cmd_init(&cli.config, force),
    }
}

fn cmd_generate(config_path: &Path, request: &GenerateRequest) -> Result<()> {
    let config = load_config(config_path)?;
    let templates = load_templates(&config)?;
    let agents = AgentRegistry::load_dir(&config.paths.agents_dir)?;
    let model = OpenAiChatModel::from_config(&config.model, &config.retry)?;
    let generator = Generator::new(&config, &templates, &agents, &model)?;

    // No signal handler is installed, so this token never fires from the CLI.
    // Library callers cancel by sharing their own token.
    let outcome = generator.generate(request, &CancelToken::new())?;
    if !outcome.written {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(outcome.rendered.as_bytes())
            .context("write document to stdout")?;
        return Ok(());
    }

    match &outcome.mode {
        GenerationMode::Direct { attempts } => {
            println!("{} ({attempts} attempt(s))", outcome.output.display());
        }
        GenerationMode::Analysis {
            agent,
            turns_used,
            model_calls,
            transcript,
        } => {
            println!(
                "{} (agent {agent}, {turns_used} turn(s), {model_calls} model call(s))",
                outcome.output.display()
            );
            if let Some(transcript) = transcript {
                println!("transcript: {}", transcript.display());
            }
        }
    }
    Ok(())
}

fn cmd_templates(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let templates = load_templates(&config)?;
    for template in templates.templates() {
        println!("{}\t{}", template.name, template.description);
    }
    Ok(())
}

fn cmd_agents(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let agents = AgentRegistry::load_dir(&config.paths.agents_dir)?;
    if agents.names().is_empty() {
        println!("no agents in {}", config.paths.agents_dir.display());
        return Ok(());
    }
    for agent in agents.agents() {
        println!("{}\t{}", agent.name, agent.description);
        for tool in &agent.tools {
            println!("  {}\t{}", tool.name, tool.description);
        }
    }
    Ok(())
}

fn cmd_clean(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let cache = ArtifactCache::new(&config.paths.cache_dir)?;
    let report = cache.clean();
    println!(
        "removed {}, retained {}, failed {}",
        report.removed, report.retained, report.failures
    );
    Ok(())
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (pass --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &DocgenConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(())
}

fn load_templates(config: &DocgenConfig) -> Result<TemplateStore> {
    let store = TemplateStore::builtin()?;
    match &config.paths.templates_dir {
        Some(dir) => store.with_dir(dir),
        None => Ok(store),
    }
}
