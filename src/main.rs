//! toolshub: launch and supervise long-running local tools.
//!
//! This is the entry point of the command-line dashboard. It parses arguments, loads
//! settings and the tool store, and runs the event loop that prints supervisor events
//! until every launched tool has ended.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use toolshub::config::{self, Config, DEFAULT_CONFIG_FILE};
use toolshub::logging;
use toolshub::output::{sanitize_text, Dashboard};
use toolshub::store::{NewTool, ToolPatch, ToolStore};
use toolshub::{Event, Status, Supervisor, SupervisorConfig};

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "toolshub",
    version,
    about = "Launch, watch and stop long-running local tools",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to toolshub.toml settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Ignore any toolshub.toml in the current directory.
    #[arg(long, global = true)]
    no_config: bool,
    /// Path to the tool store file.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage tool records.
    Tools {
        #[command(subcommand)]
        command: ToolCommands,
    },
    /// Manage categories.
    Categories {
        #[command(subcommand)]
        command: CategoryCommands,
    },
    /// Launch stored tools and stream their output.
    Run(RunArgs),
    /// Launch an ad-hoc command and stream its output.
    Exec(ExecArgs),
}

#[derive(Debug, Subcommand)]
enum ToolCommands {
    /// List stored tools.
    List(ListArgs),
    /// Add a tool.
    Add(ToolFields),
    /// Update fields of a tool.
    Update {
        /// Tool id.
        id: String,
        #[command(flatten)]
        fields: ToolUpdateFields,
    },
    /// Remove a tool.
    Remove {
        /// Tool id.
        id: String,
    },
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Case-insensitive text matched against name, description and tags.
    #[arg(long)]
    search: Option<String>,
    /// Only tools in this category (id or name).
    #[arg(long)]
    category: Option<String>,
}

#[derive(Debug, Subcommand)]
enum CategoryCommands {
    /// List categories.
    List,
    /// Add a category.
    Add {
        /// Display name.
        name: String,
    },
    /// Remove a category.
    Remove {
        /// Category id.
        id: String,
    },
}

#[derive(Debug, Args)]
struct ToolFields {
    /// Display name.
    #[arg(long)]
    name: String,
    /// Working directory the command runs in.
    #[arg(long)]
    cwd: PathBuf,
    /// Shell command line.
    #[arg(long)]
    command: String,
    /// Category id.
    #[arg(long, default_value = "other")]
    category: String,
    /// Free-form description.
    #[arg(long, default_value = "")]
    description: String,
    /// Web UI address served by the tool.
    #[arg(long)]
    url: Option<String>,
    /// Tag (repeatable).
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Icon reference.
    #[arg(long)]
    icon: Option<String>,
}

#[derive(Debug, Args)]
struct ToolUpdateFields {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    cwd: Option<PathBuf>,
    #[arg(long)]
    command: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    url: Option<String>,
    /// Replace all tags (repeatable).
    #[arg(long = "tag")]
    tags: Option<Vec<String>>,
    #[arg(long)]
    icon: Option<String>,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Tool ids or names to launch.
    tools: Vec<String>,
    /// Launch every stored tool.
    #[arg(long, conflicts_with = "tools")]
    all: bool,
    /// Launch every tool in this category (id or name).
    #[arg(long, conflicts_with_all = ["tools", "all"])]
    category: Option<String>,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Args)]
struct ExecArgs {
    /// Working directory.
    #[arg(long, default_value = ".")]
    cwd: PathBuf,
    /// Id to report events under.
    #[arg(long, default_value = "exec")]
    id: String,
    #[command(flatten)]
    output: OutputArgs,
    /// Command line, passed to the shell as-is.
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

#[derive(Debug, Args)]
struct OutputArgs {
    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,
    /// Strip ANSI escape codes from output.
    #[arg(long)]
    strip_ansi: bool,
    /// Grace period before a launch counts as running (ms).
    #[arg(long)]
    grace_period_ms: Option<u64>,
    /// Time a graceful stop may take before the tree is force-killed (ms).
    #[arg(long)]
    stop_timeout_ms: Option<u64>,
}

/// One tool to launch in a `run` or `exec` session.
#[derive(Debug, Clone)]
struct LaunchTarget {
    id: String,
    label: String,
    command: String,
    cwd: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_settings(&cli)?;
    logging::init_tracing(
        logging::DEFAULT_FILTER,
        cli.log_json || config.log_json.unwrap_or(false),
    );
    let store_path = cli.store.clone().unwrap_or_else(|| config.store_path());

    match cli.command {
        Commands::Tools { command } => tools_command(command, &store_path),
        Commands::Categories { command } => categories_command(command, &store_path),
        Commands::Run(args) => {
            let store = ToolStore::open(&store_path)?;
            let targets = select_targets(&store, &args)?;
            let settings = SessionSettings::new(&config, &args.output);
            run_session(targets, settings).await
        }
        Commands::Exec(args) => {
            let cwd = std::path::absolute(&args.cwd)
                .with_context(|| format!("invalid working directory {}", args.cwd.display()))?;
            let target = LaunchTarget {
                id: args.id.clone(),
                label: args.id.clone(),
                command: args.command.join(" "),
                cwd,
            };
            let settings = SessionSettings::new(&config, &args.output);
            run_session(vec![target], settings).await
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Config> {
    if cli.no_config {
        return Ok(Config::default());
    }
    let path = cli.config.clone().or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    });
    match path {
        Some(path) => config::load_config(&path),
        None => Ok(Config::default()),
    }
}

fn tools_command(command: ToolCommands, store_path: &Path) -> Result<()> {
    let mut store = ToolStore::open(store_path)?;
    match command {
        ToolCommands::List(args) => {
            let names: HashMap<&str, &str> = store
                .categories()
                .iter()
                .map(|c| (c.id.as_str(), c.name.as_str()))
                .collect();
            for tool in store.search(args.search.as_deref(), args.category.as_deref()) {
                let category = names
                    .get(tool.category.as_str())
                    .copied()
                    .unwrap_or(tool.category.as_str());
                println!("{}  {}  [{}]", tool.id, tool.name, category);
                println!("    {} $ {}", tool.working_directory.display(), tool.command);
                if let Some(url) = &tool.web_url {
                    println!("    {}", url);
                }
            }
        }
        ToolCommands::Add(fields) => {
            let tool = store.add_tool(NewTool {
                name: fields.name,
                description: fields.description,
                category: fields.category,
                working_directory: fields.cwd,
                command: fields.command,
                web_url: fields.url,
                tags: fields.tags,
                icon: fields.icon,
            })?;
            info!(id = %tool.id, store = %store.path().display(), "tool added");
            println!("{}", tool.id);
        }
        ToolCommands::Update { id, fields } => {
            store.update_tool(
                &id,
                ToolPatch {
                    name: fields.name,
                    description: fields.description,
                    category: fields.category,
                    working_directory: fields.cwd,
                    command: fields.command,
                    web_url: fields.url,
                    tags: fields.tags,
                    icon: fields.icon,
                },
            )?;
        }
        ToolCommands::Remove { id } => {
            let removed = store.remove_tool(&id)?;
            info!(id = %removed.id, name = %removed.name, "tool removed");
        }
    }
    Ok(())
}

fn categories_command(command: CategoryCommands, store_path: &Path) -> Result<()> {
    let mut store = ToolStore::open(store_path)?;
    match command {
        CategoryCommands::List => {
            for category in store.categories() {
                println!("{}  {}", category.id, category.name);
            }
        }
        CategoryCommands::Add { name } => {
            let category = store.add_category(name)?;
            println!("{}", category.id);
        }
        CategoryCommands::Remove { id } => {
            store.remove_category(&id)?;
        }
    }
    Ok(())
}

fn select_targets(store: &ToolStore, args: &RunArgs) -> Result<Vec<LaunchTarget>> {
    let tools: Vec<_> = if args.all || args.category.is_some() {
        store.search(None, args.category.as_deref()).collect()
    } else {
        args.tools
            .iter()
            .map(|wanted| {
                store
                    .tools()
                    .iter()
                    .find(|tool| tool.id == *wanted || tool.name == *wanted)
                    .with_context(|| format!("no tool with id or name {wanted}"))
            })
            .collect::<Result<_>>()?
    };
    if tools.is_empty() {
        bail!("no tools to run (pass tool ids, --category or --all)");
    }
    Ok(tools
        .into_iter()
        .map(|tool| LaunchTarget {
            id: tool.id.clone(),
            label: tool.name.clone(),
            command: tool.command.clone(),
            cwd: tool.working_directory.clone(),
        })
        .collect())
}

#[derive(Debug, Clone)]
struct SessionSettings {
    // Runtime behavior collected from CLI + config.
    supervisor: SupervisorConfig,
    output_lines: usize,
    json: bool,
    strip_ansi: bool,
}

impl SessionSettings {
    fn new(config: &Config, args: &OutputArgs) -> Self {
        let mut config = config.clone();
        if args.grace_period_ms.is_some() {
            config.grace_period_ms = args.grace_period_ms;
        }
        if args.stop_timeout_ms.is_some() {
            config.stop_timeout_ms = args.stop_timeout_ms;
        }
        Self {
            supervisor: config.supervisor(),
            output_lines: config.output_lines(),
            json: args.json,
            strip_ansi: args.strip_ansi || config.strip_ansi.unwrap_or(false),
        }
    }
}

async fn run_session(targets: Vec<LaunchTarget>, settings: SessionSettings) -> Result<()> {
    let supervisor = Supervisor::new(settings.supervisor);
    let mut events = supervisor.subscribe();
    let mut dashboard = Dashboard::new(settings.output_lines);
    dashboard.load(
        targets.iter().map(|t| t.id.as_str()),
        &supervisor.all_statuses().await,
    );
    let mut printer = Printer::new(&targets, settings.json, settings.strip_ansi);

    for target in &targets {
        dashboard.begin_launch(&target.id);
        if !supervisor
            .launch(&target.id, &target.command, &target.cwd)
            .await
        {
            warn!(id = %target.id, "launch refused");
        }
    }

    let mut interrupts = interrupts().context("failed to listen for Ctrl-C")?;
    let mut force_on_next_interrupt = false;
    loop {
        if supervisor.all_statuses().await.is_empty() {
            break;
        }
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                dashboard.apply(&event);
                printer.print(&event)?;
            }
            Some(()) = interrupts.recv() => {
                if !force_on_next_interrupt && supervisor.has_running_processes().await {
                    force_on_next_interrupt = true;
                    warn!("tools are still running; stopping them, press Ctrl-C again to force");
                    for id in supervisor.all_statuses().await.keys() {
                        supervisor.stop(id).await;
                    }
                } else {
                    supervisor.kill_all().await;
                }
            }
        }
    }

    while let Some(event) = events.try_recv() {
        dashboard.apply(&event);
        printer.print(&event)?;
    }
    printer.flush_all()?;

    let failed: Vec<_> = targets
        .iter()
        .filter(|t| dashboard.status(&t.id) == Status::Error)
        .map(|t| t.label.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("failed: {}", failed.join(", "));
    }
    Ok(())
}

#[cfg(unix)]
fn interrupts() -> std::io::Result<tokio::signal::unix::Signal> {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
}

#[cfg(windows)]
fn interrupts() -> std::io::Result<tokio::signal::windows::CtrlC> {
    tokio::signal::windows::ctrl_c()
}

/// Prints events either as prefixed lines or as JSON lines.
struct Printer {
    labels: HashMap<String, String>,
    json: bool,
    strip_ansi: bool,
    // Output received so far that does not end in a newline yet.
    partial: HashMap<String, String>,
}

impl Printer {
    fn new(targets: &[LaunchTarget], json: bool, strip_ansi: bool) -> Self {
        Self {
            labels: targets
                .iter()
                .map(|t| (t.id.clone(), t.label.clone()))
                .collect(),
            json,
            strip_ansi,
            partial: HashMap::new(),
        }
    }

    fn print(&mut self, event: &Event) -> Result<()> {
        if self.json {
            let line = serde_json::to_string(event)?;
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", line)?;
            return Ok(());
        }
        match event {
            Event::Output { id, text } => {
                let text = sanitize_text(text, self.strip_ansi);
                let pending = self.partial.entry(id.clone()).or_default();
                pending.push_str(&text);
                let Some(end) = pending.rfind('\n') else {
                    return Ok(());
                };
                let complete: String = pending.drain(..=end).collect();
                let prefix = self.prefix(id);
                let mut stdout = std::io::stdout().lock();
                for line in complete.lines() {
                    writeln!(stdout, "{} {}", prefix, line.trim_end_matches('\r'))?;
                }
            }
            Event::StatusChanged { id, status } => {
                if status.is_terminal() {
                    self.flush(id)?;
                }
                let prefix = self.prefix(id);
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{} ● {}", prefix, status)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self, id: &str) -> Result<()> {
        let Some(pending) = self.partial.remove(id) else {
            return Ok(());
        };
        if !pending.is_empty() {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{} {}", self.prefix(id), pending)?;
        }
        Ok(())
    }

    fn flush_all(&mut self) -> Result<()> {
        let ids: Vec<String> = self.partial.keys().cloned().collect();
        for id in ids {
            self.flush(&id)?;
        }
        Ok(())
    }

    fn prefix(&self, id: &str) -> String {
        format!("[{}]", self.labels.get(id).map(String::as_str).unwrap_or(id))
    }
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_collects_trailing_command() {
        let cli = Cli::parse_from([
            "toolshub", "exec", "--cwd", "/tmp", "--", "npm", "run", "dev", "&&", "echo", "ok",
        ]);
        let Commands::Exec(args) = cli.command else {
            panic!("expected exec");
        };
        assert_eq!(args.command.join(" "), "npm run dev && echo ok");
        assert_eq!(args.id, "exec");
    }

    #[test]
    fn list_accepts_search_and_category() {
        let cli = Cli::parse_from([
            "toolshub", "tools", "list", "--search", "whisper", "--category", "ai-audio",
        ]);
        let Commands::Tools {
            command: ToolCommands::List(args),
        } = cli.command
        else {
            panic!("expected tools list");
        };
        assert_eq!(args.search.as_deref(), Some("whisper"));
        assert_eq!(args.category.as_deref(), Some("ai-audio"));
    }

    #[test]
    fn run_by_category_selects_only_that_category() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ToolStore::open(dir.path().join("tools.toml")).unwrap();
        for (name, category) in [("A", "dev-tools"), ("B", "ai-audio"), ("C", "dev-tools")] {
            store
                .add_tool(NewTool {
                    name: name.into(),
                    category: category.into(),
                    working_directory: dir.path().to_path_buf(),
                    command: "true".into(),
                    ..NewTool::default()
                })
                .unwrap();
        }
        let cli = Cli::parse_from(["toolshub", "run", "--category", "dev-tools"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let labels: Vec<_> = select_targets(&store, &args)
            .unwrap()
            .into_iter()
            .map(|t| t.label)
            .collect();
        assert_eq!(labels, ["A", "C"]);

        let cli = Cli::parse_from(["toolshub", "run", "--category", "other"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(select_targets(&store, &args).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupts_between_polls_are_not_lost() {
        use std::time::Duration;

        let mut stream = interrupts().unwrap();
        for _ in 0..2 {
            unsafe { libc::raise(libc::SIGINT) };
            // Not polling while the signal arrives; it must still be delivered.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let received = tokio::time::timeout(Duration::from_secs(2), stream.recv()).await;
            assert_eq!(received.unwrap(), Some(()));
        }
    }

    #[test]
    fn output_args_override_config() {
        let config = Config {
            grace_period_ms: Some(900),
            strip_ansi: Some(true),
            ..Config::default()
        };
        let args = OutputArgs {
            json: false,
            strip_ansi: false,
            grace_period_ms: Some(100),
            stop_timeout_ms: None,
        };
        let settings = SessionSettings::new(&config, &args);
        assert_eq!(
            settings.supervisor.grace_period,
            std::time::Duration::from_millis(100)
        );
        assert!(settings.strip_ansi);
        assert_eq!(settings.output_lines, 500);
    }
}
