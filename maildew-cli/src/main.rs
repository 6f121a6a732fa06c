//! maildew CLI - local cache of remote IMAP mailboxes.

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use dialoguer::{Confirm, Password};
use env_logger::fmt::WriteStyle;
use log::{LevelFilter, debug, info};
use maildew_core::{
    Account, AppConfig, AppPaths, MailClient, MailStore, Registrar, Repo, Store, StoreLocation,
    SyncOptions,
};
use serde::Serialize;
use serde_json::Value;

const APP_NAME: &str = env!("CARGO_PKG_NAME");

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("config loaded from {}", ctx.paths.global_config.display());

    match cli.command {
        Command::Register(args) => handle_register(&ctx, args),
        Command::Sync(args) => handle_sync(&ctx, args),
        Command::Mailboxes(args) => handle_mailboxes(&ctx, args),
        Command::Messages(args) => handle_messages(&ctx, args),
        Command::Dump => handle_dump(&ctx),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Keep a local key-value cache of remote IMAP mailboxes.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[arg(long, global = true)]
    debug: bool,
    #[arg(long, global = true)]
    trace: bool,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    #[arg(short = 'y', long = "yes", alias = "force", global = true)]
    assume_yes: bool,
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register an account and mirror its mailboxes
    Register(RegisterArgs),
    /// Fetch new messages for a registered account
    Sync(SyncArgs),
    /// List cached mailboxes of an account
    #[command(alias = "mb")]
    Mailboxes(AccountArgs),
    /// List cached messages of a mailbox
    #[command(alias = "msgs")]
    Messages(MessagesArgs),
    /// Print every stored key and value
    Dump,
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct AccountArgs {
    /// Account username (email address)
    username: String,
}

#[derive(Debug, Args)]
struct RegisterArgs {
    /// Account username (email address)
    username: String,
    /// Server address; derived from the username and dialed over TLS when omitted
    #[arg(long, value_name = "HOST:PORT")]
    address: Option<String>,
    /// Account password; prompted for when not given
    #[arg(long, env = "MAILDEW_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Account username (email address)
    username: String,
    /// Server address; derived from the username and dialed over TLS when omitted
    #[arg(long, value_name = "HOST:PORT")]
    address: Option<String>,
}

#[derive(Debug, Args)]
struct MessagesArgs {
    /// Account username (email address)
    username: String,
    /// Mailbox name
    #[arg(default_value = "INBOX")]
    mailbox: String,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    Path,
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone()).map_err(|e| anyhow!("{e}"))?;
        AppConfig::ensure_default(&paths.global_config).map_err(|e| anyhow!("{e}"))?;
        let config = AppConfig::load(&paths).map_err(|e| anyhow!("{e}"))?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

        builder.filter_level(self.effective_log_level());

        let force_color = matches!(self.common.color, ColorOption::Always)
            || env::var_os("FORCE_COLOR").is_some();
        let disable_color = self.common.no_color
            || matches!(self.common.color, ColorOption::Never)
            || env::var_os("NO_COLOR").is_some();

        if disable_color {
            builder.write_style(WriteStyle::Never);
        } else if force_color {
            builder.write_style(WriteStyle::Always);
        } else {
            builder.write_style(WriteStyle::Auto);
        }

        if self.common.diagnostics {
            builder.format_timestamp_millis();
            builder.format_module_path(true);
            builder.format_target(true);
        }

        builder.try_init().or_else(|err| {
            if self.common.verbose > 0 {
                eprintln!("logger already initialized: {err}");
            }
            Ok(())
        })
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn open_store(&self) -> Result<Store> {
        let location = self
            .paths
            .store_location(&self.config.storage)
            .map_err(|e| anyhow!("{e}"))?;
        match location {
            StoreLocation::Memory => {
                debug!("using in-memory store");
                Store::open_memory().map_err(|e| anyhow!("{e}"))
            }
            StoreLocation::File(path) => {
                debug!("opening store at {}", path.display());
                Store::open(&path).with_context(|| format!("opening store at {}", path.display()))
            }
        }
    }

    fn client(&self) -> MailClient {
        MailClient::new(Registrar::imap(SyncOptions::from(&self.config.sync)))
    }
}

/// Repositories over one store, released together.
struct Session {
    store: Store,
    repos: MailStore,
}

impl Session {
    fn open(ctx: &RuntimeContext) -> Result<Self> {
        let store = ctx.open_store()?;
        let repos = MailStore::new(&store, ctx.config.storage.sequence_bandwidth);
        Ok(Self { store, repos })
    }

    fn account(&self, username: &str) -> Result<Account> {
        self.repos
            .find_account(username)?
            .ok_or_else(|| anyhow!("account {username} is not registered"))
    }

    fn close(self) -> Result<()> {
        let Session { store, mut repos } = self;
        repos.close()?;
        drop(repos);
        store.close()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RegisterSummary {
    username: String,
    uuid: String,
    mailboxes: usize,
    messages: usize,
}

fn handle_register(ctx: &RuntimeContext, args: RegisterArgs) -> Result<()> {
    let mut session = Session::open(ctx)?;
    if session.repos.find_account(&args.username)?.is_some() {
        bail!("account {} is already registered", args.username);
    }

    let password = match args.password {
        Some(password) => password,
        None => Password::new()
            .with_prompt(format!("Password for {}", args.username))
            .interact()
            .context("reading password")?,
    };
    let mut account = Account::new(args.username, password);

    let mut client = ctx.client();
    let repos = &mut session.repos;
    client
        .register(
            args.address.as_deref(),
            &mut repos.accounts,
            &mut repos.mailboxes,
            &mut repos.messages,
            &mut account,
        )
        .with_context(|| format!("registering {}", account.username))?;
    client.close()?;

    let mailboxes = repos.mailboxes.fetch_by_owner(account.uuid.into())?;
    let mut messages = 0;
    for mailbox in &mailboxes {
        messages += repos.messages.fetch_by_owner(mailbox.uuid.into())?.len();
    }
    info!("registered {}", account.username);

    let summary = RegisterSummary {
        username: account.username.clone(),
        uuid: account.uuid.to_string(),
        mailboxes: mailboxes.len(),
        messages,
    };
    session.close()?;
    emit_output(&ctx.common, &summary)
}

fn handle_sync(ctx: &RuntimeContext, args: SyncArgs) -> Result<()> {
    let mut session = Session::open(ctx)?;
    let account = session.account(&args.username)?;

    let mut client = ctx.client();
    client
        .connect(args.address.as_deref(), &account)
        .with_context(|| format!("connecting as {}", account.username))?;
    let repos = &mut session.repos;
    let reports = client.resync(&repos.mailboxes, &mut repos.messages, &account)?;
    client.close()?;

    let added: usize = reports.iter().map(|r| r.added.len()).sum();
    info!("synced {} mailboxes, {added} new messages", reports.len());
    session.close()?;
    emit_output(&ctx.common, &reports)
}

fn handle_mailboxes(ctx: &RuntimeContext, args: AccountArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let account = session.account(&args.username)?;
    let mailboxes = session.repos.mailboxes.fetch_by_owner(account.uuid.into())?;
    session.close()?;
    emit_output(&ctx.common, &mailboxes)
}

fn handle_messages(ctx: &RuntimeContext, args: MessagesArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let account = session.account(&args.username)?;
    let mailbox = session
        .repos
        .mailboxes
        .fetch_by_owner(account.uuid.into())?
        .into_iter()
        .find(|m| m.name == args.mailbox)
        .ok_or_else(|| anyhow!("no mailbox named {} for {}", args.mailbox, args.username))?;
    let messages = session.repos.messages.fetch_by_owner(mailbox.uuid.into())?;
    session.close()?;
    emit_output(&ctx.common, &messages)
}

fn handle_dump(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    let mut stdout = io::stdout().lock();
    store.dump_to(&mut stdout)?;
    stdout.flush()?;
    store.close()?;
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => emit_output(&ctx.common, &ctx.config),
        ConfigCommand::Path => {
            println!("{}", ctx.paths.global_config.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if !ctx.common.assume_yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "Overwrite {} with defaults?",
                        ctx.paths.global_config.display()
                    ))
                    .default(false)
                    .interact()
                    .context("reading confirmation")?;
                if !confirmed {
                    return Ok(());
                }
            }
            AppConfig::write_default(&ctx.paths.global_config).map_err(|e| anyhow!("{e}"))
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn emit_output<T: ?Sized + Serialize + std::fmt::Debug>(
    opts: &CommonOpts,
    value: &T,
) -> Result<()> {
    if opts.json {
        let json = serde_json::to_string_pretty(value)?;
        println!("{json}");
        return Ok(());
    }

    let v = serde_json::to_value(value)?;
    pretty_print_value(&v);
    Ok(())
}

fn pretty_print_value(v: &Value) {
    match v {
        Value::Array(items) if items.is_empty() => println!("(none)"),
        Value::Array(items) => {
            for item in items {
                pretty_print_item(item);
            }
        }
        Value::Object(_) => pretty_print_item(v),
        _ => println!("{v}"),
    }
}

fn pretty_print_item(v: &Value) {
    let Value::Object(obj) = v else {
        println!("{v}");
        return;
    };

    let fields: Vec<String> = obj
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}: {s}"),
            Value::Object(_) => format!("{key}: {}", compact(value)),
            Value::Array(items) => format!(
                "{key}: [{}]",
                items.iter().map(compact).collect::<Vec<_>>().join(", ")
            ),
            other => format!("{key}: {other}"),
        })
        .collect();
    println!("{}", fields.join("  "));
}

fn compact(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
