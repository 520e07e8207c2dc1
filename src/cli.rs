use crate::admin::{AdminUsers, DEFAULT_PAGE_SIZE};
use crate::api::{ApiClient, HttpTransport};
use crate::config::{self, Config};
use crate::executions::{watch_execution, ExecutionStore, ExecutionSubmitter, WatchParams};
use crate::model::{
    CancelOutcome, ExecutionRecord, ExecutionRequest, ExecutionStatus, NewUser, ResourceHints,
    SubmitOutcome, UserPrivileges, UserUpdate, WatchEvent,
};
use crate::notebooks::{NotebookFile, NotebookStore};
use crate::render;
use crate::session::guard::{self, CommandNavigator, GuardDecision, View};
use crate::session::store::FileTokenStore;
use crate::session::{Credentials, SessionBootstrapper, SessionContext};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// Results go to stdout (as JSON with `--json`), progress and notices to stderr.
#[derive(Clone)]
struct Output {
    tx: mpsc::UnboundedSender<OutputLine>,
    json: bool,
}

impl Output {
    fn line(&self, line: impl Into<String>) {
        let _ = self.tx.send(OutputLine::Stdout(line.into()));
    }

    fn lines(&self, lines: Vec<String>) {
        for line in lines {
            self.line(line);
        }
    }

    fn note(&self, line: impl Into<String>) {
        let _ = self.tx.send(OutputLine::Stderr(line.into()));
    }

    /// Print `value` as JSON in JSON mode, otherwise the text rendering.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> Vec<String>) -> Result<()> {
        if self.json {
            self.line(serde_json::to_string_pretty(value)?);
        } else {
            self.lines(text());
        }
        Ok(())
    }
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "nbrun",
    version,
    about = "Run and track notebooks on a notebook execution service"
)]
pub struct Cli {
    /// Backend base URL (`/api/v1` is appended unless present)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Sign in and store the session token
    Login {
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
        /// Ask for a long-lived token
        #[arg(long)]
        remember_me: bool,
    },
    /// Forget the stored session token
    Logout,
    /// Create an account and sign in
    Register {
        email: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        full_name: Option<String>,
    },
    /// Email a password reset link
    ForgotPassword { email: String },
    /// Set a new password using the token from a reset email
    ResetPassword {
        token: String,
        /// Read from stdin when omitted
        #[arg(long)]
        new_password: Option<String>,
    },
    /// Show the signed-in user
    Whoami,
    /// Show or update the signed-in user's profile
    Profile {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        full_name: Option<String>,
        /// Requires --current-password
        #[arg(long, requires = "current_password")]
        new_password: Option<String>,
        #[arg(long)]
        current_password: Option<String>,
    },
    /// Browse and manage notebook templates
    #[command(subcommand)]
    Notebooks(NotebooksCommand),
    /// Submit a notebook for execution
    Run(RunArgs),
    /// Inspect and control executions
    #[command(subcommand)]
    Executions(ExecutionsCommand),
    /// Manage user accounts (superusers only)
    #[command(subcommand)]
    Admin(AdminCommand),
}

#[derive(Debug, Subcommand, Clone)]
pub enum AdminCommand {
    /// List user accounts
    Users {
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: u32,
    },
    /// Set a user's superuser and active flags
    SetPrivileges {
        id: String,
        /// Grant superuser; omitting it revokes
        #[arg(long)]
        superuser: bool,
        /// Deactivate the account
        #[arg(long)]
        inactive: bool,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum NotebooksCommand {
    /// List notebooks, optionally under a path prefix
    List {
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Show a notebook's metadata
    Show { path: String },
    /// Upload a local notebook
    Upload { file: PathBuf },
    /// Validate a local notebook without storing it
    Validate { file: PathBuf },
    /// Rewrite a local notebook's metadata
    UpdateMetadata {
        file: PathBuf,
        /// Metadata as a JSON object
        #[arg(long)]
        metadata: String,
        /// Where to write the updated notebook
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Debug, clap::Args, Clone)]
pub struct RunArgs {
    /// Notebook path on the server
    pub path: String,

    /// Notebook parameter as key=value; values are parsed as JSON when possible
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// Run even if an identical execution exists
    #[arg(long)]
    pub force: bool,

    #[arg(long)]
    pub cpu_milli: Option<u32>,

    #[arg(long)]
    pub memory_mib: Option<u32>,

    #[arg(long)]
    pub python_version: Option<String>,

    /// Poll until the execution finishes
    #[arg(long)]
    pub watch: bool,

    /// Poll interval for --watch, e.g. 2s or 500ms (overrides config)
    #[arg(long)]
    pub poll_interval: Option<humantime::Duration>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ExecutionsCommand {
    /// List your executions
    List,
    /// Show one execution
    Show { id: String },
    /// Print an execution's report as JSON
    Report { id: String },
    /// Cancel a pending or running execution
    Cancel { id: String },
    /// Poll an execution until it finishes (Ctrl-C stops watching, not the job)
    Watch {
        id: String,
        /// Poll interval, e.g. 2s or 500ms (overrides config)
        #[arg(long)]
        poll_interval: Option<humantime::Duration>,
    },
}

impl Command {
    /// The view a command lands on, for access checks and login redirects.
    fn view(&self) -> View {
        match self {
            Command::Login { .. } => View::Login,
            Command::Register { .. } => View::Register,
            Command::ForgotPassword { .. } => View::ForgotPassword,
            Command::ResetPassword { .. } => View::ResetPassword,
            Command::Logout => View::Logout,
            Command::Whoami | Command::Profile { .. } => View::Profile,
            Command::Notebooks(_) | Command::Run(_) => View::Notebooks,
            Command::Executions(_) => View::Executions,
            Command::Admin(_) => View::Admin,
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing parameter name in `{raw}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Build an `ExecutionRequest` from CLI arguments, falling back to config defaults.
fn build_request(args: &RunArgs, cfg: &Config) -> ExecutionRequest {
    let mut request = ExecutionRequest::new(args.path.clone());
    request.parameters = args.params.iter().cloned().collect();
    request.python_version = args
        .python_version
        .clone()
        .or_else(|| cfg.python_version.clone());
    request.resources = ResourceHints {
        cpu_milli: args.cpu_milli.or(cfg.default_cpu_milli),
        memory_mib: args.memory_mib.or(cfg.default_memory_mib),
    };
    request.force_rerun = args.force;
    request
}

/// Poll settings for a watch: the flag wins over the config file.
fn watch_params(flag: Option<humantime::Duration>, cfg: &Config) -> Result<WatchParams> {
    let poll_interval = flag.map_or(cfg.poll_interval, Into::into);
    config::check_poll_interval(poll_interval).map_err(anyhow::Error::msg)?;
    Ok(WatchParams {
        poll_interval,
        max_failures: cfg.max_poll_failures,
    })
}

async fn read_password(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    let _ = std::io::stderr().flush();
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .context("password prompt task failed")?
    .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => read_password("Password: ").await,
    }
}

/// Everything a command needs once the session is bootstrapped.
struct CommandContext {
    cfg: Config,
    api: ApiClient,
    bootstrapper: SessionBootstrapper,
    out: Output,
}

pub async fn run(args: Cli) -> Result<()> {
    let mut cfg = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(url) = args.api_url.as_deref() {
        cfg.api_url = url.to_string();
    }
    tracing::debug!("Using API at {}", cfg.api_base_url());

    let view = args.command.view();
    let token_path = cfg
        .token_path()
        .context("no data directory for the session token; set token_path in the config")?;
    let token_store = FileTokenStore::new(token_path);
    tracing::debug!("Token store at {}", token_store.path().display());
    let session = Arc::new(SessionContext::open(Box::new(token_store)));
    let navigator = match args.command {
        Command::Logout => CommandNavigator::new(view).quiet(),
        _ => CommandNavigator::new(view),
    };
    let transport = HttpTransport::new(&cfg).context("failed to set up HTTP client")?;
    let api = ApiClient::new(Arc::new(transport), session.clone(), Arc::new(navigator));
    let bootstrapper = SessionBootstrapper::new(api.clone(), session.clone());

    match guard::before_each(view, &session, &bootstrapper).await {
        GuardDecision::Proceed => {}
        GuardDecision::RedirectHome if session.demo_mode() => {
            anyhow::bail!("`{}` is not available in demo mode", view.name());
        }
        GuardDecision::RedirectHome => {
            let who = session
                .user()
                .map(|u| u.email)
                .unwrap_or_else(|| "an existing account".to_string());
            anyhow::bail!("Already logged in as {who}; run `nbrun logout` first");
        }
        GuardDecision::RedirectLogin { redirect } => {
            anyhow::bail!(
                "Authentication required. Run `nbrun login` before using {}.",
                redirect.name()
            );
        }
    }

    let (out_tx, out_handle) = spawn_output_writer();
    let ctx = CommandContext {
        cfg,
        api,
        bootstrapper,
        out: Output {
            tx: out_tx,
            json: args.json,
        },
    };
    let result = dispatch(args.command, &ctx).await;

    drop(ctx);
    let _ = out_handle.await;
    result
}

async fn dispatch(command: Command, ctx: &CommandContext) -> Result<()> {
    match command {
        Command::Login {
            email,
            password,
            remember_me,
        } => {
            let password = password_or_prompt(password).await?;
            let user = ctx
                .bootstrapper
                .login(&Credentials {
                    email,
                    password,
                    remember_me,
                })
                .await
                .context("login failed")?;
            if let Some(user) = user {
                ctx.out.emit(&user, || {
                    vec![format!("Logged in as {}", user.display_name())]
                })?;
            }
            Ok(())
        }
        Command::Logout => {
            if ctx.bootstrapper.logout() {
                ctx.out.note("Logged out");
            } else {
                ctx.out.note("Demo mode is active; there is no session to log out of");
            }
            Ok(())
        }
        Command::Register {
            email,
            password,
            username,
            full_name,
        } => {
            let password = password_or_prompt(password).await?;
            let user = ctx
                .bootstrapper
                .register(&NewUser {
                    email,
                    password,
                    username,
                    full_name,
                })
                .await
                .context("registration failed")?;
            if let Some(user) = user {
                ctx.out.emit(&user, || {
                    vec![format!("Registered and logged in as {}", user.display_name())]
                })?;
            }
            Ok(())
        }
        Command::ForgotPassword { email } => {
            ctx.bootstrapper
                .forgot_password(&email)
                .await
                .context("password reset request failed")?;
            ctx.out.note(format!(
                "If an account exists for {email}, a reset link has been sent"
            ));
            Ok(())
        }
        Command::ResetPassword {
            token,
            new_password,
        } => {
            let new_password = match new_password {
                Some(p) => p,
                None => read_password("New password: ").await?,
            };
            let user = ctx
                .bootstrapper
                .reset_password(&token, &new_password)
                .await
                .context("password reset failed")?;
            ctx.out.emit(&user, || {
                vec![format!(
                    "Password updated for {}. Run `nbrun login` to sign in.",
                    user.email
                )]
            })
        }
        Command::Whoami => {
            // The guard already loaded the profile; only fetch if it did not.
            let user = match ctx.api.session().user() {
                Some(user) => user,
                None => ctx
                    .bootstrapper
                    .fetch_current_user()
                    .await
                    .context("failed to load current user")?,
            };
            let demo = ctx.api.session().demo_mode();
            ctx.out.emit(&user, || {
                let mut lines = render::user_lines(&user);
                if demo {
                    lines.push("Mode: demo".to_string());
                }
                lines
            })
        }
        Command::Profile {
            email,
            username,
            full_name,
            new_password,
            current_password,
        } => {
            let changes = UserUpdate {
                email,
                username,
                full_name,
                current_password,
                new_password,
            };
            let user = if changes.is_empty() {
                ctx.bootstrapper.fetch_current_user().await
            } else {
                ctx.bootstrapper.update_user(&changes).await
            }
            .context("failed to update profile")?;
            ctx.out.emit(&user, || render::user_lines(&user))
        }
        Command::Notebooks(cmd) => run_notebooks(cmd, ctx).await,
        Command::Run(args) => run_submit(args, ctx).await,
        Command::Executions(cmd) => run_executions(cmd, ctx).await,
        Command::Admin(cmd) => run_admin(cmd, ctx).await,
    }
}

async fn run_admin(cmd: AdminCommand, ctx: &CommandContext) -> Result<()> {
    let mut admin = AdminUsers::new(ctx.api.clone());
    admin.ensure_admin()?;
    match cmd {
        AdminCommand::Users { skip, limit } => {
            let users = admin
                .list(skip, limit)
                .await
                .context("failed to list users")?;
            ctx.out.emit(&users, || {
                if users.is_empty() {
                    return vec!["No users found".to_string()];
                }
                users.iter().map(render::user_row).collect()
            })
        }
        AdminCommand::SetPrivileges {
            id,
            superuser,
            inactive,
        } => {
            let user = admin
                .set_privileges(
                    &id,
                    UserPrivileges {
                        is_superuser: superuser,
                        is_active: !inactive,
                    },
                )
                .await
                .with_context(|| format!("failed to update privileges for {id}"))?;
            ctx.out.emit(&user, || render::user_lines(&user))
        }
    }
}

async fn run_notebooks(cmd: NotebooksCommand, ctx: &CommandContext) -> Result<()> {
    let mut store = NotebookStore::new(ctx.api.clone());
    match cmd {
        NotebooksCommand::List { prefix } => {
            let notebooks = store
                .list(&prefix)
                .await
                .context("failed to list notebooks")?;
            ctx.out.emit(&notebooks, || {
                if notebooks.is_empty() {
                    return vec!["No notebooks found".to_string()];
                }
                notebooks.iter().map(render::notebook_row).collect()
            })
        }
        NotebooksCommand::Show { path } => {
            let nb = store
                .get(&path)
                .await
                .with_context(|| format!("failed to load notebook {path}"))?;
            ctx.out.emit(&nb, || render::notebook_lines(&nb))
        }
        NotebooksCommand::Upload { file } => {
            let nb = NotebookFile::read(&file).await?;
            let uploaded = store
                .upload(&nb)
                .await
                .with_context(|| format!("failed to upload {}", file.display()))?;
            ctx.out.emit(&uploaded, || {
                let path = uploaded
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or(&nb.file_name);
                vec![format!("Uploaded {path}")]
            })
        }
        NotebooksCommand::Validate { file } => {
            let nb = NotebookFile::read(&file).await?;
            let metadata = store
                .validate(&nb)
                .await
                .with_context(|| format!("{} is not a valid notebook", file.display()))?;
            ctx.out.emit(metadata, || {
                let mut lines = vec![format!("{} is valid", file.display())];
                lines.extend(render::notebook_lines(metadata));
                lines
            })
        }
        NotebooksCommand::UpdateMetadata {
            file,
            metadata,
            output,
        } => {
            let metadata: Value =
                serde_json::from_str(&metadata).context("--metadata must be valid JSON")?;
            anyhow::ensure!(metadata.is_object(), "--metadata must be a JSON object");
            let nb = NotebookFile::read(&file).await?;
            let updated = store
                .update_metadata(&nb, &metadata)
                .await
                .context("failed to update notebook metadata")?;
            tokio::fs::write(&output, &updated)
                .await
                .with_context(|| format!("failed to write {}", output.display()))?;
            ctx.out.note(format!(
                "Wrote {} ({})",
                output.display(),
                render::format_bytes(updated.len() as u64, 2)
            ));
            Ok(())
        }
    }
}

async fn run_submit(args: RunArgs, ctx: &CommandContext) -> Result<()> {
    let request = build_request(&args, &ctx.cfg);
    // Reject a bad interval before anything is submitted.
    let params = watch_params(args.poll_interval, &ctx.cfg)?;
    let mut submitter = ExecutionSubmitter::new(ctx.api.clone());
    let outcome = submitter
        .submit(&request)
        .await
        .with_context(|| format!("failed to submit {}", request.notebook_path))?;

    ctx.out.emit(&outcome, || match &outcome {
        SubmitOutcome::Duplicate {
            duplicate_execution,
            message,
        } => {
            let mut lines = vec![message.clone()];
            if let Some(original) = duplicate_execution {
                lines.push(format!(
                    "Existing execution: {} ({})",
                    original.id, original.status
                ));
            }
            lines
        }
        SubmitOutcome::Created { execution } => {
            render::execution_lines(execution, OffsetDateTime::now_utc())
        }
    })?;

    match outcome {
        SubmitOutcome::Duplicate { .. } => {
            ctx.out.note("Use --force to run it again");
            Ok(())
        }
        SubmitOutcome::Created { execution } if args.watch => {
            let mut store = ExecutionStore::new(ctx.api.clone());
            watch(&mut store, &execution.id, params, ctx).await
        }
        SubmitOutcome::Created { .. } => Ok(()),
    }
}

async fn run_executions(cmd: ExecutionsCommand, ctx: &CommandContext) -> Result<()> {
    let mut store = ExecutionStore::new(ctx.api.clone());
    match cmd {
        ExecutionsCommand::List => {
            let executions = store
                .fetch_executions()
                .await
                .context("failed to list executions")?;
            ctx.out.emit(&executions, || {
                if executions.is_empty() {
                    return vec!["No executions yet".to_string()];
                }
                executions.iter().map(render::execution_row).collect()
            })
        }
        ExecutionsCommand::Show { id } => {
            let exec = store
                .get_execution(&id)
                .await
                .with_context(|| format!("failed to load execution {id}"))?;
            ctx.out.emit(exec, || {
                render::execution_lines(exec, OffsetDateTime::now_utc())
            })
        }
        ExecutionsCommand::Report { id } => {
            let report = store
                .get_report(&id)
                .await
                .with_context(|| format!("failed to load report for {id}"))?;
            ctx.out.line(serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        ExecutionsCommand::Cancel { id } => {
            let outcome = store
                .cancel(&id)
                .await
                .with_context(|| format!("failed to cancel execution {id}"))?;
            ctx.out.emit(&outcome, || match &outcome {
                CancelOutcome::Cancelled { message } => vec![message
                    .clone()
                    .unwrap_or_else(|| format!("Execution {id} cancelled"))],
                CancelOutcome::Failed { message, .. } => vec![message
                    .clone()
                    .unwrap_or_else(|| format!("Cancellation of {id} failed"))],
            })?;
            if let CancelOutcome::Failed { .. } = outcome {
                anyhow::bail!("execution {id} was not cancelled");
            }
            Ok(())
        }
        ExecutionsCommand::Watch { id, poll_interval } => {
            let params = watch_params(poll_interval, &ctx.cfg)?;
            watch(&mut store, &id, params, ctx).await
        }
    }
}

/// Poll until terminal status or Ctrl-C, printing each transition as it arrives.
async fn watch(
    store: &mut ExecutionStore,
    id: &str,
    params: WatchParams,
    ctx: &CommandContext,
) -> Result<()> {
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<WatchEvent>();
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            futures::future::pending::<()>().await;
        }
    };

    let out = ctx.out.clone();
    let printer = async move {
        while let Some(ev) = evt_rx.recv().await {
            // The final record is printed once below.
            if !matches!(ev, WatchEvent::Finished { .. }) {
                out.note(render::watch_event_line(&ev));
            }
        }
    };

    let (result, ()) = tokio::join!(
        watch_execution(store, id, params, evt_tx, shutdown),
        printer
    );
    let Some(finished) = result.with_context(|| format!("stopped watching {id}"))? else {
        ctx.out.note(render::watch_event_line(&WatchEvent::Interrupted));
        return Ok(());
    };
    report_finished(&finished, ctx)
}

fn report_finished(exec: &ExecutionRecord, ctx: &CommandContext) -> Result<()> {
    ctx.out.emit(exec, || {
        render::execution_lines(exec, OffsetDateTime::now_utc())
    })?;
    if exec.status == ExecutionStatus::Failed {
        anyhow::bail!("execution {} failed", exec.id);
    }
    Ok(())
}
