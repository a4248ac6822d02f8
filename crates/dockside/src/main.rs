//! dockside
//!
//! Attach to containers and run processes in them over the Engine API.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dockside::exec::ExecManager;
use dockside::protocol::{
    copy_output, AttachOptions, ExecConfig, ExecStartOptions, RemoveOptions, TtySize,
    WaitCondition,
};
use dockside::{
    attach_session, forward_input, Config, Connector, DetachKeys, EngineClient, ExecInstance,
    ExecLifecycle, InputOutcome, ResizeOutcome, StreamSession, Waiter,
};
use tokio_util::sync::CancellationToken;

/// dockside - interactive container sessions over the Engine API.
#[derive(Parser, Debug)]
#[command(name = "dockside")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Attach to a running container's stdio
    Attach {
        /// Container ID or name
        container: String,

        /// Do not forward stdin
        #[arg(long)]
        no_stdin: bool,

        /// Replay previous output before streaming
        #[arg(long)]
        logs: bool,

        /// Override the detach key sequence
        #[arg(long, value_name = "KEYS")]
        detach_keys: Option<String>,
    },

    /// Run a command in a running container
    Exec {
        /// Container ID or name
        container: String,

        /// Start the process and print the exec ID without attaching
        #[arg(long, short)]
        detach: bool,

        /// Keep stdin open and forward it
        #[arg(long, short)]
        interactive: bool,

        /// Allocate a pseudo-TTY
        #[arg(long, short)]
        tty: bool,

        /// Set environment variables (KEY=value)
        #[arg(long, short, value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Working directory inside the container
        #[arg(long, short, value_name = "DIR")]
        workdir: Option<String>,

        /// User to run as
        #[arg(long, short)]
        user: Option<String>,

        /// Give extended privileges to the command
        #[arg(long)]
        privileged: bool,

        /// Override the detach key sequence
        #[arg(long, value_name = "KEYS")]
        detach_keys: Option<String>,

        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Block until a container reaches a state, then print its exit code
    Wait {
        /// Container ID or name
        container: String,

        /// Condition to wait for: not-running, next-exit or removed
        #[arg(long, default_value = "not-running")]
        condition: WaitCondition,
    },

    /// Send a signal to a container
    Kill {
        /// Container ID or name
        container: String,

        /// Signal to send (default: the engine's, SIGKILL)
        #[arg(long, short)]
        signal: Option<String>,
    },

    /// Remove a container
    Rm {
        /// Container ID or name
        container: String,

        /// Kill the container first if it is running
        #[arg(long, short)]
        force: bool,

        /// Remove anonymous volumes
        #[arg(long)]
        volumes: bool,

        /// Remove the link instead of the container
        #[arg(long, short)]
        link: bool,
    },

    /// Resize the TTY of a container or exec instance
    Resize {
        /// Container ID or name, or exec ID with --exec
        id: String,

        /// Columns
        #[arg(long)]
        width: u32,

        /// Rows
        #[arg(long)]
        height: u32,

        /// Treat the ID as an exec instance
        #[arg(long)]
        exec: bool,
    },

    /// Show the state of an exec instance as JSON
    InspectExec {
        /// Exec instance ID
        exec_id: String,
    },
}

/// How an interactive session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The remote side closed the stream.
    Finished,
    /// The user typed the detach sequence.
    Detached,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    // Initialize tracing on stderr so session output on stdout stays clean
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(level.as_str())
        .with_writer(std::io::stderr)
        .init();

    let client = EngineClient::from_config(&config.engine)?;
    tracing::debug!(host = %client.transport().host(), "Using engine");

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let code = match cli.command {
        Commands::Attach {
            container,
            no_stdin,
            logs,
            detach_keys,
        } => {
            let keys = parse_detach_keys(detach_keys, &config)?;
            let options = AttachOptions {
                stream: true,
                stdin: !no_stdin,
                stdout: true,
                stderr: true,
                logs,
                detach_keys: Some(keys.spec().to_string()),
            };
            run_attach(&client, &container, &options, keys, &cancel).await?
        }
        Commands::Exec {
            container,
            detach,
            interactive,
            tty,
            env,
            workdir,
            user,
            privileged,
            detach_keys,
            command,
        } => {
            let keys = parse_detach_keys(detach_keys, &config)?;
            let mut exec_config = ExecConfig::new(command);
            exec_config.tty = tty;
            exec_config.env = env;
            exec_config.working_dir = workdir;
            exec_config.user = user;
            exec_config.privileged = privileged;
            exec_config.attach_stdin = interactive && !detach;
            exec_config.attach_stdout = !detach;
            exec_config.attach_stderr = !detach;

            let manager = ExecManager::new(client.clone())
                .with_poll_interval(config.session.exec_poll_interval());
            run_exec(&manager, &container, &exec_config, detach, keys, &cancel).await?
        }
        Commands::Wait {
            container,
            condition,
        } => {
            let response = client.wait(&container, condition, &cancel).await?;
            if let Some(error) = &response.error {
                eprintln!("Error waiting for container: {}", error.message);
            }
            println!("{}", response.status_code);
            0
        }
        Commands::Kill { container, signal } => {
            client.kill(&container, signal.as_deref()).await?;
            println!("{container}");
            0
        }
        Commands::Rm {
            container,
            force,
            volumes,
            link,
        } => {
            let options = RemoveOptions {
                force,
                remove_volumes: volumes,
                remove_links: link,
            };
            client.remove(&container, options).await?;
            println!("{container}");
            0
        }
        Commands::Resize {
            id,
            width,
            height,
            exec,
        } => {
            let size = TtySize::new(width, height);
            if exec {
                let manager = ExecManager::new(client.clone());
                let mut instance = ExecInstance::existing(id.as_str(), "", true);
                if manager.resize(&mut instance, size).await? == ResizeOutcome::ProcessExited {
                    eprintln!("Exec {id} has already exited; nothing to resize");
                }
            } else {
                client.resize_container(&id, size).await?;
            }
            0
        }
        Commands::InspectExec { exec_id } => {
            let inspect = client.exec_inspect(&exec_id).await?;
            println!("{}", serde_json::to_string_pretty(&inspect)?);
            0
        }
    };

    std::process::exit(code);
}

/// Resolve the detach keys from the command line or config.
fn parse_detach_keys(flag: Option<String>, config: &Config) -> anyhow::Result<DetachKeys> {
    let spec = flag.unwrap_or_else(|| config.session.detach_keys.clone());
    spec.parse::<DetachKeys>()
        .with_context(|| format!("Invalid detach keys: {spec}"))
}

/// Cancel pending requests when the user interrupts.
fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received interrupt");
            cancel.cancel();
        }
    });
}

/// Convert an engine status code into a process exit code.
fn exit_code(status: i64) -> i32 {
    i32::try_from(status).unwrap_or(1)
}

/// Attach to a container and stream until it stops or the user detaches.
async fn run_attach(
    client: &EngineClient,
    container: &str,
    options: &AttachOptions,
    keys: DetachKeys,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    let session = attach_session(client, container, options, cancel).await?;

    // Registered before streaming so a quick exit is not missed.
    let wait_cancel = cancel.child_token();
    let wait = client.wait(container, WaitCondition::NotRunning, &wait_cancel);

    let stdin = options.stdin.then_some(keys);
    match stream_session(session, stdin).await? {
        SessionEnd::Detached => {
            wait_cancel.cancel();
            eprintln!("\nDetached from {container}");
            Ok(0)
        }
        SessionEnd::Finished => {
            let response = wait.await?;
            if let Some(error) = &response.error {
                eprintln!("Error waiting for container: {}", error.message);
            }
            Ok(exit_code(response.status_code))
        }
    }
}

/// Create and start an exec instance, streaming its output unless detached.
async fn run_exec<E: ExecLifecycle>(
    manager: &ExecManager<E>,
    container: &str,
    exec_config: &ExecConfig,
    detach: bool,
    keys: DetachKeys,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    let mut exec = manager.create(container, exec_config).await?;

    if detach {
        let options = ExecStartOptions {
            detach: true,
            ..Default::default()
        };
        manager.start(&mut exec, options, cancel).await?;
        println!("{}", exec.id());
        return Ok(0);
    }

    let session = manager
        .start(&mut exec, ExecStartOptions::default(), cancel)
        .await?
        .with_context(|| format!("Engine did not attach to exec {}", exec.id()))?;

    let stdin = exec_config.attach_stdin.then_some(keys);
    match stream_session(session, stdin).await? {
        SessionEnd::Detached => {
            eprintln!("\nDetached from exec {}", exec.id());
            Ok(0)
        }
        SessionEnd::Finished => {
            let status = manager.wait_for_exit(&mut exec, cancel).await?;
            Ok(exit_code(status))
        }
    }
}

/// Copy session output to stdout/stderr while forwarding stdin.
///
/// Input is only read when `stdin_keys` is set. Reaching end of input
/// half-closes the session and keeps streaming output.
async fn stream_session(
    session: StreamSession,
    stdin_keys: Option<DetachKeys>,
) -> anyhow::Result<SessionEnd> {
    let target = session.target().clone();
    let (mut output, mut input) = session.into_parts();

    let mut output_task = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();
        copy_output(&mut output, &mut stdout, &mut stderr).await
    });

    let mut input_done = stdin_keys.is_none();
    let mut input_task = tokio::spawn(async move {
        let outcome = match stdin_keys {
            Some(keys) => forward_input(&mut tokio::io::stdin(), &mut input, &keys).await,
            None => Ok(InputOutcome::Eof),
        };
        if outcome.is_err() {
            input.close().await;
        }
        outcome
    });

    loop {
        tokio::select! {
            result = &mut output_task => {
                input_task.abort();
                let stats = result.context("Output task failed")??;
                tracing::debug!(
                    target_id = %target,
                    stdout = stats.stdout,
                    stderr = stats.stderr,
                    "Session output finished"
                );
                return Ok(SessionEnd::Finished);
            }
            result = &mut input_task, if !input_done => {
                input_done = true;
                match result.context("Input task failed")? {
                    Ok(InputOutcome::Detached) => {
                        output_task.abort();
                        return Ok(SessionEnd::Detached);
                    }
                    Ok(InputOutcome::Eof) => {
                        tracing::debug!(target_id = %target, "Stdin closed");
                    }
                    Err(e) => {
                        tracing::warn!(target_id = %target, error = %e, "Forwarding stdin failed");
                    }
                }
            }
        }
    }
}
