//! Scull command-line front end
//!
//! Hosts a set of scull devices in-process and drives them from the
//! terminal:
//!
//! ```bash
//! # Walk through the segmented layout with a 4-byte quantum
//! scull demo
//!
//! # Interactive session
//! scull shell --admin
//! > open 0 w
//! > write hello world
//! > close
//! > open 0 r
//! > cat
//! > proc
//!
//! # Show effective settings
//! scull --config scull.toml config
//! ```

use clap::{Args, Parser, Subcommand};
use scull::control::{Caller, Command};
use scull::storage::{Interrupt, OpenMode, ScullDevices, ScullFile};
use scull::{metrics, report, ReportReader, ScullSettings};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Scull - a quantum-segmented in-memory character device
#[derive(Parser, Debug)]
#[command(name = "scull")]
#[command(version = scull::VERSION)]
#[command(about = "Scull - a quantum-segmented in-memory character device", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML)
    #[arg(long, global = true, env = "SCULL_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "SCULL_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write and read a small device to show the segment layout
    Demo,

    /// Interactive session over stdin
    Shell(ShellArgs),

    /// Print the effective settings as TOML
    Config,

    /// Show version
    Version,
}

#[derive(Args, Debug)]
struct ShellArgs {
    /// Run control commands with the configure capability
    #[arg(long)]
    admin: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;
    metrics::init_metrics();

    let settings = ScullSettings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Demo => demo_command().await,
        Commands::Shell(args) => shell_command(settings, args).await,
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("scull {}", scull::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "scull.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Demo command - quantum 4, qset 2
async fn demo_command() -> anyhow::Result<()> {
    let settings = ScullSettings {
        nr_devs: 1,
        quantum: 4,
        qset: 2,
        memory_limit: None,
    };
    let devices = ScullDevices::new(&settings)?;
    let intr = Interrupt::new();
    info!("Running demo");

    let mut file = devices.open(0, OpenMode::ReadWrite, &intr).await?;
    let n = file.write(b"ABCDEF").await?;
    println!("write \"ABCDEF\" @0    -> {} (clamped to the quantum)", n);
    let n = file.write(b"EF").await?;
    println!("write \"EF\"     @4    -> {}", n);

    file.seek(SeekFrom::Start(0)).await?;
    let mut content = Vec::new();
    loop {
        let chunk = file.read(6).await?;
        if chunk.is_empty() {
            break;
        }
        content.extend_from_slice(&chunk);
    }
    println!("read all       @0    -> {:?}", String::from_utf8_lossy(&content));
    println!("read 2         @6    -> {} bytes (end of device)", file.read(2).await?.len());

    file.seek(SeekFrom::Start(8)).await?;
    file.write_all(b"WXYZ").await?;
    println!("write \"WXYZ\"   @8    -> size {}", devices.get(0)?.size(&intr).await?);

    file.seek(SeekFrom::Start(6)).await?;
    println!("read 2         @6    -> {} bytes (unwritten gap)", file.read(2).await?.len());
    file.close();

    for line in report(&devices, &intr).await? {
        println!("{}", line);
    }
    Ok(())
}

/// Shell command - line-oriented session
async fn shell_command(settings: ScullSettings, args: ShellArgs) -> anyhow::Result<()> {
    let mut session = Session {
        devices: ScullDevices::new(&settings)?,
        caller: if args.admin {
            Caller::admin()
        } else {
            Caller::unprivileged()
        },
        intr: Interrupt::new(),
        file: None,
    };

    println!(
        "scull shell: {} devices, quantum {}, qset {} (type 'help')",
        session.devices.len(),
        settings.quantum,
        settings.qset
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));

        match session.run(verb, rest.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                let errno = e
                    .downcast_ref::<scull::error::Error>()
                    .map(|e| e.errno())
                    .unwrap_or(-22);
                warn!(error = %e, "Shell command failed");
                println!("error ({}): {}", errno, e);
            }
        }
    }

    if let Some(f) = session.file.take() {
        f.close();
    }
    session.devices.shutdown().await;
    Ok(())
}

/// State of one shell session: at most one open file at a time
struct Session {
    devices: ScullDevices,
    caller: Caller,
    intr: Interrupt,
    file: Option<ScullFile>,
}

impl Session {
    fn file(&mut self) -> anyhow::Result<&mut ScullFile> {
        self.file
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no open file"))
    }

    /// Run one command line; `Ok(false)` ends the session
    async fn run(&mut self, verb: &str, rest: &str) -> anyhow::Result<bool> {
        match verb {
            "help" => print_help(),
            "quit" | "exit" => return Ok(false),
            "open" => {
                let mut parts = rest.split_whitespace();
                let index: usize = parts.next().unwrap_or("0").parse()?;
                let mode: OpenMode = parts.next().unwrap_or("rw").parse()?;
                if let Some(previous) = self.file.take() {
                    previous.close();
                }
                self.file = Some(self.devices.open(index, mode, &self.intr).await?);
                println!("opened scull{} ({})", index, mode);
            }
            "close" => match self.file.take() {
                Some(f) => f.close(),
                None => println!("no open file"),
            },
            "write" => {
                let n = self.file()?.write(rest.as_bytes()).await?;
                println!("{} of {} bytes written", n, rest.len());
            }
            "writeall" => {
                self.file()?.write_all(rest.as_bytes()).await?;
                println!("{} bytes written", rest.len());
            }
            "read" => {
                let count: usize = if rest.is_empty() { 4096 } else { rest.parse()? };
                let data = self.file()?.read(count).await?;
                println!("{} bytes: {:?}", data.len(), String::from_utf8_lossy(&data));
            }
            "cat" => {
                let file = self.file()?;
                let mut out = Vec::new();
                loop {
                    let chunk = file.read(usize::MAX).await?;
                    if chunk.is_empty() {
                        break;
                    }
                    out.extend_from_slice(&chunk);
                }
                println!("{}", String::from_utf8_lossy(&out));
            }
            "seek" => {
                let offset: u64 = rest.parse()?;
                let pos = self.file()?.seek(SeekFrom::Start(offset)).await?;
                println!("position {}", pos);
            }
            "ioctl" => {
                let mut parts = rest.split_whitespace();
                let name = parts.next().unwrap_or("");
                let value = parts.next().map(str::parse::<i64>).transpose()?;
                let cmd = Command::from_name(name, value)?;
                let mut arg = value.unwrap_or(0);
                let result = self.devices.defaults().control(cmd, &mut arg, &self.caller)?;
                println!("{} -> result {}, arg {}", cmd, result, arg);
            }
            "proc" => {
                let mut reader = ReportReader::new(&self.devices, self.intr.clone());
                print!("{}", reader.read_to_string().await?);
            }
            "stats" => {
                let stats = self.devices.stats(&self.intr).await?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            "metrics" => print!("{}", metrics::export_metrics()),
            other => println!("unknown command '{}' (type 'help')", other),
        }
        Ok(true)
    }
}

fn print_help() {
    println!("open <dev> <r|w|rw>     open a device (w truncates)");
    println!("write <text>            one write call (stops at a quantum boundary)");
    println!("writeall <text>         write until all text is stored");
    println!("read [count]            one read call");
    println!("cat                     read until nothing comes back");
    println!("seek <pos>              set the file position");
    println!("close                   close the open file");
    println!("ioctl <verb> [value]    e.g. ioctl exchange-quantum 128");
    println!("proc                    segment report for all devices");
    println!("stats                   per-device stats as JSON");
    println!("metrics                 Prometheus metrics");
    println!("quit                    leave the shell");
}
