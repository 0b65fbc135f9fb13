use std::{
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Result;
use capture::{CaptureOptions, KernelOptions, TriageOptions, options::DEFAULT_THREAD_LIMIT};
use clap::{ArgAction, Parser, Subcommand, error::ErrorKind};
use log::error;

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Create a kernel triage dump or a live kernel dump without rebooting."
)]
struct Args {
    #[command(subcommand)]
    dump: Dump,
}

#[derive(Subcommand, Debug)]
enum Dump {
    /// Create a kernel triage dump of a few threads of one process (debug control 29).
    Triage {
        #[arg(short, long, help = "PID to dump.")]
        pid: u32,

        #[arg(
            short,
            long,
            default_value_t = DEFAULT_THREAD_LIMIT,
            help = "Number of threads to include in the dump, between 1 and 16."
        )]
        threads: u32,

        #[arg(help = "Full path to the dump file to create.")]
        file: PathBuf,
    },

    /// Create a live kernel dump (debug control 37).
    #[command(disable_help_flag = true)]
    Kernel {
        #[arg(short, long, help = "Compress memory pages in the dump.")]
        compress: bool,

        #[arg(short, long, help = "Use the dump storage stack.")]
        dump_stack: bool,

        #[arg(short = 'h', long, help = "Add hypervisor pages.")]
        hypervisor_pages: bool,

        #[arg(
            short,
            long,
            help = "Also dump user space memory (Windows 11 22H2 and later)."
        )]
        user_memory: bool,

        #[arg(long, action = ArgAction::Help, help = "Print help.")]
        help: Option<bool>,

        #[arg(help = "Full path to the dump file to create.")]
        file: PathBuf,
    },
}

impl Dump {
    fn file(&self) -> &Path {
        match self {
            Dump::Triage { file, .. } | Dump::Kernel { file, .. } => file,
        }
    }

    fn options(&self) -> CaptureOptions {
        match *self {
            Dump::Triage { pid, threads, .. } => {
                CaptureOptions::Triage(TriageOptions::new(pid).with_thread_limit(threads))
            }
            Dump::Kernel {
                compress,
                dump_stack,
                hypervisor_pages,
                user_memory,
                ..
            } => CaptureOptions::Kernel(KernelOptions {
                compress_pages: compress,
                use_dump_stack: dump_stack,
                include_hypervisor_pages: hypervisor_pages,
                include_user_memory: user_memory,
            }),
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => return usage(&e),
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Print a clap error or help text. Every argument error is a failure.
fn usage(e: &clap::Error) -> ExitCode {
    let _ = e.print();
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

fn run(args: &Args) -> Result<()> {
    let options = args.dump.options();
    options.validate()?;
    capture_dump(args.dump.file(), &options)
}

#[cfg(target_os = "windows")]
fn capture_dump(file: &Path, options: &CaptureOptions) -> Result<()> {
    use capture::{CaptureOrchestrator, FileStorage};
    use windows::{SystemDebugControl, TokenPrivilege, ToolhelpThreads};

    let control = SystemDebugControl::resolve()?;
    let mut orchestrator =
        CaptureOrchestrator::new(TokenPrivilege::debug(), ToolhelpThreads, control, FileStorage);
    orchestrator.run(file, options)?;
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn capture_dump(_file: &Path, _options: &CaptureOptions) -> Result<()> {
    anyhow::bail!("live dumps can only be captured on Windows")
}
