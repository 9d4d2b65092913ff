//! Command-line front-end: `jattach <pid> <command> [args...]`.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use jattach::{Client, Options};

#[derive(Parser)]
#[command(name = "jattach", version)]
#[command(about = "Send a diagnostic command to a JVM running on this host")]
#[command(after_help = "COMMANDS:\n    \
    load            load an agent library or Java agent\n    \
    properties      print system properties\n    \
    agentProperties print agent properties\n    \
    datadump        show heap and thread summary\n    \
    threaddump      dump all stack traces\n    \
    dumpheap        dump the heap to a file\n    \
    inspectheap     show the heap histogram\n    \
    setflag         modify a manageable VM flag\n    \
    printflag       print a VM flag\n    \
    jcmd            execute a jcmd command")]
struct Cli {
    /// Target JVM process id
    pid: i32,

    /// Command to send
    command: String,

    /// Command arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Do not stream the JVM response to stdout
    #[arg(short, long)]
    quiet: bool,

    /// Override the temporary directory used for rendezvous artifacts
    #[arg(long, value_name = "PATH")]
    tmp_path: Option<PathBuf>,

    /// Attach timeout in seconds
    #[arg(long, default_value_t = 6, value_name = "SECS")]
    timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let client = Client::with_options(Options {
        print_output: !cli.quiet,
        tmp_path: cli.tmp_path,
        timeout: Duration::from_secs(cli.timeout),
    });

    let args: Vec<&str> = cli.args.iter().map(String::as_str).collect();
    match client.attach(cli.pid, &cli.command, &args) {
        Ok(response) => {
            if response.code == 0 {
                ExitCode::SUCCESS
            } else {
                // The attach worked; the JVM reported a failed command.
                eprintln!("JVM returned code {}", response.code);
                ExitCode::from(2)
            }
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}
