extern crate clap;
extern crate clap_derive;
extern crate serde;

use std::io::{BufRead, Write};

use clap::Parser;
use clap_derive::
{
    Parser,
    Subcommand,
};

use crate::executor::OsExecutor;
use crate::jobserver::JobServer;
use crate::printer::{Printer, StandardPrinter};
use crate::queue::default_max_retries;
use crate::rule::RuleStore;
use crate::system::real::RealSystem;
use crate::system::System;

mod client;
mod commands;
mod executor;
mod expand;
mod graph;
mod jobserver;
mod printer;
mod protocol;
mod queue;
mod rcfile;
mod recursive;
mod rule;
mod rulefile;
mod system;
mod worker;

#[derive(Parser)]
struct BuildConfig
{
    #[arg(value_name = "TARGET", help =
"Targets to build, and optional NAME=VALUE variable overrides. When no target
is given, builds the rule file's default target.")]
    targets : Vec<String>,

    #[arg(short = 'j', long = "jobs", help =
"Number of worker processes to run in parallel. 0 builds sequentially with no
job server at all. Omitted = one worker per available CPU.")]
    jobs : Option<usize>,

    #[arg(short = 'n', long = "dry-run", help =
"Print the commands a build would run without executing them.")]
    dry_run : bool,

    #[arg(long = "retries", help =
"Maximum retry attempts for a recipe whose failure looks transient.")]
    retries : Option<usize>,
}

#[derive(Parser)]
struct JobServerConfig
{
    #[arg(long, help =
"Connect to the running job server for this project and send SHUTDOWN instead
of starting a new one.")]
    kill : bool,
}

#[derive(Parser)]
struct WorkerConfig
{
    #[arg(index = 1, value_name = "HOST", default_value = "127.0.0.1", help =
"Address of the job server's master port.")]
    host : String,

    #[arg(index = 2, value_name = "PORT", help =
"Port of the job server's master port.")]
    port : u16,
}

#[derive(Parser)]
struct CliConfig
{
    #[arg(value_name = "COMMAND", help =
"A single control command to send (e.g. STATUS, LIST_STALE). When omitted,
reads one command per line from standard input until EOF or `detach`.")]
    command : Vec<String>,
}

#[derive(Subcommand)]
enum SmakSubcommand
{
    #[command(about = "Builds the given targets, or the default target", long_about =
"Starts an in-process job server and worker pool, submits the requested
targets, streams their output, and exits once the build finishes.")]
    Build(BuildConfig),

    #[command(about = "Removes the files produced by the given targets or the default target")]
    Clean(BuildConfig),

    #[command(about = "Runs a persistent job server", long_about =
"Starts the job server in the foreground: binds the master and observer
ports, writes the discovery files, and serves control clients and workers
until SHUTDOWN. With --kill, connects to an already-running server instead
and asks it to shut down.")]
    Jobserver(JobServerConfig),

    #[command(about = "Runs a worker process that connects to a job server")]
    Worker(WorkerConfig),

    #[command(about = "Connects to a running job server as an interactive control client")]
    Cli(CliConfig),
}

#[derive(Parser)]
#[command(version = "0.1.0",
    about = "smak: a parallel build orchestrator",
    long_about = "A drop-in parallel build orchestrator with a persistent job server.")]
struct CommandLineParser
{
    #[command(subcommand)]
    command : SmakSubcommand,

    #[arg(short = 'f', long = "file", default_value = "build.rules", value_name = "RULES_FILE", help =
"The rule file describing targets, prerequisites, and recipes.")]
    rules : String,

    #[arg(short = 'C', long = "directory", default_value = ".", value_name = "DIR", help =
"Change to this directory before doing anything else.")]
    directory : String,

    #[arg(long = "norc", help = "Skip loading .smak.rc.")]
    norc : bool,
}

/*  Splits the CLI's trailing positional arguments into target names and
    `NAME=VALUE` variable overrides, per the "trailing positional = targets"
    / "variable assignments NAME=VALUE" grammar. */
fn split_targets_and_overrides(args : &[String]) -> (Vec<String>, Vec<(String, String)>)
{
    let mut targets = Vec::new();
    let mut overrides = Vec::new();

    for arg in args
    {
        match arg.split_once('=')
        {
            Some((name, value)) if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') =>
                overrides.push((name.to_string(), value.to_string())),
            _ => targets.push(arg.clone()),
        }
    }

    (targets, overrides)
}

/*  Parses just enough of the rule file to learn its default target, so the
    CLI can decide what to ask the job server to build when no target is
    named on the command line. Reparsed again by the server's own rescan --
    a small duplication of work in exchange for keeping the protocol free of
    a "use the default" sentinel. */
fn resolve_default_target(system : &RealSystem, rule_file : &str) -> Option<String>
{
    let mut store = RuleStore::new();
    store.variables.set_deferred_if_absent("MAKE", "smak");
    store.load_file(system, rule_file).ok()?;
    store.default_target().map(|(_file, target)| target.to_string())
}

fn worker_count(requested : Option<usize>, rc : &rcfile::RcSettings) -> usize
{
    requested
        .or_else(|| rc.get_usize("jobs"))
        .unwrap_or_else(|| std::thread::available_parallelism().map(|count| count.get()).unwrap_or(1))
}

/*  Runs a build end to end within this process: binds a job server on
    ephemeral loopback ports, spawns its worker pool, submits the targets as
    a control client, waits for the result, then shuts the server down. This
    is the `smak build` entry point; `smak jobserver` exposes the same
    server standalone for multiple clients/workers to share. */
fn run_build(rules_file : &str, config : BuildConfig, rc : &rcfile::RcSettings, printer : &mut StandardPrinter) -> i32
{
    let system = RealSystem::new();
    let (mut targets, overrides) = split_targets_and_overrides(&config.targets);

    if targets.is_empty()
    {
        match resolve_default_target(&system, rules_file)
        {
            Some(target) => targets.push(target),
            None => { printer.error("no target specified and no default target found"); return 1; },
        }
    }

    let dry_run = config.dry_run || rc.get_bool("dry_run").unwrap_or(false);

    let parallelism = worker_count(config.jobs, rc).max(1);
    let max_retries = config.retries.unwrap_or_else(|| default_max_retries(parallelism > 0));

    let mut server = match JobServer::bind(system, rules_file, max_retries, parallelism)
    {
        Ok(server) => server,
        Err(error) => { printer.error(&format!("{}", error)); return 1; },
    };

    server.set_dry_run(dry_run);

    for (name, value) in &overrides
    {
        server.set_variable_override(name, value);
    }

    let master_port = server.master_port();

    let server_thread = std::thread::spawn(move ||
    {
        let mut server_printer = StandardPrinter::new();
        let _ = server.run(&mut server_printer);
    });

    for _ in 0..parallelism
    {
        std::thread::spawn(move ||
        {
            let _ = worker::run(RealSystem::new(), OsExecutor::new(), "127.0.0.1", master_port);
        });
    }

    let exit_code = match client::connect("127.0.0.1", master_port)
    {
        Ok(mut stream) =>
        {
            let result = client::run_build(&mut stream, &targets, printer);
            let _ = writeln!(&mut stream, "SHUTDOWN");
            match result
            {
                Ok(code) => code,
                Err(error) => { printer.error(&format!("{}", error)); 1 },
            }
        },
        Err(error) => { printer.error(&format!("{}", error)); 1 },
    };

    let _ = server_thread.join();
    exit_code
}

/*  Removes the files a target (or the default target) would produce,
    without building anything -- a direct filesystem operation rather than
    a job-server round trip, since cleaning touches no recipe. */
fn run_clean(rules_file : &str, config : BuildConfig, printer : &mut StandardPrinter) -> i32
{
    let mut system = RealSystem::new();
    let (mut targets, _overrides) = split_targets_and_overrides(&config.targets);

    let mut store = RuleStore::new();
    store.variables.set_deferred_if_absent("MAKE", "smak");
    if let Err(error) = store.load_file(&system, rules_file)
    {
        printer.error(&format!("{}", error));
        return 1;
    }

    if targets.is_empty()
    {
        match store.default_target()
        {
            Some((_file, target)) => targets.push(target.to_string()),
            None => { printer.error("no target specified and no default target found"); return 1; },
        }
    }

    let dirty : std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut exit_code = 0;
    for target in &targets
    {
        let engine = graph::GraphEngine::new(&store, &system, &dirty);
        match engine.resolve(rules_file, target)
        {
            Ok(jobs) =>
            {
                for job in jobs.iter().filter(|job| !job.is_pseudo)
                {
                    commands::run_builtin(&mut system, &commands::Builtin::Remove
                    {
                        recursive : false,
                        force : true,
                        paths : vec![job.target.clone()],
                    });
                    printer.print(&format!("removed {}", job.target));
                }
            },
            Err(error) => { printer.error(&format!("{}: {}", target, error)); exit_code = 1; },
        }
    }

    exit_code
}

fn run_jobserver(rules_file : &str, directory : &str, config : JobServerConfig, rc : &rcfile::RcSettings, printer : &mut StandardPrinter) -> i32
{
    if config.kill
    {
        return match client::discover(directory)
        {
            Ok((_observer_port, master_port)) => match client::connect("127.0.0.1", master_port)
            {
                Ok(mut stream) => match writeln!(&mut stream, "SHUTDOWN")
                {
                    Ok(()) => 0,
                    Err(error) => { printer.error(&format!("{}", error)); 2 },
                },
                Err(error) => { printer.error(&format!("{}", error)); 2 },
            },
            Err(error) => { printer.error(&format!("{}", error)); 2 },
        };
    }

    let system = RealSystem::new();
    let parallelism = worker_count(None, rc).max(1);
    let max_retries = default_max_retries(parallelism > 0);

    let mut server = match JobServer::bind(system, rules_file, max_retries, parallelism)
    {
        Ok(server) => server,
        Err(error) => { printer.error(&format!("{}", error)); return 1; },
    };

    let pid = std::process::id();
    if let Err(error) = jobserver::write_discovery_files(pid, server.observer_port(), server.master_port(), directory)
    {
        printer.error(&format!("{}", error));
        return 1;
    }

    match server.run(printer)
    {
        Ok(()) => 0,
        Err(error) => { printer.error(&format!("{}", error)); 1 },
    }
}

fn run_worker(config : WorkerConfig, printer : &mut StandardPrinter) -> i32
{
    match worker::run(RealSystem::new(), OsExecutor::new(), &config.host, config.port)
    {
        Ok(()) => 0,
        Err(error) => { printer.error(&format!("{}", error)); 1 },
    }
}

fn dispatch_cli_line(stream : &mut std::net::TcpStream, line : &str, printer : &mut StandardPrinter) -> i32
{
    let keyword = line.split_whitespace().next().unwrap_or("");

    if keyword.eq_ignore_ascii_case("BUILD")
    {
        let targets : Vec<String> = line.split_whitespace().skip(1).map(|s| s.to_string()).collect();
        return match client::run_build(stream, &targets, printer)
        {
            Ok(code) => code,
            Err(error) => { printer.error(&format!("{}", error)); 2 },
        };
    }

    match client::run_command(stream, line, printer)
    {
        Ok(()) => 0,
        Err(error) => { printer.error(&format!("{}", error)); 2 },
    }
}

fn run_cli(directory : &str, config : CliConfig, printer : &mut StandardPrinter) -> i32
{
    let (_observer_port, master_port) = match client::discover(directory)
    {
        Ok(ports) => ports,
        Err(error) => { printer.error(&format!("{}", error)); return 2; },
    };

    let mut stream = match client::connect("127.0.0.1", master_port)
    {
        Ok(stream) => stream,
        Err(error) => { printer.error(&format!("{}", error)); return 2; },
    };

    if !config.command.is_empty()
    {
        let command_line = config.command.join(" ");
        return dispatch_cli_line(&mut stream, &command_line, printer);
    }

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop
    {
        line.clear();
        match stdin.lock().read_line(&mut line)
        {
            Ok(0) => return 0,
            Ok(_) => {},
            Err(error) => { printer.error(&format!("{}", error)); return 2; },
        }

        let trimmed = line.trim();
        if trimmed.is_empty()
        {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("detach")
        {
            return 0;
        }

        let exit_code = dispatch_cli_line(&mut stream, trimmed, printer);
        if trimmed.eq_ignore_ascii_case("SHUTDOWN")
        {
            return exit_code;
        }
    }
}

fn main()
{
    let command_line = CommandLineParser::parse();

    if command_line.directory != "."
    {
        if let Err(error) = std::env::set_current_dir(&command_line.directory)
        {
            eprintln!("{}", error);
            std::process::exit(1);
        }
    }

    let rc = if command_line.norc
    {
        rcfile::RcSettings::default()
    }
    else
    {
        let home = std::env::var("HOME").ok();
        rcfile::discover(std::path::Path::new("."), home.as_deref().map(std::path::Path::new))
            .and_then(|rc_path| std::fs::read_to_string(rc_path).ok())
            .map(|contents| rcfile::parse(&contents))
            .unwrap_or_default()
    };

    let mut printer = StandardPrinter::new();

    let exit_code = match command_line.command
    {
        SmakSubcommand::Build(config) => run_build(&command_line.rules, config, &rc, &mut printer),
        SmakSubcommand::Clean(config) => run_clean(&command_line.rules, config, &mut printer),
        SmakSubcommand::Jobserver(config) => run_jobserver(&command_line.rules, &command_line.directory, config, &rc, &mut printer),
        SmakSubcommand::Worker(config) => run_worker(config, &mut printer),
        SmakSubcommand::Cli(config) => run_cli(&command_line.directory, config, &mut printer),
    };

    std::process::exit(exit_code);
}
