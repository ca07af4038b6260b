/*  The worker: connects to the job server's master port, greets with
    `READY`, consumes an environment snapshot, then loops on `TASK` frames.
    Each external command is classified (builtin / simple command / shell
    fallback) before it runs; trailing builtins only run once every
    external command in the task has succeeded. */

use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::commands;
use crate::executor::Executor;
use crate::protocol::{self, Task, WorkerMessage};
use crate::system::System;

const HEARTBEAT_INTERVAL : Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum WorkerError
{
    Connect(std::io::Error),
    Io(std::io::Error),
}

impl fmt::Display for WorkerError
{
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            WorkerError::Connect(error) => write!(formatter, "failed to connect to job server: {}", error),
            WorkerError::Io(error) => write!(formatter, "worker I/O error: {}", error),
        }
    }
}

/*  Decides how to run one external command string and returns its exit
    code plus the output lines to forward. Builtins run in-process against
    `system`; everything else goes to `executor`. */
pub fn run_external_command<SystemType : System, ExecutorType : Executor>(
    system : &mut SystemType,
    executor : &mut ExecutorType,
    dir : &str,
    command : &str,
) -> (i32, Vec<String>)
{
    let words : Vec<String> = match commands::parse_simple_command(command)
    {
        Some(words) => words,
        None => command.split_whitespace().map(|s| s.to_string()).collect(),
    };

    if let Some(builtin) = commands::classify_builtin(&words)
    {
        let code = commands::run_builtin(system, &builtin);
        return (code, Vec::new());
    }

    if let Some(argv) = commands::parse_simple_command(command)
    {
        return run_via_executor(executor, dir, argv);
    }

    run_via_executor(executor, dir, vec!["sh".to_string(), "-c".to_string(), command.to_string()])
}

fn run_via_executor<ExecutorType : Executor>(executor : &mut ExecutorType, dir : &str, argv : Vec<String>) -> (i32, Vec<String>)
{
    match executor.execute_command(dir, argv)
    {
        Ok(output) =>
        {
            let mut lines : Vec<String> = Vec::new();
            lines.extend(output.out.lines().map(|s| s.to_string()));
            lines.extend(output.err.lines().map(|s| s.to_string()));
            (output.code.unwrap_or(if output.success { 0 } else { 1 }), lines)
        },
        Err(message) => (127, vec![format!("ERROR: Cannot exec: {}", message)]),
    }
}

fn run_builtin_by_command<SystemType : System>(system : &mut SystemType, command : &str) -> i32
{
    let words : Vec<String> = command.split_whitespace().map(|s| s.to_string()).collect();
    match commands::classify_builtin(&words)
    {
        Some(builtin) => commands::run_builtin(system, &builtin),
        None => 0,
    }
}

/*  Cosmetic tagging of output lines, matching the server's own heuristic
    so the CLI can highlight without needing to re-scan. */
pub fn tag_line(line : &str) -> String
{
    let lower = line.to_lowercase();
    if lower.contains("error") || lower.contains("failed")
    {
        format!("ERROR {}", line)
    }
    else if lower.contains("warning")
    {
        format!("WARN {}", line)
    }
    else
    {
        format!("OUTPUT {}", line)
    }
}

/*  Executes one dispatched task end to end: runs externals sequentially
    (stopping at the first failure), then trailing builtins only if every
    external succeeded. Returns the combined output and final exit code. */
pub fn execute_task<SystemType : System, ExecutorType : Executor>(
    system : &mut SystemType,
    executor : &mut ExecutorType,
    task : &Task,
) -> (i32, Vec<String>)
{
    let mut output = Vec::new();

    if task.dry_run
    {
        output.push(task.external_commands.join(" && "));
        return (0, output);
    }

    let mut exit_code = 0;
    for command in &task.external_commands
    {
        let (code, lines) = run_external_command(system, executor, &task.dir, command);
        output.extend(lines);
        if code != 0
        {
            exit_code = code;
            break;
        }
    }

    if exit_code == 0
    {
        for builtin in &task.trailing_builtins
        {
            let code = run_builtin_by_command(system, builtin);
            if code != 0
            {
                exit_code = code;
                break;
            }
        }
    }

    (exit_code, output)
}

/*  Connects to the server, performs the READY/env handshake, and serves
    tasks until `SHUTDOWN` or disconnect. */
pub fn run<SystemType : System, ExecutorType : Executor>(
    mut system : SystemType,
    mut executor : ExecutorType,
    host : &str,
    port : u16,
) -> Result<(), WorkerError>
{
    let stream = TcpStream::connect((host, port)).map_err(WorkerError::Connect)?;
    let mut writer = stream.try_clone().map_err(WorkerError::Io)?;
    let mut reader = BufReader::new(stream);

    writeln!(writer, "{}", WorkerMessage::Ready).map_err(WorkerError::Io)?;

    let mut env = HashMap::new();
    consume_env_snapshot(&mut reader, &mut env).map_err(WorkerError::Io)?;

    let heartbeat_writer = writer.try_clone().map_err(WorkerError::Io)?;
    let idle = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let worker_id = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    spawn_heartbeat_thread(heartbeat_writer, idle.clone(), worker_id.clone());

    loop
    {
        idle.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut lines = Vec::new();
        if !read_frame(&mut reader, &mut lines).map_err(WorkerError::Io)?
        {
            return Ok(());
        }

        if lines.first().map(|l| l.as_str()) == Some("SHUTDOWN")
        {
            return Ok(());
        }

        let mut iterator = lines.iter().map(|s| s.as_str());
        let task = match protocol::decode_task(&mut iterator)
        {
            Ok(task) => task,
            Err(_) => continue,
        };

        idle.store(false, std::sync::atomic::Ordering::SeqCst);
        writeln!(writer, "{}", WorkerMessage::TaskStart(task.id)).map_err(WorkerError::Io)?;
        let (exit_code, output_lines) = execute_task(&mut system, &mut executor, &task);

        for line in &output_lines
        {
            writeln!(writer, "{}", WorkerMessage::Output(line.clone())).map_err(WorkerError::Io)?;
        }

        writeln!(writer, "{}", WorkerMessage::TaskEnd { id : task.id, exit : exit_code }).map_err(WorkerError::Io)?;
        writeln!(writer, "{}", WorkerMessage::Ready).map_err(WorkerError::Io)?;
    }
}

/*  Sends an `IDLE <unix_seconds>` line on a fixed interval whenever the main
    loop has marked itself idle (between tasks). Runs on its own stream clone
    so it never blocks on (or races with) the blocking task-frame reads. */
fn spawn_heartbeat_thread(
    mut writer : TcpStream,
    idle : std::sync::Arc<std::sync::atomic::AtomicBool>,
    _worker_id : std::sync::Arc<std::sync::atomic::AtomicU64>,
)
{
    std::thread::spawn(move ||
    {
        loop
        {
            std::thread::sleep(HEARTBEAT_INTERVAL);
            if !idle.load(std::sync::atomic::Ordering::SeqCst)
            {
                continue;
            }
            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|duration| duration.as_secs())
                .unwrap_or(0);
            if writeln!(writer, "{}", WorkerMessage::Idle(timestamp)).is_err()
            {
                return;
            }
        }
    });
}

fn consume_env_snapshot<R : BufRead>(reader : &mut R, env : &mut HashMap<String, String>) -> Result<(), std::io::Error>
{
    loop
    {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0
        {
            return Ok(());
        }
        let line = line.trim_end();
        if line == "ENV_END"
        {
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("ENV ")
        {
            if let Some((name, value)) = rest.split_once('=')
            {
                env.insert(name.to_string(), value.to_string());
            }
        }
    }
}

/*  Reads the lines belonging to one `TASK ... TRAILING_BUILTINS` frame (or
    a lone `SHUTDOWN`), returning `false` once the peer has closed. */
fn read_frame<R : BufRead>(reader : &mut R, lines : &mut Vec<String>) -> Result<bool, std::io::Error>
{
    let mut first = String::new();
    if reader.read_line(&mut first)? == 0
    {
        return Ok(false);
    }
    let first = first.trim_end().to_string();

    if first == "SHUTDOWN"
    {
        lines.push(first);
        return Ok(true);
    }

    lines.push(first);

    let dir_line = read_one(reader)?;
    lines.push(dir_line);

    let count_line = read_one(reader)?;
    let count = count_line.split_whitespace().last().and_then(|s| s.parse::<usize>().ok()).unwrap_or(0);
    lines.push(count_line);

    for _ in 0..count
    {
        lines.push(read_one(reader)?);
    }

    let builtins_line = read_one(reader)?;
    let builtin_count = builtins_line.split_whitespace().last().and_then(|s| s.parse::<usize>().ok()).unwrap_or(0);
    lines.push(builtins_line);

    for _ in 0..builtin_count
    {
        lines.push(read_one(reader)?);
    }

    Ok(true)
}

fn read_one<R : BufRead>(reader : &mut R) -> Result<String, std::io::Error>
{
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(line.trim_end().to_string())
}
