/*  Line-oriented wire encoding, shared by the job server, workers, and
    control clients. Every frame is plain ASCII terminated by a single LF;
    fields are space separated; there is no length prefix. This module only
    encodes/decodes strings — the actual socket I/O lives in `jobserver.rs`,
    `worker.rs`, and `client.rs`. */

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Task
{
    pub id : u64,
    pub dir : String,
    pub external_commands : Vec<String>,
    pub dry_run : bool,
    pub trailing_builtins : Vec<String>,
}

#[derive(Debug)]
pub enum ProtocolError
{
    Malformed(String),
    UnexpectedLine(String),
}

impl fmt::Display for ProtocolError
{
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            ProtocolError::Malformed(line) => write!(formatter, "malformed frame: {}", line),
            ProtocolError::UnexpectedLine(line) => write!(formatter, "unexpected line: {}", line),
        }
    }
}

fn parse_count(line : &str, keyword : &str) -> Result<usize, ProtocolError>
{
    line.strip_prefix(keyword)
        .map(|rest| rest.trim())
        .and_then(|rest| rest.parse().ok())
        .ok_or_else(|| ProtocolError::Malformed(line.to_string()))
}

/*  Encodes the `TASK ... TRAILING_BUILTINS` frame sent by the server to a
    worker. Returns the frame as a single string with embedded newlines; the
    caller writes it to the socket followed by a final LF. */
pub fn encode_task(task : &Task) -> String
{
    let mut frame = String::new();
    frame.push_str(&format!("TASK {}\n", task.id));
    frame.push_str(&format!("DIR {}\n", task.dir));

    let header = if task.dry_run { "EXTERNAL_CMDS_DRY" } else { "EXTERNAL_CMDS" };
    frame.push_str(&format!("{} {}\n", header, task.external_commands.len()));
    for command in &task.external_commands
    {
        frame.push_str(command);
        frame.push('\n');
    }

    frame.push_str(&format!("TRAILING_BUILTINS {}\n", task.trailing_builtins.len()));
    for builtin in &task.trailing_builtins
    {
        frame.push_str(builtin);
        frame.push('\n');
    }

    frame
}

/*  Decodes a task frame from a line iterator (typically a buffered socket
    reader); consumes exactly the lines belonging to one frame. */
pub fn decode_task<'a, I : Iterator<Item = &'a str>>(lines : &mut I) -> Result<Task, ProtocolError>
{
    let task_line = lines.next().ok_or_else(|| ProtocolError::Malformed("<eof>".to_string()))?;
    let id : u64 = task_line.strip_prefix("TASK ")
        .and_then(|rest| rest.trim().parse().ok())
        .ok_or_else(|| ProtocolError::Malformed(task_line.to_string()))?;

    let dir_line = lines.next().ok_or_else(|| ProtocolError::Malformed("<eof>".to_string()))?;
    let dir = dir_line.strip_prefix("DIR ")
        .ok_or_else(|| ProtocolError::Malformed(dir_line.to_string()))?
        .to_string();

    let cmds_line = lines.next().ok_or_else(|| ProtocolError::Malformed("<eof>".to_string()))?;
    let dry_run = cmds_line.starts_with("EXTERNAL_CMDS_DRY");
    let count = if dry_run { parse_count(cmds_line, "EXTERNAL_CMDS_DRY")? } else { parse_count(cmds_line, "EXTERNAL_CMDS")? };

    let mut external_commands = Vec::with_capacity(count);
    for _ in 0..count
    {
        let line = lines.next().ok_or_else(|| ProtocolError::Malformed("<eof>".to_string()))?;
        external_commands.push(line.to_string());
    }

    let builtins_line = lines.next().ok_or_else(|| ProtocolError::Malformed("<eof>".to_string()))?;
    let builtin_count = parse_count(builtins_line, "TRAILING_BUILTINS")?;

    let mut trailing_builtins = Vec::with_capacity(builtin_count);
    for _ in 0..builtin_count
    {
        let line = lines.next().ok_or_else(|| ProtocolError::Malformed("<eof>".to_string()))?;
        trailing_builtins.push(line.to_string());
    }

    Ok(Task { id, dir, external_commands, dry_run, trailing_builtins })
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage
{
    Ready,
    TaskStart(u64),
    Output(String),
    TaskEnd { id : u64, exit : i32 },
    Idle(u64),
}

impl fmt::Display for WorkerMessage
{
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            WorkerMessage::Ready => write!(formatter, "READY"),
            WorkerMessage::TaskStart(id) => write!(formatter, "TASK_START {}", id),
            WorkerMessage::Output(line) => write!(formatter, "OUTPUT {}", line),
            WorkerMessage::TaskEnd { id, exit } => write!(formatter, "TASK_END {} {}", id, exit),
            WorkerMessage::Idle(timestamp) => write!(formatter, "IDLE {}", timestamp),
        }
    }
}

pub fn parse_worker_message(line : &str) -> Result<WorkerMessage, ProtocolError>
{
    if line == "READY"
    {
        return Ok(WorkerMessage::Ready);
    }
    if let Some(rest) = line.strip_prefix("TASK_START ")
    {
        return rest.trim().parse().map(WorkerMessage::TaskStart).map_err(|_| ProtocolError::Malformed(line.to_string()));
    }
    if let Some(rest) = line.strip_prefix("OUTPUT ")
    {
        return Ok(WorkerMessage::Output(rest.to_string()));
    }
    if let Some(rest) = line.strip_prefix("TASK_END ")
    {
        let mut parts = rest.trim().splitn(2, ' ');
        let id : u64 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
        let exit : i32 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
        return Ok(WorkerMessage::TaskEnd { id, exit });
    }
    if let Some(rest) = line.strip_prefix("IDLE ")
    {
        return rest.trim().parse().map(WorkerMessage::Idle).map_err(|_| ProtocolError::Malformed(line.to_string()));
    }

    Err(ProtocolError::UnexpectedLine(line.to_string()))
}

/*  Control commands accepted on the master port, one per line. Rule-editing
    commands carry their payload as opaque text; the CLI dispatcher and
    `rule.rs` agree on the exact sub-grammar (`target : prereq... : recipe`). */
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand
{
    Build(Vec<String>),
    ListStale,
    Dirty(Vec<String>),
    Touch(Vec<String>),
    Rm(Vec<String>),
    Rescan,
    Reset,
    Start,
    Stop,
    Shutdown,
    CliOwner(u32),
    Status,
    AddRule(String),
    ModRule(String),
    ModDeps(String),
    DelRule(String),
    Save(String),
    Detach,
}

pub fn parse_control_command(line : &str) -> Result<ControlCommand, ProtocolError>
{
    let line = line.trim_end();
    let (keyword, rest) = match line.split_once(' ')
    {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    };

    let words = || rest.split_whitespace().map(|s| s.to_string()).collect::<Vec<_>>();

    match keyword
    {
        "BUILD" => Ok(ControlCommand::Build(words())),
        "LIST_STALE" => Ok(ControlCommand::ListStale),
        "DIRTY" => Ok(ControlCommand::Dirty(words())),
        "TOUCH" => Ok(ControlCommand::Touch(words())),
        "RM" => Ok(ControlCommand::Rm(words())),
        "RESCAN" => Ok(ControlCommand::Rescan),
        "RESET" => Ok(ControlCommand::Reset),
        "START" => Ok(ControlCommand::Start),
        "STOP" => Ok(ControlCommand::Stop),
        "SHUTDOWN" => Ok(ControlCommand::Shutdown),
        "CLI_OWNER" => rest.parse().map(ControlCommand::CliOwner).map_err(|_| ProtocolError::Malformed(line.to_string())),
        "STATUS" => Ok(ControlCommand::Status),
        "ADD_RULE" => Ok(ControlCommand::AddRule(rest.to_string())),
        "MOD_RULE" => Ok(ControlCommand::ModRule(rest.to_string())),
        "MOD_DEPS" => Ok(ControlCommand::ModDeps(rest.to_string())),
        "DEL_RULE" => Ok(ControlCommand::DelRule(rest.to_string())),
        "SAVE" => Ok(ControlCommand::Save(rest.to_string())),
        "detach" => Ok(ControlCommand::Detach),
        _ => Err(ProtocolError::UnexpectedLine(line.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlResponse
{
    JobserverWorkersReady,
    Stale(String),
    StaleEnd,
    BuildEnd,
    BuildSuccess(String),
    BuildError(String, String),
    Output(String),
    StatusLine(String),
    CliOwner(u32),
}

impl fmt::Display for ControlResponse
{
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            ControlResponse::JobserverWorkersReady => write!(formatter, "JOBSERVER_WORKERS_READY"),
            ControlResponse::Stale(target) => write!(formatter, "STALE:{}", target),
            ControlResponse::StaleEnd => write!(formatter, "STALE_END"),
            ControlResponse::BuildEnd => write!(formatter, "BUILD_END"),
            ControlResponse::BuildSuccess(target) => write!(formatter, "BUILD_SUCCESS:{}", target),
            ControlResponse::BuildError(target, message) => write!(formatter, "BUILD_ERROR:{}:{}", target, message),
            ControlResponse::Output(line) => write!(formatter, "OUTPUT {}", line),
            ControlResponse::StatusLine(line) => write!(formatter, "STATUS {}", line),
            ControlResponse::CliOwner(pid) => write!(formatter, "CLI_OWNER {}", pid),
        }
    }
}

/*  Parses one line of server output addressed to a control client or an
    observer. Unlike `parse_control_command`, an unrecognized line is not an
    error: a worker's raw stderr could in principle reach a client stream in
    some failure path, and the client should just print it rather than choke. */
pub fn parse_control_response(line : &str) -> ControlResponse
{
    if line == "JOBSERVER_WORKERS_READY"
    {
        return ControlResponse::JobserverWorkersReady;
    }
    if let Some(rest) = line.strip_prefix("STALE:")
    {
        return ControlResponse::Stale(rest.to_string());
    }
    if line == "STALE_END"
    {
        return ControlResponse::StaleEnd;
    }
    if line == "BUILD_END"
    {
        return ControlResponse::BuildEnd;
    }
    if let Some(rest) = line.strip_prefix("BUILD_SUCCESS:")
    {
        return ControlResponse::BuildSuccess(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("BUILD_ERROR:")
    {
        return match rest.split_once(':')
        {
            Some((target, message)) => ControlResponse::BuildError(target.to_string(), message.to_string()),
            None => ControlResponse::BuildError(rest.to_string(), String::new()),
        };
    }
    if let Some(rest) = line.strip_prefix("OUTPUT ")
    {
        return ControlResponse::Output(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("STATUS ")
    {
        return ControlResponse::StatusLine(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("CLI_OWNER ")
    {
        if let Ok(pid) = rest.trim().parse()
        {
            return ControlResponse::CliOwner(pid);
        }
    }

    ControlResponse::Output(line.to_string())
}
