/*  The control client: connects to a running job server's master port,
    issues one control command per line, and renders whatever streams back
    through a `Printer`. Used both for one-shot invocations (`smak build`,
    `smak jobserver kill`) and for the interactive `cli` subcommand, which
    keeps the connection open and forwards further commands typed at a
    prompt. Discovery of an already-running server goes through the same
    `.smak.connect` file the server itself writes in `jobserver.rs`. */

use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::Path;

use termcolor::Color;

use crate::printer::Printer;
use crate::protocol::{self, ControlResponse};

#[derive(Debug)]
pub enum ClientError
{
    Connect(std::io::Error),
    Io(std::io::Error),
    NoServer(String),
}

impl fmt::Display for ClientError
{
    fn fmt(&self, formatter : &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            ClientError::Connect(error) => write!(formatter, "failed to connect to job server: {}", error),
            ClientError::Io(error) => write!(formatter, "client I/O error: {}", error),
            ClientError::NoServer(detail) => write!(formatter, "no running job server found: {}", detail),
        }
    }
}

/*  Reads `<project_dir>/.smak.connect`, which holds the path to the
    per-PID port file, then that file's two lines (observer port, master
    port), per the discovery convention `jobserver::write_discovery_files`
    establishes. */
pub fn discover(project_dir : &str) -> Result<(u16, u16), ClientError>
{
    let connect_path = Path::new(project_dir).join(".smak.connect");
    let port_file_path = fs::read_to_string(&connect_path)
        .map_err(|error| ClientError::NoServer(format!("{}: {}", connect_path.display(), error)))?;
    let port_file_path = port_file_path.trim();

    let contents = fs::read_to_string(port_file_path)
        .map_err(|error| ClientError::NoServer(format!("{}: {}", port_file_path, error)))?;
    let mut lines = contents.lines();
    let observer_port : u16 = lines.next()
        .and_then(|line| line.trim().parse().ok())
        .ok_or_else(|| ClientError::NoServer(format!("malformed port file: {}", port_file_path)))?;
    let master_port : u16 = lines.next()
        .and_then(|line| line.trim().parse().ok())
        .ok_or_else(|| ClientError::NoServer(format!("malformed port file: {}", port_file_path)))?;

    Ok((observer_port, master_port))
}

pub fn connect(host : &str, port : u16) -> Result<TcpStream, ClientError>
{
    TcpStream::connect((host, port)).map_err(ClientError::Connect)
}

fn send_line(stream : &mut TcpStream, line : &str) -> Result<(), ClientError>
{
    writeln!(stream, "{}", line).map_err(ClientError::Io)
}

/*  Consumes the `JOBSERVER_WORKERS_READY` greeting every master-port
    connection starts with. Control clients send no `ENV` lines of their
    own -- that handshake is worker-only (§4.5) -- so there is nothing to
    write here, only a line to read past. */
fn consume_greeting<R : BufRead>(reader : &mut R) -> Result<(), ClientError>
{
    let mut line = String::new();
    loop
    {
        line.clear();
        if reader.read_line(&mut line).map_err(ClientError::Io)? == 0
        {
            return Ok(());
        }
        if line.trim_end() == "JOBSERVER_WORKERS_READY"
        {
            return Ok(());
        }
    }
}

const BUILD_SUCCESS_BANNER : (&str, Color) = ("Up-to-date", Color::Cyan);
const BUILD_ERROR_BANNER : (&str, Color) = ("    Failed", Color::Red);

/*  Submits `BUILD <targets>...` and streams the response until `BUILD_END`,
    printing output lines and a banner per resolved target. Returns the
    process exit code to use: 0 if every target reported success, 1 if any
    reported failure. */
pub fn run_build<PrinterType : Printer>(
    stream : &mut TcpStream,
    targets : &[String],
    printer : &mut PrinterType,
) -> Result<i32, ClientError>
{
    let read_stream = stream.try_clone().map_err(ClientError::Io)?;
    let mut reader = BufReader::new(read_stream);
    consume_greeting(&mut reader)?;

    let command_line = if targets.is_empty()
    {
        "BUILD".to_string()
    }
    else
    {
        format!("BUILD {}", targets.join(" "))
    };
    send_line(stream, &command_line)?;

    let mut exit_code = 0;
    let mut line = String::new();
    loop
    {
        line.clear();
        if reader.read_line(&mut line).map_err(ClientError::Io)? == 0
        {
            break;
        }
        let response = protocol::parse_control_response(line.trim_end());

        match &response
        {
            ControlResponse::Output(text) => printer.print(text),
            ControlResponse::BuildSuccess(target) =>
            {
                printer.print_single_banner_line(BUILD_SUCCESS_BANNER.0, BUILD_SUCCESS_BANNER.1, target);
            },
            ControlResponse::BuildError(target, message) =>
            {
                printer.print_single_banner_line(BUILD_ERROR_BANNER.0, BUILD_ERROR_BANNER.1, target);
                if !message.is_empty()
                {
                    printer.error(message);
                }
                exit_code = 1;
            },
            ControlResponse::BuildEnd => break,
            ControlResponse::CliOwner(_) => {},
            other => printer.print(&other.to_string()),
        }
    }

    Ok(exit_code)
}

/*  Sends one control command that carries its own terminator (`LIST_STALE`
    -> `STALE_END`, `STATUS` -> a single `STATUS` line) and prints every
    line up to and including the terminator. Used for the non-build
    subcommands of the `cli` dispatcher. */
pub fn run_command<PrinterType : Printer>(
    stream : &mut TcpStream,
    command_line : &str,
    printer : &mut PrinterType,
) -> Result<(), ClientError>
{
    let read_stream = stream.try_clone().map_err(ClientError::Io)?;
    let mut reader = BufReader::new(read_stream);
    consume_greeting(&mut reader)?;

    send_line(stream, command_line)?;

    let keyword = command_line.split_whitespace().next().unwrap_or("");
    let mut line = String::new();
    loop
    {
        line.clear();
        if reader.read_line(&mut line).map_err(ClientError::Io)? == 0
        {
            return Ok(());
        }
        let response = protocol::parse_control_response(line.trim_end());

        match &response
        {
            ControlResponse::Output(text) => printer.print(text),
            ControlResponse::Stale(target) => printer.print(&format!("stale: {}", target)),
            ControlResponse::StaleEnd => return Ok(()),
            ControlResponse::StatusLine(text) => { printer.print(text); return Ok(()); },
            ControlResponse::CliOwner(_) => {},
            _ if keyword == "SHUTDOWN" => return Ok(()),
            _ => {},
        }
    }
}
