/*  Process execution for the worker: a single command (already a tokenized
    argv, as produced by `commands::parse_simple_command` or a one-element
    `sh -c` vector for the shell fallback) goes to the OS; a `FakeExecutor`
    stands in for tests so worker behavior can be exercised without
    touching a real process table. */

use std::collections::VecDeque;
use std::process::Command;
use crate::system::CommandLineOutput;

pub trait Executor
{
    fn execute_command(&mut self, dir : &str, command_list : Vec<String>) -> Result<CommandLineOutput, String>;
}

#[derive(Clone)]
pub struct OsExecutor
{
}

impl OsExecutor
{
    pub fn new() -> OsExecutor
    {
        OsExecutor{}
    }
}

impl Executor for OsExecutor
{
    fn execute_command(&mut self, dir : &str, command_list: Vec<String>) -> Result<CommandLineOutput, String>
    {
        let mut command_queue = VecDeque::from(command_list);
        let command_opt = match command_queue.pop_front()
        {
            Some(first) =>
            {
                let mut command = Command::new(first);
                while let Some(argument) = command_queue.pop_front()
                {
                    command.arg(argument);
                }
                if !dir.is_empty() && dir != "."
                {
                    command.current_dir(dir);
                }
                Some(command)
            },
            None => None
        };

        match command_opt
        {
            Some(mut command) =>
            {
                match command.output()
                {
                    Ok(out) => Ok(CommandLineOutput::from_output(out)),
                    Err(why) => Err(why.to_string()),
                }
            },
            None => Ok(CommandLineOutput::new()),
        }
    }
}

/*  A scripted executor for tests: each call pops the next canned response
    off the front of the queue, and records the command it was given so
    tests can assert on dispatch order (scheduling, retries) without
    caring what a real compiler would print. */
#[cfg(test)]
#[derive(Clone)]
pub struct FakeExecutor
{
    responses : std::collections::VecDeque<Result<CommandLineOutput, String>>,
    pub commands_run : Vec<Vec<String>>,
    pub dirs_run : Vec<String>,
}

#[cfg(test)]
impl FakeExecutor
{
    pub fn new() -> FakeExecutor
    {
        FakeExecutor { responses : std::collections::VecDeque::new(), commands_run : Vec::new(), dirs_run : Vec::new() }
    }

    pub fn push_response(&mut self, response : Result<CommandLineOutput, String>)
    {
        self.responses.push_back(response);
    }

    pub fn push_success(&mut self)
    {
        self.push_response(Ok(CommandLineOutput::new()));
    }

    pub fn push_failure(&mut self, message : &str)
    {
        self.push_response(Ok(CommandLineOutput::error(message.to_string())));
    }
}

#[cfg(test)]
impl Executor for FakeExecutor
{
    fn execute_command(&mut self, dir : &str, command_list : Vec<String>) -> Result<CommandLineOutput, String>
    {
        self.commands_run.push(command_list);
        self.dirs_run.push(dir.to_string());
        self.responses.pop_front().unwrap_or_else(|| Ok(CommandLineOutput::new()))
    }
}
