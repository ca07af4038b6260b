use crate::system::
{
    System,
    SystemError,
    CommandLineOutput
};
use std::collections::VecDeque;
use std::process::Command;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;


#[derive(Debug, Clone)]
pub struct RealSystem
{
}

impl RealSystem
{
    pub fn new() -> Self
    {
        RealSystem{}
    }
}

fn convert_io_error_to_system_error(error : std::io::Error) -> SystemError
{
    match error.kind()
    {
        ErrorKind::NotFound
            => SystemError::NotFound,

        _ => SystemError::Weird,
    }
}


impl System for RealSystem
{
    type File = fs::File;

    fn open(&self, path: &str) -> Result<Self::File, SystemError>
    {
        match fs::File::open(path)
        {
            Ok(file) => Ok(file),
            Err(error) => Err(convert_io_error_to_system_error(error)),
        }
    }

    fn create_file(&mut self, path: &str) -> Result<Self::File, SystemError>
    {
        match fs::File::create(path)
        {
            Ok(file) => Ok(file),
            Err(error) => Err(convert_io_error_to_system_error(error)),  
        }
    }

    fn create_dir(&mut self, path: &str) -> Result<(), SystemError>
    {
        match fs::create_dir(path)
        {
            Ok(_) => Ok(()),
            Err(error) => Err(convert_io_error_to_system_error(error)),  
        }
    }

    fn is_file(&self, path: &str) -> bool
    {
        Path::new(path).is_file()
    }

    fn is_dir(&self, path: &str) -> bool
    {
        Path::new(path).is_dir()
    }

    fn remove_file(&mut self, path: &str) -> Result<(), SystemError>
    {
        match fs::remove_file(path)
        {
            Ok(_) => Ok(()),
            Err(error) => Err(convert_io_error_to_system_error(error)),  
        }
    }

    fn remove_dir(&mut self, path: &str) -> Result<(), SystemError>
    {
        match fs::remove_dir(path)
        {
            Ok(_) => Ok(()),
            Err(error) => Err(convert_io_error_to_system_error(error)),
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), SystemError>
    {
        match fs::rename(from, to)
        {
            Ok(_) => Ok(()),
            Err(error) => Err(convert_io_error_to_system_error(error)),
        }
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>, SystemError>
    {
        match fs::read_dir(path)
        {
            Ok(entries) =>
            {
                let mut result = Vec::new();
                for entry in entries
                {
                    match entry
                    {
                        Ok(entry) => result.push(entry.file_name().to_string_lossy().into_owned()),
                        Err(error) => return Err(convert_io_error_to_system_error(error)),
                    }
                }
                result.sort();
                Ok(result)
            },
            Err(error) => Err(convert_io_error_to_system_error(error)),
        }
    }

    #[cfg(unix)]
    fn is_executable(&self, path: &str) -> Result<bool, SystemError>
    {
        match fs::metadata(path)
        {
            Ok(metadata) => Ok(metadata.permissions().mode() & 0o111 != 0),
            Err(error) => Err(convert_io_error_to_system_error(error)),
        }
    }

    #[cfg(not(unix))]
    fn is_executable(&self, path: &str) -> Result<bool, SystemError>
    {
        Ok(Path::new(path).is_file())
    }

    #[cfg(unix)]
    fn set_is_executable(&mut self, path: &str, executable: bool) -> Result<(), SystemError>
    {
        match fs::metadata(path)
        {
            Ok(metadata) =>
            {
                let mut permissions = metadata.permissions();
                let mode = permissions.mode();
                permissions.set_mode(if executable { mode | 0o111 } else { mode & !0o111 });
                match fs::set_permissions(path, permissions)
                {
                    Ok(_) => Ok(()),
                    Err(error) => Err(convert_io_error_to_system_error(error)),
                }
            },
            Err(error) => Err(convert_io_error_to_system_error(error)),
        }
    }

    #[cfg(not(unix))]
    fn set_is_executable(&mut self, _path: &str, _executable: bool) -> Result<(), SystemError>
    {
        Ok(())
    }

    fn get_modified(&self, path: &str) -> Result<SystemTime, SystemError>
    {
        match fs::metadata(path)
        {
            Ok(metadata) =>
            {
                match metadata.modified()
                {
                    Ok(timestamp) => Ok(timestamp),
                    Err(_) => Err(SystemError::ModifiedNotFound)
                }
            },
            Err(_) => Err(SystemError::MetadataNotFound)
        }
    }

    fn execute_command(&mut self, command_list: Vec<String>) ->
        Result<CommandLineOutput, SystemError>
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
                    Err(_error) => Err(SystemError::CommandExecutationFailed),
                }
            },
            None => Ok(CommandLineOutput::new()),
        }
    }
}