/*  Line-oriented parser for the classic tab-indented rule-file grammar:
    variable assignment (`=`, `:=`, `+=`, `?=`), `include`/`-include`,
    `.PHONY`, and `target[ target...] : [prereq...]` followed by recipe
    lines introduced by a leading tab.  No regex: rule files are scanned the
    same hand-rolled, line-at-a-time way the rest of this crate reads
    structured text, mirroring how the teacher's original rule-block parser
    walked its own line-oriented grammar. */

use std::fmt;
use crate::system::{System, SystemError};

#[derive(Debug, Clone, PartialEq)]
pub struct RecipeLine
{
    pub text : String,
    pub silent : bool,
    pub ignore_errors : bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRule
{
    pub targets : Vec<String>,
    pub prerequisites : Vec<String>,
    pub recipe : Vec<RecipeLine>,
    pub file : String,
    pub line : usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp
{
    Deferred,
    Immediate,
    Append,
    Conditional,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarAssign
{
    pub name : String,
    pub op : AssignOp,
    pub value : String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedFile
{
    pub rules : Vec<RawRule>,
    pub phony : Vec<String>,
    pub assignments : Vec<VarAssign>,
}

impl ParsedFile
{
    fn merge(&mut self, mut other : ParsedFile)
    {
        self.rules.append(&mut other.rules);
        self.phony.append(&mut other.phony);
        self.assignments.append(&mut other.assignments);
    }
}

#[derive(Debug)]
pub enum RuleFileError
{
    CannotOpen(String, SystemError),
    NotUTF8(String),
    Syntax { file : String, line : usize, message : String },
}

impl fmt::Display for RuleFileError
{
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            RuleFileError::CannotOpen(path, error) =>
                write!(formatter, "{}: {}", path, error),

            RuleFileError::NotUTF8(path) =>
                write!(formatter, "{}: not valid UTF-8", path),

            RuleFileError::Syntax { file, line, message } =>
                write!(formatter, "{}:{}: {}", file, line, message),
        }
    }
}

fn read_to_string<SystemType : System>(system : &SystemType, path : &str) -> Result<String, RuleFileError>
{
    use std::io::Read;

    match system.open(path)
    {
        Ok(mut file) =>
        {
            let mut bytes = Vec::new();
            match file.read_to_end(&mut bytes)
            {
                Ok(_) => match String::from_utf8(bytes)
                {
                    Ok(text) => Ok(text),
                    Err(_) => Err(RuleFileError::NotUTF8(path.to_string())),
                },
                Err(_) => Err(RuleFileError::CannotOpen(path.to_string(), SystemError::Weird)),
            }
        },
        Err(error) => Err(RuleFileError::CannotOpen(path.to_string(), error)),
    }
}

/*  Loads `path`, resolving `include`/`-include` directives recursively.
    Order is preserved: an include's rules and assignments are spliced in at
    the point of the directive, matching a reader's textual intuition and the
    classic tool's later-wins variable semantics. */
pub fn load<SystemType : System>(system : &SystemType, path : &str) -> Result<ParsedFile, RuleFileError>
{
    let content = read_to_string(system, path)?;
    parse(path, &content, system)
}

fn parse<SystemType : System>(file_name : &str, content : &str, system : &SystemType)
    -> Result<ParsedFile, RuleFileError>
{
    let mut result = ParsedFile::default();
    let lines : Vec<&str> = content.lines().collect();
    let mut index = 0usize;

    while index < lines.len()
    {
        let raw_line = lines[index];
        let line_number = index + 1;
        index += 1;

        if raw_line.starts_with('\t')
        {
            /*  A recipe line with no preceding target line: in a well-formed
                file this cannot happen because recipe lines are only ever
                consumed just below, immediately after their target line. */
            return Err(RuleFileError::Syntax
            {
                file : file_name.to_string(),
                line : line_number,
                message : "recipe line without a preceding target".to_string(),
            });
        }

        let trimmed = raw_line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#')
        {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("-include").filter(|r| r.starts_with(char::is_whitespace) || r.is_empty())
        {
            for include_path in rest.split_whitespace()
            {
                match load(system, include_path)
                {
                    Ok(included) => result.merge(included),
                    Err(RuleFileError::CannotOpen(_, _)) => {},
                    Err(error) => return Err(error),
                }
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("include").filter(|r| r.starts_with(char::is_whitespace) || r.is_empty())
        {
            for include_path in rest.split_whitespace()
            {
                let included = load(system, include_path)?;
                result.merge(included);
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix(".PHONY")
        {
            let rest = rest.trim_start();
            let rest = rest.strip_prefix(':').unwrap_or(rest).trim_start();
            for target in rest.split_whitespace()
            {
                result.phony.push(target.to_string());
            }
            continue;
        }

        if let Some(assign) = try_parse_assignment(trimmed)
        {
            result.assignments.push(assign);
            continue;
        }

        match trimmed.find(':')
        {
            Some(colon_index) =>
            {
                let targets : Vec<String> = trimmed[..colon_index]
                    .split_whitespace()
                    .map(|s| s.to_string())
                    .collect();

                if targets.is_empty()
                {
                    return Err(RuleFileError::Syntax
                    {
                        file : file_name.to_string(),
                        line : line_number,
                        message : "rule with no target".to_string(),
                    });
                }

                let prerequisites : Vec<String> = trimmed[colon_index + 1..]
                    .split_whitespace()
                    .map(|s| s.to_string())
                    .collect();

                let mut recipe = Vec::new();
                while index < lines.len() && lines[index].starts_with('\t')
                {
                    let mut body = lines[index][1..].to_string();
                    index += 1;

                    let silent = body.starts_with('@');
                    if silent { body.remove(0); }

                    let ignore_errors = body.starts_with('-');
                    if ignore_errors { body.remove(0); }

                    recipe.push(RecipeLine { text : body, silent, ignore_errors });
                }

                result.rules.push(RawRule
                {
                    targets,
                    prerequisites,
                    recipe,
                    file : file_name.to_string(),
                    line : line_number,
                });
            },
            None =>
            {
                return Err(RuleFileError::Syntax
                {
                    file : file_name.to_string(),
                    line : line_number,
                    message : format!("expected ':' in line: {}", trimmed),
                });
            },
        }
    }

    Ok(result)
}

fn try_parse_assignment(line : &str) -> Option<VarAssign>
{
    /*  Scan left to right for the first assignment operator that is not part
        of a target/prereq separator; `:=` must be checked before a bare `=`,
        and `:` rule lines must never be mistaken for `:=` assignments. */
    let bytes = line.as_bytes();
    for (i, &byte) in bytes.iter().enumerate()
    {
        if byte != b'='
        {
            continue;
        }

        if i > 0 && bytes[i - 1] == b':'
        {
            let name = line[..i - 1].trim();
            if is_valid_name(name)
            {
                return Some(VarAssign { name : name.to_string(), op : AssignOp::Immediate, value : line[i + 1..].trim().to_string() });
            }
            return None;
        }

        if i > 0 && bytes[i - 1] == b'+'
        {
            let name = line[..i - 1].trim();
            if is_valid_name(name)
            {
                return Some(VarAssign { name : name.to_string(), op : AssignOp::Append, value : line[i + 1..].trim().to_string() });
            }
            return None;
        }

        if i > 0 && bytes[i - 1] == b'?'
        {
            let name = line[..i - 1].trim();
            if is_valid_name(name)
            {
                return Some(VarAssign { name : name.to_string(), op : AssignOp::Conditional, value : line[i + 1..].trim().to_string() });
            }
            return None;
        }

        let name = line[..i].trim();
        if is_valid_name(name)
        {
            return Some(VarAssign { name : name.to_string(), op : AssignOp::Deferred, value : line[i + 1..].trim().to_string() });
        }
        return None;
    }

    None
}

fn is_valid_name(name : &str) -> bool
{
    !name.is_empty()
        && !name.contains(':')
        && !name.contains(char::is_whitespace)
        && name.chars().next().map_or(false, |c| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}
