/*  Variable store and expander: recursive `$(NAME)`/`${NAME}` substitution,
    the function forms (`patsubst`, `subst`, `strip`, `filter`, `filter-out`,
    `words`, `word`, `firstword`, `lastword`, `dir`, `notdir`, `basename`,
    `suffix`, `addprefix`, `addsuffix`, `sort`, `wildcard`, `if`), and
    automatic-variable substitution (`$@`, `$<`, `$^`, `$*`) applied to
    recipes at execution time.

    Expansion is referentially transparent on a frozen VariableStore: it
    never touches the filesystem except through the one function explicitly
    allowed to, `$(wildcard ...)`, which takes a System by reference rather
    than reaching for one implicitly. */

use std::collections::HashMap;
use std::fmt;
use crate::rulefile::{AssignOp, VarAssign};
use crate::system::System;

const MAX_EXPANSION_DEPTH : usize = 50;

#[derive(Debug, Clone, PartialEq)]
enum RawValue
{
    /*  Expanded eagerly at assignment time (`:=`). */
    Immediate(String),
    /*  Expanded every time it's referenced (`=`, `+=`, `?=` against an
        unset variable). */
    Deferred(String),
}

impl RawValue
{
    fn text(&self) -> &str
    {
        match self
        {
            RawValue::Immediate(value) => value,
            RawValue::Deferred(value) => value,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariableStore
{
    values : HashMap<String, RawValue>,
    /*  Preserves assignment order so `SAVE` can re-emit variables the way
        they were declared. */
    order : Vec<String>,
}

#[derive(Debug)]
pub enum ExpandError
{
    DepthExceeded(String),
    UnterminatedReference(String),
    UnknownFunction(String),
}

impl fmt::Display for ExpandError
{
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            ExpandError::DepthExceeded(text) =>
                write!(formatter, "Variable expansion exceeded depth limit while expanding: {}", text),

            ExpandError::UnterminatedReference(text) =>
                write!(formatter, "Unterminated variable reference in: {}", text),

            ExpandError::UnknownFunction(name) =>
                write!(formatter, "Unknown function form: {}", name),
        }
    }
}

impl VariableStore
{
    pub fn new() -> Self
    {
        VariableStore { values : HashMap::new(), order : Vec::new() }
    }

    /*  Lowest priority: absorbed first, everything else can still override
        it. */
    pub fn set_from_environment(&mut self, name : &str, value : &str)
    {
        self.set_deferred_if_absent(name, value);
    }

    pub fn set_deferred_if_absent(&mut self, name : &str, value : &str)
    {
        if !self.values.contains_key(name)
        {
            self.insert(name, RawValue::Deferred(value.to_string()));
        }
    }

    /*  Highest priority: command-line NAME=VALUE overrides always win,
        applied after the rule file and environment. */
    pub fn set_override(&mut self, name : &str, value : &str)
    {
        self.insert(name, RawValue::Deferred(value.to_string()));
    }

    pub fn apply_assignment(&mut self, assign : &VarAssign)
    {
        match assign.op
        {
            AssignOp::Deferred =>
                self.insert(&assign.name, RawValue::Deferred(assign.value.clone())),

            AssignOp::Immediate =>
            {
                let expanded = self.expand(&assign.value).unwrap_or_else(|_| assign.value.clone());
                self.insert(&assign.name, RawValue::Immediate(expanded));
            },

            AssignOp::Append =>
            {
                let existing = self.values.get(&assign.name).map(|v| v.text().to_string());
                match existing
                {
                    Some(current) if !current.is_empty() =>
                    {
                        let joined = format!("{} {}", current, assign.value);
                        self.insert(&assign.name, RawValue::Deferred(joined));
                    },
                    Some(_) => self.insert(&assign.name, RawValue::Deferred(assign.value.clone())),
                    None => self.insert(&assign.name, RawValue::Deferred(assign.value.clone())),
                }
            },

            AssignOp::Conditional =>
            {
                if !self.values.contains_key(&assign.name)
                {
                    self.insert(&assign.name, RawValue::Deferred(assign.value.clone()));
                }
            },
        }
    }

    fn insert(&mut self, name : &str, value : RawValue)
    {
        if !self.values.contains_key(name)
        {
            self.order.push(name.to_string());
        }
        self.values.insert(name.to_string(), value);
    }

    pub fn get_raw(&self, name : &str) -> Option<&str>
    {
        self.values.get(name).map(|v| v.text())
    }

    pub fn assignments_in_order(&self) -> Vec<(&str, &str)>
    {
        self.order.iter().map(|name| (name.as_str(), self.values[name].text())).collect()
    }

    pub fn expand(&self, text : &str) -> Result<String, ExpandError>
    {
        expand_depth(self, text, 0, None)
    }

    pub fn expand_with_wildcards<SystemType : System>(&self, system : &SystemType, text : &str) -> Result<String, ExpandError>
    {
        expand_depth(self, text, 0, Some(system))
    }
}

/*  The automatic variables bound while a particular recipe line is being
    expanded. */
pub struct AutomaticVariables<'a>
{
    pub target : &'a str,
    pub prerequisites : &'a [String],
    pub stem : &'a str,
}

impl<'a> AutomaticVariables<'a>
{
    fn substitute(&self, text : &str) -> String
    {
        let first_prereq = self.prerequisites.first().map(|s| s.as_str()).unwrap_or("");

        let mut deduped = Vec::new();
        for prereq in self.prerequisites
        {
            if !deduped.contains(prereq)
            {
                deduped.push(prereq.clone());
            }
        }
        let all_prereqs = deduped.join(" ");

        let mut result = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next()
        {
            if c == '$'
            {
                match chars.peek()
                {
                    Some('@') => { chars.next(); result.push_str(self.target); },
                    Some('<') => { chars.next(); result.push_str(first_prereq); },
                    Some('^') => { chars.next(); result.push_str(&all_prereqs); },
                    Some('*') => { chars.next(); result.push_str(self.stem); },
                    _ => result.push(c),
                }
            }
            else
            {
                result.push(c);
            }
        }
        result
    }
}

pub fn expand_recipe_line(store : &VariableStore, automatic : &AutomaticVariables, text : &str) -> Result<String, ExpandError>
{
    let expanded = store.expand(text)?;
    Ok(automatic.substitute(&expanded))
}

fn expand_depth<SystemType : System>(
    store : &VariableStore,
    text : &str,
    depth : usize,
    system : Option<&SystemType>,
) -> Result<String, ExpandError>
{
    if depth >= MAX_EXPANSION_DEPTH
    {
        return Err(ExpandError::DepthExceeded(text.to_string()));
    }

    let mut result = String::new();
    let chars : Vec<char> = text.chars().collect();
    let mut i = 0usize;

    while i < chars.len()
    {
        if chars[i] == '$' && i + 1 < chars.len() && (chars[i + 1] == '(' || chars[i + 1] == '{')
        {
            let close = if chars[i + 1] == '(' { ')' } else { '}' };
            let open = chars[i + 1];
            let mut depth_count = 1usize;
            let mut j = i + 2;
            while j < chars.len() && depth_count > 0
            {
                if chars[j] == open { depth_count += 1; }
                else if chars[j] == close { depth_count -= 1; if depth_count == 0 { break; } }
                j += 1;
            }

            if depth_count != 0
            {
                return Err(ExpandError::UnterminatedReference(text.to_string()));
            }

            let inner : String = chars[i + 2..j].iter().collect();
            let expanded_inner = expand_depth(store, &inner, depth + 1, system)?;
            let substituted = resolve_reference(store, &expanded_inner, depth, system)?;
            result.push_str(&substituted);
            i = j + 1;
        }
        else if chars[i] == '$' && i + 1 < chars.len() && chars[i + 1] == '$'
        {
            result.push('$');
            i += 2;
        }
        else
        {
            result.push(chars[i]);
            i += 1;
        }
    }

    Ok(result)
}

fn resolve_reference<SystemType : System>(
    store : &VariableStore,
    inner : &str,
    depth : usize,
    system : Option<&SystemType>,
) -> Result<String, ExpandError>
{
    if let Some((function, rest)) = split_function(inner)
    {
        return call_function(store, function, rest, depth, system);
    }

    Ok(store.get_raw(inner.trim()).map(|value| value.to_string())
        .map(|raw| expand_depth(store, &raw, depth + 1, system))
        .transpose()?
        .unwrap_or_default())
}

fn split_function(inner : &str) -> Option<(&str, &str)>
{
    let trimmed = inner.trim_start();
    let space = trimmed.find(char::is_whitespace)?;
    let name = &trimmed[..space];

    const FUNCTIONS : &[&str] = &[
        "patsubst", "subst", "strip", "filter", "filter-out", "words", "word",
        "firstword", "lastword", "dir", "notdir", "basename", "suffix",
        "addprefix", "addsuffix", "sort", "wildcard", "if",
    ];

    if FUNCTIONS.contains(&name)
    {
        Some((name, trimmed[space..].trim_start()))
    }
    else
    {
        None
    }
}

/*  Splits on the first comma for a two-argument function, and on the first
    comma then treats the rest as one argument for functions whose final
    argument is itself comma-bearing (e.g. `if`'s else-clause). */
fn split_args(rest : &str, max_parts : usize) -> Vec<String>
{
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;

    for c in rest.chars()
    {
        match c
        {
            '(' | '{' => { depth += 1; current.push(c); },
            ')' | '}' => { depth -= 1; current.push(c); },
            ',' if depth == 0 && parts.len() + 1 < max_parts =>
            {
                parts.push(std::mem::take(&mut current));
            },
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn call_function<SystemType : System>(
    store : &VariableStore,
    function : &str,
    rest : &str,
    depth : usize,
    system : Option<&SystemType>,
) -> Result<String, ExpandError>
{
    let expand_arg = |s : &str| -> Result<String, ExpandError> { expand_depth(store, s.trim(), depth + 1, system) };

    match function
    {
        "patsubst" =>
        {
            let args = split_args(rest, 3);
            let (from, to, text) = (expand_arg(&args[0])?, expand_arg(&args[1])?, expand_arg(&args[2])?);
            Ok(text.split_whitespace().map(|word| patsubst_one(&from, &to, word)).collect::<Vec<_>>().join(" "))
        },

        "subst" =>
        {
            let args = split_args(rest, 3);
            let (from, to, text) = (expand_arg(&args[0])?, expand_arg(&args[1])?, expand_arg(&args[2])?);
            Ok(if from.is_empty() { text } else { text.replace(&from, &to) })
        },

        "strip" =>
        {
            let text = expand_arg(rest)?;
            Ok(text.split_whitespace().collect::<Vec<_>>().join(" "))
        },

        "filter" =>
        {
            let args = split_args(rest, 2);
            let (patterns, text) = (expand_arg(&args[0])?, expand_arg(&args[1])?);
            let patterns : Vec<&str> = patterns.split_whitespace().collect();
            Ok(text.split_whitespace()
                .filter(|word| patterns.iter().any(|pattern| pattern_matches(pattern, word)))
                .collect::<Vec<_>>().join(" "))
        },

        "filter-out" =>
        {
            let args = split_args(rest, 2);
            let (patterns, text) = (expand_arg(&args[0])?, expand_arg(&args[1])?);
            let patterns : Vec<&str> = patterns.split_whitespace().collect();
            Ok(text.split_whitespace()
                .filter(|word| !patterns.iter().any(|pattern| pattern_matches(pattern, word)))
                .collect::<Vec<_>>().join(" "))
        },

        "words" =>
        {
            let text = expand_arg(rest)?;
            Ok(text.split_whitespace().count().to_string())
        },

        "word" =>
        {
            let args = split_args(rest, 2);
            let (n, text) = (expand_arg(&args[0])?, expand_arg(&args[1])?);
            let index : usize = n.trim().parse().unwrap_or(0);
            Ok(text.split_whitespace().nth(index.saturating_sub(1)).unwrap_or("").to_string())
        },

        "firstword" =>
        {
            let text = expand_arg(rest)?;
            Ok(text.split_whitespace().next().unwrap_or("").to_string())
        },

        "lastword" =>
        {
            let text = expand_arg(rest)?;
            Ok(text.split_whitespace().last().unwrap_or("").to_string())
        },

        "dir" =>
        {
            let text = expand_arg(rest)?;
            Ok(text.split_whitespace().map(dir_of).collect::<Vec<_>>().join(" "))
        },

        "notdir" =>
        {
            let text = expand_arg(rest)?;
            Ok(text.split_whitespace().map(notdir_of).collect::<Vec<_>>().join(" "))
        },

        "basename" =>
        {
            let text = expand_arg(rest)?;
            Ok(text.split_whitespace().map(basename_of).collect::<Vec<_>>().join(" "))
        },

        "suffix" =>
        {
            let text = expand_arg(rest)?;
            Ok(text.split_whitespace().filter_map(suffix_of).collect::<Vec<_>>().join(" "))
        },

        "addprefix" =>
        {
            let args = split_args(rest, 2);
            let (prefix, text) = (expand_arg(&args[0])?, expand_arg(&args[1])?);
            Ok(text.split_whitespace().map(|word| format!("{}{}", prefix, word)).collect::<Vec<_>>().join(" "))
        },

        "addsuffix" =>
        {
            let args = split_args(rest, 2);
            let (suffix, text) = (expand_arg(&args[0])?, expand_arg(&args[1])?);
            Ok(text.split_whitespace().map(|word| format!("{}{}", word, suffix)).collect::<Vec<_>>().join(" "))
        },

        "sort" =>
        {
            let text = expand_arg(rest)?;
            let mut words : Vec<&str> = text.split_whitespace().collect();
            words.sort();
            words.dedup();
            Ok(words.join(" "))
        },

        "wildcard" =>
        {
            let pattern = expand_arg(rest)?;
            match system
            {
                Some(system) => Ok(wildcard(system, pattern.trim()).join(" ")),
                None => Ok(String::new()),
            }
        },

        "if" =>
        {
            let args = split_args(rest, 3);
            let condition = expand_arg(&args[0])?;
            if !condition.trim().is_empty()
            {
                expand_arg(args.get(1).map(|s| s.as_str()).unwrap_or(""))
            }
            else
            {
                expand_arg(args.get(2).map(|s| s.as_str()).unwrap_or(""))
            }
        },

        other => Err(ExpandError::UnknownFunction(other.to_string())),
    }
}

fn patsubst_one(from : &str, to : &str, word : &str) -> String
{
    match from.find('%')
    {
        Some(star) =>
        {
            let prefix = &from[..star];
            let suffix = &from[star + 1..];
            if word.starts_with(prefix) && word.ends_with(suffix) && word.len() >= prefix.len() + suffix.len()
            {
                let stem = &word[prefix.len()..word.len() - suffix.len()];
                to.replacen('%', stem, 1)
            }
            else
            {
                word.to_string()
            }
        },
        None => if word == from { to.to_string() } else { word.to_string() },
    }
}

fn pattern_matches(pattern : &str, word : &str) -> bool
{
    match pattern.find('%')
    {
        Some(star) =>
        {
            let prefix = &pattern[..star];
            let suffix = &pattern[star + 1..];
            word.starts_with(prefix) && word.ends_with(suffix) && word.len() >= prefix.len() + suffix.len()
        },
        None => word == pattern,
    }
}

fn dir_of(path : &str) -> String
{
    match path.rfind('/')
    {
        Some(i) => path[..=i].to_string(),
        None => "./".to_string(),
    }
}

fn notdir_of(path : &str) -> String
{
    match path.rfind('/')
    {
        Some(i) => path[i + 1..].to_string(),
        None => path.to_string(),
    }
}

fn basename_of(path : &str) -> String
{
    match path.rfind('.')
    {
        Some(i) if i > path.rfind('/').map(|s| s + 1).unwrap_or(0) => path[..i].to_string(),
        _ => path.to_string(),
    }
}

fn suffix_of(path : &str) -> Option<String>
{
    let name = notdir_of(path);
    name.rfind('.').map(|i| name[i..].to_string())
}

fn wildcard<SystemType : System>(system : &SystemType, pattern : &str) -> Vec<String>
{
    let (dir, glob) = match pattern.rfind('/')
    {
        Some(i) => (&pattern[..i], &pattern[i + 1..]),
        None => (".", pattern),
    };

    let prefix = glob.split('*').next().unwrap_or("");
    let suffix = glob.rsplit('*').next().unwrap_or("");

    match system.list_dir(dir)
    {
        Ok(entries) => entries.into_iter()
            .filter(|entry| entry.starts_with(prefix) && entry.ends_with(suffix))
            .map(|entry| if dir == "." { entry } else { format!("{}/{}", dir, entry) })
            .collect(),
        Err(_) => Vec::new(),
    }
}
