/*  The rule store: three disjoint maps (fixed, pattern, pseudo) keyed by
    `"<file>\t<target>"`, plus the variable store accumulated while parsing,
    and the default-target pointer (the first non-pseudo fixed target seen).

    Re-parsing a file is idempotent when its content is unchanged, and
    interactively-added rules (via the control protocol's `ADD_RULE` and
    friends) survive a re-parse unless the caller explicitly resets the
    store. */

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::expand::VariableStore;
use crate::rulefile::{self, RawRule, RecipeLine, RuleFileError};
use crate::system::System;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind
{
    Fixed,
    Pattern,
    Pseudo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule
{
    pub kind : RuleKind,
    pub targets : Vec<String>,
    pub prerequisites : Vec<String>,
    pub recipe : Vec<RecipeLine>,
    pub file : String,
    pub line : usize,
}

impl Rule
{
    pub fn is_compound(&self) -> bool
    {
        self.targets.len() > 1
    }

    /*  `x%a y%b: ...` yields the synthetic name `x$a&y$b` once the pattern
        stem is known. */
    pub fn compound_name(&self, stem : &str) -> String
    {
        self.targets.iter()
            .map(|target| target.replacen('%', &format!("${}", stem), 1))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn key(file : &str, target : &str) -> String
{
    format!("{}\t{}", file, target)
}

#[derive(Debug, Default)]
pub struct RuleStore
{
    fixed : HashMap<String, Rule>,
    /*  Definition order matters: the graph engine tries pattern rules in the
        order they were declared. */
    pattern : Vec<Rule>,
    pseudo : HashSet<String>,
    pub variables : VariableStore,
    default_target : Option<(String, String)>,
}

#[derive(Debug)]
pub enum RuleStoreError
{
    File(RuleFileError),
}

impl fmt::Display for RuleStoreError
{
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            RuleStoreError::File(error) => write!(formatter, "{}", error),
        }
    }
}

impl From<RuleFileError> for RuleStoreError
{
    fn from(error : RuleFileError) -> Self
    {
        RuleStoreError::File(error)
    }
}

impl RuleStore
{
    pub fn new() -> Self
    {
        RuleStore::default()
    }

    pub fn reset(&mut self)
    {
        *self = RuleStore::default();
    }

    /*  Parses `path` and merges its rules into the store. Duplicate fixed
        targets from the same file are a later-wins warning, not an error;
        pattern rules accumulate in declaration order regardless of
        duplication, and the graph engine resolves any resulting ambiguity. */
    pub fn load_file<SystemType : System>(&mut self, system : &SystemType, path : &str) -> Result<(), RuleStoreError>
    {
        let parsed = rulefile::load(system, path)?;

        for assignment in &parsed.assignments
        {
            self.variables.apply_assignment(assignment);
        }

        let scope = parsed.rules.first().map(|rule| rule.file.clone()).unwrap_or_else(|| path.to_string());
        for target in &parsed.phony
        {
            self.pseudo.insert(key(&scope, target));
        }

        for raw in parsed.rules
        {
            self.insert_raw_rule(raw);
        }

        Ok(())
    }

    fn insert_raw_rule(&mut self, raw : RawRule)
    {
        let is_pattern = raw.targets.iter().any(|target| target.contains('%'));
        let pseudo_targets : Vec<String> = raw.targets.iter()
            .filter(|target| self.pseudo.contains(&key(&raw.file, target)))
            .cloned()
            .collect();

        let kind = if !pseudo_targets.is_empty() && pseudo_targets.len() == raw.targets.len()
        {
            RuleKind::Pseudo
        }
        else if is_pattern
        {
            RuleKind::Pattern
        }
        else
        {
            RuleKind::Fixed
        };

        let rule = Rule
        {
            kind,
            targets : raw.targets.clone(),
            prerequisites : raw.prerequisites,
            recipe : raw.recipe,
            file : raw.file.clone(),
            line : raw.line,
        };

        match kind
        {
            RuleKind::Pattern => self.pattern.push(rule),

            RuleKind::Fixed | RuleKind::Pseudo =>
            {
                if self.default_target.is_none() && kind == RuleKind::Fixed
                {
                    if let Some(first) = raw.targets.first()
                    {
                        self.default_target = Some((raw.file.clone(), first.clone()));
                    }
                }

                for target in &raw.targets
                {
                    self.fixed.insert(key(&raw.file, target), rule.clone());
                }
            },
        }
    }

    pub fn default_target(&self) -> Option<(&str, &str)>
    {
        self.default_target.as_ref().map(|(file, target)| (file.as_str(), target.as_str()))
    }

    pub fn is_pseudo(&self, file : &str, target : &str) -> bool
    {
        self.pseudo.contains(&key(file, target))
    }

    pub fn find_fixed(&self, file : &str, target : &str) -> Option<&Rule>
    {
        self.fixed.get(&key(file, target))
    }

    pub fn pattern_rules(&self) -> &[Rule]
    {
        &self.pattern
    }

    /*  Interactive mutation, exposed to the control protocol. */
    pub fn add_rule(&mut self, rule : Rule)
    {
        match rule.kind
        {
            RuleKind::Pattern => self.pattern.push(rule),
            RuleKind::Fixed =>
            {
                for target in &rule.targets
                {
                    self.fixed.insert(key(&rule.file, target), rule.clone());
                }
            },
            RuleKind::Pseudo =>
            {
                for target in &rule.targets
                {
                    self.pseudo.insert(key(&rule.file, target));
                    self.fixed.insert(key(&rule.file, target), rule.clone());
                }
            },
        }
    }

    pub fn modify_rule(&mut self, file : &str, target : &str, recipe : Vec<RecipeLine>) -> bool
    {
        if let Some(rule) = self.fixed.get_mut(&key(file, target))
        {
            rule.recipe = recipe;
            true
        }
        else
        {
            false
        }
    }

    pub fn modify_dependencies(&mut self, file : &str, target : &str, prerequisites : Vec<String>) -> bool
    {
        if let Some(rule) = self.fixed.get_mut(&key(file, target))
        {
            rule.prerequisites = prerequisites;
            true
        }
        else
        {
            false
        }
    }

    pub fn delete_rule(&mut self, file : &str, target : &str) -> bool
    {
        let removed = self.fixed.remove(&key(file, target)).is_some();
        self.pseudo.remove(&key(file, target));
        removed
    }

    /*  Re-emits every currently-known fixed rule and assignment in the
        classic tab-indented grammar, for the control protocol's `SAVE`. */
    pub fn serialize(&self) -> String
    {
        let mut text = String::new();

        for (name, value) in self.variables.assignments_in_order()
        {
            text.push_str(&format!("{} = {}\n", name, value));
        }

        if !self.pseudo.is_empty()
        {
            let mut names : Vec<&str> = self.pseudo.iter()
                .map(|k| k.split('\t').nth(1).unwrap_or(k.as_str()))
                .collect();
            names.sort();
            names.dedup();
            text.push_str(&format!(".PHONY: {}\n", names.join(" ")));
        }

        let mut seen = HashSet::new();
        for rule in self.fixed.values()
        {
            let identity = (rule.file.clone(), rule.targets.clone(), rule.line);
            if !seen.insert(identity)
            {
                continue;
            }

            text.push_str(&format!("{}: {}\n", rule.targets.join(" "), rule.prerequisites.join(" ")));
            for line in &rule.recipe
            {
                let mut prefix = String::new();
                if line.silent { prefix.push('@'); }
                if line.ignore_errors { prefix.push('-'); }
                text.push_str(&format!("\t{}{}\n", prefix, line.text));
            }
        }

        text
    }
}
