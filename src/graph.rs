/*  Resolves a requested target into the set of jobs that must run to bring
    it up to date: fixed and pattern rule selection, prerequisite recursion,
    cycle detection, mtime-based staleness, and layer assignment.

    Staleness is whole-second, mtime-based, GNU-tie-convention (a
    prerequisite exactly as new as its target does not make the target
    stale) — there is no persisted content hash anywhere in this engine. */

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::expand::{self, AutomaticVariables, VariableStore};
use crate::rule::{Rule, RuleKind, RuleStore};
use crate::system::System;

#[derive(Debug, Clone)]
pub struct ResolvedJob
{
    pub target : String,
    pub dir : String,
    pub layer : usize,
    pub recipe : Vec<String>,
    pub is_pseudo : bool,
}

#[derive(Debug)]
pub enum GraphError
{
    Cycle(Vec<String>),
    NoRule(String),
    Expand(expand::ExpandError),
}

impl fmt::Display for GraphError
{
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            GraphError::Cycle(members) =>
                write!(formatter, "dependency cycle: {}", members.join(" -> ")),

            GraphError::NoRule(target) =>
                write!(formatter, "no rule to make target '{}'", target),

            GraphError::Expand(error) =>
                write!(formatter, "{}", error),
        }
    }
}

impl From<expand::ExpandError> for GraphError
{
    fn from(error : expand::ExpandError) -> Self
    {
        GraphError::Expand(error)
    }
}

#[derive(Clone, Copy)]
struct Resolution
{
    stale : bool,
    layer : usize,
}

/*  Matches `target` against a single pattern (the `%`-bearing half of a
    rule target), returning the stem when it matches. */
fn match_pattern(pattern : &str, target : &str) -> Option<String>
{
    let star = pattern.find('%')?;
    let prefix = &pattern[..star];
    let suffix = &pattern[star + 1..];

    if target.starts_with(prefix) && target.ends_with(suffix) && target.len() >= prefix.len() + suffix.len()
    {
        Some(target[prefix.len()..target.len() - suffix.len()].to_string())
    }
    else
    {
        None
    }
}

fn substitute_stem(pattern : &str, stem : &str) -> String
{
    match pattern.find('%')
    {
        Some(star) => format!("{}{}{}", &pattern[..star], stem, &pattern[star + 1..]),
        None => pattern.to_string(),
    }
}

struct Selection<'a>
{
    rule : &'a Rule,
    stem : String,
    prerequisites : Vec<String>,
}

/*  Finds the first pattern rule whose stem match yields prerequisites that
    either already exist or are themselves resolvable, skipping rules that
    would otherwise shadow an extant source file (`parse_misc.cc` must not
    be treated as a pattern-rule output just because `parse%cc` exists). */
fn select_pattern_rule<'a, SystemType : System>(
    store : &'a RuleStore,
    system : &SystemType,
    dir : &str,
    target : &str,
) -> Option<Selection<'a>>
{
    for rule in store.pattern_rules()
    {
        for own_target in &rule.targets
        {
            if let Some(stem) = match_pattern(own_target, target)
            {
                let prerequisites : Vec<String> = rule.prerequisites.iter()
                    .map(|prereq| substitute_stem(prereq, &stem))
                    .collect();

                let target_exists = system.is_file(target) || system.is_dir(target);
                let any_prereq_plausible = prerequisites.iter()
                    .any(|p| system.is_file(p) || system.is_dir(p) || store.find_fixed(dir, p).is_some());

                if target_exists && !any_prereq_plausible && !prerequisites.is_empty()
                {
                    continue;
                }

                return Some(Selection { rule, stem, prerequisites });
            }
        }
    }
    None
}

pub struct GraphEngine<'a, SystemType : System>
{
    store : &'a RuleStore,
    system : &'a SystemType,
    dirty : &'a HashSet<String>,
    visited : HashMap<String, Resolution>,
    stack : Vec<String>,
    compound_cache : HashMap<String, Resolution>,
    jobs : Vec<ResolvedJob>,
}

impl<'a, SystemType : System> GraphEngine<'a, SystemType>
{
    pub fn new(store : &'a RuleStore, system : &'a SystemType, dirty : &'a HashSet<String>) -> Self
    {
        GraphEngine
        {
            store,
            system,
            dirty,
            visited : HashMap::new(),
            stack : Vec::new(),
            compound_cache : HashMap::new(),
            jobs : Vec::new(),
        }
    }

    /*  Resolves `target` (and everything it transitively depends on) into
        the job set, consuming self. */
    pub fn resolve(mut self, dir : &str, target : &str) -> Result<Vec<ResolvedJob>, GraphError>
    {
        self.resolve_one(dir, target)?;
        Ok(self.jobs)
    }

    fn resolve_one(&mut self, dir : &str, target : &str) -> Result<Resolution, GraphError>
    {
        if let Some(cached) = self.visited.get(target)
        {
            return Ok(*cached);
        }

        if self.stack.contains(&target.to_string())
        {
            let mut members = self.stack.clone();
            members.push(target.to_string());
            return Err(GraphError::Cycle(members));
        }

        self.stack.push(target.to_string());
        let result = self.resolve_uncached(dir, target);
        self.stack.pop();

        let resolution = result?;
        self.visited.insert(target.to_string(), resolution);
        Ok(resolution)
    }

    fn resolve_uncached(&mut self, dir : &str, target : &str) -> Result<Resolution, GraphError>
    {
        if let Some(fixed) = self.store.find_fixed(dir, target)
        {
            return self.resolve_fixed(dir, target, fixed.clone());
        }

        if let Some(selection) = select_pattern_rule(self.store, self.system, dir, target)
        {
            return self.resolve_pattern(dir, target, selection);
        }

        if self.system.is_file(target) || self.system.is_dir(target)
        {
            return Ok(Resolution { stale : false, layer : 0 });
        }

        Err(GraphError::NoRule(target.to_string()))
    }

    fn resolve_fixed(&mut self, dir : &str, target : &str, rule : Rule) -> Result<Resolution, GraphError>
    {
        let is_pseudo = rule.kind == RuleKind::Pseudo;
        let mut max_stale_layer : Option<usize> = None;
        let mut any_prereq_stale = false;

        for prereq in &rule.prerequisites
        {
            let resolution = self.resolve_one(dir, prereq)?;
            if resolution.stale
            {
                any_prereq_stale = true;
                max_stale_layer = Some(max_stale_layer.map_or(resolution.layer, |current| current.max(resolution.layer)));
            }
        }

        let stale = is_pseudo
            || any_prereq_stale
            || self.dirty.contains(target)
            || !self.system.is_file(target) && !self.system.is_dir(target)
            || self.has_newer_prerequisite(target, &rule.prerequisites)?;

        let layer = match max_stale_layer
        {
            Some(value) => value + 1,
            None => 0,
        };

        if stale
        {
            let recipe = self.expand_recipe(target, &rule.prerequisites, "", &rule)?;
            self.jobs.push(ResolvedJob { target : target.to_string(), dir : dir.to_string(), layer, recipe, is_pseudo });
        }

        Ok(Resolution { stale, layer })
    }

    fn resolve_pattern(&mut self, dir : &str, target : &str, selection : Selection) -> Result<Resolution, GraphError>
    {
        let compound_name = selection.rule.compound_name(&selection.stem);

        let compound_resolution = if let Some(cached) = self.compound_cache.get(&compound_name)
        {
            *cached
        }
        else
        {
            let mut max_stale_layer : Option<usize> = None;
            let mut any_prereq_stale = false;

            for prereq in &selection.prerequisites
            {
                let resolution = self.resolve_one(dir, prereq)?;
                if resolution.stale
                {
                    any_prereq_stale = true;
                    max_stale_layer = Some(max_stale_layer.map_or(resolution.layer, |current| current.max(resolution.layer)));
                }
            }

            let stale = any_prereq_stale
                || self.dirty.contains(&compound_name)
                || selection.rule.targets.iter().any(|t|
                {
                    let actual = substitute_stem(t, &selection.stem);
                    !self.system.is_file(&actual) && !self.system.is_dir(&actual)
                })
                || self.has_newer_prerequisite(target, &selection.prerequisites)?;

            let layer = match max_stale_layer
            {
                Some(value) => value + 1,
                None => 0,
            };

            if stale
            {
                let recipe = self.expand_recipe(target, &selection.prerequisites, &selection.stem, selection.rule)?;
                self.jobs.push(ResolvedJob { target : compound_name.clone(), dir : dir.to_string(), layer, recipe, is_pseudo : false });
            }

            let resolution = Resolution { stale, layer };
            self.compound_cache.insert(compound_name.clone(), resolution);
            resolution
        };

        if target == compound_name
        {
            return Ok(compound_resolution);
        }

        /*  This particular output is a placeholder: it is marked done by a
            zero-cost `touch` once the compound job has run. It is placed one
            layer above the compound job -- never the same layer -- so the
            scheduler's layer-adjacent dependency edges (`JobServer::submit_target`)
            force the `touch` to wait for the compound recipe instead of racing
            it; a same-layer placeholder would have no ordering relationship
            to the compound job at all (§5: "no ordering within a layer"). */
        if compound_resolution.stale
        {
            let placeholder_layer = compound_resolution.layer + 1;
            self.jobs.push(ResolvedJob
            {
                target : target.to_string(),
                dir : dir.to_string(),
                layer : placeholder_layer,
                recipe : vec![format!("touch {}", target)],
                is_pseudo : false,
            });
            return Ok(Resolution { stale : true, layer : placeholder_layer });
        }

        Ok(compound_resolution)
    }

    fn has_newer_prerequisite(&self, target : &str, prerequisites : &[String]) -> Result<bool, GraphError>
    {
        let target_time = match self.system.get_modified(target)
        {
            Ok(time) => time,
            Err(_) => return Ok(false),
        };

        for prereq in prerequisites
        {
            if let Ok(prereq_time) = self.system.get_modified(prereq)
            {
                if whole_seconds(prereq_time) > whole_seconds(target_time)
                {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    fn expand_recipe(&self, target : &str, prerequisites : &[String], stem : &str, rule : &Rule) -> Result<Vec<String>, GraphError>
    {
        let automatic = AutomaticVariables { target, prerequisites, stem };
        let mut lines = Vec::new();
        for line in &rule.recipe
        {
            let expanded = expand::expand_recipe_line(&self.store_variables(), &automatic, &line.text)?;
            lines.push(expanded);
        }
        Ok(lines)
    }

    fn store_variables(&self) -> &VariableStore
    {
        &self.store.variables
    }
}

fn whole_seconds(time : std::time::SystemTime) -> u64
{
    time.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
