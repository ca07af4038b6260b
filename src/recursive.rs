/*  Recursive-make fork-and-expand (see the job server's job-submission
    path in `jobserver.rs`): when a recipe, once expanded, is composed
    solely of `$(MAKE) -C dir [target]` clauses (as recognized by
    `commands::classify_recursive_make`), the caller's own recipe is never
    executed. Instead, for each clause, this module parses the
    subdirectory's own rule file into a fresh, throwaway `RuleStore`,
    resolves the requested target there, flattens the result to
    root-relative paths, and serializes it to a transfer file as an audit
    artifact before handing the jobs back to the caller for merging into
    the parent queue. */

use std::fmt;

use bincode;
use serde::{Deserialize, Serialize};

use crate::graph::{GraphEngine, GraphError};
use crate::rule::{RuleStore, RuleStoreError};
use crate::system::System;

pub const DEFAULT_RULE_FILE_NAME : &str = "build.rules";

#[derive(Debug)]
pub enum RecursiveError
{
    Graph(GraphError),
    Rule(RuleStoreError),
    Transfer(String),
}

impl fmt::Display for RecursiveError
{
    fn fmt(&self, formatter : &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            RecursiveError::Graph(error) => write!(formatter, "{}", error),
            RecursiveError::Rule(error) => write!(formatter, "{}", error),
            RecursiveError::Transfer(message) => write!(formatter, "failed to write transfer file: {}", message),
        }
    }
}

impl From<GraphError> for RecursiveError
{
    fn from(error : GraphError) -> Self { RecursiveError::Graph(error) }
}

impl From<RuleStoreError> for RecursiveError
{
    fn from(error : RuleStoreError) -> Self { RecursiveError::Rule(error) }
}

/*  One flattened, fully-expanded job imported from a subdirectory build.
    Also the shape written to the transfer-file audit artifact, so a
    stalled or misbehaving recursive build can be inspected after the
    fact without re-running it. */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferJob
{
    pub target : String,
    pub dir : String,
    pub layer : usize,
    pub recipe : Vec<String>,
    pub is_pseudo : bool,
}

/*  Joins `base` and `relative` (unless `relative` is already absolute),
    then collapses `.`/`..` components and drops an immediately-repeated
    directory segment -- guards against the doubled paths a recursive
    rewrite produces when a child's already-root-relative name is rejoined
    to the parent's directory a second time (`sub/sub/foo.o` -> `sub/foo.o`). */
pub fn normalize_path(base : &str, relative : &str) -> String
{
    let joined = if relative.starts_with('/')
    {
        relative.to_string()
    }
    else if base.is_empty() || base == "."
    {
        relative.to_string()
    }
    else
    {
        format!("{}/{}", base.trim_end_matches('/'), relative)
    };

    let mut components : Vec<&str> = Vec::new();
    for part in joined.split('/')
    {
        match part
        {
            "" | "." => {},
            ".." => { components.pop(); },
            other =>
            {
                if components.last() != Some(&other)
                {
                    components.push(other);
                }
            },
        }
    }

    if components.is_empty() { ".".to_string() } else { components.join("/") }
}

/*  Parses `clause_dir`'s own rule file in an isolated store, resolves
    `target` (or that store's default target, when the clause named none)
    into a ground job set, and rewrites every target and directory to be
    root-relative to `caller_dir`. `overrides` are command-line `NAME=VALUE`
    assignments from the caller, applied to the child's variable store
    before parsing so they win over anything the child's own rule file
    sets with plain `=`/`?=`. */
pub fn fork_and_expand<SystemType : System>(
    system : &SystemType,
    caller_dir : &str,
    clause_dir : &str,
    target : &str,
    overrides : &[(String, String)],
) -> Result<Vec<TransferJob>, RecursiveError>
{
    let child_dir = normalize_path(caller_dir, clause_dir);
    let rule_file = normalize_path(&child_dir, DEFAULT_RULE_FILE_NAME);

    let mut store = RuleStore::new();
    store.load_file(system, &rule_file)?;

    for (name, value) in overrides
    {
        store.variables.set_override(name, value);
    }

    let requested = if target.is_empty()
    {
        store.default_target().map(|(_, t)| t.to_string())
            .ok_or_else(|| RecursiveError::Graph(GraphError::NoRule("<default>".to_string())))?
    }
    else
    {
        target.to_string()
    };

    let dirty = std::collections::HashSet::new();
    let engine = GraphEngine::new(&store, system, &dirty);
    let jobs = engine.resolve(&rule_file, &requested)?;

    Ok(jobs.into_iter().map(|job| TransferJob
    {
        target : normalize_path(&child_dir, &job.target),
        dir : child_dir.clone(),
        layer : job.layer,
        recipe : job.recipe,
        is_pseudo : job.is_pseudo,
    }).collect())
}

/*  Serializes the flattened job set with `bincode`, the same
    serde-derived-struct-plus-bincode pattern the rest of the crate uses
    for persisted state, to a path under the job server's scratch
    directory. This is an audit artifact only -- nothing reads it back
    during normal operation. */
pub fn write_transfer_file(path : &str, jobs : &[TransferJob]) -> Result<(), RecursiveError>
{
    let bytes = bincode::serialize(jobs).map_err(|error| RecursiveError::Transfer(error.to_string()))?;
    std::fs::write(path, bytes).map_err(|error| RecursiveError::Transfer(error.to_string()))
}
