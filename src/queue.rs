/*  The in-memory job queue: layered readiness tracking, retry with
    exponential backoff on transient failures, and cascade failure to
    dependents. Nothing here talks to a socket or a worker process directly
    — `jobserver.rs` drives this queue and owns the TCP side. */

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::commands::is_transient_failure;

pub type JobId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState
{
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct JobRecord
{
    pub id : JobId,
    pub dir : String,
    pub target : String,
    pub command_lines : Vec<String>,
    pub layer : usize,
    pub owner : Option<u32>,
    pub assigned_worker : Option<usize>,
    pub attempts : usize,
    pub output : String,
    pub state : JobState,
    pub cancelled : bool,
    dependents : Vec<JobId>,
}

pub enum CompletionOutcome
{
    Done,
    Retry(Duration),
    Failed(Vec<JobId>),
}

#[derive(Debug)]
pub enum QueueError
{
    UnknownJob(JobId),
}

impl fmt::Display for QueueError
{
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            QueueError::UnknownJob(id) => write!(formatter, "no such job: {}", id),
        }
    }
}

pub struct JobQueue
{
    jobs : Vec<JobRecord>,
    index : HashMap<(String, String), JobId>,
    max_retries : usize,
    parallelism : usize,
}

impl JobQueue
{
    pub fn new(max_retries : usize, parallelism : usize) -> Self
    {
        JobQueue { jobs : Vec::new(), index : HashMap::new(), max_retries, parallelism }
    }

    pub fn parallelism(&self) -> usize
    {
        self.parallelism
    }

    /*  Inserts a job record for `(dir,target)` with state=queued, or returns
        the existing one: at most one queued/running entry per key. */
    pub fn submit(&mut self, dir : &str, target : &str, layer : usize, command_lines : Vec<String>, owner : Option<u32>) -> JobId
    {
        let key = (dir.to_string(), target.to_string());
        if let Some(&existing) = self.index.get(&key)
        {
            return existing;
        }

        let id = self.jobs.len();
        self.jobs.push(JobRecord
        {
            id,
            dir : dir.to_string(),
            target : target.to_string(),
            command_lines,
            layer,
            owner,
            assigned_worker : None,
            attempts : 0,
            output : String::new(),
            state : JobState::Queued,
            cancelled : false,
            dependents : Vec::new(),
        });
        self.index.insert(key, id);
        id
    }

    /*  Registers `dependent` as needing to be failed if `dependency` ever
        fails (transitive cascade). */
    pub fn add_dependency(&mut self, dependency : JobId, dependent : JobId)
    {
        if let Some(job) = self.jobs.get_mut(dependency)
        {
            job.dependents.push(dependent);
        }
    }

    pub fn get(&self, id : JobId) -> Option<&JobRecord>
    {
        self.jobs.get(id)
    }

    /*  Returns the next job eligible for dispatch: no job at a strictly
        lower layer is still queued or running, FIFO within the eligible
        layer by insertion order. */
    pub fn next_dispatchable(&self) -> Option<JobId>
    {
        let mut best : Option<JobId> = None;

        for job in &self.jobs
        {
            if job.state != JobState::Queued
            {
                continue;
            }

            let blocked = self.jobs.iter().any(|other|
                other.layer < job.layer && matches!(other.state, JobState::Queued | JobState::Running));

            if blocked
            {
                continue;
            }

            best = match best
            {
                None => Some(job.id),
                Some(current) if job.layer < self.jobs[current].layer => Some(job.id),
                Some(current) => Some(current),
            };
        }

        best
    }

    pub fn mark_running(&mut self, id : JobId, worker_id : usize) -> Result<(), QueueError>
    {
        let job = self.jobs.get_mut(id).ok_or(QueueError::UnknownJob(id))?;
        job.state = JobState::Running;
        job.assigned_worker = Some(worker_id);
        job.attempts += 1;
        Ok(())
    }

    /*  Applies a worker's task result: success marks the job done, failure
        either schedules a retry (transient, attempts remain under the
        limit) or cascades failure to every transitive dependent. */
    pub fn complete(&mut self, id : JobId, exit_code : i32, output : String) -> Result<CompletionOutcome, QueueError>
    {
        {
            let job = self.jobs.get_mut(id).ok_or(QueueError::UnknownJob(id))?;
            job.output = output.clone();
            job.assigned_worker = None;
        }

        if exit_code == 0
        {
            let job = self.jobs.get_mut(id).ok_or(QueueError::UnknownJob(id))?;
            job.state = JobState::Done;
            return Ok(CompletionOutcome::Done);
        }

        let (attempts, dependents) =
        {
            let job = self.jobs.get(id).ok_or(QueueError::UnknownJob(id))?;
            (job.attempts, job.dependents.clone())
        };

        if attempts < self.max_retries && is_transient_failure(&output)
        {
            let job = self.jobs.get_mut(id).ok_or(QueueError::UnknownJob(id))?;
            job.state = JobState::Queued;
            let delay_seconds = 0.1_f64 * 2f64.powi(attempts as i32 - 1);
            return Ok(CompletionOutcome::Retry(Duration::from_secs_f64(delay_seconds.max(0.0))));
        }

        let job = self.jobs.get_mut(id).ok_or(QueueError::UnknownJob(id))?;
        job.state = JobState::Failed;

        let cascaded = self.cascade_failure(&dependents);
        Ok(CompletionOutcome::Failed(cascaded))
    }

    fn cascade_failure(&mut self, starting : &[JobId]) -> Vec<JobId>
    {
        let mut failed = Vec::new();
        let mut stack = starting.to_vec();

        while let Some(id) = stack.pop()
        {
            let Some(job) = self.jobs.get_mut(id) else { continue };
            if job.state == JobState::Failed
            {
                continue;
            }
            job.state = JobState::Failed;
            job.output = "cancelled: dependency failed".to_string();
            failed.push(id);
            stack.extend(job.dependents.clone());
        }

        failed
    }

    /*  Drains every still-queued job to failed, annotated as cancelled; jobs
        already running are left for the caller (`jobserver.rs`) to stop via
        a `SHUTDOWN` sent to their assigned worker. */
    pub fn cancel(&mut self) -> Vec<JobId>
    {
        let mut cancelled = Vec::new();
        for job in &mut self.jobs
        {
            if job.state == JobState::Queued
            {
                job.state = JobState::Failed;
                job.cancelled = true;
                job.output = "cancelled".to_string();
                cancelled.push(job.id);
            }
        }
        cancelled
    }

    pub fn all_done(&self) -> bool
    {
        self.jobs.iter().all(|job| matches!(job.state, JobState::Done | JobState::Failed))
    }

    pub fn stale_targets(&self) -> Vec<(&str, &str)>
    {
        self.jobs.iter().map(|job| (job.dir.as_str(), job.target.as_str())).collect()
    }

    /*  Number of still-queued jobs per layer, sorted by layer -- the
        per-layer queue depth half of `STATUS`'s reporting contract. */
    pub fn layer_queue_depths(&self) -> Vec<(usize, usize)>
    {
        let mut counts : HashMap<usize, usize> = HashMap::new();
        for job in &self.jobs
        {
            if job.state == JobState::Queued
            {
                *counts.entry(job.layer).or_insert(0) += 1;
            }
        }
        let mut result : Vec<(usize, usize)> = counts.into_iter().collect();
        result.sort();
        result
    }
}

pub fn default_max_retries(parallel : bool) -> usize
{
    if parallel { 1 } else { 0 }
}
