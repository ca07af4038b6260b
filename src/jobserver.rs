/*  The persistent job server: two TCP listeners (master for control
    clients, observer for read-only status), a single reactor thread that
    owns the rule store, the job queue, and the worker registry, and a
    small fleet of reader threads that turn socket lines into events for
    that reactor. Every mutation of shared state happens on the reactor
    thread; reader threads only parse and forward. */

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::commands::{self, Builtin};
use crate::graph::GraphEngine;
use crate::printer::Printer;
use crate::protocol::{self, ControlCommand, ControlResponse, Task, WorkerMessage};
use crate::queue::{CompletionOutcome, JobQueue};
use crate::recursive;
use crate::rule::{Rule, RuleKind, RuleStore};
use crate::rulefile::RecipeLine;
use crate::system::System;

pub const WORKER_HEARTBEAT_TIMEOUT : Duration = Duration::from_secs(5);
const HEARTBEAT_SWEEP_INTERVAL : Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum JobServerError
{
    Bind(std::io::Error),
    PortFile(std::io::Error),
}

impl fmt::Display for JobServerError
{
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            JobServerError::Bind(error) => write!(formatter, "failed to bind listener: {}", error),
            JobServerError::PortFile(error) => write!(formatter, "failed to write port file: {}", error),
        }
    }
}

type ClientId = u64;
type WorkerId = u64;

enum ServerEvent
{
    ClientConnected(ClientId, TcpStream),
    ClientLine(ClientId, String),
    ClientDisconnected(ClientId),
    WorkerConnected(WorkerId, TcpStream),
    WorkerLine(WorkerId, String),
    WorkerDisconnected(WorkerId),
    ObserverConnected(TcpStream),
    HeartbeatTick,
}

struct WorkerHandle
{
    stream : TcpStream,
    assigned_task : Option<u64>,
    last_seen : Instant,
}

struct ClientHandle
{
    stream : TcpStream,
    is_owner : bool,
}

/*  One outstanding `BUILD` request: the set of job ids still running or
    queued for each requested target, in request order, plus whether any
    job belonging to that target has failed. Popped (and `BUILD_END` sent)
    once every target has resolved. */
struct PendingBuild
{
    targets : VecDeque<(String, HashSet<crate::queue::JobId>, bool)>,
}

/*  Writes both ephemeral port numbers to the per-PID discovery file
    (observer port first, master port second) and points `.smak.connect` at
    it, per the discovery convention detached control clients rely on. */
pub fn write_discovery_files(pid : u32, observer_port : u16, master_port : u16, project_dir : &str) -> Result<String, JobServerError>
{
    let port_file_path = format!("/tmp/smak-jobserver-{}.port", pid);
    fs::write(&port_file_path, format!("{}\n{}\n", observer_port, master_port)).map_err(JobServerError::PortFile)?;

    let connect_path = Path::new(project_dir).join(".smak.connect");
    fs::write(&connect_path, format!("{}\n", port_file_path)).map_err(JobServerError::PortFile)?;

    Ok(port_file_path)
}

pub struct JobServer<SystemType : System>
{
    system : SystemType,
    rule_store : RuleStore,
    queue : JobQueue,
    dirty : std::collections::HashSet<String>,
    rule_file : String,
    overrides : Vec<(String, String)>,
    master_listener : TcpListener,
    observer_listener : TcpListener,
    events_tx : Sender<ServerEvent>,
    events_rx : Receiver<ServerEvent>,
    workers : HashMap<WorkerId, WorkerHandle>,
    clients : HashMap<ClientId, ClientHandle>,
    observers : Vec<TcpStream>,
    owner : Option<ClientId>,
    next_worker_id : Arc<AtomicU64>,
    next_client_id : Arc<AtomicU64>,
    worker_output : HashMap<WorkerId, Vec<String>>,
    retry_after : HashMap<crate::queue::JobId, Instant>,
    pending_builds : HashMap<ClientId, VecDeque<PendingBuild>>,
    paused : bool,
    shutting_down : bool,
    dry_run : bool,
}

impl<SystemType : System + 'static> JobServer<SystemType>
{
    pub fn bind(system : SystemType, rule_file : &str, max_retries : usize, parallelism : usize) -> Result<Self, JobServerError>
    {
        let master_listener = TcpListener::bind("127.0.0.1:0").map_err(JobServerError::Bind)?;
        let observer_listener = TcpListener::bind("127.0.0.1:0").map_err(JobServerError::Bind)?;
        let (events_tx, events_rx) = mpsc::channel();

        Ok(JobServer
        {
            system,
            rule_store : RuleStore::new(),
            queue : JobQueue::new(max_retries, parallelism),
            dirty : std::collections::HashSet::new(),
            rule_file : rule_file.to_string(),
            overrides : Vec::new(),
            master_listener,
            observer_listener,
            events_tx,
            events_rx,
            workers : HashMap::new(),
            clients : HashMap::new(),
            observers : Vec::new(),
            owner : None,
            next_worker_id : Arc::new(AtomicU64::new(0)),
            next_client_id : Arc::new(AtomicU64::new(0)),
            worker_output : HashMap::new(),
            retry_after : HashMap::new(),
            pending_builds : HashMap::new(),
            paused : false,
            shutting_down : false,
            dry_run : false,
        })
    }

    /*  When set, every task dispatched from here on is framed as
        `EXTERNAL_CMDS_DRY` (§4.6): workers print the recipe instead of
        running it, so the build touches no file on disk (§8's boundary
        behavior). Per-server rather than per-build, since `smak build -n`
        binds a fresh ephemeral server for the single build it runs. */
    pub fn set_dry_run(&mut self, dry_run : bool)
    {
        self.dry_run = dry_run;
    }

    pub fn master_port(&self) -> u16
    {
        self.master_listener.local_addr().map(|addr| addr.port()).unwrap_or(0)
    }

    pub fn observer_port(&self) -> u16
    {
        self.observer_listener.local_addr().map(|addr| addr.port()).unwrap_or(0)
    }

    /*  Command-line `NAME=VALUE` overrides (§6, §8's round-trip law) persist
        across every `rescan`, applied after the file loads so they win over
        any in-file assignment regardless of `=`/`:=`/`?=`. */
    pub fn set_variable_override(&mut self, name : &str, value : &str)
    {
        self.overrides.push((name.to_string(), value.to_string()));
    }

    pub fn rescan(&mut self) -> Result<(), crate::rule::RuleStoreError>
    {
        self.rule_store.reset();
        self.rule_store.variables.set_deferred_if_absent("MAKE", "smak");
        self.rule_store.load_file(&self.system, &self.rule_file)?;
        for (name, value) in &self.overrides
        {
            self.rule_store.variables.set_override(name, value);
        }
        Ok(())
    }

    /*  Spawns the accept loops for both listeners and runs the reactor loop
        on the calling thread until a `SHUTDOWN` command is processed. */
    pub fn run<PrinterType : Printer>(&mut self, printer : &mut PrinterType) -> Result<(), crate::rule::RuleStoreError>
    {
        self.rescan()?;
        self.spawn_master_acceptor();
        self.spawn_observer_acceptor();
        self.spawn_heartbeat_ticker();

        while !self.shutting_down
        {
            match self.events_rx.recv_timeout(HEARTBEAT_SWEEP_INTERVAL)
            {
                Ok(event) => self.handle_event(event, printer),
                Err(mpsc::RecvTimeoutError::Timeout) => self.sweep_heartbeats(printer),
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            self.dispatch_ready_jobs(printer);
        }

        Ok(())
    }

    /*  Every connection on the master port starts the same: the peer sends
        exactly one line before anything else. Workers send `READY`; control
        clients send a command line (or nothing, if they only ever issue
        `BUILD` after discovering the port). A dedicated thread per
        connection peeks that first line to decide which registry --
        worker or client -- the connection belongs to, then keeps reading
        lines into the matching event variant for the reactor. */
    fn spawn_master_acceptor(&self)
    {
        let listener = self.master_listener.try_clone().expect("clone master listener");
        let events_tx = self.events_tx.clone();
        let next_worker_id = self.next_worker_id.clone();
        let next_client_id = self.next_client_id.clone();
        thread::spawn(move ||
        {
            for stream in listener.incoming().flatten()
            {
                let events_tx = events_tx.clone();
                let next_worker_id = next_worker_id.clone();
                let next_client_id = next_client_id.clone();
                thread::spawn(move || handle_master_connection(stream, events_tx, next_worker_id, next_client_id));
            }
        });
    }

    fn spawn_observer_acceptor(&self)
    {
        let listener = self.observer_listener.try_clone().expect("clone observer listener");
        let events_tx = self.events_tx.clone();
        thread::spawn(move ||
        {
            for stream in listener.incoming().flatten()
            {
                let _ = events_tx.send(ServerEvent::ObserverConnected(stream));
            }
        });
    }

    fn spawn_heartbeat_ticker(&self)
    {
        let events_tx = self.events_tx.clone();
        thread::spawn(move ||
        {
            loop
            {
                thread::sleep(HEARTBEAT_SWEEP_INTERVAL);
                if events_tx.send(ServerEvent::HeartbeatTick).is_err()
                {
                    break;
                }
            }
        });
    }

    fn handle_event<PrinterType : Printer>(&mut self, event : ServerEvent, printer : &mut PrinterType)
    {
        match event
        {
            ServerEvent::ClientConnected(id, mut stream) =>
            {
                let _ = writeln!(stream, "JOBSERVER_WORKERS_READY");

                let is_owner = self.owner.is_none();
                if is_owner
                {
                    self.owner = Some(id);
                    self.broadcast_owner(id);
                }
                self.clients.insert(id, ClientHandle { stream, is_owner });
            },

            ServerEvent::ClientLine(id, line) => self.handle_client_line(id, &line, printer),

            ServerEvent::ClientDisconnected(id) =>
            {
                self.clients.remove(&id);
                self.pending_builds.remove(&id);
                if self.owner == Some(id)
                {
                    self.owner = self.clients.keys().next().copied();
                    if let Some(new_owner) = self.owner
                    {
                        self.broadcast_owner(new_owner);
                    }
                }
            },

            ServerEvent::WorkerConnected(id, mut stream) =>
            {
                send_env_snapshot(&mut stream);
                self.workers.insert(id, WorkerHandle { stream, assigned_task : None, last_seen : Instant::now() });
            },

            ServerEvent::WorkerLine(id, line) => self.handle_worker_line(id, &line),

            ServerEvent::WorkerDisconnected(id) =>
            {
                self.worker_output.remove(&id);
                if let Some(handle) = self.workers.remove(&id)
                {
                    if let Some(task_id) = handle.assigned_task
                    {
                        let _ = self.queue.complete(task_id as usize, 1, "cannot find worker: disconnected".to_string());
                        self.resolve_all_pending_builds();
                    }
                }
            },

            ServerEvent::ObserverConnected(stream) => self.observers.push(stream),

            ServerEvent::HeartbeatTick => self.sweep_heartbeats(printer),
        }
    }

    /*  Announces the current interactive owner to every other control
        client and to observers, so a CLI reattaching after a crash (or a
        second terminal watching the same session) can tell whose `BUILD`/
        rule-edit commands are currently authoritative. */
    fn broadcast_owner(&mut self, owner : ClientId)
    {
        for handle in self.clients.values_mut()
        {
            let _ = writeln!(handle.stream, "{}", ControlResponse::CliOwner(owner as u32));
        }
        for observer in &mut self.observers
        {
            let _ = writeln!(observer, "{}", ControlResponse::CliOwner(owner as u32));
        }
    }

    fn handle_client_line<PrinterType : Printer>(&mut self, id : ClientId, line : &str, printer : &mut PrinterType)
    {
        let command = match protocol::parse_control_command(line)
        {
            Ok(command) => command,
            Err(error) => { printer.error(&format!("{}", error)); return; },
        };

        match command
        {
            ControlCommand::Build(targets) =>
            {
                let mut pending = PendingBuild { targets : VecDeque::new() };
                for target in targets
                {
                    let job_ids = self.submit_target(&target, Some(id as u32), printer);
                    let already_failed = job_ids.iter().any(|&job_id| matches!(self.queue.get(job_id).map(|record| record.state), Some(crate::queue::JobState::Failed)));
                    pending.targets.push_back((target, job_ids.into_iter().collect(), already_failed));
                }
                self.pending_builds.entry(id).or_default().push_back(pending);
                self.resolve_pending_builds(id);
            },

            ControlCommand::ListStale =>
            {
                let stale : Vec<String> = self.queue.stale_targets().iter().map(|(_, t)| t.to_string()).collect();
                if let Some(handle) = self.clients.get_mut(&id)
                {
                    for target in stale
                    {
                        let _ = writeln!(handle.stream, "{}", ControlResponse::Stale(target));
                    }
                    let _ = writeln!(handle.stream, "{}", ControlResponse::StaleEnd);
                }
            },

            ControlCommand::Dirty(targets) => { self.dirty.extend(targets); },

            ControlCommand::Touch(targets) =>
            {
                for target in targets
                {
                    commands::run_builtin(&mut self.system, &Builtin::Touch { path : target.clone() });
                    self.dirty.remove(&target);
                }
            },

            ControlCommand::Rm(targets) =>
            {
                commands::run_builtin(&mut self.system, &Builtin::Remove { recursive : false, force : true, paths : targets });
            },

            ControlCommand::Rescan => { let _ = self.rescan(); },

            ControlCommand::Reset => { self.rule_store.reset(); let _ = self.rescan(); },

            ControlCommand::Start => { self.paused = false; },

            ControlCommand::Stop => { self.paused = true; },

            ControlCommand::Shutdown => { self.begin_shutdown(); },

            ControlCommand::CliOwner(new_owner) =>
            {
                let new_owner = new_owner as ClientId;
                self.owner = Some(new_owner);
                self.broadcast_owner(new_owner);
            },

            ControlCommand::Status =>
            {
                let worker_states : Vec<String> = self.workers.iter()
                    .map(|(worker_id, handle)| format!("{}:{}", worker_id, if handle.assigned_task.is_some() { "busy" } else { "idle" }))
                    .collect();
                let depths : Vec<String> = self.queue.layer_queue_depths().iter()
                    .map(|(layer, count)| format!("{}={}", layer, count))
                    .collect();

                if let Some(handle) = self.clients.get_mut(&id)
                {
                    let _ = writeln!(handle.stream, "{}", ControlResponse::StatusLine(
                        format!("workers=[{}] clients={} queue_depth=[{}]",
                            worker_states.join(","), self.clients.len(), depths.join(","))));
                }
            },

            ControlCommand::AddRule(payload) =>
            {
                match parse_add_rule_payload(&payload)
                {
                    Some(rule) => self.rule_store.add_rule(rule),
                    None => printer.error(&format!("malformed ADD_RULE payload: {}", payload)),
                }
            },

            ControlCommand::ModRule(payload) =>
            {
                let mut fields = payload.split('\t');
                match (fields.next(), fields.next())
                {
                    (Some(file), Some(target)) =>
                    {
                        let recipe : Vec<RecipeLine> = fields.map(parse_recipe_line).collect();
                        if !self.rule_store.modify_rule(file, target, recipe)
                        {
                            printer.error(&format!("MOD_RULE: no such rule {} : {}", file, target));
                        }
                    },
                    _ => printer.error(&format!("malformed MOD_RULE payload: {}", payload)),
                }
            },

            ControlCommand::ModDeps(payload) =>
            {
                let mut fields = payload.split('\t');
                match (fields.next(), fields.next(), fields.next())
                {
                    (Some(file), Some(target), Some(prereqs)) =>
                    {
                        let prerequisites : Vec<String> = prereqs.split_whitespace().map(|s| s.to_string()).collect();
                        if !self.rule_store.modify_dependencies(file, target, prerequisites)
                        {
                            printer.error(&format!("MOD_DEPS: no such rule {} : {}", file, target));
                        }
                    },
                    _ => printer.error(&format!("malformed MOD_DEPS payload: {}", payload)),
                }
            },

            ControlCommand::DelRule(payload) =>
            {
                let mut fields = payload.split('\t');
                match (fields.next(), fields.next())
                {
                    (Some(file), Some(target)) => { self.rule_store.delete_rule(file, target); },
                    _ => printer.error(&format!("malformed DEL_RULE payload: {}", payload)),
                }
            },

            ControlCommand::Save(path) =>
            {
                let text = self.rule_store.serialize();
                let _ = fs::write(path, text);
            },

            /*  `detach` only concerns the control client's own reader loop
                (stop printing, keep the build running); the server has
                nothing extra to do; the client keeps its queue position
                as an observer. */
            ControlCommand::Detach => {},
        }
    }

    fn handle_worker_line(&mut self, id : WorkerId, line : &str)
    {
        let message = match protocol::parse_worker_message(line)
        {
            Ok(message) => message,
            Err(_) => return,
        };

        if let Some(handle) = self.workers.get_mut(&id)
        {
            handle.last_seen = Instant::now();
        }

        match message
        {
            WorkerMessage::Ready =>
            {
                if let Some(handle) = self.workers.get_mut(&id)
                {
                    handle.assigned_task = None;
                }
            },

            WorkerMessage::Output(text) =>
            {
                for observer in &mut self.observers
                {
                    let _ = writeln!(observer, "{}", ControlResponse::Output(text.clone()));
                }
                self.worker_output.entry(id).or_default().push(text);
            },

            WorkerMessage::TaskEnd { id : task_id, exit } =>
            {
                let output = self.worker_output.remove(&id).unwrap_or_default().join("\n");
                if let Ok(outcome) = self.queue.complete(task_id as usize, exit, output)
                {
                    if let CompletionOutcome::Retry(delay) = outcome
                    {
                        /*  Held back from `next_dispatchable` until the
                            backoff elapses; see `dispatch_ready_jobs`. */
                        self.retry_after.insert(task_id as usize, Instant::now() + delay);
                    }
                }

                if let Some(handle) = self.workers.get_mut(&id)
                {
                    handle.assigned_task = None;
                }

                self.resolve_all_pending_builds();
            },

            WorkerMessage::Idle(_) | WorkerMessage::TaskStart(_) => {},
        }
    }

    /*  Resolves `target` against the current rule store and submits one
        queue job per resolved job, except recipes that classify as pure
        recursive-make (`$(MAKE) -C dir [target]`, possibly joined with
        `&&`): those never run as a shell command at all. Instead each
        clause is forked and expanded in-process (`recursive::fork_and_expand`)
        against the named subdirectory's own rule file, and the flattened,
        root-relative jobs it returns are submitted in the parent's place.

        Jobs submitted together are chained into the cascade-failure graph
        by layer: every job one layer below is registered as a dependency
        of every job at the layer directly above it, so a lower-layer
        failure fails the jobs waiting on it without the scheduler first
        burning a dispatch attempt on them. There is no direct
        prerequisite-to-job edge carried out of `graph.rs` today, so this is
        an approximation by layer rather than by exact edge; see DESIGN.md. */
    fn submit_target<PrinterType : Printer>(&mut self, target : &str, owner : Option<u32>, printer : &mut PrinterType) -> Vec<crate::queue::JobId>
    {
        let engine = GraphEngine::new(&self.rule_store, &self.system, &self.dirty);
        let jobs = match engine.resolve(&self.rule_file, target)
        {
            Ok(jobs) => jobs,
            Err(error) => { printer.error(&format!("{}: {}", target, error)); return Vec::new(); },
        };

        let mut by_layer : HashMap<usize, Vec<crate::queue::JobId>> = HashMap::new();
        let mut submitted : Vec<crate::queue::JobId> = Vec::new();

        for job in &jobs
        {
            let joined = job.recipe.join(" && ");
            let clauses = commands::classify_recursive_make(&joined, &["smak", "make"]);

            if let Some(clauses) = clauses
            {
                for (dir, sub_target) in clauses
                {
                    match recursive::fork_and_expand(&self.system, &job.dir, &dir, &sub_target, &[])
                    {
                        Ok(transfer_jobs) =>
                        {
                            let transfer_path = format!("{}.smak-transfer", self.rule_file);
                            let _ = recursive::write_transfer_file(&transfer_path, &transfer_jobs);

                            for imported in transfer_jobs
                            {
                                let id = self.queue.submit(&imported.dir, &imported.target, imported.layer, imported.recipe, owner);
                                by_layer.entry(imported.layer).or_default().push(id);
                                submitted.push(id);
                            }
                        },
                        Err(error) => printer.error(&format!("recursive-make into {}: {}", dir, error)),
                    };
                }
                continue;
            }

            let id = self.queue.submit(&job.dir, &job.target, job.layer, job.recipe.clone(), owner);
            by_layer.entry(job.layer).or_default().push(id);
            submitted.push(id);
        }

        let mut layers : Vec<usize> = by_layer.keys().copied().collect();
        layers.sort();
        for window in layers.windows(2)
        {
            let (lower, upper) = (window[0], window[1]);
            let lower_ids = by_layer.get(&lower).cloned().unwrap_or_default();
            let upper_ids = by_layer.get(&upper).cloned().unwrap_or_default();
            for &dependency in &lower_ids
            {
                for &dependent in &upper_ids
                {
                    self.queue.add_dependency(dependency, dependent);
                }
            }
        }

        submitted
    }

    /*  Walks every client's pending-build queue and fires `BUILD_SUCCESS`/
        `BUILD_ERROR` for any target whose jobs have all reached a terminal
        state, then `BUILD_END` once a whole request is resolved. Called
        after every `BUILD` submission and after every job completion, since
        a target can already be up to date (no jobs submitted at all) or can
        finish before the next completion event arrives. */
    fn resolve_all_pending_builds(&mut self)
    {
        let waiting_clients : Vec<ClientId> = self.pending_builds.keys().copied().collect();
        for client_id in waiting_clients
        {
            self.resolve_pending_builds(client_id);
        }
    }

    fn resolve_pending_builds(&mut self, client_id : ClientId)
    {
        let Some(client_builds) = self.pending_builds.get_mut(&client_id) else { return };

        loop
        {
            let Some(build) = client_builds.front_mut() else { break };

            while let Some((target, remaining, failed)) = build.targets.front()
            {
                let still_outstanding = remaining.iter().any(|&job_id|
                    matches!(self.queue.get(job_id).map(|record| record.state),
                        Some(crate::queue::JobState::Queued) | Some(crate::queue::JobState::Running)));

                if still_outstanding
                {
                    break;
                }

                let failed = *failed || remaining.iter().any(|&job_id|
                    matches!(self.queue.get(job_id).map(|record| record.state), Some(crate::queue::JobState::Failed)));

                let response = if failed
                {
                    let message = remaining.iter()
                        .filter_map(|&job_id| self.queue.get(job_id))
                        .find(|record| record.state == crate::queue::JobState::Failed)
                        .map(|record| record.output.clone())
                        .unwrap_or_default();
                    ControlResponse::BuildError(target.clone(), message)
                }
                else
                {
                    ControlResponse::BuildSuccess(target.clone())
                };

                if let Some(handle) = self.clients.get_mut(&client_id)
                {
                    let _ = writeln!(handle.stream, "{}", response);
                }

                build.targets.pop_front();
            }

            if !build.targets.is_empty()
            {
                break;
            }

            if let Some(handle) = self.clients.get_mut(&client_id)
            {
                let _ = writeln!(handle.stream, "{}", ControlResponse::BuildEnd);
            }
            client_builds.pop_front();
        }

        if client_builds.is_empty()
        {
            self.pending_builds.remove(&client_id);
        }
    }

    /*  Dispatches every currently-runnable job to an idle worker. A job
        held in `retry_after` (set when its previous attempt came back with
        a transient failure) is skipped until its backoff elapses -- since
        `next_dispatchable` always returns the lowest-layer eligible job,
        one job still cooling down blocks this pass from reaching anything
        behind it at the same layer; it catches up on the next sweep. */
    fn dispatch_ready_jobs<PrinterType : Printer>(&mut self, printer : &mut PrinterType)
    {
        if self.paused
        {
            return;
        }

        while let Some(job_id) = self.queue.next_dispatchable()
        {
            if let Some(&not_before) = self.retry_after.get(&job_id)
            {
                if Instant::now() < not_before
                {
                    break;
                }
                self.retry_after.remove(&job_id);
            }

            let idle_worker = self.workers.iter()
                .find(|(_, handle)| handle.assigned_task.is_none())
                .map(|(id, _)| *id);

            let Some(worker_id) = idle_worker else { break };

            let (dir, commands) = match self.queue.get(job_id)
            {
                Some(record) => (record.dir.clone(), record.command_lines.clone()),
                None => break,
            };

            let task = Task { id : job_id as u64, dir, external_commands : commands, dry_run : self.dry_run, trailing_builtins : Vec::new() };

            if let Some(handle) = self.workers.get_mut(&worker_id)
            {
                if writeln!(handle.stream, "{}", protocol::encode_task(&task)).is_ok()
                {
                    handle.assigned_task = Some(job_id as u64);
                    let _ = self.queue.mark_running(job_id, worker_id as usize);
                }
                else
                {
                    printer.error(&format!("failed to dispatch job {} to worker {}", job_id, worker_id));
                }
            }
        }
    }

    fn sweep_heartbeats<PrinterType : Printer>(&mut self, printer : &mut PrinterType)
    {
        let stale : Vec<WorkerId> = self.workers.iter()
            .filter(|(_, handle)| handle.last_seen.elapsed() > WORKER_HEARTBEAT_TIMEOUT)
            .map(|(id, _)| *id)
            .collect();

        for id in stale
        {
            printer.error(&format!("worker {} timed out, assuming disconnected", id));
            self.worker_output.remove(&id);
            if let Some(handle) = self.workers.remove(&id)
            {
                if let Some(task_id) = handle.assigned_task
                {
                    let _ = self.queue.complete(task_id as usize, 1, "cannot find worker: heartbeat timeout".to_string());
                    self.resolve_all_pending_builds();
                }
            }
        }
    }

    fn begin_shutdown(&mut self)
    {
        self.shutting_down = true;
        for handle in self.workers.values_mut()
        {
            let _ = writeln!(handle.stream, "SHUTDOWN");
        }
        self.queue.cancel();
    }
}

/*  `ADD_RULE`'s payload, tab separated: `file \t targets \t prereqs \t
    recipe-line...`, where `targets` and `prereqs` are themselves
    whitespace-separated lists and every remaining field is one recipe
    line. A target containing `%` makes the whole rule a pattern rule;
    otherwise it's fixed. There is no way to mark a rule pseudo through
    this command -- `.PHONY` additions go through a plain rule-file edit. */
fn parse_add_rule_payload(payload : &str) -> Option<Rule>
{
    let mut fields = payload.split('\t');
    let file = fields.next()?.to_string();
    let targets : Vec<String> = fields.next()?.split_whitespace().map(|s| s.to_string()).collect();
    if targets.is_empty()
    {
        return None;
    }
    let prerequisites : Vec<String> = fields.next().unwrap_or("").split_whitespace().map(|s| s.to_string()).collect();
    let recipe : Vec<RecipeLine> = fields.map(parse_recipe_line).collect();
    let kind = if targets.iter().any(|target| target.contains('%')) { RuleKind::Pattern } else { RuleKind::Fixed };

    Some(Rule { kind, targets, prerequisites, recipe, file, line : 0 })
}

/*  Mirrors `rulefile::parse`'s `@`/`-` recipe-line prefix handling so rules
    added interactively behave the same as ones loaded from a file. */
fn parse_recipe_line(text : &str) -> RecipeLine
{
    let mut body = text.to_string();
    let silent = body.starts_with('@');
    if silent { body.remove(0); }
    let ignore_errors = body.starts_with('-');
    if ignore_errors { body.remove(0); }
    RecipeLine { text : body, silent, ignore_errors }
}

/*  Sends the job server process's own environment to a newly connected
    worker as `ENV name=value` lines terminated by `ENV_END`, matching
    `worker::consume_env_snapshot`'s expectations exactly. */
fn send_env_snapshot(stream : &mut TcpStream)
{
    for (name, value) in std::env::vars()
    {
        let _ = writeln!(stream, "ENV {}={}", name, value);
    }
    let _ = writeln!(stream, "ENV_END");
}

/*  Reads the first line off a freshly accepted master-port connection and
    routes it to the worker or client registry accordingly, then keeps
    reading lines for the remaining lifetime of the connection. */
fn handle_master_connection(
    stream : TcpStream,
    events_tx : Sender<ServerEvent>,
    next_worker_id : Arc<AtomicU64>,
    next_client_id : Arc<AtomicU64>,
)
{
    let read_stream = match stream.try_clone() { Ok(s) => s, Err(_) => return };
    let mut reader = BufReader::new(read_stream);

    let mut first_line = String::new();
    match reader.read_line(&mut first_line)
    {
        Ok(0) | Err(_) => return,
        Ok(_) => {},
    }
    let first_line = first_line.trim_end().to_string();

    if first_line == "READY"
    {
        let id = next_worker_id.fetch_add(1, Ordering::SeqCst);
        let _ = events_tx.send(ServerEvent::WorkerConnected(id, stream));
        for line in reader.lines().flatten()
        {
            if events_tx.send(ServerEvent::WorkerLine(id, line)).is_err()
            {
                return;
            }
        }
        let _ = events_tx.send(ServerEvent::WorkerDisconnected(id));
    }
    else
    {
        let id = next_client_id.fetch_add(1, Ordering::SeqCst);
        let _ = events_tx.send(ServerEvent::ClientConnected(id, stream));
        if !first_line.is_empty() && events_tx.send(ServerEvent::ClientLine(id, first_line)).is_err()
        {
            return;
        }
        for line in reader.lines().flatten()
        {
            if events_tx.send(ServerEvent::ClientLine(id, line)).is_err()
            {
                return;
            }
        }
        let _ = events_tx.send(ServerEvent::ClientDisconnected(id));
    }
}
