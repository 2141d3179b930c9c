//! Tree-walking execution engine.
//!
//! Each node kind has a dedicated evaluation rule. One execution is a tree
//! of logically concurrent tasks: Parallel / Barrier / Race / Broadcast
//! children are spawned in declared order onto the tokio runtime, with real
//! work gated by a bounded semaphore so the pool width limits concurrent
//! step invocations without deadlocking nested combinators.
//!
//! Cancellation is cooperative. Race losers and timed-out steps get their
//! child token cancelled; the engine observes tokens at every suspension
//! point (permit wait, handler invocation, backoff sleep, event receive),
//! so cancelled subtrees settle promptly even when a handler ignores its
//! token. Detached subtrees run on a fresh token and are never cancelled by
//! their parent.

use crate::context::ExecutionContext;
use crate::error::{ExecutionFailure, FlowError, Result};
use crate::events::EventBus;
use crate::handler::{HandlerRegistry, StepInput};
use crate::policy::{Admission, PolicyKey, PolicyStore};
use crate::trace::{ExecutionTrace, TraceEntry, TraceSink};
use crate::types::{StepResult, Value};
use flowscript_ast::Quantifier;
use flowscript_resolve::{NodeId, ResolvedKind, ResolvedProgram};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Interprets a resolved program against a host handler registry.
///
/// The engine itself is stateless across runs; everything mutable lives in
/// the per-run [`ExecutionContext`] and the shared policy store it carries.
pub struct Engine {
    program: Arc<ResolvedProgram>,
    registry: Arc<HandlerRegistry>,
}

impl Engine {
    pub fn new(program: Arc<ResolvedProgram>, registry: Arc<HandlerRegistry>) -> Self {
        Self { program, registry }
    }

    /// Read-only access to the resolved program, e.g. for visualization
    /// exporters. The engine never mutates it.
    pub fn program(&self) -> &Arc<ResolvedProgram> {
        &self.program
    }

    /// Execute the named entry flow to completion.
    ///
    /// On an uncaught error the partial trace is attached to the failure.
    #[instrument(skip(self, ctx), fields(flow = %entry))]
    pub async fn execute(
        &self,
        entry: &str,
        ctx: ExecutionContext,
    ) -> std::result::Result<ExecutionTrace, ExecutionFailure> {
        let Some(entry_id) = self.program.entry(entry) else {
            return Err(ExecutionFailure {
                error: FlowError::UnknownFlow(entry.to_string()),
                trace: ExecutionTrace::default(),
            });
        };

        let run = Arc::new(Run {
            program: self.program.clone(),
            registry: self.registry.clone(),
            policy: ctx.policy.clone(),
            events: ctx.events.clone(),
            trace: TraceSink::default(),
            semaphore: Arc::new(Semaphore::new(ctx.workers.max(1))),
            started: Instant::now(),
        });

        let root_cancel = ctx.cancel.clone();
        let watchdog = ctx.deadline.map(|deadline| {
            let token = root_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(?deadline, "run deadline reached; cancelling");
                token.cancel();
            })
        });

        let scope = Scope {
            bindings: Arc::new(ctx.bindings),
            prior: None,
            cancel: root_cancel,
        };

        info!("execution started");
        let result = eval(run.clone(), entry_id, scope).await;
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        let trace = run.trace.snapshot();
        match result {
            Ok(_) => {
                info!(steps = trace.len(), "execution complete");
                Ok(trace)
            }
            Err(err) => {
                error!(error = %err, "execution aborted");
                Err(ExecutionFailure { error: err, trace })
            }
        }
    }
}

/// Shared state of one execution.
struct Run {
    program: Arc<ResolvedProgram>,
    registry: Arc<HandlerRegistry>,
    policy: Arc<PolicyStore>,
    events: EventBus,
    trace: TraceSink,
    semaphore: Arc<Semaphore>,
    started: Instant,
}

impl Run {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn record(&self, id: NodeId, result: StepResult) {
        let node = self.program.node(id);
        self.trace.record(TraceEntry {
            node: id,
            flow: node.flow.clone(),
            label: self.program.display_name(id).to_string(),
            result,
        });
    }

    fn policy_key(&self, id: NodeId) -> PolicyKey {
        PolicyKey {
            flow: self.program.node(id).flow.clone(),
            node: id,
        }
    }
}

/// Per-branch evaluation scope. Cloning is cheap; bindings are layered
/// copy-on-write.
#[derive(Clone)]
struct Scope {
    bindings: Arc<HashMap<String, Value>>,
    /// Success value of the previous step in the enclosing sequence.
    prior: Option<Value>,
    cancel: CancellationToken,
}

impl Scope {
    fn with_cancel(&self, cancel: CancellationToken) -> Scope {
        Scope {
            bindings: self.bindings.clone(),
            prior: self.prior.clone(),
            cancel,
        }
    }

    fn bind(&mut self, name: &str, value: Value) {
        let mut bindings = (*self.bindings).clone();
        bindings.insert(name.to_string(), value);
        self.bindings = Arc::new(bindings);
    }
}

fn step_input(step: &str, scope: &Scope) -> StepInput {
    StepInput {
        step: step.to_string(),
        bindings: scope.bindings.clone(),
        prior: scope.prior.clone(),
        cancel: scope.cancel.clone(),
    }
}

/// Unwrap a join result, forwarding panics from child tasks.
fn join_result(joined: std::result::Result<Result<Value>, tokio::task::JoinError>) -> Result<Value> {
    match joined {
        Ok(result) => result,
        Err(join_error) => {
            if join_error.is_panic() {
                std::panic::resume_unwind(join_error.into_panic());
            }
            Err(FlowError::Cancelled)
        }
    }
}

/// Evaluate one node. Boxed for recursion; owned arguments so children can
/// be spawned as `'static` tasks.
fn eval(run: Arc<Run>, id: NodeId, scope: Scope) -> BoxFuture<'static, Result<Value>> {
    async move {
        let kind = run.program.node(id).kind.clone();
        trace!(node = %id, kind = kind.kind_name(), "eval");
        match kind {
            ResolvedKind::Atomic { step } => eval_atomic(&run, id, &step, &scope).await,
            ResolvedKind::Sequence { children } => eval_sequence(&run, children, scope).await,
            ResolvedKind::Saga { children } => eval_saga(&run, id, children, scope).await,
            ResolvedKind::Parallel { children } => {
                for child in children {
                    spawn_forked(&run, child, scope.clone());
                }
                Ok(Value::Null)
            }
            ResolvedKind::Barrier { children } => eval_barrier(&run, children, scope).await,
            ResolvedKind::Race { children } => eval_race(&run, id, children, scope).await,
            ResolvedKind::Broadcast { children } => {
                eval_broadcast(&run, id, children, scope).await
            }
            ResolvedKind::Branch { .. } => {
                let discriminant = scope.prior.clone().unwrap_or(Value::Null);
                eval_branch(&run, id, BranchInput::Success(discriminant), scope).await
            }
            ResolvedKind::Loop { quantifier, child } => {
                eval_loop(&run, quantifier, child, scope).await
            }
            ResolvedKind::Guard { predicate, child } => {
                let Some(pred) = run.registry.predicate(&predicate) else {
                    return Err(FlowError::PredicateNotFound(predicate));
                };
                if !pred(&step_input(&predicate, &scope)) {
                    debug!(node = %id, predicate = %predicate, "guard rejected");
                    return Err(FlowError::GuardFailed { predicate });
                }
                eval(run.clone(), child, scope).await
            }
            ResolvedKind::Retry { policy, child } => {
                eval_retry(&run, id, &policy, child, scope).await
            }
            ResolvedKind::Timeout {
                duration,
                fallback,
                child,
            } => eval_timeout(&run, duration, fallback, child, scope).await,
            ResolvedKind::CircuitBreaker { policy, child } => {
                eval_breaker(&run, id, &policy, child, scope).await
            }
            ResolvedKind::Debounce { quiescence, child } => {
                eval_debounce(&run, id, quiescence, child, scope).await
            }
            ResolvedKind::Throttle { interval, child } => {
                eval_throttle(&run, id, interval, child, scope).await
            }
            ResolvedKind::Detach { child } => {
                // Fresh token: parent cancellation never reaches detached work.
                let detached = scope.with_cancel(CancellationToken::new());
                let run2 = run.clone();
                tokio::spawn(async move {
                    if let Err(err) = eval(run2, child, detached).await {
                        warn!(node = %child, error = %err, "detached step failed");
                    }
                });
                Ok(Value::Null)
            }
            ResolvedKind::EventStream { topic, handler } => {
                eval_event_stream(&run, id, &topic, handler, scope).await
            }
            ResolvedKind::Catch {
                mode,
                child,
                handler,
            } => eval_catch(&run, id, mode, child, handler, scope).await,
            ResolvedKind::Label { child, .. } => eval(run.clone(), child, scope).await,
            ResolvedKind::LabelJump { target } => eval(run.clone(), target, scope).await,
            ResolvedKind::FlowCall { flow } => {
                let Some((name, flow_entry)) = run.program.flow_by_index(flow) else {
                    return Err(FlowError::UnknownFlow(format!("[{}]", flow)));
                };
                debug!(subflow = name, "calling subflow");
                eval(run.clone(), flow_entry, scope).await
            }
            ResolvedKind::StateMachine { name, transitions } => {
                eval_machine(&run, id, &name, &transitions, scope).await
            }
        }
    }
    .boxed()
}

/// Spawn a child whose result nobody waits for (bare fork, detach).
fn spawn_forked(run: &Arc<Run>, child: NodeId, scope: Scope) {
    let run = run.clone();
    tokio::spawn(async move {
        if let Err(err) = eval(run, child, scope).await {
            warn!(node = %child, error = %err, "forked child failed");
        }
    });
}

fn spawn_child(run: &Arc<Run>, child: NodeId, scope: Scope) -> JoinHandle<Result<Value>> {
    let run = run.clone();
    tokio::spawn(eval(run, child, scope))
}

/// Invoke a host handler under a worker-pool permit, recording the outcome.
async fn eval_atomic(run: &Arc<Run>, id: NodeId, step: &str, scope: &Scope) -> Result<Value> {
    let permit = tokio::select! {
        _ = scope.cancel.cancelled() => {
            let now = run.elapsed();
            run.record(id, StepResult::cancelled(now, now));
            return Err(FlowError::Cancelled);
        }
        permit = run.semaphore.clone().acquire_owned() => {
            permit.map_err(|_| FlowError::Cancelled)?
        }
    };

    let started = run.elapsed();
    let Some(handler) = run.registry.step(step) else {
        run.record(id, StepResult::error("no handler registered", started, started));
        return Err(FlowError::HandlerNotFound(step.to_string()));
    };

    trace!(step, "invoking handler");
    let outcome = tokio::select! {
        _ = scope.cancel.cancelled() => {
            run.record(id, StepResult::cancelled(started, run.elapsed()));
            return Err(FlowError::Cancelled);
        }
        outcome = handler.invoke(step_input(step, scope)) => outcome,
    };
    drop(permit);

    let ended = run.elapsed();
    match outcome {
        Ok(value) => {
            run.record(id, StepResult::success(value.clone(), started, ended));
            Ok(value)
        }
        Err(err) => {
            run.record(id, StepResult::error(err.message.clone(), started, ended));
            Err(FlowError::Step {
                step: step.to_string(),
                message: err.message,
            })
        }
    }
}

/// Strict left-to-right evaluation. A child's error short-circuits the
/// remaining siblings, except that an immediately following branch receives
/// the error as its discriminant.
async fn eval_sequence(
    run: &Arc<Run>,
    children: Vec<NodeId>,
    mut scope: Scope,
) -> Result<Value> {
    let mut last = Value::Null;
    let mut pending_error: Option<FlowError> = None;

    for child in children {
        let is_branch = matches!(
            run.program.node(child).kind,
            ResolvedKind::Branch { .. }
        );

        let outcome = match pending_error.take() {
            None => eval(run.clone(), child, scope.clone()).await,
            Some(err) if is_branch && !matches!(err, FlowError::Cancelled) => {
                eval_branch(run, child, BranchInput::Failure(err), scope.clone()).await
            }
            Some(err) => return Err(err),
        };

        match outcome {
            Ok(value) => {
                if let Some(name) = run.program.node(child).meta.binding.clone() {
                    scope.bind(&name, value.clone());
                }
                scope.prior = Some(value.clone());
                last = value;
            }
            Err(err) => pending_error = Some(err),
        }
    }

    match pending_error {
        Some(err) => Err(err),
        None => Ok(last),
    }
}

/// Sequential execution with compensation unwinding.
///
/// A child's compensation is pushed only after that child succeeds; on a
/// later failure the stack unwinds LIFO. A compensation that itself fails
/// aborts further unwinding and becomes the terminal saga error.
async fn eval_saga(
    run: &Arc<Run>,
    id: NodeId,
    children: Vec<NodeId>,
    mut scope: Scope,
) -> Result<Value> {
    let mut compensations: Vec<String> = Vec::new();
    let mut last = Value::Null;

    for child in children {
        match eval(run.clone(), child, scope.clone()).await {
            Ok(value) => {
                if let Some(comp) = run.program.node(child).compensation.clone() {
                    compensations.push(comp);
                }
                if let Some(name) = run.program.node(child).meta.binding.clone() {
                    scope.bind(&name, value.clone());
                }
                scope.prior = Some(value.clone());
                last = value;
            }
            Err(err) => {
                warn!(
                    node = %id,
                    error = %err,
                    registered = compensations.len(),
                    "saga failed; unwinding"
                );
                unwind_saga(run, id, &compensations, &scope).await?;
                return Err(err);
            }
        }
    }
    Ok(last)
}

async fn unwind_saga(
    run: &Arc<Run>,
    saga: NodeId,
    compensations: &[String],
    scope: &Scope,
) -> Result<()> {
    for comp in compensations.iter().rev() {
        debug!(compensation = %comp, "compensating");
        if let Err(err) = invoke_compensation(run, saga, comp, scope).await {
            error!(compensation = %comp, error = %err, "compensation failed; aborting unwind");
            return Err(FlowError::Compensation {
                compensation: comp.clone(),
                message: err.to_string(),
            });
        }
    }
    Ok(())
}

/// Run a compensation step by name. Compensations have no node of their
/// own; entries are recorded against the saga node.
async fn invoke_compensation(
    run: &Arc<Run>,
    saga: NodeId,
    step: &str,
    scope: &Scope,
) -> Result<Value> {
    let started = run.elapsed();
    let record = |result: StepResult| {
        let node = run.program.node(saga);
        run.trace.record(TraceEntry {
            node: saga,
            flow: node.flow.clone(),
            label: step.to_string(),
            result,
        });
    };

    let Some(handler) = run.registry.step(step) else {
        record(StepResult::error("no handler registered", started, started));
        return Err(FlowError::HandlerNotFound(step.to_string()));
    };
    match handler.invoke(step_input(step, scope)).await {
        Ok(value) => {
            record(StepResult::success(value.clone(), started, run.elapsed()));
            Ok(value)
        }
        Err(err) => {
            record(StepResult::error(err.message.clone(), started, run.elapsed()));
            Err(FlowError::Step {
                step: step.to_string(),
                message: err.message,
            })
        }
    }
}

/// Start all children, let every one run to completion, then report the
/// first error in start order. Siblings of a failing child are not
/// cancelled: orphaned side effects are worse than wasted work.
async fn eval_barrier(run: &Arc<Run>, children: Vec<NodeId>, scope: Scope) -> Result<Value> {
    let handles: Vec<_> = children
        .iter()
        .map(|child| spawn_child(run, *child, scope.clone()))
        .collect();

    let mut values = Vec::new();
    let mut first_error: Option<FlowError> = None;
    for handle in handles {
        match join_result(handle.await) {
            Ok(value) => values.push(value),
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(Value::Array(values)),
    }
}

/// First settled arm wins, success or error. Losers are cancelled and
/// drained so their cancellation is observed before the race returns; their
/// results are discarded.
async fn eval_race(
    run: &Arc<Run>,
    id: NodeId,
    children: Vec<NodeId>,
    scope: Scope,
) -> Result<Value> {
    let (tx, mut rx) = mpsc::channel(children.len().max(1));
    let mut tokens = Vec::with_capacity(children.len());

    for (index, child) in children.iter().enumerate() {
        let token = scope.cancel.child_token();
        tokens.push(token.clone());
        let child_scope = scope.with_cancel(token);
        let tx = tx.clone();
        let run2 = run.clone();
        let child = *child;
        tokio::spawn(async move {
            let result = eval(run2, child, child_scope).await;
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let Some((winner, result)) = rx.recv().await else {
        return Err(FlowError::Cancelled);
    };
    debug!(node = %id, winner, "race settled");

    for (index, token) in tokens.iter().enumerate() {
        if index != winner {
            token.cancel();
        }
    }
    // Drain losers; they settle promptly because the engine observes
    // cancellation at every suspension point.
    while rx.recv().await.is_some() {}

    result
}

/// All arms race for the first *success*; the node fails only when every
/// arm has failed, with the first error in start order.
async fn eval_broadcast(
    run: &Arc<Run>,
    id: NodeId,
    children: Vec<NodeId>,
    scope: Scope,
) -> Result<Value> {
    let total = children.len();
    let (tx, mut rx) = mpsc::channel(total.max(1));
    let mut tokens = Vec::with_capacity(total);

    for (index, child) in children.iter().enumerate() {
        let token = scope.cancel.child_token();
        tokens.push(token.clone());
        let child_scope = scope.with_cancel(token);
        let tx = tx.clone();
        let run2 = run.clone();
        let child = *child;
        tokio::spawn(async move {
            let result = eval(run2, child, child_scope).await;
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let mut errors: Vec<(usize, FlowError)> = Vec::new();
    while let Some((index, result)) = rx.recv().await {
        match result {
            Ok(value) => {
                debug!(node = %id, winner = index, "broadcast satisfied");
                for token in &tokens {
                    token.cancel();
                }
                while rx.recv().await.is_some() {}
                return Ok(value);
            }
            Err(err) => errors.push((index, err)),
        }
    }

    errors.sort_by_key(|(index, _)| *index);
    match errors.into_iter().next() {
        Some((_, err)) => Err(err),
        None => Err(FlowError::Cancelled),
    }
}

/// Discriminant fed into a branch node.
enum BranchInput {
    Success(Value),
    Failure(FlowError),
}

/// Execute exactly one matching case, or the default.
///
/// On success the discriminant is the value itself when it is a string
/// (arbitrary labels), falling back to `ok`; on failure it is `err`.
async fn eval_branch(
    run: &Arc<Run>,
    id: NodeId,
    input: BranchInput,
    scope: Scope,
) -> Result<Value> {
    let ResolvedKind::Branch { cases, default } = run.program.node(id).kind.clone() else {
        return Err(FlowError::UnknownFlow(format!("branch {}", id)));
    };

    let (candidates, prior): (Vec<String>, Value) = match input {
        BranchInput::Success(value) => {
            let mut candidates = Vec::new();
            if let Value::String(label) = &value {
                candidates.push(label.clone());
            }
            candidates.push("ok".to_string());
            (candidates, value)
        }
        BranchInput::Failure(err) => (vec!["err".to_string()], Value::String(err.to_string())),
    };

    let selected = candidates.iter().find_map(|candidate| {
        cases
            .iter()
            .find(|(label, _)| label == candidate)
            .map(|(_, child)| *child)
    });

    let target = match selected.or(default) {
        Some(target) => target,
        None => {
            let discriminant = candidates
                .first()
                .cloned()
                .unwrap_or_else(|| "ok".to_string());
            debug!(node = %id, discriminant = %discriminant, "unmatched branch");
            return Err(FlowError::UnmatchedBranch { discriminant });
        }
    };

    let mut branch_scope = scope;
    branch_scope.prior = Some(prior);
    eval(run.clone(), target, branch_scope).await
}

/// Repetition. `*` and `?` absorb the terminating failure, `+` requires the
/// first iteration to succeed, `{m,n}` requires at least `m` successes.
async fn eval_loop(
    run: &Arc<Run>,
    quantifier: Quantifier,
    child: NodeId,
    scope: Scope,
) -> Result<Value> {
    match quantifier {
        Quantifier::Optional => match eval(run.clone(), child, scope).await {
            Ok(value) => Ok(value),
            Err(FlowError::Cancelled) => Err(FlowError::Cancelled),
            Err(err) => {
                debug!(node = %child, error = %err, "optional step failed; absorbed");
                Ok(Value::Null)
            }
        },
        Quantifier::ZeroOrMore => {
            let mut iterations: u64 = 0;
            loop {
                match eval(run.clone(), child, scope.clone()).await {
                    Ok(_) => iterations += 1,
                    Err(FlowError::Cancelled) => return Err(FlowError::Cancelled),
                    Err(err) => {
                        debug!(node = %child, iterations, error = %err, "loop terminated");
                        return Ok(Value::from(iterations));
                    }
                }
            }
        }
        Quantifier::OneOrMore => {
            eval(run.clone(), child, scope.clone()).await?;
            let mut iterations: u64 = 1;
            loop {
                match eval(run.clone(), child, scope.clone()).await {
                    Ok(_) => iterations += 1,
                    Err(FlowError::Cancelled) => return Err(FlowError::Cancelled),
                    Err(err) => {
                        debug!(node = %child, iterations, error = %err, "loop terminated");
                        return Ok(Value::from(iterations));
                    }
                }
            }
        }
        Quantifier::Range { min, max } => {
            let mut successes: u64 = 0;
            let mut terminal: Option<FlowError> = None;
            for _ in 0..max {
                match eval(run.clone(), child, scope.clone()).await {
                    Ok(_) => successes += 1,
                    Err(FlowError::Cancelled) => return Err(FlowError::Cancelled),
                    Err(err) => {
                        terminal = Some(err);
                        break;
                    }
                }
            }
            if successes < u64::from(min) {
                return Err(terminal.unwrap_or(FlowError::Cancelled));
            }
            Ok(Value::from(successes))
        }
    }
}

/// Re-invoke the child on error, sleeping the policy's backoff between
/// attempts. Cancellation interrupts both the child and the backoff sleep
/// and is never retried.
async fn eval_retry(
    run: &Arc<Run>,
    id: NodeId,
    policy: &flowscript_ast::RetryPolicy,
    child: NodeId,
    scope: Scope,
) -> Result<Value> {
    let mut attempt: u32 = 1;
    loop {
        match eval(run.clone(), child, scope.clone()).await {
            Ok(value) => return Ok(value),
            Err(FlowError::Cancelled) => return Err(FlowError::Cancelled),
            Err(err) => {
                if attempt >= policy.max_attempts {
                    warn!(node = %id, attempts = attempt, "retry exhausted");
                    return Err(FlowError::RetryExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                attempt += 1;
                let delay = policy.delay_before(attempt);
                trace!(node = %id, attempt, ?delay, "backing off");
                if !delay.is_zero() {
                    tokio::select! {
                        _ = scope.cancel.cancelled() => return Err(FlowError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Race the child against a deadline. On expiry the child's token is
/// cancelled, the child is awaited so the cancellation is observed, and the
/// fallback (if any) supplies the node's outcome.
async fn eval_timeout(
    run: &Arc<Run>,
    duration: Duration,
    fallback: Option<NodeId>,
    child: NodeId,
    scope: Scope,
) -> Result<Value> {
    let token = scope.cancel.child_token();
    let child_scope = scope.with_cancel(token.clone());
    let mut handle = spawn_child(run, child, child_scope);

    tokio::select! {
        joined = &mut handle => join_result(joined),
        _ = tokio::time::sleep(duration) => {
            token.cancel();
            let _ = handle.await;
            let step = run.program.display_name(child).to_string();
            warn!(step = %step, ?duration, "timed out");
            match fallback {
                Some(fb) => {
                    debug!("running timeout fallback");
                    eval(run.clone(), fb, scope).await
                }
                None => Err(FlowError::Timeout { step, after: duration }),
            }
        }
    }
}

/// Stateful failure cutoff, keyed per `(flow, node)` in the policy store.
async fn eval_breaker(
    run: &Arc<Run>,
    id: NodeId,
    policy: &flowscript_ast::CircuitPolicy,
    child: NodeId,
    scope: Scope,
) -> Result<Value> {
    let key = run.policy_key(id);
    let entry = run.policy.circuit(&key);

    let admission = entry.lock().admit(policy, Instant::now());
    let trial = match admission {
        Admission::Reject => {
            let step = run.program.display_name(child).to_string();
            debug!(node = %id, step = %step, "circuit open; failing fast");
            return Err(FlowError::CircuitOpen { step });
        }
        Admission::Execute { trial } => trial,
    };

    let result = eval(run.clone(), child, scope).await;
    let mut state = entry.lock();
    match &result {
        Ok(_) => state.record_success(),
        Err(FlowError::Cancelled) => {
            if trial {
                state.abort_trial();
            }
        }
        Err(_) => state.record_failure(policy, Instant::now(), trial),
    }
    result
}

/// Fire only after a quiescence window with no newer trigger; superseded
/// triggers complete as cancelled trace entries, not errors.
async fn eval_debounce(
    run: &Arc<Run>,
    id: NodeId,
    quiescence: Duration,
    child: NodeId,
    scope: Scope,
) -> Result<Value> {
    let key = run.policy_key(id);
    let entry = run.policy.debounce(&key);
    let started = run.elapsed();

    let generation = {
        let mut entry = entry.lock();
        entry.generation += 1;
        entry.generation
    };

    tokio::select! {
        _ = scope.cancel.cancelled() => return Err(FlowError::Cancelled),
        _ = tokio::time::sleep(quiescence) => {}
    }

    if entry.lock().generation != generation {
        debug!(node = %id, "debounced trigger superseded");
        run.record(child, StepResult::cancelled(started, run.elapsed()));
        return Ok(Value::Null);
    }
    eval(run.clone(), child, scope).await
}

/// Fire at most once per interval per key; triggers inside the interval are
/// dropped as cancelled trace entries.
async fn eval_throttle(
    run: &Arc<Run>,
    id: NodeId,
    interval: Duration,
    child: NodeId,
    scope: Scope,
) -> Result<Value> {
    let key = run.policy_key(id);
    let entry = run.policy.throttle(&key);
    let now = Instant::now();

    let admitted = {
        let mut entry = entry.lock();
        match entry.last_fire_at {
            Some(last) if now.duration_since(last) < interval => false,
            _ => {
                entry.last_fire_at = Some(now);
                true
            }
        }
    };

    if !admitted {
        debug!(node = %id, "throttled trigger dropped");
        let at = run.elapsed();
        run.record(child, StepResult::cancelled(at, at));
        return Ok(Value::Null);
    }
    eval(run.clone(), child, scope).await
}

/// Run the handler once per event on the topic, in arrival order. A handler
/// error aborts the stream; closing the topic completes it with the count
/// of handled events.
async fn eval_event_stream(
    run: &Arc<Run>,
    id: NodeId,
    topic: &str,
    handler: NodeId,
    scope: Scope,
) -> Result<Value> {
    let mut rx = run.events.subscribe(topic);
    debug!(node = %id, topic, "subscribed");
    let mut handled: u64 = 0;

    loop {
        let received = tokio::select! {
            _ = scope.cancel.cancelled() => return Err(FlowError::Cancelled),
            received = rx.recv() => received,
        };
        match received {
            Ok(value) => {
                let mut child_scope = scope.clone();
                child_scope.bind("event", value.clone());
                child_scope.prior = Some(value);
                eval(run.clone(), handler, child_scope).await?;
                handled += 1;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(node = %id, topic, skipped, "event stream lagged; events dropped");
            }
        }
    }

    debug!(node = %id, topic, handled, "event stream closed");
    Ok(Value::from(handled))
}

/// Error combinators.
///
/// Cancellation is not an error for catch purposes: it always propagates.
async fn eval_catch(
    run: &Arc<Run>,
    id: NodeId,
    mode: flowscript_ast::CatchMode,
    child: NodeId,
    handler: NodeId,
    scope: Scope,
) -> Result<Value> {
    use flowscript_ast::CatchMode;

    let result = eval(run.clone(), child, scope.clone()).await;
    match mode {
        CatchMode::Catch => match result {
            Ok(value) => Ok(value),
            Err(FlowError::Cancelled) => Err(FlowError::Cancelled),
            Err(err) => {
                debug!(node = %id, error = %err, "caught; running handler");
                eval(run.clone(), handler, error_scope(scope, &err)).await
            }
        },
        CatchMode::Finally => {
            if let Err(handler_err) = eval(run.clone(), handler, scope).await {
                warn!(node = %id, error = %handler_err, "finally handler failed");
            }
            result
        }
        CatchMode::Suppress => match result {
            Ok(value) => Ok(value),
            Err(FlowError::Cancelled) => Err(FlowError::Cancelled),
            Err(err) => {
                debug!(node = %id, error = %err, "suppressed; running handler");
                match eval(run.clone(), handler, error_scope(scope, &err)).await {
                    Ok(value) => Ok(value),
                    Err(handler_err) => {
                        warn!(node = %id, error = %handler_err, "suppress handler failed");
                        Ok(Value::Null)
                    }
                }
            }
        },
    }
}

fn error_scope(mut scope: Scope, err: &FlowError) -> Scope {
    scope.prior = Some(Value::String(err.to_string()));
    scope
}

/// Event-driven transition table. Unmatched `(state, event)` pairs are a
/// silent no-op; closing the topic completes the node with the final state.
async fn eval_machine(
    run: &Arc<Run>,
    id: NodeId,
    name: &str,
    transitions: &[flowscript_ast::Transition],
    scope: Scope,
) -> Result<Value> {
    let mut rx = run.events.subscribe(name);
    let mut state = transitions
        .first()
        .map(|t| t.from.clone())
        .unwrap_or_default();
    info!(machine = name, initial = %state, "state machine started");

    loop {
        let received = tokio::select! {
            _ = scope.cancel.cancelled() => return Err(FlowError::Cancelled),
            received = rx.recv() => received,
        };
        match received {
            Ok(value) => {
                let Some(event) = value.as_str() else {
                    trace!(machine = name, "ignoring non-string event");
                    continue;
                };
                match transitions
                    .iter()
                    .find(|t| t.from == state && t.event == event)
                {
                    Some(transition) => {
                        debug!(
                            machine = name,
                            from = %state,
                            event,
                            to = %transition.to,
                            "transition"
                        );
                        state = transition.to.clone();
                    }
                    None => {
                        trace!(machine = name, state = %state, event, "no transition; ignored");
                    }
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(machine = name, skipped, "event backlog overflow; events dropped");
            }
        }
    }

    info!(machine = name, terminal = %state, "state machine closed");
    run.record(
        id,
        StepResult::success(Value::String(state.clone()), run.elapsed(), run.elapsed()),
    );
    Ok(Value::String(state))
}
