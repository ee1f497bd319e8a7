//! Tool dispatcher
//!
//! Validates and executes action requests against their tool descriptors and
//! normalizes every outcome into exactly one [`ToolResult`]:
//!
//! 1. unknown tool name: `UnknownTool`, with close matches and the tool list
//! 2. schema violation: `InvalidArguments`, before any side effect
//! 3. safety guard: `Deny` short-circuits to a `denied` result;
//!    `RequireConfirmation` waits on the confirmer for this call only
//! 4. execution under the per-call timeout and the turn's cancellation token,
//!    holding a slot of the batch's pool only while the tool runs
//!
//! Skills are expanded here into their declared steps, each of which goes
//! through steps 2 to 4 like a top-level call.
//!
//! A batch runs as independent chains on a bounded pool. Calls of tools not
//! marked concurrent share one chain, and calls whose declared write targets
//! overlap are chained together, so they run in issue order. Results always
//! come back in issue order.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_config::DispatchConfig;
use warden_provider::Tool;
use warden_session::{ActionRequest, ErrorKind, ToolResult};

use crate::confirm::Confirmer;
use crate::guard::SafetyGuard;
use crate::tools::path_utils::{paths_overlap, resolve_in_root, resolve_lexical};
use crate::tools::skills::expand_step_args;
use crate::tools::{schema, Tier, ToolDescriptor, ToolRegistry, ToolTrait};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub max_concurrency: usize,
    pub call_timeout: Duration,
    /// Bound on one whole batch; outstanding calls are cancelled when it expires
    pub turn_timeout: Duration,
}

impl From<&DispatchConfig> for DispatchLimits {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
        }
    }
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

pub struct Dispatcher {
    registry: ToolRegistry,
    guard: SafetyGuard,
    confirmer: Arc<dyn Confirmer>,
    limits: DispatchLimits,
}

impl Dispatcher {
    pub fn new(
        registry: ToolRegistry,
        guard: SafetyGuard,
        confirmer: Arc<dyn Confirmer>,
        limits: DispatchLimits,
    ) -> Self {
        Self {
            registry,
            guard,
            confirmer,
            limits,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn guard(&self) -> &SafetyGuard {
        &self.guard
    }

    pub fn limits(&self) -> &DispatchLimits {
        &self.limits
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.registry.definitions()
    }

    /// Execute one request. Never fails: every outcome is a tool result.
    pub async fn dispatch(&self, request: &ActionRequest, cancel: &CancellationToken) -> ToolResult {
        self.dispatch_pooled(request, cancel, None).await
    }

    async fn dispatch_pooled(
        &self,
        request: &ActionRequest,
        cancel: &CancellationToken,
        pool: Option<&Semaphore>,
    ) -> ToolResult {
        let started = Instant::now();
        let (tier, result) = match self.registry.get(&request.tool_name) {
            None => (None, self.unknown_tool(request)),
            Some(tool) => {
                let descriptor = tool.descriptor();
                let result = if cancel.is_cancelled() {
                    cancelled(request)
                } else {
                    match schema::validate(&descriptor.fields, &request.arguments) {
                        Err(reason) => ToolResult::error(request, ErrorKind::InvalidArguments, reason),
                        Ok(()) if descriptor.tier == Tier::Skill => {
                            self.run_skill(request, descriptor, cancel, pool).await
                        }
                        Ok(()) => self.execute_checked(tool, request, cancel, pool).await,
                    }
                };
                (Some(descriptor.tier), result)
            }
        };

        info!(
            tool = %request.tool_name,
            call_id = %request.call_id,
            tier = tier.map(|t| t.as_str()).unwrap_or("unknown"),
            outcome = result.outcome.as_str(),
            error_kind = ?result.error_kind,
            duration_ms = started.elapsed().as_millis() as u64,
            "tool call"
        );
        result
    }

    fn unknown_tool(&self, request: &ActionRequest) -> ToolResult {
        let mut detail = format!("unknown tool: {}", request.tool_name);
        let suggestions = self.registry.suggestions(&request.tool_name);
        if !suggestions.is_empty() {
            detail.push_str(&format!(". Did you mean: {}?", suggestions.join(", ")));
        }
        detail.push_str(&format!("\nAvailable tools: {}", self.registry.names().join(", ")));
        ToolResult::error(request, ErrorKind::UnknownTool, detail)
    }

    /// Guard, confirm if asked, then invoke under timeout and cancellation.
    /// A pool permit is taken only once the call is cleared to run.
    async fn execute_checked(
        &self,
        tool: &dyn ToolTrait,
        request: &ActionRequest,
        cancel: &CancellationToken,
        pool: Option<&Semaphore>,
    ) -> ToolResult {
        let verdict = self.guard.evaluate(tool.descriptor(), &request.arguments);
        if let Some(reason) = verdict.reason() {
            if verdict.is_deny() {
                return ToolResult::denied(request, reason);
            }
            info!(
                tool = %request.tool_name,
                call_id = %request.call_id,
                reason,
                "awaiting confirmation"
            );
            let approved = tokio::select! {
                approved = self.confirmer.confirm(request, reason) => approved,
                _ = cancel.cancelled() => return cancelled(request),
            };
            if !approved {
                return ToolResult::denied(request, format!("declined by user: {}", reason));
            }
        }

        let _permit = match pool {
            Some(pool) => {
                let acquired = tokio::select! {
                    acquired = pool.acquire() => acquired,
                    _ = cancel.cancelled() => return cancelled(request),
                };
                match acquired {
                    Ok(permit) => Some(permit),
                    Err(_) => return cancelled(request),
                }
            }
            None => None,
        };
        if cancel.is_cancelled() {
            return cancelled(request);
        }

        let invocation = tokio::time::timeout(
            self.limits.call_timeout,
            tool.invoke(request.arguments.clone()),
        );
        let outcome = tokio::select! {
            outcome = invocation => outcome,
            _ = cancel.cancelled() => return cancelled(request),
        };

        match outcome {
            Ok(Ok(payload)) => ToolResult::success(request, payload),
            Ok(Err(e)) if e.kind() == ErrorKind::Denied => ToolResult::denied(request, e.to_string()),
            Ok(Err(e)) => ToolResult::error(request, e.kind(), e.to_string()),
            Err(_) => ToolResult::error(
                request,
                ErrorKind::Timeout,
                format!(
                    "{} timed out after {}s",
                    request.tool_name,
                    self.limits.call_timeout.as_secs_f64()
                ),
            ),
        }
    }

    async fn run_skill(
        &self,
        request: &ActionRequest,
        descriptor: &ToolDescriptor,
        cancel: &CancellationToken,
        pool: Option<&Semaphore>,
    ) -> ToolResult {
        let params = skill_params(descriptor, &request.arguments);
        let mut outputs: Vec<String> = Vec::new();
        let mut report: Vec<String> = Vec::new();

        for (i, step) in descriptor.steps.iter().enumerate() {
            let step_request = ActionRequest::new(
                format!("{}.{}", request.call_id, i),
                &step.tool,
                expand_step_args(&step.args, &params, &outputs),
            );
            let result = match self.registry.get(&step.tool) {
                None => self.unknown_tool(&step_request),
                Some(tool) if tool.descriptor().tier == Tier::Skill => ToolResult::error(
                    &step_request,
                    ErrorKind::InvalidArguments,
                    format!("step {} names skill {}; skills cannot nest", i, step.tool),
                ),
                Some(tool) => match schema::validate(&tool.descriptor().fields, &step_request.arguments) {
                    Err(reason) => {
                        ToolResult::error(&step_request, ErrorKind::InvalidArguments, reason)
                    }
                    Ok(()) => self.execute_checked(tool, &step_request, cancel, pool).await,
                },
            };
            debug!(
                "Skill {} step {} ({}): {}",
                descriptor.name,
                i,
                step.tool,
                result.outcome.as_str()
            );

            if !result.is_success() {
                let mut payload = format!(
                    "step {} of {} ({}) failed: {}",
                    i + 1,
                    descriptor.steps.len(),
                    step.tool,
                    result.payload
                );
                if !report.is_empty() {
                    payload.push_str("\n\ncompleted steps:\n");
                    payload.push_str(&report.join("\n"));
                }
                return ToolResult {
                    call_id: request.call_id.clone(),
                    tool_name: request.tool_name.clone(),
                    outcome: result.outcome,
                    payload,
                    error_kind: result.error_kind,
                };
            }
            report.push(format!("[{}: {}]\n{}", i + 1, step.tool, result.payload));
            outputs.push(result.payload);
        }
        ToolResult::success(request, report.join("\n"))
    }

    /// Execute a batch, concurrently where allowed, returning results in
    /// issue order. Calls still running when the turn timeout fires or
    /// `cancel` is triggered come back `Cancelled`.
    pub async fn dispatch_batch(
        self: &Arc<Self>,
        requests: Vec<ActionRequest>,
        cancel: CancellationToken,
    ) -> Vec<ToolResult> {
        if requests.is_empty() {
            return Vec::new();
        }
        let turn_cancel = cancel.child_token();
        let chains = self.plan_batch(&requests);
        debug!("Dispatching {} calls in {} chains", requests.len(), chains.len());

        let semaphore = Arc::new(Semaphore::new(self.limits.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for chain in chains {
            let dispatcher = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let token = turn_cancel.clone();
            let chain: Vec<(usize, ActionRequest)> =
                chain.into_iter().map(|i| (i, requests[i].clone())).collect();

            tasks.spawn(async move {
                let mut results = Vec::with_capacity(chain.len());
                for (index, request) in chain {
                    let result = dispatcher
                        .dispatch_pooled(&request, &token, Some(&semaphore))
                        .await;
                    results.push((index, result));
                }
                results
            });
        }

        let mut slots: Vec<Option<ToolResult>> = vec![None; requests.len()];
        let deadline = tokio::time::sleep(self.limits.turn_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(results)) => {
                        for (index, result) in results {
                            slots[index] = Some(result);
                        }
                    }
                    Some(Err(e)) => warn!("Tool task failed: {}", e),
                    None => break,
                },
                _ = &mut deadline, if !turn_cancel.is_cancelled() => {
                    warn!(
                        "Turn timeout of {}s reached, cancelling outstanding calls",
                        self.limits.turn_timeout.as_secs()
                    );
                    turn_cancel.cancel();
                }
            }
        }

        slots
            .into_iter()
            .zip(requests.iter())
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    ToolResult::error(request, ErrorKind::ExecutionFailed, "tool task failed")
                })
            })
            .collect()
    }

    /// Group a batch into chains that must run sequentially. Each chain lists
    /// request indices in issue order; chains are ordered by their first index.
    pub fn plan_batch(&self, requests: &[ActionRequest]) -> Vec<Vec<usize>> {
        let mut sets = DisjointSets::new(requests.len());
        let writes: Vec<Vec<PathBuf>> = requests.iter().map(|r| self.write_targets(r)).collect();

        let mut first_exclusive: Option<usize> = None;
        for (i, request) in requests.iter().enumerate() {
            let concurrent = self
                .registry
                .descriptor(&request.tool_name)
                .map(|d| d.concurrent)
                .unwrap_or(true);
            if !concurrent {
                match first_exclusive {
                    Some(first) => sets.union(first, i),
                    None => first_exclusive = Some(i),
                }
            }
            for j in 0..i {
                let overlapping = writes[i]
                    .iter()
                    .any(|a| writes[j].iter().any(|b| paths_overlap(a, b)));
                if overlapping {
                    debug!(
                        "Serializing {} and {}: overlapping write targets",
                        requests[j].call_id, request.call_id
                    );
                    sets.union(i, j);
                }
            }
        }

        let mut chains: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..requests.len() {
            chains.entry(sets.find(i)).or_default().push(i);
        }
        let mut chains: Vec<Vec<usize>> = chains.into_values().collect();
        chains.sort_by_key(|chain| chain[0]);
        chains
    }

    /// Resolved paths a request declares it writes. An unresolved skill
    /// placeholder counts as the whole project.
    fn write_targets(&self, request: &ActionRequest) -> Vec<PathBuf> {
        let root = self.guard.root();
        let resolve = |path: &str| {
            if path.contains("{{") {
                root.to_path_buf()
            } else {
                resolve_in_root(path, root).unwrap_or_else(|_| resolve_lexical(path, root))
            }
        };
        let Some(descriptor) = self.registry.descriptor(&request.tool_name) else {
            return Vec::new();
        };
        if descriptor.tier != Tier::Skill {
            return descriptor
                .declared_writes(&request.arguments)
                .iter()
                .map(|p| resolve(p.as_str()))
                .collect();
        }

        let params = skill_params(descriptor, &request.arguments);
        descriptor
            .steps
            .iter()
            .filter_map(|step| {
                let step_descriptor = self.registry.descriptor(&step.tool)?;
                let args = expand_step_args(&step.args, &params, &[]);
                Some(step_descriptor.declared_writes(&args))
            })
            .flatten()
            .map(|p| resolve(p.as_str()))
            .collect()
    }
}

/// Skill arguments with every declared but absent parameter set to null
fn skill_params(descriptor: &ToolDescriptor, arguments: &Map<String, Value>) -> Map<String, Value> {
    let mut params = arguments.clone();
    for field in &descriptor.fields {
        params.entry(field.name.clone()).or_insert(Value::Null);
    }
    params
}

fn cancelled(request: &ActionRequest) -> ToolResult {
    ToolResult::error(request, ErrorKind::Cancelled, "cancelled before completion")
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}
