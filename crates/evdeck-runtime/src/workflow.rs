//! Dependency-graph workflows.
//!
//! A workflow is a registered template: up to 64 nodes, each an event
//! type plus the indices of the nodes it depends on. Starting one
//! creates an instance with three `u64` masks — completed, errored,
//! dispatched — one bit per node. Bits only ever get set; readiness is
//! recomputed from the masks, never cached.
//!
//! ```text
//!        0
//!       / \        node 3 runs only after 1 AND 2,
//!      1   2       which both wait on 0
//!       \ /
//!        3
//! ```
//!
//! The engine decides, the kernel executes: [`WorkflowEngine::instantiate`]
//! and [`WorkflowEngine::record_outcome`] return the nodes that just
//! became ready as [`NodeDispatch`] values, and the caller admits them
//! as routing entries. A node whose dependency failed is blocked for
//! good — its bit never enters any mask and the instance finishes
//! without it.
//!
//! # Thread safety
//!
//! One mutex guards definitions and instances together. Nothing here
//! calls out of the module while holding it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use evdeck_core::{
    kdebug, kinfo, kwarn, EngineError, Event, InstanceId, Result, WorkflowId, MAX_ROUTE_HOPS,
};

/// Masks are `u64`, so a workflow holds at most 64 nodes.
pub const MAX_WORKFLOW_NODES: usize = 64;

/// One node of a workflow template.
#[derive(Debug, Clone, Default)]
pub struct NodeTemplate {
    pub event_type: u32,
    /// Copied into the event's data area (truncated to its size).
    pub payload: Vec<u8>,
    /// Indices of nodes that must complete first.
    pub deps: Vec<usize>,
}

impl NodeTemplate {
    pub fn new(event_type: u32) -> Self {
        Self { event_type, payload: Vec::new(), deps: Vec::new() }
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn depends_on(mut self, deps: &[usize]) -> Self {
        self.deps = deps.to_vec();
        self
    }
}

/// A workflow template. Validated once at registration.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    /// Route stamped onto every node's event.
    pub route: Vec<u8>,
    pub nodes: Vec<NodeTemplate>,
}

/// A node the caller should admit into the dispatch path.
#[derive(Debug, Clone)]
pub struct NodeDispatch {
    pub node: usize,
    pub event: Event,
}

/// Where an instance stands. Terminal unless `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Nodes are still dispatched and unfinished.
    InProgress,
    /// Every node completed.
    AllSucceeded,
    /// Some nodes completed; at least one errored or was blocked.
    Partial,
    /// No node completed.
    Failed,
}

struct Instance {
    definition: Arc<WorkflowDefinition>,
    completed: u64,
    errored: u64,
    dispatched: u64,
}

#[derive(Default)]
struct EngineInner {
    definitions: HashMap<u64, Arc<WorkflowDefinition>>,
    instances: HashMap<u64, Instance>,
}

/// Registry plus per-instance progress masks.
pub struct WorkflowEngine {
    inner: Mutex<EngineInner>,
    next_workflow_id: AtomicU64,
    next_instance_id: AtomicU64,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EngineInner::default()),
            next_workflow_id: AtomicU64::new(1),
            next_instance_id: AtomicU64::new(1),
        }
    }

    /// Validate and store a definition. Checks, in order: node count,
    /// route length, dependency indices, acyclicity.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<WorkflowId> {
        let n = definition.nodes.len();
        if n > MAX_WORKFLOW_NODES {
            return Err(EngineError::TooManyNodes(n));
        }
        if definition.route.len() > MAX_ROUTE_HOPS {
            return Err(EngineError::RouteTooLong(definition.route.len()));
        }
        for (node, template) in definition.nodes.iter().enumerate() {
            for &dep in &template.deps {
                if dep >= n || dep == node {
                    return Err(EngineError::BadDependency { node, dep });
                }
            }
        }
        check_acyclic(&definition.nodes)?;

        let id = self.next_workflow_id.fetch_add(1, Ordering::Relaxed);
        kinfo!("Workflow '{}' registered as {} ({} nodes)", definition.name, id, n);
        self.inner
            .lock()
            .unwrap()
            .definitions
            .insert(id, Arc::new(definition));
        Ok(WorkflowId(id))
    }

    /// Create an instance and return it with the dependency-free nodes,
    /// already marked dispatched.
    pub fn instantiate(&self, id: WorkflowId) -> Result<(InstanceId, Vec<NodeDispatch>)> {
        let mut inner = self.inner.lock().unwrap();
        let definition = inner
            .definitions
            .get(&id.0)
            .cloned()
            .ok_or(EngineError::UnknownWorkflow(id.0))?;

        let instance_id = InstanceId(self.next_instance_id.fetch_add(1, Ordering::Relaxed));
        let mut instance = Instance {
            definition: Arc::clone(&definition),
            completed: 0,
            errored: 0,
            dispatched: 0,
        };
        let ready = collect_ready(&mut instance, instance_id);
        kdebug!(
            "Instance {} of workflow {} started, {} root nodes",
            instance_id.0,
            id.0,
            ready.len()
        );
        inner.instances.insert(instance_id.0, instance);
        Ok((instance_id, ready))
    }

    /// Record one node's outcome and return the nodes it unblocked.
    /// Duplicate outcomes for the same node are ignored; an error never
    /// unblocks anything.
    pub fn record_outcome(&self, instance_id: InstanceId, node: usize, ok: bool) -> Vec<NodeDispatch> {
        let mut inner = self.inner.lock().unwrap();
        let Some(instance) = inner.instances.get_mut(&instance_id.0) else {
            kwarn!("Outcome for unknown instance {}, dropped", instance_id.0);
            return Vec::new();
        };
        if node >= instance.definition.nodes.len() {
            kwarn!("Outcome for out-of-range node {}, dropped", node);
            return Vec::new();
        }
        let bit = 1u64 << node;
        if (instance.completed | instance.errored) & bit != 0 {
            return Vec::new();
        }
        if ok {
            instance.completed |= bit;
        } else {
            instance.errored |= bit;
        }

        let ready = collect_ready(instance, instance_id);
        if ready.is_empty() && instance.dispatched == (instance.completed | instance.errored) {
            kdebug!(
                "Instance {} finished ({:?})",
                instance_id.0,
                settle(instance)
            );
        }
        ready
    }

    pub fn status(&self, instance_id: InstanceId) -> Result<InstanceStatus> {
        let inner = self.inner.lock().unwrap();
        let instance = inner
            .instances
            .get(&instance_id.0)
            .ok_or(EngineError::UnknownWorkflow(instance_id.0))?;

        let in_flight = instance.dispatched & !(instance.completed | instance.errored);
        if in_flight != 0 {
            return Ok(InstanceStatus::InProgress);
        }
        Ok(settle(instance))
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal status for an instance with nothing in flight.
fn settle(instance: &Instance) -> InstanceStatus {
    if instance.errored == 0 {
        InstanceStatus::AllSucceeded
    } else if instance.completed == 0 {
        InstanceStatus::Failed
    } else {
        InstanceStatus::Partial
    }
}

/// Mark and return every undispatched node whose dependencies have all
/// completed. Recomputed from the masks on every call.
fn collect_ready(instance: &mut Instance, instance_id: InstanceId) -> Vec<NodeDispatch> {
    let definition = Arc::clone(&instance.definition);
    let mut ready = Vec::new();
    for (node, template) in definition.nodes.iter().enumerate() {
        let bit = 1u64 << node;
        if instance.dispatched & bit != 0 {
            continue;
        }
        let deps = deps_mask(&template.deps);
        if instance.completed & deps == deps {
            instance.dispatched |= bit;
            ready.push(NodeDispatch {
                node,
                event: build_event(&definition, instance_id, node),
            });
        }
    }
    ready
}

fn deps_mask(deps: &[usize]) -> u64 {
    deps.iter().fold(0u64, |mask, &dep| mask | (1u64 << dep))
}

fn build_event(definition: &WorkflowDefinition, instance_id: InstanceId, node: usize) -> Event {
    let template = &definition.nodes[node];
    let first_hop = definition.route.first().copied().unwrap_or(0);
    let mut event =
        Event::new(template.event_type, first_hop).with_payload(&template.payload);
    if definition.route.len() > 1 {
        event.set_route(&definition.route);
    }
    event.user_id = instance_id.0;
    event
}

/// Kahn's algorithm over the dependency edges.
fn check_acyclic(nodes: &[NodeTemplate]) -> Result<()> {
    let n = nodes.len();
    // indegree[i] counts i's unmet dependencies.
    let mut indegree = vec![0usize; n];
    for (i, template) in nodes.iter().enumerate() {
        indegree[i] = template.deps.len();
    }
    // dependents[d] lists the nodes waiting on d.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, template) in nodes.iter().enumerate() {
        for &dep in &template.deps {
            dependents[dep].push(i);
        }
    }

    let mut queue: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut visited = 0usize;
    while let Some(node) = queue.pop() {
        visited += 1;
        for &next in &dependents[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push(next);
            }
        }
    }
    if visited < n {
        return Err(EngineError::DependencyCycle);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "diamond".into(),
            route: vec![3, 0],
            nodes: vec![
                NodeTemplate::new(10),
                NodeTemplate::new(11).depends_on(&[0]),
                NodeTemplate::new(12).depends_on(&[0]),
                NodeTemplate::new(13).depends_on(&[1, 2]),
            ],
        }
    }

    #[test]
    fn test_register_validates_dependency_range() {
        let engine = WorkflowEngine::new();
        let mut def = diamond();
        def.nodes[1].deps = vec![9];
        assert!(matches!(
            engine.register(def),
            Err(EngineError::BadDependency { node: 1, dep: 9 })
        ));
    }

    #[test]
    fn test_register_rejects_self_dependency() {
        let engine = WorkflowEngine::new();
        let mut def = diamond();
        def.nodes[2].deps = vec![2];
        assert!(matches!(
            engine.register(def),
            Err(EngineError::BadDependency { node: 2, dep: 2 })
        ));
    }

    #[test]
    fn test_register_rejects_cycle() {
        let engine = WorkflowEngine::new();
        let def = WorkflowDefinition {
            name: "loop".into(),
            route: vec![0],
            nodes: vec![
                NodeTemplate::new(1).depends_on(&[2]),
                NodeTemplate::new(2).depends_on(&[0]),
                NodeTemplate::new(3).depends_on(&[1]),
            ],
        };
        assert!(matches!(engine.register(def), Err(EngineError::DependencyCycle)));
    }

    #[test]
    fn test_register_rejects_long_route() {
        let engine = WorkflowEngine::new();
        let mut def = diamond();
        def.route = vec![1; 9];
        assert!(matches!(engine.register(def), Err(EngineError::RouteTooLong(9))));
    }

    #[test]
    fn test_instantiate_releases_roots_only() {
        let engine = WorkflowEngine::new();
        let id = engine.register(diamond()).unwrap();
        let (instance, ready) = engine.instantiate(id).unwrap();

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].node, 0);
        assert_eq!(ready[0].event.event_type, 10);
        assert_eq!(ready[0].event.user_id, instance.0);
        assert_eq!(ready[0].event.route[0], 3);
        assert_eq!(engine.status(instance).unwrap(), InstanceStatus::InProgress);
    }

    #[test]
    fn test_diamond_release_order() {
        let engine = WorkflowEngine::new();
        let id = engine.register(diamond()).unwrap();
        let (instance, roots) = engine.instantiate(id).unwrap();
        assert_eq!(roots.len(), 1);

        let mid = engine.record_outcome(instance, 0, true);
        let mut mid_nodes: Vec<usize> = mid.iter().map(|d| d.node).collect();
        mid_nodes.sort_unstable();
        assert_eq!(mid_nodes, vec![1, 2]);

        // The join waits for both sides.
        assert!(engine.record_outcome(instance, 1, true).is_empty());
        let last = engine.record_outcome(instance, 2, true);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].node, 3);

        assert!(engine.record_outcome(instance, 3, true).is_empty());
        assert_eq!(engine.status(instance).unwrap(), InstanceStatus::AllSucceeded);
    }

    #[test]
    fn test_failed_dependency_blocks_forever() {
        let engine = WorkflowEngine::new();
        let id = engine.register(diamond()).unwrap();
        let (instance, _) = engine.instantiate(id).unwrap();

        engine.record_outcome(instance, 0, true);
        assert!(engine.record_outcome(instance, 1, false).is_empty());
        // Node 2 succeeding must not release the join: node 1 errored.
        assert!(engine.record_outcome(instance, 2, true).is_empty());
        assert_eq!(engine.status(instance).unwrap(), InstanceStatus::Partial);
    }

    #[test]
    fn test_all_roots_failing_is_failed() {
        let engine = WorkflowEngine::new();
        let id = engine
            .register(WorkflowDefinition {
                name: "pair".into(),
                route: vec![0],
                nodes: vec![NodeTemplate::new(1), NodeTemplate::new(2).depends_on(&[0])],
            })
            .unwrap();
        let (instance, _) = engine.instantiate(id).unwrap();

        engine.record_outcome(instance, 0, false);
        assert_eq!(engine.status(instance).unwrap(), InstanceStatus::Failed);
    }

    #[test]
    fn test_duplicate_outcome_ignored() {
        let engine = WorkflowEngine::new();
        let id = engine.register(diamond()).unwrap();
        let (instance, _) = engine.instantiate(id).unwrap();

        let first = engine.record_outcome(instance, 0, true);
        assert_eq!(first.len(), 2);
        // A replayed wakeup must not re-release nodes 1 and 2.
        assert!(engine.record_outcome(instance, 0, true).is_empty());
        assert!(engine.record_outcome(instance, 0, false).is_empty());
        assert_eq!(engine.status(instance).unwrap(), InstanceStatus::InProgress);
    }

    #[test]
    fn test_unknown_ids_rejected() {
        let engine = WorkflowEngine::new();
        assert!(matches!(
            engine.instantiate(WorkflowId(99)),
            Err(EngineError::UnknownWorkflow(99))
        ));
        assert!(matches!(
            engine.status(InstanceId(99)),
            Err(EngineError::UnknownWorkflow(99))
        ));
        assert!(engine.record_outcome(InstanceId(99), 0, true).is_empty());
    }

    #[test]
    fn test_node_payload_copied_into_event() {
        let engine = WorkflowEngine::new();
        let id = engine
            .register(WorkflowDefinition {
                name: "payload".into(),
                route: vec![0],
                nodes: vec![NodeTemplate::new(7).with_payload(b"abc")],
            })
            .unwrap();
        let (_, ready) = engine.instantiate(id).unwrap();
        assert_eq!(&ready[0].event.data[..3], b"abc");
    }
}
