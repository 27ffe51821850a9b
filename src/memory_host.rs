//! An in-memory host.
//!
//! `MemoryHost` keeps its node tree in a slab, records every mutation the
//! engine performs as a [`HostOp`] and queues microtasks until the embedder
//! flushes them. It is the host used by this crate's own tests and is meant
//! for embedders testing their components without a real platform.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::rc::Rc;

use slab::Slab;

use crate::element::{Handler, PropValue, Props};
use crate::host::HostConfig;
use crate::scheduler::{ManualScheduler, PriorityLevel};

/// Handle of a node owned by a [`MemoryHost`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct MemoryNodeId(usize);

/// One mutation applied to a [`MemoryHost`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    /// An element instance was created.
    CreateInstance {
        /// New node.
        id: MemoryNodeId,
        /// Element tag.
        tag: String,
    },
    /// A text instance was created.
    CreateText {
        /// New node.
        id: MemoryNodeId,
        /// Initial content.
        content: String,
    },
    /// A child was appended while building a detached subtree.
    AppendInitial {
        /// Parent node.
        parent: MemoryNodeId,
        /// Appended node.
        child: MemoryNodeId,
    },
    /// A child was appended to (or moved to the end of) a mounted parent.
    Append {
        /// Parent node.
        parent: MemoryNodeId,
        /// Appended node.
        child: MemoryNodeId,
    },
    /// A child was inserted before a sibling.
    Insert {
        /// Parent node.
        parent: MemoryNodeId,
        /// Inserted node.
        child: MemoryNodeId,
        /// Sibling the child now precedes.
        before: MemoryNodeId,
    },
    /// A child was removed.
    Remove {
        /// Parent node.
        parent: MemoryNodeId,
        /// Removed node.
        child: MemoryNodeId,
    },
    /// Attributes of an element were replaced.
    Update {
        /// Updated node.
        id: MemoryNodeId,
    },
    /// Content of a text node was replaced.
    TextUpdate {
        /// Updated node.
        id: MemoryNodeId,
        /// New content.
        content: String,
    },
}

enum NodeKind {
    Container,
    Element {
        tag: String,
        attrs: BTreeMap<String, PropValue>,
    },
    Text(String),
}

struct MemoryNode {
    kind: NodeKind,
    parent: Option<MemoryNodeId>,
    children: Vec<MemoryNodeId>,
}

/// In-memory rendering target.
#[derive(Default)]
pub struct MemoryHost {
    nodes: RefCell<Slab<MemoryNode>>,
    ops: RefCell<Vec<HostOp>>,
    microtasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    scheduler: Option<Rc<ManualScheduler>>,
}

/// Scheduler priority an event's handlers run at.
///
/// Discrete input (`click`, `keydown`, `keyup`) is `Immediate`, `scroll` is
/// `UserBlocking` and anything else is `Normal`.
pub fn event_priority(event: &str) -> PriorityLevel {
    match event {
        "click" | "keydown" | "keyup" => PriorityLevel::Immediate,
        "scroll" => PriorityLevel::UserBlocking,
        _ => PriorityLevel::Normal,
    }
}

impl MemoryHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host whose dispatched events run at [`event_priority`] on
    /// `scheduler`. Pass the scheduler the root is created with.
    pub fn with_scheduler(scheduler: Rc<ManualScheduler>) -> Self {
        Self {
            scheduler: Some(scheduler),
            ..Self::default()
        }
    }

    /// Number of live nodes, containers included.
    pub fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Create a container node to mount a root into.
    pub fn create_container(&self) -> MemoryNodeId {
        self.insert(NodeKind::Container)
    }

    /// Serialize the subtree under `id`. Containers render only their children
    /// and event handlers are omitted.
    pub fn to_markup(&self, id: MemoryNodeId) -> String {
        let mut out = String::new();
        self.write_markup(&self.nodes.borrow(), id, &mut out);
        out
    }

    fn write_markup(&self, nodes: &Slab<MemoryNode>, id: MemoryNodeId, out: &mut String) {
        let Some(node) = nodes.get(id.0) else {
            return;
        };
        match &node.kind {
            NodeKind::Container => {
                for &child in &node.children {
                    self.write_markup(nodes, child, out);
                }
            }
            NodeKind::Text(content) => out.push_str(content),
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    if matches!(value, PropValue::Handler(_)) {
                        continue;
                    }
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                out.push('>');
                for &child in &node.children {
                    self.write_markup(nodes, child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    /// Children of `id` in order.
    pub fn children(&self, id: MemoryNodeId) -> Vec<MemoryNodeId> {
        self.nodes
            .borrow()
            .get(id.0)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    /// Drain the operation log.
    pub fn take_ops(&self) -> Vec<HostOp> {
        std::mem::take(&mut *self.ops.borrow_mut())
    }

    /// Number of queued microtasks.
    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.borrow().len()
    }

    /// Run queued microtasks, including ones queued while flushing. Returns
    /// how many ran.
    pub fn flush_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(task) = self.microtasks.borrow_mut().pop_front() else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    /// Dispatch `event` at element `id`.
    ///
    /// Handlers are collected from `id` up to its root: `on{event}capture`
    /// handlers run outermost first, then `on{event}` handlers run from the
    /// target outwards. Each handler runs at [`event_priority`] when the host
    /// was built [`with_scheduler`](Self::with_scheduler).
    ///
    /// Returns `false` when no node on the path handles `event`.
    pub fn dispatch_event(&self, id: MemoryNodeId, event: &str) -> bool {
        let (capture, bubble) = self.listeners(id, event);
        if capture.is_empty() && bubble.is_empty() {
            tracing::warn!(node = ?id, event, "no handler for event, ignoring");
            return false;
        }
        let priority = event_priority(event);
        tracing::debug!(node = ?id, event, ?priority, "dispatching event");
        for handler in capture.iter().rev().chain(&bubble) {
            match &self.scheduler {
                Some(scheduler) => scheduler.run_with_priority(priority, || handler.call()),
                None => handler.call(),
            }
        }
        true
    }

    /// Capture handlers target first, bubble handlers target first.
    fn listeners(&self, id: MemoryNodeId, event: &str) -> (Vec<Handler>, Vec<Handler>) {
        let bubble_name = format!("on{event}");
        let capture_name = format!("on{event}capture");
        let (mut capture, mut bubble) = (Vec::new(), Vec::new());
        let nodes = self.nodes.borrow();
        let mut cursor = Some(id);
        while let Some(node) = cursor.and_then(|at| nodes.get(at.0)) {
            if let NodeKind::Element { attrs, .. } = &node.kind {
                if let Some(PropValue::Handler(handler)) = attrs.get(&capture_name) {
                    capture.push(handler.clone());
                }
                if let Some(PropValue::Handler(handler)) = attrs.get(&bubble_name) {
                    bubble.push(handler.clone());
                }
            }
            cursor = node.parent;
        }
        (capture, bubble)
    }

    fn insert(&self, kind: NodeKind) -> MemoryNodeId {
        MemoryNodeId(self.nodes.borrow_mut().insert(MemoryNode {
            kind,
            parent: None,
            children: Vec::new(),
        }))
    }

    fn record(&self, op: HostOp) {
        self.ops.borrow_mut().push(op);
    }

    fn detach(nodes: &mut Slab<MemoryNode>, child: MemoryNodeId) {
        let Some(parent) = nodes.get(child.0).and_then(|node| node.parent) else {
            return;
        };
        if let Some(parent) = nodes.get_mut(parent.0) {
            parent.children.retain(|&c| c != child);
        }
        nodes[child.0].parent = None;
    }

    /// Free `id` and every node below it.
    fn release(nodes: &mut Slab<MemoryNode>, id: MemoryNodeId) {
        let mut stack = vec![id];
        while let Some(at) = stack.pop() {
            if let Some(node) = nodes.try_remove(at.0) {
                stack.extend(node.children);
            }
        }
    }

    fn append(&self, parent: MemoryNodeId, child: MemoryNodeId) {
        let mut nodes = self.nodes.borrow_mut();
        Self::detach(&mut nodes, child);
        nodes[parent.0].children.push(child);
        nodes[child.0].parent = Some(parent);
    }
}

fn attrs_of(props: &Props) -> BTreeMap<String, PropValue> {
    props
        .attrs()
        .map(|(name, value)| (name.to_owned(), value.clone()))
        .collect()
}

impl HostConfig for MemoryHost {
    type Instance = MemoryNodeId;

    fn create_instance(&self, tag: &str, props: &Props) -> MemoryNodeId {
        let id = self.insert(NodeKind::Element {
            tag: tag.to_owned(),
            attrs: attrs_of(props),
        });
        self.record(HostOp::CreateInstance {
            id,
            tag: tag.to_owned(),
        });
        id
    }

    fn create_text_instance(&self, content: &str) -> MemoryNodeId {
        let id = self.insert(NodeKind::Text(content.to_owned()));
        self.record(HostOp::CreateText {
            id,
            content: content.to_owned(),
        });
        id
    }

    fn append_initial_child(&self, parent: &MemoryNodeId, child: &MemoryNodeId) {
        self.append(*parent, *child);
        self.record(HostOp::AppendInitial {
            parent: *parent,
            child: *child,
        });
    }

    fn append_child_to_container(&self, parent: &MemoryNodeId, child: &MemoryNodeId) {
        self.append(*parent, *child);
        self.record(HostOp::Append {
            parent: *parent,
            child: *child,
        });
    }

    fn insert_child_to_container(
        &self,
        parent: &MemoryNodeId,
        child: &MemoryNodeId,
        before: &MemoryNodeId,
    ) {
        {
            let mut nodes = self.nodes.borrow_mut();
            Self::detach(&mut nodes, *child);
            let siblings = &mut nodes[parent.0].children;
            let at = siblings
                .iter()
                .position(|c| c == before)
                .unwrap_or(siblings.len());
            siblings.insert(at, *child);
            nodes[child.0].parent = Some(*parent);
        }
        self.record(HostOp::Insert {
            parent: *parent,
            child: *child,
            before: *before,
        });
    }

    fn remove_child(&self, parent: &MemoryNodeId, child: &MemoryNodeId) {
        {
            let mut nodes = self.nodes.borrow_mut();
            nodes[parent.0].children.retain(|c| c != child);
            Self::release(&mut nodes, *child);
        }
        self.record(HostOp::Remove {
            parent: *parent,
            child: *child,
        });
    }

    fn commit_update(&self, instance: &MemoryNodeId, props: &Props) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes.borrow_mut()[instance.0].kind {
            *attrs = attrs_of(props);
        }
        self.record(HostOp::Update { id: *instance });
    }

    fn commit_text_update(&self, instance: &MemoryNodeId, content: &str) {
        if let NodeKind::Text(text) = &mut self.nodes.borrow_mut()[instance.0].kind {
            *text = content.to_owned();
        }
        self.record(HostOp::TextUpdate {
            id: *instance,
            content: content.to_owned(),
        });
    }

    fn schedule_microtask(&self, task: Box<dyn FnOnce()>) {
        self.microtasks.borrow_mut().push_back(task);
    }
}
