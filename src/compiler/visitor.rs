//! Continuation-passing tree walk shared by the compiler phases.
//!
//! A visit never returns its result; it hands it to a [`Resume`] continuation together
//! with the diagnostics collected beneath the node. In asynchronous mode every visit
//! and every continuation is queued on the [`Scheduler`] instead of being called, so
//! nesting depth in the program never turns into native stack depth.

use super::{CompileError, Options, Program};
use crate::{
    ast::{Node, NodeId},
    diagnostic::Diagnostic,
};
use std::{cell::RefCell, collections::VecDeque, rc::Rc};
use tracing::trace;

pub type Resume<V> = Box<dyn FnOnce(&mut V, Vec<Diagnostic>, <V as Visitor>::Output)>;
pub type ResumeAll<V> = Box<dyn FnOnce(&mut V, Vec<Diagnostic>, Vec<<V as Visitor>::Output>)>;
pub type Task<V> = Box<dyn FnOnce(&mut V)>;

pub struct Scheduler<V> {
    queue: VecDeque<Task<V>>,
    fatal: Option<CompileError>,
}

impl<V> Default for Scheduler<V> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            fatal: None,
        }
    }
}

impl<V> Scheduler<V> {
    pub fn defer(&mut self, task: Task<V>) {
        if self.fatal.is_none() {
            self.queue.push_back(task);
        }
    }

    pub fn next(&mut self) -> Option<Task<V>> {
        if self.fatal.is_some() {
            self.queue.clear();
            return None;
        }
        self.queue.pop_front()
    }

    pub fn is_aborted(&self) -> bool {
        self.fatal.is_some()
    }

    pub fn abort(&mut self, error: CompileError) {
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
    }

    pub fn take_fatal(&mut self) -> Option<CompileError> {
        self.fatal.take()
    }
}

/// Wraps `resume` so the diagnostics gathered so far come before the ones it receives.
pub fn prepend<V: Visitor>(diagnostics: Vec<Diagnostic>, resume: Resume<V>) -> Resume<V> {
    Box::new(move |this: &mut V, more: Vec<Diagnostic>, output: V::Output| {
        let mut diagnostics = diagnostics;
        diagnostics.extend(more);
        resume(this, diagnostics, output)
    })
}

/// Collects the results of sibling visits by position, whatever order they finish in.
struct Gather<V: Visitor> {
    slots: Vec<Option<(Vec<Diagnostic>, V::Output)>>,
    remaining: usize,
    resume: Option<ResumeAll<V>>,
}

pub trait Visitor: Sized + 'static {
    type Output: Clone + 'static;

    fn program(&self) -> &Program;
    fn scheduler(&mut self) -> &mut Scheduler<Self>;

    /// Handles one node. Implementations must eventually call `resume` exactly once,
    /// unless the walk has been aborted.
    fn visit_node(&mut self, nid: NodeId, node: Node, options: Options, resume: Resume<Self>);

    /// The result of visiting the absent node.
    fn absent(&self) -> Self::Output;

    fn visit(&mut self, nid: NodeId, options: Options, resume: Resume<Self>) {
        if options.sync {
            self.visit_now(nid, options, resume);
        } else {
            self.scheduler()
                .defer(Box::new(move |this: &mut Self| this.visit_now(nid, options, resume)));
        }
    }

    fn visit_now(&mut self, nid: NodeId, options: Options, resume: Resume<Self>) {
        if self.scheduler().is_aborted() {
            return;
        }
        if nid.is_none() {
            let output = self.absent();
            return resume(self, Vec::new(), output);
        }
        let node = match self.program().store.node(nid) {
            Some(node) => node.clone(),
            None => return self.abort(CompileError::MissingNode { id: nid }),
        };
        trace!(%nid, tag = %node.tag, sync = options.sync, "visit");
        self.visit_node(nid, node, options, resume);
    }

    /// Hands a finished result to its continuation.
    fn resume(
        &mut self,
        sync: bool,
        resume: Resume<Self>,
        diagnostics: Vec<Diagnostic>,
        output: Self::Output,
    ) {
        if sync {
            resume(self, diagnostics, output);
        } else {
            self.scheduler().defer(Box::new(move |this: &mut Self| {
                resume(this, diagnostics, output)
            }));
        }
    }

    fn abort(&mut self, error: CompileError) {
        self.scheduler().abort(error);
    }

    /// Visits every node in `nids` and resumes with their results in the same order.
    ///
    /// Results are keyed by position rather than by node id: hash-consing gives equal
    /// siblings the same id.
    fn visit_all(&mut self, nids: Vec<NodeId>, options: Options, resume: ResumeAll<Self>) {
        if nids.is_empty() {
            return resume(self, Vec::new(), Vec::new());
        }
        let gather = Rc::new(RefCell::new(Gather::<Self> {
            slots: (0..nids.len()).map(|_| None).collect(),
            remaining: nids.len(),
            resume: Some(resume),
        }));
        for (index, nid) in nids.into_iter().enumerate() {
            let gather = gather.clone();
            self.visit(
                nid,
                options.clone(),
                Box::new(
                    move |this: &mut Self, diagnostics: Vec<Diagnostic>, output: Self::Output| {
                        let finished = {
                            let mut gather = gather.borrow_mut();
                            gather.slots[index] = Some((diagnostics, output));
                            gather.remaining -= 1;
                            if gather.remaining == 0 {
                                let slots = std::mem::take(&mut gather.slots);
                                gather.resume.take().map(|resume| (slots, resume))
                            } else {
                                None
                            }
                        };
                        if let Some((slots, resume)) = finished {
                            let mut diagnostics = Vec::new();
                            let mut outputs = Vec::with_capacity(slots.len());
                            for (slot_diagnostics, output) in slots.into_iter().flatten() {
                                diagnostics.extend(slot_diagnostics);
                                outputs.push(output);
                            }
                            resume(this, diagnostics, outputs);
                        }
                    },
                ),
            );
        }
    }

    /// Runs `start` to completion on the spot and returns what it resumed with.
    ///
    /// `start` must only schedule synchronous work. `None` means the walk was aborted
    /// before a result arrived.
    fn capture(
        &mut self,
        start: impl FnOnce(&mut Self, Resume<Self>),
    ) -> Option<(Vec<Diagnostic>, Self::Output)> {
        let slot = Rc::new(RefCell::new(None));
        let sink = slot.clone();
        start(
            self,
            Box::new(move |_: &mut Self, diagnostics: Vec<Diagnostic>, output: Self::Output| {
                *sink.borrow_mut() = Some((diagnostics, output));
            }),
        );
        let result = slot.borrow_mut().take();
        result
    }

    /// Visits `root` and drains the work queue.
    fn run(
        &mut self,
        root: NodeId,
        options: Options,
    ) -> Result<(Vec<Diagnostic>, Self::Output), CompileError> {
        let slot = Rc::new(RefCell::new(None));
        let sink = slot.clone();
        self.visit(
            root,
            options,
            Box::new(move |_: &mut Self, diagnostics: Vec<Diagnostic>, output: Self::Output| {
                *sink.borrow_mut() = Some((diagnostics, output));
            }),
        );
        let mut steps = 0usize;
        while let Some(task) = self.scheduler().next() {
            task(self);
            steps += 1;
        }
        trace!(steps, "work queue drained");
        if let Some(error) = self.scheduler().take_fatal() {
            return Err(error);
        }
        let result = slot.borrow_mut().take();
        result.ok_or(CompileError::Unresolved)
    }
}
