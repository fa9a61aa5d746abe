//! # Optimistic overlay
//!
//! Server truth (`base`) plus an ordered list of local operations that
//! haven't been settled yet. What the user sees is always the pure
//! projection of the pending operations over the base, so dropping an
//! operation is all it takes to undo it.
//!
//! Every operation ends exactly once: confirmed (folded into the base) or
//! reverted (dropped). Settling an operation that is no longer pending is a
//! no-op, which makes late server responses harmless.

use quire_blocks::Entity;

pub type OpId = u64;

#[derive(Debug, Clone)]
pub enum PendingOp<E: Entity> {
    /// Entity inserted under a temporary id
    Create { op_id: OpId, entity: E },
    /// Field-level patch, with the entity as it looked before
    Update {
        op_id: OpId,
        id: String,
        patch: E::Patch,
        prior: Option<E>,
        /// Held locally until the entity's create is confirmed
        deferred: bool,
    },
    Delete { op_id: OpId, id: String, removed: Option<E> },
}

impl<E: Entity> PendingOp<E> {
    pub fn op_id(&self) -> OpId {
        match self {
            PendingOp::Create { op_id, .. } | PendingOp::Update { op_id, .. } | PendingOp::Delete { op_id, .. } => {
                *op_id
            }
        }
    }

    /// Id of the entity the operation targets
    pub fn target(&self) -> &str {
        match self {
            PendingOp::Create { entity, .. } => entity.id(),
            PendingOp::Update { id, .. } | PendingOp::Delete { id, .. } => id,
        }
    }

    /// Targets `id` or points at it as a parent
    fn references(&self, id: &str) -> bool {
        match self {
            PendingOp::Create { entity, .. } => entity.id() == id || entity.parent_ref() == Some(id),
            PendingOp::Update { id: target, patch, .. } => target == id || E::patch_references(patch, id),
            PendingOp::Delete { id: target, .. } => target == id,
        }
    }

    fn remap(&mut self, from: &str, to: &str) {
        match self {
            PendingOp::Create { entity, .. } => entity.remap(from, to),
            PendingOp::Update { id, patch, .. } => {
                if id == from {
                    *id = to.to_string();
                }
                E::remap_patch(patch, from, to);
            }
            PendingOp::Delete { id, .. } => {
                if id == from {
                    *id = to.to_string();
                }
            }
        }
    }
}

/// How a create was matched when the server copy arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledCreate {
    pub op_id: OpId,
    pub temp_id: String,
    pub server_id: String,
}

#[derive(Debug, Clone)]
pub struct Overlay<E: Entity> {
    base: Vec<E>,
    pending: Vec<PendingOp<E>>,
    next_op: OpId,
}

impl<E: Entity> Default for Overlay<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Overlay<E> {
    pub fn new() -> Self {
        Self::with_base(Vec::new())
    }

    pub fn with_base(base: Vec<E>) -> Self {
        Self {
            base,
            pending: Vec::new(),
            next_op: 0,
        }
    }

    pub fn base(&self) -> &[E] {
        &self.base
    }

    pub fn pending(&self) -> &[PendingOp<E>] {
        &self.pending
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether any unsettled operation targets `id`
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|op| op.target() == id)
    }

    fn next_op_id(&mut self) -> OpId {
        self.next_op += 1;
        self.next_op
    }

    fn position(&self, op_id: OpId) -> Option<usize> {
        self.pending.iter().position(|op| op.op_id() == op_id)
    }

    /// Base with every pending operation applied, in order
    pub fn project(&self) -> Vec<E> {
        let mut view = self.base.clone();
        for op in &self.pending {
            match op {
                PendingOp::Create { entity, .. } => {
                    if !view.iter().any(|e| e.id() == entity.id()) {
                        view.push(entity.clone());
                    }
                }
                PendingOp::Update { id, patch, .. } => {
                    if let Some(entity) = view.iter_mut().find(|e| e.id() == id) {
                        entity.apply(patch);
                    }
                }
                PendingOp::Delete { id, .. } => view.retain(|e| e.id() != id),
            }
        }
        view
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.project().into_iter().find(|e| e.id() == id)
    }

    /// Replace server truth wholesale, keeping pending operations
    pub fn replace_base(&mut self, base: Vec<E>) {
        self.base = base;
    }

    /// Replace the part of the base selected by `scope`
    pub fn replace_base_where(&mut self, scope: impl Fn(&E) -> bool, entities: Vec<E>) {
        self.base.retain(|e| !scope(e));
        self.base.extend(entities);
    }

    fn upsert_base(&mut self, entity: E) {
        match self.base.iter_mut().find(|e| e.id() == entity.id()) {
            Some(existing) => *existing = entity,
            None => self.base.push(entity),
        }
    }

    pub fn remove_from_base(&mut self, id: &str) -> Option<E> {
        let index = self.base.iter().position(|e| e.id() == id)?;
        Some(self.base.remove(index))
    }

    pub fn begin_create(&mut self, entity: E) -> OpId {
        let op_id = self.next_op_id();
        self.pending.push(PendingOp::Create { op_id, entity });
        op_id
    }

    /// Returns `None` when `id` isn't visible
    pub fn begin_update(&mut self, id: &str, patch: E::Patch, deferred: bool) -> Option<OpId> {
        let prior = self.get(id)?;
        let op_id = self.next_op_id();
        self.pending.push(PendingOp::Update {
            op_id,
            id: id.to_string(),
            patch,
            prior: Some(prior),
            deferred,
        });
        Some(op_id)
    }

    pub fn begin_delete(&mut self, id: &str) -> Option<OpId> {
        let removed = self.get(id)?;
        let op_id = self.next_op_id();
        self.pending.push(PendingOp::Delete {
            op_id,
            id: id.to_string(),
            removed: Some(removed),
        });
        Some(op_id)
    }

    /// Adopt the server copy of a created entity. The pending create is
    /// found by equivalent content first, then by temporary id. Pending
    /// operations that mention the temporary id are rewritten to the server
    /// id. Without a matching create the server copy is upserted as is.
    pub fn settle_create(&mut self, server: E, temp_id: Option<&str>) -> Option<SettledCreate> {
        let by_content = self.pending.iter().position(|op| {
            matches!(op, PendingOp::Create { entity, .. } if entity.is_equivalent(&server))
        });
        let index = by_content.or_else(|| {
            let temp_id = temp_id?;
            self.pending.iter().position(|op| {
                matches!(op, PendingOp::Create { entity, .. } if entity.id() == temp_id)
            })
        });
        let Some(index) = index else {
            // Nothing pending to settle, the server copy still shows
            self.upsert_base(server);
            return None;
        };

        let op = self.pending.remove(index);
        let settled = SettledCreate {
            op_id: op.op_id(),
            temp_id: op.target().to_string(),
            server_id: server.id().to_string(),
        };

        for pending in &mut self.pending {
            pending.remap(&settled.temp_id, &settled.server_id);
        }
        self.upsert_base(server);
        Some(settled)
    }

    /// Fold a confirmed update into the base. Returns false for operations
    /// that are no longer pending.
    pub fn confirm_update(&mut self, op_id: OpId, server: E) -> bool {
        let Some(index) = self.position(op_id) else {
            return false;
        };
        self.pending.remove(index);
        self.upsert_base(server);
        true
    }

    pub fn confirm_delete(&mut self, op_id: OpId) -> bool {
        let Some(index) = self.position(op_id) else {
            return false;
        };
        let op = self.pending.remove(index);
        let id = op.target().to_string();
        self.base.retain(|e| e.id() != id);
        true
    }

    /// Drop one operation. Dropping a create also drops every operation
    /// that references its temporary id, so nothing is left pointing at an
    /// entity that never existed.
    pub fn revert(&mut self, op_id: OpId) -> Vec<PendingOp<E>> {
        let Some(index) = self.position(op_id) else {
            return Vec::new();
        };
        let op = self.pending.remove(index);
        let mut reverted = Vec::new();
        if let PendingOp::Create { entity, .. } = &op {
            let temp_id = entity.id().to_string();
            let (dependent, kept): (Vec<_>, Vec<_>) =
                self.pending.drain(..).partition(|pending| pending.references(&temp_id));
            self.pending = kept;
            reverted.extend(dependent);
        }
        reverted.insert(0, op);
        reverted
    }

    pub fn revert_all(&mut self) -> Vec<PendingOp<E>> {
        std::mem::take(&mut self.pending)
    }

    /// Updates held back for `id`, in order, now marked as sent
    pub fn release_deferred(&mut self, id: &str) -> Vec<(OpId, E::Patch)> {
        let mut released = Vec::new();
        for op in &mut self.pending {
            if let PendingOp::Update {
                op_id,
                id: target,
                patch,
                deferred,
                ..
            } = op
            {
                if *deferred && target == id {
                    *deferred = false;
                    released.push((*op_id, patch.clone()));
                }
            }
        }
        released
    }

    /// A change made elsewhere. Completes a matching pending create instead
    /// of showing the entity twice.
    pub fn adopt_server(&mut self, entity: E) -> Option<SettledCreate> {
        if self.base.iter().any(|e| e.id() == entity.id()) {
            self.upsert_base(entity);
            return None;
        }
        self.settle_create(entity, None)
    }
}
