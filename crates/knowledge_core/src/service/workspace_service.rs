//! Knowledge base workspace use-case service.
//!
//! # Responsibility
//! - Turn user actions (add, rename, select, edit, delete, move, toggle)
//!   into record store writes and local state updates.
//! - Keep the forest, selection, and expand state consistent after writes.
//!
//! # Invariants
//! - Every write action checks [`ActionAvailability`] first and fails with
//!   [`ServiceError::ActionUnavailable`] without touching the store.
//! - New nodes are appended at the end of their sibling group.
//! - A partially applied move is reported as an outcome, never an error.
//! - Selection never points at a page missing from the current forest.

use crate::model::node::NodeKind;
use crate::model::record::{
    FieldValue, Fields, RecordId, Table, FIELD_CONTENT, FIELD_IS_TOP_LEVEL, FIELD_ORDER,
    FIELD_ORGANIZER, FIELD_PARENT_ORGANIZER, FIELD_TITLE,
};
use crate::state::{DetailMode, LocalState, LocalStateError, LocalStateRepository};
use crate::store::{Operation, RecordStore, StoreError};
use crate::sync::{EditFlush, SyncConfig, SyncError, TreeSync};
use crate::tree::expand::ExpandState;
use crate::tree::forest::{Forest, OutlineEntry};
use crate::tree::ordering::MoveError;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::time::Instant;

pub const DEFAULT_ORGANIZER_TITLE: &str = "New Organizer";
pub const DEFAULT_PAGE_TITLE: &str = "New Page";
pub const DEFAULT_PAGE_CONTENT: &str = "<p>Hello, World!</p>";

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// User actions gated by store permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AddOrganizer,
    RenameOrganizer,
    AddPage,
    EditPage,
    DeletePage,
    MoveNode,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AddOrganizer => "add organizer",
            Self::RenameOrganizer => "rename organizer",
            Self::AddPage => "add page",
            Self::EditPage => "edit page",
            Self::DeletePage => "delete page",
            Self::MoveNode => "move node",
        };
        f.write_str(name)
    }
}

/// Which actions the store currently permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionAvailability {
    pub add_organizer: bool,
    pub rename_organizer: bool,
    pub add_page: bool,
    pub edit_page: bool,
    pub delete_page: bool,
    /// Moves renumber mixed sibling groups, so both tables must be writable.
    pub move_node: bool,
}

impl ActionAvailability {
    pub fn from_store<S: RecordStore + ?Sized>(store: &S) -> Self {
        let organizers_update = store.has_permission(Table::Organizers, Operation::Update);
        let pages_update = store.has_permission(Table::Pages, Operation::Update);
        Self {
            add_organizer: store.has_permission(Table::Organizers, Operation::Create),
            rename_organizer: organizers_update,
            add_page: store.has_permission(Table::Pages, Operation::Create),
            edit_page: pages_update,
            delete_page: store.has_permission(Table::Pages, Operation::Delete),
            move_node: organizers_update && pages_update,
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::AddOrganizer => self.add_organizer,
            Action::RenameOrganizer => self.rename_organizer,
            Action::AddPage => self.add_page,
            Action::EditPage => self.edit_page,
            Action::DeletePage => self.delete_page,
            Action::MoveNode => self.move_node,
        }
    }
}

/// Non-fatal report of a move that only partly persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveNotice {
    pub moved: RecordId,
    pub applied: usize,
    pub failed: Vec<RecordId>,
}

impl Display for MoveNotice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "moving {} was only partly saved; {} record(s) could not be updated",
            self.moved,
            self.failed.len()
        )
    }
}

/// Result of a drag-and-drop move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Every update was acknowledged.
    Applied { updates: usize },
    /// The node already sits at the requested position.
    Unchanged,
    /// The moved node or target vanished; nothing to do.
    Skipped,
    /// The move would break the tree and was not attempted.
    Rejected(MoveError),
    /// Some updates failed; a rebuild is scheduled to resync.
    PartiallyApplied(MoveNotice),
}

/// What one [`WorkspaceService::poll`] did.
#[derive(Debug, Default)]
pub struct PollReport {
    pub rebuilt: bool,
    pub edits: EditFlush,
}

/// Errors from workspace service operations.
#[derive(Debug)]
pub enum ServiceError {
    /// The store does not permit this action.
    ActionUnavailable(Action),
    /// Title is blank after normalization.
    InvalidTitle,
    /// Node does not exist in the current forest.
    NodeNotFound(RecordId),
    /// Node exists but is not an organizer.
    NotAnOrganizer(RecordId),
    /// Node exists but is not a page.
    NotAPage(RecordId),
    Store(StoreError),
    Sync(SyncError),
    LocalState(LocalStateError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ActionUnavailable(action) => write!(f, "action not permitted: {action}"),
            Self::InvalidTitle => write!(f, "title must not be blank"),
            Self::NodeNotFound(id) => write!(f, "tree node not found: {id}"),
            Self::NotAnOrganizer(id) => write!(f, "tree node is not an organizer: {id}"),
            Self::NotAPage(id) => write!(f, "tree node is not a page: {id}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Sync(err) => write!(f, "{err}"),
            Self::LocalState(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Sync(err) => Some(err),
            Self::LocalState(err) => Some(err),
            Self::ActionUnavailable(_)
            | Self::InvalidTitle
            | Self::NodeNotFound(_)
            | Self::NotAnOrganizer(_)
            | Self::NotAPage(_) => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<SyncError> for ServiceError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

impl From<LocalStateError> for ServiceError {
    fn from(value: LocalStateError) -> Self {
        Self::LocalState(value)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Collapses whitespace runs and trims. Returns `None` for blank input.
pub fn normalize_title(raw: &str) -> Option<String> {
    let normalized = WHITESPACE_RE.replace_all(raw, " ");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Workspace facade over one record store and one local state repository.
pub struct WorkspaceService<'s, S: RecordStore + ?Sized, R: LocalStateRepository> {
    sync: TreeSync<'s, S>,
    local: LocalState<R>,
    expand: ExpandState,
    selected_page: Option<RecordId>,
    detail_mode: DetailMode,
}

impl<'s, S: RecordStore + ?Sized, R: LocalStateRepository> WorkspaceService<'s, S, R> {
    /// Loads the forest and restores persisted view state.
    pub fn open(store: &'s S, local_state: R, config: SyncConfig) -> ServiceResult<Self> {
        let local = LocalState::new(local_state);
        let sync = TreeSync::new(store, config);
        sync.hydrate()?;

        let mut expand = ExpandState::new();
        expand.restore(local.expanded_organizers()?);

        let mut service = Self {
            sync,
            selected_page: local.selected_page()?,
            detail_mode: local.detail_mode()?,
            local,
            expand,
        };
        service.reconcile_selection()?;
        info!(
            "event=workspace_open module=service status=ok nodes={} detail_mode={}",
            service.forest().len(),
            service.detail_mode
        );
        Ok(service)
    }

    pub fn availability(&self) -> ActionAvailability {
        ActionAvailability::from_store(self.sync.store())
    }

    pub fn forest(&self) -> Rc<Forest> {
        self.sync.forest()
    }

    pub fn selected_page(&self) -> Option<&RecordId> {
        self.selected_page.as_ref()
    }

    pub fn detail_mode(&self) -> DetailMode {
        self.detail_mode
    }

    pub fn is_expanded(&self, organizer_id: &RecordId) -> bool {
        self.expand.is_expanded(organizer_id)
    }

    pub fn sync(&self) -> &TreeSync<'s, S> {
        &self.sync
    }

    /// Outline rows a tree view would render: children of collapsed
    /// organizers are hidden.
    pub fn visible_outline(&self) -> Vec<OutlineEntry> {
        let forest = self.forest();
        let mut rows = Vec::new();
        let mut hidden_below: Option<usize> = None;
        for entry in forest.outline() {
            if let Some(depth) = hidden_below {
                if entry.depth > depth {
                    continue;
                }
                hidden_below = None;
            }
            let collapsed = forest
                .node(&entry.id)
                .is_some_and(|node| node.is_organizer() && !self.expand.is_expanded(&node.id));
            if collapsed {
                hidden_below = Some(entry.depth);
            }
            rows.push(entry);
        }
        rows
    }

    /// Creates an organizer at the end of `parent`'s children.
    pub async fn add_organizer(
        &mut self,
        parent: Option<&RecordId>,
        title: Option<&str>,
    ) -> ServiceResult<RecordId> {
        self.require(Action::AddOrganizer)?;
        let order = self.append_position(parent)?;
        let title = title
            .and_then(normalize_title)
            .unwrap_or_else(|| DEFAULT_ORGANIZER_TITLE.to_string());

        let mut fields = Fields::new();
        fields.insert(FIELD_TITLE.to_string(), FieldValue::Text(title));
        fields.insert(FIELD_ORDER.to_string(), FieldValue::Integer(order));
        fields.insert(
            FIELD_IS_TOP_LEVEL.to_string(),
            FieldValue::Bool(parent.is_none()),
        );
        if parent.is_some() {
            fields.insert(
                FIELD_PARENT_ORGANIZER.to_string(),
                FieldValue::single_link(parent),
            );
        }

        let id = self
            .sync
            .store()
            .create_record(Table::Organizers, fields)
            .await?;
        if let Some(parent_id) = parent {
            self.expand.set_expanded(parent_id, true);
        }
        self.refresh()?;
        self.persist_expand_state()?;
        info!("event=organizer_add module=service status=ok record_id={id}");
        Ok(id)
    }

    pub async fn rename_organizer(&mut self, id: &RecordId, title: &str) -> ServiceResult<()> {
        self.require(Action::RenameOrganizer)?;
        self.require_kind(id, NodeKind::Organizer)?;
        let title = normalize_title(title).ok_or(ServiceError::InvalidTitle)?;

        let fields = Fields::from([(FIELD_TITLE.to_string(), FieldValue::Text(title))]);
        self.sync
            .store()
            .update_record(Table::Organizers, id, fields)
            .await?;
        self.refresh()
    }

    /// Creates a page at the end of `parent`'s children and selects it.
    pub async fn add_page(
        &mut self,
        parent: Option<&RecordId>,
        title: Option<&str>,
    ) -> ServiceResult<RecordId> {
        self.require(Action::AddPage)?;
        let order = self.append_position(parent)?;
        let title = title
            .and_then(normalize_title)
            .unwrap_or_else(|| DEFAULT_PAGE_TITLE.to_string());

        let mut fields = Fields::new();
        fields.insert(FIELD_TITLE.to_string(), FieldValue::Text(title));
        fields.insert(FIELD_ORDER.to_string(), FieldValue::Integer(order));
        fields.insert(
            FIELD_CONTENT.to_string(),
            FieldValue::Text(DEFAULT_PAGE_CONTENT.to_string()),
        );
        if parent.is_some() {
            fields.insert(FIELD_ORGANIZER.to_string(), FieldValue::single_link(parent));
        }

        let id = self.sync.store().create_record(Table::Pages, fields).await?;
        if let Some(parent_id) = parent {
            self.expand.set_expanded(parent_id, true);
        }
        self.refresh()?;
        self.persist_expand_state()?;
        self.select_page(&id)?;
        info!("event=page_add module=service status=ok record_id={id}");
        Ok(id)
    }

    /// Selects a page and switches the detail pane to it.
    pub fn select_page(&mut self, id: &RecordId) -> ServiceResult<()> {
        self.require_kind(id, NodeKind::Page)?;
        self.local.set_selected_page(id)?;
        self.selected_page = Some(id.clone());
        self.set_detail_mode(DetailMode::Page)
    }

    pub fn set_detail_mode(&mut self, mode: DetailMode) -> ServiceResult<()> {
        self.local.set_detail_mode(mode)?;
        self.detail_mode = mode;
        Ok(())
    }

    pub async fn delete_page(&mut self, id: &RecordId) -> ServiceResult<()> {
        self.require(Action::DeletePage)?;
        self.require_kind(id, NodeKind::Page)?;

        self.sync.discard_edits(id);
        self.sync.store().delete_record(Table::Pages, id).await?;
        self.refresh()?;
        info!("event=page_delete module=service status=ok record_id={id}");
        Ok(())
    }

    /// Queues a debounced field edit for a page.
    pub fn edit_page(&mut self, id: &RecordId, fields: Fields, now: Instant) -> ServiceResult<()> {
        self.require(Action::EditPage)?;
        self.require_kind(id, NodeKind::Page)?;
        self.sync.queue_edit(Table::Pages, id.clone(), fields, now);
        Ok(())
    }

    /// Writes every queued edit now.
    pub async fn flush_edits(&mut self) -> ServiceResult<EditFlush> {
        let flush = self.sync.flush_all_edits().await;
        if !flush.written.is_empty() {
            self.refresh()?;
        }
        Ok(flush)
    }

    /// Moves a node under `parent` (`None` = top level) at `index`.
    ///
    /// A moved page is selected once any part of the move was written.
    pub async fn move_node(
        &mut self,
        id: &RecordId,
        parent: Option<&RecordId>,
        index: usize,
    ) -> ServiceResult<MoveOutcome> {
        self.require(Action::MoveNode)?;

        let plan = match self.sync.plan(id, parent, index) {
            Ok(plan) => plan,
            Err(MoveError::NotFound(missing)) => {
                info!(
                    "event=node_move module=service status=skipped record_id={id} missing={missing}"
                );
                return Ok(MoveOutcome::Skipped);
            }
            Err(err) => {
                warn!("event=node_move module=service status=rejected record_id={id} error={err}");
                return Ok(MoveOutcome::Rejected(err));
            }
        };
        if plan.is_empty() {
            return Ok(MoveOutcome::Unchanged);
        }
        let moved_page = self
            .forest()
            .node(id)
            .is_some_and(|node| node.kind == NodeKind::Page);

        let outcome = match self.sync.apply_plan(&plan).await {
            Ok(()) => {
                self.refresh()?;
                MoveOutcome::Applied {
                    updates: plan.len(),
                }
            }
            Err(SyncError::PartialWrite(partial)) => {
                let notice = MoveNotice {
                    moved: plan.moved.clone(),
                    applied: partial.succeeded.len(),
                    failed: partial.failed_ids().into_iter().cloned().collect(),
                };
                warn!("event=node_move module=service status=partial notice={notice}");
                MoveOutcome::PartiallyApplied(notice)
            }
            Err(err) => return Err(err.into()),
        };

        // A dropped page becomes the selected page.
        if moved_page {
            self.select_page(id)?;
        }
        Ok(outcome)
    }

    /// Flips an organizer's expand state and persists it.
    pub fn toggle_organizer(&mut self, id: &RecordId) -> ServiceResult<bool> {
        self.require_kind(id, NodeKind::Organizer)?;
        let expanded = self.expand.toggle(id);
        self.persist_expand_state()?;
        Ok(expanded)
    }

    /// Runs the debounced rebuild and writes due edits.
    pub async fn poll(&mut self, now: Instant) -> ServiceResult<PollReport> {
        let rebuilt = self.sync.poll(now)?;
        if rebuilt {
            self.reconcile_selection()?;
        }
        let edits = self.sync.flush_due_edits(now).await;
        Ok(PollReport { rebuilt, edits })
    }

    fn require(&self, action: Action) -> ServiceResult<()> {
        if self.availability().allows(action) {
            Ok(())
        } else {
            warn!("event=action_check module=service status=denied action={action}");
            Err(ServiceError::ActionUnavailable(action))
        }
    }

    fn require_kind(&self, id: &RecordId, kind: NodeKind) -> ServiceResult<()> {
        let forest = self.forest();
        let node = forest
            .node(id)
            .ok_or_else(|| ServiceError::NodeNotFound(id.clone()))?;
        match (kind, node.kind) {
            (NodeKind::Organizer, NodeKind::Page) => Err(ServiceError::NotAnOrganizer(id.clone())),
            (NodeKind::Page, NodeKind::Organizer) => Err(ServiceError::NotAPage(id.clone())),
            _ => Ok(()),
        }
    }

    fn append_position(&self, parent: Option<&RecordId>) -> ServiceResult<i64> {
        if let Some(parent_id) = parent {
            self.require_kind(parent_id, NodeKind::Organizer)?;
        }
        let forest = self.forest();
        let count = forest.children(parent).map_or(0, <[RecordId]>::len);
        Ok(count as i64)
    }

    fn refresh(&mut self) -> ServiceResult<()> {
        self.sync.hydrate()?;
        self.reconcile_selection()
    }

    fn reconcile_selection(&mut self) -> ServiceResult<()> {
        let Some(selected) = self.selected_page.clone() else {
            return Ok(());
        };
        let still_page = self
            .forest()
            .node(&selected)
            .is_some_and(|node| node.kind == NodeKind::Page);
        if !still_page {
            self.selected_page = None;
            self.local.clear_selected_page()?;
            info!("event=selection_clear module=service status=ok record_id={selected}");
        }
        Ok(())
    }

    fn persist_expand_state(&self) -> ServiceResult<()> {
        let visible = self.expand.visible_in(&self.forest());
        self.local.set_expanded_organizers(&visible)?;
        Ok(())
    }
}
