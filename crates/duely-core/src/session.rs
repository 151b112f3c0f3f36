use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::mpsc::Receiver;

use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

use crate::error::StoreError;
use crate::gateway::ItemStore;
use crate::item::{DueItem, NewDueItem, Snapshot, is_blank};
use crate::notify::{EXPIRING_TITLE, Notifier, expiring_body, fire_and_forget};
use crate::urgency::{RowStyle, Thresholds, Tier, Urgency};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Operation::Insert => "add",
            Operation::Update => "save",
            Operation::Delete => "delete",
        };
        f.write_str(verb)
    }
}

/// A write that did not go through; shown to the user, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub op: Operation,
    pub item_id: Option<u64>,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item_id {
            Some(id) => write!(f, "failed to {} item {id}: {}", self.op, self.message),
            None => write!(f, "failed to {} item: {}", self.op, self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Applied(T),
    /// The action was not available (blank name, dialog open, unknown row).
    Disabled,
    Failed,
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatePicker {
    pub selected: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddForm {
    pub name: String,
    pub due_date: NaiveDate,
    pub picker: Option<DatePicker>,
}

impl AddForm {
    fn new(today: NaiveDate) -> Self {
        Self {
            name: String::new(),
            due_date: today,
            picker: None,
        }
    }

    pub fn is_picking_date(&self) -> bool {
        self.picker.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditDraft {
    pub name: String,
    pub due_date: NaiveDate,
    pub picker: Option<DatePicker>,
}

impl EditDraft {
    fn from_item(item: &DueItem) -> Self {
        Self {
            name: item.name.clone(),
            due_date: item.due_date,
            picker: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowState {
    Viewing,
    Editing(EditDraft),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowView {
    pub item: DueItem,
    pub urgency: Urgency,
    pub style: RowStyle,
    pub editing: bool,
}

/// Transient UI state on top of an [`ItemStore`].
///
/// Rows come only from the store's snapshot stream; call [`Session::refresh`]
/// to pull the first snapshot and after anything else writes to the store.
pub struct Session<S: ItemStore, N: Notifier> {
    store: S,
    notifier: N,
    updates: Receiver<Snapshot>,
    items: Snapshot,
    today: NaiveDate,
    thresholds: Thresholds,
    form: AddForm,
    rows: BTreeMap<u64, RowState>,
    notified: BTreeSet<u64>,
    failure: Option<Failure>,
    loaded: bool,
    today_changed: bool,
}

impl<S: ItemStore, N: Notifier> Session<S, N> {
    pub fn new(store: S, notifier: N, today: NaiveDate) -> Self {
        let updates = store.observe_all();
        Self {
            store,
            notifier,
            updates,
            items: Vec::new(),
            today,
            thresholds: Thresholds::default(),
            form: AddForm::new(today),
            rows: BTreeMap::new(),
            notified: BTreeSet::new(),
            failure: None,
            loaded: false,
            today_changed: false,
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Ids that already produced a notification in an earlier session.
    pub fn with_notified(mut self, ids: BTreeSet<u64>) -> Self {
        self.notified = ids;
        self
    }

    pub fn notified(&self) -> &BTreeSet<u64> {
        &self.notified
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Moves the reference date; urgency is re-evaluated on the next refresh.
    pub fn set_today(&mut self, today: NaiveDate) {
        if self.today != today {
            self.today = today;
            self.today_changed = true;
        }
    }

    pub fn items(&self) -> &[DueItem] {
        &self.items
    }

    pub fn item(&self, id: u64) -> Option<&DueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Applies the newest pending snapshot, if any. Returns whether one arrived.
    ///
    /// Notifications are evaluated when a snapshot arrives or the reference
    /// date moved, but never before the first snapshot is in.
    #[instrument(skip(self))]
    pub fn refresh(&mut self) -> bool {
        let arrived = match self.updates.try_iter().last() {
            Some(snapshot) => {
                debug!(rows = snapshot.len(), "applying snapshot");
                self.items = snapshot;
                self.loaded = true;
                let live: BTreeSet<u64> = self.items.iter().map(|item| item.id).collect();
                self.rows.retain(|id, _| live.contains(id));
                true
            }
            None => false,
        };

        if self.loaded && (arrived || self.today_changed) {
            self.today_changed = false;
            self.evaluate_notifications();
        }
        arrived
    }

    pub fn rows(&self) -> Vec<RowView> {
        self.items
            .iter()
            .map(|item| {
                let urgency = self.thresholds.classify(self.today, item.due_date);
                RowView {
                    item: item.clone(),
                    urgency,
                    style: urgency.tier.style(),
                    editing: matches!(self.rows.get(&item.id), Some(RowState::Editing(_))),
                }
            })
            .collect()
    }

    pub fn row_state(&self, id: u64) -> RowState {
        self.rows.get(&id).cloned().unwrap_or(RowState::Viewing)
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn take_failure(&mut self) -> Option<Failure> {
        self.failure.take()
    }

    pub fn form(&self) -> &AddForm {
        &self.form
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.form.name = name.into();
    }

    pub fn open_date_picker(&mut self) {
        self.form.picker = Some(DatePicker {
            selected: self.form.due_date,
        });
    }

    pub fn pick_date(&mut self, date: NaiveDate) -> bool {
        match self.form.picker.as_mut() {
            Some(picker) => {
                picker.selected = date;
                true
            }
            None => false,
        }
    }

    pub fn confirm_date(&mut self) {
        if let Some(picker) = self.form.picker.take() {
            self.form.due_date = picker.selected;
        }
    }

    pub fn cancel_date(&mut self) {
        self.form.picker = None;
    }

    pub fn can_submit(&self) -> bool {
        !is_blank(&self.form.name) && !self.form.is_picking_date()
    }

    #[instrument(skip(self), fields(name = %self.form.name))]
    pub fn submit(&mut self) -> Outcome<DueItem> {
        if !self.can_submit() {
            debug!("add is disabled");
            return Outcome::Disabled;
        }

        let draft = NewDueItem::new(self.form.name.clone(), self.form.due_date);
        match self.store.insert(draft) {
            Ok(item) => {
                info!(id = item.id, "item added");
                self.form.name.clear();
                self.refresh();
                Outcome::Applied(item)
            }
            Err(err) => {
                self.record_failure(Operation::Insert, None, &err);
                Outcome::Failed
            }
        }
    }

    pub fn editor(&self, id: u64) -> Option<&EditDraft> {
        match self.rows.get(&id) {
            Some(RowState::Editing(draft)) => Some(draft),
            _ => None,
        }
    }

    fn editor_mut(&mut self, id: u64) -> Option<&mut EditDraft> {
        match self.rows.get_mut(&id) {
            Some(RowState::Editing(draft)) => Some(draft),
            _ => None,
        }
    }

    /// Opens the edit dialog pre-filled from the row. An already open
    /// dialog keeps its draft.
    pub fn open_editor(&mut self, id: u64) -> bool {
        if self.editor(id).is_some() {
            return true;
        }
        let Some(item) = self.item(id) else {
            debug!(id, "no such row to edit");
            return false;
        };
        let draft = EditDraft::from_item(item);
        self.rows.insert(id, RowState::Editing(draft));
        true
    }

    pub fn edit_name(&mut self, id: u64, name: impl Into<String>) -> bool {
        match self.editor_mut(id) {
            Some(draft) => {
                draft.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn open_edit_date_picker(&mut self, id: u64) -> bool {
        match self.editor_mut(id) {
            Some(draft) => {
                draft.picker = Some(DatePicker {
                    selected: draft.due_date,
                });
                true
            }
            None => false,
        }
    }

    pub fn pick_edit_date(&mut self, id: u64, date: NaiveDate) -> bool {
        match self.editor_mut(id).and_then(|draft| draft.picker.as_mut()) {
            Some(picker) => {
                picker.selected = date;
                true
            }
            None => false,
        }
    }

    pub fn confirm_edit_date(&mut self, id: u64) {
        if let Some(draft) = self.editor_mut(id)
            && let Some(picker) = draft.picker.take()
        {
            draft.due_date = picker.selected;
        }
    }

    pub fn cancel_edit_date(&mut self, id: u64) {
        if let Some(draft) = self.editor_mut(id) {
            draft.picker = None;
        }
    }

    pub fn can_save(&self, id: u64) -> bool {
        self.editor(id)
            .is_some_and(|draft| !is_blank(&draft.name) && draft.picker.is_none())
    }

    #[instrument(skip(self))]
    pub fn save(&mut self, id: u64) -> Outcome<DueItem> {
        if !self.can_save(id) {
            debug!("save is disabled");
            return Outcome::Disabled;
        }
        let Some(draft) = self.editor(id) else {
            return Outcome::Disabled;
        };

        let updated = DueItem {
            id,
            name: draft.name.clone(),
            due_date: draft.due_date,
        };
        match self.store.update(&updated) {
            Ok(()) => {
                info!("item saved");
                self.rows.remove(&id);
                self.refresh();
                Outcome::Applied(updated)
            }
            Err(err) => {
                self.record_failure(Operation::Update, Some(id), &err);
                Outcome::Failed
            }
        }
    }

    /// Closes the edit dialog and drops the draft.
    pub fn cancel_edit(&mut self, id: u64) -> bool {
        match self.rows.remove(&id) {
            Some(RowState::Editing(_)) => true,
            Some(RowState::Viewing) | None => false,
        }
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, id: u64) -> Outcome<()> {
        let Some(item) = self.item(id).cloned() else {
            debug!("no such row to delete");
            return Outcome::Disabled;
        };

        match self.store.delete(&item) {
            Ok(()) => {
                info!("item deleted");
                self.rows.remove(&id);
                self.refresh();
                Outcome::Applied(())
            }
            Err(err) => {
                self.record_failure(Operation::Delete, Some(id), &err);
                Outcome::Failed
            }
        }
    }

    fn record_failure(&mut self, op: Operation, item_id: Option<u64>, err: &StoreError) {
        warn!(%op, ?item_id, error = %err, "write failed; keeping last snapshot");
        self.failure = Some(Failure {
            op,
            item_id,
            message: err.to_string(),
        });
    }

    /// One notification per transition into NEAR.
    fn evaluate_notifications(&mut self) {
        let mut near_now = BTreeSet::new();
        for item in &self.items {
            let urgency = self.thresholds.classify(self.today, item.due_date);
            if urgency.tier != Tier::Near {
                continue;
            }
            near_now.insert(item.id);
            if !self.notified.contains(&item.id) {
                info!(
                    id = item.id,
                    days = urgency.days_until_due,
                    tier = urgency.tier.label(),
                    "item entered near tier; notifying"
                );
                fire_and_forget(&self.notifier, EXPIRING_TITLE, &expiring_body(&item.name));
            }
        }
        self.notified = near_now;
    }
}
