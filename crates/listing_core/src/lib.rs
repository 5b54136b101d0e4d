use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use shared::{
    domain::{Action, PowerState, SystemId, User},
    error::ApiException,
    protocol::{ActionDescriptor, Machine, Notification, NotificationCategory, OsInfo},
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod menu;
pub mod status;
pub mod units;
pub mod watch;

use menu::{ClickOrigin, MenuController};
use watch::PowerWatcher;

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("unknown machine {0}")]
    UnknownMachine(SystemId),
}

/// The canonical machine collection and selection set live behind this
/// trait so several views can share them; the listing core owns only the
/// decision logic for when selection changes.
#[async_trait]
pub trait MachineStore: Send + Sync {
    async fn select_item(&self, system_id: &SystemId) -> Result<()>;
    async fn unselect_item(&self, system_id: &SystemId) -> Result<()>;
    async fn is_selected(&self, system_id: &SystemId) -> bool;
    async fn perform_action(&self, machine: &Machine, action: Action, extras: Value) -> Result<()>;
    async fn check_power_state(&self, machine: &Machine) -> Result<PowerState>;
}

pub struct MissingMachineStore;

#[async_trait]
impl MachineStore for MissingMachineStore {
    async fn select_item(&self, system_id: &SystemId) -> Result<()> {
        Err(anyhow!("machine store unavailable for {system_id}"))
    }

    async fn unselect_item(&self, system_id: &SystemId) -> Result<()> {
        Err(anyhow!("machine store unavailable for {system_id}"))
    }

    async fn is_selected(&self, _system_id: &SystemId) -> bool {
        false
    }

    async fn perform_action(
        &self,
        machine: &Machine,
        _action: Action,
        _extras: Value,
    ) -> Result<()> {
        Err(anyhow!("machine store unavailable for {}", machine.system_id))
    }

    async fn check_power_state(&self, machine: &Machine) -> Result<PowerState> {
        Err(anyhow!("machine store unavailable for {}", machine.system_id))
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn current_authenticated_user(&self) -> Option<User>;
}

pub struct MissingUserStore;

#[async_trait]
impl UserStore for MissingUserStore {
    async fn current_authenticated_user(&self) -> Option<User> {
        None
    }
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, notification: Notification) -> Result<()>;
}

pub struct MissingNotificationStore;

#[async_trait]
impl NotificationStore for MissingNotificationStore {
    async fn create_notification(&self, _notification: Notification) -> Result<()> {
        Err(anyhow!("notification store unavailable"))
    }
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn os_info(&self) -> Result<OsInfo>;
    async fn machine_actions(&self) -> Result<Vec<ActionDescriptor>>;
}

pub struct MissingDataStore;

#[async_trait]
impl DataStore for MissingDataStore {
    async fn os_info(&self) -> Result<OsInfo> {
        Err(anyhow!("general data store unavailable"))
    }

    async fn machine_actions(&self) -> Result<Vec<ActionDescriptor>> {
        Err(anyhow!("general data store unavailable"))
    }
}

/// Outbound notifications to the rendering shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingEvent {
    /// Selection or the listing itself changed; dependent views should
    /// re-read their projections.
    SelectionChanged,
    /// A select-all/deselect-all pass ran over the filtered subset.
    CheckAllUpdated { checked: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Fqdn,
    Power,
    Status,
    Owner,
    Architecture,
    Cpu,
    Memory,
    Storage,
    Zone,
    Pool,
}

impl SortColumn {
    pub fn from_name(name: &str) -> Option<Self> {
        let column = match name {
            "fqdn" => Self::Fqdn,
            "power" => Self::Power,
            "status" => Self::Status,
            "owner" => Self::Owner,
            "architecture" => Self::Architecture,
            "cpu" => Self::Cpu,
            "memory" => Self::Memory,
            "storage" => Self::Storage,
            "zone" => Self::Zone,
            "pool" => Self::Pool,
            _ => return None,
        };
        Some(column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub column: SortColumn,
    pub reverse: bool,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self {
            column: SortColumn::Fqdn,
            reverse: false,
        }
    }
}

/// Ephemeral per-row flags owned by the listing core.
#[derive(Debug, Clone, Default)]
pub struct RowState {
    pub selected: bool,
    /// Shared pending flag for the power actions (on/off/check); cleared by
    /// a failed dispatch or an observed power-state change.
    pub power_transition: bool,
    /// Named pending flags for the remaining actions. A successful dispatch
    /// leaves its flag set; only failure clears it.
    pub transitions: HashSet<Action>,
    pub action_failed: bool,
}

impl RowState {
    pub fn in_transition(&self, action: Action) -> bool {
        if action.is_power_action() {
            self.power_transition
        } else {
            self.transitions.contains(&action)
        }
    }
}

/// Read-only snapshot of the table chrome for the rendering layer.
#[derive(Debug, Clone)]
pub struct TableViewState {
    pub sort: SortOrder,
    pub all_checked: bool,
    pub machine_count: usize,
    pub filtered: Vec<SystemId>,
}

struct ListState {
    machines: Vec<Machine>,
    filtered: Vec<SystemId>,
    rows: HashMap<SystemId, RowState>,
    sort: SortOrder,
    all_checked: bool,
    menu: MenuController,
    watcher: PowerWatcher,
    request_tokens: HashMap<SystemId, u64>,
    os_info: OsInfo,
    action_catalog: Vec<ActionDescriptor>,
}

impl ListState {
    fn row_mut(&mut self, system_id: &SystemId) -> &mut RowState {
        self.rows.entry(system_id.clone()).or_default()
    }

    /// All-checked is true iff the filtered subset is non-empty and every
    /// member is selected; stops at the first unselected member.
    fn recompute_all_checked(&mut self) -> bool {
        let checked = !self.filtered.is_empty()
            && self
                .filtered
                .iter()
                .all(|id| self.rows.get(id).map(|row| row.selected).unwrap_or(false));
        self.all_checked = checked;
        checked
    }

    fn next_request_token(&mut self, system_id: &SystemId) -> u64 {
        let token = self.request_tokens.entry(system_id.clone()).or_insert(0);
        *token += 1;
        *token
    }
}

pub struct MachineListController {
    machine_store: Arc<dyn MachineStore>,
    user_store: Arc<dyn UserStore>,
    notification_store: Arc<dyn NotificationStore>,
    data_store: Arc<dyn DataStore>,
    inner: Mutex<ListState>,
    events: broadcast::Sender<ListingEvent>,
}

impl MachineListController {
    pub fn new() -> Arc<Self> {
        Self::new_with_dependencies(
            Arc::new(MissingMachineStore),
            Arc::new(MissingUserStore),
            Arc::new(MissingNotificationStore),
            Arc::new(MissingDataStore),
        )
    }

    pub fn new_with_dependencies(
        machine_store: Arc<dyn MachineStore>,
        user_store: Arc<dyn UserStore>,
        notification_store: Arc<dyn NotificationStore>,
        data_store: Arc<dyn DataStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            machine_store,
            user_store,
            notification_store,
            data_store,
            inner: Mutex::new(ListState {
                machines: Vec::new(),
                filtered: Vec::new(),
                rows: HashMap::new(),
                sort: SortOrder::default(),
                all_checked: false,
                menu: MenuController::new(),
                watcher: PowerWatcher::new(),
                request_tokens: HashMap::new(),
                os_info: OsInfo::default(),
                action_catalog: Vec::new(),
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ListingEvent> {
        self.events.subscribe()
    }

    /// Pulls the OS release table and the action catalogue from the general
    /// data store. Either being unavailable degrades the derived labels, not
    /// the listing.
    pub async fn refresh_catalogs(&self) {
        let os_info = match self.data_store.os_info().await {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %err, "os info unavailable, release titles fall back to raw keys");
                OsInfo::default()
            }
        };
        let action_catalog = match self.data_store.machine_actions().await {
            Ok(catalog) => catalog,
            Err(err) => {
                warn!(error = %err, "machine action catalogue unavailable");
                Vec::new()
            }
        };

        let mut guard = self.inner.lock().await;
        guard.os_info = os_info;
        guard.action_catalog = action_catalog;
    }

    /// Replaces the machine collection with a fresh snapshot from the
    /// region store. Power-state changes observed here clear the pending
    /// power-transition flag of the affected machines, reconciling
    /// optimistic flags against authoritative state.
    pub async fn sync_machines(&self, machines: Vec<Machine>) {
        let mut selected = HashMap::with_capacity(machines.len());
        for machine in &machines {
            let is_selected = self.machine_store.is_selected(&machine.system_id).await;
            selected.insert(machine.system_id.clone(), is_selected);
        }

        {
            let mut guard = self.inner.lock().await;
            for system_id in guard.watcher.observe(&machines) {
                debug!(%system_id, "power state moved, clearing pending power transition");
                guard.row_mut(&system_id).power_transition = false;
            }

            guard.rows.retain(|id, _| selected.contains_key(id));
            guard.request_tokens.retain(|id, _| selected.contains_key(id));
            guard.filtered.retain(|id| selected.contains_key(id));
            for (system_id, is_selected) in &selected {
                guard.row_mut(system_id).selected = *is_selected;
            }

            guard.machines = machines;
            guard.recompute_all_checked();
        }
        let _ = self.events.send(ListingEvent::SelectionChanged);
    }

    /// Sets the filtered (visible) subset, as computed by the search layer.
    pub async fn set_filter(&self, filtered: Vec<SystemId>) {
        {
            let mut guard = self.inner.lock().await;
            guard.filtered = filtered;
            guard.recompute_all_checked();
        }
        let _ = self.events.send(ListingEvent::SelectionChanged);
    }

    pub async fn toggle_selected(&self, system_id: &SystemId) {
        let selected = self.machine_store.is_selected(system_id).await;
        let outcome = if selected {
            self.machine_store.unselect_item(system_id).await
        } else {
            self.machine_store.select_item(system_id).await
        };
        if let Err(err) = outcome {
            warn!(%system_id, error = %err, "selection change rejected by machine store");
            return;
        }

        {
            let mut guard = self.inner.lock().await;
            guard.row_mut(system_id).selected = !selected;
            guard.recompute_all_checked();
        }
        let _ = self.events.send(ListingEvent::SelectionChanged);
    }

    /// Selects every machine in the filtered subset, or deselects them all
    /// if the subset was already fully selected.
    pub async fn toggle_all_selected(&self) {
        let (ids, target) = {
            let guard = self.inner.lock().await;
            (guard.filtered.clone(), !guard.all_checked)
        };

        let mut flipped = Vec::with_capacity(ids.len());
        for system_id in &ids {
            let outcome = if target {
                self.machine_store.select_item(system_id).await
            } else {
                self.machine_store.unselect_item(system_id).await
            };
            match outcome {
                Ok(()) => flipped.push(system_id.clone()),
                Err(err) => {
                    warn!(%system_id, error = %err, "selection change rejected by machine store")
                }
            }
        }

        let checked = {
            let mut guard = self.inner.lock().await;
            for system_id in &flipped {
                guard.row_mut(system_id).selected = target;
            }
            guard.recompute_all_checked()
        };
        let _ = self.events.send(ListingEvent::SelectionChanged);
        let _ = self.events.send(ListingEvent::CheckAllUpdated { checked });
    }

    /// Clicking the active sort column flips the direction; clicking a new
    /// column sorts ascending by it.
    pub async fn select_sort_column(&self, column: SortColumn) {
        let mut guard = self.inner.lock().await;
        if guard.sort.column == column {
            guard.sort.reverse = !guard.sort.reverse;
        } else {
            guard.sort = SortOrder {
                column,
                reverse: false,
            };
        }
    }

    /// Dispatches a lifecycle action. The transition flag is set before the
    /// store call starts; the returned handle resolves once the completion
    /// has been applied. Completions carry a per-machine request token so a
    /// superseded dispatch cannot overwrite the flags of a newer one.
    pub async fn perform_action(
        self: &Arc<Self>,
        system_id: &SystemId,
        action: Action,
        extras: Option<Value>,
    ) -> Result<JoinHandle<()>> {
        let (machine, token) = {
            let mut guard = self.inner.lock().await;
            let machine = guard
                .machines
                .iter()
                .find(|machine| &machine.system_id == system_id)
                .cloned()
                .ok_or_else(|| ListingError::UnknownMachine(system_id.clone()))?;
            guard.menu.close();
            let token = guard.next_request_token(system_id);
            let row = guard.row_mut(system_id);
            if action.is_power_action() {
                row.power_transition = true;
            } else {
                row.transitions.insert(action);
            }
            (machine, token)
        };

        let extras = extras.unwrap_or_else(|| Value::Object(Map::new()));
        info!(system_id = %machine.system_id, action = %action, "dispatching machine action");

        let controller = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let outcome = if action == Action::Check {
                controller
                    .machine_store
                    .check_power_state(&machine)
                    .await
                    .map(|_| ())
            } else {
                controller
                    .machine_store
                    .perform_action(&machine, action, extras)
                    .await
            };
            controller
                .finish_action(&machine.system_id, action, token, outcome)
                .await;
        }))
    }

    async fn finish_action(
        &self,
        system_id: &SystemId,
        action: Action,
        token: u64,
        outcome: Result<()>,
    ) {
        {
            let mut guard = self.inner.lock().await;
            if guard.request_tokens.get(system_id).copied() != Some(token) {
                debug!(%system_id, action = %action, "dropping completion of superseded action");
                return;
            }
            match &outcome {
                Ok(()) => {
                    // Flags stay set on success: named flags persist until a
                    // later event replaces them, power flags until the
                    // watcher sees the state actually change.
                    guard.row_mut(system_id).action_failed = false;
                }
                Err(_) => {
                    let row = guard.row_mut(system_id);
                    if action.is_power_action() {
                        row.power_transition = false;
                    } else {
                        row.transitions.remove(&action);
                    }
                    row.action_failed = true;
                }
            }
        }

        if let Err(err) = outcome {
            self.notify_action_failure(system_id, action, &err).await;
        }
    }

    /// Failure surface: a notification attributed to the signed-in operator,
    /// or a local log line when nobody is signed in. Never fails upward.
    async fn notify_action_failure(
        &self,
        system_id: &SystemId,
        action: Action,
        error: &anyhow::Error,
    ) {
        let message = format!("Unable to {}: {}", action.phrase(), error_text(error));
        match self.user_store.current_authenticated_user().await {
            Some(user) => {
                let notification = Notification {
                    message,
                    category: NotificationCategory::Error,
                    user: user.id,
                    created_at: Utc::now(),
                };
                if let Err(create_err) = self
                    .notification_store
                    .create_notification(notification)
                    .await
                {
                    warn!(
                        %system_id,
                        action = %action,
                        error = %create_err,
                        "failed to create action-failure notification"
                    );
                }
            }
            None => warn!(
                %system_id,
                action = %action,
                error = %error_text(error),
                "machine action failed with no authenticated user"
            ),
        }
    }

    pub async fn toggle_menu(&self, name: &str) {
        self.inner.lock().await.menu.toggle(name);
    }

    pub async fn close_menu(&self) {
        self.inner.lock().await.menu.close();
    }

    pub async fn open_menu(&self) -> Option<String> {
        self.inner.lock().await.menu.open().map(str::to_string)
    }

    pub async fn handle_click(&self, origin: ClickOrigin) {
        self.inner.lock().await.menu.handle_click(origin);
    }

    /// Subscribes to the shell-owned document click stream. Aborting the
    /// returned handle (or dropping the shell's sender) releases the
    /// subscription.
    pub fn attach_click_stream(
        self: &Arc<Self>,
        mut clicks: broadcast::Receiver<ClickOrigin>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(origin) = clicks.recv().await {
                controller.handle_click(origin).await;
            }
        })
    }

    pub async fn table_state(&self) -> TableViewState {
        let guard = self.inner.lock().await;
        TableViewState {
            sort: guard.sort,
            all_checked: guard.all_checked,
            machine_count: guard.machines.len(),
            filtered: guard.filtered.clone(),
        }
    }

    pub async fn machines(&self) -> Vec<Machine> {
        self.inner.lock().await.machines.clone()
    }

    pub async fn row(&self, system_id: &SystemId) -> RowState {
        self.inner
            .lock()
            .await
            .rows
            .get(system_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The filtered subset in display order under the active sort.
    pub async fn sorted_filtered(&self) -> Vec<Machine> {
        let guard = self.inner.lock().await;
        let mut visible: Vec<Machine> = guard
            .filtered
            .iter()
            .filter_map(|id| {
                guard
                    .machines
                    .iter()
                    .find(|machine| &machine.system_id == id)
                    .cloned()
            })
            .collect();
        let sort = guard.sort;
        visible.sort_by(|a, b| {
            let ordering = compare_machines(a, b, sort.column);
            if sort.reverse {
                ordering.reverse()
            } else {
                ordering
            }
        });
        visible
    }

    pub async fn status_label(&self, system_id: &SystemId) -> Option<String> {
        let guard = self.inner.lock().await;
        guard
            .machines
            .iter()
            .find(|machine| &machine.system_id == system_id)
            .map(|machine| status::status_label(machine, &guard.os_info))
    }

    /// Menu title for an action name, from the cached catalogue. Unknown
    /// names resolve to nothing rather than an error.
    pub async fn action_title(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .action_catalog
            .iter()
            .find(|descriptor| descriptor.name == name)
            .map(|descriptor| descriptor.title.clone())
    }
}

/// Operators see the collaborator's message, not the anyhow chain, when the
/// failure carries a typed API payload.
fn error_text(error: &anyhow::Error) -> String {
    match error.downcast_ref::<ApiException>() {
        Some(api) => api.message.clone(),
        None => error.to_string(),
    }
}

fn compare_machines(a: &Machine, b: &Machine, column: SortColumn) -> Ordering {
    let ordering = match column {
        SortColumn::Fqdn => compare_str(&a.fqdn, &b.fqdn),
        SortColumn::Power => compare_str(a.power_state.as_str(), b.power_state.as_str()),
        SortColumn::Status => compare_str(&a.status, &b.status),
        SortColumn::Owner => compare_str(
            a.owner.as_deref().unwrap_or_default(),
            b.owner.as_deref().unwrap_or_default(),
        ),
        SortColumn::Architecture => compare_str(&a.architecture, &b.architecture),
        SortColumn::Cpu => a.cpu_count.cmp(&b.cpu_count),
        SortColumn::Memory => compare_f64(a.memory, b.memory),
        SortColumn::Storage => compare_f64(a.storage, b.storage),
        SortColumn::Zone => compare_str(&a.zone, &b.zone),
        SortColumn::Pool => compare_str(&a.pool, &b.pool),
    };
    ordering.then_with(|| compare_str(&a.fqdn, &b.fqdn))
}

fn compare_str(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn compare_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
