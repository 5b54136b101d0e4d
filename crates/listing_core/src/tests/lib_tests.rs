use super::*;
use serde_json::json;
use shared::{
    domain::{TestStatus, UserId},
    error::ErrorCode,
    protocol::OsRelease,
};
use tokio::sync::oneshot;

type GateOutcome = std::result::Result<(), String>;

struct TestMachineStore {
    selected: Mutex<HashSet<SystemId>>,
    performed: Mutex<Vec<(SystemId, Action, Value)>>,
    power_checks: Mutex<Vec<SystemId>>,
    fail_with: Mutex<Option<String>>,
    gated: bool,
    gates: Mutex<Vec<(Value, oneshot::Sender<GateOutcome>)>>,
}

impl TestMachineStore {
    fn new() -> Self {
        Self {
            selected: Mutex::new(HashSet::new()),
            performed: Mutex::new(Vec::new()),
            power_checks: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
            gated: false,
            gates: Mutex::new(Vec::new()),
        }
    }

    fn failing(message: impl Into<String>) -> Self {
        let store = Self::new();
        *store.fail_with.try_lock().expect("fresh store") = Some(message.into());
        store
    }

    /// Every action call blocks until the test releases its gate, matched
    /// by the extras payload the dispatch carried.
    fn gated() -> Self {
        let mut store = Self::new();
        store.gated = true;
        store
    }

    async fn set_fail(&self, message: Option<String>) {
        *self.fail_with.lock().await = message;
    }

    async fn wait_for_gates(&self, count: usize) {
        for _ in 0..200 {
            if self.gates.lock().await.len() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("gated store never saw {count} in-flight actions");
    }

    async fn release_gate(&self, marker: &Value, outcome: GateOutcome) {
        let mut gates = self.gates.lock().await;
        let position = gates
            .iter()
            .position(|(extras, _)| extras == marker)
            .expect("gate for marker");
        let (_, gate) = gates.remove(position);
        let _ = gate.send(outcome);
    }

    async fn outcome(&self) -> Result<()> {
        match self.fail_with.lock().await.clone() {
            Some(message) => Err(ApiException::new(ErrorCode::Timeout, message).into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MachineStore for TestMachineStore {
    async fn select_item(&self, system_id: &SystemId) -> Result<()> {
        if let Some(message) = self.fail_with.lock().await.clone() {
            return Err(anyhow!(message));
        }
        self.selected.lock().await.insert(system_id.clone());
        Ok(())
    }

    async fn unselect_item(&self, system_id: &SystemId) -> Result<()> {
        if let Some(message) = self.fail_with.lock().await.clone() {
            return Err(anyhow!(message));
        }
        self.selected.lock().await.remove(system_id);
        Ok(())
    }

    async fn is_selected(&self, system_id: &SystemId) -> bool {
        self.selected.lock().await.contains(system_id)
    }

    async fn perform_action(&self, machine: &Machine, action: Action, extras: Value) -> Result<()> {
        self.performed
            .lock()
            .await
            .push((machine.system_id.clone(), action, extras.clone()));

        if self.gated {
            let (gate, release) = oneshot::channel::<GateOutcome>();
            self.gates.lock().await.push((extras, gate));
            return match release.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(message)) => Err(ApiException::new(ErrorCode::Conflict, message).into()),
                Err(_) => Err(anyhow!("gate dropped")),
            };
        }

        self.outcome().await
    }

    async fn check_power_state(&self, machine: &Machine) -> Result<PowerState> {
        self.power_checks.lock().await.push(machine.system_id.clone());
        self.outcome().await.map(|_| PowerState::On)
    }
}

struct TestUserStore {
    user: Option<User>,
}

#[async_trait]
impl UserStore for TestUserStore {
    async fn current_authenticated_user(&self) -> Option<User> {
        self.user.clone()
    }
}

struct TestNotificationStore {
    created: Mutex<Vec<Notification>>,
    fail_with: Option<String>,
}

impl TestNotificationStore {
    fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }
}

#[async_trait]
impl NotificationStore for TestNotificationStore {
    async fn create_notification(&self, notification: Notification) -> Result<()> {
        if let Some(message) = &self.fail_with {
            return Err(anyhow!(message.clone()));
        }
        self.created.lock().await.push(notification);
        Ok(())
    }
}

struct TestDataStore {
    os_info: OsInfo,
    actions: Vec<ActionDescriptor>,
}

impl TestDataStore {
    fn new() -> Self {
        Self {
            os_info: OsInfo {
                releases: vec![OsRelease::new(
                    "ubuntu/bionic",
                    "Ubuntu 18.04 LTS \"Bionic Beaver\"",
                )],
            },
            actions: vec![
                ActionDescriptor {
                    name: "deploy".into(),
                    title: "Deploy".into(),
                },
                ActionDescriptor {
                    name: "check".into(),
                    title: "Check power".into(),
                },
            ],
        }
    }
}

#[async_trait]
impl DataStore for TestDataStore {
    async fn os_info(&self) -> Result<OsInfo> {
        Ok(self.os_info.clone())
    }

    async fn machine_actions(&self) -> Result<Vec<ActionDescriptor>> {
        Ok(self.actions.clone())
    }
}

fn machine(id: &str) -> Machine {
    Machine {
        system_id: SystemId::new(id),
        fqdn: format!("{id}.maas"),
        architecture: "amd64/generic".into(),
        status: "Ready".into(),
        status_code: 4,
        testing_status: TestStatus::NOT_RUN,
        other_test_status: TestStatus::NOT_RUN,
        power_state: PowerState::Off,
        osystem: "ubuntu".into(),
        distro_series: "bionic".into(),
        cpu_count: 4,
        memory: 8.0,
        storage: 500.0,
        owner: None,
        zone: "default".into(),
        pool: "default".into(),
        actions: vec![Action::Deploy, Action::On, Action::Off, Action::Check],
    }
}

struct Harness {
    controller: Arc<MachineListController>,
    store: Arc<TestMachineStore>,
    notifications: Arc<TestNotificationStore>,
}

fn harness(store: TestMachineStore, user: Option<User>) -> Harness {
    let store = Arc::new(store);
    let notifications = Arc::new(TestNotificationStore::new());
    let controller = MachineListController::new_with_dependencies(
        Arc::clone(&store) as Arc<dyn MachineStore>,
        Arc::new(TestUserStore { user }),
        Arc::clone(&notifications) as Arc<dyn NotificationStore>,
        Arc::new(TestDataStore::new()),
    );
    Harness {
        controller,
        store,
        notifications,
    }
}

fn operator() -> Option<User> {
    Some(User {
        id: UserId(7),
        username: "admin".into(),
    })
}

async fn seed(harness: &Harness, machines: Vec<Machine>) {
    let filtered: Vec<SystemId> = machines.iter().map(|m| m.system_id.clone()).collect();
    harness.controller.sync_machines(machines).await;
    harness.controller.set_filter(filtered).await;
}

#[tokio::test]
async fn all_checked_tracks_the_filtered_subset() {
    let h = harness(TestMachineStore::new(), operator());
    seed(&h, vec![machine("a"), machine("b"), machine("c")]).await;

    assert!(!h.controller.table_state().await.all_checked);

    for id in ["a", "b", "c"] {
        h.controller.toggle_selected(&SystemId::new(id)).await;
    }
    assert!(h.controller.table_state().await.all_checked);

    // Deselecting a single member flips the aggregate back off.
    h.controller.toggle_selected(&SystemId::new("b")).await;
    assert!(!h.controller.table_state().await.all_checked);
    assert!(h.controller.row(&SystemId::new("a")).await.selected);
}

#[tokio::test]
async fn all_checked_is_false_for_an_empty_subset() {
    let h = harness(TestMachineStore::new(), operator());
    seed(&h, vec![machine("a")]).await;
    h.controller.toggle_selected(&SystemId::new("a")).await;

    h.controller.set_filter(Vec::new()).await;
    assert!(!h.controller.table_state().await.all_checked);
}

#[tokio::test]
async fn toggle_all_twice_restores_the_original_selection() {
    let h = harness(TestMachineStore::new(), operator());
    seed(&h, vec![machine("a"), machine("b")]).await;

    h.controller.toggle_all_selected().await;
    assert!(h.controller.table_state().await.all_checked);
    assert!(h.store.is_selected(&SystemId::new("a")).await);
    assert!(h.store.is_selected(&SystemId::new("b")).await);

    h.controller.toggle_all_selected().await;
    assert!(!h.controller.table_state().await.all_checked);
    assert!(!h.store.is_selected(&SystemId::new("a")).await);
    assert!(!h.store.is_selected(&SystemId::new("b")).await);
}

#[tokio::test]
async fn toggle_all_emits_check_all_event() {
    let h = harness(TestMachineStore::new(), operator());
    seed(&h, vec![machine("a")]).await;

    let mut events = h.controller.subscribe_events();
    h.controller.toggle_all_selected().await;

    assert_eq!(
        events.recv().await.expect("event"),
        ListingEvent::SelectionChanged
    );
    assert_eq!(
        events.recv().await.expect("event"),
        ListingEvent::CheckAllUpdated { checked: true }
    );
}

#[tokio::test]
async fn selection_toggles_emit_selection_changed() {
    let h = harness(TestMachineStore::new(), operator());
    seed(&h, vec![machine("a")]).await;

    let mut events = h.controller.subscribe_events();
    h.controller.toggle_selected(&SystemId::new("a")).await;
    assert_eq!(
        events.recv().await.expect("event"),
        ListingEvent::SelectionChanged
    );
}

#[tokio::test]
async fn sync_machines_mirrors_store_selection() {
    let store = TestMachineStore::new();
    store
        .selected
        .try_lock()
        .expect("fresh store")
        .insert(SystemId::new("a"));

    let h = harness(store, operator());
    seed(&h, vec![machine("a")]).await;

    assert!(h.controller.row(&SystemId::new("a")).await.selected);
    assert!(h.controller.table_state().await.all_checked);
}

#[tokio::test]
async fn failed_action_records_flags_and_notifies_the_operator() {
    let h = harness(TestMachineStore::failing("timeout"), operator());
    seed(&h, vec![machine("a")]).await;

    let id = SystemId::new("a");
    let handle = h
        .controller
        .perform_action(&id, Action::Deploy, None)
        .await
        .expect("dispatch");
    handle.await.expect("completion task");

    let row = h.controller.row(&id).await;
    assert!(row.action_failed);
    assert!(!row.in_transition(Action::Deploy));

    let created = h.notifications.created.lock().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].message, "Unable to deploy machine: timeout");
    assert_eq!(created[0].category, NotificationCategory::Error);
    assert_eq!(created[0].user, UserId(7));
}

#[tokio::test]
async fn failed_action_without_a_user_only_logs() {
    let h = harness(TestMachineStore::failing("timeout"), None);
    seed(&h, vec![machine("a")]).await;

    let id = SystemId::new("a");
    let handle = h
        .controller
        .perform_action(&id, Action::Deploy, None)
        .await
        .expect("dispatch");
    handle.await.expect("completion task");

    assert!(h.controller.row(&id).await.action_failed);
    assert!(h.notifications.created.lock().await.is_empty());
}

#[tokio::test]
async fn successful_action_leaves_the_named_transition_flag_set() {
    let h = harness(TestMachineStore::new(), operator());
    seed(&h, vec![machine("a")]).await;

    let id = SystemId::new("a");
    let handle = h
        .controller
        .perform_action(&id, Action::Commission, None)
        .await
        .expect("dispatch");
    handle.await.expect("completion task");

    let row = h.controller.row(&id).await;
    assert!(!row.action_failed);
    assert!(row.in_transition(Action::Commission));
}

#[tokio::test]
async fn power_action_failure_clears_the_power_transition_flag() {
    let h = harness(TestMachineStore::failing("bmc unreachable"), operator());
    seed(&h, vec![machine("a")]).await;

    let id = SystemId::new("a");
    let handle = h
        .controller
        .perform_action(&id, Action::On, None)
        .await
        .expect("dispatch");
    handle.await.expect("completion task");

    let row = h.controller.row(&id).await;
    assert!(row.action_failed);
    assert!(!row.power_transition);

    let created = h.notifications.created.lock().await;
    assert_eq!(
        created[0].message,
        "Unable to power on machine: bmc unreachable"
    );
}

#[tokio::test]
async fn check_routes_to_the_power_probe_and_resets_action_failed() {
    let h = harness(TestMachineStore::failing("bmc unreachable"), operator());
    seed(&h, vec![machine("a")]).await;

    let id = SystemId::new("a");
    let handle = h
        .controller
        .perform_action(&id, Action::Off, None)
        .await
        .expect("dispatch");
    handle.await.expect("completion task");
    assert!(h.controller.row(&id).await.action_failed);

    h.store.set_fail(None).await;
    let handle = h
        .controller
        .perform_action(&id, Action::Check, None)
        .await
        .expect("dispatch");
    handle.await.expect("completion task");

    let row = h.controller.row(&id).await;
    assert!(!row.action_failed);
    // The probe's pending flag waits for the watcher, like any power action.
    assert!(row.power_transition);
    assert_eq!(*h.store.power_checks.lock().await, vec![id]);
}

#[tokio::test]
async fn observed_power_change_clears_the_pending_transition() {
    let h = harness(TestMachineStore::new(), operator());
    seed(&h, vec![machine("a")]).await;

    let id = SystemId::new("a");
    let handle = h
        .controller
        .perform_action(&id, Action::On, None)
        .await
        .expect("dispatch");
    handle.await.expect("completion task");
    assert!(h.controller.row(&id).await.power_transition);

    let mut powered = machine("a");
    powered.power_state = PowerState::On;
    h.controller.sync_machines(vec![powered]).await;

    assert!(!h.controller.row(&id).await.power_transition);
}

#[tokio::test]
async fn stale_completion_does_not_overwrite_a_newer_dispatch() {
    let h = harness(TestMachineStore::gated(), operator());
    seed(&h, vec![machine("a")]).await;

    let id = SystemId::new("a");
    let first = h
        .controller
        .perform_action(&id, Action::Deploy, Some(json!({ "run": 1 })))
        .await
        .expect("dispatch");
    let second = h
        .controller
        .perform_action(&id, Action::Deploy, Some(json!({ "run": 2 })))
        .await
        .expect("dispatch");
    h.store.wait_for_gates(2).await;

    // The newer dispatch fails; its completion is authoritative.
    h.store
        .release_gate(&json!({ "run": 2 }), Err("node is locked".into()))
        .await;
    second.await.expect("completion task");

    let row = h.controller.row(&id).await;
    assert!(row.action_failed);
    assert!(!row.in_transition(Action::Deploy));

    // The superseded dispatch resolves late with success and is dropped.
    h.store.release_gate(&json!({ "run": 1 }), Ok(())).await;
    first.await.expect("completion task");

    let row = h.controller.row(&id).await;
    assert!(row.action_failed);
    assert!(!row.in_transition(Action::Deploy));
}

#[tokio::test]
async fn dispatch_defaults_extras_to_an_empty_object() {
    let h = harness(TestMachineStore::new(), operator());
    seed(&h, vec![machine("a")]).await;

    let id = SystemId::new("a");
    let handle = h
        .controller
        .perform_action(&id, Action::Release, None)
        .await
        .expect("dispatch");
    handle.await.expect("completion task");

    let handle = h
        .controller
        .perform_action(&id, Action::Deploy, Some(json!({ "osystem": "ubuntu" })))
        .await
        .expect("dispatch");
    handle.await.expect("completion task");

    let performed = h.store.performed.lock().await;
    assert_eq!(performed[0].2, json!({}));
    assert_eq!(performed[1].2, json!({ "osystem": "ubuntu" }));
}

#[tokio::test]
async fn dispatch_on_an_unknown_machine_is_rejected() {
    let h = harness(TestMachineStore::new(), operator());

    let err = h
        .controller
        .perform_action(&SystemId::new("ghost"), Action::Deploy, None)
        .await
        .expect_err("unknown machine");
    assert!(err.to_string().contains("unknown machine ghost"));
}

#[tokio::test]
async fn dispatch_closes_the_open_action_menu() {
    let h = harness(TestMachineStore::new(), operator());
    seed(&h, vec![machine("a")]).await;

    h.controller.toggle_menu("a-actions").await;
    let handle = h
        .controller
        .perform_action(&SystemId::new("a"), Action::Deploy, None)
        .await
        .expect("dispatch");
    handle.await.expect("completion task");

    assert_eq!(h.controller.open_menu().await, None);
}

#[tokio::test]
async fn one_menu_open_at_a_time() {
    let h = harness(TestMachineStore::new(), operator());

    h.controller.toggle_menu("a-actions").await;
    h.controller.toggle_menu("a-actions").await;
    assert_eq!(h.controller.open_menu().await, None);

    h.controller.toggle_menu("a-actions").await;
    h.controller.toggle_menu("b-actions").await;
    assert_eq!(h.controller.open_menu().await, Some("b-actions".into()));
}

#[tokio::test]
async fn click_stream_dismisses_menus_on_outside_clicks_only() {
    let h = harness(TestMachineStore::new(), operator());
    let (clicks, _) = broadcast::channel(8);

    h.controller.toggle_menu("a-actions").await;
    let listener = h.controller.attach_click_stream(clicks.subscribe());

    clicks
        .send(ClickOrigin::MenuTrigger)
        .expect("subscribed listener");
    clicks.send(ClickOrigin::Outside).expect("subscribed listener");
    drop(clicks);
    listener.await.expect("listener task");

    assert_eq!(h.controller.open_menu().await, None);
}

#[tokio::test]
async fn sort_column_selection_flips_and_resets_direction() {
    let h = harness(TestMachineStore::new(), operator());
    let mut small = machine("a");
    small.memory = 4.0;
    let mut large = machine("b");
    large.memory = 16.0;
    seed(&h, vec![large, small]).await;

    h.controller.select_sort_column(SortColumn::Memory).await;
    let ordered: Vec<String> = h
        .controller
        .sorted_filtered()
        .await
        .into_iter()
        .map(|m| m.fqdn)
        .collect();
    assert_eq!(ordered, vec!["a.maas".to_string(), "b.maas".to_string()]);

    h.controller.select_sort_column(SortColumn::Memory).await;
    assert!(h.controller.table_state().await.sort.reverse);
    let ordered: Vec<String> = h
        .controller
        .sorted_filtered()
        .await
        .into_iter()
        .map(|m| m.fqdn)
        .collect();
    assert_eq!(ordered, vec!["b.maas".to_string(), "a.maas".to_string()]);

    h.controller.select_sort_column(SortColumn::Storage).await;
    let sort = h.controller.table_state().await.sort;
    assert_eq!(sort.column, SortColumn::Storage);
    assert!(!sort.reverse);
}

#[tokio::test]
async fn catalogs_feed_status_labels_and_action_titles() {
    let h = harness(TestMachineStore::new(), operator());
    h.controller.refresh_catalogs().await;

    let mut deployed = machine("a");
    deployed.status = "Deployed".into();
    deployed.status_code = 6;
    seed(&h, vec![deployed]).await;

    assert_eq!(
        h.controller.status_label(&SystemId::new("a")).await,
        Some("Ubuntu 18.04 LTS".to_string())
    );
    assert_eq!(
        h.controller.action_title("deploy").await,
        Some("Deploy".to_string())
    );
    assert_eq!(h.controller.action_title("destroy").await, None);
}

#[tokio::test]
async fn missing_data_store_degrades_labels_to_raw_keys() {
    let store = Arc::new(TestMachineStore::new());
    let controller = MachineListController::new_with_dependencies(
        Arc::clone(&store) as Arc<dyn MachineStore>,
        Arc::new(MissingUserStore),
        Arc::new(MissingNotificationStore),
        Arc::new(MissingDataStore),
    );
    controller.refresh_catalogs().await;

    let mut deployed = machine("a");
    deployed.status = "Deployed".into();
    deployed.status_code = 6;
    controller.sync_machines(vec![deployed]).await;

    assert_eq!(
        controller.status_label(&SystemId::new("a")).await,
        Some("ubuntu/bionic".to_string())
    );
    assert_eq!(controller.action_title("deploy").await, None);
}

#[tokio::test]
async fn machines_leaving_the_collection_drop_their_row_state() {
    let h = harness(TestMachineStore::new(), operator());
    seed(&h, vec![machine("a"), machine("b")]).await;
    h.controller.toggle_selected(&SystemId::new("b")).await;

    h.controller.sync_machines(vec![machine("a")]).await;

    let state = h.controller.table_state().await;
    assert_eq!(state.machine_count, 1);
    assert_eq!(state.filtered, vec![SystemId::new("a")]);
    assert!(!h.controller.row(&SystemId::new("b")).await.selected);
}
