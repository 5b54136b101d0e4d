use std::{collections::HashSet, fs, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use listing_core::{
    status, units, DataStore, MachineListController, MachineStore, NotificationStore, SortColumn,
    UserStore,
};
use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::{Action, PowerState, SystemId, TestStatus, User, UserId},
    protocol::{ActionDescriptor, Machine, Notification, OsInfo, OsRelease},
};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod settings;

use settings::load_settings;

#[derive(Parser, Debug)]
struct Args {
    /// Show only machines whose FQDN contains this substring.
    #[arg(long)]
    filter: Option<String>,
    /// Sort column: fqdn, power, status, owner, architecture, cpu, memory,
    /// storage, zone or pool.
    #[arg(long)]
    sort: Option<String>,
    /// Dispatch a power-state check against this machine after listing.
    #[arg(long)]
    check: Option<String>,
}

/// In-process machine store backing the demo listing.
struct DemoMachineStore {
    selected: Mutex<HashSet<SystemId>>,
}

impl DemoMachineStore {
    fn new() -> Self {
        Self {
            selected: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl MachineStore for DemoMachineStore {
    async fn select_item(&self, system_id: &SystemId) -> Result<()> {
        self.selected.lock().await.insert(system_id.clone());
        Ok(())
    }

    async fn unselect_item(&self, system_id: &SystemId) -> Result<()> {
        self.selected.lock().await.remove(system_id);
        Ok(())
    }

    async fn is_selected(&self, system_id: &SystemId) -> bool {
        self.selected.lock().await.contains(system_id)
    }

    async fn perform_action(&self, machine: &Machine, action: Action, _extras: Value) -> Result<()> {
        info!(system_id = %machine.system_id, action = %action, "demo store accepted action");
        Ok(())
    }

    async fn check_power_state(&self, machine: &Machine) -> Result<PowerState> {
        Ok(machine.power_state)
    }
}

struct StaticUserStore {
    user: User,
}

#[async_trait]
impl UserStore for StaticUserStore {
    async fn current_authenticated_user(&self) -> Option<User> {
        Some(self.user.clone())
    }
}

/// Notifications land in the log; the demo has no notification backend.
struct LogNotificationStore;

#[async_trait]
impl NotificationStore for LogNotificationStore {
    async fn create_notification(&self, notification: Notification) -> Result<()> {
        tracing::warn!(
            user = notification.user.0,
            category = ?notification.category,
            "{}",
            notification.message
        );
        Ok(())
    }
}

struct DemoDataStore;

#[async_trait]
impl DataStore for DemoDataStore {
    async fn os_info(&self) -> Result<OsInfo> {
        Ok(OsInfo {
            releases: vec![
                OsRelease::new("ubuntu/bionic", "Ubuntu 18.04 LTS \"Bionic Beaver\""),
                OsRelease::new("ubuntu/focal", "Ubuntu 20.04 LTS \"Focal Fossa\""),
                OsRelease::new("centos/centos70", "CentOS 7"),
            ],
        })
    }

    async fn machine_actions(&self) -> Result<Vec<ActionDescriptor>> {
        Ok(Action::ALL
            .iter()
            .map(|action| ActionDescriptor {
                name: action.name().to_string(),
                title: menu_title(*action).to_string(),
            })
            .collect())
    }
}

fn menu_title(action: Action) -> &'static str {
    match action {
        Action::Abort => "Abort",
        Action::Acquire => "Acquire",
        Action::Check => "Check power",
        Action::Commission => "Commission",
        Action::Deploy => "Deploy",
        Action::ExitRescueMode => "Exit rescue mode",
        Action::Lock => "Lock",
        Action::MarkBroken => "Mark broken",
        Action::MarkFixed => "Mark fixed",
        Action::Off => "Power off",
        Action::On => "Power on",
        Action::OverrideFailedTesting => "Override failed testing",
        Action::Release => "Release",
        Action::RescueMode => "Rescue mode",
        Action::SetPool => "Set pool",
        Action::SetZone => "Set zone",
        Action::Test => "Test",
        Action::Unlock => "Unlock",
    }
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    machines: Vec<Machine>,
}

fn sample_fleet() -> Vec<Machine> {
    let base = |id: &str, fqdn: &str| Machine {
        system_id: SystemId::new(id),
        fqdn: fqdn.into(),
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
        actions: vec![Action::Commission, Action::Deploy, Action::On, Action::Check],
    };

    let mut deployed = base("wkq3xt", "compute-01.maas");
    deployed.status = "Deployed".into();
    deployed.status_code = 6;
    deployed.power_state = PowerState::On;
    deployed.distro_series = "focal".into();
    deployed.owner = Some("admin".into());
    deployed.cpu_count = 16;
    deployed.memory = 64.0;
    deployed.storage = 1500.0;
    deployed.actions = vec![Action::Release, Action::Off, Action::Check, Action::Lock];

    let mut deploying = base("ak7f2p", "compute-02.maas");
    deploying.status = "Deploying".into();
    deploying.status_code = 9;
    deploying.power_state = PowerState::On;
    deploying.actions = vec![Action::Abort, Action::Check];

    let mut flaky = base("x3m9rc", "storage-01.maas");
    flaky.testing_status = TestStatus(3);
    flaky.cpu_count = 8;
    flaky.memory = 32.0;
    flaky.storage = 12_000.0;

    let mut broken = base("p8d4vn", "edge-01.maas");
    broken.status = "Broken".into();
    broken.status_code = 8;
    broken.power_state = PowerState::Error;
    broken.actions = vec![Action::MarkFixed, Action::Check];

    vec![base("h6t1zq", "compute-03.maas"), deployed, deploying, flaky, broken]
}

fn row_marker(machine: &Machine) -> &'static str {
    if status::is_busy(machine) {
        "~"
    } else if status::has_failed_test_warning(machine) {
        "!"
    } else if status::has_other_status_warning(machine) {
        "?"
    } else {
        " "
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = load_settings();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let machines = match &settings.seed_file {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read seed file '{path}'"))?;
            let seed: SeedFile = toml::from_str(&raw)
                .with_context(|| format!("failed to parse seed file '{path}'"))?;
            seed.machines
        }
        None => sample_fleet(),
    };

    let controller = MachineListController::new_with_dependencies(
        Arc::new(DemoMachineStore::new()),
        Arc::new(StaticUserStore {
            user: User {
                id: UserId(1),
                username: "admin".into(),
            },
        }),
        Arc::new(LogNotificationStore),
        Arc::new(DemoDataStore),
    );

    controller.refresh_catalogs().await;
    controller.sync_machines(machines.clone()).await;

    let filtered: Vec<SystemId> = machines
        .iter()
        .filter(|machine| {
            args.filter
                .as_deref()
                .map_or(true, |needle| machine.fqdn.contains(needle))
        })
        .map(|machine| machine.system_id.clone())
        .collect();
    controller.set_filter(filtered).await;

    let sort_name = args.sort.unwrap_or_else(|| settings.sort_column.clone());
    match SortColumn::from_name(&sort_name) {
        Some(column) if column != SortColumn::Fqdn => {
            controller.select_sort_column(column).await;
        }
        Some(_) => {}
        None => tracing::warn!(column = %sort_name, "unknown sort column, keeping fqdn"),
    }

    println!(
        "  {:<18} {:<8} {:<28} {:>6} {:>10} {:>10}  {}",
        "FQDN", "POWER", "STATUS", "CPU", "MEMORY", "STORAGE", "ACTIONS"
    );
    for machine in controller.sorted_filtered().await {
        let label = controller
            .status_label(&machine.system_id)
            .await
            .unwrap_or_else(|| machine.status.clone());
        let memory = units::format_memory(machine.memory);
        let storage = units::format_storage(machine.storage);
        let actions: Vec<&str> = machine.actions.iter().map(|a| a.name()).collect();
        println!(
            "{} {:<18} {:<8} {:<28} {:>6} {:>7}{:>3} {:>8}{:>3}  {}",
            row_marker(&machine),
            machine.fqdn,
            machine.power_state,
            label,
            machine.cpu_count,
            memory.value,
            memory.unit,
            storage.value,
            storage.unit,
            actions.join(",")
        );
    }

    if let Some(check) = args.check {
        let system_id = SystemId::new(check);
        let handle = controller
            .perform_action(&system_id, Action::Check, None)
            .await?;
        handle.await?;
        let row = controller.row(&system_id).await;
        println!(
            "power check of {system_id}: failed={} pending={}",
            row.action_failed, row.power_transition
        );
    }

    Ok(())
}
