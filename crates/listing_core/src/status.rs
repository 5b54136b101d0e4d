//! Pure status and label derivation for listing rows.

use shared::domain::MachineStatus;
use shared::protocol::{Machine, OsInfo};

/// True while the machine is in an in-progress lifecycle phase and the row
/// should show a spinner instead of warnings.
pub fn is_busy(machine: &Machine) -> bool {
    matches!(
        MachineStatus::from_code(machine.status_code),
        Some(
            MachineStatus::Commissioning
                | MachineStatus::Deploying
                | MachineStatus::Releasing
                | MachineStatus::DiskErasing
                | MachineStatus::EnteringRescueMode
                | MachineStatus::ExitingRescueMode
                | MachineStatus::Testing
        )
    )
}

/// Whether the row should carry the failed-hardware-tests warning. Early
/// lifecycle statuses already surface test results through the status
/// column, so they never warn here.
pub fn has_failed_test_warning(machine: &Machine) -> bool {
    if is_busy(machine) {
        return false;
    }
    if matches!(
        MachineStatus::from_code(machine.status_code),
        Some(
            MachineStatus::New
                | MachineStatus::Commissioning
                | MachineStatus::FailedCommissioning
                | MachineStatus::Testing
                | MachineStatus::FailedTesting
        )
    ) {
        return false;
    }
    machine.testing_status.requires_attention()
}

/// Secondary test-status indicator, shown only when the failed-test warning
/// is not already claiming the slot.
pub fn has_other_status_warning(machine: &Machine) -> bool {
    !is_busy(machine)
        && !has_failed_test_warning(machine)
        && machine.other_test_status.requires_attention()
}

/// Resolves a release key ("osystem/series") to its title. Unknown keys are
/// echoed back unchanged.
pub fn release_title(key: &str, os_info: &OsInfo) -> String {
    os_info
        .releases
        .iter()
        .find(|release| release.key == key)
        .map(|release| release.title.clone())
        .unwrap_or_else(|| key.to_string())
}

/// Status text for a row. Deployed machines show the release they run,
/// deploying machines show the release they are getting; everything else
/// echoes the raw status string.
pub fn status_label(machine: &Machine, os_info: &OsInfo) -> String {
    if machine.status != "Deploying" && machine.status != "Deployed" {
        return machine.status.clone();
    }

    let key = format!("{}/{}", machine.osystem, machine.distro_series);
    let mut title = release_title(&key, os_info);
    if machine.osystem == "ubuntu" {
        // Ubuntu titles embed a quoted codename; the listing shows only the
        // part before it.
        title = title
            .split('"')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
    }

    if machine.status == "Deploying" {
        format!("Deploying {title}")
    } else {
        title
    }
}
