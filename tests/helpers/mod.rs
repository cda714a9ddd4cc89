#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tagperm::inventory::memory::InventorySnapshot;
use tagperm::inventory::MemoryInventory;
use tagperm::models::{GuestOsInfo, InventoryObject, PowerState};
use tempfile::TempDir;

pub const APP_CATEGORY: &str = "vCenter-DEV-App-team";
pub const FUNCTION_CATEGORY: &str = "vCenter-DEV-Function";
pub const OS_CATEGORY: &str = "vCenter-DEV-Guest-OS";
pub const TEMPLATE_ROLE: &str = "Support Admin Template";

pub const APP_CSV: &str = "\
TagCategory,TagName,RoleName,SecurityGroupDomain,SecurityGroupName
vCenter-DEV-App-team,Web,Web Admin,LAB,Web Team
vCenter-DEV-App-team,DB,DB Admin,LAB,DB Team
";

pub const OS_CSV: &str = "\
GuestOSPattern,TargetTagName,RoleName,SecurityGroupDomain,SecurityGroupName
.*Windows.*,Windows,Windows Admin,LAB,Windows Server Team
.*(Red Hat|Linux).*,Linux,Linux Admin,LAB,Linux Team
";

pub fn windows_guest() -> GuestOsInfo {
    GuestOsInfo {
        tools_running: true,
        tools_os_name: Some("Microsoft Windows Server 2019 (64-bit)".to_string()),
        configured_os_name: None,
        guest_id: None,
    }
}

pub fn linux_guest() -> GuestOsInfo {
    GuestOsInfo {
        configured_os_name: Some("Red Hat Enterprise Linux 8 (64-bit)".to_string()),
        ..Default::default()
    }
}

/// Small lab estate:
/// - APP01 (Windows) sits in folder "Web", which carries the Web app tag
/// - DB01 (Linux) carries the DB app tag directly
/// - NOOS01 has no guest OS information
/// - vCLS-1 is a system VM excluded by default
pub fn lab_inventory() -> MemoryInventory {
    let inventory = MemoryInventory::new("vcenter-dev.local");
    inventory.insert_role(TEMPLATE_ROLE, &["System.View", "VirtualMachine.Interact.PowerOn"]);

    inventory.insert_object(InventoryObject::folder("group-v1", "vm"));
    inventory.insert_object(
        InventoryObject::folder("group-v2", "Web")
            .with_parent("group-v1")
            .with_tag(APP_CATEGORY, "Web"),
    );
    inventory.insert_object(
        InventoryObject::vm("vm-1", "APP01", PowerState::PoweredOn)
            .with_parent("group-v2")
            .with_guest(windows_guest()),
    );
    inventory.insert_object(
        InventoryObject::vm("vm-2", "DB01", PowerState::PoweredOff)
            .with_parent("group-v1")
            .with_guest(linux_guest())
            .with_tag(APP_CATEGORY, "DB"),
    );
    inventory.insert_object(
        InventoryObject::vm("vm-3", "NOOS01", PowerState::PoweredOff).with_parent("group-v1"),
    );
    inventory.insert_object(
        InventoryObject::vm("vm-4", "vCLS-1", PowerState::PoweredOn)
            .with_parent("group-v1")
            .with_guest(linux_guest()),
    );
    inventory
}

/// Rule files and an inventory snapshot in a temporary directory
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_inventory(&lab_inventory())
    }

    pub fn with_inventory(inventory: &MemoryInventory) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.csv"), APP_CSV).unwrap();
        std::fs::write(dir.path().join("os.csv"), OS_CSV).unwrap();
        inventory.save_to_file(&dir.path().join("inventory.json")).unwrap();
        Self { dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// `tagperm` with the fixture's rule files and snapshot
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("tagperm").unwrap();
        cmd.env_remove("RUST_LOG")
            .arg("--app-csv")
            .arg(self.path("app.csv"))
            .arg("--os-csv")
            .arg(self.path("os.csv"))
            .arg("--inventory")
            .arg(self.path("inventory.json"))
            .arg("--config")
            .arg(self.config_path());
        cmd
    }

    /// Empty config file so a user-level config never leaks into tests
    fn config_path(&self) -> PathBuf {
        let path = self.path("config.toml");
        if !path.exists() {
            std::fs::write(&path, "").unwrap();
        }
        path
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        read_snapshot(&self.path("inventory.json"))
    }
}

pub fn read_snapshot(path: &Path) -> InventorySnapshot {
    let content = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&content).unwrap()
}

pub fn object<'a>(snapshot: &'a InventorySnapshot, name: &str) -> &'a InventoryObject {
    snapshot
        .objects
        .iter()
        .find(|o| o.name == name)
        .unwrap_or_else(|| panic!("object {name} not in snapshot"))
}
