//! Cluster Entity Model
//! ====================
//!
//! Hosts and virtual machines of the simulated HA cluster, plus the handful of
//! mutations the failover script is allowed to perform on them.
//!
//! VMs reference their host by [`HostId`] only. The relation is a
//! back-reference, not ownership: relocating a VM rewrites the id, and every
//! mutation checks that the id still resolves to a host in the inventory.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ModelError;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Opaque host identifier (`h1`, `h2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HostId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque virtual machine identifier (`vm1`, `vm2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(String);

impl VmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VmId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Role/health of a host inside the HA cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Coordinates failover decisions (FDM master)
    Master,
    /// Follows the master
    Slave,
    /// Reachable, no HA role assigned
    Online,
    /// Unreachable on both network and datastore heartbeats
    Failed,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Master => "master",
            HostStatus::Slave => "slave",
            HostStatus::Online => "online",
            HostStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run status of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Booting,
    Failed,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Running => "running",
            VmStatus::Booting => "booting",
            VmStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HA restart priority. Declaration order is restart order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RestartPriority {
    High,
    Medium,
    Low,
}

impl fmt::Display for RestartPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RestartPriority::High => "High",
            RestartPriority::Medium => "Medium",
            RestartPriority::Low => "Low",
        };
        f.write_str(label)
    }
}

/// A physical ESXi host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    /// Management network address
    pub ip: String,
    pub status: HostStatus,
}

impl Host {
    pub fn new(id: &str, name: &str, ip: &str, status: HostStatus) -> Self {
        Self {
            id: HostId::from(id),
            name: name.to_string(),
            ip: ip.to_string(),
            status,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == HostStatus::Failed
    }
}

/// A protected virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: VmId,
    pub name: String,
    /// Host currently running (or last running) this VM
    pub host_id: HostId,
    pub status: VmStatus,
    pub priority: RestartPriority,
}

impl VirtualMachine {
    pub fn new(id: &str, name: &str, host_id: &str, priority: RestartPriority) -> Self {
        Self {
            id: VmId::from(id),
            name: name.to_string(),
            host_id: HostId::from(host_id),
            status: VmStatus::Running,
            priority,
        }
    }
}

// =============================================================================
// INVENTORY
// =============================================================================

/// The host and VM collections of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    hosts: Vec<Host>,
    vms: Vec<VirtualMachine>,
}

impl Inventory {
    /// Builds an inventory, rejecting VMs whose host is not in `hosts`.
    pub fn new(hosts: Vec<Host>, vms: Vec<VirtualMachine>) -> Result<Self, ModelError> {
        if let Some(orphan) = vms.iter().find(|vm| !hosts.iter().any(|h| h.id == vm.host_id)) {
            return Err(ModelError::UnknownHost(orphan.host_id.clone()));
        }
        Ok(Self { hosts, vms })
    }

    /// The fixed three-host, six-VM lab every run starts from.
    pub fn canonical() -> Self {
        Self {
            hosts: vec![
                Host::new("h1", "ESXi-01", "192.168.10.5", HostStatus::Master),
                Host::new("h2", "ESXi-02", "192.168.10.6", HostStatus::Slave),
                Host::new("h3", "ESXi-03", "192.168.10.7", HostStatus::Slave),
            ],
            vms: vec![
                VirtualMachine::new("vm1", "AD-Server", "h1", RestartPriority::High),
                VirtualMachine::new("vm2", "SQL-DB", "h1", RestartPriority::High),
                VirtualMachine::new("vm3", "Web-App", "h2", RestartPriority::Medium),
                VirtualMachine::new("vm4", "File-Srv", "h2", RestartPriority::Low),
                VirtualMachine::new("vm5", "Print-Srv", "h3", RestartPriority::Low),
                VirtualMachine::new("vm6", "Dev-Box", "h3", RestartPriority::Low),
            ],
        }
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn vms(&self) -> &[VirtualMachine] {
        &self.vms
    }

    pub fn host(&self, id: &HostId) -> Option<&Host> {
        self.hosts.iter().find(|h| &h.id == id)
    }

    pub fn vm(&self, id: &VmId) -> Option<&VirtualMachine> {
        self.vms.iter().find(|vm| &vm.id == id)
    }

    pub fn host_by_name(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn vm_by_name(&self, name: &str) -> Option<&VirtualMachine> {
        self.vms.iter().find(|vm| vm.name == name)
    }

    /// VMs whose owning-host reference is `host_id`.
    pub fn vms_on<'a>(&'a self, host_id: &'a HostId) -> impl Iterator<Item = &'a VirtualMachine> + 'a {
        self.vms.iter().filter(move |vm| &vm.host_id == host_id)
    }

    /// Hosts currently holding the master role.
    pub fn masters(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter().filter(|h| h.status == HostStatus::Master)
    }

    fn host_mut(&mut self, id: &HostId) -> Result<&mut Host, ModelError> {
        self.hosts
            .iter_mut()
            .find(|h| &h.id == id)
            .ok_or_else(|| ModelError::UnknownHost(id.clone()))
    }

    fn vm_mut(&mut self, id: &VmId) -> Result<&mut VirtualMachine, ModelError> {
        self.vms
            .iter_mut()
            .find(|vm| &vm.id == id)
            .ok_or_else(|| ModelError::UnknownVm(id.clone()))
    }

    /// Marks a host failed and cascades `failed` to every VM it owns.
    ///
    /// Returns the number of VMs taken down. A host that is already failed
    /// is left alone and reports 0.
    pub fn mark_host_failed(&mut self, host_id: &HostId) -> Result<usize, ModelError> {
        let host = self.host_mut(host_id)?;
        if host.is_failed() {
            return Ok(0);
        }
        host.status = HostStatus::Failed;

        let mut cascaded = 0;
        for vm in self.vms.iter_mut().filter(|vm| &vm.host_id == host_id) {
            vm.status = VmStatus::Failed;
            cascaded += 1;
        }
        Ok(cascaded)
    }

    /// Gives a host the master role. Uniqueness is the caller's concern.
    pub fn promote_host_to_master(&mut self, host_id: &HostId) -> Result<(), ModelError> {
        self.host_mut(host_id)?.status = HostStatus::Master;
        Ok(())
    }

    /// Moves a VM to another host with the given run status.
    pub fn relocate_vm(
        &mut self,
        vm_id: &VmId,
        new_host_id: &HostId,
        new_status: VmStatus,
    ) -> Result<(), ModelError> {
        if self.host(new_host_id).is_none() {
            return Err(ModelError::UnknownHost(new_host_id.clone()));
        }
        let vm = self.vm_mut(vm_id)?;
        vm.host_id = new_host_id.clone();
        vm.status = new_status;
        Ok(())
    }

    /// Every `booting` VM becomes `running`. Returns how many settled.
    pub fn settle_booting_to_running(&mut self) -> usize {
        let mut settled = 0;
        for vm in self.vms.iter_mut().filter(|vm| vm.status == VmStatus::Booting) {
            vm.status = VmStatus::Running;
            settled += 1;
        }
        settled
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(inv: &Inventory, vm: &str) -> VmStatus {
        inv.vm(&VmId::from(vm)).unwrap().status
    }

    #[test]
    fn test_canonical_snapshot() {
        let inv = Inventory::canonical();

        assert_eq!(inv.hosts().len(), 3);
        assert_eq!(inv.vms().len(), 6);

        let names: Vec<_> = inv.hosts().iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["ESXi-01", "ESXi-02", "ESXi-03"]);

        let h1 = inv.host_by_name("ESXi-01").unwrap();
        assert_eq!(h1.ip, "192.168.10.5");
        assert_eq!(h1.status, HostStatus::Master);
        assert_eq!(inv.masters().count(), 1);

        let ad = inv.vm_by_name("AD-Server").unwrap();
        assert_eq!(ad.host_id, HostId::from("h1"));
        assert_eq!(ad.priority, RestartPriority::High);
        assert!(inv.vms().iter().all(|vm| vm.status == VmStatus::Running));
    }

    #[test]
    fn test_mark_host_failed_cascades_only_to_owned_vms() {
        let mut inv = Inventory::canonical();

        let cascaded = inv.mark_host_failed(&HostId::from("h1")).unwrap();

        assert_eq!(cascaded, 2);
        assert_eq!(status_of(&inv, "vm1"), VmStatus::Failed);
        assert_eq!(status_of(&inv, "vm2"), VmStatus::Failed);
        for vm in ["vm3", "vm4", "vm5", "vm6"] {
            assert_eq!(status_of(&inv, vm), VmStatus::Running);
        }
        // The old master lost its role with its health
        assert_eq!(inv.masters().count(), 0);
    }

    #[test]
    fn test_mark_host_failed_is_noop_when_already_failed() {
        let mut inv = Inventory::canonical();
        inv.mark_host_failed(&HostId::from("h1")).unwrap();
        inv.relocate_vm(&VmId::from("vm1"), &HostId::from("h2"), VmStatus::Booting)
            .unwrap();
        let before = inv.clone();

        assert_eq!(inv.mark_host_failed(&HostId::from("h1")).unwrap(), 0);
        assert_eq!(inv, before);
    }

    #[test]
    fn test_promote_does_not_enforce_uniqueness() {
        let mut inv = Inventory::canonical();
        inv.promote_host_to_master(&HostId::from("h2")).unwrap();

        assert_eq!(inv.masters().count(), 2);
    }

    #[test]
    fn test_relocate_vm() {
        let mut inv = Inventory::canonical();
        inv.relocate_vm(&VmId::from("vm2"), &HostId::from("h3"), VmStatus::Booting)
            .unwrap();

        let vm = inv.vm(&VmId::from("vm2")).unwrap();
        assert_eq!(vm.host_id, HostId::from("h3"));
        assert_eq!(vm.status, VmStatus::Booting);
        assert_eq!(inv.vms_on(&HostId::from("h3")).count(), 3);
    }

    #[test]
    fn test_relocate_to_unknown_host_is_rejected() {
        let mut inv = Inventory::canonical();
        let before = inv.clone();

        let err = inv
            .relocate_vm(&VmId::from("vm1"), &HostId::from("h9"), VmStatus::Booting)
            .unwrap_err();

        assert_eq!(err, ModelError::UnknownHost(HostId::from("h9")));
        assert_eq!(inv, before);
    }

    #[test]
    fn test_unknown_ids_are_rejected() {
        let mut inv = Inventory::canonical();

        assert!(matches!(
            inv.mark_host_failed(&HostId::from("nope")),
            Err(ModelError::UnknownHost(_))
        ));
        assert!(matches!(
            inv.relocate_vm(&VmId::from("vm42"), &HostId::from("h2"), VmStatus::Running),
            Err(ModelError::UnknownVm(_))
        ));
    }

    #[test]
    fn test_inventory_new_rejects_orphan_vm() {
        let hosts = vec![Host::new("h1", "ESXi-01", "10.0.0.1", HostStatus::Master)];
        let vms = vec![VirtualMachine::new("vm1", "Lost", "h7", RestartPriority::Low)];

        assert_eq!(
            Inventory::new(hosts, vms),
            Err(ModelError::UnknownHost(HostId::from("h7")))
        );
    }

    #[test]
    fn test_settle_booting_is_idempotent() {
        let mut inv = Inventory::canonical();
        assert_eq!(inv.settle_booting_to_running(), 0);
        assert_eq!(inv, Inventory::canonical());

        inv.relocate_vm(&VmId::from("vm1"), &HostId::from("h2"), VmStatus::Booting)
            .unwrap();
        assert_eq!(inv.settle_booting_to_running(), 1);
        assert_eq!(inv.settle_booting_to_running(), 0);
        assert_eq!(status_of(&inv, "vm1"), VmStatus::Running);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&HostStatus::Master).unwrap();
        assert_eq!(json, "\"master\"");
        let json = serde_json::to_string(&VmStatus::Booting).unwrap();
        assert_eq!(json, "\"booting\"");
    }
}
