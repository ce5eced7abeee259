//! A cluster backup derived from its member node backups.

use ringvault_domain::{BackupName, TokenMap};
use std::collections::BTreeSet;

/// One member of a cluster backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    /// Member node.
    pub fqdn: String,
    /// Backup start time, when observed.
    pub started_ms: Option<u64>,
    /// Backup finish time; `None` means incomplete.
    pub finished_ms: Option<u64>,
}

/// Every node backup sharing one name, grouped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterBackup {
    /// The shared backup name.
    pub name: BackupName,
    /// Members, ordered by fqdn.
    pub members: Vec<ClusterMember>,
    /// The cluster tokenmap at backup time (any member's copy; all
    /// members carry the full map).
    pub tokenmap: TokenMap,
}

impl ClusterBackup {
    /// Nodes whose backup finished.
    #[must_use]
    pub fn complete_nodes(&self) -> Vec<&ClusterMember> {
        self.members
            .iter()
            .filter(|member| member.finished_ms.is_some())
            .collect()
    }

    /// Nodes that started but never finished.
    #[must_use]
    pub fn incomplete_nodes(&self) -> Vec<&ClusterMember> {
        self.members
            .iter()
            .filter(|member| member.finished_ms.is_none())
            .collect()
    }

    /// Tokenmap nodes with no backup at all.
    #[must_use]
    pub fn missing_nodes(&self) -> Vec<String> {
        let present: BTreeSet<&str> = self
            .members
            .iter()
            .map(|member| member.fqdn.as_str())
            .collect();
        self.tokenmap
            .hosts()
            .into_iter()
            .filter(|host| !present.contains(host.as_str()))
            .collect()
    }

    /// A backup is complete when every tokenmap node finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_nodes().is_empty()
            && !self.members.is_empty()
            && self.members.iter().all(|member| member.finished_ms.is_some())
    }

    /// Earliest member start time.
    #[must_use]
    pub fn started_ms(&self) -> Option<u64> {
        self.members.iter().filter_map(|member| member.started_ms).min()
    }

    /// Latest member finish time; defined only for complete backups.
    #[must_use]
    pub fn finished_ms(&self) -> Option<u64> {
        if !self.is_complete() {
            return None;
        }
        self.members.iter().filter_map(|member| member.finished_ms).max()
    }
}
