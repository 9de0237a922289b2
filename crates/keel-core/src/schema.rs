//! Path layout of the keel schema.
//!
//! These paths are a stable contract: role-specific clients outside the core
//! read and write them directly. Changing the layout is a breaking change
//! for the whole cluster.

/// Root of the versioned schema.
pub const SCHEMA_ROOT: &str = "/v1";

/// Root of desired-LRP entries.
pub const DESIRED_LRP_ROOT: &str = "/v1/desired";
/// Root of actual-LRP entries.
pub const ACTUAL_LRP_ROOT: &str = "/v1/actual";
/// Root of task entries.
pub const TASK_ROOT: &str = "/v1/task";
/// Root of domain-freshness markers.
pub const DOMAIN_ROOT: &str = "/v1/domain";
/// Root of cell presences in the session registry.
pub const CELL_ROOT: &str = "/v1/cell";
/// Root of receptor presences in the session registry.
pub const RECEPTOR_ROOT: &str = "/v1/receptor";
/// Root of named locks in the session registry.
pub const LOCK_ROOT: &str = "/v1/locks";

/// Leaf name of the authoritative per-index record.
pub const ACTUAL_LRP_INSTANCE_LEAF: &str = "instance";
/// Leaf name of the transient per-index record written during drain.
pub const ACTUAL_LRP_EVACUATING_LEAF: &str = "evacuating";

/// `/v1/desired/<process_guid>`
pub fn desired_lrp_path(process_guid: &str) -> String {
    format!("{DESIRED_LRP_ROOT}/{process_guid}")
}

/// `/v1/actual/<process_guid>`
pub fn actual_lrp_process_dir(process_guid: &str) -> String {
    format!("{ACTUAL_LRP_ROOT}/{process_guid}")
}

/// `/v1/actual/<process_guid>/<index>`
pub fn actual_lrp_index_dir(process_guid: &str, index: i32) -> String {
    format!("{ACTUAL_LRP_ROOT}/{process_guid}/{index}")
}

/// `/v1/actual/<process_guid>/<index>/instance`
pub fn actual_lrp_path(process_guid: &str, index: i32) -> String {
    format!("{ACTUAL_LRP_ROOT}/{process_guid}/{index}/{ACTUAL_LRP_INSTANCE_LEAF}")
}

/// `/v1/actual/<process_guid>/<index>/evacuating`
pub fn evacuating_actual_lrp_path(process_guid: &str, index: i32) -> String {
    format!("{ACTUAL_LRP_ROOT}/{process_guid}/{index}/{ACTUAL_LRP_EVACUATING_LEAF}")
}

/// `/v1/task/<task_guid>`
pub fn task_path(task_guid: &str) -> String {
    format!("{TASK_ROOT}/{task_guid}")
}

/// `/v1/domain/<domain>`
pub fn domain_path(domain: &str) -> String {
    format!("{DOMAIN_ROOT}/{domain}")
}

/// `/v1/cell/<cell_id>`
pub fn cell_path(cell_id: &str) -> String {
    format!("{CELL_ROOT}/{cell_id}")
}

/// `/v1/receptor/<receptor_id>`
pub fn receptor_path(receptor_id: &str) -> String {
    format!("{RECEPTOR_ROOT}/{receptor_id}")
}

/// `/v1/locks/<name>`
pub fn lock_path(name: &str) -> String {
    format!("{LOCK_ROOT}/{name}")
}

/// Final path segment of a key (e.g. the domain name of a freshness marker).
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actual_lrp_paths() {
        assert_eq!(actual_lrp_path("my-guid", 3), "/v1/actual/my-guid/3/instance");
        assert_eq!(evacuating_actual_lrp_path("my-guid", 3), "/v1/actual/my-guid/3/evacuating");
        assert_eq!(actual_lrp_index_dir("my-guid", 0), "/v1/actual/my-guid/0");
    }

    #[test]
    fn singleton_paths() {
        assert_eq!(desired_lrp_path("pg"), "/v1/desired/pg");
        assert_eq!(task_path("tg"), "/v1/task/tg");
        assert_eq!(domain_path("cf-apps"), "/v1/domain/cf-apps");
        assert_eq!(cell_path("cell-1"), "/v1/cell/cell-1");
        assert_eq!(lock_path("converge_lock"), "/v1/locks/converge_lock");
    }

    #[test]
    fn base_name_extracts_last_segment() {
        assert_eq!(base_name("/v1/domain/cf-apps"), "cf-apps");
        assert_eq!(base_name("bare"), "bare");
    }
}
