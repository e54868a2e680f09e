use crate::{Constraint, OpClass, OpSpec, ParamSpec, ParamType, Pattern};

const fn req(name: &'static str, ty: ParamType, description: &'static str) -> ParamSpec {
    ParamSpec { name, ty, required: true, description }
}

const fn opt(name: &'static str, ty: ParamType, description: &'static str) -> ParamSpec {
    ParamSpec { name, ty, required: false, description }
}

const QUANTITY: ParamType = ParamType::Pattern(Pattern {
    regex: r"^[0-9]+(\.[0-9]+)?(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$",
    hint: "a Kubernetes quantity such as 10Gi",
});
const PG_VERSION: ParamType = ParamType::Pattern(Pattern { regex: r"^[0-9]+(\.[0-9]+)?$", hint: "a PostgreSQL version such as 16 or 16.4" });
const IMAGE: ParamType = ParamType::Pattern(Pattern { regex: r"^[^\s]+$", hint: "a container image reference without spaces" });
const CRON: ParamType = ParamType::Pattern(Pattern {
    regex: r"^\s*\S+(\s+\S+){4,5}\s*$",
    hint: "cron with 6 fields (seconds first) or 5 fields",
});
const RETENTION: ParamType = ParamType::Pattern(Pattern { regex: r"^[1-9][0-9]*[dwm]$", hint: "e.g. 30d, 4w or 6m" });
const SQL_IDENT: ParamType = ParamType::Pattern(Pattern {
    regex: r"^[A-Za-z_][A-Za-z0-9_]{0,62}$",
    hint: "letters, digits and '_', starting with a letter or '_'",
});
const INSTANCES: ParamType = ParamType::Integer { min: 1, max: 20 };
const BACKUP_METHOD: ParamType = ParamType::Enum(&["barmanObjectStore", "volumeSnapshot", "plugin"]);

const NAME: ParamSpec = req("name", ParamType::Name, "Name of the cluster");
const NAMESPACE: ParamSpec = req("namespace", ParamType::Name, "Kubernetes namespace");
const CLUSTER_NAME: ParamSpec = req("clusterName", ParamType::Name, "Name of the target cluster");
const STORAGE_SIZE: ParamSpec = opt("storageSize", QUANTITY, "PVC size per instance (default 10Gi)");
const STORAGE_CLASS: ParamSpec = opt("storageClass", ParamType::Name, "StorageClass for instance PVCs");

const NAME_NS: &[ParamSpec] = &[NAME, NAMESPACE];

/// Every operation the dispatcher accepts. Closed: anything else is `UnknownOperation`.
pub static CATALOG: &[OpSpec] = &[
    // ---- read-only ----
    OpSpec {
        name: "list_clusters",
        class: OpClass::Read,
        description: "List PostgreSQL clusters, in one namespace or across all namespaces",
        params: &[opt("namespace", ParamType::Name, "Namespace to list (all namespaces when omitted)")],
        constraints: &[],
    },
    OpSpec {
        name: "get_cluster",
        class: OpClass::Read,
        description: "Show the full Cluster resource as YAML",
        params: NAME_NS,
        constraints: &[],
    },
    OpSpec {
        name: "cluster_status",
        class: OpClass::Read,
        description: "Summarize phase, instances, primary and hibernation state of a cluster",
        params: NAME_NS,
        constraints: &[],
    },
    OpSpec {
        name: "list_backups",
        class: OpClass::Read,
        description: "List backups in a namespace, optionally for one cluster",
        params: &[NAMESPACE, opt("clusterName", ParamType::Name, "Only backups of this cluster")],
        constraints: &[],
    },
    OpSpec {
        name: "list_scheduled_backups",
        class: OpClass::Read,
        description: "List scheduled backups in a namespace",
        params: &[NAMESPACE],
        constraints: &[],
    },
    OpSpec {
        name: "list_poolers",
        class: OpClass::Read,
        description: "List PgBouncer poolers in a namespace",
        params: &[NAMESPACE],
        constraints: &[],
    },
    OpSpec {
        name: "list_pods",
        class: OpClass::Read,
        description: "List the instance pods of a cluster with their role and phase",
        params: NAME_NS,
        constraints: &[],
    },
    OpSpec {
        name: "list_events",
        class: OpClass::Read,
        description: "List recent Kubernetes events for a cluster",
        params: NAME_NS,
        constraints: &[],
    },
    OpSpec {
        name: "get_logs",
        class: OpClass::Read,
        description: "Tail the logs of one instance pod",
        params: &[
            req("pod", ParamType::Name, "Pod name, e.g. prod-1"),
            NAMESPACE,
            opt("container", ParamType::Name, "Container name (default: postgres)"),
            opt("tailLines", ParamType::Integer { min: 1, max: 5000 }, "Number of lines from the end (default 100)"),
        ],
        constraints: &[],
    },
    // ---- create ----
    OpSpec {
        name: "create_cluster",
        class: OpClass::Create,
        description: "Create a new PostgreSQL cluster",
        params: &[
            NAME,
            NAMESPACE,
            opt("instances", INSTANCES, "Number of instances (default 3)"),
            STORAGE_SIZE,
            STORAGE_CLASS,
            opt("postgresVersion", PG_VERSION, "PostgreSQL major or minor version; selects the official image"),
            opt("imageName", IMAGE, "Explicit operand image"),
            opt("database", SQL_IDENT, "Application database created at bootstrap"),
            opt("owner", SQL_IDENT, "Owner of the application database (default: same as database)"),
            opt("parameters", ParamType::KeyValueList, "postgresql.conf settings as key=value"),
        ],
        constraints: &[Constraint::AtMostOne(&["postgresVersion", "imageName"]), Constraint::Requires("owner", "database")],
    },
    OpSpec {
        name: "restore_cluster",
        class: OpClass::Create,
        description: "Create a new cluster recovered from an existing backup",
        params: &[
            NAME,
            NAMESPACE,
            req("backupName", ParamType::Name, "Backup to recover from (same namespace)"),
            opt("instances", INSTANCES, "Number of instances (default 3)"),
            STORAGE_SIZE,
            STORAGE_CLASS,
        ],
        constraints: &[],
    },
    OpSpec {
        name: "create_replica_cluster",
        class: OpClass::Create,
        description: "Create a replica cluster streaming from another cluster in the same namespace",
        params: &[
            NAME,
            NAMESPACE,
            req("sourceCluster", ParamType::Name, "Cluster to replicate from"),
            opt("instances", INSTANCES, "Number of instances (default 3)"),
            STORAGE_SIZE,
            STORAGE_CLASS,
        ],
        constraints: &[],
    },
    OpSpec {
        name: "create_backup",
        class: OpClass::Create,
        description: "Start an on-demand backup of a cluster",
        params: &[
            CLUSTER_NAME,
            NAMESPACE,
            opt("backupName", ParamType::Name, "Backup name (generated from the cluster name and time when omitted)"),
            opt("method", BACKUP_METHOD, "Backup method (operator default when omitted)"),
        ],
        constraints: &[],
    },
    OpSpec {
        name: "create_scheduled_backup",
        class: OpClass::Create,
        description: "Create a recurring backup schedule for a cluster",
        params: &[
            req("name", ParamType::Name, "Name of the scheduled backup"),
            NAMESPACE,
            CLUSTER_NAME,
            req("schedule", CRON, "Cron schedule; 5-field expressions run at second 0"),
            opt("backupRetentionPolicy", RETENTION, "Retention policy applied to the cluster's backups"),
            opt("suspend", ParamType::Boolean, "Create the schedule suspended"),
            opt("immediate", ParamType::Boolean, "Take the first backup immediately"),
            opt("method", BACKUP_METHOD, "Backup method"),
        ],
        constraints: &[],
    },
    OpSpec {
        name: "create_pooler",
        class: OpClass::Create,
        description: "Create a PgBouncer pooler in front of a cluster",
        params: &[
            CLUSTER_NAME,
            NAMESPACE,
            opt("name", ParamType::Name, "Pooler name (default <cluster>-pooler-<type>)"),
            opt("type", ParamType::Enum(&["rw", "ro"]), "Service to pool (default rw)"),
            opt("instances", ParamType::Integer { min: 1, max: 10 }, "PgBouncer replicas (default 1)"),
            opt("poolMode", ParamType::Enum(&["session", "transaction"]), "Pool mode (default session)"),
            opt("maxClientConn", ParamType::Integer { min: 1, max: 100_000 }, "max_client_conn"),
            opt("defaultPoolSize", ParamType::Integer { min: 1, max: 10_000 }, "default_pool_size"),
        ],
        constraints: &[],
    },
    // ---- update (read-modify-write) ----
    OpSpec {
        name: "scale_cluster",
        class: OpClass::Update,
        description: "Change the number of instances of a cluster",
        params: &[NAME, NAMESPACE, req("instances", INSTANCES, "Desired number of instances")],
        constraints: &[],
    },
    OpSpec {
        name: "upgrade_cluster",
        class: OpClass::Update,
        description: "Change the PostgreSQL image of a cluster",
        params: &[
            NAME,
            NAMESPACE,
            opt("postgresVersion", PG_VERSION, "Target PostgreSQL version"),
            opt("imageName", IMAGE, "Explicit operand image"),
        ],
        constraints: &[Constraint::ExactlyOne(&["postgresVersion", "imageName"])],
    },
    OpSpec {
        name: "pause_cluster",
        class: OpClass::Update,
        description: "Hibernate a cluster (instances shut down, volumes kept)",
        params: NAME_NS,
        constraints: &[],
    },
    OpSpec {
        name: "resume_cluster",
        class: OpClass::Update,
        description: "Wake a hibernated cluster",
        params: NAME_NS,
        constraints: &[],
    },
    OpSpec {
        name: "restart_cluster",
        class: OpClass::Update,
        description: "Trigger a rolling restart of all instances",
        params: NAME_NS,
        constraints: &[],
    },
    OpSpec {
        name: "switchover_cluster",
        class: OpClass::Update,
        description: "Request a switchover to the given instance",
        params: &[NAME, NAMESPACE, req("targetPrimary", ParamType::Name, "Instance pod to promote, e.g. prod-2")],
        constraints: &[],
    },
    OpSpec {
        name: "update_parameters",
        class: OpClass::Update,
        description: "Set postgresql.conf parameters; other parameters are left untouched",
        params: &[NAME, NAMESPACE, req("parameters", ParamType::KeyValueList, "Settings as key=value")],
        constraints: &[],
    },
    OpSpec {
        name: "set_replica_mode",
        class: OpClass::Update,
        description: "Enable or disable replica mode (promote a replica cluster by disabling it)",
        params: &[
            NAME,
            NAMESPACE,
            req("enabled", ParamType::Boolean, "Whether the cluster follows an external source"),
            opt("source", ParamType::Name, "External cluster to follow"),
        ],
        constraints: &[],
    },
    OpSpec {
        name: "add_tablespace",
        class: OpClass::Update,
        description: "Declare an additional tablespace. Not idempotent: calling twice adds two entries",
        params: &[
            NAME,
            NAMESPACE,
            req("tablespaceName", SQL_IDENT, "Tablespace name"),
            req("size", QUANTITY, "Volume size for the tablespace"),
            STORAGE_CLASS,
            opt("owner", SQL_IDENT, "Owning role"),
            opt("temporary", ParamType::Boolean, "Use as a temporary tablespace"),
        ],
        constraints: &[],
    },
    OpSpec {
        name: "enable_extension",
        class: OpClass::Update,
        description: "Append CREATE EXTENSION to the application database bootstrap SQL. Not idempotent",
        params: &[NAME, NAMESPACE, req("extension", SQL_IDENT, "Extension name, e.g. pg_stat_statements")],
        constraints: &[],
    },
    OpSpec {
        name: "create_database",
        class: OpClass::Update,
        description: "Append CREATE DATABASE to the bootstrap SQL. Not idempotent",
        params: &[NAME, NAMESPACE, req("database", SQL_IDENT, "Database name"), opt("owner", SQL_IDENT, "Owning role")],
        constraints: &[],
    },
    OpSpec {
        name: "configure_pooler",
        class: OpClass::Update,
        description: "Change pool mode, replicas or PgBouncer parameters of a pooler",
        params: &[
            req("name", ParamType::Name, "Name of the pooler"),
            NAMESPACE,
            opt("poolMode", ParamType::Enum(&["session", "transaction"]), "Pool mode"),
            opt("instances", ParamType::Integer { min: 1, max: 10 }, "PgBouncer replicas"),
            opt("parameters", ParamType::KeyValueList, "PgBouncer settings as key=value"),
        ],
        constraints: &[Constraint::AtLeastOne(&["poolMode", "instances", "parameters"])],
    },
    OpSpec {
        name: "suspend_scheduled_backup",
        class: OpClass::Update,
        description: "Suspend or resume a backup schedule",
        params: &[
            req("name", ParamType::Name, "Name of the scheduled backup"),
            NAMESPACE,
            req("suspend", ParamType::Boolean, "true to suspend, false to resume"),
        ],
        constraints: &[],
    },
    // ---- delete ----
    OpSpec {
        name: "delete_cluster",
        class: OpClass::Delete,
        description: "Delete a cluster and its instances",
        params: NAME_NS,
        constraints: &[],
    },
    OpSpec {
        name: "delete_backup",
        class: OpClass::Delete,
        description: "Delete a backup resource",
        params: &[req("name", ParamType::Name, "Name of the backup"), NAMESPACE],
        constraints: &[],
    },
    OpSpec {
        name: "delete_scheduled_backup",
        class: OpClass::Delete,
        description: "Delete a backup schedule",
        params: &[req("name", ParamType::Name, "Name of the scheduled backup"), NAMESPACE],
        constraints: &[],
    },
    OpSpec {
        name: "delete_pooler",
        class: OpClass::Delete,
        description: "Delete a pooler",
        params: &[req("name", ParamType::Name, "Name of the pooler"), NAMESPACE],
        constraints: &[],
    },
];

pub fn lookup(name: &str) -> Option<&'static OpSpec> {
    CATALOG.iter().find(|op| op.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique_and_params_declared_once() {
        let mut seen = HashSet::new();
        for op in CATALOG {
            assert!(seen.insert(op.name), "duplicate op {}", op.name);
            let mut params = HashSet::new();
            for p in op.params {
                assert!(params.insert(p.name), "{}: duplicate param {}", op.name, p.name);
            }
        }
    }

    #[test]
    fn constraints_reference_declared_params() {
        for op in CATALOG {
            for c in op.constraints {
                let names: Vec<&str> = match c {
                    Constraint::AtMostOne(n) | Constraint::ExactlyOne(n) | Constraint::AtLeastOne(n) => n.to_vec(),
                    Constraint::Requires(a, b) => vec![*a, *b],
                };
                for n in names {
                    assert!(op.param(n).is_some(), "{}: constraint on undeclared {}", op.name, n);
                }
            }
        }
    }

    #[test]
    fn patterns_compile() {
        for op in CATALOG {
            for p in op.params {
                if let ParamType::Pattern(pat) = p.ty {
                    assert!(regex::Regex::new(pat.regex).is_ok(), "{}.{}", op.name, p.name);
                }
            }
        }
    }

    #[test]
    fn unknown_names_are_absent() {
        assert!(lookup("drop_everything").is_none());
        assert_eq!(lookup("scale_cluster").map(|o| o.class), Some(OpClass::Update));
    }
}
