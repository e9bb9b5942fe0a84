//! Compiled-in catalog data used when nothing has been pre-fetched.
//!
//! Operators are keyed by catalog URL (not by version); channels by operator
//! name. Both tables only cover commonly mirrored operators.

use mirrorflow_protocol::OperatorEntry;

struct StaticOperator {
    name: &'static str,
    default_channel: &'static str,
    channels: &'static [&'static str],
}

const REDHAT_OPERATORS: &[StaticOperator] = &[
    StaticOperator {
        name: "advanced-cluster-management",
        default_channel: "release-2.11",
        channels: &["release-2.10", "release-2.11"],
    },
    StaticOperator {
        name: "cluster-logging",
        default_channel: "stable-6.0",
        channels: &["stable-5.9", "stable-6.0"],
    },
    StaticOperator {
        name: "local-storage-operator",
        default_channel: "stable",
        channels: &["stable"],
    },
    StaticOperator {
        name: "odf-operator",
        default_channel: "stable-4.16",
        channels: &["stable-4.15", "stable-4.16"],
    },
    StaticOperator {
        name: "openshift-gitops-operator",
        default_channel: "latest",
        channels: &["gitops-1.12", "gitops-1.13", "latest"],
    },
    StaticOperator {
        name: "openshift-pipelines-operator-rh",
        default_channel: "latest",
        channels: &["latest", "pipelines-1.15"],
    },
    StaticOperator {
        name: "rhacs-operator",
        default_channel: "stable",
        channels: &["rhacs-4.4", "stable"],
    },
    StaticOperator {
        name: "web-terminal",
        default_channel: "fast",
        channels: &["fast"],
    },
];

const CERTIFIED_OPERATORS: &[StaticOperator] = &[
    StaticOperator {
        name: "crunchy-postgres-operator",
        default_channel: "v5",
        channels: &["v5"],
    },
    StaticOperator {
        name: "gpu-operator-certified",
        default_channel: "stable",
        channels: &["stable", "v24.3"],
    },
    StaticOperator {
        name: "mongodb-enterprise",
        default_channel: "stable",
        channels: &["stable"],
    },
];

const COMMUNITY_OPERATORS: &[StaticOperator] = &[
    StaticOperator {
        name: "argocd-operator",
        default_channel: "alpha",
        channels: &["alpha"],
    },
    StaticOperator {
        name: "cert-manager",
        default_channel: "stable",
        channels: &["candidate", "stable"],
    },
    StaticOperator {
        name: "grafana-operator",
        default_channel: "v5",
        channels: &["v4", "v5"],
    },
    StaticOperator {
        name: "prometheus",
        default_channel: "beta",
        channels: &["beta"],
    },
    StaticOperator {
        name: "strimzi-kafka-operator",
        default_channel: "stable",
        channels: &["stable"],
    },
];

/// Fallback operators for a catalog URL (`registry/namespace/index`).
pub fn static_operators(catalog_url: &str) -> Option<Vec<OperatorEntry>> {
    let table = match catalog_url.rsplit('/').next()? {
        "redhat-operator-index" => REDHAT_OPERATORS,
        "certified-operator-index" => CERTIFIED_OPERATORS,
        "community-operator-index" => COMMUNITY_OPERATORS,
        _ => return None,
    };
    Some(table.iter().map(to_entry).collect())
}

/// Fallback channels for an operator, from any catalog.
pub fn static_channels(operator: &str) -> Option<Vec<String>> {
    [REDHAT_OPERATORS, CERTIFIED_OPERATORS, COMMUNITY_OPERATORS]
        .into_iter()
        .flat_map(|table| table.iter())
        .find(|op| op.name == operator)
        .map(|op| op.channels.iter().map(|c| c.to_string()).collect())
}

fn to_entry(op: &StaticOperator) -> OperatorEntry {
    OperatorEntry::new(op.name, op.default_channel, op.channels.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorflow_protocol::CatalogSourceType;

    #[test]
    fn test_every_source_has_fallback_data() {
        for source in CatalogSourceType::ALL {
            let ops = static_operators(&source.catalog_url()).unwrap();
            assert!(!ops.is_empty(), "{} has no fallback operators", source);
        }
        assert!(static_operators("quay.io/acme/private-index").is_none());
    }

    #[test]
    fn test_static_tables_are_consistent() {
        for source in CatalogSourceType::ALL {
            for op in static_operators(&source.catalog_url()).unwrap() {
                assert!(op.channels.contains(&op.default_channel), "{}", op.name);
            }
        }
    }

    #[test]
    fn test_static_channels_by_name() {
        assert_eq!(
            static_channels("cert-manager").unwrap(),
            vec!["candidate", "stable"]
        );
        assert!(static_channels("no-such-operator").is_none());
    }
}
