//! Child-row plumbing shared by the template and instance-override tables.
//!
//! The `service_*` and `instance_*` tables carry identical shapes, so one
//! set of load/insert/validate helpers serves both, parameterized by table
//! names and the owning key column.

use crate::error::{Error, Result};
use crate::materialize;
use crate::model::{
    ConfigFile, Dependency, DomainRule, EnvVar, Healthcheck, LabelPair, PortMapping,
    ServiceChildren, VolumeMapping,
};
use crate::naming;
use sqlx::{PgExecutor, Postgres, Transaction};
use std::collections::BTreeSet;

/// Table names for one side of the parallel child-table layout
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChildTables {
    pub ports: &'static str,
    pub volumes: &'static str,
    pub env_vars: &'static str,
    pub labels: &'static str,
    pub domains: &'static str,
    pub healthcheck: &'static str,
    pub dependencies: &'static str,
    pub config_files: &'static str,
    /// Owning key column (`service_id` or `instance_id`)
    pub key: &'static str,
}

/// Template-side child tables
pub(crate) const TEMPLATE_TABLES: ChildTables = ChildTables {
    ports: "service_ports",
    volumes: "service_volumes",
    env_vars: "service_env_vars",
    labels: "service_labels",
    domains: "service_domains",
    healthcheck: "service_healthchecks",
    dependencies: "service_dependencies",
    config_files: "service_config_files",
    key: "service_id",
};

/// Instance-side override tables
pub(crate) const INSTANCE_TABLES: ChildTables = ChildTables {
    ports: "instance_ports",
    volumes: "instance_volumes",
    env_vars: "instance_env_vars",
    labels: "instance_labels",
    domains: "instance_domains",
    healthcheck: "instance_healthcheck",
    dependencies: "instance_dependencies",
    config_files: "instance_config_files",
    key: "instance_id",
};

/// Validate user-supplied child rows before they hit the store.
///
/// Checks the reserved label prefix, key uniqueness, port protocols, and
/// config-file paths and modes.
pub(crate) fn validate_children(children: &ServiceChildren) -> Result<()> {
    let mut env_keys = BTreeSet::new();
    for env in &children.env_vars {
        if env.key.is_empty() {
            return Err(Error::validation("env var key must not be empty"));
        }
        if !env_keys.insert(env.key.as_str()) {
            return Err(Error::validation(format!(
                "duplicate env var key '{}'",
                env.key
            )));
        }
    }

    let mut label_keys = BTreeSet::new();
    for label in &children.labels {
        naming::validate_user_label_key(&label.key)?;
        if !label_keys.insert(label.key.as_str()) {
            return Err(Error::validation(format!(
                "duplicate label key '{}'",
                label.key
            )));
        }
    }

    for port in &children.ports {
        if port.protocol != "tcp" && port.protocol != "udp" {
            return Err(Error::validation(format!(
                "port protocol '{}' must be tcp or udp",
                port.protocol
            )));
        }
        if !(1..=65535).contains(&port.host_port) || !(1..=65535).contains(&port.container_port) {
            return Err(Error::validation(format!(
                "port mapping {}:{} out of range",
                port.host_port, port.container_port
            )));
        }
    }

    let mut file_paths = BTreeSet::new();
    for file in &children.config_files {
        materialize::sanitize_file_path(&file.file_path)?;
        materialize::parse_mode(&file.mode)?;
        if !file_paths.insert(file.file_path.as_str()) {
            return Err(Error::validation(format!(
                "duplicate config file path '{}'",
                file.file_path
            )));
        }
    }

    for dep in &children.dependencies {
        naming::validate_name(&dep.depends_on)?;
    }

    Ok(())
}

/// Load every child collection for one owner row
pub(crate) async fn load_children<'e, E>(
    executor: E,
    tables: ChildTables,
    owner_id: i64,
) -> Result<ServiceChildren>
where
    E: PgExecutor<'e> + Copy,
{
    let ports: Vec<PortMapping> = sqlx::query_as(&format!(
        "SELECT host_ip, host_port, container_port, protocol FROM {} WHERE {} = $1 ORDER BY host_port, container_port",
        tables.ports, tables.key
    ))
    .bind(owner_id)
    .fetch_all(executor)
    .await?;

    let volumes: Vec<VolumeMapping> = sqlx::query_as(&format!(
        "SELECT source, target, read_only FROM {} WHERE {} = $1 ORDER BY target",
        tables.volumes, tables.key
    ))
    .bind(owner_id)
    .fetch_all(executor)
    .await?;

    let env_vars: Vec<EnvVar> = sqlx::query_as(&format!(
        "SELECT key, value FROM {} WHERE {} = $1 ORDER BY key",
        tables.env_vars, tables.key
    ))
    .bind(owner_id)
    .fetch_all(executor)
    .await?;

    let labels: Vec<LabelPair> = sqlx::query_as(&format!(
        "SELECT key, value FROM {} WHERE {} = $1 ORDER BY key",
        tables.labels, tables.key
    ))
    .bind(owner_id)
    .fetch_all(executor)
    .await?;

    let domains: Vec<DomainRule> = sqlx::query_as(&format!(
        "SELECT domain, container_port FROM {} WHERE {} = $1 ORDER BY domain",
        tables.domains, tables.key
    ))
    .bind(owner_id)
    .fetch_all(executor)
    .await?;

    let dependencies: Vec<Dependency> = sqlx::query_as(&format!(
        "SELECT depends_on FROM {} WHERE {} = $1 ORDER BY depends_on",
        tables.dependencies, tables.key
    ))
    .bind(owner_id)
    .fetch_all(executor)
    .await?;

    let healthcheck: Option<Healthcheck> = sqlx::query_as(&format!(
        "SELECT test, \"interval\", \"timeout\", retries, start_period FROM {} WHERE {} = $1",
        tables.healthcheck, tables.key
    ))
    .bind(owner_id)
    .fetch_optional(executor)
    .await?;

    let config_files: Vec<ConfigFile> = sqlx::query_as(&format!(
        "SELECT file_path, content, mode, is_template FROM {} WHERE {} = $1 ORDER BY file_path",
        tables.config_files, tables.key
    ))
    .bind(owner_id)
    .fetch_all(executor)
    .await?;

    Ok(ServiceChildren {
        ports,
        volumes,
        env_vars,
        labels,
        domains,
        dependencies,
        healthcheck,
        config_files,
    })
}

/// Insert every child collection for one owner row. Callers validate
/// first; this assumes clean input.
pub(crate) async fn insert_children(
    tx: &mut Transaction<'_, Postgres>,
    tables: ChildTables,
    owner_id: i64,
    children: &ServiceChildren,
) -> Result<()> {
    for port in &children.ports {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, host_ip, host_port, container_port, protocol) VALUES ($1, $2, $3, $4, $5)",
            tables.ports, tables.key
        ))
        .bind(owner_id)
        .bind(&port.host_ip)
        .bind(port.host_port)
        .bind(port.container_port)
        .bind(&port.protocol)
        .execute(&mut **tx)
        .await?;
    }

    for volume in &children.volumes {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, source, target, read_only) VALUES ($1, $2, $3, $4)",
            tables.volumes, tables.key
        ))
        .bind(owner_id)
        .bind(&volume.source)
        .bind(&volume.target)
        .bind(volume.read_only)
        .execute(&mut **tx)
        .await?;
    }

    for env in &children.env_vars {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, key, value) VALUES ($1, $2, $3)",
            tables.env_vars, tables.key
        ))
        .bind(owner_id)
        .bind(&env.key)
        .bind(&env.value)
        .execute(&mut **tx)
        .await?;
    }

    for label in &children.labels {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, key, value) VALUES ($1, $2, $3)",
            tables.labels, tables.key
        ))
        .bind(owner_id)
        .bind(&label.key)
        .bind(&label.value)
        .execute(&mut **tx)
        .await?;
    }

    for domain in &children.domains {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, domain, container_port) VALUES ($1, $2, $3)",
            tables.domains, tables.key
        ))
        .bind(owner_id)
        .bind(&domain.domain)
        .bind(domain.container_port)
        .execute(&mut **tx)
        .await?;
    }

    for dep in &children.dependencies {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, depends_on) VALUES ($1, $2)",
            tables.dependencies, tables.key
        ))
        .bind(owner_id)
        .bind(&dep.depends_on)
        .execute(&mut **tx)
        .await?;
    }

    if let Some(hc) = &children.healthcheck {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, test, \"interval\", \"timeout\", retries, start_period) VALUES ($1, $2, $3, $4, $5, $6)",
            tables.healthcheck, tables.key
        ))
        .bind(owner_id)
        .bind(&hc.test)
        .bind(&hc.interval)
        .bind(&hc.timeout)
        .bind(hc.retries)
        .bind(&hc.start_period)
        .execute(&mut **tx)
        .await?;
    }

    for file in &children.config_files {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, file_path, content, mode, is_template) VALUES ($1, $2, $3, $4, $5)",
            tables.config_files, tables.key
        ))
        .bind(owner_id)
        .bind(&file.file_path)
        .bind(&file.content)
        .bind(&file.mode)
        .bind(file.is_template)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Delete every child row for one owner
pub(crate) async fn delete_children(
    tx: &mut Transaction<'_, Postgres>,
    tables: ChildTables,
    owner_id: i64,
) -> Result<()> {
    for table in [
        tables.ports,
        tables.volumes,
        tables.env_vars,
        tables.labels,
        tables.domains,
        tables.dependencies,
        tables.healthcheck,
        tables.config_files,
    ] {
        sqlx::query(&format!("DELETE FROM {table} WHERE {} = $1", tables.key))
            .bind(owner_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Copy every child row from one owner to another within the same side
/// of the layout (used by stack clone and instance duplicate)
pub(crate) async fn copy_children(
    tx: &mut Transaction<'_, Postgres>,
    tables: ChildTables,
    from_id: i64,
    to_id: i64,
) -> Result<()> {
    let key = tables.key;
    let copies = [
        format!(
            "INSERT INTO {t} ({key}, host_ip, host_port, container_port, protocol) SELECT $2, host_ip, host_port, container_port, protocol FROM {t} WHERE {key} = $1",
            t = tables.ports
        ),
        format!(
            "INSERT INTO {t} ({key}, source, target, read_only) SELECT $2, source, target, read_only FROM {t} WHERE {key} = $1",
            t = tables.volumes
        ),
        format!(
            "INSERT INTO {t} ({key}, key, value) SELECT $2, key, value FROM {t} WHERE {key} = $1",
            t = tables.env_vars
        ),
        format!(
            "INSERT INTO {t} ({key}, key, value) SELECT $2, key, value FROM {t} WHERE {key} = $1",
            t = tables.labels
        ),
        format!(
            "INSERT INTO {t} ({key}, domain, container_port) SELECT $2, domain, container_port FROM {t} WHERE {key} = $1",
            t = tables.domains
        ),
        format!(
            "INSERT INTO {t} ({key}, depends_on) SELECT $2, depends_on FROM {t} WHERE {key} = $1",
            t = tables.dependencies
        ),
        format!(
            "INSERT INTO {t} ({key}, test, \"interval\", \"timeout\", retries, start_period) SELECT $2, test, \"interval\", \"timeout\", retries, start_period FROM {t} WHERE {key} = $1",
            t = tables.healthcheck
        ),
        format!(
            "INSERT INTO {t} ({key}, file_path, content, mode, is_template) SELECT $2, file_path, content, mode, is_template FROM {t} WHERE {key} = $1",
            t = tables.config_files
        ),
    ];

    for sql in &copies {
        sqlx::query(sql)
            .bind(from_id)
            .bind(to_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}
