//! Host inventory resolution
//!
//! Turns the static `[[hosts]]` config entries into validated `Host`
//! values, preserving config order. Duplicate ids, empty fields, and
//! references to undefined roles are all fatal before any host is touched.

use std::collections::HashSet;

use crate::config::Config;
use crate::error::{ConvoyError, ConvoyResult};
use crate::models::Host;

/// Resolve the full inventory, validating every entry.
pub fn resolve(config: &Config) -> ConvoyResult<Vec<Host>> {
    if config.hosts.is_empty() {
        return Err(ConvoyError::Config {
            message: "no [[hosts]] entries in configuration".to_string(),
        });
    }

    let mut seen = HashSet::new();
    let mut hosts = Vec::with_capacity(config.hosts.len());

    for entry in &config.hosts {
        if entry.id.trim().is_empty() {
            return Err(ConvoyError::Config {
                message: "host entry with empty id".to_string(),
            });
        }
        if entry.address.trim().is_empty() {
            return Err(ConvoyError::Config {
                message: format!("host '{}' has empty address", entry.id),
            });
        }
        if !seen.insert(entry.id.clone()) {
            return Err(ConvoyError::DuplicateHost {
                id: entry.id.clone(),
            });
        }
        // Fail fast if the role has no command set
        config.role_for(&entry.id, &entry.role)?;

        hosts.push(Host {
            id: entry.id.clone(),
            address: entry.address.clone(),
            user: entry.user.clone(),
            role: entry.role.clone(),
            tags: entry.tags.clone(),
        });
    }

    Ok(hosts)
}

/// Resolve and filter by tags (comma-separated, any-match).
///
/// An empty filter selects every host. A filter that matches nothing is an
/// error so a typo cannot silently deploy to zero hosts.
pub fn resolve_filtered(config: &Config, tags: Option<&str>) -> ConvoyResult<Vec<Host>> {
    let hosts = resolve(config)?;

    let Some(tags) = tags else {
        return Ok(hosts);
    };

    let wanted: Vec<&str> = tags
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if wanted.is_empty() {
        return Ok(hosts);
    }

    let filtered: Vec<Host> = hosts
        .into_iter()
        .filter(|h| wanted.iter().any(|t| h.tags.iter().any(|ht| ht == t) || h.id == *t))
        .collect();

    if filtered.is_empty() {
        return Err(ConvoyError::NoHostsMatched {
            tags: wanted.join(", "),
        });
    }

    Ok(filtered)
}

/// Find a single host by id.
pub fn find_host(config: &Config, id: &str) -> ConvoyResult<Host> {
    let hosts = resolve(config)?;
    hosts
        .into_iter()
        .find(|h| h.id == id)
        .ok_or_else(|| ConvoyError::HostNotFound { id: id.to_string() })
}
