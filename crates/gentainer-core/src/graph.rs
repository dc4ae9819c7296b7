//! Base image chains.

use crate::container::ContainerRegistry;
use crate::error::{CoreError, Result};

/// Build order for `name`: the root ancestor first, `name` last.
///
/// The whole chain is resolved before returning so callers can refuse a
/// cyclic or dangling chain without touching the host.
pub fn build_order(registry: &ContainerRegistry, name: &str) -> Result<Vec<String>> {
    let mut chain: Vec<String> = Vec::new();
    let mut current = registry.get(name)?;

    loop {
        chain.push(current.name.clone());
        let Some(base) = current.base_image.as_deref() else {
            break;
        };

        if base == current.name {
            return Err(CoreError::Graph {
                container: name.to_string(),
                reason: format!("{} uses itself as base image", base),
            });
        }
        if let Some(start) = chain.iter().position(|seen| seen == base) {
            let mut cycle = chain[start..].to_vec();
            cycle.push(base.to_string());
            return Err(CoreError::Graph {
                container: name.to_string(),
                reason: format!("cycle {}", cycle.join(" -> ")),
            });
        }

        current = registry.get(base).map_err(|_| {
            CoreError::not_found("base image", format!("{} (base of {})", base, current.name))
        })?;
    }

    chain.reverse();
    tracing::debug!(container = %name, order = ?chain, "Resolved build order");
    Ok(chain)
}
