//! Process-wide driver state
//!
//! Everything shared by all connections of a process lives in one
//! [`DriverContext`]: the merged service-name files, the endpoint groups with
//! their status snapshots, the result cache and the counter behind endpoint
//! rotation and read/write weighting. It is created on first use.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::config::{Config, HostPort, ServiceFile, DEFAULT_PORT};
use crate::endpoint::EndpointGroup;
use crate::error::Result;
use crate::result_cache::ResultCache;

/// State shared by every connection in the process
#[derive(Debug)]
pub struct DriverContext {
    services: RwLock<HashMap<String, ServiceFile>>,
    groups: RwLock<HashMap<String, Arc<EndpointGroup>>>,
    cache: OnceLock<Mutex<ResultCache>>,
    counter: AtomicU64,
}

/// The process driver context
pub fn driver() -> &'static DriverContext {
    static CONTEXT: OnceLock<DriverContext> = OnceLock::new();
    CONTEXT.get_or_init(|| DriverContext {
        services: RwLock::new(HashMap::new()),
        groups: RwLock::new(HashMap::new()),
        cache: OnceLock::new(),
        counter: AtomicU64::new(seed()),
    })
}

fn seed() -> u64 {
    rand::random::<u16>() as u64
}

impl DriverContext {
    /// Load a service-name file; later loads of the same path are no-ops
    pub fn load_service_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let key = path.as_ref().display().to_string();
        if self.services.read().map(|s| s.contains_key(&key)).unwrap_or(false) {
            return Ok(());
        }
        let file = ServiceFile::load(path.as_ref())?;
        tracing::debug!(path = %key, groups = file.group_names().count(), "loaded service file");
        if let Ok(mut services) = self.services.write() {
            services.insert(key, file);
        }
        Ok(())
    }

    /// Register an already parsed service-name file under `name`
    pub fn add_service_file(&self, name: impl Into<String>, file: ServiceFile) {
        if let Ok(mut services) = self.services.write() {
            services.insert(name.into(), file);
        }
    }

    /// Resolve the group name of `config` and apply global and group options
    pub(crate) fn prepare_config(&self, config: &mut Config) -> Result<()> {
        if let Some(path) = config.service_file.clone() {
            self.load_service_file(&path)?;
        }
        let Some(name) = config.group.clone() else {
            return Ok(());
        };
        let services = match self.services.read() {
            Ok(s) => s,
            Err(_) => return Ok(()),
        };
        for file in services.values() {
            if file.group(&name).is_some() {
                let mut globals: Vec<_> = file.globals.iter().collect();
                globals.sort();
                config.apply_options(globals)?;
                config.resolve_group(file)?;
                tracing::debug!(group = %name, endpoints = config.endpoints.len(), "resolved service group");
                return Ok(());
            }
        }
        drop(services);
        // Not a group: the name is a plain host on the default port
        if config.endpoints.is_empty() {
            config.endpoints = vec![HostPort::new(name.clone(), DEFAULT_PORT)];
        }
        config.group = None;
        Ok(())
    }

    /// The shared group for `config`'s endpoints
    ///
    /// Connections to the same endpoint list share status snapshots and the
    /// rotation cursor.
    pub fn endpoint_group(&self, config: &Config) -> Arc<EndpointGroup> {
        let name = match &config.group {
            Some(g) => g.to_ascii_uppercase(),
            None => config
                .endpoints
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        };
        if let Ok(groups) = self.groups.read() {
            if let Some(g) = groups.get(&name) {
                if g.len() == config.endpoints.len() {
                    return g.clone();
                }
            }
        }
        let group = Arc::new(EndpointGroup::new(name.clone(), &config.endpoints));
        if let Ok(mut groups) = self.groups.write() {
            groups.insert(name, group.clone());
        }
        group
    }

    /// The process result cache, sized by the first config that enables it
    pub(crate) fn result_cache(&self, config: &Config) -> &Mutex<ResultCache> {
        self.cache.get_or_init(|| {
            tracing::debug!(size_mib = config.rs_cache_size, "result cache enabled");
            Mutex::new(ResultCache::new(
                config.rs_cache_size.saturating_mul(1024 * 1024),
                config.rs_refresh_freq,
            ))
        })
    }

    /// Drop every cached result
    pub fn clear_result_cache(&self) {
        if let Some(cache) = self.cache.get() {
            if let Ok(mut cache) = cache.lock() {
                cache.clear();
            }
        }
    }

    /// Next value of the process counter
    pub fn next_count(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_resolution_from_service_file() {
        let ctx = driver();
        let file: ServiceFile = "CTX_TEST_GRP=(10.0.0.1:5236,10.0.0.2:5237)\n[CTX_TEST_GRP]\nLOGIN_MODE=1\n"
            .parse()
            .unwrap();
        ctx.add_service_file("ctx-test", file);

        let mut config: Config = "dm://SYSDBA:pw@ctx_test_grp".parse().unwrap();
        ctx.prepare_config(&mut config).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].port, 5237);

        let a = ctx.endpoint_group(&config);
        let b = ctx.endpoint_group(&config);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_group_is_a_host() {
        let mut config: Config = "dm://SYSDBA:pw@dbhost".parse().unwrap();
        driver().prepare_config(&mut config).unwrap();
        assert_eq!(config.endpoints, vec![HostPort::new("dbhost", DEFAULT_PORT)]);
        assert!(config.group.is_none());
    }

    #[test]
    fn test_counter_advances() {
        let a = driver().next_count();
        let b = driver().next_count();
        assert!(b > a);
    }
}
