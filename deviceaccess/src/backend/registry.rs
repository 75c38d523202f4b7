//! Backend factories and device-descriptor resolution.
//!
//! The registry is an explicit value owned by the application; there is no
//! process-global factory singleton. Map files are consumed in their parsed
//! form and registered under a name that the `map=`/`lmap=` descriptor keys
//! refer to.

use super::dummy::new_dummy_backend;
use super::rebot::{new_rebot_backend, DEFAULT_CONNECTION_TIMEOUT};
use super::shared_dummy::new_shared_dummy_backend;
use super::DeviceBackend;
use crate::catalogue::numeric::NumericAddressedRegisterCatalogue;
use crate::error::{Error, Result};
use crate::lnm::info::LNMRegisterInfo;
use crate::lnm::LogicalNameMappingBackend;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Parsed `kind?key=value,...` / legacy `(kind:address?opts)` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub kind: String,
    pub address: String,
    pub parameters: HashMap<String, String, FnvBuildHasher>,
}

impl DeviceDescriptor {
    /// Accepts `kind`, `kind:address`, `kind?k=v&k2=v2` and the same forms
    /// wrapped in parentheses. Unknown keys are kept; factories ignore what
    /// they do not consume.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(trimmed);

        let (head, query) = match trimmed.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (trimmed, None),
        };
        let (kind, address) = match head.split_once(':') {
            Some((kind, address)) => (kind, address),
            None => (head, ""),
        };
        if kind.is_empty() {
            return Err(Error::logic(format!("empty backend kind in '{input}'")));
        }

        let mut parameters: HashMap<String, String, FnvBuildHasher> = HashMap::default();
        if let Some(query) = query {
            for pair in query.split(['&', ',']) {
                if pair.is_empty() {
                    continue;
                }
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    Error::logic(format!("malformed descriptor parameter '{pair}' in '{input}'"))
                })?;
                parameters.insert(key.to_owned(), value.to_owned());
            }
        }

        Ok(DeviceDescriptor {
            kind: kind.to_owned(),
            address: address.to_owned(),
            parameters,
        })
    }
}

pub type BackendFactory = fn(&DeviceRegistry, &DeviceDescriptor) -> Result<Arc<dyn DeviceBackend>>;

/// Resolves aliases and descriptors to backend instances.
pub struct DeviceRegistry {
    factories: HashMap<String, BackendFactory, FnvBuildHasher>,
    aliases: HashMap<String, String, FnvBuildHasher>,
    maps: HashMap<String, NumericAddressedRegisterCatalogue, FnvBuildHasher>,
    logical_maps: HashMap<String, Arc<Vec<LNMRegisterInfo>>, FnvBuildHasher>,
    /// One backend instance per descriptor, while anybody holds it.
    instances: Mutex<HashMap<String, Weak<dyn DeviceBackend>, FnvBuildHasher>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let mut registry = DeviceRegistry {
            factories: HashMap::default(),
            aliases: HashMap::default(),
            maps: HashMap::default(),
            logical_maps: HashMap::default(),
            instances: Mutex::new(HashMap::default()),
        };
        registry.register_backend_type("dummy", dummy_factory);
        registry.register_backend_type("sharedDummy", shared_dummy_factory);
        registry.register_backend_type("rebot", rebot_factory);
        registry.register_backend_type("logicalNameMap", logical_name_map_factory);
        registry
    }

    /// Adds (or replaces) a backend kind.
    pub fn register_backend_type(&mut self, kind: &str, factory: BackendFactory) {
        if self.factories.insert(kind.to_owned(), factory).is_some() {
            log::warn!("backend type '{kind}' was replaced. Is this on purpose?");
        }
    }

    /// Consumes an already-parsed DMAP table `{alias -> descriptor}`.
    pub fn add_alias_table(&mut self, table: impl IntoIterator<Item = (String, String)>) {
        for (alias, descriptor) in table {
            self.add_alias(&alias, &descriptor);
        }
    }

    pub fn add_alias(&mut self, alias: &str, descriptor: &str) {
        self.aliases
            .insert(alias.to_owned(), descriptor.to_owned());
    }

    /// Registers an already-parsed numeric register map under `name`.
    pub fn register_map(&mut self, name: &str, map: NumericAddressedRegisterCatalogue) {
        self.maps.insert(name.to_owned(), map);
    }

    /// Registers an already-parsed logical name map under `name`.
    pub fn register_logical_map(&mut self, name: &str, table: Vec<LNMRegisterInfo>) {
        self.logical_maps
            .insert(name.to_owned(), Arc::new(table));
    }

    pub fn numeric_map(&self, name: &str) -> Result<NumericAddressedRegisterCatalogue> {
        self.maps
            .get(name)
            .cloned()
            .ok_or_else(|| Error::logic(format!("no register map registered under '{name}'")))
    }

    pub fn logical_map(&self, name: &str) -> Result<Arc<Vec<LNMRegisterInfo>>> {
        self.logical_maps
            .get(name)
            .cloned()
            .ok_or_else(|| Error::logic(format!("no logical name map registered under '{name}'")))
    }

    /// Resolves an alias (or literal descriptor) to a backend instance.
    /// Descriptors resolve to the same instance while it is alive.
    pub fn get_backend(&self, alias_or_descriptor: &str) -> Result<Arc<dyn DeviceBackend>> {
        let descriptor_string = self
            .aliases
            .get(alias_or_descriptor)
            .map(String::as_str)
            .unwrap_or(alias_or_descriptor)
            .to_owned();

        // the cache lock is not held across the factory call: factories may
        // resolve further devices through the registry (logical name maps do)
        {
            let instances = self.instances.lock().unwrap();
            if let Some(existing) = instances.get(&descriptor_string).and_then(Weak::upgrade) {
                return Ok(existing);
            }
        }

        let descriptor = DeviceDescriptor::parse(&descriptor_string)?;
        let factory = self.factories.get(&descriptor.kind).ok_or_else(|| {
            Error::logic(format!("unknown backend kind '{}'", descriptor.kind))
        })?;
        let backend = factory(self, &descriptor)?;

        let mut instances = self.instances.lock().unwrap();
        if let Some(existing) = instances.get(&descriptor_string).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        instances.insert(descriptor_string, Arc::downgrade(&backend));
        Ok(backend)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn require_map<'a>(
    registry: &DeviceRegistry,
    descriptor: &'a DeviceDescriptor,
) -> Result<(&'a str, NumericAddressedRegisterCatalogue)> {
    let name = descriptor
        .parameters
        .get("map")
        .ok_or_else(|| Error::logic(format!("backend '{}': no map given", descriptor.kind)))?;
    Ok((name, registry.numeric_map(name)?))
}

fn dummy_factory(
    registry: &DeviceRegistry,
    descriptor: &DeviceDescriptor,
) -> Result<Arc<dyn DeviceBackend>> {
    let (_, map) = require_map(registry, descriptor)?;
    Ok(new_dummy_backend(map))
}

fn shared_dummy_factory(
    registry: &DeviceRegistry,
    descriptor: &DeviceDescriptor,
) -> Result<Arc<dyn DeviceBackend>> {
    let (map_name, map) = require_map(registry, descriptor)?;
    let backend = new_shared_dummy_backend(&descriptor.address, map_name, map)?;
    Ok(backend)
}

fn rebot_factory(
    registry: &DeviceRegistry,
    descriptor: &DeviceDescriptor,
) -> Result<Arc<dyn DeviceBackend>> {
    let (_, map) = require_map(registry, descriptor)?;
    let host = descriptor
        .parameters
        .get("ip")
        .map(String::as_str)
        .or_else(|| {
            (!descriptor.address.is_empty()).then_some(descriptor.address.as_str())
        })
        .ok_or_else(|| Error::logic("rebot: no host given"))?;
    let port: u16 = descriptor
        .parameters
        .get("port")
        .ok_or_else(|| Error::logic("rebot: no port given"))?
        .parse()
        .map_err(|_| Error::logic("rebot: port is not a number"))?;
    let timeout = match descriptor.parameters.get("timeout") {
        Some(seconds) => Duration::from_secs(
            seconds
                .parse()
                .map_err(|_| Error::logic("rebot: timeout is not a number of seconds"))?,
        ),
        None => DEFAULT_CONNECTION_TIMEOUT,
    };
    Ok(new_rebot_backend(host, port, timeout, map))
}

fn logical_name_map_factory(
    registry: &DeviceRegistry,
    descriptor: &DeviceDescriptor,
) -> Result<Arc<dyn DeviceBackend>> {
    let name = descriptor
        .parameters
        .get("lmap")
        .ok_or_else(|| Error::logic("logicalNameMap: no lmap given"))?;
    let table = registry.logical_map(name)?;
    LogicalNameMappingBackend::create(registry, &table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri_style() {
        let d = DeviceDescriptor::parse("dummy?map=app.map&foo=bar").unwrap();
        assert_eq!(d.kind, "dummy");
        assert_eq!(d.address, "");
        assert_eq!(d.parameters.get("map").unwrap(), "app.map");
        assert_eq!(d.parameters.get("foo").unwrap(), "bar");
    }

    #[test]
    fn test_parse_legacy_style() {
        let d = DeviceDescriptor::parse("(rebot:localhost?port=5001,map=m.map)").unwrap();
        assert_eq!(d.kind, "rebot");
        assert_eq!(d.address, "localhost");
        assert_eq!(d.parameters.get("port").unwrap(), "5001");
        assert_eq!(d.parameters.get("map").unwrap(), "m.map");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DeviceDescriptor::parse("").is_err());
        assert!(DeviceDescriptor::parse("dummy?map").is_err());
        assert!(DeviceDescriptor::parse("?x=1").is_err());
    }
}
