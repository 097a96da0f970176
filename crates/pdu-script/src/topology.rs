//! Device instances and the node-to-plug mapping
//!
//! The configuration collaborator loads these tables once, before the
//! runtime starts; the runtime only reads them. Hostlist and alias
//! expansion happen upstream; node names arriving here are already
//! resolved.

use std::collections::HashMap;
use std::sync::Arc;

use crate::device::DeviceType;
use crate::error::ConfigError;

/// Wire parameters for one device instance
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "class", rename_all = "lowercase"))]
pub enum ConnectParams {
    /// Raw TCP
    Tcp {
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
    },
    /// TCP speaking telnet
    Telnet {
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
    },
    /// Serial line
    Serial {
        /// Device path ("/dev/ttyS1")
        path: String,
        /// Baud rate
        baud: u32,
    },
}

impl ConnectParams {
    /// A short display label for logs
    pub fn label(&self) -> String {
        match self {
            ConnectParams::Tcp { host, port } => format!("tcp://{}:{}", host, port),
            ConnectParams::Telnet { host, port } => format!("telnet://{}:{}", host, port),
            ConnectParams::Serial { path, baud } => format!("{}@{}", path, baud),
        }
    }
}

/// One physical device in the cluster
#[derive(Debug, Clone)]
pub struct DeviceInstance {
    /// Device identifier ("pdu0")
    pub id: String,
    /// Name of the device type this instance is
    pub device_type: String,
    /// How to reach it
    pub params: ConnectParams,
}

impl DeviceInstance {
    /// Build an instance record
    pub fn new(
        id: impl Into<String>,
        device_type: impl Into<String>,
        params: ConnectParams,
    ) -> Self {
        Self {
            id: id.into(),
            device_type: device_type.into(),
            params,
        }
    }
}

/// Where a node's power comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlugBinding {
    /// Device identifier
    pub device: String,
    /// Plug name on that device
    pub plug: String,
}

/// The loaded cluster topology: device types, device instances, and the
/// node-to-plug map
///
/// Built once at startup by the configuration collaborator, then shared
/// read-only with the runtime.
#[derive(Debug, Default)]
pub struct Topology {
    device_types: HashMap<String, Arc<DeviceType>>,
    devices: HashMap<String, DeviceInstance>,
    nodes: HashMap<String, PlugBinding>,
}

impl Topology {
    /// An empty topology
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled device type
    pub fn add_device_type(&mut self, dtype: Arc<DeviceType>) {
        self.device_types.insert(dtype.name().to_string(), dtype);
    }

    /// Register a device instance; its type must already be registered
    pub fn add_device(&mut self, instance: DeviceInstance) -> Result<(), ConfigError> {
        if !self.device_types.contains_key(&instance.device_type) {
            return Err(ConfigError::UnknownDeviceType(instance.device_type));
        }
        if self.devices.contains_key(&instance.id) {
            return Err(ConfigError::DuplicateDevice(instance.id));
        }
        self.devices.insert(instance.id.clone(), instance);
        Ok(())
    }

    /// Map a node name onto a (device, plug) pair
    pub fn add_node(
        &mut self,
        node: impl Into<String>,
        device: impl Into<String>,
        plug: impl Into<String>,
    ) -> Result<(), ConfigError> {
        let node = node.into();
        let device = device.into();
        let plug = plug.into();

        let Some(instance) = self.devices.get(&device) else {
            return Err(ConfigError::UnknownDevice(device));
        };
        let Some(dtype) = self.device_types.get(&instance.device_type) else {
            return Err(ConfigError::UnknownDeviceType(instance.device_type.clone()));
        };
        if !dtype.has_plug(&plug) {
            return Err(ConfigError::UnknownPlug { device, plug });
        }
        if self.nodes.contains_key(&node) {
            return Err(ConfigError::DuplicateNode(node));
        }
        self.nodes.insert(node, PlugBinding { device, plug });
        Ok(())
    }

    /// Look up a device instance
    pub fn device(&self, id: &str) -> Option<&DeviceInstance> {
        self.devices.get(id)
    }

    /// The compiled type of a device instance
    pub fn device_type_of(&self, id: &str) -> Option<&Arc<DeviceType>> {
        let instance = self.devices.get(id)?;
        self.device_types.get(&instance.device_type)
    }

    /// Look up a node's plug binding
    pub fn node(&self, name: &str) -> Option<&PlugBinding> {
        self.nodes.get(name)
    }

    /// Iterate over all device instances
    pub fn devices(&self) -> impl Iterator<Item = &DeviceInstance> {
        self.devices.values()
    }

    /// Iterate over all node names
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Group a node set by owning device
    ///
    /// Returns (device id → [(node, plug)]) for resolvable nodes plus
    /// the list of names no binding exists for.
    pub fn group_by_device<'a, I>(&self, names: I) -> (HashMap<String, Vec<(String, String)>>, Vec<String>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut grouped: HashMap<String, Vec<(String, String)>> = HashMap::new();
        let mut unknown = Vec::new();
        for name in names {
            match self.nodes.get(name) {
                Some(binding) => grouped
                    .entry(binding.device.clone())
                    .or_default()
                    .push((name.to_string(), binding.plug.clone())),
                None => unknown.push(name.to_string()),
            }
        }
        (grouped, unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ConnectClass, DeviceTypeDef};

    fn sample() -> Topology {
        let dtype = Arc::new(
            DeviceTypeDef::new("rpc", ConnectClass::Tcp, ["1", "2"])
                .compile()
                .unwrap(),
        );
        let mut topo = Topology::new();
        topo.add_device_type(dtype);
        topo.add_device(DeviceInstance::new(
            "pdu0",
            "rpc",
            ConnectParams::Tcp {
                host: "pdu0.mgmt".to_string(),
                port: 23,
            },
        ))
        .unwrap();
        topo.add_node("n0", "pdu0", "1").unwrap();
        topo.add_node("n1", "pdu0", "2").unwrap();
        topo
    }

    #[test]
    fn nodes_resolve_to_device_and_plug() {
        let topo = sample();
        let binding = topo.node("n1").unwrap();
        assert_eq!(binding.device, "pdu0");
        assert_eq!(binding.plug, "2");
    }

    #[test]
    fn unknown_device_type_is_rejected() {
        let mut topo = Topology::new();
        let err = topo
            .add_device(DeviceInstance::new(
                "pdu0",
                "nonesuch",
                ConnectParams::Tcp {
                    host: "x".to_string(),
                    port: 23,
                },
            ))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDeviceType(_)));
    }

    #[test]
    fn unknown_plug_is_rejected() {
        let mut topo = sample();
        let err = topo.add_node("n2", "pdu0", "9").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlug { .. }));
    }

    #[test]
    fn grouping_splits_known_from_unknown() {
        let topo = sample();
        let (grouped, unknown) = topo.group_by_device(["n0", "n1", "ghost"]);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped["pdu0"].len(), 2);
        assert_eq!(unknown, ["ghost"]);
    }
}
