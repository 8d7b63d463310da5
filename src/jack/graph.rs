//! The slice of the JACK API the patchbay needs

use super::notify::PortWatcher;
use crate::error::GraphError;
use jack::{AsyncClient, Client, PortFlags, PortId};
use std::sync::Arc;

/// Read and connect ports in an audio graph.  The patchbay never
/// disconnects anything.
pub trait PortGraph {
    /// Full name of a registered port
    fn port_name(&self, id: PortId) -> Option<String>;
    fn exists(&self, name: &str) -> bool;
    /// Names of every port in the graph
    fn ports(&self) -> Vec<String>;
    fn is_connected(&self, source: &str, destination: &str) -> bool;
    /// Connect `source` to `destination`.  An existing connection is
    /// not an error.
    fn connect(&self, source: &str, destination: &str) -> Result<(), GraphError>;
}

impl PortGraph for Client {
    fn port_name(&self, id: PortId) -> Option<String> {
        self.port_by_id(id).and_then(|p| p.name().ok())
    }

    fn exists(&self, name: &str) -> bool {
        self.port_by_name(name).is_some()
    }

    fn ports(&self) -> Vec<String> {
        Client::ports(self, None, None, PortFlags::empty())
    }

    fn is_connected(&self, source: &str, destination: &str) -> bool {
        self.port_by_name(source)
            .and_then(|p| p.is_connected_to(destination).ok())
            .unwrap_or(false)
    }

    fn connect(&self, source: &str, destination: &str) -> Result<(), GraphError> {
        match self.connect_ports_by_name(source, destination) {
            Ok(()) | Err(jack::Error::PortAlreadyConnected(_, _)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl PortGraph for AsyncClient<PortWatcher, ()> {
    fn port_name(&self, id: PortId) -> Option<String> {
        self.as_client().port_name(id)
    }

    fn exists(&self, name: &str) -> bool {
        self.as_client().exists(name)
    }

    fn ports(&self) -> Vec<String> {
        PortGraph::ports(self.as_client())
    }

    fn is_connected(&self, source: &str, destination: &str) -> bool {
        self.as_client().is_connected(source, destination)
    }

    fn connect(&self, source: &str, destination: &str) -> Result<(), GraphError> {
        self.as_client().connect(source, destination)
    }
}

impl<G: PortGraph + ?Sized> PortGraph for Arc<G> {
    fn port_name(&self, id: PortId) -> Option<String> {
        (**self).port_name(id)
    }

    fn exists(&self, name: &str) -> bool {
        (**self).exists(name)
    }

    fn ports(&self) -> Vec<String> {
        (**self).ports()
    }

    fn is_connected(&self, source: &str, destination: &str) -> bool {
        (**self).is_connected(source, destination)
    }

    fn connect(&self, source: &str, destination: &str) -> Result<(), GraphError> {
        (**self).connect(source, destination)
    }
}
