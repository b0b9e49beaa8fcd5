/// Kubernetes node address lookup
use serde::Deserialize;

use crate::error::{Error, Result};

/// A node and the address it is reachable on from outside the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub node: String,
    pub external_ip: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NodeList {
    #[serde(default)]
    items: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    metadata: NodeMeta,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Debug, Deserialize)]
struct NodeMeta {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    addresses: Vec<Address>,
}

#[derive(Debug, Deserialize)]
struct Address {
    #[serde(rename = "type")]
    address_type: String,
    address: String,
}

impl NodeList {
    /// External address of every node, in listing order
    ///
    /// A node without an `ExternalIP` entry is an error rather than skipped.
    pub(crate) fn external_addresses(self) -> Result<Vec<NodeAddress>> {
        self.items
            .into_iter()
            .map(|node| {
                let name = node.metadata.name;
                match node
                    .status
                    .addresses
                    .into_iter()
                    .find(|a| a.address_type == "ExternalIP")
                {
                    Some(address) => Ok(NodeAddress {
                        node: name,
                        external_ip: address.address,
                    }),
                    None => Err(Error::NoExternalIp(name)),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(name: &str, addresses: serde_json::Value) -> serde_json::Value {
        json!({"metadata": {"name": name}, "status": {"addresses": addresses}})
    }

    #[test]
    fn test_external_addresses_in_order() {
        let list: NodeList = serde_json::from_value(json!({
            "kind": "NodeList",
            "items": [
                node("devpool-a", json!([
                    {"type": "InternalIP", "address": "10.124.0.2"},
                    {"type": "ExternalIP", "address": "203.0.113.10"}
                ])),
                node("devpool-b", json!([
                    {"type": "ExternalIP", "address": "203.0.113.11"}
                ]))
            ]
        }))
        .unwrap();

        let addresses = list.external_addresses().unwrap();
        assert_eq!(
            addresses,
            vec![
                NodeAddress {
                    node: "devpool-a".to_string(),
                    external_ip: "203.0.113.10".to_string()
                },
                NodeAddress {
                    node: "devpool-b".to_string(),
                    external_ip: "203.0.113.11".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_missing_external_ip_is_error() {
        let list: NodeList = serde_json::from_value(json!({
            "items": [node("devpool-a", json!([{"type": "InternalIP", "address": "10.124.0.2"}]))]
        }))
        .unwrap();

        assert!(matches!(
            list.external_addresses(),
            Err(Error::NoExternalIp(name)) if name == "devpool-a"
        ));
    }
}
