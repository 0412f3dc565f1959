//! In-memory Redfish service for driver tests

use crate::error::Result;
use crate::session::{HttpMethod, RedfishResponse, RedfishTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const SERVICE: &str = "redfish/v1/Services/1";

fn link(path: &str) -> Value {
    json!({"@odata.id": format!("/{}", path)})
}

fn collection(paths: &[String]) -> Value {
    json!({"Members": paths.iter().map(|p| link(p)).collect::<Vec<_>>()})
}

fn rejection(message: &str) -> RedfishResponse {
    RedfishResponse {
        status: 400,
        body: json!({"error": {
            "code": "Base.1.0.GeneralError",
            "@Message.ExtendedInfo": [{"Message": message}]
        }}),
    }
}

fn unavailable() -> RedfishResponse {
    RedfishResponse {
        status: 503,
        body: json!({"error": {"message": "Service temporarily unavailable."}}),
    }
}

fn ok(body: Value) -> RedfishResponse {
    RedfishResponse { status: 200, body }
}

fn not_found() -> RedfishResponse {
    RedfishResponse {
        status: 404,
        body: Value::Null,
    }
}

/// Mutable pod state behind the fake transport
#[derive(Debug, Default)]
pub struct FakeRedfish {
    resources: BTreeMap<String, Value>,
    next_id: u64,
    /// Largest `TotalCores` a single processor may be allocated
    pub max_cores_per_processor: u64,
    /// GETs a node stays `Assembling` for
    pub assembly_polls: u32,
    pub fail_assembly: bool,
    /// The node listing after a successful allocation answers 503 once
    pub flaky_listing_after_allocate: bool,
    failing_listings: u32,
    /// Another client allocates a node with this name just before ours
    pub rival_allocation: Option<String>,
    remaining_polls: BTreeMap<String, u32>,
    /// Every request, as `METHOD path`
    pub requests: Vec<String>,
    pub allocations: Vec<Value>,
}

impl FakeRedfish {
    /// Two 16-thread systems, the first composed into node 1 with an 80 GiB
    /// remote drive. One 500 GiB volume group holds a 20 GiB master volume
    /// with no target.
    pub fn new() -> Self {
        let mut fake = Self {
            next_id: 100,
            max_cores_per_processor: 64,
            assembly_polls: 1,
            ..Default::default()
        };

        fake.put("redfish/v1/Systems", collection(&[
            "redfish/v1/Systems/1".into(),
            "redfish/v1/Systems/2".into(),
        ]));
        fake.add_system(1, 2300);
        fake.add_system(2, 2400);

        fake.put(
            "redfish/v1/Services",
            collection(&[SERVICE.to_string()]),
        );
        fake.put(
            &format!("{}/LogicalDrives/1", SERVICE),
            json!({
                "Id": "1",
                "Mode": "LVG",
                "CapacityGiB": 500.0,
                "Links": {"LogicalDrives": [
                    link(&format!("{}/LogicalDrives/2", SERVICE)),
                    link(&format!("{}/LogicalDrives/3", SERVICE))
                ]}
            }),
        );
        fake.put(
            &format!("{}/LogicalDrives/2", SERVICE),
            json!({"Id": "2", "Mode": "LV", "CapacityGiB": 20.0, "Links": {"Targets": []}}),
        );
        fake.put(
            &format!("{}/LogicalDrives/3", SERVICE),
            json!({
                "Id": "3",
                "Mode": "LV",
                "CapacityGiB": 80.0,
                "Links": {"Targets": [link(&format!("{}/Targets/1", SERVICE))]}
            }),
        );
        fake.put(
            &format!("{}/Targets/1", SERVICE),
            json!({"Addresses": [{"iSCSI": {
                "TargetIQN": "iqn.2010-08.io.maas:node1",
                "TargetLUN": [{"LUN": 1, "LogicalDrive": link(&format!("{}/LogicalDrives/3", SERVICE))}]
            }}]}),
        );
        fake.refresh_service_collections();

        fake.put(
            "redfish/v1/Nodes/1",
            json!({
                "Id": "1",
                "Name": "node1",
                "PowerState": "On",
                "ComposedNodeState": "PoweredOn",
                "Links": {
                    "ComputerSystem": link("redfish/v1/Systems/1"),
                    "RemoteDrives": [link(&format!("{}/Targets/1", SERVICE))]
                }
            }),
        );
        fake.refresh_nodes();
        fake
    }

    fn put(&mut self, path: &str, value: Value) {
        self.resources.insert(path.to_string(), value);
    }

    fn add_system(&mut self, n: u32, speed: u64) {
        let system = format!("redfish/v1/Systems/{}", n);
        let port = format!("redfish/v1/EthernetSwitches/1/Ports/{}", n);
        self.put(&system, json!({"Id": n.to_string()}));

        self.put(&format!("{}/Processors", system), collection(&[format!("{}/Processors/1", system)]));
        self.put(
            &format!("{}/Processors/1", system),
            json!({"TotalThreads": 16, "MaxSpeedMHz": speed, "InstructionSet": "x86-64"}),
        );

        let modules = vec![format!("{}/Memory/1", system), format!("{}/Memory/2", system)];
        self.put(&format!("{}/Memory", system), collection(&modules));
        for module in modules {
            self.put(&module, json!({"CapacityMiB": 8192}));
        }

        self.put(&format!("{}/Adapters", system), collection(&[format!("{}/Adapters/1", system)]));
        self.put(
            &format!("{}/Adapters/1/Devices", system),
            collection(&[format!("{}/Adapters/1/Devices/1", system)]),
        );
        self.put(
            &format!("{}/Adapters/1/Devices/1", system),
            json!({
                "Model": "INTEL_SSDMCEAC120B3",
                "SerialNumber": format!("CVLI31000{}", n),
                "CapacityGiB": 100.0,
                "Type": "SSD"
            }),
        );

        self.put(
            &format!("{}/EthernetInterfaces", system),
            collection(&[format!("{}/EthernetInterfaces/1", system)]),
        );
        self.put(
            &format!("{}/EthernetInterfaces/1", system),
            json!({
                "MACAddress": format!("54:ab:3a:36:af:4{}", n),
                "SpeedMbps": 10000,
                "Links": {"Oem": {"Intel_RackScale": {"NeighborPort": link(&port)}}}
            }),
        );
        self.put(&port, json!({"Links": {"PrimaryVLAN": link(&format!("{}/VLANs/1", port))}}));
        self.put(&format!("{}/VLANs/1", port), json!({"VLANId": 4088}));
    }

    fn paths_under(&self, prefix: &str) -> Vec<String> {
        let prefix = format!("{}/", prefix);
        self.resources
            .keys()
            .filter(|k| k.starts_with(&prefix) && !k[prefix.len()..].contains('/'))
            .cloned()
            .collect()
    }

    fn refresh_nodes(&mut self) {
        let nodes: Vec<String> = self
            .paths_under("redfish/v1/Nodes")
            .into_iter()
            .filter(|p| !p.ends_with("Actions"))
            .collect();
        self.put("redfish/v1/Nodes", collection(&nodes));
    }

    fn refresh_service_collections(&mut self) {
        let drives = self.paths_under(&format!("{}/LogicalDrives", SERVICE));
        let targets = self.paths_under(&format!("{}/Targets", SERVICE));
        self.put(&format!("{}/LogicalDrives", SERVICE), collection(&drives));
        self.put(&format!("{}/Targets", SERVICE), collection(&targets));
    }

    pub fn node(&self, id: &str) -> Option<&Value> {
        self.resources.get(&format!("redfish/v1/Nodes/{}", id))
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.paths_under("redfish/v1/Nodes")
            .iter()
            .filter_map(|p| p.rsplit('/').next().map(str::to_string))
            .collect()
    }

    /// Set a node's `ComposedNodeState`
    pub fn set_composed_state(&mut self, id: &str, state: &str) {
        if let Some(node) = self.resources.get_mut(&format!("redfish/v1/Nodes/{}", id)) {
            node["ComposedNodeState"] = json!(state);
        }
    }

    /// Drop one property of a resource
    pub fn remove_field(&mut self, path: &str, key: &str) {
        if let Some(resource) = self.resources.get_mut(path).and_then(Value::as_object_mut) {
            resource.remove(key);
        }
    }

    /// Drop a resource while leaving collections that link it untouched
    pub fn remove_resource(&mut self, path: &str) {
        self.resources.remove(path);
    }

    fn free_system(&self) -> Option<String> {
        let used: Vec<&Value> = self
            .resources
            .iter()
            .filter(|(k, _)| k.starts_with("redfish/v1/Nodes/"))
            .filter_map(|(_, v)| v.pointer("/Links/ComputerSystem/@odata.id"))
            .collect();
        ["redfish/v1/Systems/1", "redfish/v1/Systems/2"]
            .iter()
            .find(|s| {
                let id = format!("/{}", s);
                !used.iter().any(|u| u.as_str() == Some(id.as_str()))
            })
            .map(|s| s.to_string())
    }

    fn allocate(&mut self, body: Value) -> RedfishResponse {
        self.allocations.push(body.clone());
        let too_large = body["Processors"]
            .as_array()
            .map(|ps| {
                ps.iter()
                    .any(|p| p["TotalCores"].as_u64().unwrap_or(0) > self.max_cores_per_processor)
            })
            .unwrap_or(true);
        if too_large {
            return rejection("Not enough resources.");
        }
        let system = match self.free_system() {
            Some(system) => system,
            None => return rejection("No free computer system."),
        };

        if let Some(name) = self.rival_allocation.take() {
            self.next_id += 1;
            self.put(
                &format!("redfish/v1/Nodes/{}", self.next_id),
                json!({
                    "Id": self.next_id.to_string(),
                    "Name": name,
                    "PowerState": "Off",
                    "ComposedNodeState": "Allocated",
                    "Links": {"ComputerSystem": link(&system), "RemoteDrives": []}
                }),
            );
        }

        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut remote_drives = Vec::new();
        for drive in body["RemoteDrives"].as_array().cloned().unwrap_or_default() {
            self.next_id += 1;
            let drive_id = self.next_id;
            let lv = format!("{}/LogicalDrives/{}", SERVICE, drive_id);
            let target = format!("{}/Targets/{}", SERVICE, drive_id);
            self.put(
                &lv,
                json!({
                    "Id": drive_id.to_string(),
                    "Mode": "LV",
                    "CapacityGiB": drive["CapacityGiB"],
                    "Links": {"Targets": [link(&target)]}
                }),
            );
            self.put(
                &target,
                json!({"Addresses": [{"iSCSI": {
                    "TargetIQN": drive["iSCSIAddress"],
                    "TargetLUN": [{"LUN": 1, "LogicalDrive": link(&lv)}]
                }}]}),
            );
            if let Some(group) = self.resources.get_mut(&format!("{}/LogicalDrives/1", SERVICE)) {
                if let Some(members) = group["Links"]["LogicalDrives"].as_array_mut() {
                    members.push(link(&lv));
                }
            }
            remote_drives.push(link(&target));
        }
        self.refresh_service_collections();

        self.put(
            &format!("redfish/v1/Nodes/{}", id),
            json!({
                "Id": id,
                "Name": body["Name"],
                "PowerState": "Off",
                "ComposedNodeState": "Allocated",
                "Links": {
                    "ComputerSystem": link(&system),
                    "RemoteDrives": remote_drives
                }
            }),
        );
        self.refresh_nodes();
        if self.flaky_listing_after_allocate {
            self.failing_listings = 1;
        }
        RedfishResponse {
            status: 201,
            body: Value::Null,
        }
    }

    fn get(&mut self, path: &str) -> RedfishResponse {
        if path == "redfish/v1/Nodes" && self.failing_listings > 0 {
            self.failing_listings -= 1;
            return unavailable();
        }
        if let Some(remaining) = self.remaining_polls.get_mut(path) {
            if *remaining == 0 {
                let outcome = if self.fail_assembly { "Failed" } else { "PoweredOff" };
                self.remaining_polls.remove(path);
                if let Some(node) = self.resources.get_mut(path) {
                    node["ComposedNodeState"] = json!(outcome);
                }
            } else {
                *remaining -= 1;
            }
        }
        match self.resources.get(path) {
            Some(value) => ok(value.clone()),
            None => not_found(),
        }
    }

    fn post(&mut self, path: &str, body: Value) -> RedfishResponse {
        if path == "redfish/v1/Nodes/Actions/Allocate" {
            return self.allocate(body);
        }
        if let Some(node_path) = path.strip_suffix("/Actions/ComposedNode.Assemble") {
            let node_path = node_path.to_string();
            return match self.resources.get_mut(&node_path) {
                Some(node) => {
                    node["ComposedNodeState"] = json!("Assembling");
                    self.remaining_polls.insert(node_path, self.assembly_polls);
                    ok(Value::Null)
                }
                None => not_found(),
            };
        }
        if let Some(node_path) = path.strip_suffix("/Actions/ComposedNode.Reset") {
            let (power, composed) = match body["ResetType"].as_str() {
                Some("On") => ("On", "PoweredOn"),
                Some("ForceOff") => ("Off", "PoweredOff"),
                _ => return rejection("Unsupported ResetType."),
            };
            return match self.resources.get_mut(node_path) {
                Some(node) => {
                    node["PowerState"] = json!(power);
                    node["ComposedNodeState"] = json!(composed);
                    ok(Value::Null)
                }
                None => not_found(),
            };
        }
        not_found()
    }

    fn patch(&mut self, path: &str, body: Value) -> RedfishResponse {
        match self.resources.get_mut(path) {
            Some(resource) => {
                if let (Some(target), Some(patch)) = (resource.as_object_mut(), body.as_object()) {
                    for (key, value) in patch {
                        target.insert(key.clone(), value.clone());
                    }
                }
                ok(resource.clone())
            }
            None => not_found(),
        }
    }

    /// Deleting a node frees its remote drives
    fn delete(&mut self, path: &str) -> RedfishResponse {
        let node = match self.resources.remove(path) {
            Some(node) => node,
            None => return not_found(),
        };
        let targets: Vec<String> = node["Links"]["RemoteDrives"]
            .as_array()
            .map(|drives| {
                drives
                    .iter()
                    .filter_map(|d| d["@odata.id"].as_str())
                    .map(|p| p.trim_start_matches('/').to_string())
                    .collect()
            })
            .unwrap_or_default();
        for target in targets {
            let volumes: Vec<String> = self
                .resources
                .get(&target)
                .and_then(|t| t.pointer("/Addresses/0/iSCSI/TargetLUN"))
                .and_then(Value::as_array)
                .map(|luns| {
                    luns.iter()
                        .filter_map(|l| l["LogicalDrive"]["@odata.id"].as_str())
                        .map(|p| p.trim_start_matches('/').to_string())
                        .collect()
                })
                .unwrap_or_default();
            self.resources.remove(&target);
            for volume in volumes {
                self.resources.remove(&volume);
                let id = format!("/{}", volume);
                if let Some(group) = self.resources.get_mut(&format!("{}/LogicalDrives/1", SERVICE)) {
                    if let Some(members) = group["Links"]["LogicalDrives"].as_array_mut() {
                        members.retain(|m| m["@odata.id"].as_str() != Some(id.as_str()));
                    }
                }
            }
        }
        self.refresh_service_collections();
        self.refresh_nodes();
        RedfishResponse {
            status: 204,
            body: Value::Null,
        }
    }
}

/// Shared handle usable as a transport
#[derive(Clone)]
pub struct FakeTransport {
    pub pod: Arc<Mutex<FakeRedfish>>,
}

impl FakeTransport {
    pub fn new(pod: FakeRedfish) -> Self {
        Self {
            pod: Arc::new(Mutex::new(pod)),
        }
    }
}

#[async_trait]
impl RedfishTransport for FakeTransport {
    async fn request(&self, method: HttpMethod, path: &str, body: Option<Value>) -> Result<RedfishResponse> {
        let path = path.trim_start_matches('/');
        let mut pod = self.pod.lock();
        pod.requests.push(format!("{} {}", method, path));
        let body = body.unwrap_or(Value::Null);
        Ok(match method {
            HttpMethod::Get => pod.get(path),
            HttpMethod::Post => pod.post(path, body),
            HttpMethod::Patch => pod.patch(path, body),
            HttpMethod::Delete => pod.delete(path),
        })
    }
}
