//! Routes a [`Request`] to the component implementing its verb.

use super::{Request, Response};
use crate::disk::{Disk, DiskCloudProperties, DiskCreator, DiskFinder};
use crate::network::Networks;
use crate::stemcell::StemcellFinder;
use crate::vm::{Creator, Vm, VmCloudProperties, VmFinder, VmMetadata};
use serde::Deserialize;
use serde_json::{Map, Value};
use softlayer_cpi_core::{Error, Result, ResultExt};
use std::sync::Arc;
use tracing::{error, info, warn};

/// `create_stemcell` cloud properties.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
struct StemcellCloudProperties {
    virtual_disk_image_id: i64,
    #[serde(default)]
    virtual_disk_image_uuid: String,
    #[serde(default)]
    datacenter_name: String,
}

/// Routes CPI verbs to the VM, disk and stemcell components.
#[derive(Clone)]
pub struct Dispatcher {
    stemcells: Arc<dyn StemcellFinder>,
    creator: Arc<dyn Creator>,
    vms: Arc<dyn VmFinder>,
    disk_creator: Arc<dyn DiskCreator>,
    disks: Arc<dyn DiskFinder>,
}

impl Dispatcher {
    /// Create a dispatcher over the given components.
    #[must_use]
    pub fn new(
        stemcells: Arc<dyn StemcellFinder>,
        creator: Arc<dyn Creator>,
        vms: Arc<dyn VmFinder>,
        disk_creator: Arc<dyn DiskCreator>,
        disks: Arc<dyn DiskFinder>,
    ) -> Self {
        Self {
            stemcells,
            creator,
            vms,
            disk_creator,
            disks,
        }
    }

    /// Run `request` and wrap the outcome into a response. Never fails.
    pub async fn dispatch(&self, request: &Request) -> Response {
        info!(method = %request.method, "Dispatching CPI request");
        match self.run(request).await {
            Ok(result) => Response::ok(result),
            Err(err) => {
                if err.should_log() {
                    error!(method = %request.method, error = %err, "CPI request failed");
                } else {
                    warn!(method = %request.method, error = %err, "CPI request failed");
                }
                Response::failed(err)
            }
        }
    }

    async fn run(&self, req: &Request) -> Result<Value> {
        match req.method.as_str() {
            "create_vm" => self.create_vm(req).await,
            "delete_vm" => self.delete_vm(req.cid(0, "VM CID")?).await,
            "has_vm" => self.has_vm(req.cid(0, "VM CID")?).await,
            "reboot_vm" => self.reboot_vm(req.cid(0, "VM CID")?).await,
            "set_vm_metadata" => {
                let metadata: VmMetadata = req.arg(1, "metadata")?;
                self.set_vm_metadata(req.cid(0, "VM CID")?, &metadata).await
            }
            "configure_networks" => Err(Error::NotSupported(
                "configure_networks is not supported by the SoftLayer CPI".to_string(),
            )),
            "create_disk" => {
                self.create_disk(
                    req.arg(0, "size")?,
                    &req.arg(1, "cloud_properties")?,
                    req.optional_cid(2, "VM CID")?,
                )
                .await
            }
            "delete_disk" => self.delete_disk(req.cid(0, "disk CID")?).await,
            "attach_disk" => {
                self.attach_disk(req.cid(0, "VM CID")?, req.cid(1, "disk CID")?)
                    .await
            }
            "detach_disk" => {
                self.detach_disk(req.cid(0, "VM CID")?, req.cid(1, "disk CID")?)
                    .await
            }
            "create_stemcell" => {
                let image_path: String = req.arg(0, "image_path")?;
                self.create_stemcell(&image_path, &req.arg(1, "cloud_properties")?)
                    .await
            }
            "delete_stemcell" => {
                let cid = req.cid(0, "stemcell CID")?;
                info!(
                    stemcell_id = cid,
                    "Image templates are managed outside the CPI, nothing to delete"
                );
                Ok(Value::Null)
            }
            other => Err(Error::NotSupported(format!("Unknown method '{other}'"))),
        }
    }

    async fn require_vm(&self, id: i64) -> Result<Box<dyn Vm>> {
        self.vms
            .find(id)
            .await?
            .ok_or_else(|| Error::VmNotFound(format!("VM '{id}' not found")))
    }

    async fn require_disk(&self, id: i64) -> Result<Disk> {
        self.disks
            .find(id)
            .await?
            .ok_or_else(|| Error::DiskNotFound(format!("Disk '{id}' not found")))
    }

    async fn create_vm(&self, req: &Request) -> Result<Value> {
        let agent_id: String = req.arg(0, "agent_id")?;
        let stemcell_id = req.cid(1, "stemcell CID")?;
        let cloud_properties: VmCloudProperties = req.arg(2, "cloud_properties")?;
        let networks: Networks = req.arg(3, "networks")?;
        let env: Option<Map<String, Value>> = req.arg(5, "env")?;

        let stemcell = self
            .stemcells
            .find_by_id(stemcell_id)
            .await
            .with_context(|| format!("Finding stemcell '{stemcell_id}'"))?;
        let vm = self
            .creator
            .create(
                &agent_id,
                &stemcell,
                &cloud_properties,
                &networks,
                &env.unwrap_or_default(),
            )
            .await
            .with_context(|| format!("Creating VM with agent ID '{agent_id}'"))?;
        Ok(Value::String(vm.id().to_string()))
    }

    async fn delete_vm(&self, id: i64) -> Result<Value> {
        match self.vms.find(id).await? {
            Some(vm) => vm
                .delete()
                .await
                .with_context(|| format!("Deleting vm '{id}'"))?,
            None => info!(vm_id = id, "VM not found, nothing to delete"),
        }
        Ok(Value::Null)
    }

    async fn has_vm(&self, id: i64) -> Result<Value> {
        let found = self
            .vms
            .find(id)
            .await
            .with_context(|| format!("Finding VM '{id}'"))?
            .is_some();
        Ok(Value::Bool(found))
    }

    async fn reboot_vm(&self, id: i64) -> Result<Value> {
        self.require_vm(id)
            .await?
            .reboot()
            .await
            .with_context(|| format!("Rebooting VM '{id}'"))?;
        Ok(Value::Null)
    }

    async fn set_vm_metadata(&self, id: i64, metadata: &VmMetadata) -> Result<Value> {
        self.require_vm(id)
            .await?
            .set_metadata(metadata)
            .await
            .with_context(|| format!("Setting metadata on VM '{id}'"))?;
        Ok(Value::Null)
    }

    async fn create_disk(
        &self,
        size_mb: u64,
        properties: &DiskCloudProperties,
        vm_id: Option<i64>,
    ) -> Result<Value> {
        let datacenter = match vm_id {
            Some(id) => Some(self.require_vm(id).await?.datacenter()),
            None => None,
        };
        let disk = self
            .disk_creator
            .create(size_mb, properties, datacenter)
            .await
            .with_context(|| format!("Creating disk with size '{size_mb}'"))?;
        Ok(Value::String(disk.id.to_string()))
    }

    async fn delete_disk(&self, id: i64) -> Result<Value> {
        self.disks
            .delete(id)
            .await
            .with_context(|| format!("Deleting disk '{id}'"))?;
        Ok(Value::Null)
    }

    async fn attach_disk(&self, vm_id: i64, disk_id: i64) -> Result<Value> {
        let vm = self.require_vm(vm_id).await?;
        let disk = self.require_disk(disk_id).await?;
        vm.attach_disk(disk)
            .await
            .with_context(|| format!("Attaching disk '{disk_id}' to VM '{vm_id}'"))?;
        Ok(Value::Null)
    }

    async fn detach_disk(&self, vm_id: i64, disk_id: i64) -> Result<Value> {
        let vm = self.require_vm(vm_id).await?;
        let disk = self.require_disk(disk_id).await?;
        vm.detach_disk(disk)
            .await
            .with_context(|| format!("Detaching disk '{disk_id}' from VM '{vm_id}'"))?;
        Ok(Value::Null)
    }

    async fn create_stemcell(
        &self,
        image_path: &str,
        properties: &StemcellCloudProperties,
    ) -> Result<Value> {
        let stemcell = self
            .stemcells
            .find_by_id(properties.virtual_disk_image_id)
            .await
            .context("Creating stemcell")?;
        info!(
            stemcell_id = stemcell.id,
            uuid = %properties.virtual_disk_image_uuid,
            datacenter = %properties.datacenter_name,
            image_path,
            "Using existing image template as stemcell"
        );
        Ok(Value::String(stemcell.id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{MockDiskCreator, MockDiskFinder};
    use crate::stemcell::{MockStemcellFinder, Stemcell};
    use crate::vm::{MockCreator, MockVm, MockVmFinder};
    use serde_json::json;

    #[derive(Default)]
    struct Mocks {
        stemcells: MockStemcellFinder,
        creator: MockCreator,
        vms: MockVmFinder,
        disk_creator: MockDiskCreator,
        disks: MockDiskFinder,
    }

    impl Mocks {
        fn dispatcher(self) -> Dispatcher {
            Dispatcher::new(
                Arc::new(self.stemcells),
                Arc::new(self.creator),
                Arc::new(self.vms),
                Arc::new(self.disk_creator),
                Arc::new(self.disks),
            )
        }
    }

    fn request(method: &str, arguments: Value) -> Request {
        Request {
            method: method.to_string(),
            arguments: arguments.as_array().cloned().unwrap_or_default(),
            context: json!({"director_uuid": "abc"}),
        }
    }

    fn vm_in(datacenter: &'static str) -> Box<dyn Vm> {
        let mut vm = MockVm::new();
        vm.expect_id().return_const(1234_i64);
        vm.expect_datacenter().return_const(datacenter.to_string());
        Box::new(vm)
    }

    fn error_type(response: &Response) -> &str {
        &response.error.as_ref().unwrap().error_type
    }

    #[tokio::test]
    async fn test_unknown_method_not_supported() {
        let response = Mocks::default()
            .dispatcher()
            .dispatch(&request("current_vm_id", json!([])))
            .await;
        assert_eq!(error_type(&response), "Bosh::Clouds::NotSupported");
        assert_eq!(response.result, Value::Null);
    }

    #[tokio::test]
    async fn test_configure_networks_not_supported() {
        let response = Mocks::default()
            .dispatcher()
            .dispatch(&request("configure_networks", json!(["1234", {}])))
            .await;
        assert_eq!(error_type(&response), "Bosh::Clouds::NotSupported");
    }

    #[tokio::test]
    async fn test_create_vm() {
        let mut mocks = Mocks::default();
        mocks
            .stemcells
            .expect_find_by_id()
            .withf(|id| *id == 5678)
            .returning(|id| {
                Ok(Stemcell {
                    id,
                    uuid: "uuid-5678".to_string(),
                })
            });
        mocks
            .creator
            .expect_create()
            .withf(|agent_id, stemcell, props, networks, env| {
                agent_id == "agent-1"
                    && stemcell.uuid == "uuid-5678"
                    && props.vm_name_prefix == "bosh-"
                    && networks.contains_key("default")
                    && env.contains_key("bosh")
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(vm_in("dal09")));

        let response = mocks
            .dispatcher()
            .dispatch(&request(
                "create_vm",
                json!([
                    "agent-1",
                    "5678",
                    {"vmNamePrefix": "bosh-", "bosh_ip": "10.0.0.1"},
                    {"default": {"type": "dynamic", "dns": ["8.8.8.8"]}},
                    [],
                    {"bosh": {"password": "crypted"}}
                ]),
            ))
            .await;
        assert_eq!(response, Response::ok(json!("1234")));
    }

    #[tokio::test]
    async fn test_create_vm_retryable_failure() {
        let mut mocks = Mocks::default();
        mocks.stemcells.expect_find_by_id().returning(|id| {
            Ok(Stemcell {
                id,
                uuid: String::new(),
            })
        });
        mocks.creator.expect_create().returning(|_, _, _, _, _| {
            Err(Error::VmCreationFailed {
                message: "Time Out: Power on virtual guest".to_string(),
                retryable: true,
            })
        });

        let response = mocks
            .dispatcher()
            .dispatch(&request(
                "create_vm",
                json!(["agent-1", "5678", {}, {"default": {"type": "dynamic"}}, [], null]),
            ))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.error_type, "Bosh::Clouds::VMCreationFailed");
        assert!(error.ok_to_retry);
        assert!(error.message.starts_with("Creating VM with agent ID 'agent-1'"));
    }

    #[tokio::test]
    async fn test_has_vm() {
        let mut mocks = Mocks::default();
        mocks
            .vms
            .expect_find()
            .withf(|id| *id == 1234)
            .return_once(|_| Ok(Some(vm_in("dal09"))));
        mocks.vms.expect_find().returning(|_| Ok(None));
        let dispatcher = mocks.dispatcher();

        let found = dispatcher.dispatch(&request("has_vm", json!(["1234"]))).await;
        assert_eq!(found.result, json!(true));
        let missing = dispatcher.dispatch(&request("has_vm", json!(["99"]))).await;
        assert_eq!(missing, Response::ok(json!(false)));
    }

    #[tokio::test]
    async fn test_delete_missing_vm_succeeds() {
        let mut mocks = Mocks::default();
        mocks.vms.expect_find().returning(|_| Ok(None));

        let response = mocks
            .dispatcher()
            .dispatch(&request("delete_vm", json!(["1234"])))
            .await;
        assert_eq!(response, Response::ok(Value::Null));
    }

    #[tokio::test]
    async fn test_reboot_missing_vm() {
        let mut mocks = Mocks::default();
        mocks.vms.expect_find().returning(|_| Ok(None));

        let response = mocks
            .dispatcher()
            .dispatch(&request("reboot_vm", json!(["1234"])))
            .await;
        assert_eq!(error_type(&response), "Bosh::Clouds::VMNotFound");
    }

    #[tokio::test]
    async fn test_set_vm_metadata() {
        let mut vm = MockVm::new();
        vm.expect_set_metadata()
            .withf(|metadata| metadata.get("director") == Some(&json!("bosh")))
            .times(1)
            .returning(|_| Ok(()));
        let mut mocks = Mocks::default();
        mocks
            .vms
            .expect_find()
            .return_once(move |_| Ok(Some(Box::new(vm) as Box<dyn Vm>)));

        let response = mocks
            .dispatcher()
            .dispatch(&request(
                "set_vm_metadata",
                json!(["1234", {"director": "bosh", "deployment": "cf"}]),
            ))
            .await;
        assert_eq!(response, Response::ok(Value::Null));
    }

    #[tokio::test]
    async fn test_invalid_cid_is_cloud_error() {
        let response = Mocks::default()
            .dispatcher()
            .dispatch(&request("has_vm", json!(["vm-1234"])))
            .await;
        assert_eq!(error_type(&response), "Bosh::Clouds::CloudError");
    }

    #[tokio::test]
    async fn test_create_disk_in_vm_datacenter() {
        let mut mocks = Mocks::default();
        mocks
            .vms
            .expect_find()
            .return_once(|_| Ok(Some(vm_in("ams03"))));
        mocks
            .disk_creator
            .expect_create()
            .withf(|size, props, datacenter| {
                *size == 20_480 && props.iops == 1000 && datacenter.as_deref() == Some("ams03")
            })
            .times(1)
            .returning(|_, _, _| Ok(Disk::new(42)));

        let response = mocks
            .dispatcher()
            .dispatch(&request("create_disk", json!([20_480, {"iops": 1000}, "1234"])))
            .await;
        assert_eq!(response, Response::ok(json!("42")));
    }

    #[tokio::test]
    async fn test_create_disk_without_vm() {
        let mut mocks = Mocks::default();
        mocks.vms.expect_find().never();
        mocks
            .disk_creator
            .expect_create()
            .withf(|_, props, datacenter| props.datacenter == "dal09" && datacenter.is_none())
            .returning(|_, _, _| Ok(Disk::new(42)));

        let response = mocks
            .dispatcher()
            .dispatch(&request(
                "create_disk",
                json!([1024, {"datacenter": "dal09"}, null]),
            ))
            .await;
        assert_eq!(response.result, json!("42"));
    }

    #[tokio::test]
    async fn test_attach_missing_disk() {
        let mut mocks = Mocks::default();
        mocks
            .vms
            .expect_find()
            .return_once(|_| Ok(Some(vm_in("dal09"))));
        mocks.disks.expect_find().returning(|_| Ok(None));

        let response = mocks
            .dispatcher()
            .dispatch(&request("attach_disk", json!(["1234", "42"])))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.error_type, "Bosh::Clouds::CloudError");
        assert!(error.message.contains("Disk '42' not found"));
    }

    #[tokio::test]
    async fn test_detach_disk() {
        let mut vm = MockVm::new();
        vm.expect_detach_disk()
            .withf(|disk| disk.id == 42)
            .times(1)
            .returning(|_| Ok(()));
        let mut mocks = Mocks::default();
        mocks
            .vms
            .expect_find()
            .return_once(move |_| Ok(Some(Box::new(vm) as Box<dyn Vm>)));
        mocks
            .disks
            .expect_find()
            .returning(|id| Ok(Some(Disk::new(id))));

        let response = mocks
            .dispatcher()
            .dispatch(&request("detach_disk", json!(["1234", "42"])))
            .await;
        assert_eq!(response, Response::ok(Value::Null));
    }

    #[tokio::test]
    async fn test_delete_disk() {
        let mut mocks = Mocks::default();
        mocks
            .disks
            .expect_delete()
            .withf(|id| *id == 42)
            .times(1)
            .returning(|_| Ok(()));

        let response = mocks
            .dispatcher()
            .dispatch(&request("delete_disk", json!(["42"])))
            .await;
        assert_eq!(response, Response::ok(Value::Null));
    }

    #[tokio::test]
    async fn test_create_stemcell_returns_image_id() {
        let mut mocks = Mocks::default();
        mocks
            .stemcells
            .expect_find_by_id()
            .withf(|id| *id == 1_234_567)
            .returning(|id| {
                Ok(Stemcell {
                    id,
                    uuid: "uuid".to_string(),
                })
            });

        let response = mocks
            .dispatcher()
            .dispatch(&request(
                "create_stemcell",
                json!([
                    "/tmp/image",
                    {
                        "virtual-disk-image-id": 1_234_567,
                        "virtual-disk-image-uuid": "uuid",
                        "datacenter-name": "dal09"
                    }
                ]),
            ))
            .await;
        assert_eq!(response, Response::ok(json!("1234567")));
    }

    #[tokio::test]
    async fn test_delete_stemcell_is_noop() {
        let response = Mocks::default()
            .dispatcher()
            .dispatch(&request("delete_stemcell", json!(["1234567"])))
            .await;
        assert_eq!(response, Response::ok(Value::Null));
    }
}
