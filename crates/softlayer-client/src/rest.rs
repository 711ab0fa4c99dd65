//! SoftLayer REST transport.
//!
//! Calls are addressed as `{endpoint}/{Service}/{id}/{method}.json`. Object masks and filters
//! travel as the `objectMask` and `objectFilter` query parameters, call arguments as a
//! `{"parameters": [...]}` body. Exceptions returned by SoftLayer are decoded into
//! [`Error::Api`] with their [`ExceptionKind`] here, once.

use crate::api::{RebootKind, SoftLayerApi};
use crate::models::{
    BlockDeviceTemplateGroup, Hardware, Location, NetworkStorage, OrderReceipt, ProductItem,
    ProductItemPrice, ProductOrder, ProductPackage, ReloadConfiguration, SshKey, Transaction,
    VirtualGuest,
};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use softlayer_cpi_core::client::{ClientConfig, RetryPolicy, DEFAULT_CONNECT_TIMEOUT};
use softlayer_cpi_core::config::SoftLayerConfig;
use softlayer_cpi_core::{Error, ExceptionKind, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

const USER_AGENT: &str = concat!("bosh-softlayer-cpi/", env!("CARGO_PKG_VERSION"));

const VIRTUAL_GUEST: &str = "SoftLayer_Virtual_Guest";
const HARDWARE_SERVER: &str = "SoftLayer_Hardware_Server";
const ACCOUNT: &str = "SoftLayer_Account";
const IMAGE: &str = "SoftLayer_Virtual_Guest_Block_Device_Template_Group";
const NETWORK_STORAGE: &str = "SoftLayer_Network_Storage";
const PRODUCT_PACKAGE: &str = "SoftLayer_Product_Package";
const PRODUCT_ORDER: &str = "SoftLayer_Product_Order";
const DATACENTER: &str = "SoftLayer_Location_Datacenter";
const BILLING_ITEM: &str = "SoftLayer_Billing_Item";
const SSH_KEY: &str = "SoftLayer_Security_Ssh_Key";

/// Exception body returned with failed calls.
#[derive(Debug, Deserialize)]
struct ExceptionBody {
    error: String,
    #[serde(default)]
    code: String,
}

/// One SoftLayer service invocation.
#[derive(Debug)]
struct ServiceCall<'a> {
    service: &'static str,
    method: &'static str,
    id: Option<i64>,
    mask: Option<&'a str>,
    filter: Option<Value>,
    parameters: Vec<Value>,
}

impl<'a> ServiceCall<'a> {
    const fn new(service: &'static str, method: &'static str) -> Self {
        Self {
            service,
            method,
            id: None,
            mask: None,
            filter: None,
            parameters: Vec::new(),
        }
    }

    fn on(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    fn mask(mut self, mask: &'a str) -> Self {
        if !mask.is_empty() {
            self.mask = Some(mask);
        }
        self
    }

    fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    fn param(mut self, parameter: Value) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// `createObject`, `getObject`, `editObject` and `deleteObject` address the object itself.
    fn path(&self) -> String {
        let object = match self.id {
            Some(id) => format!("{}/{id}", self.service),
            None => self.service.to_string(),
        };
        match self.method {
            "createObject" | "getObject" | "editObject" | "deleteObject" => {
                format!("{object}.json")
            }
            method => format!("{object}/{method}.json"),
        }
    }

    fn http_method(&self) -> Method {
        match self.method {
            "createObject" => Method::POST,
            "editObject" => Method::PUT,
            "deleteObject" => Method::DELETE,
            _ if !self.parameters.is_empty() => Method::POST,
            _ => Method::GET,
        }
    }

    /// Only reads are re-sent. A create, order or cancel that timed out may already have
    /// been accepted by SoftLayer.
    fn is_idempotent(&self) -> bool {
        self.http_method() == Method::GET
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(mask) = self.mask {
            query.push(("objectMask", format_mask(mask)));
        }
        if let Some(filter) = &self.filter {
            query.push(("objectFilter", filter.to_string()));
        }
        query
    }
}

/// SoftLayer wants masks as `mask[...]`; plain property lists are wrapped.
fn format_mask(mask: &str) -> String {
    if mask.starts_with("mask") {
        mask.to_string()
    } else {
        format!("mask[{mask}]")
    }
}

/// Builder for [`RestApi`].
#[derive(Debug, Clone)]
pub struct RestApiBuilder {
    endpoint: Url,
    username: String,
    api_key: SecretString,
    http_config: ClientConfig,
    retry_policy: RetryPolicy,
}

impl RestApiBuilder {
    /// Create a new builder for the given endpoint and credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the endpoint is not a valid URL.
    pub fn new(
        endpoint: impl AsRef<str>,
        username: impl Into<String>,
        api_key: SecretString,
    ) -> Result<Self> {
        let url = Url::parse(endpoint.as_ref()).map_err(|err| {
            Error::ConfigError(format!(
                "Invalid SoftLayer endpoint `{}`: {err}",
                endpoint.as_ref()
            ))
        })?;

        let http_config = ClientConfig::new();
        Ok(Self {
            endpoint: url,
            username: username.into(),
            api_key,
            retry_policy: http_config.retry_policy,
            http_config,
        })
    }

    /// Create a builder from the CPI's SoftLayer settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the configured endpoint is not a valid URL.
    pub fn from_config(config: &SoftLayerConfig) -> Result<Self> {
        Self::new(
            &config.api_endpoint,
            config.username.clone(),
            config.api_key.clone(),
        )
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Override the HTTP client configuration.
    #[must_use]
    pub fn with_http_config(mut self, config: ClientConfig) -> Self {
        self.retry_policy = config.retry_policy;
        self.http_config = config;
        self
    }

    /// Build the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the HTTP client cannot be constructed.
    pub fn build(self) -> Result<RestApi> {
        let mut builder = ClientBuilder::new()
            .timeout(self.http_config.timeout)
            .user_agent(USER_AGENT)
            .pool_idle_timeout(self.http_config.pool_idle_timeout)
            .pool_max_idle_per_host(self.http_config.pool_max_idle_per_host)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT));

        if !self.http_config.enable_compression {
            builder = builder.no_gzip();
        }

        let http = builder.build().map_err(|err| {
            Error::ConfigError(format!("Failed to build SoftLayer HTTP client: {err}"))
        })?;

        Ok(RestApi {
            http,
            endpoint: self.endpoint,
            username: self.username,
            api_key: self.api_key,
            retry_policy: self.retry_policy,
        })
    }
}

/// [`SoftLayerApi`] over the SoftLayer REST endpoint.
#[derive(Clone)]
pub struct RestApi {
    http: Client,
    endpoint: Url,
    username: String,
    api_key: SecretString,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for RestApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestApi")
            .field("endpoint", &self.endpoint.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RestApi {
    /// Create a transport from the CPI's SoftLayer settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the endpoint is invalid.
    pub fn from_config(config: &SoftLayerConfig) -> Result<Self> {
        RestApiBuilder::from_config(config)?.build()
    }

    /// The REST endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn build_url(&self, path: &str) -> Result<Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|err| Error::ConfigError(format!("Invalid SoftLayer path `{path}`: {err}")))
    }

    async fn call<R>(&self, call: ServiceCall<'_>) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let path = call.path();
        let method = call.http_method();
        let query = call.query();
        let body = (!call.parameters.is_empty()).then(|| json!({ "parameters": call.parameters }));
        let max_retries = if call.is_idempotent() {
            self.retry_policy.max_retries
        } else {
            0
        };

        #[allow(unused_assignments)]
        let mut last_error: Option<Error> = None;
        let mut attempt = 0;

        loop {
            let url = self.build_url(&path)?;
            let mut request = self
                .http
                .request(method.clone(), url)
                .query(&query)
                .basic_auth(&self.username, Some(self.api_key.expose_secret()))
                .header("Accept", "application/json");

            if let Some(payload) = &body {
                request = request.json(payload);
            }

            info!(path = %path, attempt, "SoftLayer request");

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<R>().await.map_err(|err| {
                            Error::ParseError(format!(
                                "Failed to parse SoftLayer response for `{path}`: {err}"
                            ))
                        });
                    }

                    let text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());

                    let error = match status {
                        status if RetryPolicy::retries_status(status.as_u16()) => {
                            Error::ServiceUnavailable(format!(
                                "SoftLayer temporarily unavailable: {text}"
                            ))
                        }
                        status => {
                            if let Ok(exception) = serde_json::from_str::<ExceptionBody>(&text) {
                                return Err(Error::Api {
                                    kind: ExceptionKind::classify(
                                        &exception.code,
                                        &exception.error,
                                    ),
                                    code: exception.code,
                                    message: exception.error,
                                });
                            }
                            match status {
                                StatusCode::NOT_FOUND => return Err(Error::NotFound(text)),
                                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                                    return Err(Error::ConfigError(format!(
                                        "SoftLayer authentication failed: {text}"
                                    )))
                                }
                                status if status.is_server_error() => Error::ServiceUnavailable(
                                    format!("SoftLayer server error {status}: {text}"),
                                ),
                                _ => Error::HttpError(format!("SoftLayer error {status}: {text}")),
                            }
                        }
                    };
                    last_error = Some(error);
                }
                Err(err) => {
                    let error = Error::from(err);
                    if error.is_transient() {
                        last_error = Some(error);
                    } else {
                        return Err(error);
                    }
                }
            }

            attempt += 1;
            if attempt > max_retries {
                break;
            }
            let delay = self.retry_policy.delay_for_attempt(attempt);
            if delay > Duration::from_millis(0) {
                debug!("Retrying SoftLayer request after {:?}", delay);
                sleep(delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::ServiceUnavailable("SoftLayer request failed after retries".to_string())
        }))
    }
}

#[async_trait]
impl SoftLayerApi for RestApi {
    async fn get_virtual_guest(&self, id: i64, mask: &str) -> Result<VirtualGuest> {
        self.call(ServiceCall::new(VIRTUAL_GUEST, "getObject").on(id).mask(mask))
            .await
    }

    async fn list_virtual_guests(&self, mask: &str, filter: Value) -> Result<Vec<VirtualGuest>> {
        self.call(
            ServiceCall::new(ACCOUNT, "getVirtualGuests")
                .mask(mask)
                .filter(filter),
        )
        .await
    }

    async fn create_virtual_guest(&self, template: &VirtualGuest) -> Result<VirtualGuest> {
        self.call(ServiceCall::new(VIRTUAL_GUEST, "createObject").param(serde_json::to_value(template)?))
            .await
    }

    async fn edit_virtual_guest(&self, id: i64, template: &VirtualGuest) -> Result<bool> {
        self.call(
            ServiceCall::new(VIRTUAL_GUEST, "editObject")
                .on(id)
                .param(serde_json::to_value(template)?),
        )
        .await
    }

    async fn delete_virtual_guest(&self, id: i64) -> Result<bool> {
        self.call(ServiceCall::new(VIRTUAL_GUEST, "deleteObject").on(id))
            .await
    }

    async fn reboot_virtual_guest(&self, id: i64, kind: RebootKind) -> Result<bool> {
        self.call(ServiceCall::new(VIRTUAL_GUEST, kind.method()).on(id))
            .await
    }

    async fn reload_operating_system(&self, id: i64, config: &ReloadConfiguration) -> Result<()> {
        let _: Value = self
            .call(
                ServiceCall::new(VIRTUAL_GUEST, "reloadOperatingSystem")
                    .on(id)
                    .param(json!("FORCE"))
                    .param(serde_json::to_value(config)?),
            )
            .await?;
        Ok(())
    }

    async fn set_virtual_guest_tags(&self, id: i64, tags: &str) -> Result<bool> {
        self.call(ServiceCall::new(VIRTUAL_GUEST, "setTags").on(id).param(json!(tags)))
            .await
    }

    async fn get_active_transactions(&self, id: i64) -> Result<Vec<Transaction>> {
        self.call(ServiceCall::new(VIRTUAL_GUEST, "getActiveTransactions").on(id))
            .await
    }

    async fn get_active_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let transaction: Option<Transaction> = self
            .call(
                ServiceCall::new(VIRTUAL_GUEST, "getActiveTransaction")
                    .on(id)
                    .mask("id,transactionStatus[name,friendlyName,averageDuration],transactionGroup.name"),
            )
            .await?;
        Ok(transaction.filter(|t| t.id.is_some()))
    }

    async fn get_last_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let transaction: Option<Transaction> = self
            .call(
                ServiceCall::new(VIRTUAL_GUEST, "getLastTransaction")
                    .on(id)
                    .mask("id,transactionStatus.name,transactionGroup.name"),
            )
            .await?;
        Ok(transaction.filter(|t| t.id.is_some()))
    }

    async fn get_upgrade_item_prices(&self, id: i64) -> Result<Vec<ProductItemPrice>> {
        self.call(
            ServiceCall::new(VIRTUAL_GUEST, "getUpgradeItemPrices")
                .on(id)
                .mask("id,categories,item[description,capacity,categories]")
                .param(json!(true)),
        )
        .await
    }

    async fn get_local_disk_flag(&self, id: i64) -> Result<bool> {
        self.call(ServiceCall::new(VIRTUAL_GUEST, "getLocalDiskFlag").on(id))
            .await
    }

    async fn get_hardware(&self, id: i64, mask: &str) -> Result<Hardware> {
        self.call(ServiceCall::new(HARDWARE_SERVER, "getObject").on(id).mask(mask))
            .await
    }

    async fn reboot_hardware(&self, id: i64) -> Result<bool> {
        self.call(ServiceCall::new(HARDWARE_SERVER, "rebootSoft").on(id))
            .await
    }

    async fn set_hardware_tags(&self, id: i64, tags: &str) -> Result<bool> {
        self.call(ServiceCall::new(HARDWARE_SERVER, "setTags").on(id).param(json!(tags)))
            .await
    }

    async fn get_image(&self, id: i64, mask: &str) -> Result<BlockDeviceTemplateGroup> {
        self.call(ServiceCall::new(IMAGE, "getObject").on(id).mask(mask))
            .await
    }

    async fn get_network_storage(&self, id: i64, mask: &str) -> Result<NetworkStorage> {
        self.call(ServiceCall::new(NETWORK_STORAGE, "getObject").on(id).mask(mask))
            .await
    }

    async fn list_iscsi_network_storage(
        &self,
        mask: &str,
        filter: Value,
    ) -> Result<Vec<NetworkStorage>> {
        self.call(
            ServiceCall::new(ACCOUNT, "getIscsiNetworkStorage")
                .mask(mask)
                .filter(filter),
        )
        .await
    }

    async fn allow_access_from_virtual_guest(
        &self,
        volume_id: i64,
        guest_id: i64,
    ) -> Result<bool> {
        self.call(
            ServiceCall::new(NETWORK_STORAGE, "allowAccessFromVirtualGuest")
                .on(volume_id)
                .param(json!({ "id": guest_id })),
        )
        .await
    }

    async fn remove_access_from_virtual_guest(
        &self,
        volume_id: i64,
        guest_id: i64,
    ) -> Result<bool> {
        self.call(
            ServiceCall::new(NETWORK_STORAGE, "removeAccessFromVirtualGuest")
                .on(volume_id)
                .param(json!({ "id": guest_id })),
        )
        .await
    }

    async fn list_product_packages(
        &self,
        mask: &str,
        filter: Value,
    ) -> Result<Vec<ProductPackage>> {
        self.call(
            ServiceCall::new(PRODUCT_PACKAGE, "getAllObjects")
                .mask(mask)
                .filter(filter),
        )
        .await
    }

    async fn get_package_items(&self, package_id: i64, mask: &str) -> Result<Vec<ProductItem>> {
        self.call(
            ServiceCall::new(PRODUCT_PACKAGE, "getItems")
                .on(package_id)
                .mask(mask),
        )
        .await
    }

    async fn get_package_item_prices(
        &self,
        package_id: i64,
        filter: Value,
    ) -> Result<Vec<ProductItemPrice>> {
        self.call(
            ServiceCall::new(PRODUCT_PACKAGE, "getItemPrices")
                .on(package_id)
                .mask("id,locationGroupId,categories,item[id,capacity,description]")
                .filter(filter),
        )
        .await
    }

    async fn place_order(&self, order: &ProductOrder) -> Result<OrderReceipt> {
        self.call(
            ServiceCall::new(PRODUCT_ORDER, "placeOrder")
                .param(serde_json::to_value(order)?)
                .param(json!(false)),
        )
        .await
    }

    async fn list_datacenters(&self, filter: Value) -> Result<Vec<Location>> {
        self.call(
            ServiceCall::new(DATACENTER, "getDatacenters")
                .mask("id,name,longName")
                .filter(filter),
        )
        .await
    }

    async fn cancel_billing_item(&self, id: i64, immediate: bool, reason: &str) -> Result<bool> {
        self.call(
            ServiceCall::new(BILLING_ITEM, "cancelItem")
                .on(id)
                .param(json!(immediate))
                .param(json!(true))
                .param(json!(reason))
                .param(json!("")),
        )
        .await
    }

    async fn create_ssh_key(&self, key: &SshKey) -> Result<SshKey> {
        self.call(ServiceCall::new(SSH_KEY, "createObject").param(serde_json::to_value(key)?))
            .await
    }

    async fn list_ssh_keys(&self, filter: Value) -> Result<Vec<SshKey>> {
        self.call(
            ServiceCall::new(ACCOUNT, "getSshKeys")
                .mask("id,label,key,fingerprint")
                .filter(filter),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::filter_path;
    use softlayer_cpi_core::error::OBJECT_NOT_FOUND_EXCEPTION;
    use wiremock::matchers::{basic_auth, body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_api(server: &MockServer) -> RestApi {
        RestApiBuilder::new(server.uri(), "user", SecretString::from("key".to_string()))
            .unwrap()
            .with_retry_policy(RetryPolicy::new().with_initial_delay(Duration::from_millis(1)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_call_paths() {
        let call = ServiceCall::new(VIRTUAL_GUEST, "getObject").on(12);
        assert_eq!(call.path(), "SoftLayer_Virtual_Guest/12.json");
        assert_eq!(call.http_method(), Method::GET);

        let call = ServiceCall::new(VIRTUAL_GUEST, "createObject").param(json!({}));
        assert_eq!(call.path(), "SoftLayer_Virtual_Guest.json");
        assert_eq!(call.http_method(), Method::POST);

        let call = ServiceCall::new(VIRTUAL_GUEST, "deleteObject").on(3);
        assert_eq!(call.http_method(), Method::DELETE);
        assert!(!call.is_idempotent());
        assert!(ServiceCall::new(VIRTUAL_GUEST, "getObject").on(3).is_idempotent());

        let call = ServiceCall::new(NETWORK_STORAGE, "allowAccessFromVirtualGuest")
            .on(5)
            .param(json!({"id": 9}));
        assert_eq!(
            call.path(),
            "SoftLayer_Network_Storage/5/allowAccessFromVirtualGuest.json"
        );
        assert_eq!(call.http_method(), Method::POST);
    }

    #[test]
    fn test_format_mask() {
        assert_eq!(format_mask("id,hostname"), "mask[id,hostname]");
        assert_eq!(format_mask("mask[id]"), "mask[id]");
    }

    #[tokio::test]
    async fn get_virtual_guest_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/1234.json"))
            .and(query_param("objectMask", "mask[id,hostname]"))
            .and(basic_auth("user", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1234,
                "hostname": "bosh-0"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let guest = test_api(&server)
            .get_virtual_guest(1234, "id,hostname")
            .await
            .unwrap();
        assert_eq!(guest.id, Some(1234));
        assert_eq!(guest.hostname.as_deref(), Some("bosh-0"));
    }

    #[tokio::test]
    async fn object_not_found_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/9.json"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": "Unable to find object with id of '9'.",
                "code": OBJECT_NOT_FOUND_EXCEPTION
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_api(&server)
            .get_virtual_guest(9, "id")
            .await
            .unwrap_err();
        assert_eq!(err.exception_kind(), Some(ExceptionKind::ObjectNotFound));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn api_exceptions_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_Product_Order/placeOrder.json"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "A current price was provided for the upgrade order.",
                "code": "SoftLayer_Exception_Public"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let order = ProductOrder {
            complex_type: "SoftLayer_Container_Product_Order_Virtual_Guest_Upgrade".to_string(),
            ..ProductOrder::default()
        };
        let err = test_api(&server).place_order(&order).await.unwrap_err();
        assert_eq!(err.exception_kind(), Some(ExceptionKind::CurrentPriceProvided));
    }

    #[tokio::test]
    async fn service_unavailable_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/7/getActiveTransactions.json"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/7/getActiveTransactions.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 55}])))
            .expect(1)
            .mount(&server)
            .await;

        let transactions = test_api(&server).get_active_transactions(7).await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].id, Some(55));
    }

    #[tokio::test]
    async fn retries_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/7/getLocalDiskFlag.json"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .expect(4)
            .mount(&server)
            .await;

        let err = test_api(&server).get_local_disk_flag(7).await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn create_is_sent_once_on_gateway_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_Virtual_Guest.json"))
            .respond_with(ResponseTemplate::new(504).set_body_string("gateway timeout"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_Product_Order/placeOrder.json"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .expect(1)
            .mount(&server)
            .await;

        let api = test_api(&server);
        let err = api
            .create_virtual_guest(&VirtualGuest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
        assert!(err.is_transient());

        let order = ProductOrder {
            complex_type: "SoftLayer_Container_Product_Order_Network_Storage_Enterprise"
                .to_string(),
            ..ProductOrder::default()
        };
        let err = api.place_order(&order).await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn delete_is_sent_once_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/SoftLayer_Virtual_Guest/12.json"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_api(&server).delete_virtual_guest(12).await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn filters_and_parameters_are_encoded() {
        let server = MockServer::start().await;
        let filter = filter_path("iscsiNetworkStorage.id", json!(42));
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Account/getIscsiNetworkStorage.json"))
            .and(query_param("objectFilter", filter.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 42, "billingItem": {"id": 700}}
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_Billing_Item/700/cancelItem.json"))
            .and(body_json(json!({"parameters": [true, true, "Delete disk from BOSH", ""]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let api = test_api(&server);
        let volumes = api.list_iscsi_network_storage("", filter).await.unwrap();
        let billing_id = volumes[0].billing_item.as_ref().and_then(|b| b.id).unwrap();
        assert!(api
            .cancel_billing_item(billing_id, true, "Delete disk from BOSH")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn empty_active_transaction_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SoftLayer_Virtual_Guest/3/getActiveTransaction.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        assert_eq!(test_api(&server).get_active_transaction(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reload_sends_force_and_configuration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/SoftLayer_Virtual_Guest/3/reloadOperatingSystem.json"))
            .and(body_json(json!({"parameters": [
                "FORCE",
                {"imageTemplateId": 88, "sshKeyIds": [5]}
            ]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("1")))
            .expect(1)
            .mount(&server)
            .await;

        let config = ReloadConfiguration {
            image_template_id: 88,
            ssh_key_ids: vec![5],
        };
        test_api(&server)
            .reload_operating_system(3, &config)
            .await
            .unwrap();
    }
}
