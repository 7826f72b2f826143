//! Node client over the hypervisor's HTTP API

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::{multipart, Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use vg_core::auth::{AuthContext, NodeAuth};
use vg_core::config::{ClusterProfile, NodeProfile};
use vg_core::model::{
    split_volume_id, ConsoleAuth, ConsoleTicket, StorageInfo, Task, TaskFilter, TaskLogLine,
    TaskRequest, TaskStatus, UploadRequest,
};
use vg_core::traits::{ByteStream, Download, NodeApi};
use vg_core::{ConsoleKind, ConsoleTarget, NodeName, Upid, VgError};
use vg_protocol::unwrap_envelope;

const CSRF_HEADER: &str = "CSRFPreventionToken";
/// How the node words a config write whose digest no longer matches
const MODIFIED_CONFIG: &str = "detected modified configuration";

/// Whose credentials signed a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signer {
    /// The process-wide node credentials
    Daemon,
    /// A ticket the API caller brought along
    Caller,
}

/// Client for one node's HTTP API
pub struct HttpNode {
    name: NodeName,
    base_url: String,
    console_host: String,
    client: Client,
    auth: Arc<AuthContext>,
    control_timeout: Duration,
}

impl HttpNode {
    /// Build a client from the node's profile
    pub fn new(
        cluster: &ClusterProfile,
        node: &NodeProfile,
        auth: Arc<AuthContext>,
        control_timeout: Duration,
    ) -> Result<Self, VgError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!cluster.verify_tls)
            .connect_timeout(control_timeout)
            .build()
            .map_err(|e| VgError::Transport(format!("client for node {}: {}", node.name, e)))?;

        Ok(Self {
            name: NodeName::new(&node.name),
            base_url: node.api_url.trim_end_matches('/').to_string(),
            console_host: node.console_host(),
            client,
            auth,
            control_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/nodes/{}/{}", self.base_url, self.name, path)
    }

    fn authorize(&self, req: RequestBuilder, write: bool) -> RequestBuilder {
        match self.auth.node_auth() {
            Some(NodeAuth::ApiToken(header)) => req.header(AUTHORIZATION, header),
            Some(NodeAuth::Ticket { cookie, csrf_token }) => {
                let req = req.header(COOKIE, cookie);
                if write {
                    req.header(CSRF_HEADER, csrf_token)
                } else {
                    req
                }
            }
            None => req,
        }
    }

    fn request_error(&self, operation: &str, err: reqwest::Error) -> VgError {
        if err.is_timeout() {
            VgError::Timeout {
                operation: format!("{} on {}", operation, self.name),
                after: self.control_timeout,
            }
        } else {
            VgError::Transport(format!("{} on {}: {}", operation, self.name, err))
        }
    }

    /// Send a control request and unwrap the node's envelope
    async fn call(&self, operation: &str, req: RequestBuilder) -> Result<Value, VgError> {
        self.call_as(operation, req, Signer::Daemon).await
    }

    async fn call_as(&self, operation: &str, req: RequestBuilder, signer: Signer) -> Result<Value, VgError> {
        let resp = req
            .timeout(self.control_timeout)
            .send()
            .await
            .map_err(|e| self.request_error(operation, e))?;
        self.read(operation, resp, signer).await
    }

    async fn read(&self, operation: &str, resp: reqwest::Response, signer: Signer) -> Result<Value, VgError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            // A caller's bad ticket says nothing about our own credentials
            return Err(match signer {
                Signer::Daemon => {
                    self.auth.invalidate();
                    VgError::Unauthenticated(format!(
                        "node {} rejected the orchestrator's credentials",
                        self.name
                    ))
                }
                Signer::Caller => VgError::Unauthenticated(format!(
                    "node {} rejected the supplied console ticket",
                    self.name
                )),
            });
        }
        let body = resp.bytes().await.map_err(|e| self.request_error(operation, e))?;
        tracing::debug!(node = %self.name, operation, status = status.as_u16(), "Node response");
        Ok(unwrap_envelope(status.as_u16(), &body)?)
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, operation: &str, value: Value) -> Result<T, VgError> {
        serde_json::from_value(value).map_err(|e| {
            VgError::Transport(format!("{} on {}: unexpected response: {}", operation, self.name, e))
        })
    }

    fn upid_from(&self, operation: &str, value: Value) -> Result<Upid, VgError> {
        match value {
            Value::String(s) if !s.is_empty() => Ok(Upid::new(s)),
            other => Err(VgError::Transport(format!(
                "{} on {}: expected a UPID, got {}",
                operation, self.name, other
            ))),
        }
    }

    fn submit_request(&self, request: &TaskRequest) -> RequestBuilder {
        let post = |path: String| self.client.post(self.url(&path));
        match request {
            TaskRequest::VmCreate { vmid, config } => {
                let mut form = form_fields(config);
                form.push(("vmid".into(), vmid.to_string()));
                post("qemu".into()).form(&form)
            }
            TaskRequest::VmStart { vmid } => post(format!("qemu/{}/status/start", vmid)),
            TaskRequest::VmStop { vmid } => post(format!("qemu/{}/status/stop", vmid)),
            TaskRequest::VmShutdown { vmid } => post(format!("qemu/{}/status/shutdown", vmid)),
            TaskRequest::VmDelete { vmid } => {
                self.client.delete(self.url(&format!("qemu/{}", vmid)))
            }
            TaskRequest::VmMigrate {
                vmid,
                target,
                online,
            } => post(format!("qemu/{}/migrate", vmid)).form(&[
                ("target", target.clone()),
                ("online", u8::from(*online).to_string()),
            ]),
            TaskRequest::VmBackup {
                vmid,
                storage,
                compress,
                mode,
            } => {
                let mut form = vec![
                    ("vmid", vmid.to_string()),
                    ("storage", storage.clone()),
                ];
                if let Some(compress) = compress {
                    form.push(("compress", compress.clone()));
                }
                if let Some(mode) = mode {
                    form.push(("mode", mode.clone()));
                }
                post("vzdump".into()).form(&form)
            }
            TaskRequest::RestoreTemplate {
                vmid,
                archive,
                storage,
            } => post("qemu".into()).form(&[
                ("vmid", vmid.to_string()),
                ("archive", archive.clone()),
                ("storage", storage.clone()),
                ("unique", "1".to_string()),
            ]),
            TaskRequest::DiskWipe { disk } => self
                .client
                .put(self.url("disks/wipedisk"))
                .form(&[("disk", disk.clone())]),
        }
    }

    fn console_path(target: &ConsoleTarget, kind: ConsoleKind) -> String {
        match (target, kind) {
            (ConsoleTarget::Node, kind) => kind.endpoint().to_string(),
            (ConsoleTarget::Vm { vmid }, ConsoleKind::Shell) => format!("qemu/{}/vncproxy", vmid),
            (ConsoleTarget::Vm { vmid }, ConsoleKind::Terminal) => {
                format!("qemu/{}/termproxy", vmid)
            }
        }
    }
}

/// Node forms take every value as a string
fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => u8::from(*b).to_string(),
        other => other.to_string(),
    }
}

fn form_fields(config: &BTreeMap<String, Value>) -> Vec<(String, String)> {
    config
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), form_value(v)))
        .collect()
}

/// Nodes report console ports as either numbers or strings
fn normalize_port(value: &mut Value) {
    if let Some(port) = value.get("port").and_then(Value::as_str) {
        if let Ok(port) = port.parse::<u16>() {
            value["port"] = json!(port);
        }
    }
}

#[async_trait]
impl NodeApi for HttpNode {
    fn node_name(&self) -> &NodeName {
        &self.name
    }

    async fn submit(&self, request: &TaskRequest) -> Result<Upid, VgError> {
        let op = request.task_type();
        let req = self.authorize(self.submit_request(request), true);
        let data = self.call(op, req).await?;
        self.upid_from(op, data)
    }

    async fn task_status(&self, upid: &Upid) -> Result<TaskStatus, VgError> {
        let req = self.client.get(self.url(&format!("tasks/{}/status", upid)));
        let data = self.call("task status", self.authorize(req, false)).await?;
        self.decode("task status", data)
    }

    async fn task_log(
        &self,
        upid: &Upid,
        start: u64,
        limit: u64,
    ) -> Result<Vec<TaskLogLine>, VgError> {
        let req = self
            .client
            .get(self.url(&format!("tasks/{}/log", upid)))
            .query(&[("start", start), ("limit", limit)]);
        let data = self.call("task log", self.authorize(req, false)).await?;
        let lines: Vec<TaskLogLine> = self.decode("task log", data)?;
        // The node numbers lines from 1
        Ok(lines
            .into_iter()
            .map(|l| TaskLogLine {
                n: l.n.saturating_sub(1),
                t: l.t,
            })
            .collect())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, VgError> {
        let req = self.client.get(self.url("tasks")).query(filter);
        let data = self.call("list tasks", self.authorize(req, false)).await?;
        self.decode("list tasks", data)
    }

    async fn stop_task(&self, upid: &Upid) -> Result<(), VgError> {
        let req = self.client.delete(self.url(&format!("tasks/{}", upid)));
        self.call("stop task", self.authorize(req, true)).await?;
        Ok(())
    }

    async fn storage_info(&self, storage: &str) -> Result<StorageInfo, VgError> {
        let req = self
            .client
            .get(self.url(&format!("storage/{}/status", storage)));
        let mut data = self.call("storage status", self.authorize(req, false)).await?;
        if let Value::Object(map) = &mut data {
            map.entry("storage").or_insert_with(|| json!(storage));
        }
        self.decode("storage status", data)
    }

    async fn upload(
        &self,
        request: &UploadRequest,
        body: ByteStream,
    ) -> Result<Option<Upid>, VgError> {
        let body = reqwest::Body::wrap_stream(body);
        let part = match request.size {
            Some(size) => multipart::Part::stream_with_length(body, size),
            None => multipart::Part::stream(body),
        }
        .file_name(request.filename.clone());

        let mut form = multipart::Form::new().text("content", request.content.as_str());
        if let Some(algorithm) = request.checksum_algorithm {
            form = form.text("checksum-algorithm", algorithm.as_str());
        }
        let form = form.part("filename", part);

        let req = self
            .client
            .post(self.url(&format!("storage/{}/upload", request.storage)))
            .multipart(form);
        let resp = self
            .authorize(req, true)
            .send()
            .await
            .map_err(|e| self.request_error("upload", e))?;
        match self.read("upload", resp, Signer::Daemon).await? {
            Value::Null => Ok(None),
            other => self.upid_from("upload", other).map(Some),
        }
    }

    async fn download(&self, volid: &str) -> Result<Download, VgError> {
        let (storage, _) = split_volume_id(volid)
            .ok_or_else(|| VgError::Validation(format!("invalid volume id '{}'", volid)))?;
        let req = self
            .client
            .get(self.url(&format!("storage/{}/content/{}/download", storage, volid)));
        let resp = self
            .authorize(req, false)
            .send()
            .await
            .map_err(|e| self.request_error("download", e))?;

        let status = resp.status();
        if !status.is_success() {
            // Let the envelope parser turn the failure into an error
            self.read("download", resp, Signer::Daemon).await?;
            return Err(VgError::RemoteApi {
                code: Some(status.as_u16()),
                message: format!("download of {} failed", volid),
            });
        }

        let size = resp.content_length();
        let body = resp
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(Download {
            size,
            body: Box::pin(body),
        })
    }

    async fn open_console(
        &self,
        target: &ConsoleTarget,
        kind: ConsoleKind,
        auth: Option<&ConsoleAuth>,
    ) -> Result<ConsoleTicket, VgError> {
        let req = self
            .client
            .post(self.url(&Self::console_path(target, kind)));
        let (req, signer) = match auth {
            Some(auth) => (
                req.header(COOKIE, format!("PVEAuthCookie={}", auth.ticket))
                    .header(CSRF_HEADER, auth.csrf_token.clone()),
                Signer::Caller,
            ),
            None => (self.authorize(req, true), Signer::Daemon),
        };
        let mut data = self.call_as("open console", req, signer).await?;
        normalize_port(&mut data);
        let mut ticket: ConsoleTicket = self.decode("open console", data)?;
        ticket.host = self.console_host.clone();
        Ok(ticket)
    }

    async fn vm_config(&self, vmid: u32) -> Result<BTreeMap<String, Value>, VgError> {
        let req = self
            .client
            .get(self.url(&format!("qemu/{}/config", vmid)));
        let data = self.call("vm config", self.authorize(req, false)).await?;
        self.decode("vm config", data)
    }

    async fn update_vm_config(
        &self,
        vmid: u32,
        changes: &BTreeMap<String, Value>,
        digest: Option<&str>,
    ) -> Result<(), VgError> {
        let mut form = form_fields(changes);
        let deletes: Vec<&str> = changes
            .iter()
            .filter(|(_, v)| v.is_null())
            .map(|(k, _)| k.as_str())
            .collect();
        if !deletes.is_empty() {
            form.push(("delete".into(), deletes.join(",")));
        }
        if let Some(digest) = digest {
            form.push(("digest".into(), digest.to_string()));
        }
        let req = self
            .client
            .put(self.url(&format!("qemu/{}/config", vmid)))
            .form(&form);
        match self.call("update vm config", self.authorize(req, true)).await {
            Ok(_) => Ok(()),
            Err(VgError::RemoteApi { message, .. }) if message.contains(MODIFIED_CONFIG) => {
                Err(VgError::Conflict {
                    resource: format!("vm/{}", vmid),
                    expected: digest.unwrap_or_default().to_string(),
                    current: message,
                })
            }
            Err(e) => Err(e),
        }
    }
}
