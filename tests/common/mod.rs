//! Common test utilities
//!
//! `InMemoryCluster` stands in for the API server: it tracks resource versions,
//! rejects stale writes with `Conflict` and removes a deleted `Jwker` once its last
//! finalizer is gone. `RecordingBroker` records registrations instead of calling out.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use jwker_controller::cluster::{ClusterClient, ClusterError};
use jwker_controller::constants::{APP_LABEL_KEY, SECRET_TYPE_LABEL_KEY, SECRET_TYPE_LABEL_VALUE, TOKEN_X_PRIVATE_JWK_KEY};
use jwker_controller::controller::backoff::{BackoffPolicy, FixedBackoff};
use jwker_controller::controller::reconciler::Reconciler;
use jwker_controller::crd::{AccessPolicy, AccessPolicyInbound, AccessPolicyRule, Jwker, JwkerSpec, JwkerStatus};
use jwker_controller::jwk::{Jwk, JwkSet};
use jwker_controller::observability::PrometheusMetrics;
use jwker_controller::tokendings::{BrokerClient, ClientId, Instance, SoftwareStatement, TokendingsError};
use k8s_openapi::api::core::v1::{Pod, PodSpec, Secret, SecretVolumeSource, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock};

pub const CLUSTER: &str = "local";
pub const NAMESPACE: &str = "default";
pub const BROKER_URL: &str = "http://tokendings.local";

static RUSTLS_INIT: Once = Once::new();

pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Pre-generated private keys, generated once per test binary
pub fn test_key(index: usize) -> Jwk {
    static KEYS: OnceLock<Vec<Jwk>> = OnceLock::new();
    KEYS.get_or_init(|| (0..2).map(|_| Jwk::generate().unwrap()).collect())[index].clone()
}

pub fn access_policy(inbound: &[&str]) -> AccessPolicy {
    AccessPolicy {
        inbound: Some(AccessPolicyInbound {
            rules: inbound
                .iter()
                .map(|application| AccessPolicyRule {
                    application: (*application).to_string(),
                    ..AccessPolicyRule::default()
                })
                .collect(),
        }),
        outbound: None,
    }
}

pub fn jwker(name: &str, secret_name: &str) -> Jwker {
    let mut jwker = Jwker::new(
        name,
        JwkerSpec {
            access_policy: Some(access_policy(&["otherapplication"])),
            secret_name: secret_name.to_string(),
        },
    );
    jwker.metadata.namespace = Some(NAMESPACE.to_string());
    jwker
}

/// Secret labelled as managed for `app`, holding `jwk` unless `None`
pub fn managed_secret(name: &str, app: &str, jwk: Option<&Jwk>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([
                (APP_LABEL_KEY.to_string(), app.to_string()),
                (SECRET_TYPE_LABEL_KEY.to_string(), SECRET_TYPE_LABEL_VALUE.to_string()),
            ])),
            ..ObjectMeta::default()
        },
        data: jwk.map(|jwk| {
            BTreeMap::from([(
                TOKEN_X_PRIVATE_JWK_KEY.to_string(),
                ByteString(serde_json::to_vec(jwk).unwrap()),
            )])
        }),
        ..Secret::default()
    }
}

/// Running pod of `app` mounting `secret_name` as a volume
pub fn pod_mounting(name: &str, app: &str, secret_name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(APP_LABEL_KEY.to_string(), app.to_string())])),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            volumes: Some(vec![Volume {
                name: "tokenx".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.to_string()),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            }]),
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}

pub fn private_key_in(secret: &Secret) -> Jwk {
    serde_json::from_slice(&secret.data.as_ref().unwrap()[TOKEN_X_PRIVATE_JWK_KEY].0).unwrap()
}

pub fn data_string(secret: &Secret, key: &str) -> String {
    String::from_utf8(secret.data.as_ref().unwrap()[key].0.clone()).unwrap()
}

type Key = (String, String);

#[derive(Default)]
struct State {
    jwkers: BTreeMap<Key, Jwker>,
    secrets: BTreeMap<Key, Secret>,
    pods: Vec<Pod>,
    version: u64,
    writes: usize,
    status_conflicts: usize,
    fail_pod_listing: bool,
    fail_secret_writes: bool,
    fail_secret_deletes: bool,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn conflict(kind: &'static str, namespace: &str, name: &str) -> ClusterError {
    ClusterError::Conflict {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn not_found(kind: &'static str, namespace: &str, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn server_error() -> ClusterError {
    ClusterError::Api(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "etcdserver: request timed out".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn matches_selector(meta: &ObjectMeta, selector: &str) -> bool {
    let labels = meta.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).is_some_and(|value| value == v),
            None => labels.contains_key(term),
        })
}

impl InMemoryCluster {
    pub fn insert_jwker(&self, mut jwker: Jwker) {
        let mut state = self.state.lock().unwrap();
        let name = jwker.metadata.name.clone().unwrap();
        let namespace = jwker.metadata.namespace.clone().unwrap();
        jwker.metadata.uid = Some(format!("uid-{name}"));
        jwker.metadata.resource_version = Some(state.next_version());
        state.jwkers.insert(key(&namespace, &name), jwker);
    }

    pub fn insert_secret(&self, mut secret: Secret) {
        let mut state = self.state.lock().unwrap();
        secret.metadata.resource_version = Some(state.next_version());
        let k = key(
            secret.metadata.namespace.as_deref().unwrap(),
            secret.metadata.name.as_deref().unwrap(),
        );
        state.secrets.insert(k, secret);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state.lock().unwrap().pods.push(pod);
    }

    pub fn clear_pods(&self) {
        self.state.lock().unwrap().pods.clear();
    }

    pub fn jwker(&self, name: &str) -> Option<Jwker> {
        self.state.lock().unwrap().jwkers.get(&key(NAMESPACE, name)).cloned()
    }

    pub fn status(&self, name: &str) -> JwkerStatus {
        self.jwker(name).and_then(|j| j.status).unwrap_or_default()
    }

    /// Change the spec as a user would, bumping the resource version
    pub fn edit_spec(&self, name: &str, edit: impl FnOnce(&mut JwkerSpec)) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let jwker = state.jwkers.get_mut(&key(NAMESPACE, name)).unwrap();
        edit(&mut jwker.spec);
        jwker.metadata.resource_version = Some(version);
    }

    /// Request deletion; the object stays until its finalizers are removed
    pub fn mark_deleted(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let k = key(NAMESPACE, name);
        let finalizers_empty = {
            let jwker = state.jwkers.get_mut(&k).unwrap();
            jwker.metadata.deletion_timestamp = Some(Time(Default::default()));
            jwker.metadata.resource_version = Some(version);
            jwker.metadata.finalizers.as_ref().is_none_or(Vec::is_empty)
        };
        if finalizers_empty {
            state.jwkers.remove(&k);
        }
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        self.state.lock().unwrap().secrets.get(&key(NAMESPACE, name)).cloned()
    }

    pub fn secret_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Number of mutating calls served so far
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    /// Make the next `count` status writes fail as if another writer got there first
    pub fn inject_status_conflicts(&self, count: usize) {
        self.state.lock().unwrap().status_conflicts = count;
    }

    /// Make pod listing fail with a server error
    pub fn fail_pod_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_pod_listing = fail;
    }

    /// Make secret creation and replacement fail with a server error
    pub fn fail_secret_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_secret_writes = fail;
    }

    /// Make secret deletion fail with a server error
    pub fn fail_secret_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_secret_deletes = fail;
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get_jwker(&self, namespace: &str, name: &str) -> Result<Option<Jwker>, ClusterError> {
        Ok(self.state.lock().unwrap().jwkers.get(&key(namespace, name)).cloned())
    }

    async fn list_jwkers(&self) -> Result<Vec<Jwker>, ClusterError> {
        Ok(self.state.lock().unwrap().jwkers.values().cloned().collect())
    }

    async fn update_jwker_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        finalizers: Vec<String>,
    ) -> Result<Jwker, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, name);
        let current = state
            .jwkers
            .get(&k)
            .ok_or_else(|| not_found("Jwker", namespace, name))?;
        if current.metadata.resource_version.as_deref() != Some(resource_version) {
            return Err(conflict("Jwker", namespace, name));
        }

        let version = state.next_version();
        state.writes += 1;
        let jwker = state.jwkers.get_mut(&k).unwrap();
        jwker.metadata.finalizers = Some(finalizers);
        jwker.metadata.resource_version = Some(version);
        let updated = jwker.clone();

        if updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(Vec::is_empty)
        {
            state.jwkers.remove(&k);
        }
        Ok(updated)
    }

    async fn update_jwker_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        status: &JwkerStatus,
    ) -> Result<Jwker, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, name);
        if !state.jwkers.contains_key(&k) {
            return Err(not_found("Jwker", namespace, name));
        }

        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            let version = state.next_version();
            state.jwkers.get_mut(&k).unwrap().metadata.resource_version = Some(version);
            return Err(conflict("Jwker", namespace, name));
        }

        if state.jwkers[&k].metadata.resource_version.as_deref() != Some(resource_version) {
            return Err(conflict("Jwker", namespace, name));
        }

        let version = state.next_version();
        state.writes += 1;
        let jwker = state.jwkers.get_mut(&k).unwrap();
        jwker.status = Some(status.clone());
        jwker.metadata.resource_version = Some(version);
        Ok(jwker.clone())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        Ok(self.state.lock().unwrap().secrets.get(&key(namespace, name)).cloned())
    }

    async fn list_secrets(&self, namespace: Option<&str>, label_selector: &str) -> Result<Vec<Secret>, ClusterError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .secrets
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|wanted| wanted == ns))
            .filter(|(_, secret)| matches_selector(&secret.metadata, label_selector))
            .map(|(_, secret)| secret.clone())
            .collect())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_secret_writes {
            return Err(server_error());
        }
        let namespace = secret.metadata.namespace.clone().unwrap();
        let name = secret.metadata.name.clone().unwrap();
        let k = key(&namespace, &name);
        if state.secrets.contains_key(&k) {
            return Err(conflict("Secret", &namespace, &name));
        }

        let mut created = secret.clone();
        created.metadata.resource_version = Some(state.next_version());
        state.writes += 1;
        state.secrets.insert(k, created.clone());
        Ok(created)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_secret_writes {
            return Err(server_error());
        }
        let namespace = secret.metadata.namespace.clone().unwrap();
        let name = secret.metadata.name.clone().unwrap();
        let k = key(&namespace, &name);
        let current = state
            .secrets
            .get(&k)
            .ok_or_else(|| not_found("Secret", &namespace, &name))?;
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(conflict("Secret", &namespace, &name));
        }

        let mut replaced = secret.clone();
        replaced.metadata.resource_version = Some(state.next_version());
        state.writes += 1;
        state.secrets.insert(k, replaced.clone());
        Ok(replaced)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_secret_deletes {
            return Err(server_error());
        }
        state
            .secrets
            .remove(&key(namespace, name))
            .ok_or_else(|| not_found("Secret", namespace, name))?;
        state.writes += 1;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let state = self.state.lock().unwrap();
        if state.fail_pod_listing {
            return Err(server_error());
        }
        Ok(state
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| matches_selector(&pod.metadata, label_selector))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub client_id: ClientId,
    pub jwks: JwkSet,
    pub statement: SoftwareStatement,
}

/// `BrokerClient` that remembers every call
pub struct RecordingBroker {
    instances: Vec<Instance>,
    registrations: Mutex<Vec<Registration>>,
    deregistrations: Mutex<Vec<ClientId>>,
    fail_register: AtomicBool,
    fail_deregister: AtomicBool,
}

impl Default for RecordingBroker {
    fn default() -> Self {
        let controller_key = test_key(0).public();
        Self {
            instances: vec![Instance::new(BROKER_URL, "jwker", controller_key).unwrap()],
            registrations: Mutex::new(Vec::new()),
            deregistrations: Mutex::new(Vec::new()),
            fail_register: AtomicBool::new(false),
            fail_deregister: AtomicBool::new(false),
        }
    }
}

impl RecordingBroker {
    pub fn registrations(&self) -> Vec<Registration> {
        self.registrations.lock().unwrap().clone()
    }

    pub fn deregistrations(&self) -> Vec<ClientId> {
        self.deregistrations.lock().unwrap().clone()
    }

    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deregister(&self, fail: bool) {
        self.fail_deregister.store(fail, Ordering::SeqCst);
    }
}

fn unavailable() -> TokendingsError {
    TokendingsError::UnexpectedStatus {
        url: BROKER_URL.to_string(),
        status: 503,
        body: "unavailable".to_string(),
    }
}

#[async_trait]
impl BrokerClient for RecordingBroker {
    fn instances(&self) -> &[Instance] {
        &self.instances
    }

    async fn register(
        &self,
        client_id: &ClientId,
        jwks: &JwkSet,
        statement: &SoftwareStatement,
    ) -> Result<(), TokendingsError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.registrations.lock().unwrap().push(Registration {
            client_id: client_id.clone(),
            jwks: jwks.clone(),
            statement: statement.clone(),
        });
        Ok(())
    }

    async fn deregister(&self, client_id: &ClientId) -> Result<(), TokendingsError> {
        if self.fail_deregister.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.deregistrations.lock().unwrap().push(client_id.clone());
        Ok(())
    }
}

/// Reconciler wired to in-memory collaborators
pub struct Harness {
    pub cluster: Arc<InMemoryCluster>,
    pub broker: Arc<RecordingBroker>,
    pub metrics: Arc<PrometheusMetrics>,
    pub ctx: Arc<Reconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backoff(Arc::new(FixedBackoff::default()))
    }

    pub fn with_backoff(backoff: Arc<dyn BackoffPolicy>) -> Self {
        let cluster = Arc::new(InMemoryCluster::default());
        let broker = Arc::new(RecordingBroker::default());
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        let ctx = Arc::new(Reconciler::new(
            cluster.clone(),
            broker.clone(),
            metrics.clone(),
            backoff,
            CLUSTER,
        ));
        Self {
            cluster,
            broker,
            metrics,
            ctx,
        }
    }

    /// Reconcile `name` from the event payload the watcher would deliver
    pub async fn reconcile(
        &self,
        name: &str,
    ) -> Result<kube_runtime::controller::Action, jwker_controller::controller::reconciler::ReconcilerError> {
        let event = self.cluster.jwker(name).unwrap_or_else(|| jwker(name, "unused"));
        jwker_controller::controller::reconciler::reconcile(Arc::new(event), self.ctx.clone()).await
    }
}
