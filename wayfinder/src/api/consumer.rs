use crate::api::{GetInstancesRequest, GetOneInstanceRequest, InstancesResponse, ServiceCallResult};
use crate::balance::{Criteria, LoadBalancer};
use crate::breaker::InstanceGauge;
use crate::cache::EpochGuard;
use crate::conf::ClientConfig;
use crate::context::{ClientContext, ServiceContext};
use crate::error::{ApiError, ApiResult};
use crate::model::{DataKind, DataStatus, Instance, ServiceKey};
use crate::monitor::{ApiOp, ApiStat, LogSink, MonitorSink};
use crate::registry::DataFetcher;
use crate::route::{RouteInfo, RouteInfoNotify};
use once_cell::sync::Lazy;
use rand::Rng;
use smallvec::{SmallVec, smallvec};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::error;

static NEXT_FLOW_ID: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

fn next_flow_id() -> u64 {
    NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed)
}

/// The consumer-side entry point: locates healthy instances of remote
/// services through the route pipeline and a load balancer, and feeds call
/// results back into circuit breaking.
pub struct DiscoveryClient {
    context: Arc<ClientContext>,
}

impl DiscoveryClient {
    pub fn new(config: ClientConfig, fetcher: Arc<dyn DataFetcher>) -> ApiResult<Self> {
        Self::with_monitor(config, fetcher, Arc::new(LogSink))
    }

    pub fn with_monitor(
        config: ClientConfig,
        fetcher: Arc<dyn DataFetcher>,
        monitor: Arc<dyn MonitorSink>,
    ) -> ApiResult<Self> {
        Ok(Self {
            context: ClientContext::new(config, fetcher, monitor)?,
        })
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.context
    }

    fn check_key(key: &ServiceKey) -> ApiResult<()> {
        if key.namespace.is_empty() || key.name.is_empty() {
            error!("request rejected: service namespace or name is empty");
            return Err(ApiError::InvalidArgument);
        }
        Ok(())
    }

    fn timeout_of(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| self.context.default_timeout())
    }

    /// Selects one instance for the target service.
    pub fn get_one_instance(&self, request: &GetOneInstanceRequest) -> ApiResult<Arc<Instance>> {
        let mut stat = ApiStat::new(self.context.api_stats(), ApiOp::GetOneInstance);
        let result = self.get_one_instance_inner(request);
        stat.record(result.as_ref().err().copied());
        result
    }

    fn get_one_instance_inner(&self, request: &GetOneInstanceRequest) -> ApiResult<Arc<Instance>> {
        Self::check_key(&request.service_key)?;
        self.context.fork_check()?;
        let _epoch = EpochGuard::new(self.context.epoch());

        let service_context = self.context.service_context(&request.service_key)?;
        let mut route_info = build_route_info_for_one(request);
        service_context.prepare(&mut route_info, self.timeout_of(request.timeout))?;
        service_context.do_route(&mut route_info)?;

        let balancer = service_context.balancer(&request.lb_kind)?;
        service_context
            .choose_one(&mut route_info, &balancer, &request.criteria)
            .map_err(|err| match err {
                ApiError::PluginError => err,
                _ => ApiError::InstanceNotFound,
            })
    }

    /// Like [`get_one_instance`] but returns the full response, including
    /// up to `backupInstanceNum` distinct backup instances.
    ///
    /// [`get_one_instance`]: DiscoveryClient::get_one_instance
    pub fn get_one_instance_response(
        &self,
        request: &GetOneInstanceRequest,
    ) -> ApiResult<InstancesResponse> {
        let mut stat = ApiStat::new(self.context.api_stats(), ApiOp::GetOneInstance);
        let result = self.get_one_instance_response_inner(request);
        stat.record(result.as_ref().err().copied());
        result
    }

    fn get_one_instance_response_inner(
        &self,
        request: &GetOneInstanceRequest,
    ) -> ApiResult<InstancesResponse> {
        Self::check_key(&request.service_key)?;
        self.context.fork_check()?;
        let _epoch = EpochGuard::new(self.context.epoch());

        let service_context = self.context.service_context(&request.service_key)?;
        let mut route_info = build_route_info_for_one(request);
        service_context.prepare(&mut route_info, self.timeout_of(request.timeout))?;
        one_instance_response(&service_context, &mut route_info, request)
    }

    /// Returns the instance set after routing, honouring the request's
    /// include/skip flags.
    pub fn get_instances(&self, request: &GetInstancesRequest) -> ApiResult<InstancesResponse> {
        let mut stat = ApiStat::new(self.context.api_stats(), ApiOp::GetInstances);
        let result = self.get_instances_inner(request);
        stat.record(result.as_ref().err().copied());
        result
    }

    fn get_instances_inner(&self, request: &GetInstancesRequest) -> ApiResult<InstancesResponse> {
        Self::check_key(&request.service_key)?;
        self.context.fork_check()?;
        let _epoch = EpochGuard::new(self.context.epoch());

        let service_context = self.context.service_context(&request.service_key)?;
        let mut route_info = build_route_info_for_batch(request);
        service_context.prepare(&mut route_info, self.timeout_of(request.timeout))?;
        instances_response(&service_context, &mut route_info, request)
    }

    /// The raw registry view for a service: never routed, never filtered,
    /// isolated instances included.
    pub fn get_all_instances(&self, request: &GetInstancesRequest) -> ApiResult<InstancesResponse> {
        let mut stat = ApiStat::new(self.context.api_stats(), ApiOp::GetAllInstances);
        let result = self.get_all_instances_inner(request);
        stat.record(result.as_ref().err().copied());
        result
    }

    fn get_all_instances_inner(
        &self,
        request: &GetInstancesRequest,
    ) -> ApiResult<InstancesResponse> {
        Self::check_key(&request.service_key)?;
        self.context.fork_check()?;
        let _epoch = EpochGuard::new(self.context.epoch());

        let data = self.fetch_service_data(
            &request.service_key,
            DataKind::Instances,
            self.timeout_of(request.timeout),
        )?;
        let instances_data = data.instances().ok_or(ApiError::ServiceNotFound)?;
        let mut instances: Vec<Arc<Instance>> = instances_data.instances().to_vec();
        instances.extend(instances_data.isolated().iter().cloned());
        Ok(InstancesResponse {
            flow_id: request.flow_id.unwrap_or_else(next_flow_id),
            service_namespace: request.service_key.namespace.clone(),
            service_name: request.service_key.name.clone(),
            revision: data.revision().to_string(),
            service_metadata: instances_data.service_metadata.clone(),
            subset: Default::default(),
            instances,
        })
    }

    /// Non-blocking lookup: returns a future that resolves once instance
    /// and routing data are fetched.
    pub fn async_get_one_instance(
        &self,
        request: &GetOneInstanceRequest,
    ) -> ApiResult<InstancesFuture> {
        let mut stat = ApiStat::new(self.context.api_stats(), ApiOp::AsyncGetOneInstance);
        let result = self.async_future(FutureRequest::One(request.clone()));
        stat.record(result.as_ref().err().copied());
        result
    }

    pub fn async_get_instances(
        &self,
        request: &GetInstancesRequest,
    ) -> ApiResult<InstancesFuture> {
        let mut stat = ApiStat::new(self.context.api_stats(), ApiOp::AsyncGetInstances);
        let result = self.async_future(FutureRequest::Batch(request.clone()));
        stat.record(result.as_ref().err().copied());
        result
    }

    fn async_future(&self, request: FutureRequest) -> ApiResult<InstancesFuture> {
        Self::check_key(request.service_key())?;
        self.context.fork_check()?;
        let _epoch = EpochGuard::new(self.context.epoch());

        let service_context = self.context.service_context(request.service_key())?;
        let mut route_info = request.build_route_info();
        let notify = service_context.prepare_with_notify(&mut route_info)?;
        Ok(InstancesFuture {
            context: Arc::clone(&self.context),
            service_context,
            state: Mutex::new(FutureState { route_info, notify }),
            request,
        })
    }

    /// Feeds one call result into the stat, balancer-feedback and breaker
    /// paths. The instance may be named by id or by `host:port`.
    pub fn update_service_call_result(&self, result: &ServiceCallResult) -> ApiResult<()> {
        let mut stat = ApiStat::new(self.context.api_stats(), ApiOp::UpdateCallResult);
        let outcome = self.update_service_call_result_inner(result);
        stat.record(outcome.as_ref().err().copied());
        outcome
    }

    fn update_service_call_result_inner(&self, result: &ServiceCallResult) -> ApiResult<()> {
        if result.service_key.name.is_empty() {
            error!("call result rejected: service name is empty");
            return Err(ApiError::InvalidArgument);
        }
        self.context.fork_check()?;
        let _epoch = EpochGuard::new(self.context.epoch());

        let instance_id = match &result.instance_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                let (host, port) = result
                    .host_port
                    .as_ref()
                    .ok_or(ApiError::InvalidArgument)?;
                self.context
                    .store()
                    .instance_id_by_host_port(&result.service_key, host, *port)?
            }
        };
        let gauge = InstanceGauge {
            service_key: result.service_key.clone(),
            instance_id,
            latency: result.latency,
            ret_status: result.ret_status,
            ret_code: result.ret_code,
            locality_tag: result.locality_tag,
        };
        let service_context = self.context.service_context(&result.service_key)?;
        service_context.on_call_result(&gauge)
    }

    /// The target service's routing rules as reply-shaped JSON.
    pub fn get_service_route_rule(
        &self,
        key: &ServiceKey,
        timeout: Duration,
    ) -> ApiResult<serde_json::Value> {
        let mut stat = ApiStat::new(self.context.api_stats(), ApiOp::GetRouteRule);
        let result = self.get_service_route_rule_inner(key, timeout);
        stat.record(result.as_ref().err().copied());
        result
    }

    fn get_service_route_rule_inner(
        &self,
        key: &ServiceKey,
        timeout: Duration,
    ) -> ApiResult<serde_json::Value> {
        Self::check_key(key)?;
        self.context.fork_check()?;
        let _epoch = EpochGuard::new(self.context.epoch());
        let data = self.fetch_service_data(key, DataKind::RouteRule, timeout)?;
        Ok(data.to_reply_json())
    }

    /// Warms the service context and its data subscriptions ahead of
    /// traffic.
    pub fn init_service(&self, request: &GetOneInstanceRequest) -> ApiResult<()> {
        let mut stat = ApiStat::new(self.context.api_stats(), ApiOp::InitService);
        let result = self.init_service_inner(request);
        stat.record(result.as_ref().err().copied());
        result
    }

    fn init_service_inner(&self, request: &GetOneInstanceRequest) -> ApiResult<()> {
        Self::check_key(&request.service_key)?;
        self.context.fork_check()?;
        let _epoch = EpochGuard::new(self.context.epoch());
        let service_context = self.context.service_context(&request.service_key)?;
        let mut route_info = build_route_info_for_one(request);
        service_context.prepare(&mut route_info, self.timeout_of(request.timeout))
    }

    /// Blocking lookup of one data kind, subscribing on the first miss.
    fn fetch_service_data(
        &self,
        key: &ServiceKey,
        kind: DataKind,
        timeout: Duration,
    ) -> ApiResult<Arc<crate::model::ServiceData>> {
        let store = self.context.store();
        let data = match store.get_service_data(key, kind) {
            Ok(data) => data,
            Err(_) => {
                let (_, notify) = store.load_or_subscribe(key, kind);
                notify.wait_until(Instant::now() + timeout)?
            }
        };
        if data.status() == DataStatus::NotFound {
            return Err(ApiError::ServiceNotFound);
        }
        Ok(data)
    }
}

fn build_route_info_for_one(request: &GetOneInstanceRequest) -> RouteInfo {
    let mut route_info = RouteInfo::new(request.service_key.clone(), request.source.clone());
    if !request.labels.is_empty() {
        route_info.set_labels(request.labels.clone());
    }
    if let Some(param) = &request.metadata {
        route_info.set_metadata_param(param.clone());
    }
    route_info
}

fn build_route_info_for_batch(request: &GetInstancesRequest) -> RouteInfo {
    let mut route_info = RouteInfo::new(request.service_key.clone(), request.source.clone());
    if let Some(param) = &request.metadata {
        route_info.set_metadata_param(param.clone());
    }
    if request.include_unhealthy {
        route_info.set_include_unhealthy();
    }
    if request.include_circuit_open {
        route_info.set_include_circuit_open();
    }
    route_info
}

/// Route, balance, then gather backups; shared by the sync and async
/// response paths.
fn one_instance_response(
    service_context: &Arc<ServiceContext>,
    route_info: &mut RouteInfo,
    request: &GetOneInstanceRequest,
) -> ApiResult<InstancesResponse> {
    service_context.do_route(route_info)?;
    let balancer = service_context.balancer(&request.lb_kind)?;
    let primary = service_context
        .choose_one(route_info, &balancer, &request.criteria)
        .map_err(|err| match err {
            ApiError::PluginError => err,
            _ => ApiError::InstanceNotFound,
        })?;
    let picked = collect_backups(
        route_info,
        &balancer,
        &request.criteria,
        primary,
        request.backup_instance_num,
    );

    let instances = route_info
        .service_instances()
        .ok_or(ApiError::InvalidState)?;
    Ok(InstancesResponse {
        flow_id: request.flow_id.unwrap_or_else(next_flow_id),
        service_namespace: request.service_key.namespace.clone(),
        service_name: request.service_key.name.clone(),
        revision: instances.service_data().revision().to_string(),
        service_metadata: instances.service_metadata().clone(),
        subset: instances.available().subset().clone(),
        instances: picked.into_vec(),
    })
}

/// Backup selection: ring-family balancers walk distinct ring neighbours;
/// everything else scans from a random start, skipping the primary and any
/// half-open instance. The result may be shorter than requested.
fn collect_backups(
    route_info: &RouteInfo,
    balancer: &Arc<dyn LoadBalancer>,
    criteria: &Criteria,
    primary: Arc<Instance>,
    backup_instance_num: u32,
) -> SmallVec<[Arc<Instance>; 4]> {
    let mut picked: SmallVec<[Arc<Instance>; 4]> = smallvec![primary];
    let target = backup_instance_num as usize + 1;
    if target <= 1 {
        return picked;
    }
    let Some(instances) = route_info.service_instances() else {
        return picked;
    };
    let candidates = instances.available().instances();

    if balancer.is_ring_family() {
        let target = target.min(candidates.len());
        let mut probe_criteria = criteria.clone();
        probe_criteria.ignore_half_open = true;
        for replicate_index in 1..=candidates.len() as u32 {
            if picked.len() >= target {
                break;
            }
            probe_criteria.replicate_index = replicate_index;
            let Ok(neighbour) = balancer.choose(instances, &probe_criteria) else {
                break;
            };
            if !picked.iter().any(|chosen| chosen.id() == neighbour.id()) {
                picked.push(neighbour);
            }
        }
        return picked;
    }

    let half_open = instances.half_open_ids();
    let available = candidates.len().saturating_sub(half_open.len());
    let target = target.min(available.max(1));
    if candidates.is_empty() {
        return picked;
    }
    let mut index = rand::rng().random_range(0..candidates.len());
    for _ in 0..candidates.len() {
        if picked.len() >= target {
            break;
        }
        let candidate = &candidates[index % candidates.len()];
        index += 1;
        if candidate.id() == picked[0].id() || half_open.contains(candidate.id()) {
            continue;
        }
        picked.push(Arc::clone(candidate));
    }
    picked
}

/// Batch selection honouring the skip/include flags; shared by the sync and
/// async paths.
fn instances_response(
    service_context: &Arc<ServiceContext>,
    route_info: &mut RouteInfo,
    request: &GetInstancesRequest,
) -> ApiResult<InstancesResponse> {
    let instances = if request.skip_route_filter {
        let instances = route_info
            .service_instances()
            .ok_or(ApiError::InvalidState)?;
        // With routing skipped, circuit-open exclusion still applies unless
        // the request keeps those instances; metadata filters do not.
        let open = if request.include_circuit_open {
            Default::default()
        } else {
            instances.service().open_instances()
        };
        instances
            .available()
            .instances()
            .iter()
            .filter(|instance| !open.contains(instance.id()))
            .cloned()
            .collect::<Vec<_>>()
    } else {
        service_context.do_route(route_info)?;
        route_info
            .service_instances()
            .ok_or(ApiError::InvalidState)?
            .available()
            .instances()
            .to_vec()
    };

    if instances.is_empty() {
        return Err(ApiError::InstanceNotFound);
    }
    let prepared = route_info
        .service_instances()
        .ok_or(ApiError::InvalidState)?;
    Ok(InstancesResponse {
        flow_id: request.flow_id.unwrap_or_else(next_flow_id),
        service_namespace: request.service_key.namespace.clone(),
        service_name: request.service_key.name.clone(),
        revision: prepared.service_data().revision().to_string(),
        service_metadata: prepared.service_metadata().clone(),
        subset: prepared.available().subset().clone(),
        instances,
    })
}

enum FutureRequest {
    One(GetOneInstanceRequest),
    Batch(GetInstancesRequest),
}

impl FutureRequest {
    fn service_key(&self) -> &ServiceKey {
        match self {
            FutureRequest::One(request) => &request.service_key,
            FutureRequest::Batch(request) => &request.service_key,
        }
    }

    fn build_route_info(&self) -> RouteInfo {
        match self {
            FutureRequest::One(request) => build_route_info_for_one(request),
            FutureRequest::Batch(request) => build_route_info_for_batch(request),
        }
    }
}

struct FutureState {
    route_info: RouteInfo,
    notify: Option<RouteInfoNotify>,
}

/// Callback handle returned by the non-blocking lookups; resolves through
/// the same route-and-balance path once data readiness transitions.
pub struct InstancesFuture {
    context: Arc<ClientContext>,
    service_context: Arc<ServiceContext>,
    state: Mutex<FutureState>,
    request: FutureRequest,
}

impl InstancesFuture {
    /// True when every pending kind is ready; disk-loaded data counts only
    /// when `allow_disk`.
    pub fn is_done(&self, allow_disk: bool) -> bool {
        let state = self.state.lock().unwrap();
        state
            .notify
            .as_ref()
            .is_none_or(|notify| notify.is_ready(allow_disk))
    }

    /// Waits up to `wait` for readiness, then resolves the request.
    pub fn get(&self, wait: Duration) -> ApiResult<InstancesResponse> {
        let op = match &self.request {
            FutureRequest::One(_) => ApiOp::AsyncGetOneInstance,
            FutureRequest::Batch(_) => ApiOp::AsyncGetInstances,
        };
        let mut stat = ApiStat::new(self.context.api_stats(), op);
        let result = self.get_inner(wait);
        stat.record(result.as_ref().err().copied());
        result
    }

    fn get_inner(&self, wait: Duration) -> ApiResult<InstancesResponse> {
        self.context.fork_check()?;
        let _epoch = EpochGuard::new(self.context.epoch());

        let mut state = self.state.lock().unwrap();
        if let Some(notify) = state.notify.take() {
            let allow_disk = match notify.wait_until(Instant::now() + wait) {
                Ok(()) => false,
                Err(ApiError::Timeout) if notify.is_ready(true) => true,
                Err(err) => {
                    // Leave the pending notifies for a later retry.
                    state.notify = Some(notify);
                    return Err(err);
                }
            };
            notify.drain_into(&mut state.route_info, allow_disk)?;
        }

        match &self.request {
            FutureRequest::One(request) => {
                one_instance_response(&self.service_context, &mut state.route_info, request)
            }
            FutureRequest::Batch(request) => {
                instances_response(&self.service_context, &mut state.route_info, request)
            }
        }
    }
}
