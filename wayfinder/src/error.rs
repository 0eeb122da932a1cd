use once_cell::sync::Lazy;
use std::collections::HashMap;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Error taxonomy surfaced by every public API call.
///
/// Background work (persistence, breaker publication, sync) never surfaces
/// here; it is logged and retried on the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ApiError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid config")]
    InvalidConfig,
    #[error("resource not initialized")]
    NotInit,
    #[error("request timeout")]
    Timeout,
    #[error("instance not found")]
    InstanceNotFound,
    #[error("route rule not match")]
    RouteRuleNotMatch,
    #[error("service not found")]
    ServiceNotFound,
    #[error("network failed")]
    NetworkFailed,
    #[error("server error")]
    ServerError,
    #[error("server unknown error")]
    ServerUnknownError,
    #[error("plugin error")]
    PluginError,
    #[error("invalid state")]
    InvalidState,
    #[error("api called after fork")]
    CallAfterFork,
}

/// Classification used by the API-stat recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Success,
    UserFail,
    ServerFail,
}

pub struct ErrorDescriptor {
    pub wire_code: &'static str,
    pub class: ErrorClass,
    pub stat_index: usize,
}

/// Control-plane codes that must trip the circuit breaker sit in
/// [`ServerCode::ConnectError`], [`ServerCode::ServerError`] range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCode {
    Ok,
    ConnectError,
    ServerError,
    RpcError,
    RpcTimeout,
    InvalidResponse,
    InvalidRequest,
    Unauthorized,
    RequestLimit,
    RemoteClose,
    Unknown,
}

impl ServerCode {
    /// Maps a raw control-plane code into the documented space. Anything
    /// outside it collapses to `Unknown`.
    pub fn from_raw(code: u32) -> Self {
        match code {
            2000 => ServerCode::Ok,
            2001 => ServerCode::ConnectError,
            2002 => ServerCode::ServerError,
            2003 => ServerCode::RpcError,
            2004 => ServerCode::RpcTimeout,
            2005 => ServerCode::InvalidResponse,
            2006 => ServerCode::InvalidRequest,
            2007 => ServerCode::Unauthorized,
            2008 => ServerCode::RequestLimit,
            2010 => ServerCode::RemoteClose,
            _ => ServerCode::Unknown,
        }
    }

    pub fn into_api_error(self) -> Option<ApiError> {
        match self {
            ServerCode::Ok => None,
            ServerCode::ConnectError | ServerCode::RemoteClose => Some(ApiError::NetworkFailed),
            ServerCode::RpcTimeout => Some(ApiError::Timeout),
            ServerCode::ServerError | ServerCode::RpcError | ServerCode::InvalidResponse => {
                Some(ApiError::ServerError)
            }
            ServerCode::InvalidRequest | ServerCode::Unauthorized | ServerCode::RequestLimit => {
                Some(ApiError::ServerUnknownError)
            }
            ServerCode::Unknown => Some(ApiError::ServerUnknownError),
        }
    }
}

static DESCRIPTORS: Lazy<HashMap<Option<ApiError>, ErrorDescriptor>> = Lazy::new(|| {
    let mut map = HashMap::new();
    let mut index = 0usize;
    let mut put = |code: Option<ApiError>, wire: &'static str, class: ErrorClass| {
        map.insert(
            code,
            ErrorDescriptor {
                wire_code: wire,
                class,
                stat_index: index,
            },
        );
        index += 1;
    };
    put(None, "Success", ErrorClass::Success);
    put(Some(ApiError::InvalidArgument), "ErrCodeAPIInvalidArgument", ErrorClass::UserFail);
    put(Some(ApiError::InvalidConfig), "ErrCodeAPIInvalidConfig", ErrorClass::UserFail);
    put(Some(ApiError::NotInit), "ErrCodeAPINotInit", ErrorClass::UserFail);
    put(Some(ApiError::Timeout), "ErrCodeAPITimeoutError", ErrorClass::ServerFail);
    put(Some(ApiError::InstanceNotFound), "ErrCodeAPIInstanceNotFound", ErrorClass::UserFail);
    put(Some(ApiError::RouteRuleNotMatch), "ErrCodeAPIRouteRuleNotMatch", ErrorClass::UserFail);
    put(Some(ApiError::ServiceNotFound), "ErrCodeAPIServiceNotFound", ErrorClass::UserFail);
    put(Some(ApiError::NetworkFailed), "ErrCodeAPINetworkError", ErrorClass::ServerFail);
    put(Some(ApiError::ServerError), "ErrCodeAPIServerError", ErrorClass::ServerFail);
    put(Some(ApiError::ServerUnknownError), "ErrCodeAPIServerUnknown", ErrorClass::ServerFail);
    put(Some(ApiError::PluginError), "ErrCodeAPIPluginError", ErrorClass::UserFail);
    put(Some(ApiError::InvalidState), "ErrCodeAPIInvalidState", ErrorClass::UserFail);
    put(Some(ApiError::CallAfterFork), "ErrCodeAPICallAfterFork", ErrorClass::UserFail);
    map
});

pub fn descriptor(result: Option<ApiError>) -> &'static ErrorDescriptor {
    DESCRIPTORS
        .get(&result)
        .unwrap_or_else(|| &DESCRIPTORS[&Some(ApiError::ServerUnknownError)])
}

pub fn descriptor_count() -> usize {
    DESCRIPTORS.len()
}
