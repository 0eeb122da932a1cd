pub mod api;
pub mod balance;
pub mod breaker;
pub mod cache;
pub mod conf;
pub mod context;
pub mod error;
pub mod health;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod registry;
pub mod route;
pub mod sched;
pub mod weight;

pub use api::{
    DiscoveryClient, GetInstancesRequest, GetOneInstanceRequest, InstancesFuture,
    InstancesResponse, ServiceCallResult,
};
pub use conf::ClientConfig;
pub use error::{ApiError, ApiResult};
pub use model::{DataKind, Instance, ServiceKey};
