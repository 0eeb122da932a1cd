pub mod constants;
mod instance;
mod instances_set;
mod location;
mod route_rule;
mod service;
mod service_data;
mod service_key;

pub use instance::*;
pub use instances_set::*;
pub use location::*;
pub use route_rule::*;
pub use service::*;
pub use service_data::*;
pub use service_key::*;
