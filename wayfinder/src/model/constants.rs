//! Well-known metadata keys shared between routing filters and the control
//! plane payloads.

/// Callee instance metadata: set routing participates only when this is `Y`.
pub const ENABLE_SET_KEY: &str = "internal-enable-set";

/// Callee instance metadata: the instance's `name.area.group` set name.
pub const SET_NAME_KEY: &str = "internal-set-name";

/// Caller request metadata: forces set routing even when no callee enables it.
pub const ENABLE_SET_FORCE_KEY: &str = "enable-set-force";

/// Instance metadata marking a canary deployment, and the caller request
/// metadata key carrying the wanted canary value.
pub const CANARY_KEY: &str = "canary";

/// Service metadata: `"true"` opts the service into nearby routing.
pub const NEARBY_ENABLE_KEY: &str = "internal-enable-nearby";

/// Service metadata: `"true"` opts the service into canary routing.
pub const CANARY_ENABLE_KEY: &str = "internal-canary";
