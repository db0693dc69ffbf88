/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Default number of paths returned by the history listing
pub const DEFAULT_PATH_LIMIT: u32 = 50;

/// Default number of routers returned by the router listing
pub const DEFAULT_ROUTER_LIMIT: u32 = 100;

/// Upper bound applied to any caller-supplied listing limit
pub const MAX_LIST_LIMIT: u32 = 1000;
