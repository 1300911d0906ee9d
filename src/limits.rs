/// Page size applied when a search does not ask for one.
pub const DEFAULT_PAGE_LIMIT: u64 = 100;

/// Upper bound on a single search page.
pub const MAX_PAGE_LIMIT: u64 = 1_000;

/// Upper bound on the connection pool.
pub const MAX_POOL_SIZE: usize = 64;

/// Upper bound on configured nodes (one table each).
pub const MAX_NODES: usize = 1_024;
