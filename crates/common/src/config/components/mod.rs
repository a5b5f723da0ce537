pub mod execution;
pub mod external_id;
pub mod global;
pub mod orgs;
pub mod rate_limit;
pub mod tokens;
