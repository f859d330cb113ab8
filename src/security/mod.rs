pub mod audit_log;
pub mod roles;
pub mod route_guard;
