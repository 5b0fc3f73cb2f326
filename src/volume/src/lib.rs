pub mod agent;
pub mod fault_injection;
pub mod routes;
pub mod state;
pub mod store;
