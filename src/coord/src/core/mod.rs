pub mod download;
pub mod meta;
pub mod node;
pub mod placement;
pub mod registry;
pub mod routes;
pub mod state;
pub mod transfer;
pub mod upload;
