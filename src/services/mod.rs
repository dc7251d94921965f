pub mod auth_service;
pub mod authz;
pub mod batch_service;
pub mod conditional;
pub mod resource_service;
