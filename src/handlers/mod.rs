pub mod batch_handlers;
pub mod health_handlers;
pub mod resource_handlers;
