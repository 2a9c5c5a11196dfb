pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod payments;
pub mod queue;
pub mod repository;
pub mod service;
pub mod webhooks;
pub mod workers;
