// Library for tests to access modules

pub mod broadcaster;
pub mod config;
pub mod control;
pub mod models;
pub mod orchestrator;
pub mod pollers;
pub mod routes;
pub mod runtime;
pub mod version;
