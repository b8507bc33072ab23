pub mod config;
pub mod coordination;
pub mod dependency;
pub mod execution;
pub mod models;
pub mod pipeline;
pub mod sandbox;
pub mod scope;
pub mod script;
pub mod services;
