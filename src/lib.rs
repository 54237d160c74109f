pub mod config;
pub mod controllers;
pub mod entities;
pub mod error;
pub mod repositories;
pub mod response;
pub mod routes;
pub mod services;
pub mod states;
pub mod utils;
