pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod page;
pub mod routes;
pub mod transfer;
