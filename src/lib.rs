pub mod db;
pub mod probe;
pub mod qos;
pub mod scheduler;
pub mod server;
