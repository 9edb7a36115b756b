pub mod config;
pub mod control;
pub mod fault;
pub mod messages;
pub mod motor;
pub mod odometry;
pub mod ranging;
pub mod runtime;
pub mod safety;
pub mod sim;
pub mod watchdog;
