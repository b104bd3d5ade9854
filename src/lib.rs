pub mod arg_parser;
pub mod config_manager;
pub mod correlator;
pub mod devices_manager;
pub mod env_check;
pub mod errors;
pub mod gpu_device;
pub mod logger;
pub mod presenter;
pub mod sources;
