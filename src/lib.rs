pub mod config;
pub mod consts;
pub mod control;
pub mod gesture;
pub mod hal;
pub mod indicator;
pub mod mode;
pub mod session;
pub mod status;
