pub mod config;
pub mod gateway;
pub mod indicator;
pub mod logging;
pub mod medium;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod sensor;
pub mod timer;
