pub mod addresses;
pub mod codec;
pub mod frame;
