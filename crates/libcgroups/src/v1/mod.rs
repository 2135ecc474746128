pub mod devices;
pub mod manager;
pub mod util;
