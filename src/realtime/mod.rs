pub mod bus;
pub mod location;
