pub mod booking;
pub mod courier;
pub mod location;
