pub mod collision;
pub mod shells;
