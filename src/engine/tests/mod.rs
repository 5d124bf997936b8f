
pub mod helpers;
