pub mod mock;
pub mod traits;
pub mod web;
