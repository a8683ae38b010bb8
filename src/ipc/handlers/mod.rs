pub mod cards;
pub mod catalog;
pub mod collection;
pub mod core;
pub mod transfer;
