pub mod events;
pub mod inference;
pub mod preprocess;
pub mod timeline;
