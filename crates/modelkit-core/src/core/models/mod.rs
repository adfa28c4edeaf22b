pub mod derivatives;
pub mod ids;
pub mod particle;
pub mod store;
