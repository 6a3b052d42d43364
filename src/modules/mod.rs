pub mod activation;
pub mod gated;
