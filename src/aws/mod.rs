pub mod context;
pub mod provider;
pub mod remote_state;
pub mod types;

#[cfg(test)]
pub mod mock;
