pub(crate) mod attrs;
pub mod credential;
pub mod matrix;
pub mod policy;
pub mod principal;
pub mod probe;
pub mod sequencer;
pub mod verifier;
