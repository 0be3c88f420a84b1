pub mod composite;
pub mod export;
pub mod mask;
pub mod normalize;
pub mod orchestrate;
pub mod prompt;
pub mod remote;
