pub mod cli;
pub mod detect;
