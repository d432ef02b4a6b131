pub mod ptdf;
pub mod run;
pub mod validate;
