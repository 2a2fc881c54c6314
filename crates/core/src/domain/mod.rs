pub mod hr;
pub mod intent;
pub mod response;
pub mod session;
pub mod tool;
