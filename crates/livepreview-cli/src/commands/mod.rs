pub mod check;
pub mod serve;
pub mod version;
