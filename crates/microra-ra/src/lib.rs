pub mod advertiser;
pub mod builder;
pub mod ndp;
pub mod plugin;
pub mod retry;
pub mod system;
