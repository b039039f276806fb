pub mod driver;
pub mod page;
pub mod readiness;
pub mod recorder;
pub mod stealth;
