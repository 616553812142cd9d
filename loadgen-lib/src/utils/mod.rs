pub mod os;
pub mod telemetry;
pub mod time;
