pub mod monitor_reader;

pub use monitor_reader::{monitors_to_table, zones_to_table, MonitorRecord, SiteReader, ZoneRecord};
