/// Partition naming: `Partition{ZONE_MARKER}{zone}{INDEX_MARKER}{index}`
pub const PARTITION_KEYWORD: &str = "Partition";
pub const ZONE_MARKER: char = 'z';
pub const INDEX_MARKER: char = 'i';

/// Directory and file names inside the results tree
pub const BUFFER_DIR: &str = "buffers";
pub const ZONE_SUBSET_DIR: &str = "zones";
pub const TEMP_STATS_DIR: &str = "tempStats";
pub const ZONAL_STATS_DIR: &str = "zonalStats";
pub const HEARTBEAT_FILE: &str = "test_progress.txt";
pub const MONITOR_TABLE_STEM: &str = "monitors";
pub const ZONE_TABLE_STEM: &str = "zoneDef";
pub const ZONED_TABLE_STEM: &str = "w_zones";
pub const FINAL_TABLE_STEM: &str = "final";

/// Field names
pub const ROW_ID_FIELD: &str = "FID";
pub const ORIG_FID_FIELD: &str = "ORIG_FID";
pub const BUFFER_ID_FIELD: &str = "FID_buffer";
pub const MONITOR_ID_FIELD: &str = "MONITOR_ID";
pub const BUFFER_DISTANCE_FIELD: &str = "BUFF_DIST";
pub const COUNT_FIELD: &str = "COUNT";
pub const SAMPLE_FIELD: &str = "RASTERVALU";
pub const MEAN_SUFFIX: &str = "_MEAN";
pub const SUM_PREFIX: &str = "SUM_";
pub const DEFAULT_ZONE_FIELD: &str = "zone";

/// Value written when a statistic cannot be computed
pub const MISSING_VALUE: f64 = -9999.0;

/// Processing defaults
pub const DEFAULT_PARTITION_SIZE: usize = 50;
pub const DEFAULT_RASTER_WORKERS: usize = 2;
pub const DEFAULT_BUFFER_DISTANCES: [u32; 13] = [
    50, 100, 250, 500, 750, 1000, 2000, 3000, 4000, 5000, 10000, 15000, 20000,
];
pub const DEFAULT_HEARTBEAT_POLL_SECS: u64 = 60;
pub const DEFAULT_HEARTBEAT_INACTIVITY_SECS: u64 = 60;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10000;

/// Vertices used to approximate a round buffer
pub const BUFFER_SEGMENTS: usize = 64;

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
