use crate::utils::constants::{INDEX_MARKER, PARTITION_KEYWORD, ZONE_MARKER};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Zone assigned to a monitor by the nearest-neighbour join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub i64);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub zone: ZoneId,
    pub index: usize,
}

impl PartitionKey {
    pub fn new(zone: ZoneId, index: usize) -> Self {
        Self { zone, index }
    }

    /// Folder and file stem, e.g. `Partitionz3i0`
    pub fn name(&self) -> String {
        format!(
            "{}{}{}{}{}",
            PARTITION_KEYWORD, ZONE_MARKER, self.zone, INDEX_MARKER, self.index
        )
    }

    /// Recover a key from a partition folder or file name.
    pub fn from_name(name: &str) -> Option<Self> {
        let stem = name.split('.').next()?;
        let rest = stem
            .strip_prefix(PARTITION_KEYWORD)?
            .strip_prefix(ZONE_MARKER)?;
        let (zone, index) = rest.rsplit_once(INDEX_MARKER)?;

        Some(Self {
            zone: ZoneId(zone.parse().ok()?),
            index: index.parse().ok()?,
        })
    }

    /// Compact form used to namespace scratch directories, e.g. `z3i0`
    pub fn short_name(&self) -> String {
        format!("{}{}{}{}", ZONE_MARKER, self.zone, INDEX_MARKER, self.index)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferKey {
    pub partition: PartitionKey,
    pub radius_m: u32,
}

impl BufferKey {
    pub fn new(partition: PartitionKey, radius_m: u32) -> Self {
        Self {
            partition,
            radius_m,
        }
    }
}

/// Identity of one result field: (partition, buffer radius, variable).
///
/// Point-sampled variables have no radius and are computed once per partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey {
    pub partition: PartitionKey,
    pub radius_m: Option<u32>,
    pub code: String,
}

impl ResultKey {
    pub fn new(partition: PartitionKey, radius_m: Option<u32>, code: impl Into<String>) -> Self {
        Self {
            partition,
            radius_m,
            code: code.into(),
        }
    }

    /// Name of the field holding the result, e.g. `N6100m`
    pub fn field_name(&self) -> String {
        result_field_name(&self.code, self.radius_m)
    }

    /// Scratch namespace: variable, partition and radius
    pub fn scratch_name(&self) -> String {
        format!(
            "{}{}{}",
            self.code,
            self.partition.short_name(),
            self.radius_m.unwrap_or(0)
        )
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.field_name())
    }
}

/// `{code}{radius}m` for buffered variables, the bare code for point samples.
pub fn result_field_name(code: &str, radius_m: Option<u32>) -> String {
    match radius_m {
        Some(radius) => format!("{}{}m", code, radius),
        None => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_name_round_trip() {
        let key = PartitionKey::new(ZoneId(3), 12);
        assert_eq!(key.name(), "Partitionz3i12");
        assert_eq!(PartitionKey::from_name("Partitionz3i12.json"), Some(key));

        let negative = PartitionKey::new(ZoneId(-1), 0);
        assert_eq!(PartitionKey::from_name(&negative.name()), Some(negative));
    }

    #[test]
    fn test_partition_name_rejects_garbage() {
        assert_eq!(PartitionKey::from_name("buffer100m.json"), None);
        assert_eq!(PartitionKey::from_name("Partitionzxi1"), None);
        assert_eq!(PartitionKey::from_name("Partitionz1"), None);
    }

    #[test]
    fn test_result_field_names() {
        let partition = PartitionKey::new(ZoneId(2), 1);
        assert_eq!(ResultKey::new(partition, Some(500), "N6").field_name(), "N6500m");
        assert_eq!(ResultKey::new(partition, None, "EL").field_name(), "EL");
        assert_eq!(
            ResultKey::new(partition, Some(100), "wa").scratch_name(),
            "waz2i1100"
        );
    }
}
