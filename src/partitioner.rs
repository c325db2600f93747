//! Default partitioning strategy for records without an explicit partition.
use std::{collections::HashMap, sync::Mutex};

use crate::utils::{lock, to_crc};

/// Keyed records go to `crc32(key) % partitions` so equal keys always land
/// on the same partition. Keyless records are spread round robin, with a
/// separate cursor per topic.
#[derive(Debug, Default)]
pub struct DefaultPartitioner {
    cursors: Mutex<HashMap<String, u32>>,
}

impl DefaultPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// `partitions` must be positive.
    pub fn partition(&self, topic: &str, key: Option<&[u8]>, partitions: i32) -> i32 {
        let partitions = partitions.max(1) as u32;
        let slot = match key {
            Some(key) => to_crc(key) % partitions,
            None => {
                let mut cursors = lock(&self.cursors);
                let cursor = cursors.entry(topic.to_owned()).or_default();
                let slot = *cursor % partitions;
                *cursor = cursor.wrapping_add(1);
                slot
            }
        };
        slot as i32
    }
}

#[cfg(test)]
mod test {
    use super::DefaultPartitioner;
    use crate::utils::to_crc;

    #[test]
    fn same_key_same_partition() {
        let partitioner = DefaultPartitioner::new();
        let first = partitioner.partition("orders", Some(b"customer-17"), 8);
        for _ in 0..10 {
            assert_eq!(partitioner.partition("orders", Some(b"customer-17"), 8), first);
        }
        assert_eq!(first as u32, to_crc(b"customer-17") % 8);
    }

    #[test]
    fn keyless_records_rotate_per_topic() {
        let partitioner = DefaultPartitioner::new();
        let orders: Vec<i32> = (0..4).map(|_| partitioner.partition("orders", None, 3)).collect();
        assert_eq!(orders, vec![0, 1, 2, 0]);
        assert_eq!(partitioner.partition("audit", None, 3), 0);
        assert_eq!(partitioner.partition("single", None, 1), 0);
    }
}
