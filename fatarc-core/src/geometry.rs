use serde::{Deserialize, Serialize};

use crate::error::FatarcError;

/// Layout constants for one FAT12 disk image.
///
/// A geometry fully locates every on-disk region: the boot sector, the FAT
/// copies, the fixed root directory and the data area. It is plain
/// configuration data, chosen before a session opens and immutable for the
/// session's life. Images carry no self-description we can trust (early
/// formats predate reliable BPBs), so the geometry is always supplied by
/// the caller, either from the built-in catalog or explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Sector size in bytes.
    pub bytes_per_sector: u32,
    /// Sectors per allocation cluster.
    pub sectors_per_cluster: u32,
    /// Sector number of the first FAT copy.
    pub fat_start_sector: u32,
    /// Number of FAT copies kept on disk.
    pub fat_copies: u8,
    /// Size of one FAT copy in sectors.
    pub sectors_per_fat: u32,
    /// Root directory capacity in 32-byte entries.
    pub root_entries: u32,
    /// Exclusive upper bound on cluster numbers. Clusters 0 and 1 are
    /// reserved, so usable data clusters are `2..cluster_count`.
    pub cluster_count: u16,
}

impl Geometry {
    /// Bytes per allocation cluster.
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// Size of one FAT copy in bytes.
    pub fn fat_size_bytes(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_fat
    }

    /// Byte offset of the given FAT copy.
    pub fn fat_offset(&self, copy: u8) -> u64 {
        (self.fat_start_sector as u64 + copy as u64 * self.sectors_per_fat as u64)
            * self.bytes_per_sector as u64
    }

    /// Byte offset of the root directory region, directly after the FATs.
    pub fn root_dir_offset(&self) -> u64 {
        self.fat_offset(self.fat_copies)
    }

    /// Size of the root directory region in bytes (32 bytes per entry).
    pub fn root_dir_bytes(&self) -> u32 {
        self.root_entries * 32
    }

    /// Byte offset of cluster 2, the first data cluster.
    pub fn data_offset(&self) -> u64 {
        self.root_dir_offset() + self.root_dir_bytes() as u64
    }

    /// Directory entries held by one cluster.
    pub fn entries_per_cluster(&self) -> u32 {
        self.cluster_size() / 32
    }

    /// Number of usable data clusters.
    pub fn data_clusters(&self) -> u32 {
        (self.cluster_count as u32).saturating_sub(2)
    }

    /// Total image size in bytes implied by this geometry.
    pub fn total_bytes(&self) -> u64 {
        self.data_offset() + self.data_clusters() as u64 * self.cluster_size() as u64
    }

    /// Checks the geometry for internal consistency.
    pub fn validate(&self) -> Result<(), FatarcError> {
        if !self.bytes_per_sector.is_power_of_two()
            || !(128..=4096).contains(&self.bytes_per_sector)
        {
            return Err(FatarcError::Configuration(format!(
                "Sector size must be a power of two between 128 and 4096, got {}",
                self.bytes_per_sector
            )));
        }
        if self.sectors_per_cluster == 0 || !self.sectors_per_cluster.is_power_of_two() {
            return Err(FatarcError::Configuration(format!(
                "Sectors per cluster must be a power of two, got {}",
                self.sectors_per_cluster
            )));
        }
        if self.fat_start_sector == 0 {
            return Err(FatarcError::Configuration(
                "FAT cannot start at sector 0 (the boot sector lives there)".to_string(),
            ));
        }
        if self.fat_copies == 0 {
            return Err(FatarcError::Configuration(
                "At least one FAT copy is required".to_string(),
            ));
        }
        if self.cluster_count < 3 || self.cluster_count > 0xFF0 {
            return Err(FatarcError::Configuration(format!(
                "Cluster count must be between 3 and 4080 for FAT12, got {}",
                self.cluster_count
            )));
        }
        // Each FAT entry takes 1.5 bytes.
        let fat_capacity = self.fat_size_bytes() as u64 * 2 / 3;
        if fat_capacity < self.cluster_count as u64 {
            return Err(FatarcError::Configuration(format!(
                "FAT of {} sectors holds only {} entries, {} needed",
                self.sectors_per_fat, fat_capacity, self.cluster_count
            )));
        }
        if self.root_entries == 0 || self.root_dir_bytes() % self.bytes_per_sector != 0 {
            return Err(FatarcError::Configuration(format!(
                "Root directory ({} entries) must fill whole sectors",
                self.root_entries
            )));
        }
        Ok(())
    }

    /// Builds a geometry from the seven historical format parameters, with
    /// the root directory size given in sectors as the old tools took it.
    pub fn from_custom_spec(
        bytes_per_sector: u32,
        sectors_per_cluster: u32,
        fat_start_sector: u32,
        root_dir_sectors: u32,
        sectors_per_fat: u32,
        fat_copies: u32,
        cluster_count: u32,
    ) -> Result<Self, FatarcError> {
        if fat_copies > u8::MAX as u32 {
            return Err(FatarcError::Configuration(format!(
                "Too many FAT copies: {}",
                fat_copies
            )));
        }
        if cluster_count > u16::MAX as u32 {
            return Err(FatarcError::Configuration(format!(
                "Cluster count out of range: {}",
                cluster_count
            )));
        }
        let geometry = Geometry {
            bytes_per_sector,
            sectors_per_cluster,
            fat_start_sector,
            fat_copies: fat_copies as u8,
            sectors_per_fat,
            root_entries: root_dir_sectors * bytes_per_sector / 32,
            cluster_count: cluster_count as u16,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Parses a geometry from its JSON form and validates it.
    pub fn from_json(raw: &str) -> Result<Self, FatarcError> {
        let geometry: Geometry = serde_json::from_str(raw)?;
        geometry.validate()?;
        Ok(geometry)
    }
}

/// A named entry in the built-in format catalog.
#[derive(Debug, Clone, Copy)]
pub struct DiskType {
    /// Single-character key, kept from the historical tools.
    pub key: char,
    pub description: &'static str,
    pub geometry: Geometry,
}

/// Built-in disk formats. The values are the classic HP-series FAT12
/// layouts these images come from.
pub const DISK_TYPES: &[DiskType] = &[
    DiskType {
        key: 'm',
        description: "3 1/2\" single sided micro- or 5 1/4\" mini- floppy",
        geometry: Geometry {
            bytes_per_sector: 256,
            sectors_per_cluster: 4,
            fat_start_sector: 2,
            fat_copies: 2,
            sectors_per_fat: 3,
            root_entries: 128,
            cluster_count: 260,
        },
    },
    DiskType {
        key: 'M',
        description: "3 1/2\" double sided micro floppy",
        geometry: Geometry {
            bytes_per_sector: 512,
            sectors_per_cluster: 4,
            fat_start_sector: 2,
            fat_copies: 2,
            sectors_per_fat: 3,
            root_entries: 128,
            cluster_count: 686,
        },
    },
    DiskType {
        key: 'f',
        description: "8\" IBM format floppy",
        geometry: Geometry {
            bytes_per_sector: 128,
            sectors_per_cluster: 8,
            fat_start_sector: 1,
            fat_copies: 2,
            sectors_per_fat: 6,
            root_entries: 68,
            cluster_count: 249,
        },
    },
    DiskType {
        key: 'F',
        description: "8\" HP floppy",
        geometry: Geometry {
            bytes_per_sector: 256,
            sectors_per_cluster: 16,
            fat_start_sector: 2,
            fat_copies: 1,
            sectors_per_fat: 3,
            root_entries: 256,
            cluster_count: 280,
        },
    },
    DiskType {
        key: 'e',
        description: "5 Mb Winchester",
        geometry: Geometry {
            bytes_per_sector: 256,
            sectors_per_cluster: 16,
            fat_start_sector: 2,
            fat_copies: 2,
            sectors_per_fat: 9,
            root_entries: 1024,
            cluster_count: 545,
        },
    },
    DiskType {
        key: 'j',
        description: "10 Mb Winchester",
        geometry: Geometry {
            bytes_per_sector: 256,
            sectors_per_cluster: 16,
            fat_start_sector: 2,
            fat_copies: 2,
            sectors_per_fat: 15,
            root_entries: 1024,
            cluster_count: 2355,
        },
    },
    DiskType {
        key: 'o',
        description: "15 Mb Winchester",
        geometry: Geometry {
            bytes_per_sector: 256,
            sectors_per_cluster: 16,
            fat_start_sector: 2,
            fat_copies: 2,
            sectors_per_fat: 21,
            root_entries: 1024,
            cluster_count: 3536,
        },
    },
];

/// Looks up a catalog entry by its key character.
pub fn disk_type(key: char) -> Option<&'static DiskType> {
    DISK_TYPES.iter().find(|t| t.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_entries_are_consistent() {
        for t in DISK_TYPES {
            t.geometry
                .validate()
                .unwrap_or_else(|e| panic!("catalog entry '{}' invalid: {}", t.key, e));
        }
        assert!(disk_type('m').is_some());
        assert!(disk_type('o').is_some());
        assert!(disk_type('z').is_none());
    }

    #[test]
    fn derived_layout_for_default_floppy() {
        let g = disk_type('m').unwrap().geometry;
        assert_eq!(g.cluster_size(), 1024);
        assert_eq!(g.fat_size_bytes(), 768);
        assert_eq!(g.fat_offset(0), 512);
        assert_eq!(g.fat_offset(1), 1280);
        assert_eq!(g.root_dir_offset(), 2048);
        assert_eq!(g.root_dir_bytes(), 4096);
        assert_eq!(g.data_offset(), 6144);
        assert_eq!(g.entries_per_cluster(), 32);
        assert_eq!(g.data_clusters(), 258);
        assert_eq!(g.total_bytes(), 6144 + 258 * 1024);
    }

    #[test]
    fn custom_spec_converts_root_sectors_to_entries() {
        let g = Geometry::from_custom_spec(256, 4, 2, 16, 3, 2, 260).unwrap();
        assert_eq!(g, disk_type('m').unwrap().geometry);
    }

    #[test]
    fn json_round_trip_preserves_geometry() {
        let g = disk_type('M').unwrap().geometry;
        let raw = serde_json::to_string(&g).unwrap();
        assert_eq!(Geometry::from_json(&raw).unwrap(), g);
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        assert!(matches!(
            Geometry::from_json("{\"bytes_per_sector\": 256"),
            Err(FatarcError::SerializationError(_))
        ));
    }

    #[test]
    fn from_json_validates_the_parsed_geometry() {
        let raw = r#"{
            "bytes_per_sector": 256,
            "sectors_per_cluster": 4,
            "fat_start_sector": 0,
            "fat_copies": 2,
            "sectors_per_fat": 3,
            "root_entries": 128,
            "cluster_count": 260
        }"#;
        assert!(matches!(
            Geometry::from_json(raw),
            Err(FatarcError::Configuration(_))
        ));
    }

    #[test]
    fn validate_rejects_undersized_fat() {
        let mut g = disk_type('m').unwrap().geometry;
        g.sectors_per_fat = 1;
        assert!(matches!(
            g.validate(),
            Err(FatarcError::Configuration(_))
        ));
    }

    #[test]
    fn validate_rejects_ragged_root() {
        let mut g = disk_type('m').unwrap().geometry;
        g.root_entries = 3;
        assert!(g.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_cluster_count() {
        let mut g = disk_type('m').unwrap().geometry;
        g.cluster_count = 0xFF1;
        assert!(g.validate().is_err());
    }
}
