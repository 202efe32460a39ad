//! House directory: the set of canvassable addresses and their voters
//!
//! Loaded once at startup from a JSON array. Rows sharing a normalised
//! address are merged so each house appears once with all of its voters.

use crate::domain::types::{normalize_address, GeoPoint};
use anyhow::Context;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteFrequency {
    NonVoter,
    Infrequent,
    Frequent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub voter_id: String,
    pub name: String,
    #[serde(default)]
    pub age: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_affiliation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_frequency: Option<VoteFrequency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct House {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub voters: Vec<Voter>,
}

impl House {
    #[inline]
    pub fn point(&self) -> GeoPoint {
        GeoPoint { latitude: self.latitude, longitude: self.longitude }
    }
}

#[derive(Debug, Default)]
pub struct HouseDirectory {
    houses: Vec<House>,
    by_address: FxHashMap<String, usize>,
}

impl HouseDirectory {
    /// Build from raw rows, dropping rows with unusable coordinates
    pub fn from_houses(rows: Vec<House>) -> Self {
        let mut directory = Self::default();
        for row in rows {
            if GeoPoint::new(row.latitude, row.longitude).is_err() {
                warn!(address = %row.address, "house_invalid_coordinates");
                continue;
            }
            let key = normalize_address(&row.address);
            if key.is_empty() {
                continue;
            }
            match directory.by_address.get(&key) {
                Some(&idx) => directory.houses[idx].voters.extend(row.voters),
                None => {
                    directory.by_address.insert(key, directory.houses.len());
                    directory.houses.push(House { address: row.address.trim().to_string(), ..row });
                }
            }
        }
        directory
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read houses file {}", path.display()))?;
        let rows: Vec<House> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse houses file {}", path.display()))?;
        let directory = Self::from_houses(rows);
        info!(file = %path.display(), houses = %directory.len(), "houses_loaded");
        Ok(directory)
    }

    /// Load if configured; a missing or unreadable file yields an empty directory
    pub fn load_optional(path: Option<&str>) -> Self {
        match path {
            Some(path) => Self::from_file(path).unwrap_or_else(|e| {
                warn!(error = %format!("{e:#}"), "houses_load_failed");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn get(&self, address: &str) -> Option<&House> {
        self.by_address.get(&normalize_address(address)).map(|&idx| &self.houses[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &House> {
        self.houses.iter()
    }

    pub fn len(&self) -> usize {
        self.houses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.houses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn house(address: &str, lat: f64, voters: &[&str]) -> House {
        House {
            address: address.to_string(),
            latitude: lat,
            longitude: -77.0,
            voters: voters
                .iter()
                .map(|v| Voter {
                    voter_id: v.to_string(),
                    name: v.to_string(),
                    age: 40,
                    party_affiliation: None,
                    vote_frequency: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_merges_same_address() {
        let dir = HouseDirectory::from_houses(vec![
            house("12 Main St", 38.9, &["a"]),
            house(" 12 MAIN  st", 38.9, &["b", "c"]),
            house("14 Main St", 38.9, &["d"]),
        ]);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.get("12 main st").unwrap().voters.len(), 3);
        assert_eq!(dir.get("12 Main St").unwrap().address, "12 Main St");
    }

    #[test]
    fn test_skips_invalid_coordinates() {
        let dir = HouseDirectory::from_houses(vec![house("1 Bad St", 95.0, &[]), house("2 Good St", 38.9, &[])]);
        assert_eq!(dir.len(), 1);
        assert!(dir.get("1 Bad St").is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"address":"1 Elm St","latitude":38.9,"longitude":-77.0,
                 "voters":[{{"voterId":"V1","name":"Ann","age":51,"voteFrequency":"Frequent"}}]}}]"#
        )
        .unwrap();

        let dir = HouseDirectory::from_file(file.path()).unwrap();
        let h = dir.get("1 elm st").unwrap();
        assert_eq!(h.voters[0].vote_frequency, Some(VoteFrequency::Frequent));
        assert!(h.voters[0].party_affiliation.is_none());
    }

    #[test]
    fn test_load_optional_missing_file_is_empty() {
        assert!(HouseDirectory::load_optional(Some("/nonexistent/houses.json")).is_empty());
        assert!(HouseDirectory::load_optional(None).is_empty());
    }
}
