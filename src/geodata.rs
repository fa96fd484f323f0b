//! Georeferenced occurrence records, grouped by taxon.
//!
//! The input is a tab-separated table with a header line. Column names are
//! matched case-insensitively and accept the common aliases used by
//! occurrence databases (`ScientificName`, `Long`, `Lat`, `RecordId`).

use std::collections::HashMap;
use std::io::BufRead;

use crate::error::{Error, Result};

/// Earth boundaries, in degrees.
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;
pub const MIN_LAT: f64 = -90.0;
pub const MAX_LAT: f64 = 90.0;

/// A single georeferenced record.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoRef {
    pub catalog: String,
    pub lon: f64,
    pub lat: f64,
}

impl GeoRef {
    /// Returns true if the point is a valid geographic location:
    /// longitude in `(-180, 180]`, latitude in `[-90, 90]`.
    pub fn is_valid(&self) -> bool {
        self.lon > MIN_LON && self.lon <= MAX_LON && self.lat >= MIN_LAT && self.lat <= MAX_LAT
    }
}

/// A named terminal taxon with its georeferenced records.
#[derive(Clone, Debug)]
pub struct Taxon {
    pub name: String,
    pub recs: Vec<GeoRef>,
}

/// An occurrence data set: taxa in input order, with lookup by name.
#[derive(Debug, Default)]
pub struct DataSet {
    taxa: Vec<Taxon>,
    names: HashMap<String, usize>,
}

impl DataSet {
    /// Taxa in the order they were first seen in the input.
    pub fn taxa(&self) -> &[Taxon] {
        &self.taxa
    }

    /// Looks a taxon up by name, case-insensitively.
    pub fn taxon(&self, name: &str) -> Option<&Taxon> {
        self.names
            .get(&name.to_lowercase())
            .map(|&i| &self.taxa[i])
    }

    /// Reads a data set from a tab-separated table with a header.
    ///
    /// Required columns: `Name` (or `ScientificName`), `Longitude` (or `Lon`,
    /// `Long`), `Latitude` (or `Lat`). Optional: `Catalog` (or `RecordId`).
    /// Rows shorter than the required columns are skipped; malformed numbers
    /// and out-of-range coordinates fail with the row number.
    pub fn read<R: BufRead>(input: R) -> Result<DataSet> {
        let mut lines = input.lines();
        let header = match lines.next() {
            Some(h) => h?,
            None => return Err(Error::header("data", "empty input".to_string())),
        };

        let mut name = None;
        let mut lon = None;
        let mut lat = None;
        let mut cat = None;
        for (i, col) in header.split('\t').enumerate() {
            match col.trim().to_lowercase().as_str() {
                "name" | "scientificname" | "scientific name" => name = Some(i),
                "lon" | "longitude" | "long" => lon = Some(i),
                "lat" | "latitude" => lat = Some(i),
                "catalog" | "recordid" | "record id" => cat = Some(i),
                _ => {}
            }
        }
        let (name, lon, lat) = match (name, lon, lat) {
            (Some(n), Some(lg), Some(lt)) => (n, lg, lt),
            _ => return Err(Error::header("data", "incomplete header".to_string())),
        };

        let mut d = DataSet::default();
        for (row, line) in lines.enumerate() {
            let row = row + 1;
            let line = line?;
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() <= name || fields.len() <= lon || fields.len() <= lat {
                continue;
            }
            if fields[name].trim().is_empty() {
                continue;
            }

            let lgv: f64 = fields[lon]
                .trim()
                .parse()
                .map_err(|e| Error::row("data", row, format!("col {}: {e}", lon + 1)))?;
            let ltv: f64 = fields[lat]
                .trim()
                .parse()
                .map_err(|e| Error::row("data", row, format!("col {}: {e}", lat + 1)))?;
            let catalog = cat
                .and_then(|c| fields.get(c))
                .map(|s| s.trim().to_string())
                .unwrap_or_default();

            let g = GeoRef {
                catalog,
                lon: lgv,
                lat: ltv,
            };
            if !g.is_valid() {
                return Err(Error::row("data", row, "invalid georeference".to_string()));
            }
            d.push(fields[name], g);
        }
        Ok(d)
    }

    fn push(&mut self, raw_name: &str, g: GeoRef) {
        // collapse internal whitespace so "Genus  species" matches "Genus species"
        let name = raw_name.split_whitespace().collect::<Vec<_>>().join(" ");
        let key = name.to_lowercase();
        let idx = match self.names.get(&key).copied() {
            Some(i) => i,
            None => {
                self.taxa.push(Taxon {
                    name,
                    recs: Vec::new(),
                });
                self.names.insert(key, self.taxa.len() - 1);
                self.taxa.len() - 1
            }
        };
        self.taxa[idx].recs.push(g);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TABLE: &str = "Name\tCatalog\tLongitude\tLatitude\n\
        Genus alpha\tc1\t-65.5\t-23.1\n\
        Genus alpha\tc2\t-64.9\t-22.8\n\
        Genus  beta\t\t150.0\t10.0\n\
        \t\t0.0\t0.0\n";

    #[test]
    fn test_read_groups_by_taxon() {
        let d = DataSet::read(Cursor::new(TABLE)).unwrap();
        assert_eq!(d.taxa().len(), 2);
        assert_eq!(d.taxa()[0].recs.len(), 2);
        assert_eq!(d.taxa()[1].name, "Genus beta");
        assert_eq!(d.taxa()[1].recs[0].lon, 150.0);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let d = DataSet::read(Cursor::new(TABLE)).unwrap();
        assert!(d.taxon("genus ALPHA").is_some());
        assert!(d.taxon("genus gamma").is_none());
    }

    #[test]
    fn test_header_aliases() {
        let t = "ScientificName\tLong\tLat\nX y\t10\t20\n";
        let d = DataSet::read(Cursor::new(t)).unwrap();
        assert_eq!(d.taxa()[0].recs[0].lat, 20.0);
    }

    #[test]
    fn test_incomplete_header_fails() {
        let t = "Name\tLatitude\nX\t10\n";
        assert!(DataSet::read(Cursor::new(t)).is_err());
    }

    #[test]
    fn test_bad_coordinate_fails_with_row() {
        let t = "Name\tLongitude\tLatitude\nX\t-190.0\t10\n";
        match DataSet::read(Cursor::new(t)) {
            Err(Error::Row { ctx: "data", row: 1, .. }) => {}
            other => panic!("expected row error, got {other:?}"),
        }
    }

    #[test]
    fn test_longitude_boundaries() {
        let ok = GeoRef {
            catalog: String::new(),
            lon: 180.0,
            lat: 0.0,
        };
        assert!(ok.is_valid());
        let bad = GeoRef {
            catalog: String::new(),
            lon: -180.0,
            lat: 0.0,
        };
        assert!(!bad.is_valid());
    }
}
