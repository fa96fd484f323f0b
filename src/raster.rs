//! Rasterization of occurrence records into a compact pixel universe.
//!
//! # Overview
//! The geographic grid has `cols` columns and `cols/2` rows at a resolution
//! of `360/cols` degrees. Only pixels that contain at least one record exist
//! in the universe: each observed pixel gets a dense bit index, and every
//! range bitfield of the session is laid out over those bits.
//!
//! For every taxon two bitfields are built:
//! - `obs`: the pixels where the taxon was recorded;
//! - `fill`: `obs` dilated by a Chebyshev neighborhood of radius `fill`,
//!   wrapping in longitude and clamped in latitude. The dilation only turns
//!   on pixels that exist in the universe.
//!
//! Taxa are independent, so the per-taxon pass runs in parallel.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::bitfield::{Bitfield, BITS_PER_FIELD};
use crate::geodata::DataSet;

/// A terminal taxon with its rasterized range.
#[derive(Clone, Debug)]
pub struct TaxonRaster {
    pub name: String,
    pub obs: Bitfield,
    pub fill: Bitfield,
}

/// A rasterized data set: the pixel universe plus one [`TaxonRaster`] per
/// taxon. Immutable once built; shared freely across search workers.
#[derive(Debug)]
pub struct Raster {
    taxa: HashMap<String, TaxonRaster>,
    /// Map of pixel index (`row * cols + col`) to bit index.
    pub pixels: HashMap<usize, usize>,
    /// Width of every bitfield of the session, in 16-bit words.
    pub fields: usize,
    pub cols: usize,
    pub fill: usize,
    /// Degrees per pixel side.
    pub resol: f64,
}

impl Raster {
    /// Looks up the raster of a taxon by name, case-insensitively.
    pub fn taxon(&self, name: &str) -> Option<&TaxonRaster> {
        self.taxa.get(&name.to_lowercase())
    }

    /// Grid cell of a geographic point. Longitude 180 wraps onto the
    /// -180 meridian and the south pole is clamped to the last row, so every
    /// valid record maps inside the grid.
    pub fn cell(&self, lon: f64, lat: f64) -> (usize, usize) {
        let col = (((180.0 + lon) / self.resol) as usize) % self.cols;
        let row = (((90.0 - lat) / self.resol) as usize).min(self.cols / 2 - 1);
        (col, row)
    }

    fn pixel(&self, lon: f64, lat: f64) -> usize {
        let (col, row) = self.cell(lon, lat);
        row * self.cols + col
    }
}

/// Builds the [`Raster`] for a data set.
///
/// The first pass enumerates observed pixels in input order and assigns
/// dense bit indices; the second pass builds each taxon's `obs` and `fill`
/// bitfields in parallel.
pub fn rasterize(d: &DataSet, cols: usize, fill: usize) -> Raster {
    let mut ras = Raster {
        taxa: HashMap::new(),
        pixels: HashMap::new(),
        fields: 0,
        cols,
        fill,
        resol: 360.0 / cols as f64,
    };

    let mut cells = 0;
    for tx in d.taxa() {
        for g in &tx.recs {
            let px = ras.pixel(g.lon, g.lat);
            if let std::collections::hash_map::Entry::Vacant(e) = ras.pixels.entry(px) {
                e.insert(cells);
                cells += 1;
            }
        }
    }
    ras.fields = cells.div_ceil(BITS_PER_FIELD);

    let taxa: Vec<TaxonRaster> = d
        .taxa()
        .par_iter()
        .map(|tx| {
            let mut t = TaxonRaster {
                name: tx.name.clone(),
                obs: Bitfield::zeros(ras.fields),
                fill: Bitfield::zeros(ras.fields),
            };
            for g in &tx.recs {
                let (col, row) = ras.cell(g.lon, g.lat);
                let b = ras.pixels[&(row * ras.cols + col)];
                if t.obs.is_on(b) {
                    continue;
                }
                t.obs.put_on(b);
                ras.dilate(col, row, &mut t.fill);
            }
            t
        })
        .collect();

    for t in taxa {
        ras.taxa.insert(t.name.to_lowercase(), t);
    }
    ras
}

impl Raster {
    /// Turns on, in `fill`, every known pixel within Chebyshev distance
    /// `self.fill` of `(col, row)`, wrapping in longitude and skipping rows
    /// outside the grid.
    fn dilate(&self, col: usize, row: usize, fill: &mut Bitfield) {
        let radius = self.fill as i64;
        let rows = (self.cols / 2) as i64;
        for i in -radius..=radius {
            let x = (col as i64 - i).rem_euclid(self.cols as i64) as usize;
            for j in -radius..=radius {
                let y = row as i64 - j;
                if y < 0 || y >= rows {
                    continue;
                }
                let px = y as usize * self.cols + x;
                if let Some(&b) = self.pixels.get(&px) {
                    fill.put_on(b);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodata::DataSet;
    use std::io::Cursor;

    fn dataset(rows: &[(&str, f64, f64)]) -> DataSet {
        let mut table = String::from("Name\tLongitude\tLatitude\n");
        for (name, lon, lat) in rows {
            table.push_str(&format!("{name}\t{lon}\t{lat}\n"));
        }
        DataSet::read(Cursor::new(table)).unwrap()
    }

    #[test]
    fn test_pixel_indexing() {
        let d = dataset(&[("A", -65.5, -23.1)]);
        let ras = rasterize(&d, 360, 0);
        // col = floor(180 - 65.5) = 114, row = floor(90 + 23.1) = 113
        assert_eq!(ras.cell(-65.5, -23.1), (114, 113));
        assert_eq!(ras.pixels.len(), 1);
        assert!(ras.pixels.contains_key(&(113 * 360 + 114)));
        assert_eq!(ras.fields, 1);
    }

    #[test]
    fn test_records_in_same_pixel_share_a_bit() {
        let d = dataset(&[("A", 10.2, 10.2), ("A", 10.8, 10.8), ("B", 10.5, 10.5)]);
        let ras = rasterize(&d, 360, 0);
        assert_eq!(ras.pixels.len(), 1);
        assert_eq!(ras.taxon("A").unwrap().obs.count(), 1);
        assert_eq!(ras.taxon("B").unwrap().obs.count(), 1);
    }

    #[test]
    fn test_fill_zero_equals_obs() {
        let d = dataset(&[("A", 0.5, 0.5), ("A", 3.5, 7.5), ("B", -20.0, 42.0)]);
        let ras = rasterize(&d, 360, 0);
        for name in ["A", "B"] {
            let t = ras.taxon(name).unwrap();
            assert_eq!(t.obs, t.fill);
        }
    }

    #[test]
    fn test_fill_dominates_obs() {
        let d = dataset(&[("A", 0.5, 0.5), ("A", 1.5, 0.5), ("B", 2.5, 0.5)]);
        let ras = rasterize(&d, 360, 2);
        for name in ["A", "B"] {
            let t = ras.taxon(name).unwrap();
            assert_eq!(t.obs.common(&t.fill), t.obs.count());
        }
    }

    #[test]
    fn test_fill_covers_known_neighbors_only() {
        // A and B one pixel apart; C far away.
        let d = dataset(&[("A", 0.5, 0.5), ("B", 1.5, 0.5), ("C", 100.5, 0.5)]);
        let ras = rasterize(&d, 360, 1);
        let a = ras.taxon("A").unwrap();
        let b_bit = ras.pixels[&ras.pixel(1.5, 0.5)];
        let c_bit = ras.pixels[&ras.pixel(100.5, 0.5)];
        assert!(a.fill.is_on(b_bit));
        assert!(!a.fill.is_on(c_bit));
        assert_eq!(a.fill.count(), 2);
    }

    #[test]
    fn test_fill_wraps_in_longitude() {
        let d = dataset(&[("A", 179.5, 0.5), ("B", -179.5, 0.5)]);
        let ras = rasterize(&d, 360, 1);
        let a = ras.taxon("A").unwrap();
        let b = ras.taxon("B").unwrap();
        let a_bit = ras.pixels[&ras.pixel(179.5, 0.5)];
        let b_bit = ras.pixels[&ras.pixel(-179.5, 0.5)];
        assert_ne!(a_bit, b_bit);
        assert!(a.fill.is_on(b_bit), "dateline neighbor reached by wrap");
        assert!(b.fill.is_on(a_bit));
    }

    #[test]
    fn test_fill_clamped_at_poles() {
        let d = dataset(&[("A", 0.5, 89.5)]);
        let ras = rasterize(&d, 360, 3);
        // nothing above the top row exists; the only known pixel is A's own
        assert_eq!(ras.taxon("A").unwrap().fill.count(), 1);
    }

    #[test]
    fn test_field_width_rounds_up() {
        let rows: Vec<(String, f64, f64)> = (0..17)
            .map(|i| ("A".to_string(), 0.5 + i as f64, 0.5))
            .collect();
        let refs: Vec<(&str, f64, f64)> = rows.iter().map(|(n, lo, la)| (n.as_str(), *lo, *la)).collect();
        let d = dataset(&refs);
        let ras = rasterize(&d, 360, 0);
        assert_eq!(ras.pixels.len(), 17);
        assert_eq!(ras.fields, 2);
    }
}
