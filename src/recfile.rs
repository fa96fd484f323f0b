//! Reading and writing event-assignment tables.
//!
//! An event table is tab-separated with columns `Tree`, `ID`, `Node`,
//! `Event`, `Set`. `Event` is a single letter (`v`, `s`, `p`, `f`, or `*`
//! for none). For `p` and `f` rows, `Set` names the daughter that is the
//! point or the founder; for `s` rows it selects the left/right sympatry
//! variant, with `*` meaning full sympatry.

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::events::{CostModel, Event, Reconstruction, Side, SympKind};
use crate::raster::Raster;
use crate::tree::Tree;

/// Opens the output stream: standard output when no path is given, a file
/// otherwise. A path ending in `.gz` is gzip-compressed.
pub fn create_writer(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
    match path {
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
        Some(p) => {
            let f = File::create(p)?;
            if p.to_string_lossy().ends_with(".gz") {
                let enc = GzEncoder::new(f, Compression::default());
                Ok(Box::new(BufWriter::new(enc)))
            } else {
                Ok(Box::new(BufWriter::new(f)))
            }
        }
    }
}

/// Writes one row per optimizable node of the reconstruction. When `header`
/// is false the column names are omitted, so several reconstructions can
/// share one file.
pub fn write_events<W: Write>(
    r: &Reconstruction,
    out: &mut W,
    header: bool,
) -> io::Result<()> {
    if header {
        writeln!(out, "Tree\tID\tNode\tEvent\tSet")?;
    }
    for (i, rec) in r.rec.iter().enumerate() {
        let Some((l, rt)) = rec.sets else { continue };
        let set = match rec.flag {
            Event::Symp(SympKind::Left) | Event::Point(Side::Left) | Event::Found(Side::Left) => {
                r.tree.nodes[l].id.as_str()
            }
            Event::Symp(SympKind::Right)
            | Event::Point(Side::Right)
            | Event::Found(Side::Right) => r.tree.nodes[rt].id.as_str(),
            _ => "*",
        };
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            r.tree.id,
            r.id,
            r.tree.nodes[i].id,
            rec.flag.letter(),
            set
        )?;
    }
    Ok(())
}

/// Reads reconstructions from an event table.
///
/// Each distinct `(Tree, ID)` pair starts from the OR reconstruction of the
/// named tree and applies its rows one by one, down-passing after each, so
/// the result is consistent whatever the row order. Rows of trees not in
/// `trees` are ignored.
pub fn read_events<'d, R: BufRead>(
    input: R,
    raster: &'d Raster,
    trees: &'d [Tree],
    costs: CostModel,
) -> Result<Vec<Reconstruction<'d>>> {
    let mut lines = input.lines();
    let header = match lines.next() {
        Some(h) => h?,
        None => return Err(Error::header("recons", "empty input".to_string())),
    };

    let mut tree_c = None;
    let mut id_c = None;
    let mut node_c = None;
    let mut event_c = None;
    let mut set_c = None;
    for (i, col) in header.split('\t').enumerate() {
        match col.trim().to_lowercase().as_str() {
            "tree" => tree_c = Some(i),
            "id" => id_c = Some(i),
            "node" | "node id" => node_c = Some(i),
            "event" | "ev" => event_c = Some(i),
            "set" => set_c = Some(i),
            _ => {}
        }
    }
    let (tree_c, id_c, node_c, event_c, set_c) = match (tree_c, id_c, node_c, event_c, set_c) {
        (Some(t), Some(d), Some(n), Some(e), Some(s)) => (t, d, n, e, s),
        _ => return Err(Error::header("recons", "incomplete header".to_string())),
    };

    let mut recs: Vec<Reconstruction<'d>> = Vec::new();
    // tree index of the block being read; None when its tree is unknown
    let mut cur: Option<usize> = None;
    let mut prev: Option<(String, String)> = None;
    for (row, line) in lines.enumerate() {
        let row = row + 1;
        let line = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() <= tree_c
            || fields.len() <= id_c
            || fields.len() <= node_c
            || fields.len() <= event_c
            || fields.len() <= set_c
        {
            continue;
        }
        let tid = fields[tree_c].trim();
        let rid = fields[id_c].trim();
        let nid = fields[node_c].trim();
        if tid.is_empty() || rid.is_empty() || nid.is_empty() {
            continue;
        }

        let key = (tid.to_string(), rid.to_string());
        if prev.as_ref() != Some(&key) {
            prev = Some(key);
            cur = trees.iter().position(|t| t.id.eq_ignore_ascii_case(tid));
            if let Some(ti) = cur {
                let mut nr = Reconstruction::or(raster, &trees[ti], costs);
                nr.id = rid.to_string();
                recs.push(nr);
            }
        }
        let Some(ti) = cur else { continue };
        let t = &trees[ti];
        let rec = recs.last_mut().expect("a reconstruction opened per block");

        let n = t.node_by_id(nid).ok_or_else(|| {
            Error::row(
                "recons",
                row,
                format!("node {nid} (tree {tid}) not found"),
            )
        })?;
        let Some((l, rt)) = rec.rec[n].sets else { continue };
        let set = fields[set_c].trim();
        let event = match fields[event_c].trim().to_lowercase().as_str() {
            "*" => continue,
            "v" => Event::Vic,
            "s" => {
                if set == "*" || set.is_empty() {
                    Event::Symp(SympKind::Union)
                } else if t.nodes[l].id == set {
                    Event::Symp(SympKind::Left)
                } else if t.nodes[rt].id == set {
                    Event::Symp(SympKind::Right)
                } else {
                    continue;
                }
            }
            "p" => {
                if t.nodes[l].id == set {
                    Event::Point(Side::Left)
                } else if t.nodes[rt].id == set {
                    Event::Point(Side::Right)
                } else {
                    return Err(Error::row(
                        "recons",
                        row,
                        format!("invalid set for node {nid} (tree {tid})"),
                    ));
                }
            }
            "f" => {
                if t.nodes[l].id == set {
                    Event::Found(Side::Left)
                } else if t.nodes[rt].id == set {
                    Event::Found(Side::Right)
                } else {
                    return Err(Error::row(
                        "recons",
                        row,
                        format!("invalid set for node {nid} (tree {tid})"),
                    ));
                }
            }
            other => {
                return Err(Error::row(
                    "recons",
                    row,
                    format!("unknown event {other}"),
                ));
            }
        };
        rec.rec[n].flag = event;
        rec.down_pass(n);
    }
    Ok(recs)
}

/// Writes the evaluation summary table: one row per reconstruction with its
/// cost and event counts by family.
pub fn write_summary<W: Write>(recs: &[Reconstruction], out: &mut W) -> io::Result<()> {
    writeln!(out, "Tree\tRecID\tCost\tVics\tSymps\tPoint\tFound")?;
    for r in recs {
        let e = r.evaluate();
        writeln!(
            out,
            "{}\t{}\t{:.3}\t{}\t{}\t{}\t{}",
            r.tree.id,
            r.id,
            r.cost(),
            e.vics,
            e.symps,
            e.points,
            e.founds
        )?;
    }
    Ok(())
}
