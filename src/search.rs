//! Parallel flip search for minimum-cost reconstructions.
//!
//! # Overview
//! Each tree is searched by a pool of independent workers. A worker owns a
//! deep copy of the initial OR reconstruction and runs replicates of
//! perturb-then-descend: randomize some events, then greedily flip node
//! events while the total cost drops, accepting the *first* improvement
//! found at a node rather than the best one. Node and event orders are
//! shuffled per pass so replicates explore different descent paths.
//!
//! Workers never share reconstruction state, so the hot path is lock-free;
//! the only synchronization is collecting one best-set per worker, which the
//! reducer merges into the set of distinct equally-optimal reconstructions.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::events::{CostModel, Event, Reconstruction, Side, SympKind};
use crate::raster::Raster;
use crate::tree::Tree;

/// Knobs of the flip search.
#[derive(Clone, Debug)]
pub struct SearchConfig {
    /// Workers per tree; 0 picks twice the available parallelism.
    pub workers: usize,
    /// Replicates per worker.
    pub replicates: usize,
    /// Probability, as a percentage, of randomizing a node between
    /// replicates.
    pub rand_prob: i32,
    /// Base seed; worker `w` derives its own generator from it, so a fixed
    /// seed gives reproducible searches.
    pub seed: u64,
    pub no_vic: bool,
    pub no_symp: bool,
    pub no_point: bool,
    pub no_found: bool,
    pub verbose: bool,
}

impl Default for SearchConfig {
    fn default() -> SearchConfig {
        SearchConfig {
            workers: 0,
            replicates: 100,
            rand_prob: 25,
            seed: 0,
            no_vic: false,
            no_symp: false,
            no_point: false,
            no_found: false,
            verbose: false,
        }
    }
}

impl SearchConfig {
    /// The list of events the search may assign, honoring the exclusions.
    /// At least one event family must remain permitted.
    pub fn permitted_events(&self) -> Result<Vec<Event>> {
        let mut evs = Vec::new();
        if !self.no_vic {
            evs.push(Event::Vic);
        }
        if !self.no_symp {
            evs.extend([
                Event::Symp(SympKind::Union),
                Event::Symp(SympKind::Left),
                Event::Symp(SympKind::Right),
            ]);
        }
        if !self.no_point {
            evs.extend([Event::Point(Side::Left), Event::Point(Side::Right)]);
        }
        if !self.no_found {
            evs.extend([Event::Found(Side::Left), Event::Found(Side::Right)]);
        }
        if evs.is_empty() {
            return Err(Error::Config(
                "at least one event must be allowed".to_string(),
            ));
        }
        Ok(evs)
    }

    fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        2 * std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Searches every tree, in parallel, and returns one best-set per tree in
/// input order.
pub fn search_trees<'d>(
    raster: &'d Raster,
    trees: &'d [Tree],
    costs: CostModel,
    cfg: &SearchConfig,
) -> Result<Vec<Vec<Reconstruction<'d>>>> {
    costs.validate()?;
    cfg.permitted_events()?;
    trees
        .par_iter()
        .map(|t| {
            let mut or = Reconstruction::or(raster, t, costs);
            flip_search(&mut or, cfg)
        })
        .collect()
}

/// Runs the flip search on one initial reconstruction and returns the set
/// of distinct best reconstructions found.
pub fn flip_search<'d>(
    or: &mut Reconstruction<'d>,
    cfg: &SearchConfig,
) -> Result<Vec<Reconstruction<'d>>> {
    let evs = cfg.permitted_events()?;
    remap_excluded(or, cfg);
    let nodes: Vec<usize> = (0..or.rec.len())
        .filter(|&i| or.rec[i].sets.is_some())
        .collect();

    let or_ref: &Reconstruction = or;
    let sets: Vec<Vec<Reconstruction>> = (0..cfg.worker_count())
        .into_par_iter()
        .map(|w| run_worker(or_ref, &nodes, &evs, cfg, w))
        .collect();
    Ok(merge(sets))
}

/// Replaces excluded events assigned by the OR constructor with a permitted
/// one, so the search never starts from a forbidden state it cannot flip
/// away from.
pub fn remap_excluded(or: &mut Reconstruction, cfg: &SearchConfig) {
    if cfg.no_vic && cfg.no_symp {
        let to = if cfg.no_found {
            Event::Point(Side::Right)
        } else {
            Event::Found(Side::Right)
        };
        for i in 0..or.rec.len() {
            if or.rec[i].sets.is_some()
                && matches!(or.rec[i].flag, Event::Vic | Event::Symp(_))
            {
                or.rec[i].flag = to;
                or.down_pass(i);
            }
        }
    } else if cfg.no_vic {
        for i in 0..or.rec.len() {
            if or.rec[i].sets.is_some() && or.rec[i].flag == Event::Vic {
                or.rec[i].flag = Event::Symp(SympKind::Union);
                or.down_pass(i);
            }
        }
    } else if cfg.no_symp {
        for i in 0..or.rec.len() {
            if or.rec[i].sets.is_some() && or.rec[i].flag.is_sympatry() {
                or.rec[i].flag = Event::Vic;
                or.down_pass(i);
            }
        }
    }
}

/// One worker: `replicates` rounds of randomize-then-flip over its own copy
/// of the initial reconstruction, keeping the distinct best results.
fn run_worker<'d>(
    or: &Reconstruction<'d>,
    nodes: &[usize],
    evs: &[Event],
    cfg: &SearchConfig,
    worker: usize,
) -> Vec<Reconstruction<'d>> {
    let mut rng = SmallRng::seed_from_u64(cfg.seed ^ splitmix64(worker as u64 + 1));
    let mut nodes = nodes.to_vec();
    let mut evs = evs.to_vec();
    let mut work = or.clone();
    let mut best = vec![or.clone()];
    let mut hits = 1usize;

    for rep in 0..cfg.replicates {
        if rep > 0 {
            work.copy_from(or);
        }
        work.randomize(cfg.rand_prob, &evs, &mut rng);
        flip(&mut work, &mut nodes, &mut evs, &mut rng);

        if work.cost() < best[0].cost() {
            if cfg.verbose {
                println!(
                    "Replicate {}.{worker}.{rep}: {:.3} [best so far]",
                    work.tree.id,
                    work.cost()
                );
            }
            hits = 1;
            let mut cp = work.clone();
            cp.id = format!("{worker}.{rep}");
            best = vec![cp];
        } else if work.cost() == best[0].cost() {
            if cfg.verbose {
                println!(
                    "Replicate {}.{worker}.{rep}: {:.3} [hit best]",
                    work.tree.id,
                    work.cost()
                );
            }
            hits += 1;
            if best.iter().all(|b| work.is_diff(b)) {
                let mut cp = work.clone();
                cp.id = format!("{worker}.{rep}");
                best.push(cp);
            }
        } else if cfg.verbose {
            println!(
                "Replicate {}.{worker}.{rep}: {:.3}",
                work.tree.id,
                work.cost()
            );
        }
    }
    if cfg.verbose {
        println!(
            "Worker {}.{worker} hits: {hits} (of {}) best: {:.3} stored: {}",
            or.tree.id,
            cfg.replicates,
            best[0].cost(),
            best.len()
        );
    }
    best
}

/// First-improvement descent: shuffle the nodes, and at each node try the
/// events in shuffled order, accepting the first flip that beats the
/// current best cost. A full pass with no improvement terminates.
fn flip(
    r: &mut Reconstruction,
    nodes: &mut [usize],
    evs: &mut [Event],
    rng: &mut SmallRng,
) -> f64 {
    let mut best = r.cost();
    let mut changed = true;
    while changed {
        changed = false;
        nodes.shuffle(rng);
        for k in 0..nodes.len() {
            let n = nodes[k];
            let prev = r.rec[n].flag;
            evs.shuffle(rng);
            for j in 0..evs.len() {
                let e = evs[j];
                if e == prev {
                    continue;
                }
                r.rec[n].flag = e;
                if r.down_pass(n) < best {
                    break;
                }
            }
            if r.cost() < best {
                best = r.cost();
                changed = true;
                break;
            }
            // no event improved; the last one tried is still in place
            r.rec[n].flag = prev;
            r.down_pass(n);
        }
    }
    r.cost()
}

/// Merges worker best-sets: lowest cost wins; on ties, only reconstructions
/// different from every kept one are appended. The result is independent of
/// the merge order up to the set of distinct optima.
fn merge<'d>(sets: Vec<Vec<Reconstruction<'d>>>) -> Vec<Reconstruction<'d>> {
    let mut iter = sets.into_iter();
    let mut best = iter.next().unwrap_or_default();
    for set in iter {
        if set.is_empty() {
            continue;
        }
        if best.is_empty() || set[0].cost() < best[0].cost() {
            best = set;
        } else if set[0].cost() == best[0].cost() {
            for r in set {
                if best.iter().all(|b| r.is_diff(b)) {
                    best.push(r);
                }
            }
        }
    }
    best
}

/// Decorrelates per-worker seeds drawn from one base seed.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
