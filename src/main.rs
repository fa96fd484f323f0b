use clap::{Args, Parser, Subcommand};
use rand::Rng;
use rangeflip::events::CostModel;
use rangeflip::geodata::DataSet;
use rangeflip::raster::rasterize;
use rangeflip::recfile;
use rangeflip::search::{search_trees, SearchConfig};
use rangeflip::tree::{self, Tree};
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

// exit codes by failure category
const EXIT_ARGUMENT: i32 = 1;
const EXIT_INPUT: i32 = 2;
const EXIT_OUTPUT: i32 = 3;
const EXIT_INTERNAL: i32 = 4;

/// Reconstruct the biogeographic history of a clade under a geographically
/// explicit event model.
#[derive(Parser)]
#[command(name = "rangeflip", version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flip search for the most parsimonious event histories
    Search(SearchArgs),
    /// Evaluate reconstructions read from an event table
    Eval(EvalArgs),
    /// Import a parenthetical tree into the tree table
    ImportTree(ImportTreeArgs),
    /// List the trees of the tree table
    ListTrees(TreeFileArg),
    /// List the terminal taxa of the records table
    ListTaxa(RecordsFileArg),
    /// Export a presence-absence matrix and the pixel coordinates
    ExportPresence(ExportArgs),
}

#[derive(Args)]
struct DataArgs {
    /// Occurrence records table
    #[arg(long, default_value = "records.tab")]
    records: PathBuf,

    /// Tree table
    #[arg(long, default_value = "trees.tab")]
    trees: PathBuf,
}

#[derive(Args)]
struct RasterArgs {
    /// Number of columns in the raster
    #[arg(short, long, default_value_t = 360)]
    columns: usize,

    /// Pixels to fill around an observed pixel
    #[arg(short, long, default_value_t = 2)]
    fill: usize,
}

#[derive(Args)]
struct CostArgs {
    /// Downweight pixel changes by branch length (and upweight size
    /// penalties by it)
    #[arg(short, long)]
    brlen: bool,

    /// Range-size penalty denominator on each node (0 disables)
    #[arg(short = 'z', long, default_value_t = 0.0)]
    size: f64,

    /// Extra sympatry penalty denominator (0 disables)
    #[arg(long = "symp-size", default_value_t = 0.0)]
    symp_size: f64,

    /// Cost of a vicariance event
    #[arg(long, default_value_t = 1.0)]
    vic: f64,

    /// Cost of a full sympatry event
    #[arg(long, default_value_t = 1.0)]
    symp: f64,

    /// Cost of a point sympatry event
    #[arg(long, default_value_t = 1.0)]
    point: f64,

    /// Cost of a founder event
    #[arg(long, default_value_t = 1.0)]
    found: f64,
}

impl CostArgs {
    fn model(&self) -> CostModel {
        CostModel {
            vic: self.vic,
            symp: self.symp,
            point: self.point,
            found: self.found,
            size: self.size,
            symp_size: self.symp_size,
            use_len: self.brlen,
        }
    }
}

#[derive(Args)]
struct SearchArgs {
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    raster: RasterArgs,
    #[command(flatten)]
    costs: CostArgs,

    /// Probability (percent) of randomizing a node at each replicate start
    #[arg(short = 'm', long = "random", default_value_t = 25)]
    random: i32,

    /// Replicates per worker
    #[arg(short, long, default_value_t = 100)]
    replicates: usize,

    /// Workers per tree (0 uses twice the available parallelism)
    #[arg(short = 'p', long, default_value_t = 0)]
    procs: usize,

    /// Base RNG seed; a fixed seed makes the search reproducible
    #[arg(long)]
    seed: Option<u64>,

    /// Prohibit vicariance events
    #[arg(long)]
    novic: bool,

    /// Prohibit sympatry events
    #[arg(long)]
    nosymp: bool,

    /// Prohibit point sympatry events
    #[arg(long)]
    nopoint: bool,

    /// Prohibit founder events
    #[arg(long)]
    nofound: bool,

    /// Output file (standard output when omitted; `.gz` compresses)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct EvalArgs {
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    raster: RasterArgs,
    #[command(flatten)]
    costs: CostArgs,

    /// Event table (standard input when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (standard output when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ImportTreeArgs {
    /// Tree table to append to
    #[arg(long, default_value = "trees.tab")]
    trees: PathBuf,

    /// Parenthetical tree file (standard input when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Identifier of the new tree
    tree_id: String,
}

#[derive(Args)]
struct TreeFileArg {
    /// Tree table
    #[arg(long, default_value = "trees.tab")]
    trees: PathBuf,
}

#[derive(Args)]
struct RecordsFileArg {
    /// Occurrence records table
    #[arg(long, default_value = "records.tab")]
    records: PathBuf,
}

#[derive(Args)]
struct ExportArgs {
    /// Occurrence records table
    #[arg(long, default_value = "records.tab")]
    records: PathBuf,

    /// Number of columns in the raster
    #[arg(short, long, default_value_t = 360)]
    columns: usize,

    /// Base name of the output files
    name: String,
}

fn main() {
    let cli = Cli::parse();
    match cli.cmd {
        Commands::Search(args) => run_search(args),
        Commands::Eval(args) => run_eval(args),
        Commands::ImportTree(args) => run_import_tree(args),
        Commands::ListTrees(args) => run_list_trees(args),
        Commands::ListTaxa(args) => run_list_taxa(args),
        Commands::ExportPresence(args) => run_export_presence(args),
    }
}

fn fail(code: i32, msg: impl Display) -> ! {
    eprintln!("rangeflip: {msg}");
    process::exit(code);
}

fn log_if(show: bool, msg: String) {
    if show {
        println!("{msg}");
    }
}

fn load_data(path: &Path) -> DataSet {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(e) => fail(EXIT_INPUT, format!("{}: {e}", path.display())),
    };
    match DataSet::read(BufReader::new(f)) {
        Ok(d) => d,
        Err(e) => fail(EXIT_INPUT, e),
    }
}

fn load_trees(path: &Path) -> Vec<Tree> {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(e) => fail(EXIT_INPUT, format!("{}: {e}", path.display())),
    };
    match tree::read(BufReader::new(f)) {
        Ok(ts) => ts,
        Err(e) => fail(EXIT_INPUT, e),
    }
}

fn open_input(path: Option<&Path>) -> Box<dyn BufRead> {
    match path {
        None => Box::new(BufReader::new(io::stdin())),
        Some(p) => match File::open(p) {
            Ok(f) => Box::new(BufReader::new(f)),
            Err(e) => fail(EXIT_INPUT, format!("{}: {e}", p.display())),
        },
    }
}

fn run_search(args: SearchArgs) {
    let costs = args.costs.model();
    if let Err(e) = costs.validate() {
        fail(EXIT_ARGUMENT, e);
    }
    let cfg = SearchConfig {
        workers: args.procs,
        replicates: if args.replicates == 0 {
            100
        } else {
            args.replicates
        },
        rand_prob: args.random,
        seed: args.seed.unwrap_or_else(|| rand::rng().random()),
        no_vic: args.novic,
        no_symp: args.nosymp,
        no_point: args.nopoint,
        no_found: args.nofound,
        verbose: args.verbose,
    };
    if let Err(e) = cfg.permitted_events() {
        fail(EXIT_ARGUMENT, e);
    }

    let t0 = Instant::now();
    let data = load_data(&args.data.records);
    let ras = rasterize(&data, args.raster.columns, args.raster.fill);
    let trees = load_trees(&args.data.trees);
    log_if(
        args.verbose,
        format!(
            "Rasterized {} taxa over {} pixels in {:.3}s",
            data.taxa().len(),
            ras.pixels.len(),
            t0.elapsed().as_secs_f64()
        ),
    );

    let t1 = Instant::now();
    let results = match search_trees(&ras, &trees, costs, &cfg) {
        Ok(r) => r,
        Err(e) => fail(EXIT_INTERNAL, e),
    };
    log_if(
        args.verbose,
        format!(
            "Searched {} trees in {:.3}s",
            trees.len(),
            t1.elapsed().as_secs_f64()
        ),
    );

    let mut out = match recfile::create_writer(args.output.as_deref()) {
        Ok(o) => o,
        Err(e) => fail(EXIT_OUTPUT, e),
    };
    let mut header = true;
    for best in &results {
        log_if(
            args.verbose,
            format!(
                "Tree {} best: {:.3} recs found: {}",
                best[0].tree.id,
                best[0].cost(),
                best.len()
            ),
        );
        for b in best {
            if let Err(e) = recfile::write_events(b, &mut out, header) {
                fail(EXIT_OUTPUT, e);
            }
            header = false;
        }
    }
    if let Err(e) = out.flush() {
        fail(EXIT_OUTPUT, e);
    }
}

fn run_eval(args: EvalArgs) {
    let costs = args.costs.model();
    if let Err(e) = costs.validate() {
        fail(EXIT_ARGUMENT, e);
    }
    let data = load_data(&args.data.records);
    let ras = rasterize(&data, args.raster.columns, args.raster.fill);
    let trees = load_trees(&args.data.trees);

    let input = open_input(args.input.as_deref());
    let recs = match recfile::read_events(input, &ras, &trees, costs) {
        Ok(r) => r,
        Err(e) => fail(EXIT_INPUT, e),
    };

    let mut out = match recfile::create_writer(args.output.as_deref()) {
        Ok(o) => o,
        Err(e) => fail(EXIT_OUTPUT, e),
    };
    if let Err(e) = recfile::write_summary(&recs, &mut out) {
        fail(EXIT_OUTPUT, e);
    }
    if let Err(e) = out.flush() {
        fail(EXIT_OUTPUT, e);
    }
}

fn run_import_tree(args: ImportTreeArgs) {
    let mut trees = if args.trees.exists() {
        load_trees(&args.trees)
    } else {
        Vec::new()
    };
    if trees.iter().any(|t| t.id == args.tree_id) {
        fail(EXIT_ARGUMENT, "tree ID already used");
    }

    let input = open_input(args.input.as_deref());
    let t = match tree::read_parenthetic(input, &args.tree_id) {
        Ok(t) => t,
        Err(e) => fail(EXIT_INPUT, e),
    };
    trees.push(t);

    let f = match File::create(&args.trees) {
        Ok(f) => f,
        Err(e) => fail(EXIT_OUTPUT, format!("{}: {e}", args.trees.display())),
    };
    let mut out = BufWriter::new(f);
    let mut header = true;
    for t in &trees {
        if let Err(e) = t.write(&mut out, header) {
            fail(EXIT_OUTPUT, e);
        }
        header = false;
    }
    if let Err(e) = out.flush() {
        fail(EXIT_OUTPUT, e);
    }
}

fn run_list_trees(args: TreeFileArg) {
    for t in load_trees(&args.trees) {
        println!("{}", t.id);
    }
}

fn run_list_taxa(args: RecordsFileArg) {
    let data = load_data(&args.records);
    for tx in data.taxa() {
        println!("{}", tx.name);
    }
}

fn run_export_presence(args: ExportArgs) {
    let data = load_data(&args.records);
    let ras = rasterize(&data, args.columns, 0);

    // pixel centers, scanned row-major so both files share the same order
    let geo = match File::create(format!("{}.geo.txt", args.name)) {
        Ok(f) => f,
        Err(e) => fail(EXIT_OUTPUT, e),
    };
    let mut geo = BufWriter::new(geo);
    let mut bits = Vec::new();
    check_write(writeln!(geo, "# 0.0"));
    for y in 0..args.columns / 2 {
        let lat = 90.0 - (y as f64 * ras.resol + ras.resol / 2.0);
        for x in 0..args.columns {
            let Some(&b) = ras.pixels.get(&(y * args.columns + x)) else {
                continue;
            };
            bits.push(b);
            let lon = (x as f64 * ras.resol + ras.resol / 2.0) - 180.0;
            check_write(writeln!(geo, "{lat:.4} {lon:.4}"));
        }
    }
    check_write(geo.flush());

    let areas = match File::create(format!("{}.areas.txt", args.name)) {
        Ok(f) => f,
        Err(e) => fail(EXIT_OUTPUT, e),
    };
    let mut areas = BufWriter::new(areas);
    check_write(writeln!(areas, "{} {}", data.taxa().len(), bits.len()));
    for tx in data.taxa() {
        let obs = &ras.taxon(&tx.name).expect("every taxon is rasterized").obs;
        let row: String = bits
            .iter()
            .map(|&b| if obs.is_on(b) { '1' } else { '0' })
            .collect();
        check_write(writeln!(areas, "{}\t{row}", tx.name));
    }
    check_write(areas.flush());
}

fn check_write(res: io::Result<()>) {
    if let Err(e) = res {
        fail(EXIT_OUTPUT, e);
    }
}
