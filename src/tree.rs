//! Rooted phylogenetic trees over a dense node array.
//!
//! # Overview
//! Nodes live in a `Vec` indexed `0..N-1` with the root at index 0;
//! parent, first-child and next-sibling links are integer indices. Because
//! every node is appended after its ancestor, descendants always follow
//! their ancestor in index order — the reconstruction relies on that to
//! visit children before parents by walking the array backwards.
//!
//! Two input formats are supported: a tab-separated table (`Tree`, `Node`,
//! `Ancestor`, `Terminal`, optional `Length`) and a parenthetical
//! "Newick-like" string.

use std::io::{BufRead, Write};

use crate::error::{Error, Result};

/// A node of a phylogenetic tree.
#[derive(Clone, Debug)]
pub struct Node {
    /// Stable identifier used in tabular files.
    pub id: String,
    pub parent: Option<usize>,
    pub first_child: Option<usize>,
    pub next_sibling: Option<usize>,
    /// Taxon name; set exactly on leaves.
    pub terminal: Option<String>,
    /// Branch length to the parent; 1 when the input does not provide one.
    pub length: f64,
}

/// A rooted phylogenetic tree.
#[derive(Clone, Debug)]
pub struct Tree {
    pub id: String,
    pub nodes: Vec<Node>,
}

impl Tree {
    fn new(id: &str) -> Tree {
        Tree {
            id: id.to_string(),
            nodes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_leaf(&self, n: usize) -> bool {
        self.nodes[n].first_child.is_none()
    }

    /// Children of `n`, in insertion order.
    pub fn children(&self, n: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.nodes[n].first_child, |&c| self.nodes[c].next_sibling)
    }

    /// `n` and its ancestors, up to and including the root.
    pub fn ancestors(&self, n: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(Some(n), |&i| self.nodes[i].parent)
    }

    /// Index of the node with the given identifier.
    pub fn node_by_id(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Appends a node, linking it as the last child of `parent`. Returns its
    /// index. An explicit `id` is used when given; otherwise the index is
    /// the id.
    fn push_node(
        &mut self,
        parent: Option<usize>,
        id: Option<String>,
        terminal: Option<String>,
        length: f64,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            id: id.unwrap_or_else(|| idx.to_string()),
            parent,
            first_child: None,
            next_sibling: None,
            terminal,
            length,
        });
        if let Some(p) = parent {
            match self.nodes[p].first_child {
                None => self.nodes[p].first_child = Some(idx),
                Some(first) => {
                    let mut c = first;
                    while let Some(s) = self.nodes[c].next_sibling {
                        c = s;
                    }
                    self.nodes[c].next_sibling = Some(idx);
                }
            }
        }
        idx
    }

    /// Writes the tree as a tab-separated table. When `header` is false the
    /// column names are omitted, so several trees can share one file.
    pub fn write<W: Write>(&self, out: &mut W, header: bool) -> std::io::Result<()> {
        if header {
            writeln!(out, "Tree\tNode\tAncestor\tLength\tTerminal")?;
        }
        for n in &self.nodes {
            let anc = match n.parent {
                Some(p) => self.nodes[p].id.as_str(),
                None => "-1",
            };
            writeln!(
                out,
                "{}\t{}\t{}\t{:.6}\t{}",
                self.id,
                n.id,
                anc,
                n.length,
                n.terminal.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }
}

/// Reads one or more trees from a tab-separated table.
///
/// Nodes must appear after their ancestors. The root row carries an empty
/// ancestor, `-1`, or the literal `xx`.
pub fn read<R: BufRead>(input: R) -> Result<Vec<Tree>> {
    let mut lines = input.lines();
    let header = match lines.next() {
        Some(h) => h?,
        None => return Err(Error::header("tree", "empty input".to_string())),
    };

    let mut tree_c = None;
    let mut node_c = None;
    let mut anc_c = None;
    let mut term_c = None;
    let mut len_c = None;
    for (i, col) in header.split('\t').enumerate() {
        match col.trim().to_lowercase().as_str() {
            "tree" => tree_c = Some(i),
            "node" | "node id" => node_c = Some(i),
            "ancestor" | "anc" | "parent" => anc_c = Some(i),
            "term" | "terminal" | "termname" => term_c = Some(i),
            "length" | "len" => len_c = Some(i),
            _ => {}
        }
    }
    let (tree_c, node_c, anc_c, term_c) = match (tree_c, node_c, anc_c, term_c) {
        (Some(t), Some(n), Some(a), Some(tm)) => (t, n, a, tm),
        _ => return Err(Error::header("tree", "incomplete header".to_string())),
    };

    let mut trees: Vec<Tree> = Vec::new();
    for (row, line) in lines.enumerate() {
        let row = row + 1;
        let line = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() <= tree_c
            || fields.len() <= node_c
            || fields.len() <= anc_c
            || fields.len() <= term_c
        {
            continue;
        }
        let tid = fields[tree_c].trim();
        let nid = fields[node_c].trim();
        if tid.is_empty() || nid.is_empty() {
            continue;
        }

        let ti = match trees.iter().position(|t| t.id == tid) {
            Some(i) => i,
            None => {
                trees.push(Tree::new(tid));
                trees.len() - 1
            }
        };
        let t = &mut trees[ti];
        if t.node_by_id(nid).is_some() {
            return Err(Error::row(
                "tree",
                row,
                format!("node id {nid} (tree {tid}) repeated"),
            ));
        }

        let anc = fields[anc_c].trim();
        if anc.is_empty() || anc == "-1" || anc == "xx" {
            if !t.is_empty() {
                return Err(Error::row("tree", row, "node without parent".to_string()));
            }
            t.push_node(None, Some(nid.to_string()), None, 1.0);
            continue;
        }
        let av = t.node_by_id(anc).ok_or_else(|| {
            Error::row(
                "tree",
                row,
                format!("ancestor {anc} of node id {nid} (tree {tid}) not found"),
            )
        })?;
        if t.nodes[av].terminal.is_some() {
            return Err(Error::row(
                "tree",
                row,
                format!("ancestor {anc} of node id {nid} (tree {tid}) is a terminal"),
            ));
        }

        let terminal = fields
            .get(term_c)
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|s| !s.is_empty());
        let length = len_c
            .and_then(|c| fields.get(c))
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|l| *l >= 0.0)
            .unwrap_or(1.0);
        t.push_node(Some(av), Some(nid.to_string()), terminal, length);
    }
    Ok(trees)
}

/// Reads a single tree in parenthetical notation.
///
/// Terminals are read by name: `_` becomes a space, or the whole name can
/// be quoted with `'`. A `:length` suffix after any group or terminal sets
/// its branch length. Every internal node needs at least two descendants.
pub fn read_parenthetic<R: BufRead>(mut input: R, id: &str) -> Result<Tree> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;

    let mut chars = text.chars().peekable();
    // skip everything before the first open parenthesis
    loop {
        match chars.next() {
            Some('(') => break,
            Some(_) => {}
            None => return Err(Error::header("tree", "no tree in input".to_string())),
        }
    }
    let mut t = Tree::new(id);
    read_group(&mut chars, &mut t, None)?;
    Ok(t)
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

/// Reads the body of a parenthesized group; the opening `(` is already
/// consumed. Returns the index of the new internal node.
fn read_group(chars: &mut Chars, t: &mut Tree, parent: Option<usize>) -> Result<usize> {
    let n = t.push_node(parent, None, None, 1.0);
    let mut num = 0;
    let mut last: Option<usize> = None;
    loop {
        let c = match chars.peek() {
            Some(c) => *c,
            None => return Err(Error::header("tree", "unbalanced parentheses".to_string())),
        };
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ',' => {
                chars.next();
            }
            ':' => {
                chars.next();
                let Some(last) = last else {
                    return Err(Error::header("tree", "unexpected branch length".to_string()));
                };
                let len = read_length(chars)?;
                if len >= 0.0 {
                    t.nodes[last].length = len;
                }
            }
            '(' => {
                chars.next();
                last = Some(read_group(chars, t, Some(n))?);
                num += 1;
            }
            ')' => {
                chars.next();
                break;
            }
            _ => {
                let name = read_terminal(chars)?;
                last = Some(t.push_node(Some(n), None, Some(name), 1.0));
                num += 1;
            }
        }
    }
    if num < 2 {
        return Err(Error::header(
            "tree",
            format!("node with too few descendants ({num})"),
        ));
    }
    Ok(n)
}

/// Reads a terminal name, unquoted (`_` as space) or quoted with `'`.
fn read_terminal(chars: &mut Chars) -> Result<String> {
    if chars.peek() == Some(&'\'') {
        chars.next();
        return read_quoted(chars);
    }
    let mut name = String::new();
    let mut space = false;
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == ',' {
            chars.next();
            break;
        }
        if c == '(' || c == ')' || c == ':' {
            break;
        }
        chars.next();
        if c == '_' {
            space = true;
            continue;
        }
        if space {
            if !name.is_empty() {
                name.push(' ');
            }
            space = false;
        }
        name.push(c);
    }
    if name.is_empty() {
        return Err(Error::header(
            "tree",
            "empty taxon name (just underlines)".to_string(),
        ));
    }
    Ok(name)
}

/// Reads a quoted name; runs of whitespace collapse to one space.
fn read_quoted(chars: &mut Chars) -> Result<String> {
    let mut name = String::new();
    let mut space = false;
    loop {
        let c = chars
            .next()
            .ok_or_else(|| Error::header("tree", "unterminated quoted name".to_string()))?;
        if c == '\'' {
            break;
        }
        if c.is_whitespace() {
            space = true;
            continue;
        }
        if space {
            if !name.is_empty() {
                name.push(' ');
            }
            space = false;
        }
        name.push(c);
    }
    if name.is_empty() {
        return Err(Error::header("tree", "empty block string".to_string()));
    }
    Ok(name)
}

fn read_length(chars: &mut Chars) -> Result<f64> {
    let mut s = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == ',' {
            chars.next();
            break;
        }
        if c == '(' || c == ')' {
            break;
        }
        s.push(c);
        chars.next();
    }
    s.parse()
        .map_err(|e| Error::header("tree", format!("bad branch length: {e}")))
}
