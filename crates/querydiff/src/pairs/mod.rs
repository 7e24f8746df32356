use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

use crate::models::{IgnoreSet, ParsedPairs, QueryPair};

pub const PAIR_DELIMITER: &str = "=============================================================";
pub const INTERNAL_DELIMITER: &str = "-------------------------------------------------------------";
pub const DEFAULT_MAX_PAIRS: usize = 100_000;

pub const ORIGIN_HEADER: &str = "Original query:";
pub const FIRST_HEADER: &str = "First query:";
pub const SECOND_HEADER: &str = "Second query:";

/// How the internal-delimited segments of a block map onto a pair.
///
/// `Plain` blocks hold `first / second / description`, `Extended` blocks put an
/// origin segment in front. `Auto` reads a block with exactly three segments as
/// plain and anything else as extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockLayout {
    #[default]
    Auto,
    Plain,
    Extended,
}

impl BlockLayout {
    fn resolve(self, segments: usize) -> Self {
        match self {
            Self::Auto if segments == 3 => Self::Plain,
            Self::Auto => Self::Extended,
            fixed => fixed,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Plain => "plain",
            Self::Extended => "extended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    pub max_pairs: Option<usize>,
    pub ignore: IgnoreSet,
    pub layout: BlockLayout,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_pairs: Some(DEFAULT_MAX_PAIRS),
            ignore: IgnoreSet::default(),
            layout: BlockLayout::Auto,
        }
    }
}

pub fn parse_pairs_file(path: &Path, options: &ParseOptions) -> Result<ParsedPairs> {
    let file = File::open(path)
        .with_context(|| format!("failed to open query pair file: {}", path.display()))?;
    parse_pairs(BufReader::new(file), options)
        .with_context(|| format!("failed to read query pair file: {}", path.display()))
}

pub fn parse_pairs<R: BufRead>(reader: R, options: &ParseOptions) -> Result<ParsedPairs> {
    let mut lines = LineReader::new(reader);
    let mut pairs = ParsedPairs::new();

    if lines.next_line()?.as_deref() != Some(PAIR_DELIMITER) {
        return Ok(pairs);
    }

    let mut layout = options.layout;
    let mut pending = None;
    loop {
        let (segments, closed) = lines.read_block(pending.take())?;
        // Text without an internal delimiter is not a block start.
        if segments.len() < 2 || segments.iter().all(|segment| segment.trim().is_empty()) {
            break;
        }

        // The first complete block fixes the layout for the rest of the file,
        // so a tail cut off by end of input is read the same way.
        let block_layout = layout.resolve(segments.len());
        if closed {
            layout = block_layout;
        }
        let (pair, description) = assemble_pair(segments, block_layout);

        if options.ignore.contains(&description) {
            pairs.record_ignored();
        } else {
            pairs.insert(pair, description);
        }

        if options.max_pairs.is_some_and(|cap| pairs.len() >= cap) || !closed {
            break;
        }

        // A closing delimiter is either doubled by the opening one of the next
        // block, or is itself the opening one.
        match lines.next_line()? {
            None => break,
            Some(line) if line == PAIR_DELIMITER => {}
            Some(line) => pending = Some(line),
        }
    }

    Ok(pairs)
}

fn assemble_pair(segments: Vec<String>, layout: BlockLayout) -> (QueryPair, String) {
    let extended = layout.resolve(segments.len()) == BlockLayout::Extended;

    let mut segments = segments.into_iter();
    let origin = if extended {
        segments.next().unwrap_or_default()
    } else {
        String::new()
    };
    let first = segments.next().unwrap_or_default();
    let second = segments.next().unwrap_or_default();
    let description = segments
        .collect::<Vec<_>>()
        .join(&format!("{INTERNAL_DELIMITER}\n"));

    (strip_report_headers(origin, first, second), description)
}

fn strip_report_headers(origin: String, first: String, second: String) -> QueryPair {
    let first_header = section_header(FIRST_HEADER);
    let Some(first_body) = first.strip_prefix(first_header.as_str()) else {
        return QueryPair {
            origin,
            first,
            second,
        };
    };

    let origin_header = section_header(ORIGIN_HEADER);
    let after_label = origin
        .split_once('\n')
        .map(|(_, rest)| rest.strip_prefix('\n').unwrap_or(rest))
        .unwrap_or("");
    let origin_body = after_label
        .strip_prefix(origin_header.as_str())
        .unwrap_or(after_label);
    let second_header = section_header(SECOND_HEADER);
    let second_body = second
        .strip_prefix(second_header.as_str())
        .unwrap_or(&second);

    QueryPair::new(origin_body, first_body, second_body)
}

pub(crate) fn section_header(title: &str) -> String {
    format!("{title}\n\n")
}

struct LineReader<R> {
    reader: R,
    buffer: String,
}

impl<R: BufRead> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: String::new(),
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        self.buffer.clear();
        let read = self
            .reader
            .read_line(&mut self.buffer)
            .context("failed to read line from query pair input")?;
        if read == 0 {
            return Ok(None);
        }

        let line = self.buffer.strip_suffix('\n').unwrap_or(&self.buffer);
        let line = line.strip_suffix('\r').unwrap_or(line);
        Ok(Some(line.to_string()))
    }

    /// Reads segments up to the next pair delimiter. The flag is false when
    /// the block ran into end of input instead.
    fn read_block(&mut self, first_line: Option<String>) -> Result<(Vec<String>, bool)> {
        let mut segments = Vec::new();
        let mut segment = String::new();
        let mut next = match first_line {
            Some(line) => Some(line),
            None => self.next_line()?,
        };

        let closed = loop {
            let Some(line) = next else {
                break false;
            };
            if line == PAIR_DELIMITER {
                break true;
            }
            if line == INTERNAL_DELIMITER {
                segments.push(std::mem::take(&mut segment));
            } else {
                segment.push_str(&line);
                segment.push('\n');
            }
            next = self.next_line()?;
        };

        segments.push(segment);
        Ok((segments, closed))
    }
}
