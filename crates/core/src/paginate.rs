//! Line-aware pagination over stored text.
//!
//! Pages are built by walking the blob line by line (a line keeps its
//! trailing `\n`) and packing lines into a page until the next line would
//! push it past `page_size` characters. A line longer than `page_size` gets
//! a page of its own; nothing is ever cut mid-line, so concatenating every
//! page reproduces the blob byte for byte.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::str::FromStr;

use crate::error::ContentError;

/// Addressing unit for `extract`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// 0-based character offset
    Char,
    /// 1-based line number
    Line,
    /// 1-based page number
    Page,
}

impl FromStr for Unit {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "char" | "chars" => Ok(Self::Char),
            "line" | "lines" => Ok(Self::Line),
            "page" | "pages" => Ok(Self::Page),
            other => Err(ContentError::InvalidArgument(format!(
                "unknown unit '{other}' (expected char, line or page)"
            ))),
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Char => write!(f, "char"),
            Self::Line => write!(f, "line"),
            Self::Page => write!(f, "page"),
        }
    }
}

/// A view into one page of a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<'a> {
    /// 1-based page number
    pub index: usize,
    pub total_pages: usize,
    /// First line on this page (1-based, inclusive)
    pub start_line: usize,
    /// Last line on this page (1-based, inclusive)
    pub end_line: usize,
    /// Line count of the whole blob
    pub total_lines: usize,
    /// Character offsets of this page within the blob (end exclusive)
    pub start_char: usize,
    pub end_char: usize,
    pub text: &'a str,
    bytes: Range<usize>,
}

impl Page<'_> {
    /// Whether more pages follow this one.
    pub fn has_more(&self) -> bool {
        self.index < self.total_pages
    }
}

/// One line of the source blob.
struct LineSpan {
    bytes: Range<usize>,
    chars: usize,
}

fn line_spans(blob: &str) -> Vec<LineSpan> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for line in blob.split_inclusive('\n') {
        spans.push(LineSpan {
            bytes: offset..offset + line.len(),
            chars: line.chars().count(),
        });
        offset += line.len();
    }
    if spans.is_empty() {
        // The empty blob is one empty line
        spans.push(LineSpan { bytes: 0..0, chars: 0 });
    }
    spans
}

/// Splits blobs into pages of at most `page_size` characters.
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    page_size: usize,
}

impl Paginator {
    /// `page_size` must be at least 1.
    pub fn new(page_size: usize) -> Result<Self, ContentError> {
        if page_size == 0 {
            return Err(ContentError::InvalidArgument(
                "page_size must be greater than zero".into(),
            ));
        }
        Ok(Self { page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Split `blob` into pages. Always yields at least one page.
    pub fn paginate<'a>(&self, blob: &'a str) -> Vec<Page<'a>> {
        let lines = line_spans(blob);
        let total_lines = lines.len();

        // (first line idx, last line idx, char start, char end) per page
        let mut bounds: Vec<(usize, usize, usize, usize)> = Vec::new();
        let mut first = 0;
        let mut page_chars = 0;
        let mut char_start = 0;
        let mut char_pos = 0;

        for (i, line) in lines.iter().enumerate() {
            if i > first && page_chars + line.chars > self.page_size {
                bounds.push((first, i - 1, char_start, char_pos));
                first = i;
                page_chars = 0;
                char_start = char_pos;
            }
            page_chars += line.chars;
            char_pos += line.chars;
        }
        bounds.push((first, total_lines - 1, char_start, char_pos));

        let total_pages = bounds.len();
        bounds
            .into_iter()
            .enumerate()
            .map(|(n, (first, last, start_char, end_char))| {
                let bytes = lines[first].bytes.start..lines[last].bytes.end;
                Page {
                    index: n + 1,
                    total_pages,
                    start_line: first + 1,
                    end_line: last + 1,
                    total_lines,
                    start_char,
                    end_char,
                    text: &blob[bytes.clone()],
                    bytes,
                }
            })
            .collect()
    }

    /// Fetch a single 1-based page.
    pub fn page<'a>(&self, blob: &'a str, number: usize) -> Result<Page<'a>, ContentError> {
        if number == 0 {
            return Err(ContentError::InvalidArgument("page numbers start at 1".into()));
        }
        let mut pages = self.paginate(blob);
        let available = pages.len();
        if number > available {
            return Err(ContentError::OutOfRange {
                unit: Unit::Page.to_string(),
                start: number,
                available,
            });
        }
        Ok(pages.swap_remove(number - 1))
    }

    /// Extract `count` units starting at `start`.
    ///
    /// Char offsets are 0-based; line and page numbers are 1-based. A range
    /// running past the end is clipped; a `start` past the end is an error.
    pub fn extract<'a>(
        &self,
        blob: &'a str,
        start: usize,
        count: usize,
        unit: Unit,
    ) -> Result<&'a str, ContentError> {
        if count == 0 {
            return Err(ContentError::InvalidArgument("count must be greater than zero".into()));
        }
        match unit {
            Unit::Char => extract_chars(blob, start, count),
            Unit::Line => {
                let lines = line_spans(blob);
                let (first, last) = clip(start, count, lines.len(), Unit::Line)?;
                Ok(&blob[lines[first].bytes.start..lines[last].bytes.end])
            }
            Unit::Page => {
                let pages = self.paginate(blob);
                let (first, last) = clip(start, count, pages.len(), Unit::Page)?;
                Ok(&blob[pages[first].bytes.start..pages[last].bytes.end])
            }
        }
    }
}

/// Turn a 1-based `start`/`count` into clipped 0-based inclusive indices.
fn clip(start: usize, count: usize, available: usize, unit: Unit) -> Result<(usize, usize), ContentError> {
    if start == 0 {
        return Err(ContentError::InvalidArgument(format!("{unit} numbers start at 1")));
    }
    if start > available {
        return Err(ContentError::OutOfRange {
            unit: unit.to_string(),
            start,
            available,
        });
    }
    let last = start.saturating_add(count - 1).min(available);
    Ok((start - 1, last - 1))
}

fn extract_chars(blob: &str, start: usize, count: usize) -> Result<&str, ContentError> {
    let total = blob.chars().count();
    if start == 0 && total == 0 {
        return Ok("");
    }
    if start >= total {
        return Err(ContentError::OutOfRange {
            unit: Unit::Char.to_string(),
            start,
            available: total,
        });
    }
    let byte_at = |n: usize| blob.char_indices().nth(n).map_or(blob.len(), |(b, _)| b);
    let end = start.saturating_add(count).min(total);
    Ok(&blob[byte_at(start)..byte_at(end)])
}

/// Convenience wrapper: paginate with a one-off page size.
pub fn paginate(blob: &str, page_size: usize) -> Result<Vec<Page<'_>>, ContentError> {
    Ok(Paginator::new(page_size)?.paginate(blob))
}

/// Convenience wrapper: extract with a one-off page size.
pub fn extract(blob: &str, start: usize, count: usize, unit: Unit, page_size: usize) -> Result<&str, ContentError> {
    Paginator::new(page_size)?.extract(blob, start, count, unit)
}
