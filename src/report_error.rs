use ansi_term::Color;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::data::span::Span;
use crate::file_cache::FileCache;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Error)]
pub enum ErrorKind {
    #[error("a primitive type cannot be used as a polymorphic type argument")]
    PolyIsNotPrim,
    #[error("an observed type cannot be used as a value type")]
    ObsNotValue,
    #[error("an observed type is only allowed at the top of a function argument type")]
    ObsNotAllowed,
    #[error("this application cannot terminate")]
    InfiniteLoop,
    #[error("this access expects an array of primitive elements")]
    ExpectedPrimArray,
    #[error("cannot prove this index is within the array's bounds")]
    BoundLow,
    #[error("this index is negative")]
    BoundNeg,
    #[error("cannot prove this index is below the array's length")]
    BoundUp,
}

impl ErrorKind {
    fn title(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            PolyIsNotPrim => "Primitive Type Argument",
            ObsNotValue => "Observed Value",
            ObsNotAllowed => "Misplaced Observed Type",
            InfiniteLoop => "Non-Terminating Call",
            ExpectedPrimArray => "Compound Array Access",
            BoundLow => "Unproven Array Bound",
            BoundNeg => "Negative Array Index",
            BoundUp => "Array Index Out Of Bounds",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Error {
    pub kind: ErrorKind,
    pub span: Span,
    /// A second position supporting the report; for `BoundUp` this is the
    /// creation site of the array the index may escape.
    pub witness: Option<Span>,
}

/// The error sink shared by both passes.  Checks are best-effort: a failed
/// check reports here and analysis continues, so one run surfaces as many
/// defects as it can.  Reports are kept in discovery order, which is
/// deterministic for a given input AST.
#[derive(Clone, Debug)]
pub struct Reporter {
    errors: Vec<Error>,
}

impl Reporter {
    pub fn new() -> Self {
        Reporter { errors: Vec::new() }
    }

    pub fn report(&mut self, kind: ErrorKind, span: Span) {
        self.errors.push(Error {
            kind,
            span,
            witness: None,
        });
    }

    pub fn report_witnessed(&mut self, kind: ErrorKind, span: Span, witness: Span) {
        self.errors.push(Error {
            kind,
            span,
            witness: Some(witness),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }
}

const TITLE_LEADING_DASHES: usize = 10;
const TITLE_TOTAL_COLS: usize = 60;

fn write_snippet(
    dest: &mut impl io::Write,
    files: &FileCache,
    path: &Path,
    span: Span,
) -> io::Result<()> {
    let src = files.read_cached(path)?;
    let (line, col) = src.line_col(span.lo);

    let line_num_style = Color::Blue.bold();
    let indicator_style = Color::Red.bold();

    let content = src.line(line);
    // Clamp the indicator to the first line of a multi-line span.
    let num_cols = (span.hi - span.lo).min(content.len().saturating_sub(col)).max(1);

    writeln!(
        dest,
        "{}",
        Color::Yellow.paint(format!("{}:{}:{}", path.display(), line + 1, col + 1))
    )?;
    writeln!(dest)?;
    writeln!(
        dest,
        "{runner} {content}",
        runner = line_num_style.paint(format!(" {} |", line + 1)),
        content = content
    )?;
    writeln!(
        dest,
        "{runner} {empty:col$}{indicator}",
        runner = line_num_style.paint(format!(" {:width$} |", "", width = (line + 1).to_string().len())),
        empty = "",
        col = col,
        indicator = indicator_style.paint("^".repeat(num_cols)),
    )?;

    Ok(())
}

pub fn write_report(
    dest: &mut impl io::Write,
    files: &FileCache,
    path: &Path,
    error: &Error,
) -> io::Result<()> {
    let title = error.kind.title();
    writeln!(
        dest,
        "\n{}",
        Color::Blue.bold().paint(format!(
            "{leading} {title} {trailing}",
            leading = "-".repeat(TITLE_LEADING_DASHES),
            title = title,
            trailing = "-".repeat(
                TITLE_TOTAL_COLS.saturating_sub(2 + title.len() + TITLE_LEADING_DASHES)
            ),
        ))
    )?;

    write_snippet(dest, files, path, error.span)?;

    writeln!(dest)?;
    writeln!(dest, "{}", error.kind)?;

    if let Some(witness) = error.witness {
        let src = files.read_cached(path)?;
        let (line, _) = src.line_col(witness.lo);
        writeln!(dest, "note: the array is created on line {}", line + 1)?;
    }

    writeln!(dest)?;

    Ok(())
}
