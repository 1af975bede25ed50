// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A tolerant parser for the human-readable live task dump (`debug = 2`).
//!
//! The dump is a sequence of blocks separated by blank lines:
//!
//! ```text
//! task 7 [chan receive, 5 minutes, locked to thread]:
//! main.worker(0xc000010000)
//!     /a/b.go:10 +0x25
//! ...additional frames elided...
//! created by main.main in goroutine 1
//!     /a/main.go:5 +0x3f
//! ```
//!
//! (file lines are tab-indented in real dumps). Headers may start with
//! either `task` or `goroutine`. A block that cannot be parsed is skipped
//! and its error recorded, so one corrupted entry never loses the rest of
//! the dump.

use std::{
    io::{self, BufRead},
    time::Duration,
};

use thiserror::Error;

const ELIDED: &str = "...additional frames elided...";
const CREATED_BY: &str = "created by ";

/// One task found in the dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: u64,
    pub state: String,
    /// How long the task has been waiting. Zero if the dump does not say.
    pub wait: Duration,
    pub locked_to_thread: bool,
    /// Innermost (currently executing) frame first.
    pub stack: Vec<Frame>,
    /// The dump truncated this task's stack.
    pub frames_elided: bool,
    pub created_by: Option<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub func: String,
    pub file: String,
    pub line: u32,
}

/// A block of the dump that was skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{line}: {message}")]
pub struct ParseError {
    /// 1-based line number the problem was found on.
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StackParseError {
    #[error("dump unreadable: no task header found")]
    DumpUnreadable,
    #[error("error reading dump: {0}")]
    Io(#[from] io::Error),
}

/// Parses a task dump. Tasks are produced lazily, in document order; see
/// [`Tasks::finish`] for the skipped entries.
pub fn parse<R: BufRead>(r: R) -> Tasks<R> {
    Tasks {
        reader: r,
        buf: vec![],
        line_no: 0,
        headers: 0,
        errors: vec![],
        io_error: None,
    }
}

/// Iterator over the tasks of a dump.
pub struct Tasks<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
    headers: usize,
    errors: Vec<ParseError>,
    io_error: Option<io::Error>,
}

impl<R: BufRead> Tasks<R> {
    /// Errors recorded so far.
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Consumes whatever is left of the dump and returns the per-entry
    /// errors, or fails if the dump could not be read or contained no task
    /// header at all.
    pub fn finish(mut self) -> Result<Vec<ParseError>, StackParseError> {
        for _ in &mut self {}
        if let Some(err) = self.io_error {
            return Err(err.into());
        }
        if self.headers == 0 {
            return Err(StackParseError::DumpUnreadable);
        }
        Ok(self.errors)
    }

    /// Reads the next line. A line that is not valid UTF-8 comes back as
    /// `Some(None)` so that only its own block is rejected.
    fn next_line(&mut self) -> Option<Option<String>> {
        if self.io_error.is_some() {
            return None;
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                self.line_no += 1;
                let raw = self.buf.strip_suffix(b"\n").unwrap_or(&self.buf);
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                Some(std::str::from_utf8(raw).ok().map(str::to_owned))
            }
            Err(err) => {
                self.io_error = Some(err);
                None
            }
        }
    }

    /// Reads the next non-empty block, with the line number of its first line.
    fn next_block(&mut self) -> Option<(usize, Vec<Option<String>>)> {
        let first = loop {
            let line = self.next_line()?;
            if !is_blank(&line) {
                break line;
            }
        };
        let start = self.line_no;
        let mut block = vec![first];
        while let Some(line) = self.next_line() {
            if is_blank(&line) {
                break;
            }
            block.push(line);
        }
        Some((start, block))
    }

    fn parse_block(
        &mut self,
        start: usize,
        block: &[Option<String>],
    ) -> Result<Task, ParseError> {
        let err = |offset: usize, message: String| ParseError {
            line: start + offset,
            message,
        };
        let text = |offset: usize| {
            block[offset]
                .as_deref()
                .ok_or_else(|| err(offset, "line is not valid UTF-8".into()))
        };

        let header = parse_header(text(0)?).map_err(|m| err(0, m))?;
        self.headers += 1;

        let mut task = Task {
            id: header.id,
            state: header.state,
            wait: header.wait,
            locked_to_thread: header.locked_to_thread,
            stack: vec![],
            frames_elided: false,
            created_by: None,
        };

        let mut i = 1;
        while i < block.len() {
            let line = text(i)?;
            if line == ELIDED {
                task.frames_elided = true;
                i += 1;
                continue;
            }

            let (func, created_by) = match line.strip_prefix(CREATED_BY) {
                Some(creator) => {
                    let func = match creator.rsplit_once(" in goroutine ") {
                        Some((func, _)) => func,
                        None => creator,
                    };
                    (func.to_owned(), true)
                }
                None => (parse_func(line).map_err(|m| err(i, m))?, false),
            };
            if i + 1 >= block.len() {
                return Err(err(i, format!("missing file line after {line:?}")));
            }
            let (file, line_no) = parse_file(text(i + 1)?).map_err(|m| err(i + 1, m))?;
            let frame = Frame {
                func,
                file,
                line: line_no,
            };
            if created_by {
                task.created_by = Some(frame);
            } else {
                task.stack.push(frame);
            }
            i += 2;
        }

        Ok(task)
    }
}

impl<R: BufRead> Iterator for Tasks<R> {
    type Item = Task;

    fn next(&mut self) -> Option<Task> {
        loop {
            let (start, block) = self.next_block()?;
            match self.parse_block(start, &block) {
                Ok(task) => return Some(task),
                Err(err) => {
                    tracing::debug!(%err, "skipping malformed task");
                    self.errors.push(err);
                }
            }
        }
    }
}

fn is_blank(line: &Option<String>) -> bool {
    matches!(line, Some(l) if l.trim().is_empty())
}

struct Header {
    id: u64,
    state: String,
    wait: Duration,
    locked_to_thread: bool,
}

fn parse_header(line: &str) -> Result<Header, String> {
    let invalid = || format!("invalid task header: {line:?}");

    let rest = line
        .strip_prefix("task ")
        .or_else(|| line.strip_prefix("goroutine "))
        .ok_or_else(invalid)?;
    let (id, rest) = rest.split_once(' ').ok_or_else(invalid)?;
    let id: u64 = id.parse().map_err(|_| invalid())?;
    let attrs = rest
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix("]:"))
        .ok_or_else(invalid)?;

    let mut attrs = attrs.split(", ");
    let state = match attrs.next() {
        Some(state) if !state.is_empty() => state.to_owned(),
        _ => return Err(invalid()),
    };
    let mut header = Header {
        id,
        state,
        wait: Duration::ZERO,
        locked_to_thread: false,
    };
    for attr in attrs {
        if attr == "locked to thread" {
            header.locked_to_thread = true;
        } else if let Some(minutes) = attr
            .strip_suffix(" minutes")
            .or_else(|| attr.strip_suffix(" minute"))
        {
            let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
            let secs = minutes.checked_mul(60).ok_or_else(invalid)?;
            header.wait = Duration::from_secs(secs);
        }
    }
    Ok(header)
}

fn parse_func(line: &str) -> Result<String, String> {
    let invalid = || format!("invalid function call: {line:?}");
    if line.starts_with(char::is_whitespace) || !line.ends_with(')') {
        return Err(invalid());
    }
    match line.rfind('(') {
        Some(idx) if idx > 0 => Ok(line[..idx].to_owned()),
        _ => Err(invalid()),
    }
}

fn parse_file(line: &str) -> Result<(String, u32), String> {
    let invalid = || format!("invalid file:line: {line:?}");
    if !line.starts_with(char::is_whitespace) {
        return Err(invalid());
    }
    let mut location = line.trim();
    // drop the pc offset
    if let Some((loc, pc)) = location.rsplit_once(' ') {
        if pc.starts_with("+0x") {
            location = loc;
        }
    }
    let (file, line_no) = location.rsplit_once(':').ok_or_else(invalid)?;
    if file.is_empty() {
        return Err(invalid());
    }
    let line_no = line_no.parse().map_err(|_| invalid())?;
    Ok((file.to_owned(), line_no))
}
