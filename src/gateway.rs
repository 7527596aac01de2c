//! Line-oriented chat gateway.
//!
//! Each input line is one "translate this" request. Replies are written as
//! `<line number>\t<text>`, in completion order, so callers match them up by
//! line number.

use crate::error::{Result, TranspoolError};
use crate::scheduler::{Job, ReplyHandle, SchedulerHandle, Submitter};
use std::io::{BufRead, Read, Write};
use std::sync::{Arc, Mutex};

/// Longest message accepted for translation, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

pub const EMPTY_MESSAGE: &str = "Cannot translate empty message";
pub const MESSAGE_TOO_LONG: &str = "Message too long to translate (max 2000 characters)";
pub const INVALID_ENCODING: &str = "Cannot translate message: text is not valid UTF-8";

/// Most bytes buffered for one line: the longest UTF-8 message plus CRLF.
const LINE_BYTE_LIMIT: u64 = MAX_MESSAGE_CHARS as u64 * 4 + 2;

/// Check a message before it reaches the scheduler.
///
/// Returns the notice to send back when it is rejected.
pub fn validate_message(text: &str) -> std::result::Result<(), &'static str> {
    if text.trim().is_empty() {
        Err(EMPTY_MESSAGE)
    } else if text.chars().count() > MAX_MESSAGE_CHARS {
        Err(MESSAGE_TOO_LONG)
    } else {
        Ok(())
    }
}

/// Anything that accepts jobs.
pub trait JobSink {
    fn submit(&self, job: Job) -> Result<()>;
}

impl JobSink for SchedulerHandle {
    fn submit(&self, job: Job) -> Result<()> {
        SchedulerHandle::submit(self, job)
    }
}

impl JobSink for Submitter {
    fn submit(&self, job: Job) -> Result<()> {
        Submitter::submit(self, job)
    }
}

/// Writes one tagged line per reply to a shared writer.
pub struct LineReply<W> {
    line_no: u64,
    out: Arc<Mutex<W>>,
}

impl<W> LineReply<W> {
    pub fn new(line_no: u64, out: Arc<Mutex<W>>) -> Self {
        Self { line_no, out }
    }
}

impl<W: Write + Send> ReplyHandle for LineReply<W> {
    fn reply(&self, text: &str) -> Result<()> {
        // Keep one reply per output line
        let text = text.replace('\n', "\\n");
        let mut out = self
            .out
            .lock()
            .map_err(|_| TranspoolError::Reply("output lock poisoned".into()))?;
        writeln!(out, "{}\t{}", self.line_no, text)
            .and_then(|()| out.flush())
            .map_err(|e| TranspoolError::Reply(format!("line {}: {}", self.line_no, e)))
    }
}

/// Totals for one gateway run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub submitted: u64,
    pub rejected: u64,
}

/// Reads requests from `input` until EOF and submits them.
pub struct LineGateway<R, W> {
    input: R,
    out: Arc<Mutex<W>>,
}

impl<R: BufRead, W: Write + Send + 'static> LineGateway<R, W> {
    pub fn new(input: R, out: W) -> Self {
        Self {
            input,
            out: Arc::new(Mutex::new(out)),
        }
    }

    /// Shared handle to the output, e.g. to inspect it after a run.
    pub fn output(&self) -> Arc<Mutex<W>> {
        Arc::clone(&self.out)
    }

    /// Submit every line. Stops early only if the scheduler is gone or
    /// reading fails.
    ///
    /// Lines that are not valid UTF-8 or exceed the length limit are
    /// answered with a notice and skipped.
    pub fn run(&mut self, sink: &dyn JobSink) -> Result<GatewayStats> {
        let mut stats = GatewayStats::default();
        let mut buf = Vec::new();
        let mut line_no = 0u64;

        loop {
            buf.clear();
            let read = (&mut self.input)
                .take(LINE_BYTE_LIMIT)
                .read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            line_no += 1;
            let reply = LineReply::new(line_no, Arc::clone(&self.out));

            let checked = if buf.last() != Some(&b'\n') && read as u64 == LINE_BYTE_LIMIT {
                discard_rest_of_line(&mut self.input)?;
                Err(MESSAGE_TOO_LONG)
            } else {
                std::str::from_utf8(&buf)
                    .map_err(|_| INVALID_ENCODING)
                    .map(|line| line.trim_end_matches(['\n', '\r']))
                    .and_then(|text| validate_message(text).map(|()| text))
            };

            let text = match checked {
                Ok(text) => text,
                Err(notice) => {
                    stats.rejected += 1;
                    tracing::debug!(line_no, notice, "Rejected message");
                    if let Err(e) = reply.reply(notice) {
                        tracing::warn!(line_no, error = %e, "Failed to deliver reply");
                    }
                    continue;
                }
            };

            sink.submit(Job::new(text, reply))?;
            stats.submitted += 1;
        }

        tracing::debug!(submitted = stats.submitted, rejected = stats.rejected, "Input closed");
        Ok(stats)
    }
}

/// Skip input up to and including the next newline without buffering it.
fn discard_rest_of_line<R: BufRead>(input: &mut R) -> std::io::Result<()> {
    loop {
        let (found, used) = {
            let available = input.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            }
        };
        input.consume(used);
        if found {
            return Ok(());
        }
    }
}
