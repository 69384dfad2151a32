//! Mode resolution: incremental scanning of session output.
//!
//! After every read the buffer tail is checked in a fixed precedence order:
//! the pager pattern of the active mode, then its error pattern, then the
//! candidate prompts in declaration order. A pager match is answered and
//! cut out of the output; an error match is remembered and the resolver
//! lets a following prompt settle for at most one poll interval so the
//! session stays in sync; the first candidate prompt to match ends the
//! resolution.

use std::time::Duration;

use log::{debug, trace};
use regex::Regex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::buffer::PatternBuffer;
use crate::error::{CliError, Error, Result, TransportError};
use crate::transport::{ReadOutcome, Transport};

/// A prompt the resolver should recognize.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Mode this prompt belongs to.
    pub mode: String,

    /// Prompt pattern, possibly pinned to a literal.
    pub prompt: Regex,
}

/// What to look for while resolving.
#[derive(Debug, Clone)]
pub struct Expectation<'a> {
    /// Name of the mode whose pager and error patterns apply.
    pub mode: &'a str,

    /// Pager pattern and response.
    pub pager: Option<(&'a Regex, &'a str)>,

    /// Device error pattern.
    pub error: Option<&'a Regex>,

    /// Candidate prompts, in precedence order.
    pub candidates: Vec<Candidate>,

    /// Overall deadline of this resolution.
    pub timeout: Duration,
}

/// The prompt that ended a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Landing {
    /// Index of the matching candidate.
    pub index: usize,

    /// Mode of the matching candidate.
    pub mode: String,

    /// Matched prompt text.
    pub prompt: String,

    /// First capture group of the prompt match.
    pub capture: Option<String>,
}

/// Outcome of a resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Output before the prompt, pages concatenated, pager prompts removed.
    pub output: String,

    /// The prompt that matched; `None` when a device error was reported
    /// and no prompt followed in time.
    pub landing: Option<Landing>,

    /// Number of pager responses sent.
    pub pages: usize,

    /// Device error message, when the error pattern matched.
    pub error: Option<String>,
}

/// Reads from a transport until an expected prompt shows up.
pub struct ModeResolver<'a> {
    transport: &'a mut dyn Transport,
    buffer: &'a mut PatternBuffer,
    cancel: &'a CancellationToken,
    poll_interval: Duration,
    max_pages: usize,
}

enum Scan {
    Pager(usize, usize),
    Error(String),
    Prompt(usize, usize, usize, Option<String>),
}

/// Message reported for an error pattern match: group 1, else the whole match.
pub fn error_message(pattern: &Regex, text: &str) -> Option<String> {
    pattern.captures(text).map(|c| {
        c.get(1)
            .or_else(|| c.get(0))
            .map(|m| m.as_str().trim_end().to_string())
            .unwrap_or_default()
    })
}

impl<'a> ModeResolver<'a> {
    /// Create a resolver over a transport and its output buffer.
    pub fn new(
        transport: &'a mut dyn Transport,
        buffer: &'a mut PatternBuffer,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            transport,
            buffer,
            cancel,
            poll_interval: Duration::from_millis(250),
            max_pages: 1000,
        }
    }

    /// Set the per-read polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the maximum number of pager responses.
    pub fn max_pages(mut self, max: usize) -> Self {
        self.max_pages = max;
        self
    }

    fn scan(&self, expect: &Expectation<'_>, error_seen: bool) -> Option<Scan> {
        if let Some((pattern, _)) = expect.pager {
            if let Some((start, end)) = self.buffer.search_tail(pattern) {
                return Some(Scan::Pager(start, end));
            }
        }

        if !error_seen {
            if let Some(message) = expect.error.and_then(|p| error_message(p, self.buffer.tail())) {
                return Some(Scan::Error(message));
            }
        }

        for (index, candidate) in expect.candidates.iter().enumerate() {
            if let Some((offset, caps)) = self.buffer.captures_tail(&candidate.prompt) {
                if let Some(whole) = caps.get(0) {
                    let capture = caps.get(1).map(|m| m.as_str().to_string());
                    return Some(Scan::Prompt(index, offset + whole.start(), offset + whole.end(), capture));
                }
            }
        }

        None
    }

    /// Resolve the expectation, answering pagers along the way.
    pub async fn resolve(&mut self, expect: &Expectation<'_>) -> Result<Resolved> {
        let deadline = Instant::now() + expect.timeout;
        let mut collected = String::new();
        let mut pages = 0usize;
        let mut error: Option<String> = None;
        let mut grace: Option<Instant> = None;

        loop {
            while let Some(found) = self.scan(expect, error.is_some()) {
                match found {
                    Scan::Pager(start, end) => {
                        collected.push_str(&self.buffer.take_before(start));
                        self.buffer.take_before(end - start);
                        pages += 1;
                        if pages > self.max_pages {
                            return Err(CliError::PagerLoopExceeded {
                                mode: expect.mode.to_string(),
                                max: self.max_pages,
                            }
                            .into());
                        }
                        if self.cancel.is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        if let Some((_, response)) = expect.pager {
                            trace!("Pager matched in mode '{}', page {}", expect.mode, pages);
                            self.transport.write(response.as_bytes()).await?;
                        }
                    }
                    Scan::Error(message) => {
                        debug!("Error pattern matched in mode '{}': {}", expect.mode, message);
                        error = Some(message);
                        grace = Some(Instant::now() + self.poll_interval);
                    }
                    Scan::Prompt(index, start, end, capture) => {
                        collected.push_str(&self.buffer.take_before(start));
                        let prompt = self.buffer.take_before(end - start);
                        let mode = expect.candidates[index].mode.clone();
                        trace!("Prompt of mode '{}' matched: {:?}", mode, prompt);
                        return Ok(Resolved {
                            output: collected,
                            landing: Some(Landing {
                                index,
                                mode,
                                prompt,
                                capture,
                            }),
                            pages,
                            error,
                        });
                    }
                }
            }

            let now = Instant::now();
            if let Some(limit) = grace {
                if now >= limit {
                    collected.push_str(&self.buffer.take());
                    return Ok(Resolved {
                        output: collected,
                        landing: None,
                        pages,
                        error,
                    });
                }
            }
            if now >= deadline {
                return Err(self.timed_out(expect, &collected));
            }

            let mut read_deadline = (now + self.poll_interval).min(deadline);
            if let Some(limit) = grace {
                read_deadline = read_deadline.min(limit);
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                outcome = self.transport.read_available(read_deadline) => outcome?,
            };

            match outcome {
                ReadOutcome::Data(data) => self.buffer.extend(&data),
                ReadOutcome::Timeout => {}
                ReadOutcome::Closed => return Err(TransportError::Disconnected.into()),
            }
        }
    }

    fn timed_out(&self, expect: &Expectation<'_>, collected: &str) -> Error {
        let mut trailing = String::with_capacity(collected.len() + self.buffer.len());
        trailing.push_str(collected);
        trailing.push_str(self.buffer.as_str());
        let mut start = trailing.len().saturating_sub(self.buffer.search_depth());
        while !trailing.is_char_boundary(start) {
            start += 1;
        }
        CliError::ModeResolution {
            mode: expect.mode.to_string(),
            timeout: expect.timeout,
            buffer: trailing[start..].to_string(),
        }
        .into()
    }
}
