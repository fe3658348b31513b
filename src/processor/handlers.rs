//! Built-in handlers for fetched pages
//!
//! These are the business-logic plug-ins the CLI can select. Each one is a
//! plain [`Handler`] and knows nothing about the pool it runs in.

use super::Handler;
use crate::crawler::{FetchResult, ParsedPage};
use anyhow::Context;
use std::fmt::{self, Debug};
use std::io::{self, BufWriter, Write};

/// Logs each page's URL and anchor count
///
/// The per-worker context counts the pages reported, logged at teardown.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkCountReporter;

impl Handler<FetchResult<ParsedPage>> for LinkCountReporter {
    type Context = usize;

    fn setup(&self) -> usize {
        0
    }

    fn handle(&self, item: FetchResult<ParsedPage>, reported: &mut usize) -> anyhow::Result<()> {
        tracing::info!(
            url = %item.url,
            link_count = item.document.link_count(),
            "Page links"
        );
        *reported += 1;
        Ok(())
    }

    fn teardown(&self, reported: usize) {
        tracing::debug!("Link count reporter finished after {} pages", reported);
    }
}

type WriterFactory = Box<dyn Fn() -> Box<dyn Write> + Send + Sync>;

/// Writes each page's URL followed by its paragraph text
///
/// Every worker opens its own buffered writer in `setup` and flushes it in
/// `teardown`. A page's entry is written with a single `write_all`, so
/// entries from different workers never interleave mid-page.
pub struct TextPreview {
    open: WriterFactory,
}

impl TextPreview {
    /// Previews to standard output
    pub fn new() -> Self {
        Self::with_writer(|| Box::new(BufWriter::new(io::stdout())))
    }

    /// Previews to writers produced by `open`, one per worker
    pub fn with_writer<F>(open: F) -> Self
    where
        F: Fn() -> Box<dyn Write> + Send + Sync + 'static,
    {
        Self {
            open: Box::new(open),
        }
    }

    /// Renders one page's entry
    pub fn render(page: &ParsedPage) -> String {
        let mut entry = format!("-------\n\n{}\n", page.url());
        for text in page.paragraphs().iter().filter(|text| !text.trim().is_empty()) {
            entry.push_str(text);
            entry.push('\n');
        }
        entry
    }
}

impl Default for TextPreview {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for TextPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextPreview").finish_non_exhaustive()
    }
}

impl Handler<FetchResult<ParsedPage>> for TextPreview {
    type Context = Box<dyn Write>;

    fn setup(&self) -> Box<dyn Write> {
        (self.open)()
    }

    fn handle(
        &self,
        item: FetchResult<ParsedPage>,
        out: &mut Box<dyn Write>,
    ) -> anyhow::Result<()> {
        out.write_all(Self::render(&item.document).as_bytes())
            .with_context(|| format!("Failed to write preview of {}", item.url))
    }

    fn teardown(&self, mut out: Box<dyn Write>) {
        if let Err(e) = out.flush() {
            tracing::warn!("Failed to flush text preview: {}", e);
        }
    }
}

/// Debug-logs every item it receives
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

impl<T: Debug> Handler<T> for LogHandler {
    type Context = ();

    fn setup(&self) {}

    fn handle(&self, item: T, _context: &mut ()) -> anyhow::Result<()> {
        tracing::debug!("Processed {:?}", item);
        Ok(())
    }
}
