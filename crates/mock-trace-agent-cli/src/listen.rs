// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The `listen` command: prints one line per received request, optionally counting trace chunks
//! and spans and saving payloads to disk.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use chrono::{DateTime, Local, Timelike};
use clap::{Args, ValueEnum};
use mock_trace_agent::{
    decode_trace_chunks, to_debug_json, ListenerConfig, ReceivedRequest, RequestHandler,
    TraceListener, DEFAULT_TRACE_AGENT_PORT, TRACE_ENDPOINT_PATH,
};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SaveMode {
    #[default]
    None,
    RawBytes,
    ConvertToJson,
    All,
}

impl SaveMode {
    pub fn saves_raw(self) -> bool {
        matches!(self, SaveMode::RawBytes | SaveMode::All)
    }

    pub fn saves_json(self) -> bool {
        matches!(self, SaveMode::ConvertToJson | SaveMode::All)
    }

    fn describe(self) -> &'static str {
        match self {
            SaveMode::None => "Not saving payloads to file.",
            SaveMode::RawBytes => "Saving raw payloads to file.",
            SaveMode::ConvertToJson => "Saving json payloads to file after conversion.",
            SaveMode::All => "Saving both raw and json payloads to file after conversion.",
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct ListenArgs {
    /// Port to listen on
    #[arg(short = 'p', long, env = "DD_APM_RECEIVER_PORT", default_value_t = DEFAULT_TRACE_AGENT_PORT)]
    pub port: u16,

    /// Decode trace payloads to show trace chunk and span counts
    #[arg(short = 'c', long)]
    pub show_counts: bool,

    /// Save payloads to files
    #[arg(short = 's', long, value_enum, default_value_t = SaveMode::None)]
    pub save: SaveMode,

    /// Only count or save payloads whose URL contains this text, ignoring case
    #[arg(short = 'f', long, default_value = "/traces")]
    pub url_filter: String,

    /// Directory saved payloads are written to
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,
}

impl ListenArgs {
    /// Request bodies are only read when something is done with them.
    pub fn reads_request_body(&self) -> bool {
        self.show_counts || self.save != SaveMode::None
    }

    pub fn startup_messages(&self) -> [&'static str; 2] {
        let counts = if self.show_counts {
            "Deserializing payload to show trace chunk and span counts."
        } else {
            "Not deserializing payload to show trace chunk and span counts."
        };
        [counts, self.save.describe()]
    }
}

/// Prints a line for every request to `out` and saves matching payloads under the output
/// directory.
pub struct RequestPrinter<W> {
    show_counts: bool,
    save: SaveMode,
    url_filter: String,
    output_dir: PathBuf,
    out: Mutex<W>,
}

impl<W: Write + Send> RequestPrinter<W> {
    pub fn new(args: &ListenArgs, out: W) -> Self {
        RequestPrinter {
            show_counts: args.show_counts,
            save: args.save,
            url_filter: args.url_filter.to_lowercase(),
            output_dir: args.output_dir.clone(),
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn matches_filter(&self, url: &str) -> bool {
        url.to_lowercase().contains(&self.url_filter)
    }

    /// Appends the description of `request` to `line`, saving files along the way. On error
    /// `line` keeps whatever was written before the failure.
    fn describe(
        &self,
        request: &ReceivedRequest<'_>,
        now: DateTime<Local>,
        line: &mut String,
    ) -> anyhow::Result<()> {
        line.push_str(&format!(
            "{} Received {} bytes at {}. ",
            format_timestamp(now),
            format_thousands(request.content_length),
            request.url
        ));

        if request.body.is_empty() || !self.matches_filter(request.url) {
            return Ok(());
        }

        if self.show_counts && request.url == TRACE_ENDPOINT_PATH {
            let chunks = decode_trace_chunks(request.body)
                .context("Failed to decode trace chunks")?;
            let spans: usize = chunks.iter().map(Vec::len).sum();
            line.push_str(&format!(
                "{} trace chunks, {} total spans. ",
                format_thousands(chunks.len() as u64),
                format_thousands(spans as u64)
            ));
        }

        if self.save.saves_raw() {
            let file_name = payload_file_name(request.url, now, "bin");
            let path = self.output_dir.join(&file_name);
            fs::write(&path, request.body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            line.push_str(&format!("Saved raw bytes to \"{file_name}\". "));
        }

        if self.save.saves_json() {
            let json = to_debug_json(request.body).context("Failed to convert payload to json")?;
            let file_name = payload_file_name(request.url, now, "json");
            let path = self.output_dir.join(&file_name);
            fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            line.push_str(&format!("Saved json to \"{file_name}\". "));
        }

        Ok(())
    }

    fn print(&self, request: &ReceivedRequest<'_>, now: DateTime<Local>) -> anyhow::Result<()> {
        let mut line = String::new();
        let result = self.describe(request, now, &mut line);
        if let Err(e) = &result {
            line.push_str(&format!("{e:#}"));
        }

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{}", line.trim_end())?;
        out.flush()?;
        result
    }
}

impl<W: Write + Send> RequestHandler for RequestPrinter<W> {
    fn on_request(&self, request: &ReceivedRequest<'_>) -> anyhow::Result<()> {
        self.print(request, Local::now())
    }
}

/// Runs the listener until Ctrl+C.
pub async fn run(args: ListenArgs) -> anyhow::Result<()> {
    if args.save != SaveMode::None {
        fs::create_dir_all(&args.output_dir).with_context(|| {
            format!("Failed to create output directory {}", args.output_dir.display())
        })?;
    }

    let config = ListenerConfig {
        port: args.port,
        read_request_body: args.reads_request_body(),
    };
    let printer: Arc<dyn RequestHandler> = Arc::new(RequestPrinter::new(&args, io::stdout()));
    let listener = TraceListener::bind(config, Some(printer)).await?;

    for message in args.startup_messages() {
        println!("{message}");
    }
    println!(
        "Listening for traces on port {}. Press Ctrl+C to exit.",
        listener.port()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Unable to listen for shutdown signal")?;
    debug!("Received Ctrl+C, stopping listener");
    listener.shutdown().await;
    Ok(())
}

fn centiseconds(time: DateTime<Local>) -> u32 {
    // nanosecond() exceeds one second during a leap second
    (time.nanosecond() % 1_000_000_000) / 10_000_000
}

fn format_timestamp(time: DateTime<Local>) -> String {
    format!(
        "{}.{:02}",
        time.format("%Y-%m-%d %H:%M:%S"),
        centiseconds(time)
    )
}

/// `payload-<url>-<timestamp>.<extension>`, with the URL's leading slashes dropped and any
/// character unsafe in a file name replaced by `_`.
fn payload_file_name(url: &str, time: DateTime<Local>, extension: &str) -> String {
    let url_part: String = url
        .trim_start_matches('/')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "payload-{url_part}-{}-{:02}.{extension}",
        time.format("%Y-%m-%d_%H-%M-%S"),
        centiseconds(time)
    )
}

fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(digit);
    }
    formatted
}
