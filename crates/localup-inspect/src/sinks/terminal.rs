//! Live terminal table of recent exchanges
//!
//! The sink owns the section of terminal output below the banner and redraws
//! it in place on every event: the cursor moves back over the previously
//! drawn rows, clears them and writes the current window.

use super::{ExchangeSink, SinkError};
use crate::exchange::Exchange;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use crossterm::{
    cursor, queue,
    style::{style, Color, Stylize},
    terminal::{self, Clear, ClearType},
};
use std::collections::VecDeque;
use std::io::{self, Stdout, Write};
use std::sync::Mutex;

const MIN_WIDTH: u16 = 30;
const MIN_HEIGHT: u16 = 50;

/// Characters reserved for the status column and separators
const ROW_CHROME: i64 = 20;

const GREY: Color = Color::Rgb {
    r: 0x6C,
    g: 0x72,
    b: 0x80,
};

/// Where the terminal dimensions come from
#[derive(Debug, Clone, Copy)]
pub enum TerminalSize {
    /// Query the attached terminal on every redraw
    Live,
    Fixed { width: u16, height: u16 },
}

impl TerminalSize {
    fn current(&self) -> (u16, u16) {
        let (width, height) = match self {
            TerminalSize::Live => terminal::size().unwrap_or((80, 24)),
            TerminalSize::Fixed { width, height } => (*width, *height),
        };
        (width.max(MIN_WIDTH), height.max(MIN_HEIGHT))
    }
}

#[derive(Debug, Clone)]
struct Row {
    id: String,
    method: String,
    uri: String,
    status: Option<u16>,
    label: Option<String>,
    start_time: DateTime<Utc>,
    duration: Option<i64>,
}

impl Row {
    fn from_exchange(exchange: &Exchange) -> Self {
        Self {
            id: exchange.id().to_string(),
            method: exchange.request().method.clone(),
            uri: exchange.request().uri.clone(),
            status: exchange.response().and_then(|r| r.status_code()),
            label: exchange.classification().map(|c| c.display_label.clone()),
            start_time: exchange.start_time(),
            duration: exchange.duration_ms(),
        }
    }

    fn duration_text(&self) -> String {
        match self.duration {
            Some(ms) => format!("{}ms", ms),
            None => "-".to_string(),
        }
    }
}

struct TableState<W> {
    out: W,
    rows: VecDeque<Row>,
    drawn_lines: u16,
}

/// Most-recent-first table of exchanges, redrawn in place
pub struct TerminalSink<W: Write + Send = Stdout> {
    state: Mutex<TableState<W>>,
    header_lines: u16,
    size: TerminalSize,
    colors: bool,
}

impl TerminalSink<Stdout> {
    /// Sink drawing to stdout, sized from the live terminal
    pub fn stdout(header_lines: u16) -> Self {
        Self::new(io::stdout(), header_lines, TerminalSize::Live)
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W, header_lines: u16, size: TerminalSize) -> Self {
        Self {
            state: Mutex::new(TableState {
                out,
                rows: VecDeque::new(),
                drawn_lines: 0,
            }),
            header_lines,
            size,
            colors: true,
        }
    }

    /// Disable ANSI colors in rows
    pub fn without_colors(mut self) -> Self {
        self.colors = false;
        self
    }

    /// Rows that fit below the header for the current terminal height
    pub fn capacity(&self) -> usize {
        let (_, height) = self.size.current();
        usize::from(height.saturating_sub(self.header_lines.saturating_add(1))).max(1)
    }

    /// Ids currently in the window, newest first
    pub fn ids(&self) -> Vec<String> {
        match self.state.lock() {
            Ok(state) => state.rows.iter().map(|r| r.id.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Rendered text of the current window, newest first
    pub fn lines(&self) -> Vec<String> {
        let (width, _) = self.size.current();
        match self.state.lock() {
            Ok(state) => render_rows(&state.rows, width, self.colors),
            Err(_) => Vec::new(),
        }
    }

    fn record(&self, exchange: &Exchange) -> Result<(), SinkError> {
        let (width, _) = self.size.current();
        let capacity = self.capacity();

        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "terminal state poisoned"))?;

        let row = Row::from_exchange(exchange);
        match state.rows.iter_mut().find(|r| r.id == row.id) {
            Some(existing) => *existing = row,
            None => state.rows.push_front(row),
        }
        state.rows.truncate(capacity);

        let lines = render_rows(&state.rows, width, self.colors);
        let drawn = state.drawn_lines;
        let out = &mut state.out;

        if drawn > 0 {
            queue!(out, cursor::MoveToPreviousLine(drawn))?;
        }
        queue!(out, Clear(ClearType::FromCursorDown))?;
        for line in &lines {
            write!(out, "{}\r\n", line)?;
        }
        out.flush()?;

        state.drawn_lines = u16::try_from(lines.len()).unwrap_or(u16::MAX);
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> ExchangeSink for TerminalSink<W> {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn on_created(&self, exchange: &Exchange) -> Result<(), SinkError> {
        self.record(exchange)
    }

    async fn on_updated(&self, exchange: &Exchange) -> Result<(), SinkError> {
        self.record(exchange)
    }
}

/// Render the window with columns aligned on its widest method and duration
fn render_rows(rows: &VecDeque<Row>, width: u16, colors: bool) -> Vec<String> {
    let max_method = rows.iter().map(|r| r.method.len()).max().unwrap_or(0);
    let max_duration = rows
        .iter()
        .map(|r| r.duration_text().len())
        .max()
        .unwrap_or(0);
    let today = Local::now().date_naive();

    rows.iter()
        .map(|row| render_row(row, width, max_method, max_duration, today, colors))
        .collect()
}

fn render_row(
    row: &Row,
    width: u16,
    max_method: usize,
    max_duration: usize,
    today: chrono::NaiveDate,
    colors: bool,
) -> String {
    let method_padding = " ".repeat(max_method + 2 - row.method.len());
    let duration = row.duration_text();
    let duration_padding = " ".repeat(max_duration - duration.len());
    let label = row.label.clone().unwrap_or_default();
    let time = format_time(row.start_time, today);

    let fixed = row.method.len() + method_padding.len() + label.len() + time.len()
        + duration_padding.len()
        + duration.len();
    let room = i64::from(width) - fixed as i64 - ROW_CHROME;
    let uri = fit_uri(&row.uri, room);

    let status = match row.status {
        Some(code) => paint(&code.to_string(), status_color(code), colors),
        None => " - ".to_string(),
    };
    let method = paint(&row.method, method_color(&row.method), colors);

    let mut line = format!("{} {}{}{}", status, method, method_padding, uri);
    if !label.is_empty() {
        line.push(' ');
        line.push_str(&label);
    }
    line.push_str(&format!(" {} {}{}", time, duration_padding, duration));
    line
}

/// URI padded with a dot fill to `room` characters, truncated with `...`
/// when longer, empty when there is no room at all
fn fit_uri(uri: &str, room: i64) -> String {
    let len = uri.chars().count() as i64;

    if room >= len {
        let fill = (room - len) as usize;
        if fill > 1 {
            format!("{} {}", uri, ".".repeat(fill - 1))
        } else {
            uri.to_string()
        }
    } else if room > 3 {
        let kept: String = uri.chars().take((room - 3) as usize).collect();
        format!("{}...", kept)
    } else {
        String::new()
    }
}

fn format_time(start: DateTime<Utc>, today: chrono::NaiveDate) -> String {
    let local = start.with_timezone(&Local);
    if local.date_naive() == today {
        local.format("%H:%M:%S").to_string()
    } else {
        local.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn paint(text: &str, color: Option<Color>, colors: bool) -> String {
    match color {
        Some(color) if colors => style(text).with(color).to_string(),
        _ => text.to_string(),
    }
}

fn status_color(code: u16) -> Option<Color> {
    match code {
        200..=299 => Some(Color::Green),
        300..=399 => Some(Color::Blue),
        400..=499 => Some(Color::Yellow),
        500..=599 => Some(Color::Red),
        _ => None,
    }
}

fn method_color(method: &str) -> Option<Color> {
    match method {
        "GET" => Some(Color::Blue),
        "HEAD" | "OPTIONS" => Some(GREY),
        "POST" | "PUT" | "PATCH" => Some(Color::Yellow),
        "DELETE" => Some(Color::Red),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassificationResult;
    use crate::exchange::Response;
    use crate::http_parser::ParsedRequest;

    fn exchange(id: &str, method: &str, uri: &str) -> Exchange {
        let raw = format!(
            "{} {} HTTP/1.1\r\nx-localup-request-id: {}\r\n\r\n",
            method, uri, id
        );
        Exchange::new(
            raw.clone().into_bytes(),
            ParsedRequest::parse(raw.as_bytes()).unwrap(),
            None,
        )
    }

    fn sink(width: u16, height: u16) -> TerminalSink<Vec<u8>> {
        TerminalSink::new(Vec::new(), 10, TerminalSize::Fixed { width, height }).without_colors()
    }

    #[test]
    fn test_capacity_from_height() {
        assert_eq!(sink(80, 60).capacity(), 49);
        // Clamped to the minimum height
        assert_eq!(sink(80, 20).capacity(), 39);
    }

    #[test]
    fn test_capacity_with_oversized_header() {
        let sink = TerminalSink::new(
            Vec::new(),
            u16::MAX,
            TerminalSize::Fixed {
                width: 80,
                height: 60,
            },
        );
        assert_eq!(sink.capacity(), 1);
    }

    #[tokio::test]
    async fn test_newest_first_and_update_in_place() {
        let sink = sink(80, 60);

        sink.on_created(&exchange("a", "GET", "/a")).await.unwrap();
        sink.on_created(&exchange("b", "GET", "/b")).await.unwrap();
        assert_eq!(sink.ids(), vec!["b", "a"]);

        let mut a = exchange("a", "GET", "/a");
        a.set_response(Response::from_raw(b"HTTP/1.1 200 OK\r\n\r\n".to_vec()));
        sink.on_updated(&a).await.unwrap();

        assert_eq!(sink.ids(), vec!["b", "a"]);
        assert!(sink.lines()[1].starts_with("200 GET"));
    }

    #[tokio::test]
    async fn test_window_trimmed_from_tail() {
        let sink = sink(80, 50);
        let capacity = sink.capacity();

        for i in 0..capacity + 3 {
            sink.on_created(&exchange(&format!("id-{}", i), "GET", "/"))
                .await
                .unwrap();
        }

        let ids = sink.ids();
        assert_eq!(ids.len(), capacity);
        assert_eq!(ids[0], format!("id-{}", capacity + 2));
        assert!(!ids.contains(&"id-0".to_string()));
    }

    #[tokio::test]
    async fn test_methods_aligned() {
        let sink = sink(80, 50);
        sink.on_created(&exchange("a", "GET", "/one")).await.unwrap();
        sink.on_created(&exchange("b", "DELETE", "/two")).await.unwrap();

        let lines = sink.lines();
        assert_eq!(lines[0].find("/two"), lines[1].find("/one"));
    }

    #[tokio::test]
    async fn test_classification_label_and_in_flight_duration() {
        let sink = sink(80, 50);
        let mut ex = exchange("a", "POST", "/hook");
        ex.set_classification(Some(ClassificationResult::new("github", "push")));
        sink.on_created(&ex).await.unwrap();

        let line = &sink.lines()[0];
        assert!(line.contains(" push "));
        assert!(line.ends_with(" -"));
    }

    #[tokio::test]
    async fn test_redraw_moves_cursor_back() {
        let sink = TerminalSink::new(
            Vec::new(),
            10,
            TerminalSize::Fixed {
                width: 80,
                height: 50,
            },
        );
        sink.on_created(&exchange("a", "GET", "/")).await.unwrap();
        sink.on_created(&exchange("b", "GET", "/")).await.unwrap();

        let state = sink.state.lock().unwrap();
        let output = String::from_utf8_lossy(&state.out);
        // Second draw moves up over the single line drawn first
        assert!(output.contains("\x1b[1F"));
        assert_eq!(state.drawn_lines, 2);
    }

    #[test]
    fn test_fit_uri() {
        assert_eq!(fit_uri("/abc", 4), "/abc");
        assert_eq!(fit_uri("/abc", 8), "/abc ...");
        assert_eq!(fit_uri("/abcdefgh", 6), "/ab...");
        assert_eq!(fit_uri("/abcdefgh", 2), "");
    }

    #[test]
    fn test_format_time() {
        let now = Utc::now();
        let today = now.with_timezone(&Local).date_naive();
        assert_eq!(format_time(now, today).len(), 8);

        let last_week = now - chrono::Duration::days(7);
        assert_eq!(format_time(last_week, today).len(), 19);
    }

    #[test]
    fn test_colors() {
        assert_eq!(status_color(201), Some(Color::Green));
        assert_eq!(status_color(302), Some(Color::Blue));
        assert_eq!(status_color(404), Some(Color::Yellow));
        assert_eq!(status_color(503), Some(Color::Red));
        assert_eq!(status_color(99), None);
        assert_eq!(method_color("OPTIONS"), Some(GREY));
        assert_eq!(method_color("PATCH"), Some(Color::Yellow));
    }
}
