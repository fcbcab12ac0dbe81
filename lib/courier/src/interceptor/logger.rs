use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{Completion, RequestInterceptor};
use crate::observable::{Observable, Subscription};
use crate::{EndpointInfo, Method, RequestFailure, RequestId, ResponseMeta, StatusCode, TransportRequest};

/// Number of packets kept by a [`RequestLogger`].
pub const MAX_PACKETS: usize = 25;

const INDENT: &str = "    ";

/// How much of a call a [`RequestLogger`] prints.
///
/// Each level includes everything the previous one prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Nothing is logged or recorded.
    None,
    /// Method, URL, host, status, elapsed time and error.
    #[default]
    Simple,
    /// Adds the query and the request body.
    Verbose,
    /// Adds the request headers and the response body.
    Trace,
    /// Adds the response headers.
    All,
}

/// Receives formatted request records.
pub trait LogSink: Send + Sync {
    /// Writes one record.
    fn log(&self, record: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, record: &str) {
        self(record);
    }
}

/// Writes records as `tracing` events on the `courier::network` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, record: &str) {
        tracing::info!(target: "courier::network", "{record}");
    }
}

/// One completed call, as recorded by a [`RequestLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    /// Id of the launched request.
    pub id: RequestId,
    /// HTTP method.
    pub method: Method,
    /// Full request URL.
    pub url: url::Url,
    /// Request headers, sorted by name.
    pub request_headers: Vec<(String, String)>,
    /// Request body.
    pub request_body: Option<Bytes>,
    /// Response status, if a response was received.
    pub status: Option<u16>,
    /// Response headers, sorted by name.
    pub response_headers: Vec<(String, String)>,
    /// Response body.
    pub response_body: Option<Bytes>,
    /// Failure description, for failed calls.
    pub error: Option<String>,
    /// Whether the call was cancelled.
    pub cancelled: bool,
    /// Wall clock time of the launch.
    pub started_at: SystemTime,
    /// Time between launch and completion.
    pub elapsed: Duration,
}

impl RequestPacket {
    /// Returns `true` for a 2xx response without error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.is_some_and(|status| (200..300).contains(&status))
    }
}

#[derive(Clone, Copy)]
struct Started {
    at: Instant,
    wall: SystemTime,
}

/// Logs every call and keeps the most recent ones.
///
/// Records go to a [`LogSink`], [`TracingSink`] by default. The last
/// [`MAX_PACKETS`] completed calls are kept as [`RequestPacket`]s, most recent
/// first, and can be observed.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use courier::{LogLevel, RequestLogger};
///
/// let lines = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&lines);
/// let logger = RequestLogger::new(LogLevel::Verbose)
///     .with_sink(move |record: &str| sink.lock().unwrap().push(record.to_string()));
///
/// let _subscription = logger.observe(|packets, _previous| {
///     println!("{} calls logged", packets.len());
/// });
/// ```
pub struct RequestLogger {
    level: LogLevel,
    logs_outgoing_request: bool,
    sink: Arc<dyn LogSink>,
    in_flight: Mutex<HashMap<RequestId, Started>>,
    packets: Observable<Vec<Arc<RequestPacket>>>,
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl RequestLogger {
    /// Creates a logger writing to [`TracingSink`].
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            logs_outgoing_request: false,
            sink: Arc::new(TracingSink),
            in_flight: Mutex::new(HashMap::new()),
            packets: Observable::default(),
        }
    }

    /// Sends records to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Also logs each request when it is launched.
    #[must_use]
    pub fn with_outgoing_requests(mut self, enabled: bool) -> Self {
        self.logs_outgoing_request = enabled;
        self
    }

    /// The configured level.
    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Recorded packets, most recent first.
    #[must_use]
    pub fn packets(&self) -> Vec<Arc<RequestPacket>> {
        self.packets.get()
    }

    /// Observes the recorded packets: the observer receives the new and the
    /// previous list.
    pub fn observe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&Vec<Arc<RequestPacket>>, &Vec<Arc<RequestPacket>>) + Send + Sync + 'static,
    {
        self.packets.observe(observer)
    }

    /// Forgets every recorded packet.
    pub fn clear(&self) {
        self.packets.set(Vec::new());
    }

    /// Number of calls launched but not completed yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn finish(&self, packet: RequestPacket) {
        self.sink.log(&self.format(&packet));
        let packet = Arc::new(packet);
        self.packets.update(|packets| {
            packets.insert(0, packet);
            packets.truncate(MAX_PACKETS);
        });
    }

    fn started(&self, id: RequestId) -> Started {
        self.in_flight.lock().remove(&id).unwrap_or_else(|| Started {
            at: Instant::now(),
            wall: SystemTime::now(),
        })
    }

    fn packet(request: &TransportRequest, started: Started) -> RequestPacket {
        RequestPacket {
            id: request.id(),
            method: request.method(),
            url: request.url().clone(),
            request_headers: sorted(request.headers()),
            request_body: request.body().cloned(),
            status: None,
            response_headers: Vec::new(),
            response_body: None,
            error: None,
            cancelled: false,
            started_at: started.wall,
            elapsed: started.at.elapsed(),
        }
    }

    /// Formats a packet at the configured level.
    #[must_use]
    pub fn format(&self, packet: &RequestPacket) -> String {
        let mut out = self.format_request(packet);

        let status = match (packet.status, packet.cancelled) {
            (Some(code), _) => format!("{code} {}", reason(code)),
            (None, true) => "CANCELLED".to_string(),
            (None, false) => "NONE".to_string(),
        };
        let _ = writeln!(out, "{INDENT}Status: {status}");
        let _ = writeln!(out, "{INDENT}Elapsed Time: {:.3}s", packet.elapsed.as_secs_f64());
        if let Some(error) = &packet.error {
            let _ = writeln!(out, "{INDENT}Error: {error}");
        }

        if self.level >= LogLevel::All && !packet.response_headers.is_empty() {
            write_headers(&mut out, "Response Headers", &packet.response_headers);
        }
        if self.level >= LogLevel::Trace
            && let Some(body) = packet.response_body.as_ref().filter(|body| !body.is_empty())
        {
            write_body(&mut out, "Response Body", body, header(&packet.response_headers, "content-type"));
        }
        out
    }

    fn format_request(&self, packet: &RequestPacket) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "[{}] {} {}",
            clock(packet.started_at),
            packet.method,
            packet.url.path()
        );
        if let Some(host) = packet.url.host_str() {
            match packet.url.port() {
                Some(port) => {
                    let _ = writeln!(out, "{INDENT}Host: {host}:{port}");
                }
                None => {
                    let _ = writeln!(out, "{INDENT}Host: {host}");
                }
            }
        }
        if self.level >= LogLevel::Verbose
            && let Some(query) = packet.url.query().filter(|query| !query.is_empty())
        {
            let _ = writeln!(out, "{INDENT}Query: {query}");
        }
        if self.level >= LogLevel::Trace && !packet.request_headers.is_empty() {
            write_headers(&mut out, "Headers", &packet.request_headers);
        }
        if self.level >= LogLevel::Verbose
            && let Some(body) = packet.request_body.as_ref().filter(|body| !body.is_empty())
        {
            write_body(&mut out, "Body", body, header(&packet.request_headers, "content-type"));
        }
        out
    }
}

impl fmt::Debug for RequestLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLogger")
            .field("level", &self.level)
            .field("logs_outgoing_request", &self.logs_outgoing_request)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl RequestInterceptor for RequestLogger {
    fn will_launch_request(&self, request: &mut TransportRequest, _endpoint: &EndpointInfo) {
        if self.level == LogLevel::None {
            return;
        }
        let started = Started {
            at: Instant::now(),
            wall: SystemTime::now(),
        };
        self.in_flight.lock().insert(request.id(), started);

        if self.logs_outgoing_request {
            let packet = Self::packet(request, started);
            self.sink.log(&self.format_request(&packet));
        }
    }

    fn request_succeeded(
        &self,
        request: &TransportRequest,
        _endpoint: &EndpointInfo,
        data: &Bytes,
        response: &ResponseMeta,
    ) {
        if self.level == LogLevel::None {
            return;
        }
        let mut packet = Self::packet(request, self.started(request.id()));
        packet.status = Some(response.status());
        packet.response_headers = sorted(response.headers());
        packet.response_body = Some(data.clone());
        self.finish(packet);
    }

    fn request_failed(
        &self,
        request: &TransportRequest,
        _endpoint: &EndpointInfo,
        failure: &RequestFailure,
        _completion: Completion,
    ) {
        if self.level == LogLevel::None {
            return;
        }
        let mut packet = Self::packet(request, self.started(request.id()));
        packet.status = failure.status();
        if let Some(response) = failure.response() {
            packet.response_headers = sorted(response.headers());
        }
        packet.response_body = failure.raw_data().cloned();
        packet.error = Some(failure.error().to_string());
        packet.cancelled = failure.error().is_cancelled();
        self.finish(packet);
    }
}

fn sorted(headers: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut headers: Vec<_> = headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    headers.sort();
    headers
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn write_headers(out: &mut String, title: &str, headers: &[(String, String)]) {
    let _ = writeln!(out, "{INDENT}{title}:");
    for (name, value) in headers {
        let _ = writeln!(out, "{INDENT}{INDENT}{name}: {value}");
    }
}

fn write_body(out: &mut String, title: &str, body: &Bytes, content_type: Option<&str>) {
    let _ = writeln!(out, "{INDENT}{title}:");
    let text = if is_textual(content_type) {
        String::from_utf8_lossy(body).into_owned()
    } else {
        BASE64.encode(body)
    };
    for line in text.lines() {
        let _ = writeln!(out, "{INDENT}{INDENT}{line}");
    }
}

fn is_textual(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|content_type| {
        let content_type = content_type.to_ascii_lowercase();
        content_type.starts_with("text") || content_type.contains("json") || content_type.contains("xml")
    })
}

fn reason(code: u16) -> String {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .map_or_else(|| "UNKNOWN".to_string(), str::to_uppercase)
}

/// `HH:MM:SS` of a wall clock time, in UTC.
fn clock(time: SystemTime) -> String {
    let seconds = time.duration_since(UNIX_EPOCH).map_or(0, |since| since.as_secs()) % 86_400;
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60
    )
}
