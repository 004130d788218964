use super::BackendError;

/// Upper bound on an unterminated line and on one event's accumulated data.
pub const MAX_EVENT_BYTES: usize = 16 * 1024 * 1024;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder. Bytes may arrive split anywhere,
/// including inside a UTF-8 sequence; only complete lines are interpreted.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_bytes: usize,
    limit: usize,
}

impl SseDecoder {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            data_bytes: 0,
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, BackendError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<u8>>();
            let line = String::from_utf8_lossy(line.as_slice());
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line)? {
                events.push(event);
            }
        }
        if self.buffer.len() > self.limit {
            return Err(self.overflow());
        }
        Ok(events)
    }

    /// Flushes a trailing event when the stream closes without a blank line.
    pub fn finish(&mut self) -> Result<Option<SseEvent>, BackendError> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(rest.as_slice()).into_owned();
            if let Some(event) = self.process_line(line.trim_end_matches('\r'))? {
                return Ok(Some(event));
            }
        }
        Ok(self.dispatch())
    }

    fn process_line(&mut self, line: &str) -> Result<Option<SseEvent>, BackendError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line.starts_with(':') {
            return Ok(None);
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_bytes += value.len();
                if self.data_bytes > self.limit {
                    return Err(self.overflow());
                }
                self.data.push(value.to_string());
            }
            _ => {}
        }
        Ok(None)
    }

    fn overflow(&self) -> BackendError {
        BackendError::protocol(format!(
            "event stream exceeded {} bytes without completing an event",
            self.limit
        ))
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        self.data_bytes = 0;
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| String::from("message")),
            data,
        })
    }
}
