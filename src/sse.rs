/// Incremental `text/event-stream` parser.
///
/// Bytes are buffered until a full line is available, so multi-byte characters
/// split across network chunks survive. Only `data:` fields are kept; comments
/// (keep-alives) and other fields are dropped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseParser {
    /// Feed arbitrary bytes and drain the data payload of every completed event.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let line_end = consumed + offset;
            let line = String::from_utf8_lossy(&self.buffer[consumed..line_end]).into_owned();
            consumed = line_end + 1;

            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                if let Some(payload) = self.dispatch() {
                    payloads.push(payload);
                }
            } else {
                self.accept_line(line);
            }
        }

        self.buffer.drain(..consumed);
        payloads
    }

    /// Parse a complete event-stream body in one shot.
    #[cfg(test)]
    fn parse_all(input: &str) -> Vec<String> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.data_lines.is_empty()
    }

    fn accept_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }

        if line == "data" {
            self.data_lines.push(String::new());
        } else if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data_lines.push(value.to_string());
        }
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }

        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        if payload.is_empty() {
            None
        } else {
            Some(payload)
        }
    }
}
