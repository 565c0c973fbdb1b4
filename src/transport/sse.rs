//! Server-Sent Events decoding for the streamable HTTP client.
//!
//! Only `data:` fields matter here: each blank-line-delimited event carries
//! one JSON-RPC frame. Comment lines (`: ping …` keepalives) and other fields
//! are ignored.

/// Decode every complete event in `buf`, including a trailing event that
/// lacks its terminating blank line.
#[must_use]
pub fn decode_sse_events(buf: &str) -> Vec<String> {
    let mut decoder = SseDecoder::default();
    let mut out = decoder.push(buf);
    out.extend(decoder.finish());
    out
}

/// Incremental SSE decoder fed with arbitrary chunk boundaries.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: String,
    data_lines: Vec<String>,
    // The last line ended in a bare `\r`; a leading `\n` belongs to it.
    skip_lf: bool,
}

impl SseDecoder {
    /// Feed a chunk and return the payloads of any events it completed.
    ///
    /// Lines end in `\r\n`, `\n`, or a bare `\r`. A partial line at the end
    /// of `chunk` is held until the next call.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();

        loop {
            if self.skip_lf && !self.pending.is_empty() {
                if self.pending.starts_with('\n') {
                    self.pending.remove(0);
                }
                self.skip_lf = false;
            }
            let Some(pos) = self.pending.find(['\r', '\n']) else {
                break;
            };
            let line: String = self.pending.drain(..pos).collect();
            self.skip_lf = self.pending.starts_with('\r');
            self.pending.remove(0);
            self.accept_line(&line, &mut out);
        }
        out
    }

    /// Flush the final event at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let mut out = Vec::new();
        if !rest.is_empty() {
            self.accept_line(rest.trim_end_matches('\r'), &mut out);
        }
        self.flush_event(&mut out);
        out.pop()
    }

    fn accept_line(&mut self, line: &str, out: &mut Vec<String>) {
        if line.is_empty() {
            self.flush_event(out);
            return;
        }

        // Comments and unknown fields.
        if line.starts_with(':') {
            return;
        }

        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_owned());
        }
    }

    fn flush_event(&mut self, out: &mut Vec<String>) {
        if !self.data_lines.is_empty() {
            out.push(self.data_lines.join("\n"));
            self.data_lines.clear();
        }
    }
}
