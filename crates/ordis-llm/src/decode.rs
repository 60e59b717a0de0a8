use std::collections::VecDeque;

use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use ordis_core::error::{OrdisError, Result};
use ordis_core::types::StreamChunk;

/// Wire dialect a provider speaks. All three are normalized into the same
/// canonical `StreamChunk` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDialect {
    /// SSE; deltas under `choices[0].delta`.
    OpenAiSse,
    /// SSE; `content_block_start` / `content_block_delta` / `content_block_stop`.
    AnthropicSse,
    /// One JSON object per line with `message` and `done`.
    OllamaNdjson,
}

/// Streaming UTF-8 decoder. An incomplete multi-byte sequence at a chunk
/// boundary is carried into the next call instead of being emitted as
/// replacement characters mid-token.
#[derive(Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or(""));
                    match e.error_len() {
                        // Invalid byte sequence: substitute and keep going.
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            self.pending.drain(..valid + bad);
                        }
                        // Incomplete sequence at the end: carry it forward.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }
}

/// A parsed SSE event: optional `event:` type plus joined `data:` payload.
#[derive(Debug, Clone)]
struct SseEvent {
    data: String,
}

/// Line-buffering SSE framer. Events are split on a blank line; repeated
/// `data:` lines within one event are joined with a single newline.
#[derive(Default)]
struct SseFramer {
    buffer: String,
}

impl SseFramer {
    fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = find_blank_line(&self.buffer) {
            let block = self.buffer[..pos.0].to_string();
            self.buffer = self.buffer[pos.1..].to_string();

            let mut data_lines = Vec::new();
            for line in block.lines() {
                let line = line.strip_suffix('\r').unwrap_or(line);
                if let Some(val) = line.strip_prefix("data: ") {
                    data_lines.push(val.to_string());
                } else if let Some(val) = line.strip_prefix("data:") {
                    data_lines.push(val.to_string());
                }
            }

            if !data_lines.is_empty() {
                events.push(SseEvent {
                    data: data_lines.join("\n"),
                });
            }
        }

        events
    }
}

/// First blank line in `buf`, as (block end, resume offset). Handles both
/// `\n\n` and `\r\n\r\n` separators.
fn find_blank_line(buf: &str) -> Option<(usize, usize)> {
    let lf = buf.find("\n\n").map(|i| (i, i + 2));
    let crlf = buf.find("\r\n\r\n").map(|i| (i, i + 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Newline framer for NDJSON sources.
#[derive(Default)]
struct LineFramer {
    buffer: String,
}

impl LineFramer {
    fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer = self.buffer[pos + 1..].to_string();
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

/// Balance trailing brackets on a truncated JSON fragment: trim whitespace,
/// append the missing `]`s then `}`s, parse; yield `{}` when that still
/// fails. Used only when a tool call is force-closed.
pub fn repair_partial_json(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim_end();
    if trimmed.is_empty() {
        return serde_json::json!({});
    }

    if let Ok(v) = serde_json::from_str(trimmed) {
        return v;
    }

    let mut open_braces = 0i32;
    let mut open_brackets = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for c in trimmed.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => open_braces += 1,
            '}' if !in_string => open_braces -= 1,
            '[' if !in_string => open_brackets += 1,
            ']' if !in_string => open_brackets -= 1,
            _ => {}
        }
    }

    let mut candidate = trimmed.to_string();
    for _ in 0..open_brackets.max(0) {
        candidate.push(']');
    }
    for _ in 0..open_braces.max(0) {
        candidate.push('}');
    }

    serde_json::from_str(&candidate).unwrap_or_else(|_| serde_json::json!({}))
}

/// A tool call the decoder is currently accumulating.
struct OpenCall {
    id: String,
    name: String,
    input_json: String,
}

impl OpenCall {
    fn close(self) -> StreamChunk {
        let input = if self.input_json.trim().is_empty() {
            serde_json::json!({})
        } else {
            repair_partial_json(&self.input_json)
        };
        StreamChunk::ToolUseEnd { id: self.id, input }
    }
}

/// Incremental normalizer from one wire dialect to the canonical chunk
/// sequence. Feed raw bytes in any fragmentation; the output is identical
/// for any splitting of the same byte sequence.
pub struct StreamDecoder {
    dialect: WireDialect,
    utf8: Utf8Carry,
    sse: SseFramer,
    lines: LineFramer,
    open_call: Option<OpenCall>,
    stopped: bool,
    synthetic_ids: usize,
}

impl StreamDecoder {
    pub fn new(dialect: WireDialect) -> Self {
        Self {
            dialect,
            utf8: Utf8Carry::default(),
            sse: SseFramer::default(),
            lines: LineFramer::default(),
            open_call: None,
            stopped: false,
            synthetic_ids: 0,
        }
    }

    /// Feed a byte fragment, producing zero or more canonical chunks.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        let text = self.utf8.push(bytes);
        let mut out = Vec::new();

        match self.dialect {
            WireDialect::OpenAiSse => {
                for event in self.sse.feed(&text) {
                    self.decode_openai_event(&event.data, &mut out);
                }
            }
            WireDialect::AnthropicSse => {
                for event in self.sse.feed(&text) {
                    self.decode_anthropic_event(&event.data, &mut out);
                }
            }
            WireDialect::OllamaNdjson => {
                for line in self.lines.feed(&text) {
                    self.decode_ollama_line(&line, &mut out);
                }
            }
        }

        out
    }

    /// Close any open tool call via the partial-JSON recovery rule without
    /// ending the message. Used when the byte source fails mid-stream: the
    /// caller sees the synthesized close, then the error.
    pub fn abort(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if let Some(call) = self.open_call.take() {
            out.push(call.close());
        }
        out
    }

    /// Signal the end of the byte source. Force-closes an open tool call via
    /// the partial-JSON recovery rule and emits the terminal `message_stop`
    /// when the upstream never sent one.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();

        if self.dialect == WireDialect::OllamaNdjson {
            if let Some(line) = self.lines.finish() {
                self.decode_ollama_line(&line, &mut out);
            }
        }

        if let Some(call) = self.open_call.take() {
            out.push(call.close());
        }
        if !self.stopped {
            self.stopped = true;
            out.push(StreamChunk::MessageStop);
        }
        out
    }

    fn emit_stop(&mut self, out: &mut Vec<StreamChunk>) {
        if !self.stopped {
            self.stopped = true;
            out.push(StreamChunk::MessageStop);
        }
    }

    fn close_open_call(&mut self, out: &mut Vec<StreamChunk>) {
        if let Some(call) = self.open_call.take() {
            out.push(call.close());
        }
    }

    fn next_synthetic_id(&mut self) -> String {
        self.synthetic_ids += 1;
        format!("call_{}", self.synthetic_ids)
    }

    // ── OpenAI dialect ────────────────────────────────────────────────

    fn decode_openai_event(&mut self, data: &str, out: &mut Vec<StreamChunk>) {
        if data.trim() == "[DONE]" {
            self.close_open_call(out);
            self.emit_stop(out);
            return;
        }

        let parsed: std::result::Result<OaiChunk, _> = serde_json::from_str(data);
        let chunk = match parsed {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "Dropping malformed stream event");
                return;
            }
        };

        let choice = match chunk.choices.into_iter().next() {
            Some(c) => c,
            None => return,
        };

        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                out.push(StreamChunk::TextDelta { text });
            }
        }

        if let Some(tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                let func = match tc.function {
                    Some(f) => f,
                    None => continue,
                };
                if let Some(name) = func.name {
                    // A named entry starts a new call; close the previous one.
                    self.close_open_call(out);
                    let id = tc
                        .id
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| self.next_synthetic_id());
                    out.push(StreamChunk::ToolUseStart {
                        id: id.clone(),
                        name: name.clone(),
                    });
                    self.open_call = Some(OpenCall {
                        id,
                        name,
                        input_json: String::new(),
                    });
                }
                if let Some(args) = func.arguments {
                    if args.is_empty() {
                        continue;
                    }
                    if let Some(call) = self.open_call.as_mut() {
                        call.input_json.push_str(&args);
                        out.push(StreamChunk::ToolUseDelta {
                            id: call.id.clone(),
                            partial: args,
                        });
                    }
                }
            }
        }

        match choice.finish_reason.as_deref() {
            Some("tool_calls") => self.close_open_call(out),
            Some(_) => {
                self.close_open_call(out);
                self.emit_stop(out);
            }
            None => {}
        }
    }

    // ── Anthropic dialect ─────────────────────────────────────────────

    fn decode_anthropic_event(&mut self, data: &str, out: &mut Vec<StreamChunk>) {
        if data.trim() == "[DONE]" {
            self.close_open_call(out);
            self.emit_stop(out);
            return;
        }

        let parsed: std::result::Result<AnthropicEvent, _> = serde_json::from_str(data);
        let event = match parsed {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "Dropping malformed stream event");
                return;
            }
        };

        match event {
            AnthropicEvent::ContentBlockStart { content_block, .. } => {
                if let AnthropicBlock::ToolUse { id, name } = content_block {
                    self.close_open_call(out);
                    out.push(StreamChunk::ToolUseStart {
                        id: id.clone(),
                        name: name.clone(),
                    });
                    self.open_call = Some(OpenCall {
                        id,
                        name,
                        input_json: String::new(),
                    });
                }
            }
            AnthropicEvent::ContentBlockDelta { delta, .. } => match delta {
                AnthropicDelta::TextDelta { text } => {
                    if !text.is_empty() {
                        out.push(StreamChunk::TextDelta { text });
                    }
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    if let Some(call) = self.open_call.as_mut() {
                        call.input_json.push_str(&partial_json);
                        out.push(StreamChunk::ToolUseDelta {
                            id: call.id.clone(),
                            partial: partial_json,
                        });
                    }
                }
            },
            AnthropicEvent::ContentBlockStop { .. } => {
                self.close_open_call(out);
            }
            AnthropicEvent::MessageDelta { delta } => {
                if matches!(
                    delta.stop_reason.as_deref(),
                    Some("end_turn") | Some("stop_sequence")
                ) {
                    self.close_open_call(out);
                    self.emit_stop(out);
                }
            }
            AnthropicEvent::MessageStop {} => {
                self.close_open_call(out);
                self.emit_stop(out);
            }
            AnthropicEvent::Other => {}
        }
    }

    // ── Ollama NDJSON dialect ─────────────────────────────────────────

    fn decode_ollama_line(&mut self, line: &str, out: &mut Vec<StreamChunk>) {
        let parsed: std::result::Result<OllamaChunk, _> = serde_json::from_str(line);
        let chunk = match parsed {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "Dropping malformed stream event");
                return;
            }
        };

        if let Some(message) = chunk.message {
            if let Some(text) = message.content {
                if !text.is_empty() {
                    out.push(StreamChunk::TextDelta { text });
                }
            }
            // Ollama tool calls arrive fully formed, so start and end are
            // emitted back-to-back.
            for tc in message.tool_calls.unwrap_or_default() {
                let id = self.next_synthetic_id();
                let input = match tc.function.arguments {
                    serde_json::Value::String(s) => repair_partial_json(&s),
                    serde_json::Value::Null => serde_json::json!({}),
                    v => v,
                };
                out.push(StreamChunk::ToolUseStart {
                    id: id.clone(),
                    name: tc.function.name,
                });
                out.push(StreamChunk::ToolUseEnd { id, input });
            }
        }

        if chunk.done {
            self.emit_stop(out);
        }
    }
}

// ── Wire payload shapes (untyped beyond what the decoder reads) ──────

#[derive(Deserialize)]
struct OaiChunk {
    #[serde(default)]
    choices: Vec<OaiChoice>,
}

#[derive(Deserialize)]
struct OaiChoice {
    #[serde(default)]
    delta: OaiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OaiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Deserialize)]
struct OaiToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OaiFunction>,
}

#[derive(Deserialize)]
struct OaiFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum AnthropicEvent {
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        #[allow(dead_code)]
        index: usize,
        content_block: AnthropicBlock,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        #[allow(dead_code)]
        index: usize,
        delta: AnthropicDelta,
    },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    #[serde(rename = "message_delta")]
    MessageDelta { delta: AnthropicMessageDelta },
    #[serde(rename = "message_stop")]
    MessageStop {},
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum AnthropicBlock {
    #[serde(rename = "text")]
    Text {},
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(Deserialize)]
struct AnthropicMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Drive a byte source through the decoder as a lazy canonical stream.
///
/// A byte-source error releases the reader and is surfaced to the caller as
/// the final item; the chunks decoded before it are preserved.
pub fn decode_stream<S, E>(dialect: WireDialect, source: S) -> BoxStream<'static, Result<StreamChunk>>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        decoder: StreamDecoder,
        source: S,
        pending: VecDeque<Result<StreamChunk>>,
        done: bool,
    }

    let state = State {
        decoder: StreamDecoder::new(dialect),
        source,
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.source.next().await {
                Some(Ok(bytes)) => {
                    for chunk in st.decoder.feed(&bytes) {
                        st.pending.push_back(Ok(chunk));
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    for chunk in st.decoder.abort() {
                        st.pending.push_back(Ok(chunk));
                    }
                    st.pending
                        .push_back(Err(OrdisError::StreamDecode(e.to_string())));
                }
                None => {
                    st.done = true;
                    for chunk in st.decoder.finish() {
                        st.pending.push_back(Ok(chunk));
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut StreamDecoder, input: &str) -> Vec<StreamChunk> {
        let mut out = decoder.feed(input.as_bytes());
        out.extend(decoder.finish());
        out
    }

    fn sse(data: &str) -> String {
        format!("data: {}\n\n", data)
    }

    #[test]
    fn openai_text_then_done() {
        let mut d = StreamDecoder::new(WireDialect::OpenAiSse);
        let input = format!(
            "{}{}{}",
            sse(r#"{"choices":[{"delta":{"content":"hi"}}]}"#),
            sse(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            "data: [DONE]\n\n",
        );
        let chunks = drain(&mut d, &input);
        assert_eq!(
            chunks,
            vec![
                StreamChunk::TextDelta { text: "hi".into() },
                StreamChunk::MessageStop,
            ]
        );
    }

    #[test]
    fn openai_tool_call_lifecycle() {
        let mut d = StreamDecoder::new(WireDialect::OpenAiSse);
        let input = format!(
            "{}{}{}{}",
            sse(r#"{"choices":[{"delta":{"tool_calls":[{"id":"t1","function":{"name":"clock","arguments":""}}]}}]}"#),
            sse(r#"{"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"{\"tz\":\"UTC\"}"}}]}}]}"#),
            sse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#),
            "data: [DONE]\n\n",
        );
        let chunks = drain(&mut d, &input);
        assert_eq!(
            chunks,
            vec![
                StreamChunk::ToolUseStart {
                    id: "t1".into(),
                    name: "clock".into()
                },
                StreamChunk::ToolUseDelta {
                    id: "t1".into(),
                    partial: "{\"tz\":\"UTC\"}".into()
                },
                StreamChunk::ToolUseEnd {
                    id: "t1".into(),
                    input: serde_json::json!({"tz": "UTC"})
                },
                StreamChunk::MessageStop,
            ]
        );
    }

    #[test]
    fn anthropic_matches_openai_canonical_output() {
        let mut d = StreamDecoder::new(WireDialect::AnthropicSse);
        let input = format!(
            "{}{}{}{}{}{}",
            sse(r#"{"type":"content_block_start","index":0,"content_block":{"type":"text"}}"#),
            sse(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#),
            sse(r#"{"type":"content_block_stop","index":0}"#),
            sse(r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#),
            sse(r#"{"type":"message_stop"}"#),
            "",
        );
        let chunks = drain(&mut d, &input);
        assert_eq!(
            chunks,
            vec![
                StreamChunk::TextDelta { text: "hi".into() },
                StreamChunk::MessageStop,
            ]
        );
    }

    #[test]
    fn anthropic_tool_call_lifecycle() {
        let mut d = StreamDecoder::new(WireDialect::AnthropicSse);
        let input = format!(
            "{}{}{}{}",
            sse(r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"clock"}}"#),
            sse(r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{}"}}"#),
            sse(r#"{"type":"content_block_stop","index":0}"#),
            sse(r#"{"type":"message_stop"}"#),
        );
        let chunks = drain(&mut d, &input);
        assert_eq!(
            chunks,
            vec![
                StreamChunk::ToolUseStart {
                    id: "t1".into(),
                    name: "clock".into()
                },
                StreamChunk::ToolUseDelta {
                    id: "t1".into(),
                    partial: "{}".into()
                },
                StreamChunk::ToolUseEnd {
                    id: "t1".into(),
                    input: serde_json::json!({})
                },
                StreamChunk::MessageStop,
            ]
        );
    }

    #[test]
    fn ollama_tool_calls_arrive_fully_formed() {
        let mut d = StreamDecoder::new(WireDialect::OllamaNdjson);
        let input = concat!(
            r#"{"message":{"content":"","tool_calls":[{"function":{"name":"clock","arguments":{"tz":"UTC"}}}]},"done":false}"#,
            "\n",
            r#"{"message":{"content":"noon"},"done":false}"#,
            "\n",
            r#"{"message":{"content":""},"done":true}"#,
            "\n",
        );
        let chunks = drain(&mut d, input);
        assert_eq!(
            chunks,
            vec![
                StreamChunk::ToolUseStart {
                    id: "call_1".into(),
                    name: "clock".into()
                },
                StreamChunk::ToolUseEnd {
                    id: "call_1".into(),
                    input: serde_json::json!({"tz": "UTC"})
                },
                StreamChunk::TextDelta {
                    text: "noon".into()
                },
                StreamChunk::MessageStop,
            ]
        );
    }

    #[test]
    fn refragmentation_yields_identical_sequence() {
        let input = format!(
            "{}{}{}",
            sse(r#"{"choices":[{"delta":{"content":"hé💡llo"}}]}"#),
            sse(r#"{"choices":[{"delta":{"content":" world"}}]}"#),
            "data: [DONE]\n\n",
        );
        let bytes = input.as_bytes();

        let mut whole = StreamDecoder::new(WireDialect::OpenAiSse);
        let mut expected = whole.feed(bytes);
        expected.extend(whole.finish());

        // Every possible byte-level split point, including ones inside the
        // multi-byte characters.
        for split in 1..bytes.len() {
            let mut d = StreamDecoder::new(WireDialect::OpenAiSse);
            let mut got = d.feed(&bytes[..split]);
            got.extend(d.feed(&bytes[split..]));
            got.extend(d.finish());
            assert_eq!(got, expected, "split at {}", split);
        }

        // Byte-at-a-time.
        let mut d = StreamDecoder::new(WireDialect::OpenAiSse);
        let mut got = Vec::new();
        for b in bytes {
            got.extend(d.feed(std::slice::from_ref(b)));
        }
        got.extend(d.finish());
        assert_eq!(got, expected);
    }

    #[test]
    fn truncated_stream_synthesizes_tool_use_end() {
        let mut d = StreamDecoder::new(WireDialect::OpenAiSse);
        let mut chunks = d.feed(
            sse(r#"{"choices":[{"delta":{"tool_calls":[{"id":"t9","function":{"name":"fetch","arguments":"{\"url\":\"https://x\",\"tries\":[1,2"}}]}}]}"#)
                .as_bytes(),
        );
        chunks.extend(d.finish());

        let end = chunks
            .iter()
            .find_map(|c| match c {
                StreamChunk::ToolUseEnd { id, input } => Some((id.clone(), input.clone())),
                _ => None,
            })
            .expect("synthesized tool_use_end");
        assert_eq!(end.0, "t9");
        assert_eq!(end.1["url"], "https://x");
        assert_eq!(end.1["tries"], serde_json::json!([1, 2]));
        assert_eq!(chunks.last(), Some(&StreamChunk::MessageStop));
    }

    #[test]
    fn malformed_event_is_dropped_and_stream_continues() {
        let mut d = StreamDecoder::new(WireDialect::OpenAiSse);
        let input = format!(
            "{}{}{}",
            sse(r#"{"choices": nonsense"#),
            sse(r#"{"choices":[{"delta":{"content":"ok"}}]}"#),
            "data: [DONE]\n\n",
        );
        let chunks = drain(&mut d, &input);
        assert_eq!(
            chunks,
            vec![
                StreamChunk::TextDelta { text: "ok".into() },
                StreamChunk::MessageStop,
            ]
        );
    }

    #[test]
    fn done_yields_exactly_one_message_stop() {
        let mut d = StreamDecoder::new(WireDialect::OpenAiSse);
        let input = format!(
            "{}{}",
            sse(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            "data: [DONE]\n\n",
        );
        let chunks = drain(&mut d, &input);
        let stops = chunks
            .iter()
            .filter(|c| matches!(c, StreamChunk::MessageStop))
            .count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn repair_balances_brackets_then_braces() {
        assert_eq!(
            repair_partial_json(r#"{"a": [1, 2"#),
            serde_json::json!({"a": [1, 2]})
        );
        assert_eq!(repair_partial_json(r#"{"a": 1}"#), serde_json::json!({"a": 1}));
        assert_eq!(repair_partial_json("   "), serde_json::json!({}));
        // Interleaved nesting the rule cannot fix parses to the empty object.
        assert_eq!(repair_partial_json(r#"[{"a": 1"#), serde_json::json!({}));
        // Braces inside strings are not counted.
        assert_eq!(
            repair_partial_json(r#"{"cmd": "echo {", "n": 1"#),
            serde_json::json!({"cmd": "echo {", "n": 1})
        );
    }

    #[test]
    fn multiline_data_joined_with_newline() {
        let mut framer = SseFramer::default();
        let events = framer.feed("data: line1\ndata: line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[tokio::test]
    async fn decode_stream_surfaces_source_error_after_chunks() {
        let source = futures::stream::iter(vec![
            Ok(bytes::Bytes::from(sse(
                r#"{"choices":[{"delta":{"content":"partial"}}]}"#,
            ))),
            Err("connection reset"),
        ]);
        let mut stream = decode_stream(WireDialect::OpenAiSse, source);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(
            first,
            StreamChunk::TextDelta {
                text: "partial".into()
            }
        );
        // The synthesized close-out arrives, then the error.
        let mut saw_error = false;
        while let Some(item) = stream.next().await {
            if item.is_err() {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
