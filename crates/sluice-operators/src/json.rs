//! Newline-delimited JSON: `read_json` (bytes -> events) and `write_json`
//! (events -> bytes).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sluice_core::chunk::ByteChunk;
use sluice_core::diagnostics::Diagnostic;
use sluice_core::types::EventBatch;

use crate::adapter::{Describe, Map as MapOp, MapFn, Stream, StreamFn};
use crate::control::{ControlHandle, ControlPlane};
use crate::error::OpError;
use crate::registry::{OperatorSpec, Registry};
use crate::stream::Generator;
use crate::traits::BoxedOperator;

fn default_schema() -> String {
    "json".into()
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

/// Parses one JSON object per line. Lines may span chunk boundaries.
/// Malformed lines, and lines longer than `max_line_bytes`, are skipped
/// with a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadJson {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for ReadJson {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl ReadJson {
    pub fn boxed(self) -> BoxedOperator {
        Stream::boxed(self)
    }
}

impl Describe for ReadJson {
    fn name(&self) -> String {
        "read_json".into()
    }

    fn config(&self) -> Result<Value, OpError> {
        Ok(serde_json::to_value(self).map_err(sluice_core::error::Error::from)?)
    }
}

impl StreamFn for ReadJson {
    type Input = ByteChunk;
    type Output = EventBatch;

    fn transform(
        &self,
        input: Generator<ByteChunk>,
        ctrl: ControlHandle,
    ) -> Result<Generator<EventBatch>, OpError> {
        Ok(Box::new(LineReader {
            input,
            ctrl,
            schema: self.schema.clone(),
            max_line_bytes: self.max_line_bytes.max(1),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            line: 0,
            skipping: false,
            done: false,
        }))
    }
}

struct LineReader {
    input: Generator<ByteChunk>,
    ctrl: ControlHandle,
    schema: String,
    max_line_bytes: usize,
    buffer: Vec<u8>,
    pending: VecDeque<EventBatch>,
    line: usize,
    /// Dropping the rest of an overlong line.
    skipping: bool,
    done: bool,
}

impl LineReader {
    fn parse(&mut self, bytes: &[u8]) {
        let mut objects = Vec::new();
        for line in bytes.split(|b| *b == b'\n') {
            self.line += 1;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Value>(line) {
                Ok(Value::Object(object)) => objects.push(object),
                Ok(other) => Diagnostic::warning("expected a JSON object")
                    .primary("read_json", format!("line {}", self.line))
                    .note(format!("got `{other}`"))
                    .emit(self.ctrl.diagnostics()),
                Err(err) => Diagnostic::warning(format!("invalid JSON: {err}"))
                    .primary("read_json", format!("line {}", self.line))
                    .emit(self.ctrl.diagnostics()),
            }
        }
        self.pending
            .extend(EventBatch::from_json_rows(&self.schema, objects));
    }
}

impl Iterator for LineReader {
    type Item = EventBatch;

    fn next(&mut self) -> Option<EventBatch> {
        if let Some(batch) = self.pending.pop_front() {
            return Some(batch);
        }
        if self.done {
            return None;
        }
        match self.input.next() {
            Some(chunk) => {
                let mut bytes = chunk.as_bytes();
                if self.skipping {
                    match bytes.iter().position(|b| *b == b'\n') {
                        Some(pos) => {
                            self.skipping = false;
                            self.line += 1;
                            bytes = &bytes[pos + 1..];
                        }
                        None => return Some(EventBatch::empty()),
                    }
                }
                self.buffer.extend_from_slice(bytes);
                if let Some(pos) = self.buffer.iter().rposition(|b| *b == b'\n') {
                    let complete: Vec<u8> = self.buffer.drain(..pos).collect();
                    self.buffer.drain(..1);
                    self.parse(&complete);
                }
                if self.buffer.len() > self.max_line_bytes {
                    Diagnostic::warning(format!(
                        "line exceeds {} bytes and was skipped",
                        self.max_line_bytes
                    ))
                    .primary("read_json", format!("line {}", self.line + 1))
                    .emit(self.ctrl.diagnostics());
                    self.buffer = Vec::new();
                    self.skipping = true;
                }
                Some(self.pending.pop_front().unwrap_or_default())
            }
            None => {
                self.done = true;
                let rest = std::mem::take(&mut self.buffer);
                if !rest.is_empty() {
                    self.parse(&rest);
                }
                self.pending.pop_front()
            }
        }
    }
}

/// Renders every event as one JSON object per line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteJson {}

impl WriteJson {
    pub fn boxed(self) -> BoxedOperator {
        MapOp::boxed(self)
    }
}

impl Describe for WriteJson {
    fn name(&self) -> String {
        "write_json".into()
    }

    fn config(&self) -> Result<Value, OpError> {
        Ok(Value::Object(Map::new()))
    }
}

impl MapFn for WriteJson {
    type Input = EventBatch;
    type Output = ByteChunk;

    fn apply(&self, input: EventBatch, ctrl: &dyn ControlPlane) -> ByteChunk {
        let mut out = Vec::with_capacity(input.approx_bytes() as usize);
        for row in input.to_json_rows() {
            if let Err(err) = serde_json::to_writer(&mut out, &row) {
                Diagnostic::error(format!("failed to render event: {err}"))
                    .primary("write_json", input.schema.name.clone())
                    .emit(ctrl.diagnostics());
                continue;
            }
            out.push(b'\n');
        }
        ByteChunk::from(out)
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register("read_json", |spec: &OperatorSpec| {
        Ok(spec.parse::<ReadJson>()?.boxed())
    });
    registry.register("write_json", |spec: &OperatorSpec| {
        Ok(spec.parse::<WriteJson>()?.boxed())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::LocalControlPlane;
    use crate::stream::{generator, OperatorInput, OperatorOutput};
    use crate::traits::Operator;
    use std::sync::Arc;

    fn read(chunks: Vec<&'static str>) -> (Vec<EventBatch>, Arc<LocalControlPlane>) {
        let ctrl = LocalControlPlane::shared("read_json");
        let input = chunks.into_iter().map(ByteChunk::from);
        let OperatorOutput::Events(out) = ReadJson::default()
            .boxed()
            .instantiate(OperatorInput::Bytes(generator(input)), ctrl.clone())
            .unwrap()
        else {
            panic!("expected events");
        };
        (out.collect(), ctrl)
    }

    #[test]
    fn lines_across_chunks() {
        let (out, ctrl) = read(vec!["{\"a\": 1}\n{\"a\"", ": 2}\n", "{\"a\": 3}"]);
        let rows: Vec<usize> = out.iter().map(EventBatch::rows).collect();
        // The last chunk has no newline yet, so it yields nothing until
        // the input ends.
        assert_eq!(rows, vec![1, 1, 0, 1]);
        assert!(ctrl.collected().is_empty());
    }

    #[test]
    fn yields_noop_without_complete_line() {
        let (out, _) = read(vec!["{\"a\"", ": 1}"]);
        assert_eq!(out.len(), 3);
        assert!(out[0].is_empty() && out[1].is_empty());
        assert_eq!(out[2].rows(), 1);
    }

    #[test]
    fn malformed_lines_warn() {
        let (out, ctrl) = read(vec!["{\"a\": 1}\nnope\n[1]\n{\"a\": 2}\n"]);
        assert_eq!(out.iter().map(EventBatch::rows).sum::<usize>(), 2);
        let diags = ctrl.collected();
        assert_eq!(diags.len(), 2);
        assert!(diags[0].message.starts_with("invalid JSON"));
        assert_eq!(ctrl.error_count(), 0);
    }

    #[test]
    fn overlong_lines_are_skipped() {
        let ctrl = LocalControlPlane::shared("read_json");
        let reader = ReadJson {
            max_line_bytes: 16,
            ..ReadJson::default()
        };
        let chunks = vec![
            "{\"a\": 1}\n{\"pad\": \"",
            "xxxxxxxxxxxxxxxx",
            "xxxxxxxx\"}\n{\"a\": 2}\n",
        ];
        let input = chunks.into_iter().map(ByteChunk::from);
        let OperatorOutput::Events(out) = reader
            .boxed()
            .instantiate(OperatorInput::Bytes(generator(input)), ctrl.clone())
            .unwrap()
        else {
            panic!("expected events");
        };
        let rows: Vec<_> = out.flat_map(|b| b.to_json_rows()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["a"], 2);
        let diags = ctrl.collected();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "line exceeds 16 bytes and was skipped");
    }

    #[test]
    fn write_then_read() {
        let (batches, _) = read(vec!["{\"a\": 1, \"b\": \"x\"}\n{\"a\": 2, \"b\": \"y\"}\n"]);
        let ctrl = LocalControlPlane::new("write_json");
        let chunk = WriteJson::default().apply(batches[0].clone(), &ctrl);
        assert_eq!(
            std::str::from_utf8(chunk.as_bytes()).unwrap(),
            "{\"a\":1,\"b\":\"x\"}\n{\"a\":2,\"b\":\"y\"}\n"
        );
    }

    proptest::proptest! {
        #[test]
        fn chunking_does_not_change_events(cuts in proptest::collection::vec(0_usize..64, 0..8)) {
            let text = "{\"a\": 1}\n{\"a\": 22, \"b\": \"x\"}\n{\"a\": 333}\n";
            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % text.len()).collect();
            cuts.sort_unstable();
            cuts.dedup();
            let mut chunks = Vec::new();
            let mut start = 0;
            for cut in cuts.into_iter().chain([text.len()]) {
                chunks.push(ByteChunk::from(text[start..cut].to_string()));
                start = cut;
            }
            let ctrl = LocalControlPlane::shared("read_json");
            let OperatorOutput::Events(out) = ReadJson::default()
                .boxed()
                .instantiate(OperatorInput::Bytes(generator(chunks.into_iter())), ctrl.clone())
                .unwrap()
            else {
                panic!("expected events");
            };
            let rows: Vec<_> = out.flat_map(|b| b.to_json_rows()).collect();
            proptest::prop_assert_eq!(rows.len(), 3);
            proptest::prop_assert_eq!(&rows[1]["b"], "x");
            proptest::prop_assert!(ctrl.collected().is_empty());
        }
    }
}
