use serde_json::Value as JsonValue;

use crate::error::ProxyResult;
use crate::sse::{parse_sse_line, SseEvent, SseLineSplitter};
use crate::transport::UpstreamBody;

/// Summary of one SSE stream consumption pass (spec §4.2 "pipeline
/// optionally observes each chunk for tool-calls and line counts").
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub data_frames: usize,
    pub tool_call_frames: usize,
    pub done_seen: bool,
}

fn frame_has_tool_call(frame: &JsonValue) -> bool {
    frame
        .get("candidates")
        .and_then(|c| c.as_array())
        .map(|candidates| {
            candidates.iter().any(|candidate| {
                candidate
                    .get("content")
                    .and_then(|c| c.get("parts"))
                    .and_then(|p| p.as_array())
                    .map(|parts| parts.iter().any(|p| p.get("functionCall").is_some()))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn frame_text(frame: &JsonValue) -> String {
    frame
        .get("candidates")
        .and_then(|c| c.as_array())
        .map(|candidates| {
            candidates
                .iter()
                .filter_map(|candidate| candidate.get("content")?.get("parts")?.as_array())
                .flat_map(|parts| parts.iter())
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Drains an upstream SSE body, concatenating every frame's candidate text
/// (spec §4.2 "Extract the full text from the resulting SSE stream").
pub async fn extract_text_from_sse(body: UpstreamBody) -> ProxyResult<(String, StreamStats)> {
    let mut stats = StreamStats::default();
    let mut text = String::new();
    match body {
        UpstreamBody::Bytes(bytes) => {
            drain_bytes(&bytes, &mut text, &mut stats)?;
        }
        UpstreamBody::Stream(mut rx) => {
            let mut splitter = SseLineSplitter::new();
            while let Some(chunk) = rx.recv().await {
                let chunk = chunk?;
                for line in splitter.push(&chunk)? {
                    apply_line(&line, &mut text, &mut stats);
                }
            }
        }
    }
    Ok((text, stats))
}

fn drain_bytes(bytes: &[u8], text: &mut String, stats: &mut StreamStats) -> ProxyResult<()> {
    let mut splitter = SseLineSplitter::new();
    for line in splitter.push(bytes)? {
        apply_line(&line, text, stats);
    }
    Ok(())
}

fn apply_line(line: &str, text: &mut String, stats: &mut StreamStats) {
    match parse_sse_line(line) {
        SseEvent::Data(frame) => {
            stats.data_frames += 1;
            if frame_has_tool_call(&frame) {
                stats.tool_call_frames += 1;
            }
            text.push_str(&frame_text(&frame));
        }
        SseEvent::Done => stats.done_seen = true,
        SseEvent::Ignored => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn concatenates_text_across_frames_and_marks_done() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(Ok(Bytes::from(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"hel\"}]}}]}\n".to_string(),
        )))
        .await
        .unwrap();
        tx.send(Ok(Bytes::from(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}]}\n".to_string(),
        )))
        .await
        .unwrap();
        tx.send(Ok(Bytes::from("data: [DONE]\n".to_string())))
            .await
            .unwrap();
        drop(tx);
        let (text, stats) = extract_text_from_sse(UpstreamBody::Stream(rx)).await.unwrap();
        assert_eq!(text, "hello");
        assert_eq!(stats.data_frames, 2);
        assert!(stats.done_seen);
    }

    #[tokio::test]
    async fn detects_tool_call_frames() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(Ok(Bytes::from(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"functionCall\":{\"name\":\"f\"}}]}}]}\n".to_string(),
        )))
        .await
        .unwrap();
        drop(tx);
        let (_text, stats) = extract_text_from_sse(UpstreamBody::Stream(rx)).await.unwrap();
        assert_eq!(stats.tool_call_frames, 1);
    }
}
