// Unit tests for the completion-relay stream line splitting
//
// The byte buffer must reassemble lines (and multi-byte characters)
// that arrive split across network chunks.

use voicepipe::chat::SseLineBuffer;

#[test]
fn test_single_chunk_single_line() {
    let mut buf = SseLineBuffer::new();
    let lines = buf.push(b"data: {\"x\":1}\n");
    assert_eq!(lines, vec!["data: {\"x\":1}".to_string()]);
}

#[test]
fn test_multiple_lines_in_one_chunk() {
    let mut buf = SseLineBuffer::new();
    let lines = buf.push(b"data: a\n\ndata: b\n");
    assert_eq!(lines, vec!["data: a".to_string(), String::new(), "data: b".to_string()]);
}

#[test]
fn test_line_split_across_chunks() {
    let mut buf = SseLineBuffer::new();
    assert!(buf.push(b"data: hel").is_empty());
    let lines = buf.push(b"lo\n");
    assert_eq!(lines, vec!["data: hello".to_string()]);
}

#[test]
fn test_crlf_lines_are_trimmed() {
    let mut buf = SseLineBuffer::new();
    let lines = buf.push(b"data: [DONE]\r\n");
    assert_eq!(lines, vec!["data: [DONE]".to_string()]);
}

#[test]
fn test_multibyte_character_split_across_chunks() {
    let payload = "data: {\"content\":\"你好\"}\n".as_bytes();
    // split one byte into the three-byte encoding of 你
    let split = payload.iter().position(|&b| b >= 0x80).unwrap() + 1;

    let mut buf = SseLineBuffer::new();
    assert!(buf.push(&payload[..split]).is_empty());
    let lines = buf.push(&payload[split..]);

    assert_eq!(lines, vec!["data: {\"content\":\"你好\"}".to_string()]);
    assert!(!lines[0].contains('\u{FFFD}'));
}

#[test]
fn test_every_split_point_reassembles_cleanly() {
    let payload = "data: {\"delta\":{\"content\":\"你好，今天天气不错\"}}\n".as_bytes();
    for split in 0..payload.len() {
        let mut buf = SseLineBuffer::new();
        let mut lines = buf.push(&payload[..split]);
        lines.extend(buf.push(&payload[split..]));
        assert_eq!(lines.len(), 1, "split at byte {}", split);
        assert!(
            !lines[0].contains('\u{FFFD}'),
            "replacement character after split at byte {}",
            split
        );
    }
}

#[test]
fn test_incomplete_tail_is_held_back() {
    let mut buf = SseLineBuffer::new();
    assert!(buf.push(b"data: partial with no newline").is_empty());
    // still nothing until a newline closes the line
    assert!(buf.push(b" ...").is_empty());
    let lines = buf.push(b"!\n");
    assert_eq!(lines, vec!["data: partial with no newline ...!".to_string()]);
}
