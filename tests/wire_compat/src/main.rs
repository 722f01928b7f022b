fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use vidpipe_protocol::wire::{read_frame, write_response, write_video_chunk};
    use vidpipe_protocol::{Chunk, FrameHeader, Status, UploadResponse, VideoChunk};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (key order is irrelevant).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  encoded: {reserialized}"
        );
        parsed
    }

    // --- Producer headers ---

    #[test]
    fn fixture_handshake() {
        let header: FrameHeader = roundtrip_test("handshake.json");
        let FrameHeader::Config(cfg) = header else {
            panic!("expected config header");
        };
        assert_eq!(cfg.producer_threads, 3);
        assert_eq!(cfg.consumer_threads, 2);
        assert_eq!(cfg.queue_size, 10);
        assert_eq!(cfg.file_count, 12);
    }

    #[test]
    fn fixture_chunk_header() {
        let header: FrameHeader = roundtrip_test("chunk_header.json");
        let FrameHeader::Chunk(meta) = header else {
            panic!("expected chunk header");
        };
        assert_eq!(meta.file_name, "holiday.mp4");
        assert_eq!(meta.chunk_index, 2);
        assert_eq!(meta.total_chunks, 3);
        assert_eq!(meta.checksum.len(), 64);
    }

    #[test]
    fn fixture_chunk_header_without_checksum() {
        let header: FrameHeader = roundtrip_test("chunk_header_unchecked.json");
        assert!(matches!(header, FrameHeader::Chunk(meta) if meta.checksum.is_empty()));
    }

    // --- Consumer replies ---

    #[test]
    fn fixture_replies() {
        let cases = [
            ("reply_init.json", Status::Init),
            ("reply_ok.json", Status::Ok),
            ("reply_full.json", Status::Full),
            ("reply_wait.json", Status::Wait),
            ("reply_complete.json", Status::Complete),
        ];
        for (name, status) in cases {
            let reply: UploadResponse = roundtrip_test(name);
            assert_eq!(reply.status, status, "{name}");
        }
    }

    #[test]
    fn fixture_full_reply_echoes_metadata() {
        let reply: UploadResponse = roundtrip_test("reply_full.json");
        let chunk = reply.chunk.expect("full reply carries the chunk");
        assert_eq!(chunk.file_name, "holiday.mp4");
        assert_eq!(chunk.chunk_index, 2);
    }

    // --- Frame bytes ---

    #[tokio::test]
    async fn reply_frame_bytes() {
        let mut buf = Vec::new();
        write_response(&mut buf, &UploadResponse::ok()).await.unwrap();

        let json = br#"{"status":"ok"}"#;
        let mut expected = Vec::new();
        expected.extend_from_slice(&(json.len() as u32).to_be_bytes());
        expected.extend_from_slice(json);
        expected.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn chunk_frame_layout() {
        let chunk = VideoChunk::Chunk(Chunk {
            file_name: "clip.webm".into(),
            index: 0,
            total_chunks: 1,
            payload: b"\x00\x01\x02".to_vec(),
            checksum: String::new(),
        });
        let mut buf = Vec::new();
        write_video_chunk(&mut buf, &chunk).await.unwrap();

        let header_len = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
        let header: serde_json::Value = serde_json::from_slice(&buf[4..4 + header_len]).unwrap();
        assert_eq!(header, load_fixture("chunk_header_unchecked.json"));

        let payload_at = 4 + header_len;
        let payload_len = u32::from_be_bytes(buf[payload_at..payload_at + 4].try_into().unwrap());
        assert_eq!(payload_len, 3);
        assert_eq!(&buf[payload_at + 4..], b"\x00\x01\x02");

        let mut cursor = &buf[..];
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(frame.into_video_chunk().unwrap(), chunk);
    }
}
