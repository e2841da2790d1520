fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use lakestore_protocol::{
        AclSpec, AclStatusResponse, BooleanResponse, ConcatSources, DirectoryEntry, EntryKind,
        FileStatusResponse, ListStatusResponse, RemoteExceptionResponse,
    };
    use lakestore_transfer::{ChunkState, Direction, FileState, SessionSnapshot};

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    fn parse_fixture<T: serde::de::DeserializeOwned>(name: &str) -> T {
        serde_json::from_value(load_fixture(name))
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"))
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON
    /// values. Fields the service sends that we do not model must survive.
    fn roundtrip_test<T>(name: &str)
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
            "roundtrip mismatch for {name}:\n  service: {fixture}\n  ours:    {reserialized}"
        );
    }

    // --- Service responses ---

    #[test]
    fn fixture_list_status() {
        roundtrip_test::<ListStatusResponse>("list_status.json");
    }

    #[test]
    fn list_status_page_builds_entries() {
        let page: ListStatusResponse = parse_fixture("list_status.json");
        assert_eq!(page.file_statuses.continuation_token, "part-00000.csv");

        let entries: Vec<DirectoryEntry> = page
            .file_statuses
            .file_status
            .into_iter()
            .map(|s| {
                let name = format!("data/{}", s.path_suffix);
                DirectoryEntry::from_status(name, s).unwrap()
            })
            .collect();
        assert_eq!(entries[0].name, "data/2024");
        assert!(entries[0].is_dir());
        assert!(entries[0].attributes.acl_bit);
        assert_eq!(
            entries[1].kind,
            EntryKind::File { length: 268_435_456 }
        );
        assert_eq!(entries[1].attributes.expiration_time, Some(0));
    }

    #[test]
    fn fixture_file_status() {
        roundtrip_test::<FileStatusResponse>("file_status.json");
    }

    #[test]
    fn file_status_keeps_unmodelled_fields() {
        let status: FileStatusResponse = parse_fixture("file_status.json");
        let entry = DirectoryEntry::from_status("data/report.parquet", status.file_status).unwrap();
        assert_eq!(entry.length(), 1_048_576);
        assert_eq!(entry.attributes.owner, "alice");
        assert_eq!(entry.attributes.expiration_time, Some(1_735_689_600_000));
        assert!(entry.attributes.extra.contains_key("fileId"));
        assert!(entry.attributes.extra.contains_key("childrenNum"));
    }

    #[test]
    fn fixture_acl_status() {
        roundtrip_test::<AclStatusResponse>("acl_status.json");
    }

    #[test]
    fn acl_entries_parse_as_spec() {
        let status: AclStatusResponse = parse_fixture("acl_status.json");
        let spec = AclSpec::parse(&status.acl_status.entries.join(",")).unwrap();
        assert_eq!(spec.entries().len(), 5);
    }

    #[test]
    fn fixture_remote_exception() {
        roundtrip_test::<RemoteExceptionResponse>("remote_exception.json");
    }

    #[test]
    fn remote_exception_detects_bad_offset() {
        let body: RemoteExceptionResponse = parse_fixture("remote_exception.json");
        assert!(body.remote_exception.is_bad_offset());
    }

    #[test]
    fn fixture_boolean_false() {
        roundtrip_test::<BooleanResponse>("boolean_false.json");
        let body: BooleanResponse = parse_fixture("boolean_false.json");
        assert!(!body.boolean);
    }

    #[test]
    fn fixture_concat_sources() {
        roundtrip_test::<ConcatSources>("concat_sources.json");
    }

    // --- Persisted sessions ---

    #[test]
    fn fixture_upload_session() {
        roundtrip_test::<SessionSnapshot>("upload_session.json");
    }

    #[test]
    fn upload_session_reports_progress() {
        let snapshot: SessionSnapshot = parse_fixture("upload_session.json");
        assert_eq!(snapshot.direction, Direction::Upload);
        assert!(!snapshot.is_finished());
        assert_eq!(snapshot.total_bytes(), 600_000_042);
        assert_eq!(snapshot.finished_bytes(), 268_435_498);

        let big = &snapshot.files[0];
        assert_eq!(big.state, FileState::Transferring);
        assert!(big.any_chunk(ChunkState::Errored));
        assert_eq!(big.chunks[1].remaining(), 268_435_456 - 104_857_600);
        assert!(snapshot.files[1].all_chunks(ChunkState::Finished));
    }
}
